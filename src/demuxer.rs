//! Top-level demultiplexing cursor.
//!
//! The demuxer owns the byte source, the packet pool and the program map,
//! and lazily drives the whole pipeline from
//! [`Demuxer::next_data`]: frame, parse, pool, classify. Packets keep
//! arriving until a payload unit completes, so one `next_data` call may
//! read many packets.

use super::{
    ByteSource, Data, DemuxError, DemuxerData, Packet, PacketBuffer, PacketPool, ProgramMap,
    Result,
};
use crate::data::parse_data;
use log::warn;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of a [`PacketsParser`] hook invocation.
#[derive(Debug, Default)]
pub struct HookOutcome {
    /// Items the hook produced from the group.
    pub data: Vec<DemuxerData>,
    /// When set, the hook owns the group and built-in classification is
    /// skipped.
    pub skip: bool,
}

/// Hook that intercepts payload unit groups before the built-in
/// classifier.
///
/// An escape hatch for experimental parsers: the hook sees every
/// completed group and may consume it by setting
/// [`HookOutcome::skip`].
pub trait PacketsParser {
    /// Inspects one payload unit group.
    fn parse(&mut self, packets: &[Packet]) -> Result<HookOutcome>;
}

/// Cooperative cancellation flag shared with the demuxer.
///
/// Cancellation is observed between packets, at the top of
/// [`Demuxer::next_packet`]; a read blocked on the byte source is not
/// interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Lazy demultiplexing cursor over a byte source.
///
/// # Example
///
/// ```no_run
/// use mpegts_demux::{Demuxer, SeekableSource};
/// use std::fs::File;
///
/// let file = File::open("input.ts").expect("Unable to open!");
/// let mut demuxer = Demuxer::new(SeekableSource::new(file));
/// while let Ok(data) = demuxer.next_data() {
///     println!("PID {:#x}: {:?}", data.pid, data.data);
/// }
/// ```
pub struct Demuxer<S: ByteSource> {
    source: Option<S>,
    buffer: Option<PacketBuffer<S>>,
    packet_size: Option<usize>,
    packets_parser: Option<Box<dyn PacketsParser>>,
    pool: PacketPool,
    program_map: ProgramMap,
    queue: VecDeque<DemuxerData>,
    cancel: CancelToken,
}

impl<S: ByteSource> Demuxer<S> {
    /// Creates a demuxer with packet-size auto-detection.
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
            buffer: None,
            packet_size: None,
            packets_parser: None,
            pool: PacketPool::new(),
            program_map: ProgramMap::new(),
            queue: VecDeque::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Fixes the frame size instead of auto-detecting it. Required for
    /// 204 and 208 byte frames.
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = Some(packet_size);
        self
    }

    /// Installs a [`PacketsParser`] hook.
    pub fn with_packets_parser(mut self, parser: Box<dyn PacketsParser>) -> Self {
        self.packets_parser = Some(parser);
        self
    }

    /// Token for canceling this demuxer from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The program map learned from PAT sections so far.
    pub fn program_map(&self) -> &ProgramMap {
        &self.program_map
    }

    /// The frame stride, once configured or detected.
    pub fn packet_size(&self) -> Option<usize> {
        match &self.buffer {
            Some(buffer) => buffer.packet_size(),
            None => self.packet_size,
        }
    }

    /// Frames and parses the next packet.
    ///
    /// Checks cancellation first, then reads exactly one frame.
    /// [`DemuxError::NoMorePackets`] propagates unchanged at end of
    /// stream.
    pub fn next_packet(&mut self) -> Result<Packet> {
        if self.cancel.is_canceled() {
            return Err(DemuxError::Canceled);
        }
        if self.buffer.is_none() {
            // The source is parked here whenever no buffer exists.
            let source = self.source.take().unwrap();
            self.buffer = Some(PacketBuffer::new(source, self.packet_size));
        }
        let frame = self.buffer.as_mut().unwrap().next()?;
        Packet::parse(&frame)
    }

    /// Returns the next demultiplexed item.
    ///
    /// Drains previously decoded items first; otherwise packets are read
    /// and pooled until a payload unit completes and decodes. At end of
    /// stream the pool is drained, swallowing per-group decode failures so
    /// a partially valid tail still comes out, and finally
    /// [`DemuxError::NoMorePackets`] surfaces.
    pub fn next_data(&mut self) -> Result<DemuxerData> {
        if let Some(data) = self.queue.pop_front() {
            return Ok(data);
        }
        loop {
            let packet = match self.next_packet() {
                Ok(packet) => packet,
                Err(DemuxError::NoMorePackets) => {
                    while let Some(group) = self.pool.dump() {
                        match self.handle_group(group) {
                            Ok(mut items) if !items.is_empty() => {
                                let first = items.remove(0);
                                self.queue.extend(items);
                                return Ok(first);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Discarding undecodable payload unit tail: {}", e);
                            }
                        }
                    }
                    return Err(DemuxError::NoMorePackets);
                }
                Err(e) => return Err(e),
            };
            if let Some(group) = self.pool.add(packet) {
                let mut items = self.handle_group(group)?;
                if !items.is_empty() {
                    let first = items.remove(0);
                    self.queue.extend(items);
                    return Ok(first);
                }
            }
        }
    }

    /// Restarts demultiplexing from the beginning of the source.
    ///
    /// The pending queue and pool are always cleared and the frame size
    /// will be re-detected. Returns `Some(0)` after a successful seek, or
    /// `None` when the source cannot seek, in which case it stays where it
    /// is.
    pub fn rewind(&mut self) -> Result<Option<u64>> {
        self.queue.clear();
        self.pool = PacketPool::new();
        if let Some(buffer) = self.buffer.take() {
            self.source = Some(buffer.into_source());
        }
        let source = self.source.as_mut().unwrap();
        match source.seek_to_start() {
            Some(result) => Ok(Some(result?)),
            None => Ok(None),
        }
    }

    fn handle_group(&mut self, group: Vec<Packet>) -> Result<Vec<DemuxerData>> {
        let items = match &mut self.packets_parser {
            Some(parser) => {
                let outcome = parser.parse(&group)?;
                if outcome.skip {
                    outcome.data
                } else {
                    parse_data(&group, &self.program_map)?
                }
            }
            None => parse_data(&group, &self.program_map)?,
        };
        for item in &items {
            if let Data::Pat(pat) = &item.data {
                for program in &pat.programs {
                    // Program 0 names the NIT PID, not a PMT.
                    if program.program_number != 0 {
                        self.program_map
                            .set(program.program_map_id, program.program_number);
                    }
                }
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::Cat;
    use crate::{
        AdaptationField, AdaptationFieldHeader, Pat, PatProgram, PacketHeader, SeekableSource,
        StreamSource, TransportScramblingControl, PACKET_SIZE,
    };
    use std::io::Cursor;

    fn pat() -> Pat {
        Pat {
            ts_id: 1,
            version: 0,
            current_next: true,
            programs: vec![
                PatProgram {
                    program_number: 0,
                    program_map_id: 16,
                },
                PatProgram {
                    program_number: 2,
                    program_map_id: 0x100,
                },
                PatProgram {
                    program_number: 4,
                    program_map_id: 0x101,
                },
            ],
        }
    }

    fn payload_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
        Packet {
            header: PacketHeader::new()
                .with_pusi(pusi)
                .with_pid(pid)
                .with_tsc(TransportScramblingControl::NotScrambled)
                .with_has_payload(true)
                .with_continuity_counter(cc),
            adaptation_field: None,
            payload: Some(payload.to_vec()),
        }
        .serialize(PACKET_SIZE)
        .unwrap()
    }

    /// Builds a packet whose payload is exactly `payload`, stuffing the
    /// rest of the frame through the adaptation field.
    fn af_stuffed_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
        let stuffing = (PACKET_SIZE - 4 - 2 - payload.len()) as u8;
        Packet {
            header: PacketHeader::new()
                .with_pusi(pusi)
                .with_pid(pid)
                .with_tsc(TransportScramblingControl::NotScrambled)
                .with_has_adaptation_field(true)
                .with_has_payload(true)
                .with_continuity_counter(cc),
            adaptation_field: Some(AdaptationField {
                header: AdaptationFieldHeader::new().with_length(1 + stuffing),
                pcr: None,
                opcr: None,
                splice_countdown: None,
                private_data: None,
                extension: None,
                stuffing_length: stuffing,
            }),
            payload: Some(payload.to_vec()),
        }
        .serialize(PACKET_SIZE)
        .unwrap()
    }

    fn pat_stream(pat: &Pat) -> Vec<u8> {
        let mut payload = vec![0u8];
        payload.extend_from_slice(&pat.write_section());
        payload_packet(0, true, 0, &payload)
    }

    fn demuxer_over(stream: Vec<u8>) -> Demuxer<SeekableSource<Cursor<Vec<u8>>>> {
        // Surfaces drain/pool warnings when tests run with RUST_LOG set.
        let _ = pretty_env_logger::try_init();
        Demuxer::new(SeekableSource::new(Cursor::new(stream)))
    }

    #[test]
    fn pat_updates_program_map() {
        let mut demuxer = demuxer_over(pat_stream(&pat()));
        let data = demuxer.next_data().unwrap();
        assert_eq!(data.pid, 0);
        assert_eq!(data.data, Data::Pat(pat()));
        assert!(data.first_packet.header.pusi());
        assert!(demuxer.program_map().exists(0x100));
        assert!(demuxer.program_map().exists(0x101));
        assert!(!demuxer.program_map().exists(16));
        assert!(matches!(
            demuxer.next_data(),
            Err(DemuxError::NoMorePackets)
        ));
    }

    #[test]
    fn split_pat_equals_single_payload_pat() {
        // Inflate the PAT past one packet's 184 payload bytes.
        let mut big = pat();
        for i in 0..38 {
            big.programs.push(PatProgram {
                program_number: 10 + i,
                program_map_id: 0x200 + i,
            });
        }
        let mut payload = vec![0u8];
        payload.extend_from_slice(&big.write_section());
        assert!(payload.len() > 147);

        let mut split = af_stuffed_packet(0, true, 0, &payload[..147]);
        split.extend_from_slice(&payload_packet(0, false, 1, &payload[147..]));
        let mut demuxer = demuxer_over(split);
        let from_split = demuxer.next_data().unwrap();

        let mut demuxer = demuxer_over(payload_packet(0, true, 0, &payload));
        let from_single = demuxer.next_data().unwrap();
        assert_eq!(from_split.data, from_single.data);
        assert_eq!(from_split.data, Data::Pat(big));
    }

    #[test]
    fn minimal_pes_drains_at_end_of_stream() {
        let pes_payload = [0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x80, 0x00, 0x00];
        let mut demuxer = demuxer_over(af_stuffed_packet(0x200, true, 0, &pes_payload));
        let data = demuxer.next_data().unwrap();
        assert_eq!(data.pid, 0x200);
        match data.data {
            Data::Pes(pes) => {
                assert_eq!(pes.header.stream_id(), 0xe0);
                assert!(pes.data.is_empty());
            }
            other => panic!("wrong data: {:?}", other),
        }
    }

    #[test]
    fn rewind_on_seekable_source_restarts() {
        let mut demuxer = demuxer_over(pat_stream(&pat()));
        demuxer.next_data().unwrap();
        assert_eq!(demuxer.rewind().unwrap(), Some(0));
        let data = demuxer.next_data().unwrap();
        assert_eq!(data.data, Data::Pat(pat()));
    }

    #[test]
    fn rewind_on_forward_only_source_is_a_sentinel() {
        let stream = pat_stream(&pat());
        let mut demuxer = Demuxer::new(StreamSource::new(Cursor::new(stream)));
        assert_eq!(demuxer.rewind().unwrap(), None);
    }

    #[test]
    fn canceled_demuxer_stops() {
        let mut demuxer = demuxer_over(pat_stream(&pat()));
        demuxer.cancel_token().cancel();
        assert!(matches!(demuxer.next_packet(), Err(DemuxError::Canceled)));
        assert!(matches!(demuxer.next_data(), Err(DemuxError::Canceled)));
    }

    struct SkipPat;

    impl PacketsParser for SkipPat {
        fn parse(&mut self, packets: &[Packet]) -> Result<HookOutcome> {
            if packets[0].header.pid() == 0 {
                Ok(HookOutcome {
                    data: vec![DemuxerData {
                        pid: 0,
                        first_packet: packets[0].clone(),
                        data: Data::Cat(Cat {
                            descriptors: vec![],
                        }),
                    }],
                    skip: true,
                })
            } else {
                Ok(HookOutcome::default())
            }
        }
    }

    #[test]
    fn packets_parser_hook_owns_groups_it_skips() {
        let mut demuxer =
            demuxer_over(pat_stream(&pat())).with_packets_parser(Box::new(SkipPat));
        let data = demuxer.next_data().unwrap();
        assert_eq!(
            data.data,
            Data::Cat(Cat {
                descriptors: vec![]
            })
        );
        // The hook swallowed the PAT, so the program map stays empty.
        assert!(!demuxer.program_map().exists(0x100));
    }
}
