//! Transport packet parsing and serialization.
//!
//! A frame handed over by the [`PacketBuffer`](crate::PacketBuffer) is
//! always `packet_size` bytes; only 188 of them carry MPEG-TS data. The
//! leading sync byte is verified here, wrapper padding of longer frames is
//! discarded, and the remaining 187 bytes are parsed bit-exact.

use super::{read_bitfield, BitReader, BitWriter, DemuxError, Result, SliceReader};
use modular_bitfield_msb::prelude::*;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

/// Number of wire bytes in an MPEG-TS packet, excluding any frame padding.
pub const PACKET_SIZE: usize = 188;

/// Sync byte starting every MPEG-TS packet.
pub const SYNC_BYTE: u8 = 0x47;

/// PID carrying null packets; exempt from continuity checking.
pub const NULL_PID: u16 = 0x1fff;

/// TSC information used in a packet's payload.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BitfieldSpecifier)]
#[bits = 2]
pub enum TransportScramblingControl {
    /// Not scrambled.
    NotScrambled,
    /// Do not use.
    Reserved,
    /// Scrambled with even key.
    ScrambledEvenKey,
    /// Scrambled with odd key.
    ScrambledOddKey,
}

/// Link-layer header following the sync byte of every packet.
#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub struct PacketHeader {
    pub tei: bool,
    pub pusi: bool,
    pub transport_priority: bool,
    pub pid: B13,
    pub tsc: TransportScramblingControl,
    pub has_adaptation_field: bool,
    pub has_payload: bool,
    pub continuity_counter: B4,
}

/// Packets may contain adaptation meta data in addition or in lieu of
/// payload data. This header specifies the particular type(s) of meta-data
/// contained.
#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationFieldHeader {
    pub length: B8,
    pub discontinuity: bool,
    pub random_access: bool,
    pub es_priority: bool,
    pub has_pcr: bool,
    pub has_opcr: bool,
    pub has_splicing: bool,
    pub has_private_data: bool,
    pub has_extension: bool,
}

/// Length and content flags of an adaptation field extension.
#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationExtensionHeader {
    pub length: B8,
    pub has_ltw: bool,
    pub has_piecewise_rate: bool,
    pub has_seamless_splice: bool,
    #[skip]
    reserved: B5,
}

/// Program clock reference for synchronizing the decoder with the encoder.
///
/// Periodically sent for every program contained in the transport stream.
/// The full 27 MHz tick value is `base * 300 + extension`.
#[derive(Default, Copy, Clone, PartialEq, Eq)]
pub struct ClockReference {
    /// 33-bits of a 90kHz base clock. May be formatted with
    /// [`pts_format_args`](crate::pts_format_args).
    pub base: u64,
    /// 9-bits of a 27MHz clock rolling over every 300 counts to the base.
    pub extension: u16,
}

impl ClockReference {
    /// Full 27 MHz tick count.
    pub fn full_ticks(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    /// Tick count converted to wall-clock time.
    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.full_ticks() * 1000 / 27)
    }
}

impl Debug for ClockReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockReference")
            .field("base", &crate::pts_format_args!(self.base))
            .field("extension", &self.extension)
            .finish()
    }
}

/// Optional extension carried at the end of an adaptation field.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationExtension {
    /// Length and content flags.
    pub header: AdaptationExtensionHeader,
    /// Legal time window validity, when the LTW field is present.
    pub ltw_valid: Option<bool>,
    /// 15-bit legal time window offset.
    pub ltw_offset: Option<u16>,
    /// 22-bit piecewise rate in units of 50 bytes per second.
    pub piecewise_rate: Option<u32>,
    /// 4-bit splice type of a seamless splice.
    pub splice_type: Option<u8>,
    /// DTS of the next access unit after a seamless splice.
    pub dts_next_access_unit: Option<u64>,
}

/// Non-payload packet metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationField {
    /// Header describing which fields are contained.
    pub header: AdaptationFieldHeader,
    /// Program clock reference.
    pub pcr: Option<ClockReference>,
    /// Original program clock reference.
    pub opcr: Option<ClockReference>,
    /// Packets remaining until a splicing point, possibly negative.
    pub splice_countdown: Option<i8>,
    /// Transport private data.
    pub private_data: Option<Vec<u8>>,
    /// Adaptation field extension.
    pub extension: Option<AdaptationExtension>,
    /// Number of trailing 0xFF stuffing bytes inside the declared length.
    pub stuffing_length: u8,
}

/// Top-level parsed structure for one MPEG-TS packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Packet link-layer header.
    pub header: PacketHeader,
    /// Optional adaptation field metadata.
    pub adaptation_field: Option<AdaptationField>,
    /// Optional payload data.
    pub payload: Option<Vec<u8>>,
}

pub(crate) fn parse_timestamp(b: [u8; 5]) -> u64 {
    let mut ts: u64 = ((b[0] & 0x0E) as u64) << 29;
    ts |= (b[1] as u64) << 22;
    ts |= ((b[2] & 0xFE) as u64) << 14;
    ts |= (b[3] as u64) << 7;
    ts |= ((b[4] & 0xFE) as u64) >> 1;
    ts
}

pub(crate) fn write_timestamp(writer: &mut BitWriter, prefix: u8, ts: u64) {
    writer.write_bits(prefix as u64, 4);
    writer.write_bits((ts >> 30) & 0x7, 3);
    writer.write_bit(true);
    writer.write_bits((ts >> 15) & 0x7fff, 15);
    writer.write_bit(true);
    writer.write_bits(ts & 0x7fff, 15);
    writer.write_bit(true);
}

pub(crate) fn parse_pcr(b: [u8; 6]) -> ClockReference {
    let mut base: u64 = (b[0] as u64) << 25;
    base |= (b[1] as u64) << 17;
    base |= (b[2] as u64) << 9;
    base |= (b[3] as u64) << 1;
    base |= (b[4] as u64) >> 7;

    let mut extension: u16 = ((b[4] & 0x1) as u16) << 8;
    extension |= b[5] as u16;
    ClockReference { base, extension }
}

pub(crate) fn write_pcr(writer: &mut BitWriter, pcr: &ClockReference) {
    writer.write_bits(pcr.base & 0x1_ffff_ffff, 33);
    writer.write_bits(0x3f, 6);
    writer.write_bits(pcr.extension as u64 & 0x1ff, 9);
}

impl AdaptationExtension {
    fn parse(reader: &mut SliceReader) -> Result<Self> {
        let header = read_bitfield!(reader, AdaptationExtensionHeader);
        let declared = header.length() as usize;
        if declared == 0 {
            return Err(DemuxError::UnexpectedEof {
                offset: 0,
                wanted: 1,
            });
        }
        // The declared length counts the flags byte already consumed.
        let mut e_reader = reader.sub_reader(declared - 1)?;
        let mut out = Self {
            header,
            ltw_valid: None,
            ltw_offset: None,
            piecewise_rate: None,
            splice_type: None,
            dts_next_access_unit: None,
        };
        if out.header.has_ltw() {
            let mut bits = BitReader::new(e_reader.read(2)?);
            out.ltw_valid = Some(bits.read_bit()?);
            out.ltw_offset = Some(bits.read_bits(15)? as u16);
        }
        if out.header.has_piecewise_rate() {
            let mut bits = BitReader::new(e_reader.read(3)?);
            bits.skip_bits(2)?;
            out.piecewise_rate = Some(bits.read_bits(22)? as u32);
        }
        if out.header.has_seamless_splice() {
            let mut bits = BitReader::new(e_reader.read(5)?);
            out.splice_type = Some(bits.read_bits(4)? as u8);
            let mut dts = bits.read_bits(3)? << 30;
            bits.skip_bits(1)?;
            dts |= bits.read_bits(15)? << 15;
            bits.skip_bits(1)?;
            dts |= bits.read_bits(15)?;
            out.dts_next_access_unit = Some(dts);
        }
        Ok(out)
    }

    fn content_len(&self) -> usize {
        let mut len = 1;
        if self.ltw_offset.is_some() {
            len += 2;
        }
        if self.piecewise_rate.is_some() {
            len += 3;
        }
        if self.dts_next_access_unit.is_some() {
            len += 5;
        }
        len
    }

    fn serialize(&self, writer: &mut BitWriter) {
        writer.write_u8(self.content_len() as u8);
        writer.write_u8(self.header.clone().into_bytes()[1]);
        if let (Some(valid), Some(offset)) = (self.ltw_valid, self.ltw_offset) {
            writer.write_bit(valid);
            writer.write_bits(offset as u64 & 0x7fff, 15);
        }
        if let Some(rate) = self.piecewise_rate {
            writer.write_bits(0x3, 2);
            writer.write_bits(rate as u64 & 0x3f_ffff, 22);
        }
        if let (Some(splice_type), Some(dts)) = (self.splice_type, self.dts_next_access_unit) {
            write_timestamp(writer, splice_type, dts);
        }
    }
}

impl AdaptationField {
    pub(crate) fn parse(reader: &mut SliceReader) -> Result<Self> {
        if reader.peek(1)?[0] == 0 {
            // Single stuffing byte; no flags byte follows.
            reader.skip(1)?;
            return Ok(Self::empty());
        }
        let header = read_bitfield!(reader, AdaptationFieldHeader);
        let mut a_reader = reader.sub_reader(header.length() as usize - 1)?;
        let mut out = Self {
            header,
            pcr: None,
            opcr: None,
            splice_countdown: None,
            private_data: None,
            extension: None,
            stuffing_length: 0,
        };
        if out.header.has_pcr() {
            out.pcr = Some(parse_pcr(a_reader.read_array()?));
        }
        if out.header.has_opcr() {
            out.opcr = Some(parse_pcr(a_reader.read_array()?));
        }
        if out.header.has_splicing() {
            out.splice_countdown = Some(a_reader.read_u8()? as i8);
        }
        if out.header.has_private_data() {
            let length = a_reader.read_u8()? as usize;
            out.private_data = Some(a_reader.read(length)?.to_vec());
        }
        if out.header.has_extension() {
            out.extension = Some(AdaptationExtension::parse(&mut a_reader)?);
        }
        out.stuffing_length = a_reader.remaining_len() as u8;
        a_reader.skip(a_reader.remaining_len())?;
        Ok(out)
    }

    fn empty() -> Self {
        Self {
            header: AdaptationFieldHeader::new(),
            pcr: None,
            opcr: None,
            splice_countdown: None,
            private_data: None,
            extension: None,
            stuffing_length: 0,
        }
    }

    fn content_len(&self) -> usize {
        let mut len = 1;
        if self.pcr.is_some() {
            len += 6;
        }
        if self.opcr.is_some() {
            len += 6;
        }
        if self.splice_countdown.is_some() {
            len += 1;
        }
        if let Some(private) = &self.private_data {
            len += 1 + private.len();
        }
        if let Some(extension) = &self.extension {
            len += 1 + extension.content_len();
        }
        len + self.stuffing_length as usize
    }

    pub(crate) fn serialize(&self, writer: &mut BitWriter) {
        if self.header.length() == 0 {
            writer.write_u8(0);
            return;
        }
        writer.write_u8(self.content_len() as u8);
        writer.write_u8(self.header.clone().into_bytes()[1]);
        if let Some(pcr) = &self.pcr {
            write_pcr(writer, pcr);
        }
        if let Some(opcr) = &self.opcr {
            write_pcr(writer, opcr);
        }
        if let Some(splice_countdown) = self.splice_countdown {
            writer.write_u8(splice_countdown as u8);
        }
        if let Some(private) = &self.private_data {
            writer.write_u8(private.len() as u8);
            writer.write_bytes(private);
        }
        if let Some(extension) = &self.extension {
            extension.serialize(writer);
        }
        for _ in 0..self.stuffing_length {
            writer.write_u8(0xff);
        }
    }
}

impl Packet {
    /// Parse one frame of `packet_size` bytes.
    ///
    /// Fails with [`DemuxError::NotSyncByte`] unless the frame starts with
    /// 0x47. For frames longer than 188 bytes the `len - 188` bytes that
    /// follow the sync byte are wrapper padding and are discarded.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.is_empty() || frame.len() < PACKET_SIZE {
            return Err(DemuxError::UnexpectedEof {
                offset: frame.len(),
                wanted: PACKET_SIZE - frame.len(),
            });
        }
        if frame[0] != SYNC_BYTE {
            return Err(DemuxError::NotSyncByte(frame[0]));
        }
        let mut reader = SliceReader::new(frame);
        reader.skip(1 + (frame.len() - PACKET_SIZE))?;

        let header = read_bitfield!(reader, PacketHeader);
        let mut out = Packet {
            header,
            adaptation_field: None,
            payload: None,
        };
        if out.header.has_adaptation_field() {
            out.adaptation_field = Some(AdaptationField::parse(&mut reader)?);
        }
        if out.header.has_payload() {
            out.payload = Some(reader.read_to_end()?.to_vec());
        }
        Ok(out)
    }

    /// Serialize into exactly `target_size` bytes, 0xFF-stuffed after the
    /// payload.
    ///
    /// Fails with [`DemuxError::ShortPayload`] when header, adaptation
    /// field and payload do not fit.
    pub fn serialize(&self, target_size: usize) -> Result<Vec<u8>> {
        let mut writer = BitWriter::new();
        writer.write_u8(SYNC_BYTE);
        writer.write_bytes(&self.header.clone().into_bytes());
        if let Some(adaptation_field) = &self.adaptation_field {
            adaptation_field.serialize(&mut writer);
        }
        if let Some(payload) = &self.payload {
            writer.write_bytes(payload);
        }
        let mut out = writer.finish();
        if out.len() > target_size {
            return Err(DemuxError::ShortPayload {
                needed: out.len(),
                available: target_size,
            });
        }
        out.resize(target_size, 0xff);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_packet(pid: u16, pusi: bool, cc: u8, payload: Vec<u8>) -> Packet {
        Packet {
            header: PacketHeader::new()
                .with_pusi(pusi)
                .with_pid(pid)
                .with_tsc(TransportScramblingControl::NotScrambled)
                .with_has_payload(true)
                .with_continuity_counter(cc),
            adaptation_field: None,
            payload: Some(payload),
        }
    }

    #[test]
    fn packet_round_trip() {
        let packet = payload_packet(0x100, true, 7, vec![1, 2, 3, 4]);
        let bytes = packet.serialize(PACKET_SIZE).unwrap();
        assert_eq!(bytes.len(), PACKET_SIZE);
        let mut reparsed = Packet::parse(&bytes).unwrap();
        // Serialization stuffs the frame; the payload grows accordingly.
        let payload = reparsed.payload.take().unwrap();
        assert_eq!(&payload[..4], &[1, 2, 3, 4]);
        assert!(payload[4..].iter().all(|&b| b == 0xff));
        assert_eq!(reparsed.header, packet.header);
    }

    #[test]
    fn adaptation_field_round_trip() {
        let extension = AdaptationExtension {
            header: AdaptationExtensionHeader::new()
                .with_length(11)
                .with_has_ltw(true)
                .with_has_piecewise_rate(true)
                .with_has_seamless_splice(true),
            ltw_valid: Some(true),
            ltw_offset: Some(0x1234),
            piecewise_rate: Some(0x2_0000),
            splice_type: Some(0x2),
            dts_next_access_unit: Some(0x1_2345_6789),
        };
        let adaptation_field = AdaptationField {
            header: AdaptationFieldHeader::new()
                .with_length(29)
                .with_random_access(true)
                .with_has_pcr(true)
                .with_has_opcr(true)
                .with_has_splicing(true)
                .with_has_private_data(true)
                .with_has_extension(true),
            pcr: Some(ClockReference {
                base: 0x1_2345_6789,
                extension: 0x123,
            }),
            opcr: Some(ClockReference {
                base: 42,
                extension: 0,
            }),
            splice_countdown: Some(-2),
            private_data: Some(vec![0xde, 0xad]),
            extension: Some(extension),
            stuffing_length: 0,
        };
        let packet = Packet {
            header: PacketHeader::new()
                .with_pid(0x42)
                .with_tsc(TransportScramblingControl::NotScrambled)
                .with_has_adaptation_field(true)
                .with_has_payload(true)
                .with_continuity_counter(1),
            adaptation_field: Some(adaptation_field),
            payload: Some(vec![0xaa; 154]),
        };
        let bytes = packet.serialize(PACKET_SIZE).unwrap();
        let reparsed = Packet::parse(&bytes).unwrap();
        assert_eq!(reparsed, packet);
    }

    #[test]
    fn stuffing_only_adaptation_field() {
        let packet = Packet {
            header: PacketHeader::new()
                .with_pid(0x50)
                .with_tsc(TransportScramblingControl::NotScrambled)
                .with_has_adaptation_field(true)
                .with_has_payload(true)
                .with_continuity_counter(0),
            adaptation_field: Some(AdaptationField {
                header: AdaptationFieldHeader::new().with_length(21),
                pcr: None,
                opcr: None,
                splice_countdown: None,
                private_data: None,
                extension: None,
                stuffing_length: 20,
            }),
            payload: Some(vec![9; 162]),
        };
        let bytes = packet.serialize(PACKET_SIZE).unwrap();
        let reparsed = Packet::parse(&bytes).unwrap();
        assert_eq!(reparsed, packet);
    }

    #[test]
    fn oversized_frame_discards_wrapper_padding() {
        let packet = payload_packet(0x1ab, true, 5, vec![0x11; 184]);
        let bytes = packet.serialize(PACKET_SIZE).unwrap();
        let mut frame = vec![SYNC_BYTE, 0, 0, 0, 0];
        frame.extend_from_slice(&bytes[1..]);
        assert_eq!(frame.len(), 192);
        let reparsed = Packet::parse(&frame).unwrap();
        assert_eq!(reparsed, packet);
    }

    #[test]
    fn rejects_missing_sync_byte() {
        let frame = vec![0x48; PACKET_SIZE];
        assert!(matches!(
            Packet::parse(&frame),
            Err(DemuxError::NotSyncByte(0x48))
        ));
    }

    #[test]
    fn rejects_packet_that_does_not_fit() {
        let packet = payload_packet(0x10, false, 0, vec![0; 185]);
        assert!(matches!(
            packet.serialize(PACKET_SIZE),
            Err(DemuxError::ShortPayload { needed: 189, .. })
        ));
    }

    #[test]
    fn pcr_round_trip() {
        let pcr = ClockReference {
            base: 0x1_ffff_fffe,
            extension: 0x1fe,
        };
        let mut writer = BitWriter::new();
        write_pcr(&mut writer, &pcr);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 6);
        let mut array = [0u8; 6];
        array.copy_from_slice(&bytes);
        assert_eq!(parse_pcr(array), pcr);
        assert_eq!(pcr.full_ticks(), 0x1_ffff_fffe * 300 + 0x1fe);
    }

    #[test]
    fn timestamp_round_trip() {
        let ts = 0x1_2345_6789u64;
        let mut writer = BitWriter::new();
        write_timestamp(&mut writer, 0b0010, ts);
        let bytes = writer.finish();
        assert_eq!(bytes.len(), 5);
        let mut array = [0u8; 5];
        array.copy_from_slice(&bytes);
        assert_eq!(parse_timestamp(array), ts);
    }
}
