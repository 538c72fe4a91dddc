//! Packet framing over a byte source.
//!
//! Frames of 188, 192, 204 and 208 bytes all occur in the wild. When the
//! caller does not name a size the first frame is probed for it: 193 bytes
//! are read, the first must be the 0x47 sync byte, and the smallest index
//! in 188..=192 holding another sync byte is taken as the frame stride.
//! Larger strides (204, 208) cannot be probed this way and must be
//! configured explicitly.

use super::{ByteSource, DemuxError, Result, PACKET_SIZE, SYNC_BYTE};

const DETECTION_WINDOW: usize = 193;

/// Fixed-size frame reader with packet-size auto-detection.
pub struct PacketBuffer<S> {
    source: S,
    packet_size: Option<usize>,
}

impl<S: ByteSource> PacketBuffer<S> {
    /// Wraps a byte source. With `packet_size` of `None` the size is
    /// detected on the first [`PacketBuffer::next`] call.
    pub fn new(source: S, packet_size: Option<usize>) -> Self {
        Self {
            source,
            packet_size,
        }
    }

    /// The frame stride, once configured or detected.
    pub fn packet_size(&self) -> Option<usize> {
        self.packet_size
    }

    /// Releases the underlying byte source.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Reads the next frame of exactly `packet_size` bytes.
    ///
    /// A cleanly exhausted or truncated source yields
    /// [`DemuxError::NoMorePackets`].
    pub fn next(&mut self) -> Result<Vec<u8>> {
        let packet_size = match self.packet_size {
            Some(size) => size,
            None => {
                let size = self.auto_detect()?;
                self.packet_size = Some(size);
                size
            }
        };
        let mut frame = vec![0u8; packet_size];
        self.fill(&mut frame)?;
        Ok(frame)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            match self.source.read(&mut buf[done..]) {
                Ok(0) => return Err(DemuxError::NoMorePackets),
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(DemuxError::NoMorePackets)
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Probes the frame stride from the first two sync bytes.
    ///
    /// Afterwards the source is either sought back to its start, or, for
    /// forward-only sources, advanced by exactly
    /// `packet_size - (193 - packet_size)` further bytes so the next read
    /// lands on a frame boundary. The formula assumes the first packet
    /// starts at byte 0 and that the probe has already observed one
    /// additional sync byte.
    fn auto_detect(&mut self) -> Result<usize> {
        let mut probe = [0u8; DETECTION_WINDOW];
        self.fill(&mut probe)?;
        if probe[0] != SYNC_BYTE {
            return Err(DemuxError::NotSyncByte(probe[0]));
        }
        let packet_size = (PACKET_SIZE..DETECTION_WINDOW)
            .find(|&stride| probe[stride] == SYNC_BYTE)
            .ok_or(DemuxError::SingleSyncByte)?;
        match self.source.seek_to_start() {
            Some(result) => {
                result?;
            }
            None => {
                let mut resync = vec![0u8; 2 * packet_size - DETECTION_WINDOW];
                self.fill(&mut resync)?;
            }
        }
        Ok(packet_size)
    }
}
