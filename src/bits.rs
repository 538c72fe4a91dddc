//! Bit-granular cursors over byte buffers.
//!
//! [`SliceReader`](crate::SliceReader) covers the byte-aligned fast path;
//! these cursors handle the fields that straddle byte boundaries (15-bit
//! legal time windows, 22-bit piecewise rates, 12-bit descriptor loop
//! lengths) and the write side of the packet and section serializers.

use super::{DemuxError, Result};

/// Sequential bit reader over a byte slice.
///
/// All multi-bit reads are most-significant-bit first, matching the wire
/// order of ISO/IEC 13818-1. A failed read reports
/// [`DemuxError::UnexpectedEof`] with offsets in bits and does not advance
/// the cursor.
///
/// # Example
///
/// ```
/// use mpegts_demux::BitReader;
/// let data = [0b1010_0000];
/// let mut reader = BitReader::new(&data);
/// assert!(reader.read_bit()?);
/// assert_eq!(reader.read_bits(3)?, 0b010);
/// # Ok::<(), mpegts_demux::DemuxError>(())
/// ```
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Initializes a reader over any byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position in bits from the start of the slice.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of unread bits.
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    fn check(&self, count: usize) -> Result<()> {
        if count > self.remaining_bits() {
            Err(DemuxError::UnexpectedEof {
                offset: self.pos,
                wanted: count,
            })
        } else {
            Ok(())
        }
    }

    /// Reads a single bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        self.check(1)?;
        let byte = self.data[self.pos / 8];
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit != 0)
    }

    /// Reads `count` bits (1 to 64) as an unsigned integer.
    ///
    /// # Panics
    ///
    /// Panics if `count` is 0 or above 64; the field widths of a parser are
    /// static, so this is a programming error rather than a wire error.
    pub fn read_bits(&mut self, count: u32) -> Result<u64> {
        assert!((1..=64).contains(&count), "bit count out of range");
        self.check(count as usize)?;
        let mut value = 0u64;
        let mut left = count;
        while left > 0 {
            let byte = self.data[self.pos / 8];
            let avail = 8 - (self.pos % 8) as u32;
            let take = avail.min(left);
            let chunk = (byte >> (avail - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | chunk as u64;
            self.pos += take as usize;
            left -= take;
        }
        Ok(value)
    }

    /// Reads one whole byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Reads `len` whole bytes, bit-shifting when the cursor is unaligned.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.check(len * 8)?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }

    /// Advances the cursor without extracting data.
    pub fn skip_bits(&mut self, count: usize) -> Result<()> {
        self.check(count)?;
        self.pos += count;
        Ok(())
    }
}

/// Sequential bit writer producing an owned byte buffer.
///
/// Bits accumulate most-significant-bit first. [`BitWriter::finish`]
/// closes the writer and zero-pads the final partial byte.
///
/// # Example
///
/// ```
/// use mpegts_demux::BitWriter;
/// let mut writer = BitWriter::new();
/// writer.write_bits(0b101, 3);
/// assert_eq!(writer.finish(), vec![0b1010_0000]);
/// ```
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    cur: u8,
    used: u8,
}

impl BitWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position in bits from the start of the output.
    pub fn position(&self) -> usize {
        self.buf.len() * 8 + self.used as usize
    }

    /// Writes a single bit.
    pub fn write_bit(&mut self, bit: bool) {
        self.cur = (self.cur << 1) | bit as u8;
        self.used += 1;
        if self.used == 8 {
            self.buf.push(self.cur);
            self.cur = 0;
            self.used = 0;
        }
    }

    /// Writes the low `count` bits (1 to 64) of `value`, MSB first.
    ///
    /// # Panics
    ///
    /// Panics if `count` is out of range or `value` does not fit in
    /// `count` bits.
    pub fn write_bits(&mut self, value: u64, count: u32) {
        assert!((1..=64).contains(&count), "bit count out of range");
        assert!(
            count == 64 || value < (1u64 << count),
            "value does not fit in bit count"
        );
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Writes one whole byte.
    pub fn write_u8(&mut self, value: u8) {
        self.write_bits(value as u64, 8);
    }

    /// Writes a byte slice.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.used == 0 {
            self.buf.extend_from_slice(bytes);
        } else {
            for &b in bytes {
                self.write_u8(b);
            }
        }
    }

    /// Closes the writer, zero-padding any final partial byte.
    pub fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.buf.push(self.cur << (8 - self.used));
        }
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_across_byte_boundaries() {
        let data = [0xab, 0xcd, 0xef];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(4).unwrap(), 0xa);
        assert_eq!(reader.read_bits(12).unwrap(), 0xbcd);
        assert_eq!(reader.read_bits(8).unwrap(), 0xef);
        assert_eq!(reader.remaining_bits(), 0);
    }

    #[test]
    fn read_past_end_fails_without_advancing() {
        let data = [0xff];
        let mut reader = BitReader::new(&data);
        reader.read_bits(4).unwrap();
        let err = reader.read_bits(8).unwrap_err();
        assert!(matches!(
            err,
            DemuxError::UnexpectedEof {
                offset: 4,
                wanted: 8
            }
        ));
        assert_eq!(reader.position(), 4);
        assert_eq!(reader.read_bits(4).unwrap(), 0xf);
    }

    #[test]
    fn write_round_trips_through_read() {
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write_bits(0x1fff, 13);
        writer.write_bits(0x3, 2);
        writer.write_bytes(&[0x42]);
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_bits(13).unwrap(), 0x1fff);
        assert_eq!(reader.read_bits(2).unwrap(), 0x3);
        assert_eq!(reader.read_u8().unwrap(), 0x42);
    }

    #[test]
    fn finish_zero_pads_partial_byte() {
        let mut writer = BitWriter::new();
        writer.write_bits(0b101, 3);
        assert_eq!(writer.finish(), vec![0b1010_0000]);
    }

    #[test]
    fn wide_reads_and_writes() {
        let mut writer = BitWriter::new();
        writer.write_bits(u64::max_value(), 64);
        let bytes = writer.finish();
        assert_eq!(bytes, vec![0xff; 8]);
        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read_bits(64).unwrap(), u64::max_value());
    }
}
