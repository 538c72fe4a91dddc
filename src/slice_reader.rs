//! Byte-aligned cursor over a packet or section buffer.
//!
//! The byte-level companion of [`BitReader`](crate::BitReader): same
//! data-plus-position layout, but for the byte-aligned majority of the
//! wire format. Nested length-delimited structures (adaptation fields,
//! sections, descriptor loops) are read through [`SliceReader::sub_reader`]
//! so their bounds are checked once instead of at every field.

use super::{DemuxError, Result};
use std::convert::TryInto;

/// Sequential byte reader over a slice.
///
/// Reads hand out borrows of the underlying buffer, so assembling a
/// payload never copies more than the caller asks for. A failed read
/// reports [`DemuxError::UnexpectedEof`] with byte offsets and does not
/// advance the cursor.
///
/// # Example
///
/// ```
/// use mpegts_demux::SliceReader;
/// let frame_head = [0x47, 0x1f, 0xff];
/// let mut reader = SliceReader::new(&frame_head);
/// assert_eq!(reader.read_u8()?, 0x47);
/// assert_eq!(reader.read_be_u16()? & 0x1fff, 0x1fff);
/// assert_eq!(reader.remaining_len(), 0);
/// # Ok::<(), mpegts_demux::DemuxError>(())
/// ```
#[derive(Debug)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    /// Initializes a reader over any byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn check(&self, wanted: usize) -> Result<()> {
        if wanted > self.remaining_len() {
            Err(DemuxError::UnexpectedEof {
                offset: self.pos,
                wanted,
            })
        } else {
            Ok(())
        }
    }

    /// Number of unread bytes.
    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.pos
    }

    /// All unread bytes, without advancing.
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Advances the cursor without extracting data.
    pub fn skip(&mut self, length: usize) -> Result<()> {
        self.check(length)?;
        self.pos += length;
        Ok(())
    }

    /// Extracts the next `length` bytes and advances.
    pub fn read(&mut self, length: usize) -> Result<&'a [u8]> {
        self.check(length)?;
        let out = &self.data[self.pos..self.pos + length];
        self.pos += length;
        Ok(out)
    }

    /// Extracts all unread bytes and advances to the end.
    pub fn read_to_end(&mut self) -> Result<&'a [u8]> {
        self.read(self.remaining_len())
    }

    /// The next `length` bytes, without advancing.
    pub fn peek(&self, length: usize) -> Result<&'a [u8]> {
        self.check(length)?;
        Ok(&self.data[self.pos..self.pos + length])
    }

    /// Fixed-size read returned by value.
    ///
    /// Wire structures here are a handful of bytes, so the copy is free
    /// and saves callers a dereference.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        // Length is checked by read().
        Ok(self.read(N)?.try_into().unwrap())
    }

    /// Read one byte interpreted as [`u8`].
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read two bytes interpreted as big-endian [`u16`].
    pub fn read_be_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read four bytes interpreted as big-endian [`u32`].
    pub fn read_be_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Splits off a reader over the next `length` bytes and advances this
    /// reader past them.
    ///
    /// A nested structure parsed through the sub-reader can neither run
    /// past its declared length nor leave this reader misaligned. Error
    /// offsets inside a sub-reader are relative to its own window.
    pub fn sub_reader(&mut self, length: usize) -> Result<Self> {
        Ok(Self::new(self.read(length)?))
    }
}

/// Convenience macro to read a modular bitfield from a [`SliceReader`].
///
/// Wraps [`SliceReader::read_array`] to read the exact number of bytes
/// required by the bitfield type. Must be expanded in a function that
/// returns [`Result`](crate::Result).
///
/// # Example
///
/// ```
/// use modular_bitfield_msb::prelude::*;
/// use mpegts_demux::{read_bitfield, SliceReader};
/// #[bitfield]
/// pub(crate) struct MyBitfield {
///     pub a_bit: B1,
///     #[skip]
///     padding: B7,
/// }
///
/// let some_data = [0x80];
/// let mut reader = SliceReader::new(&some_data);
/// let the_bitfield = read_bitfield!(reader, MyBitfield);
/// assert_eq!(the_bitfield.a_bit(), 1);
/// # Ok::<(), mpegts_demux::DemuxError>(())
/// ```
#[macro_export]
macro_rules! read_bitfield {
    ($reader:expr, $type:ty) => {
        <$type>::from_bytes($reader.read_array::<{ std::mem::size_of::<$type>() }>()?)
    };
}
