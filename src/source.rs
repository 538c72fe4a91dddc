//! Byte source contract for the demuxer.
//!
//! Transport streams arrive both from files, which can seek, and from
//! sockets or pipes, which cannot. [`ByteSource`] captures the difference
//! at runtime so the packet-size detector and [`Demuxer::rewind`]
//! (crate::Demuxer::rewind) can pick a strategy per source.

use std::io::{Read, Seek, SeekFrom};

/// A byte stream feeding the demuxer, with optional seek support.
pub trait ByteSource {
    /// Pull some bytes into `buf`, returning how many were read. Zero
    /// means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Reposition the source at its first byte.
    ///
    /// Returns `None` when the source cannot seek; callers fall back to
    /// consuming bytes forward instead.
    fn seek_to_start(&mut self) -> Option<std::io::Result<u64>>;
}

/// [`ByteSource`] over any reader that can seek, such as a file.
#[derive(Debug)]
pub struct SeekableSource<R>(R);

impl<R: Read + Seek> SeekableSource<R> {
    /// Wraps a seekable reader.
    pub fn new(inner: R) -> Self {
        Self(inner)
    }

    /// Unwraps the inner reader.
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: Read + Seek> ByteSource for SeekableSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }

    fn seek_to_start(&mut self) -> Option<std::io::Result<u64>> {
        Some(self.0.seek(SeekFrom::Start(0)))
    }
}

/// [`ByteSource`] over a forward-only reader, such as a socket.
#[derive(Debug)]
pub struct StreamSource<R>(R);

impl<R: Read> StreamSource<R> {
    /// Wraps a forward-only reader.
    pub fn new(inner: R) -> Self {
        Self(inner)
    }

    /// Unwraps the inner reader.
    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: Read> ByteSource for StreamSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }

    fn seek_to_start(&mut self) -> Option<std::io::Result<u64>> {
        None
    }
}
