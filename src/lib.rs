//! Library for demultiplexing MPEG transport streams and parsing DVB
//! service information.
//!
//! The crate turns an opaque byte source into a stream of demultiplexed
//! payloads: PSI/SI tables (PAT, PMT, CAT, NIT, SDT, EIT, TDT, TOT, BAT)
//! and packetized elementary stream (PES) payloads. Packet framing copes
//! with 188, 192, 204 and 208 byte packets and can auto-detect the size.
//!
//! # Usage
//! Simply add this crate as a dependency in your `Cargo.toml`.
//!
//! ```toml
//! [dependencies]
//! mpegts-demux = "~0.1.0"
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mpegts_demux::{Demuxer, SeekableSource};
//! use std::fs::File;
//!
//! let file = File::open("input.ts").expect("Unable to open!");
//! let mut demuxer = Demuxer::new(SeekableSource::new(file));
//! while let Ok(data) = demuxer.next_data() {
//!     println!("PID {:#x}: {:?}", data.pid, data.data);
//! }
//! ```

#![allow(unused)]
#![deny(missing_docs, unsafe_code)]

use crc::{Crc, Digest, CRC_32_MPEG_2};
use thiserror::Error;

mod bits;
pub use bits::{BitReader, BitWriter};

mod slice_reader;
pub use slice_reader::SliceReader;

mod packet;
pub use packet::{
    AdaptationExtension, AdaptationExtensionHeader, AdaptationField, AdaptationFieldHeader,
    ClockReference, Packet, PacketHeader, TransportScramblingControl, NULL_PID, PACKET_SIZE,
    SYNC_BYTE,
};

mod source;
pub use source::{ByteSource, SeekableSource, StreamSource};

mod buffer;
pub use buffer::PacketBuffer;

mod pool;
pub use pool::{has_discontinuity, is_retransmission, PacketPool};

mod program_map;
pub use program_map::ProgramMap;

mod psi;
pub use psi::{
    Cat, ElementaryStream, Pat, PatProgram, Pmt, PsiHeader, PsiPayload, PsiSection, PsiSyntax,
};

pub mod dvb;

mod pes;
pub use pes::{
    Pes, PesExtension, PesHeader, PesOptionalHeader, PesPstdBuffer, PesSequenceCounter,
    PesTrickMode,
};

mod data;
pub use data::{Data, DemuxerData};

mod demuxer;
pub use demuxer::{CancelToken, Demuxer, HookOutcome, PacketsParser};

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);
type CrcDigest = Digest<'static, u32>;

/// Errors that may be encountered while demultiplexing an MPEG transport
/// stream.
///
/// [`DemuxError::NoMorePackets`] is a sentinel for a cleanly exhausted byte
/// source rather than a failure; every other variant reports a real
/// problem. Recoverable wire anomalies (unknown table ids, unknown
/// descriptor tags, continuity discontinuities) are logged through the
/// [`log`] facade instead of being surfaced here.
#[derive(Debug, Error)]
pub enum DemuxError {
    /// A packet frame did not start with the 0x47 sync byte.
    #[error("packet does not start with the 0x47 sync byte (got {0:#04x})")]
    NotSyncByte(u8),
    /// Packet-size detection found the initial sync byte but no second one
    /// at any legal stride.
    #[error("no second sync byte found while detecting the packet size")]
    SingleSyncByte,
    /// The byte source is exhausted; there is nothing left to demultiplex.
    #[error("no more packets")]
    NoMorePackets,
    /// A parser ran past the end of its input.
    ///
    /// `offset` and `wanted` are in the units of the cursor that failed:
    /// bytes for [`SliceReader`], bits for [`BitReader`].
    #[error("unexpected end of input: wanted {wanted} more at offset {offset}")]
    UnexpectedEof {
        /// Cursor position at the time of the failed read.
        offset: usize,
        /// Size of the failed read.
        wanted: usize,
    },
    /// A PSI section declared a length above the 1021 byte limit.
    #[error("section length {0} exceeds 1021 bytes")]
    InvalidSectionLength(u16),
    /// A PSI section failed its CRC-32 check.
    #[error("section CRC-32 mismatch: computed {computed:#010x}, stored {stored:#010x}")]
    CrcMismatch {
        /// CRC-32 computed over the received section.
        computed: u32,
        /// CRC-32 stored in the last four section bytes.
        stored: u32,
    },
    /// A payload classified as PES did not carry the 00 00 01 start code.
    #[error("invalid PES start code prefix")]
    InvalidPes,
    /// A packet being serialized does not fit the target packet size.
    #[error("packet needs {needed} bytes but the target packet size is {available}")]
    ShortPayload {
        /// Bytes required by header, adaptation field and payload.
        needed: usize,
        /// Bytes available in the target frame.
        available: usize,
    },
    /// A DVB time, duration or offset field held out-of-range BCD digits.
    #[error("invalid DVB time or duration field")]
    InvalidDvbTime,
    /// The demuxer's cancellation token was triggered.
    #[error("demuxing canceled")]
    Canceled,
    /// The byte source failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// [`std::result::Result`] alias that uses [`DemuxError`].
pub type Result<T> = std::result::Result<T, DemuxError>;

/// Expands to [`format_args`] for a 90kHz timestamp of any integer type.
///
/// Format is <hours>:<minutes>:<seconds>:<90kHz-ticks>
///
/// # Example
///
/// ```
/// use mpegts_demux::pts_format_args;
/// assert_eq!(std::fmt::format(pts_format_args!(900000)), "0:0:10:0");
/// ```
#[macro_export]
macro_rules! pts_format_args {
    ($pts:expr) => {
        format_args!(
            "{}:{}:{}:{}",
            $pts / (90000 * 60 * 60),
            $pts / (90000 * 60) % 60,
            $pts / 90000 % 60,
            $pts % 90000
        )
    };
}
