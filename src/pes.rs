//! Packetized elementary stream payload parsing.
//!
//! A PES payload unit starts with the 00 00 01 prefix, a stream id and a
//! 16-bit length. Most stream ids then carry an optional header with
//! timestamps and assorted conditional fields before the elementary
//! stream bytes begin.

use super::{
    read_bitfield, BitReader, ClockReference, DemuxError, Result, SliceReader,
};
use crate::packet::parse_timestamp;
use log::warn;
use modular_bitfield_msb::prelude::*;
use std::fmt::{Debug, Formatter};

/// Six-byte prefix of every PES payload unit.
#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub struct PesHeader {
    pub start_code: B24,
    pub stream_id: B8,
    pub packet_length: B16,
}

/// Flags and length of the optional PES header.
#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub struct PesOptionalHeader {
    pub marker_bits: B2,
    pub scrambling_control: B2,
    pub priority: bool,
    pub data_alignment_indicator: bool,
    pub copyright: bool,
    pub original: bool,
    pub has_pts: bool,
    pub has_dts: bool,
    pub has_escr: bool,
    pub has_es_rate: bool,
    pub has_dsm_trick_mode: bool,
    pub has_additional_copy_info: bool,
    pub has_crc: bool,
    pub has_extension: bool,
    pub header_length: B8,
}

/// DSM trick mode fields of a PES optional header.
#[derive(Debug, Clone, PartialEq)]
pub struct PesTrickMode {
    /// 3-bit trick mode control.
    pub control: u8,
    /// Field id, for fast and freeze modes.
    pub field_id: Option<u8>,
    /// Intra slice refresh flag, for fast modes.
    pub intra_slice_refresh: Option<bool>,
    /// Frequency truncation, for fast modes.
    pub frequency_truncation: Option<u8>,
    /// Repeat control, for slow modes.
    pub rep_cntrl: Option<u8>,
}

/// Program packet sequence counter of a PES extension.
#[derive(Debug, Clone, PartialEq)]
pub struct PesSequenceCounter {
    /// 7-bit packet sequence counter.
    pub counter: u8,
    /// Whether the original packets used MPEG-1 syntax.
    pub mpeg1: bool,
    /// Stuffing length used in the original packet headers.
    pub original_stuff_length: u8,
}

/// P-STD buffer description of a PES extension.
#[derive(Debug, Clone, PartialEq)]
pub struct PesPstdBuffer {
    /// Buffer scale; `true` means units of 1024 bytes.
    pub scale: bool,
    /// 13-bit buffer size.
    pub size: u16,
}

/// Optional extension at the end of a PES optional header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PesExtension {
    /// 16 bytes of private data.
    pub private_data: Option<Vec<u8>>,
    /// Program stream pack header carried for conversion purposes.
    pub pack_field: Option<Vec<u8>>,
    /// Program packet sequence counter.
    pub sequence_counter: Option<PesSequenceCounter>,
    /// P-STD buffer description.
    pub pstd_buffer: Option<PesPstdBuffer>,
    /// Second-level extension bytes.
    pub extension2: Option<Vec<u8>>,
}

/// One reassembled PES payload unit.
#[derive(Clone, PartialEq)]
pub struct Pes {
    /// Fixed six-byte header.
    pub header: PesHeader,
    /// Optional header, absent for padding and control stream ids.
    pub optional_header: Option<PesOptionalHeader>,
    /// Presentation timestamp, 90 kHz.
    pub pts: Option<u64>,
    /// Decoding timestamp, 90 kHz.
    pub dts: Option<u64>,
    /// Elementary stream clock reference.
    pub escr: Option<ClockReference>,
    /// ES rate in units of 50 bytes per second.
    pub es_rate: Option<u32>,
    /// DSM trick mode.
    pub trick_mode: Option<PesTrickMode>,
    /// Additional copy info.
    pub additional_copy_info: Option<u8>,
    /// CRC of the previous PES packet.
    pub previous_crc: Option<u16>,
    /// Header extension.
    pub extension: Option<PesExtension>,
    /// Elementary stream bytes.
    pub data: Vec<u8>,
}

impl Debug for Pes {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pes")
            .field("header", &self.header)
            .field("optional_header", &self.optional_header)
            .field("pts", &self.pts.map(|pts| format!("{}", crate::pts_format_args!(pts))))
            .field("dts", &self.dts.map(|dts| format!("{}", crate::pts_format_args!(dts))))
            .field("data.len()", &self.data.len())
            .finish()
    }
}

/// Stream ids that carry no optional header: padding, private stream 2,
/// ECM, EMM, program stream directory, DSM-CC and H.222.1 type E.
fn has_optional_header(stream_id: u8) -> bool {
    !matches!(stream_id, 0xbe | 0xbf | 0xf0 | 0xf1 | 0xf2 | 0xf8 | 0xff)
}

fn parse_escr(reader: &mut SliceReader) -> Result<ClockReference> {
    let mut bits = BitReader::new(reader.read(6)?);
    bits.skip_bits(2)?;
    let mut base = bits.read_bits(3)? << 30;
    bits.skip_bits(1)?;
    base |= bits.read_bits(15)? << 15;
    bits.skip_bits(1)?;
    base |= bits.read_bits(15)?;
    bits.skip_bits(1)?;
    let extension = bits.read_bits(9)? as u16;
    Ok(ClockReference { base, extension })
}

fn parse_trick_mode(reader: &mut SliceReader) -> Result<PesTrickMode> {
    let mut bits = BitReader::new(reader.read(1)?);
    let control = bits.read_bits(3)? as u8;
    let mut out = PesTrickMode {
        control,
        field_id: None,
        intra_slice_refresh: None,
        frequency_truncation: None,
        rep_cntrl: None,
    };
    match control {
        // Fast forward and fast reverse
        0b000 | 0b011 => {
            out.field_id = Some(bits.read_bits(2)? as u8);
            out.intra_slice_refresh = Some(bits.read_bit()?);
            out.frequency_truncation = Some(bits.read_bits(2)? as u8);
        }
        // Slow motion and slow reverse
        0b001 | 0b100 => out.rep_cntrl = Some(bits.read_bits(5)? as u8),
        // Freeze frame
        0b010 => out.field_id = Some(bits.read_bits(2)? as u8),
        _ => {}
    }
    Ok(out)
}

fn parse_extension(reader: &mut SliceReader) -> Result<PesExtension> {
    let mut bits = BitReader::new(reader.read(1)?);
    let has_private_data = bits.read_bit()?;
    let has_pack_field = bits.read_bit()?;
    let has_sequence_counter = bits.read_bit()?;
    let has_pstd_buffer = bits.read_bit()?;
    bits.skip_bits(3)?;
    let has_extension2 = bits.read_bit()?;

    let mut out = PesExtension::default();
    if has_private_data {
        out.private_data = Some(reader.read(16)?.to_vec());
    }
    if has_pack_field {
        let length = reader.read_u8()? as usize;
        out.pack_field = Some(reader.read(length)?.to_vec());
    }
    if has_sequence_counter {
        let mut bits = BitReader::new(reader.read(2)?);
        bits.skip_bits(1)?;
        let counter = bits.read_bits(7)? as u8;
        bits.skip_bits(1)?;
        let mpeg1 = bits.read_bit()?;
        let original_stuff_length = bits.read_bits(6)? as u8;
        out.sequence_counter = Some(PesSequenceCounter {
            counter,
            mpeg1,
            original_stuff_length,
        });
    }
    if has_pstd_buffer {
        let mut bits = BitReader::new(reader.read(2)?);
        bits.skip_bits(2)?;
        out.pstd_buffer = Some(PesPstdBuffer {
            scale: bits.read_bit()?,
            size: bits.read_bits(13)? as u16,
        });
    }
    if has_extension2 {
        let length = (reader.read_u8()? & 0x7f) as usize;
        out.extension2 = Some(reader.read(length)?.to_vec());
    }
    Ok(out)
}

/// Parses one reassembled PES payload unit.
pub(crate) fn parse_pes(payload: &[u8]) -> Result<Pes> {
    let mut reader = SliceReader::new(payload);
    if *reader.peek(3)? != [0, 0, 1] {
        return Err(DemuxError::InvalidPes);
    }
    let header = read_bitfield!(reader, PesHeader);
    let mut out = Pes {
        header,
        optional_header: None,
        pts: None,
        dts: None,
        escr: None,
        es_rate: None,
        trick_mode: None,
        additional_copy_info: None,
        previous_crc: None,
        extension: None,
        data: Vec::new(),
    };

    let mut header_consumed = 0usize;
    if has_optional_header(out.header.stream_id()) {
        let optional = read_bitfield!(reader, PesOptionalHeader);
        let header_length = optional.header_length() as usize;
        header_consumed = 3 + header_length;
        let mut o_reader = reader.sub_reader(header_length)?;

        if optional.has_pts() {
            out.pts = Some(parse_timestamp(o_reader.read_array()?));
        }
        if optional.has_dts() {
            out.dts = Some(parse_timestamp(o_reader.read_array()?));
        }
        if optional.has_escr() {
            out.escr = Some(parse_escr(&mut o_reader)?);
        }
        if optional.has_es_rate() {
            let mut bits = BitReader::new(o_reader.read(3)?);
            bits.skip_bits(1)?;
            out.es_rate = Some(bits.read_bits(22)? as u32);
        }
        if optional.has_dsm_trick_mode() {
            out.trick_mode = Some(parse_trick_mode(&mut o_reader)?);
        }
        if optional.has_additional_copy_info() {
            out.additional_copy_info = Some(o_reader.read_u8()? & 0x7f);
        }
        if optional.has_crc() {
            out.previous_crc = Some(o_reader.read_be_u16()?);
        }
        if optional.has_extension() {
            out.extension = Some(parse_extension(&mut o_reader)?);
        }
        // Whatever remains of the declared header length is stuffing.
        out.optional_header = Some(optional);
    }

    let packet_length = out.header.packet_length() as usize;
    let data = if packet_length == 0 {
        // Unbounded; video streams routinely leave the length at 0.
        reader.read_to_end()?
    } else {
        let expected = packet_length.saturating_sub(header_consumed);
        if expected > reader.remaining_len() {
            warn!(
                "PES payload truncated: expected {} bytes, {} available",
                expected,
                reader.remaining_len()
            );
        }
        reader.read(expected.min(reader.remaining_len()))?
    };
    out.data = data.to_vec();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::write_timestamp;
    use crate::BitWriter;

    #[test]
    fn minimal_pes_with_empty_payload() {
        let payload = [0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x80, 0x00, 0x00];
        let pes = parse_pes(&payload).unwrap();
        assert_eq!(pes.header.stream_id(), 0xe0);
        assert!(pes.optional_header.is_some());
        assert!(pes.pts.is_none());
        assert!(pes.data.is_empty());
    }

    #[test]
    fn pts_and_dts_decode() {
        let pts = 0x1_2345_6789u64;
        let dts = pts - 3600;
        let mut stamps = BitWriter::new();
        write_timestamp(&mut stamps, 0b0011, pts);
        write_timestamp(&mut stamps, 0b0001, dts);
        let mut payload = vec![0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x80, 0xc0, 0x0a];
        payload.extend_from_slice(&stamps.finish());
        payload.extend_from_slice(b"payload");
        let pes = parse_pes(&payload).unwrap();
        assert_eq!(pes.pts, Some(pts));
        assert_eq!(pes.dts, Some(dts));
        assert_eq!(pes.data, b"payload");
    }

    #[test]
    fn padding_stream_has_no_optional_header() {
        let mut payload = vec![0x00, 0x00, 0x01, 0xbe, 0x00, 0x04];
        payload.extend_from_slice(&[0xff; 4]);
        let pes = parse_pes(&payload).unwrap();
        assert!(pes.optional_header.is_none());
        assert_eq!(pes.data, vec![0xff; 4]);
    }

    #[test]
    fn bounded_length_limits_payload() {
        // packet_length covers the optional header and 2 data bytes.
        let mut payload = vec![0x00, 0x00, 0x01, 0xc0, 0x00, 0x05, 0x80, 0x00, 0x00];
        payload.extend_from_slice(&[1, 2, 3, 4]);
        let pes = parse_pes(&payload).unwrap();
        assert_eq!(pes.data, vec![1, 2]);
    }

    #[test]
    fn rejects_missing_start_code() {
        let payload = [0x00, 0x00, 0x02, 0xe0, 0x00, 0x00];
        assert!(matches!(parse_pes(&payload), Err(DemuxError::InvalidPes)));
    }

    #[test]
    fn escr_and_extension_fields_decode() {
        let mut header_fields = BitWriter::new();
        // ESCR: reserved, base with markers, extension, marker
        header_fields.write_bits(0b11, 2);
        header_fields.write_bits(0x1, 3);
        header_fields.write_bit(true);
        header_fields.write_bits(0x2345, 15);
        header_fields.write_bit(true);
        header_fields.write_bits(0x1abc, 15);
        header_fields.write_bit(true);
        header_fields.write_bits(0x101, 9);
        header_fields.write_bit(true);
        let escr_bytes = header_fields.finish();
        assert_eq!(escr_bytes.len(), 6);

        let mut payload = vec![0x00, 0x00, 0x01, 0xe0, 0x00, 0x00];
        // flags: ESCR + extension; header_length = 6 + 1 + 2 = 9
        payload.extend_from_slice(&[0x80, 0x21, 0x09]);
        payload.extend_from_slice(&escr_bytes);
        // extension flags: P-STD buffer only; then '01' + scale + size
        payload.push(0x10);
        payload.extend_from_slice(&[0x7f, 0xff]);
        payload.extend_from_slice(b"es");
        let pes = parse_pes(&payload).unwrap();
        let escr = pes.escr.unwrap();
        assert_eq!(escr.base, (0x1u64 << 30) | (0x2345 << 15) | 0x1abc);
        assert_eq!(escr.extension, 0x101);
        let extension = pes.extension.unwrap();
        assert_eq!(
            extension.pstd_buffer,
            Some(PesPstdBuffer {
                scale: true,
                size: 0x1fff,
            })
        );
        assert_eq!(pes.data, b"es");
    }
}
