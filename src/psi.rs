//! PSI section parsing and the MPEG-defined tables (PAT, PMT, CAT).
//!
//! One payload unit may carry several concatenated sections; parsing runs
//! until only 0xFF stuffing remains. Each CRC-carrying section is verified
//! with the MPEG-2 CRC-32 before its body is decoded. DVB-defined table
//! bodies are delegated to [`dvb`](crate::dvb).

use super::{read_bitfield, BitWriter, DemuxError, Result, SliceReader, CRC};
use crate::dvb::descriptors::{descriptors_wire_len, parse_descriptors_to_end, Descriptor};
use crate::dvb::{self, Bat, Eit, Nit, Sdt, Tdt, Tot};
use log::warn;
use modular_bitfield_msb::prelude::*;

/// Fixed three-byte header starting every PSI section.
#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub struct PsiHeader {
    pub table_id: B8,
    pub syntax_indicator: bool,
    pub private_indicator: bool,
    pub reserved: B2,
    pub section_length: B12,
}

/// Five syntax bytes present when the syntax indicator is set.
#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub struct PsiSyntax {
    pub table_id_extension: B16,
    pub reserved: B2,
    pub version: B5,
    pub current_next: bool,
    pub section_number: B8,
    pub last_section_number: B8,
}

#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatEntry {
    pub program_num: B16,
    pub reserved: B3,
    pub program_map_pid: B13,
}

#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PmtHeader {
    pub reserved: B3,
    pub pcr_pid: B13,
    pub reserved2: B4,
    pub program_info_length: B12,
}

#[bitfield]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EsInfoHeader {
    pub stream_type: B8,
    pub reserved: B3,
    pub elementary_pid: B13,
    pub reserved2: B4,
    pub es_info_length: B12,
}

/// One program listed by the PAT.
#[derive(Debug, Clone, PartialEq)]
pub struct PatProgram {
    /// Program number; 0 names the NIT PID instead of a program.
    pub program_number: u16,
    /// PID carrying the program's PMT (or the NIT for program 0).
    pub program_map_id: u16,
}

/// Program association table.
#[derive(Debug, Clone, PartialEq)]
pub struct Pat {
    /// Transport stream id.
    pub ts_id: u16,
    /// Table version.
    pub version: u8,
    /// Whether this version is currently applicable.
    pub current_next: bool,
    /// Listed programs, program 0 included.
    pub programs: Vec<PatProgram>,
}

/// One elementary stream listed by a PMT.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementaryStream {
    /// PID carrying the stream.
    pub pid: u16,
    /// Stream type per ISO/IEC 13818-1 table 2-29.
    pub stream_type: u8,
    /// ES descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Program map table.
#[derive(Debug, Clone, PartialEq)]
pub struct Pmt {
    /// Program number from the table syntax.
    pub program_number: u16,
    /// Table version.
    pub version: u8,
    /// Whether this version is currently applicable.
    pub current_next: bool,
    /// PID carrying the program's PCR.
    pub pcr_pid: u16,
    /// Program-level descriptors.
    pub program_descriptors: Vec<Descriptor>,
    /// Elementary streams of the program.
    pub elementary_streams: Vec<ElementaryStream>,
}

/// Conditional access table.
#[derive(Debug, Clone, PartialEq)]
pub struct Cat {
    /// CA descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Decoded body of one PSI section.
#[derive(Debug, Clone, PartialEq)]
pub enum PsiPayload {
    /// Program association table.
    Pat(Pat),
    /// Program map table.
    Pmt(Pmt),
    /// Conditional access table.
    Cat(Cat),
    /// Network information table.
    Nit(Nit),
    /// Bouquet association table.
    Bat(Bat),
    /// Service description table.
    Sdt(Sdt),
    /// Event information table.
    Eit(Eit),
    /// Time and date table.
    Tdt(Tdt),
    /// Time offset table.
    Tot(Tot),
}

/// One parsed PSI section.
#[derive(Debug, Clone, PartialEq)]
pub struct PsiSection {
    /// Fixed section header.
    pub header: PsiHeader,
    /// Table syntax, when the syntax indicator is set.
    pub syntax: Option<PsiSyntax>,
    /// Decoded table body.
    pub payload: PsiPayload,
    /// Verified CRC-32, for tables that carry one.
    pub crc32: Option<u32>,
}

fn is_known_table(table_id: u8) -> bool {
    matches!(
        table_id,
        0x00 | 0x01 | 0x02 | 0x40 | 0x41 | 0x42 | 0x46 | 0x4a | 0x4e..=0x6f | 0x70 | 0x73
    )
}

/// TDT is the only known table without a trailing CRC-32.
fn has_crc(table_id: u8) -> bool {
    table_id != 0x70
}

/// Parses the sections of one PSI payload unit.
///
/// Consumes the pointer field, then sections until only stuffing remains.
/// Unknown table ids are logged and skipped without failing the payload.
pub(crate) fn parse_sections(payload: &[u8]) -> Result<Vec<PsiSection>> {
    let mut reader = SliceReader::new(payload);
    let pointer = reader.read_u8()? as usize;
    reader.skip(pointer)?;

    let mut sections = Vec::new();
    while reader.remaining_len() > 0 {
        if reader.remaining().iter().all(|&b| b == 0xff) {
            break;
        }
        let header_bytes = reader.read_array::<3>()?;
        let header = PsiHeader::from_bytes(header_bytes);
        let table_id = header.table_id();
        if table_id == 0xff {
            break;
        }
        let section_length = header.section_length();
        if section_length > 1021 {
            return Err(DemuxError::InvalidSectionLength(section_length));
        }
        let mut s_reader = reader.sub_reader(section_length as usize)?;
        if !is_known_table(table_id) {
            warn!("Skipping section with unknown table id {:#04x}", table_id);
            continue;
        }

        let mut hasher = CRC.digest();
        hasher.update(&header_bytes);
        let syntax = if header.syntax_indicator() {
            let syntax_bytes = s_reader.read_array::<5>()?;
            hasher.update(&syntax_bytes);
            Some(PsiSyntax::from_bytes(syntax_bytes))
        } else {
            None
        };

        let crc_len = if has_crc(table_id) { 4 } else { 0 };
        s_reader.peek(crc_len)?;
        let body = s_reader.read(s_reader.remaining_len() - crc_len)?;
        hasher.update(body);
        let crc32 = if has_crc(table_id) {
            let stored = s_reader.read_be_u32()?;
            let computed = hasher.finalize();
            if computed != stored {
                warn!("CRC mismatch in table {:#04x} section", table_id);
                return Err(DemuxError::CrcMismatch { computed, stored });
            }
            Some(stored)
        } else {
            None
        };

        let payload = decode_table(table_id, syntax.as_ref(), body)?;
        sections.push(PsiSection {
            header,
            syntax,
            payload,
            crc32,
        });
    }
    Ok(sections)
}

fn decode_table(table_id: u8, syntax: Option<&PsiSyntax>, body: &[u8]) -> Result<PsiPayload> {
    let mut reader = SliceReader::new(body);
    let table_id_extension = syntax.map(|s| s.table_id_extension()).unwrap_or(0);
    let version = syntax.map(|s| s.version()).unwrap_or(0);
    let current_next = syntax.map(|s| s.current_next()).unwrap_or(false);
    Ok(match table_id {
        0x00 => {
            let mut programs = Vec::new();
            while reader.remaining_len() >= 4 {
                let entry = read_bitfield!(reader, PatEntry);
                programs.push(PatProgram {
                    program_number: entry.program_num(),
                    program_map_id: entry.program_map_pid(),
                });
            }
            PsiPayload::Pat(Pat {
                ts_id: table_id_extension,
                version,
                current_next,
                programs,
            })
        }
        0x01 => PsiPayload::Cat(Cat {
            descriptors: parse_descriptors_to_end(&mut reader)?,
        }),
        0x02 => {
            let pmt_header = read_bitfield!(reader, PmtHeader);
            let mut info_reader = reader.sub_reader(pmt_header.program_info_length() as usize)?;
            let program_descriptors = parse_descriptors_to_end(&mut info_reader)?;
            let mut elementary_streams = Vec::new();
            while reader.remaining_len() > 0 {
                let es_header = read_bitfield!(reader, EsInfoHeader);
                let mut es_reader = reader.sub_reader(es_header.es_info_length() as usize)?;
                elementary_streams.push(ElementaryStream {
                    pid: es_header.elementary_pid(),
                    stream_type: es_header.stream_type(),
                    descriptors: parse_descriptors_to_end(&mut es_reader)?,
                });
            }
            PsiPayload::Pmt(Pmt {
                program_number: table_id_extension,
                version,
                current_next,
                pcr_pid: pmt_header.pcr_pid(),
                program_descriptors,
                elementary_streams,
            })
        }
        0x40 | 0x41 => PsiPayload::Nit(dvb::parse_nit(&mut reader, table_id_extension)?),
        0x4a => PsiPayload::Bat(dvb::parse_bat(&mut reader, table_id_extension)?),
        0x42 | 0x46 => PsiPayload::Sdt(dvb::parse_sdt(&mut reader, table_id_extension)?),
        0x4e..=0x6f => PsiPayload::Eit(dvb::parse_eit(&mut reader, table_id_extension)?),
        0x70 => PsiPayload::Tdt(dvb::parse_tdt(&mut reader)?),
        0x73 => PsiPayload::Tot(dvb::parse_tot(&mut reader)?),
        // is_known_table() gates every caller.
        _ => unreachable!("unhandled table id {:#04x}", table_id),
    })
}

fn finish_section(mut bytes: Vec<u8>) -> Vec<u8> {
    let crc = CRC.checksum(&bytes);
    bytes.extend_from_slice(&crc.to_be_bytes());
    bytes
}

impl Pat {
    /// Serializes this table back into full section bytes, CRC included.
    ///
    /// The section is written as number 0 of 0.
    pub fn write_section(&self) -> Vec<u8> {
        let body_len = self.programs.len() * 4;
        let mut writer = BitWriter::new();
        writer.write_bytes(
            &PsiHeader::new()
                .with_table_id(0x00)
                .with_syntax_indicator(true)
                .with_reserved(0b11)
                .with_section_length((5 + body_len + 4) as u16)
                .into_bytes(),
        );
        writer.write_bytes(&write_syntax(self.ts_id, self.version, self.current_next));
        for program in &self.programs {
            writer.write_bytes(
                &PatEntry::new()
                    .with_program_num(program.program_number)
                    .with_reserved(0b111)
                    .with_program_map_pid(program.program_map_id)
                    .into_bytes(),
            );
        }
        finish_section(writer.finish())
    }
}

impl Pmt {
    /// Serializes this table back into full section bytes, CRC included.
    ///
    /// Descriptors are re-emitted from their retained wire bytes, so a
    /// parsed table round-trips exactly. The section is written as number
    /// 0 of 0.
    pub fn write_section(&self) -> Vec<u8> {
        let program_info_length = descriptors_wire_len(&self.program_descriptors);
        let es_len: usize = self
            .elementary_streams
            .iter()
            .map(|es| 5 + descriptors_wire_len(&es.descriptors))
            .sum();
        let body_len = 4 + program_info_length + es_len;
        let mut writer = BitWriter::new();
        writer.write_bytes(
            &PsiHeader::new()
                .with_table_id(0x02)
                .with_syntax_indicator(true)
                .with_reserved(0b11)
                .with_section_length((5 + body_len + 4) as u16)
                .into_bytes(),
        );
        writer.write_bytes(&write_syntax(
            self.program_number,
            self.version,
            self.current_next,
        ));
        writer.write_bytes(
            &PmtHeader::new()
                .with_reserved(0b111)
                .with_pcr_pid(self.pcr_pid)
                .with_reserved2(0b1111)
                .with_program_info_length(program_info_length as u16)
                .into_bytes(),
        );
        for descriptor in &self.program_descriptors {
            descriptor.serialize(&mut writer);
        }
        for es in &self.elementary_streams {
            writer.write_bytes(
                &EsInfoHeader::new()
                    .with_stream_type(es.stream_type)
                    .with_reserved(0b111)
                    .with_elementary_pid(es.pid)
                    .with_reserved2(0b1111)
                    .with_es_info_length(descriptors_wire_len(&es.descriptors) as u16)
                    .into_bytes(),
            );
            for descriptor in &es.descriptors {
                descriptor.serialize(&mut writer);
            }
        }
        finish_section(writer.finish())
    }
}

fn write_syntax(table_id_extension: u16, version: u8, current_next: bool) -> [u8; 5] {
    PsiSyntax::new()
        .with_table_id_extension(table_id_extension)
        .with_reserved(0b11)
        .with_version(version)
        .with_current_next(current_next)
        .with_section_number(0)
        .with_last_section_number(0)
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvb::DescriptorBody;

    fn pat() -> Pat {
        Pat {
            ts_id: 1,
            version: 3,
            current_next: true,
            programs: vec![
                PatProgram {
                    program_number: 0,
                    program_map_id: 0x0010,
                },
                PatProgram {
                    program_number: 2,
                    program_map_id: 0x1000,
                },
            ],
        }
    }

    fn pointer_prefixed(section: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8];
        payload.extend_from_slice(section);
        payload
    }

    #[test]
    fn pat_section_round_trip() {
        let section = pat().write_section();
        let sections = parse_sections(&pointer_prefixed(&section)).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].payload, PsiPayload::Pat(pat()));
        assert!(sections[0].crc32.is_some());
    }

    #[test]
    fn pmt_section_round_trip() {
        let pmt = Pmt {
            program_number: 2,
            version: 1,
            current_next: true,
            pcr_pid: 0x0100,
            program_descriptors: vec![],
            elementary_streams: vec![ElementaryStream {
                pid: 0x0101,
                stream_type: 0x1b,
                descriptors: vec![],
            }],
        };
        let mut payload = pointer_prefixed(&pmt.write_section());
        payload.extend_from_slice(&[0xff; 7]);
        let sections = parse_sections(&payload).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].payload, PsiPayload::Pmt(pmt));
    }

    #[test]
    fn pmt_descriptors_survive_round_trip() {
        let mut reader = SliceReader::new(&[0x52, 0x01, 0x42]);
        let descriptors = parse_descriptors_to_end(&mut reader).unwrap();
        let pmt = Pmt {
            program_number: 7,
            version: 0,
            current_next: true,
            pcr_pid: 0x07d0,
            program_descriptors: descriptors.clone(),
            elementary_streams: vec![ElementaryStream {
                pid: 0x07d1,
                stream_type: 0x06,
                descriptors,
            }],
        };
        let sections = parse_sections(&pointer_prefixed(&pmt.write_section())).unwrap();
        match &sections[0].payload {
            PsiPayload::Pmt(parsed) => {
                assert_eq!(parsed, &pmt);
                assert_eq!(
                    parsed.elementary_streams[0].descriptors[0].body,
                    DescriptorBody::StreamIdentifier(0x42)
                );
            }
            other => panic!("wrong payload: {:?}", other),
        }
    }

    #[test]
    fn corrupted_section_fails_crc() {
        let mut section = pat().write_section();
        section[9] ^= 0x01;
        assert!(matches!(
            parse_sections(&pointer_prefixed(&section)),
            Err(DemuxError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn concatenated_sections_all_parse() {
        let mut payload = vec![0u8];
        payload.extend_from_slice(&pat().write_section());
        payload.extend_from_slice(&pat().write_section());
        payload.extend_from_slice(&[0xff; 10]);
        let sections = parse_sections(&payload).unwrap();
        assert_eq!(sections.len(), 2);
    }

    #[test]
    fn oversized_section_length_is_rejected() {
        let header = PsiHeader::new()
            .with_table_id(0x00)
            .with_syntax_indicator(true)
            .with_reserved(0b11)
            .with_section_length(1022)
            .into_bytes();
        let mut payload = vec![0u8];
        payload.extend_from_slice(&header);
        assert!(matches!(
            parse_sections(&payload),
            Err(DemuxError::InvalidSectionLength(1022))
        ));
    }

    #[test]
    fn unknown_table_id_is_skipped() {
        let mut payload = vec![0u8, 0x3f, 0x00, 0x02, 0xab, 0xcd];
        payload.extend_from_slice(&[0xff; 4]);
        let sections = parse_sections(&payload).unwrap();
        assert!(sections.is_empty());
    }

    #[test]
    fn tot_section_carries_time_and_descriptors() {
        use chrono::{TimeZone, Utc};
        let mut section = vec![0x73, 0x70, 0x00];
        let mut body = vec![0xb0, 0xa2, 0x12, 0x34, 0x56];
        body.extend_from_slice(&0xf000u16.to_be_bytes()); // empty loop
        section[2] = (body.len() + 4) as u8;
        section.extend_from_slice(&body);
        let crc = CRC.checksum(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        let sections = parse_sections(&pointer_prefixed(&section)).unwrap();
        match &sections[0].payload {
            PsiPayload::Tot(tot) => {
                assert_eq!(
                    tot.utc_time,
                    Utc.with_ymd_and_hms(1982, 9, 6, 12, 34, 56).unwrap()
                );
                assert!(tot.descriptors.is_empty());
            }
            other => panic!("wrong payload: {:?}", other),
        }
        assert!(sections[0].syntax.is_none());
    }

    #[test]
    fn tdt_section_has_no_crc() {
        // table 0x70, section_length 5, MJD 45218 12:34:56
        let payload = vec![0u8, 0x70, 0x70, 0x05, 0xb0, 0xa2, 0x12, 0x34, 0x56];
        let sections = parse_sections(&payload).unwrap();
        assert_eq!(sections.len(), 1);
        assert!(sections[0].crc32.is_none());
        assert!(matches!(sections[0].payload, PsiPayload::Tdt(_)));
    }
}
