//! DVB descriptor parsing.
//!
//! Descriptors are tag/length/value triplets carried inside PSI table
//! bodies. Well-known tags decode into typed bodies; unknown tags are kept
//! raw and logged. Every descriptor also retains its original body bytes
//! so callers can reproduce the exact wire form.

use super::time::{parse_dvb_offset, parse_dvb_time};
use crate::{BitReader, BitWriter, DemuxError, Result, SliceReader};
use chrono::{DateTime, Utc};
use log::warn;
use smallvec::SmallVec;
use std::time::Duration;

/// One parsed descriptor with its original body bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    /// Descriptor tag.
    pub tag: u8,
    /// Declared body length in bytes.
    pub length: u8,
    /// Original body bytes, kept for bit-exact round trips.
    pub raw: SmallVec<[u8; 8]>,
    /// Decoded body, [`DescriptorBody::Unknown`] for unhandled tags.
    pub body: DescriptorBody,
}

/// ISO 639 language loop entry of an 0x0A descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageEntry {
    /// ISO 639-2 language code.
    pub language: [u8; 3],
    /// Audio type (clean effects, hearing impaired, ...).
    pub audio_type: u8,
}

/// Teletext loop entry of an 0x56 descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TeletextPage {
    /// ISO 639-2 language code.
    pub language: [u8; 3],
    /// 5-bit teletext type (initial page, subtitles, ...).
    pub teletext_type: u8,
    /// 3-bit magazine number.
    pub magazine: u8,
    /// Page number, BCD-coded.
    pub page: u8,
}

/// Subtitling loop entry of an 0x59 descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitlingEntry {
    /// ISO 639-2 language code.
    pub language: [u8; 3],
    /// DVB subtitling type.
    pub subtitling_type: u8,
    /// Composition page id.
    pub composition_page_id: u16,
    /// Ancillary page id.
    pub ancillary_page_id: u16,
}

/// Parental rating loop entry of an 0x55 descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentalRatingEntry {
    /// ISO 3166 country code.
    pub country_code: [u8; 3],
    /// Raw rating value.
    pub rating: u8,
}

impl ParentalRatingEntry {
    /// Minimum recommended age, when the rating encodes one.
    pub fn minimum_age(&self) -> Option<u8> {
        match self.rating {
            0x01..=0x0f => Some(self.rating + 3),
            _ => None,
        }
    }
}

/// Item of an extended event descriptor (0x4E).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedEventItem {
    /// Item description, e.g. "Director".
    pub description: Vec<u8>,
    /// Item content, e.g. a name.
    pub content: Vec<u8>,
}

/// Local time offset loop entry of an 0x58 descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTimeOffsetEntry {
    /// ISO 3166 country code.
    pub country_code: [u8; 3],
    /// 6-bit region within the country.
    pub country_region_id: u8,
    /// Offset polarity; `true` means west of UTC.
    pub polarity: bool,
    /// Current offset from UTC.
    pub local_time_offset: Duration,
    /// When the next offset takes effect.
    pub time_of_change: DateTime<Utc>,
    /// Offset after the change.
    pub next_time_offset: Duration,
}

/// VBI line entry of an 0x45 descriptor service.
#[derive(Debug, Clone, PartialEq)]
pub struct VbiLine {
    /// Field parity; `true` for the first field.
    pub field_parity: bool,
    /// 5-bit line offset.
    pub line_offset: u8,
}

/// Service loop entry of a VBI data descriptor (0x45).
#[derive(Debug, Clone, PartialEq)]
pub struct VbiDataService {
    /// Data service id (EBU teletext, VPS, WSS, closed captioning, ...).
    pub data_service_id: u8,
    /// Field/line entries for services that describe lines.
    pub lines: Vec<VbiLine>,
    /// Raw bytes of services with reserved layouts.
    pub reserved: Vec<u8>,
}

/// Decoded descriptor bodies for well-known tags.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorBody {
    /// Registration descriptor (0x05).
    Registration {
        /// Format identifier registered with the SMPTE RA.
        format_identifier: u32,
        /// Additional identification info.
        additional_identification: Vec<u8>,
    },
    /// Data stream alignment descriptor (0x06).
    DataStreamAlignment(u8),
    /// ISO 639 language descriptor (0x0A).
    Iso639Language(Vec<LanguageEntry>),
    /// Maximum bitrate descriptor (0x0E); units of 50 bytes per second.
    MaximumBitrate(u32),
    /// Network name descriptor (0x40).
    NetworkName(Vec<u8>),
    /// VBI data descriptor (0x45).
    VbiData(Vec<VbiDataService>),
    /// Service descriptor (0x48).
    Service {
        /// DVB service type.
        service_type: u8,
        /// Service provider name.
        provider_name: Vec<u8>,
        /// Service name.
        service_name: Vec<u8>,
    },
    /// Short event descriptor (0x4D).
    ShortEvent {
        /// ISO 639-2 language code.
        language: [u8; 3],
        /// Event name.
        event_name: Vec<u8>,
        /// Short description.
        text: Vec<u8>,
    },
    /// Extended event descriptor (0x4E).
    ExtendedEvent {
        /// Position of this descriptor in its chain.
        number: u8,
        /// Last descriptor number of the chain.
        last_number: u8,
        /// ISO 639-2 language code.
        language: [u8; 3],
        /// Itemized description entries.
        items: Vec<ExtendedEventItem>,
        /// Free text.
        text: Vec<u8>,
    },
    /// Component descriptor (0x50).
    Component {
        /// 4-bit stream content extension.
        stream_content_ext: u8,
        /// 4-bit stream content.
        stream_content: u8,
        /// Component type within the stream content.
        component_type: u8,
        /// Tag linking to a stream identifier descriptor.
        component_tag: u8,
        /// ISO 639-2 language code.
        language: [u8; 3],
        /// Component description.
        text: Vec<u8>,
    },
    /// Stream identifier descriptor (0x52); the component tag.
    StreamIdentifier(u8),
    /// Parental rating descriptor (0x55).
    ParentalRating(Vec<ParentalRatingEntry>),
    /// Teletext descriptor (0x56).
    Teletext(Vec<TeletextPage>),
    /// Local time offset descriptor (0x58).
    LocalTimeOffset(Vec<LocalTimeOffsetEntry>),
    /// Subtitling descriptor (0x59).
    Subtitling(Vec<SubtitlingEntry>),
    /// Private data specifier descriptor (0x5F).
    PrivateDataSpecifier(u32),
    /// AC-3 descriptor (0x6A).
    Ac3 {
        /// AC-3 component type.
        component_type: Option<u8>,
        /// Bit stream identifier.
        bsid: Option<u8>,
        /// Main audio service id.
        mainid: Option<u8>,
        /// Associated service tag.
        asvc: Option<u8>,
        /// Additional info bytes.
        additional_info: Vec<u8>,
    },
    /// Unhandled tag; the body lives in [`Descriptor::raw`].
    Unknown,
}

impl Descriptor {
    /// Reads one tag/length/value triplet and decodes known bodies.
    pub fn parse(reader: &mut SliceReader) -> Result<Self> {
        let tag = reader.read_u8()?;
        let length = reader.read_u8()?;
        let raw_bytes = reader.read(length as usize)?;
        let body = DescriptorBody::decode(tag, raw_bytes)?;
        Ok(Self {
            tag,
            length,
            raw: SmallVec::from_slice(raw_bytes),
            body,
        })
    }

    /// Bytes this descriptor occupies on the wire, tag and length
    /// included.
    pub fn wire_len(&self) -> usize {
        2 + self.raw.len()
    }

    pub(crate) fn serialize(&self, writer: &mut BitWriter) {
        writer.write_u8(self.tag);
        writer.write_u8(self.raw.len() as u8);
        writer.write_bytes(&self.raw);
    }
}

fn read_text(reader: &mut SliceReader) -> Result<Vec<u8>> {
    let length = reader.read_u8()? as usize;
    Ok(reader.read(length)?.to_vec())
}

impl DescriptorBody {
    fn decode(tag: u8, bytes: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(bytes);
        Ok(match tag {
            // Registration
            0x05 => DescriptorBody::Registration {
                format_identifier: reader.read_be_u32()?,
                additional_identification: reader.read_to_end()?.to_vec(),
            },
            // Data stream alignment
            0x06 => DescriptorBody::DataStreamAlignment(reader.read_u8()?),
            // ISO 639 language
            0x0a => {
                let mut entries = Vec::new();
                while reader.remaining_len() >= 4 {
                    entries.push(LanguageEntry {
                        language: reader.read_array()?,
                        audio_type: reader.read_u8()?,
                    });
                }
                DescriptorBody::Iso639Language(entries)
            }
            // Maximum bitrate
            0x0e => {
                let mut bits = BitReader::new(reader.read(3)?);
                bits.skip_bits(2)?;
                DescriptorBody::MaximumBitrate(bits.read_bits(22)? as u32)
            }
            // Network name
            0x40 => DescriptorBody::NetworkName(reader.read_to_end()?.to_vec()),
            // VBI data
            0x45 => {
                let mut services = Vec::new();
                while reader.remaining_len() >= 2 {
                    let data_service_id = reader.read_u8()?;
                    let length = reader.read_u8()? as usize;
                    let mut s_reader = reader.sub_reader(length)?;
                    let mut service = VbiDataService {
                        data_service_id,
                        lines: Vec::new(),
                        reserved: Vec::new(),
                    };
                    match data_service_id {
                        0x01 | 0x02 | 0x04..=0x07 => {
                            while s_reader.remaining_len() > 0 {
                                let mut bits = BitReader::new(s_reader.read(1)?);
                                bits.skip_bits(2)?;
                                service.lines.push(VbiLine {
                                    field_parity: bits.read_bit()?,
                                    line_offset: bits.read_bits(5)? as u8,
                                });
                            }
                        }
                        _ => service.reserved = s_reader.read_to_end()?.to_vec(),
                    }
                    services.push(service);
                }
                DescriptorBody::VbiData(services)
            }
            // Service
            0x48 => {
                let service_type = reader.read_u8()?;
                DescriptorBody::Service {
                    service_type,
                    provider_name: read_text(&mut reader)?,
                    service_name: read_text(&mut reader)?,
                }
            }
            // Short event
            0x4d => DescriptorBody::ShortEvent {
                language: reader.read_array()?,
                event_name: read_text(&mut reader)?,
                text: read_text(&mut reader)?,
            },
            // Extended event
            0x4e => {
                let mut bits = BitReader::new(reader.read(1)?);
                let number = bits.read_bits(4)? as u8;
                let last_number = bits.read_bits(4)? as u8;
                let language = reader.read_array()?;
                let items_length = reader.read_u8()? as usize;
                let mut i_reader = reader.sub_reader(items_length)?;
                let mut items = Vec::new();
                while i_reader.remaining_len() > 0 {
                    items.push(ExtendedEventItem {
                        description: read_text(&mut i_reader)?,
                        content: read_text(&mut i_reader)?,
                    });
                }
                DescriptorBody::ExtendedEvent {
                    number,
                    last_number,
                    language,
                    items,
                    text: read_text(&mut reader)?,
                }
            }
            // Component
            0x50 => {
                let mut bits = BitReader::new(reader.read(1)?);
                DescriptorBody::Component {
                    stream_content_ext: bits.read_bits(4)? as u8,
                    stream_content: bits.read_bits(4)? as u8,
                    component_type: reader.read_u8()?,
                    component_tag: reader.read_u8()?,
                    language: reader.read_array()?,
                    text: reader.read_to_end()?.to_vec(),
                }
            }
            // Stream identifier
            0x52 => DescriptorBody::StreamIdentifier(reader.read_u8()?),
            // Parental rating
            0x55 => {
                let mut entries = Vec::new();
                while reader.remaining_len() >= 4 {
                    entries.push(ParentalRatingEntry {
                        country_code: reader.read_array()?,
                        rating: reader.read_u8()?,
                    });
                }
                DescriptorBody::ParentalRating(entries)
            }
            // Teletext
            0x56 => {
                let mut pages = Vec::new();
                while reader.remaining_len() >= 5 {
                    let language = reader.read_array()?;
                    let mut bits = BitReader::new(reader.read(1)?);
                    pages.push(TeletextPage {
                        language,
                        teletext_type: bits.read_bits(5)? as u8,
                        magazine: bits.read_bits(3)? as u8,
                        page: reader.read_u8()?,
                    });
                }
                DescriptorBody::Teletext(pages)
            }
            // Local time offset
            0x58 => {
                let mut entries = Vec::new();
                while reader.remaining_len() >= 13 {
                    let country_code = reader.read_array()?;
                    let mut bits = BitReader::new(reader.read(1)?);
                    let country_region_id = bits.read_bits(6)? as u8;
                    bits.skip_bits(1)?;
                    let polarity = bits.read_bit()?;
                    entries.push(LocalTimeOffsetEntry {
                        country_code,
                        country_region_id,
                        polarity,
                        local_time_offset: parse_dvb_offset(&mut reader)?,
                        time_of_change: parse_dvb_time(&mut reader)?,
                        next_time_offset: parse_dvb_offset(&mut reader)?,
                    });
                }
                DescriptorBody::LocalTimeOffset(entries)
            }
            // Subtitling
            0x59 => {
                let mut entries = Vec::new();
                while reader.remaining_len() >= 8 {
                    entries.push(SubtitlingEntry {
                        language: reader.read_array()?,
                        subtitling_type: reader.read_u8()?,
                        composition_page_id: reader.read_be_u16()?,
                        ancillary_page_id: reader.read_be_u16()?,
                    });
                }
                DescriptorBody::Subtitling(entries)
            }
            // Private data specifier
            0x5f => DescriptorBody::PrivateDataSpecifier(reader.read_be_u32()?),
            // AC-3
            0x6a => {
                let mut bits = BitReader::new(reader.read(1)?);
                let has_component_type = bits.read_bit()?;
                let has_bsid = bits.read_bit()?;
                let has_mainid = bits.read_bit()?;
                let has_asvc = bits.read_bit()?;
                let component_type = if has_component_type {
                    Some(reader.read_u8()?)
                } else {
                    None
                };
                let bsid = if has_bsid { Some(reader.read_u8()?) } else { None };
                let mainid = if has_mainid { Some(reader.read_u8()?) } else { None };
                let asvc = if has_asvc { Some(reader.read_u8()?) } else { None };
                DescriptorBody::Ac3 {
                    component_type,
                    bsid,
                    mainid,
                    asvc,
                    additional_info: reader.read_to_end()?.to_vec(),
                }
            }
            _ => {
                warn!("Unknown descriptor tag {:#04x}; keeping raw body", tag);
                DescriptorBody::Unknown
            }
        })
    }
}

/// Parses `length` bytes of consecutive descriptors.
pub(crate) fn parse_descriptors(reader: &mut SliceReader, length: usize) -> Result<Vec<Descriptor>> {
    let mut d_reader = reader.sub_reader(length)?;
    parse_descriptors_to_end(&mut d_reader)
}

/// Parses a 12-bit-length-prefixed descriptor loop.
pub(crate) fn parse_descriptor_list(reader: &mut SliceReader) -> Result<Vec<Descriptor>> {
    let length = (reader.read_be_u16()? & 0x0fff) as usize;
    parse_descriptors(reader, length)
}

/// Parses descriptors until the reader is exhausted.
pub(crate) fn parse_descriptors_to_end(reader: &mut SliceReader) -> Result<Vec<Descriptor>> {
    let mut descriptors = Vec::new();
    while reader.remaining_len() > 0 {
        descriptors.push(Descriptor::parse(reader)?);
    }
    Ok(descriptors)
}

/// Total wire length of a descriptor slice.
pub(crate) fn descriptors_wire_len(descriptors: &[Descriptor]) -> usize {
    descriptors.iter().map(Descriptor::wire_len).sum()
}
