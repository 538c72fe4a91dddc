//! DVB service information tables and descriptor codecs.
//!
//! Covers the tables of ETSI EN 300 468 that ride on top of the MPEG-2
//! section syntax: NIT, BAT, SDT, EIT, TDT and TOT. The MPEG-defined
//! PAT/PMT/CAT live in [`psi`](crate::psi).

pub mod descriptors;
pub mod time;

pub use descriptors::{
    Descriptor, DescriptorBody, ExtendedEventItem, LanguageEntry, LocalTimeOffsetEntry,
    ParentalRatingEntry, SubtitlingEntry, TeletextPage, VbiDataService, VbiLine,
};
pub use time::{parse_dvb_duration, parse_dvb_offset, parse_dvb_time};

use self::descriptors::{parse_descriptor_list, parse_descriptors};
use crate::{Result, SliceReader};
use chrono::{DateTime, Utc};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::time::Duration;

/// Running status of a service or event (EN 300 468 table 6).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum RunningStatus {
    /// Undefined.
    Undefined = 0,
    /// Not running.
    NotRunning = 1,
    /// Starts in a few seconds.
    StartsSoon = 2,
    /// Pausing.
    Pausing = 3,
    /// Running.
    Running = 4,
    /// Running but off-air.
    OffAir = 5,
    /// Reserved for future use.
    Reserved6 = 6,
    /// Reserved for future use.
    Reserved7 = 7,
}

impl RunningStatus {
    fn from_bits(bits: u8) -> Self {
        // Exhaustive over 3 bits.
        FromPrimitive::from_u8(bits & 0x7).unwrap_or(RunningStatus::Undefined)
    }
}

/// Transport stream entry of a NIT or BAT.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportStream {
    /// Transport stream id.
    pub ts_id: u16,
    /// Original network id.
    pub original_network_id: u16,
    /// Transport descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Network information table.
#[derive(Debug, Clone, PartialEq)]
pub struct Nit {
    /// Network id.
    pub network_id: u16,
    /// Network descriptors.
    pub network_descriptors: Vec<Descriptor>,
    /// Transport streams of the network.
    pub transport_streams: Vec<TransportStream>,
}

/// Bouquet association table. Shares the NIT wire layout with bouquet
/// semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct Bat {
    /// Bouquet id.
    pub bouquet_id: u16,
    /// Bouquet descriptors.
    pub bouquet_descriptors: Vec<Descriptor>,
    /// Transport streams of the bouquet.
    pub transport_streams: Vec<TransportStream>,
}

/// Service entry of an SDT.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    /// Service id.
    pub service_id: u16,
    /// Whether EIT schedule information is present for the service.
    pub has_eit_schedule: bool,
    /// Whether EIT present/following information is present.
    pub has_eit_present_following: bool,
    /// Running status.
    pub running_status: RunningStatus,
    /// Whether access is controlled by a CA system.
    pub has_free_ca_mode: bool,
    /// Service descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Service description table.
#[derive(Debug, Clone, PartialEq)]
pub struct Sdt {
    /// Transport stream id.
    pub ts_id: u16,
    /// Original network id.
    pub original_network_id: u16,
    /// Described services.
    pub services: Vec<Service>,
}

/// Event entry of an EIT.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event id.
    pub event_id: u16,
    /// Event start time, UTC.
    pub start_time: DateTime<Utc>,
    /// Event duration.
    pub duration: Duration,
    /// Running status.
    pub running_status: RunningStatus,
    /// Whether access is controlled by a CA system.
    pub has_free_ca_mode: bool,
    /// Event descriptors.
    pub descriptors: Vec<Descriptor>,
}

/// Event information table.
#[derive(Debug, Clone, PartialEq)]
pub struct Eit {
    /// Service the events belong to.
    pub service_id: u16,
    /// Transport stream id.
    pub ts_id: u16,
    /// Original network id.
    pub original_network_id: u16,
    /// Last section number of this segment.
    pub segment_last_section_number: u8,
    /// Last table id of the schedule chain.
    pub last_table_id: u8,
    /// Described events.
    pub events: Vec<Event>,
}

/// Time and date table; UTC wall clock only, no CRC.
#[derive(Debug, Clone, PartialEq)]
pub struct Tdt {
    /// Current UTC time.
    pub utc_time: DateTime<Utc>,
}

/// Time offset table; UTC wall clock plus offset descriptors.
#[derive(Debug, Clone, PartialEq)]
pub struct Tot {
    /// Current UTC time.
    pub utc_time: DateTime<Utc>,
    /// Offset descriptors, usually one local time offset descriptor.
    pub descriptors: Vec<Descriptor>,
}

fn parse_transport_streams(reader: &mut SliceReader) -> Result<Vec<TransportStream>> {
    let loop_length = (reader.read_be_u16()? & 0x0fff) as usize;
    let mut ts_reader = reader.sub_reader(loop_length)?;
    let mut transport_streams = Vec::new();
    while ts_reader.remaining_len() > 0 {
        transport_streams.push(TransportStream {
            ts_id: ts_reader.read_be_u16()?,
            original_network_id: ts_reader.read_be_u16()?,
            descriptors: parse_descriptor_list(&mut ts_reader)?,
        });
    }
    Ok(transport_streams)
}

pub(crate) fn parse_nit(reader: &mut SliceReader, network_id: u16) -> Result<Nit> {
    Ok(Nit {
        network_id,
        network_descriptors: parse_descriptor_list(reader)?,
        transport_streams: parse_transport_streams(reader)?,
    })
}

pub(crate) fn parse_bat(reader: &mut SliceReader, bouquet_id: u16) -> Result<Bat> {
    Ok(Bat {
        bouquet_id,
        bouquet_descriptors: parse_descriptor_list(reader)?,
        transport_streams: parse_transport_streams(reader)?,
    })
}

pub(crate) fn parse_sdt(reader: &mut SliceReader, ts_id: u16) -> Result<Sdt> {
    let original_network_id = reader.read_be_u16()?;
    reader.skip(1)?;
    let mut services = Vec::new();
    while reader.remaining_len() > 0 {
        let service_id = reader.read_be_u16()?;
        let flags = reader.read_u8()?;
        let word = reader.read_be_u16()?;
        services.push(Service {
            service_id,
            has_eit_schedule: flags & 0x02 != 0,
            has_eit_present_following: flags & 0x01 != 0,
            running_status: RunningStatus::from_bits((word >> 13) as u8),
            has_free_ca_mode: word & 0x1000 != 0,
            descriptors: parse_descriptors(reader, (word & 0x0fff) as usize)?,
        });
    }
    Ok(Sdt {
        ts_id,
        original_network_id,
        services,
    })
}

pub(crate) fn parse_eit(reader: &mut SliceReader, service_id: u16) -> Result<Eit> {
    let ts_id = reader.read_be_u16()?;
    let original_network_id = reader.read_be_u16()?;
    let segment_last_section_number = reader.read_u8()?;
    let last_table_id = reader.read_u8()?;
    let mut events = Vec::new();
    while reader.remaining_len() > 0 {
        let event_id = reader.read_be_u16()?;
        let start_time = parse_dvb_time(reader)?;
        let duration = parse_dvb_duration(reader)?;
        let word = reader.read_be_u16()?;
        events.push(Event {
            event_id,
            start_time,
            duration,
            running_status: RunningStatus::from_bits((word >> 13) as u8),
            has_free_ca_mode: word & 0x1000 != 0,
            descriptors: parse_descriptors(reader, (word & 0x0fff) as usize)?,
        });
    }
    Ok(Eit {
        service_id,
        ts_id,
        original_network_id,
        segment_last_section_number,
        last_table_id,
        events,
    })
}

pub(crate) fn parse_tdt(reader: &mut SliceReader) -> Result<Tdt> {
    Ok(Tdt {
        utc_time: parse_dvb_time(reader)?,
    })
}

pub(crate) fn parse_tot(reader: &mut SliceReader) -> Result<Tot> {
    Ok(Tot {
        utc_time: parse_dvb_time(reader)?,
        descriptors: parse_descriptor_list(reader)?,
    })
}
