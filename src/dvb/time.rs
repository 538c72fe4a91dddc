//! DVB time and duration codecs (ETSI EN 300 468 Annex C).
//!
//! Wall-clock values are 40 bits on the wire: a 16-bit Modified Julian
//! Date followed by six BCD digits of hours, minutes and seconds.
//! Durations are plain BCD, either hh:mm:ss (24 bits) or hh:mm (16 bits).

use crate::{DemuxError, Result, SliceReader};
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

fn bcd(byte: u8) -> u32 {
    ((byte >> 4) * 10 + (byte & 0x0f)) as u32
}

/// Decodes a 40-bit MJD + BCD wall-clock value.
///
/// Uses the conversion of EN 300 468 Annex C; out-of-range BCD digits
/// surface as [`DemuxError::InvalidDvbTime`].
pub fn parse_dvb_time(reader: &mut SliceReader) -> Result<DateTime<Utc>> {
    let mjd = reader.read_be_u16()? as f64;
    let yt = ((mjd - 15078.2) / 365.25).floor();
    let mt = ((mjd - 14956.1 - (yt * 365.25).floor()) / 30.6001).floor();
    let day = mjd - 14956.0 - (yt * 365.25).floor() - (mt * 30.6001).floor();
    let k = if mt == 14.0 || mt == 15.0 { 1.0 } else { 0.0 };
    let year = 1900.0 + yt + k;
    let month = mt - 1.0 - k * 12.0;

    let hour = bcd(reader.read_u8()?);
    let minute = bcd(reader.read_u8()?);
    let second = bcd(reader.read_u8()?);

    Utc.with_ymd_and_hms(
        year as i32,
        month as u32,
        day as u32,
        hour,
        minute,
        second,
    )
    .single()
    .ok_or(DemuxError::InvalidDvbTime)
}

/// Decodes a 24-bit BCD hh:mm:ss duration.
pub fn parse_dvb_duration(reader: &mut SliceReader) -> Result<Duration> {
    let hours = bcd(reader.read_u8()?) as u64;
    let minutes = bcd(reader.read_u8()?) as u64;
    let seconds = bcd(reader.read_u8()?) as u64;
    if minutes > 59 || seconds > 59 {
        return Err(DemuxError::InvalidDvbTime);
    }
    Ok(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

/// Decodes a 16-bit BCD hh:mm offset, as used by local time offset
/// descriptors.
pub fn parse_dvb_offset(reader: &mut SliceReader) -> Result<Duration> {
    let hours = bcd(reader.read_u8()?) as u64;
    let minutes = bcd(reader.read_u8()?) as u64;
    if minutes > 59 {
        return Err(DemuxError::InvalidDvbTime);
    }
    Ok(Duration::from_secs(hours * 3600 + minutes * 60))
}
