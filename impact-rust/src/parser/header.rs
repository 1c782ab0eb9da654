use byteorder::{BigEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use std::io::{Cursor, Read};
use thiserror::Error;

/// Size of the fixed section of data header.
pub const FIXED_HEADER_LEN: usize = 48;
pub const DEFAULT_RECORD_LEN: usize = 512;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid BTIME: {0}")]
    InvalidBTime(String),
    #[error("Not a data record (indicator {0:?})")]
    NotData(char),
    #[error("Invalid record length exponent {0}")]
    InvalidRecordLength(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedHeader {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub start_time: DateTime<Utc>,
    pub num_samples: u16,
    pub sample_rate_factor: i16,
    pub sample_rate_multiplier: i16,
    pub data_offset: u16,
    pub encoding: u8,
    /// Word order of the data payload from blockette 1000.
    pub big_endian: bool,
    pub record_size: usize,
}

fn read_field<const N: usize>(rdr: &mut Cursor<&[u8]>) -> Result<String, HeaderError> {
    let mut bytes = [0u8; N];
    rdr.read_exact(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes)
        .trim_end_matches('\u{0}')
        .trim()
        .to_string())
}

impl SeedHeader {
    pub fn parse(data: &[u8]) -> Result<Self, HeaderError> {
        let mut rdr = Cursor::new(data);

        let _sequence = read_field::<6>(&mut rdr)?;
        let indicator = rdr.read_u8()? as char;
        if !matches!(indicator, 'D' | 'R' | 'Q' | 'M') {
            return Err(HeaderError::NotData(indicator));
        }
        let _reserved = rdr.read_u8()?;

        let station = read_field::<5>(&mut rdr)?;
        let location = read_field::<2>(&mut rdr)?;
        let channel = read_field::<3>(&mut rdr)?;
        let network = read_field::<2>(&mut rdr)?;

        let year = rdr.read_u16::<BigEndian>()?;
        let day = rdr.read_u16::<BigEndian>()?;
        let hour = rdr.read_u8()?;
        let minute = rdr.read_u8()?;
        let second = rdr.read_u8()?;
        let _unused = rdr.read_u8()?;
        let ticks = rdr.read_u16::<BigEndian>()?;
        let start_time = btime_to_datetime(year, day, hour, minute, second, ticks)?;

        let num_samples = rdr.read_u16::<BigEndian>()?;
        let sample_rate_factor = rdr.read_i16::<BigEndian>()?;
        let sample_rate_multiplier = rdr.read_i16::<BigEndian>()?;

        let _activity_flags = rdr.read_u8()?;
        let _io_flags = rdr.read_u8()?;
        let _quality_flags = rdr.read_u8()?;
        let _num_blockettes = rdr.read_u8()?;
        let _time_correction = rdr.read_i32::<BigEndian>()?;
        let data_offset = rdr.read_u16::<BigEndian>()?;
        let blockette_offset = rdr.read_u16::<BigEndian>()?;

        // Without blockette 1000 assume Steim2, big endian, 512 byte records.
        let mut encoding = 11;
        let mut big_endian = true;
        let mut record_size = DEFAULT_RECORD_LEN;
        let mut offset = blockette_offset as usize;
        let mut hops = 0;

        while offset >= FIXED_HEADER_LEN && offset + 4 <= data.len() && hops < 16 {
            let mut blkt = Cursor::new(&data[offset..]);
            let kind = blkt.read_u16::<BigEndian>()?;
            let next = blkt.read_u16::<BigEndian>()? as usize;

            if kind == 1000 && offset + 7 <= data.len() {
                encoding = data[offset + 4];
                big_endian = data[offset + 5] != 0;
                let exponent = data[offset + 6];
                if !(7..=20).contains(&exponent) {
                    return Err(HeaderError::InvalidRecordLength(exponent));
                }
                record_size = 1 << exponent;
                break;
            }

            if next <= offset {
                break;
            }
            offset = next;
            hops += 1;
        }

        Ok(Self {
            network,
            station,
            location,
            channel,
            start_time,
            num_samples,
            sample_rate_factor,
            sample_rate_multiplier,
            data_offset,
            encoding,
            big_endian,
            record_size,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        let factor = self.sample_rate_factor as f64;
        let multiplier = self.sample_rate_multiplier as f64;

        if factor > 0.0 && multiplier > 0.0 {
            factor * multiplier
        } else if factor > 0.0 && multiplier < 0.0 {
            -factor / multiplier
        } else if factor < 0.0 && multiplier > 0.0 {
            -multiplier / factor
        } else if factor < 0.0 && multiplier < 0.0 {
            1.0 / (factor * multiplier)
        } else {
            0.0
        }
    }
}

fn btime_to_datetime(
    year: u16,
    day: u16,
    hour: u8,
    minute: u8,
    second: u8,
    ticks: u16,
) -> Result<DateTime<Utc>, HeaderError> {
    if !(1..=366).contains(&day) || hour > 23 || minute > 59 || second > 60 || ticks > 9999 {
        return Err(HeaderError::InvalidBTime(format!(
            "{}.{:03} {:02}:{:02}:{:02}.{:04}",
            year, day, hour, minute, second, ticks
        )));
    }

    // Leap seconds (60) are folded into the next minute.
    let base = Utc
        .with_ymd_and_hms(year as i32, 1, 1, hour as u32, minute as u32, 0)
        .single()
        .ok_or_else(|| HeaderError::InvalidBTime(format!("year {}", year)))?;

    Ok(base
        + chrono::Duration::days(day as i64 - 1)
        + chrono::Duration::seconds(second as i64)
        + chrono::Duration::microseconds(ticks as i64 * 100))
}
