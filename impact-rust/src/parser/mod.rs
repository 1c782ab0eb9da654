pub mod header;
pub mod steim;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{ImpactError, Result};
use crate::message::{SampleBlock, channel_label, source_key};
use header::{DEFAULT_RECORD_LEN, SeedHeader};
use steim::SteimDecoder;

/// Decode one miniSEED record into a sample block.
pub fn decode_record(data: &[u8]) -> Result<SampleBlock> {
    let header = SeedHeader::parse(data)?;

    let end = header.record_size.min(data.len());
    let start = header.data_offset as usize;
    let num_samples = header.num_samples as usize;

    let samples = if num_samples == 0 {
        Vec::new()
    } else {
        if start < header::FIXED_HEADER_LEN || start >= end {
            return Err(ImpactError::Decode(format!(
                "data offset {} outside record of {} bytes",
                start, end
            )));
        }
        let payload = &data[start..end];
        match header.encoding {
            1 => decode_int16(payload, num_samples, header.big_endian)?,
            3 => decode_int32(payload, num_samples, header.big_endian)?,
            10 => SteimDecoder::decode_steim1(payload, num_samples)?,
            11 => SteimDecoder::decode_steim2(payload, num_samples)?,
            other => {
                return Err(ImpactError::Decode(format!("unsupported encoding {}", other)));
            }
        }
    };

    Ok(SampleBlock {
        source_key: source_key(&header.network, &header.station, &header.location, &header.channel),
        channel_label: channel_label(&header.network, &header.station),
        start_time: header.start_time,
        sample_rate: header.sample_rate(),
        samples,
    })
}

/// Length of the record at the start of `data`, falling back to 512 bytes
/// when the header cannot be read.
pub fn record_length(data: &[u8]) -> usize {
    SeedHeader::parse(data)
        .map(|h| h.record_size)
        .unwrap_or(DEFAULT_RECORD_LEN)
}

/// Split a buffer holding back-to-back records into individual records.
pub fn split_records(data: &[u8]) -> Vec<&[u8]> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let len = record_length(&data[offset..]);
        let end = (offset + len).min(data.len());
        records.push(&data[offset..end]);
        offset = end;
    }
    records
}

fn decode_int16(payload: &[u8], num_samples: usize, big_endian: bool) -> Result<Vec<i32>> {
    if payload.len() < num_samples * 2 {
        return Err(ImpactError::Decode(format!(
            "INT16 payload holds {} bytes, need {}",
            payload.len(),
            num_samples * 2
        )));
    }
    Ok(payload
        .chunks_exact(2)
        .take(num_samples)
        .map(|b| {
            if big_endian {
                BigEndian::read_i16(b) as i32
            } else {
                LittleEndian::read_i16(b) as i32
            }
        })
        .collect())
}

fn decode_int32(payload: &[u8], num_samples: usize, big_endian: bool) -> Result<Vec<i32>> {
    if payload.len() < num_samples * 4 {
        return Err(ImpactError::Decode(format!(
            "INT32 payload holds {} bytes, need {}",
            payload.len(),
            num_samples * 4
        )));
    }
    Ok(payload
        .chunks_exact(4)
        .take(num_samples)
        .map(|b| {
            if big_endian {
                BigEndian::read_i32(b)
            } else {
                LittleEndian::read_i32(b)
            }
        })
        .collect())
}
