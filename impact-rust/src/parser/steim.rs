use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

const FRAME_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum SteimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid Steim code: {0}")]
    InvalidSteimCode(u8),
    #[error("Steim payload too short: need at least one frame, got {0} bytes")]
    TooShort(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavour {
    Steim1,
    Steim2,
}

pub struct SteimDecoder;

impl SteimDecoder {
    pub fn decode_steim1(data: &[u8], num_samples: usize) -> Result<Vec<i32>, SteimError> {
        decode(data, num_samples, Flavour::Steim1)
    }

    pub fn decode_steim2(data: &[u8], num_samples: usize) -> Result<Vec<i32>, SteimError> {
        decode(data, num_samples, Flavour::Steim2)
    }
}

fn decode(data: &[u8], num_samples: usize, flavour: Flavour) -> Result<Vec<i32>, SteimError> {
    if num_samples == 0 {
        return Ok(Vec::new());
    }
    if data.len() < FRAME_LEN {
        return Err(SteimError::TooShort(data.len()));
    }

    let mut diffs = Vec::with_capacity(num_samples + 8);
    let mut x0 = 0;
    let mut xn = 0;

    'frames: for (frame_idx, frame) in data.chunks_exact(FRAME_LEN).enumerate() {
        let mut rdr = Cursor::new(frame);
        let ctrl = rdr.read_u32::<BigEndian>()?;

        for i in 1..16 {
            let nibble = ((ctrl >> (30 - i * 2)) & 0x03) as u8;
            let word = rdr.read_u32::<BigEndian>()?;

            if frame_idx == 0 && i == 1 {
                x0 = word as i32;
                continue;
            }
            if frame_idx == 0 && i == 2 {
                xn = word as i32;
                continue;
            }

            match (flavour, nibble) {
                (_, 0) => {}
                (_, 1) => {
                    for shift in [24, 16, 8, 0] {
                        diffs.push(extract_bits(word, shift, 8));
                    }
                }
                (Flavour::Steim1, 2) => {
                    diffs.push(extract_bits(word, 16, 16));
                    diffs.push(extract_bits(word, 0, 16));
                }
                (Flavour::Steim1, 3) => diffs.push(word as i32),
                (Flavour::Steim2, 2) => match (word >> 30) & 0x03 {
                    1 => diffs.push(extract_bits(word, 0, 30)),
                    2 => {
                        diffs.push(extract_bits(word, 15, 15));
                        diffs.push(extract_bits(word, 0, 15));
                    }
                    3 => {
                        for shift in [20, 10, 0] {
                            diffs.push(extract_bits(word, shift, 10));
                        }
                    }
                    dnib => return Err(SteimError::InvalidSteimCode(dnib as u8)),
                },
                (Flavour::Steim2, 3) => match (word >> 30) & 0x03 {
                    0 => {
                        for shift in [24, 18, 12, 6, 0] {
                            diffs.push(extract_bits(word, shift, 6));
                        }
                    }
                    1 => {
                        for shift in [25, 20, 15, 10, 5, 0] {
                            diffs.push(extract_bits(word, shift, 5));
                        }
                    }
                    2 => {
                        for shift in [24, 20, 16, 12, 8, 4, 0] {
                            diffs.push(extract_bits(word, shift, 4));
                        }
                    }
                    dnib => return Err(SteimError::InvalidSteimCode(dnib as u8)),
                },
                (_, code) => return Err(SteimError::InvalidSteimCode(code)),
            }

            if diffs.len() >= num_samples {
                break 'frames;
            }
        }
    }

    // The first difference links to the previous record, so it is skipped.
    let mut samples = Vec::with_capacity(num_samples);
    samples.push(x0);
    let mut current = x0;
    for &d in diffs.iter().skip(1).take(num_samples - 1) {
        current = current.wrapping_add(d);
        samples.push(current);
    }

    if samples.len() == num_samples && current != xn {
        debug!("Steim reverse integration mismatch: expected {}, got {}", xn, current);
    }
    Ok(samples)
}

fn extract_bits(word: u32, shift: u32, bits: u32) -> i32 {
    let mask = (1u32 << bits) - 1;
    let val = (word >> shift) & mask;
    let sign_bit = 1u32 << (bits - 1);
    if val & sign_bit != 0 {
        (val | !mask) as i32
    } else {
        val as i32
    }
}
