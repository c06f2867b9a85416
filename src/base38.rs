//! Base38 encoding used by QR code onboarding payloads.
//!
//! Input is processed in 3 byte little endian chunks, every chunk is emitted as 5 base38 digits
//! (least significant first). Tail of 2 bytes produces 4 digits, tail of 1 byte produces 2 digits.

use crate::error::{CodecError, Result};

const ALPHABET: &[u8; 38] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-.";
const RADIX: u32 = 38;

/// number of base38 characters needed for chunk of n bytes (index is n)
const CHARS_PER_CHUNK: [usize; 4] = [0, 2, 4, 5];

fn char_value(c: u8) -> Option<u32> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as u32),
        b'A'..=b'Z' => Some((c - b'A') as u32 + 10),
        b'-' => Some(36),
        b'.' => Some(37),
        _ => None,
    }
}

pub fn encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(3) * 5);
    for chunk in data.chunks(3) {
        let mut value: u32 = 0;
        for (i, b) in chunk.iter().enumerate() {
            value |= (*b as u32) << (8 * i);
        }
        for _ in 0..CHARS_PER_CHUNK[chunk.len()] {
            out.push(ALPHABET[(value % RADIX) as usize] as char);
            value /= RADIX;
        }
    }
    out
}

pub fn decode(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len().div_ceil(5) * 3);
    for group in bytes.chunks(5) {
        let byte_count = match group.len() {
            5 => 3,
            4 => 2,
            2 => 1,
            n => {
                return Err(CodecError::InvalidEncoding(format!(
                    "trailing base38 group of {} characters",
                    n
                )))
            }
        };
        let mut value: u32 = 0;
        for c in group.iter().rev() {
            let v = char_value(*c).ok_or_else(|| {
                CodecError::InvalidEncoding(format!("character {:?} not in base38 alphabet", *c as char))
            })?;
            value = value * RADIX + v;
        }
        if value >> (8 * byte_count) != 0 {
            return Err(CodecError::InvalidEncoding(format!(
                "base38 group {:?} overflows {} bytes",
                String::from_utf8_lossy(group),
                byte_count
            )));
        }
        for i in 0..byte_count {
            out.push((value >> (8 * i)) as u8);
        }
    }
    Ok(out)
}
