//! Fixed width integer <-> byte array conversion.
//!
//! Byte order is chosen by the caller. Matter headers are little endian,
//! some legacy structures are big endian - callers keep whichever their format uses.

use byteorder::ByteOrder;

pub fn encode_u8(v: u8) -> [u8; 1] {
    [v]
}

pub fn encode_u16<E: ByteOrder>(v: u16) -> [u8; 2] {
    let mut out = [0; 2];
    E::write_u16(&mut out, v);
    out
}

pub fn encode_u32<E: ByteOrder>(v: u32) -> [u8; 4] {
    let mut out = [0; 4];
    E::write_u32(&mut out, v);
    out
}

pub fn encode_u64<E: ByteOrder>(v: u64) -> [u8; 8] {
    let mut out = [0; 8];
    E::write_u64(&mut out, v);
    out
}

pub fn decode_u8(b: [u8; 1]) -> u8 {
    b[0]
}

pub fn decode_u16<E: ByteOrder>(b: [u8; 2]) -> u16 {
    E::read_u16(&b)
}

pub fn decode_u32<E: ByteOrder>(b: [u8; 4]) -> u32 {
    E::read_u32(&b)
}

pub fn decode_u64<E: ByteOrder>(b: [u8; 8]) -> u64 {
    E::read_u64(&b)
}

/// Read u16 at offset of slice. None when slice is too short.
pub fn read_u16_at<E: ByteOrder>(data: &[u8], offset: usize) -> Option<u16> {
    let b = data.get(offset..offset.checked_add(2)?)?;
    Some(E::read_u16(b))
}
