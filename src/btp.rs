//! BTP (Bluetooth transport protocol) handshake framing.
//!
//! Handshake request is fixed 9 byte frame:
//! ```text
//! 0     control flags 0x65 (handshake | management | ending | beginning)
//! 1     management opcode 0x6c
//! 2     supported BTP version
//! 3-7   reserved
//! 8     CRC-8 over bytes 0-7
//! ```
//! Response is at least 6 bytes: control flags, opcode, version byte (high nibble vendor nibble,
//! low nibble selected version), ATT MTU (u16 LE), window size.

use byteorder::LittleEndian;

use crate::{
    error::{CodecError, Result},
    util::binary,
};

pub const FLAG_HANDSHAKE: u8 = 0x40;
pub const FLAG_MANAGEMENT: u8 = 0x20;
pub const FLAG_ENDING_SEGMENT: u8 = 0x04;
pub const FLAG_BEGINNING_SEGMENT: u8 = 0x01;

pub const HANDSHAKE_CONTROL_FLAGS: u8 =
    FLAG_HANDSHAKE | FLAG_MANAGEMENT | FLAG_ENDING_SEGMENT | FLAG_BEGINNING_SEGMENT;
pub const HANDSHAKE_OPCODE: u8 = 0x6c;
pub const BTP_VERSION: u8 = 4;

pub const HANDSHAKE_REQUEST_LEN: usize = 9;
pub const HANDSHAKE_RESPONSE_MIN_LEN: usize = 6;

/// Handshake request as sent on the wire.
pub const HANDSHAKE_REQUEST: [u8; HANDSHAKE_REQUEST_LEN] =
    [0x65, 0x6c, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x32];

const CRC8: crc::Crc<u8> = crc::Crc::<u8>::new(&crc::CRC_8_SMBUS);

/// CRC-8, polynomial 0x07, initial value 0, no reflection.
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// Build handshake request advertising given BTP version.
pub fn handshake_request(version: u8) -> [u8; HANDSHAKE_REQUEST_LEN] {
    let mut out = [0u8; HANDSHAKE_REQUEST_LEN];
    out[0] = HANDSHAKE_CONTROL_FLAGS;
    out[1] = HANDSHAKE_OPCODE;
    out[2] = version & 0x0f;
    out[8] = crc8(&out[..8]);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub control_flags: u8,
    pub opcode: u8,
    pub vendor_nibble: u8,
    pub selected_version: u8,
    pub att_mtu: u16,
    pub window_size: u8,
}

impl HandshakeResponse {
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HANDSHAKE_RESPONSE_MIN_LEN {
            return Err(CodecError::InvalidHandshake(data.len()));
        }
        let att_mtu =
            binary::read_u16_at::<LittleEndian>(data, 3).ok_or(CodecError::InvalidHandshake(data.len()))?;
        Ok(Self {
            control_flags: data[0],
            opcode: data[1],
            vendor_nibble: data[2] >> 4,
            selected_version: data[2] & 0x0f,
            att_mtu,
            window_size: data[5],
        })
    }

    pub fn encode(&self) -> [u8; HANDSHAKE_RESPONSE_MIN_LEN] {
        let mtu = binary::encode_u16::<LittleEndian>(self.att_mtu);
        [
            self.control_flags,
            self.opcode,
            (self.vendor_nibble << 4) | (self.selected_version & 0x0f),
            mtu[0],
            mtu[1],
            self.window_size,
        ]
    }

    /// Response carries handshake flags and opcode.
    pub fn is_handshake(&self) -> bool {
        self.control_flags & (FLAG_HANDSHAKE | FLAG_MANAGEMENT) == (FLAG_HANDSHAKE | FLAG_MANAGEMENT)
            && self.opcode == HANDSHAKE_OPCODE
    }
}
