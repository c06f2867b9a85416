//! Matter message framing - message (frame) header, exchange (protocol) header and their composition.
//!
//! Wire layout of encoded [Message]:
//! ```text
//! message header | protocol header | [extensions length u16 | extensions] | payload
//! ```
//! All multi byte fields are little endian.
//!
//! Message header flags byte:
//! ```text
//! bits 4-7  version (must be 0)
//! bit  2    source node id present
//! bits 0-1  destination size (00 none, 01 64bit node id)
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use core::fmt;
use std::io::{Cursor, Read, Write};

use crate::{
    error::{CodecError, Result},
    tlv::{self, TlvItem},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub flags: u8,
    pub session_id: u16,
    pub security_flags: u8,
    pub message_counter: u32,
    pub source_node_id: Option<u64>,
    pub destination_node_id: Option<u64>,
}

impl MessageHeader {
    pub const MIN_SIZE: usize = 8;

    pub const VERSION_MASK: u8 = 0xf0;
    pub const FLAG_SRC_PRESENT: u8 = 0x04;
    pub const DSIZ_MASK: u8 = 0x03;
    pub const DSIZ_64: u8 = 1;

    pub const SEC_FLAG_PRIVACY: u8 = 0x80;
    pub const SEC_FLAG_CONTROL: u8 = 0x40;
    pub const SEC_FLAG_EXTENSIONS: u8 = 0x20;
    pub const SESSION_TYPE_MASK: u8 = 0x03;
    pub const SESSION_TYPE_UNICAST: u8 = 0;

    pub fn new(session_id: u16, security_flags: u8, message_counter: u32) -> Self {
        Self {
            flags: 0,
            session_id,
            security_flags,
            message_counter,
            source_node_id: None,
            destination_node_id: None,
        }
    }

    pub fn with_source_node_id(mut self, node: u64) -> Self {
        self.flags |= Self::FLAG_SRC_PRESENT;
        self.source_node_id = Some(node);
        self
    }

    pub fn with_destination_node_id(mut self, node: u64) -> Self {
        self.flags = (self.flags & !Self::DSIZ_MASK) | Self::DSIZ_64;
        self.destination_node_id = Some(node);
        self
    }

    pub fn version(&self) -> u8 {
        (self.flags & Self::VERSION_MASK) >> 4
    }

    pub fn session_type(&self) -> u8 {
        self.security_flags & Self::SESSION_TYPE_MASK
    }

    pub fn has_extensions(&self) -> bool {
        self.security_flags & Self::SEC_FLAG_EXTENSIONS != 0
    }

    /// Unsecured session - session id 0, used before PASE/CASE completes.
    pub fn is_unsecured(&self) -> bool {
        self.session_id == 0 && self.session_type() == Self::SESSION_TYPE_UNICAST
    }

    pub fn encoded_len(&self) -> usize {
        Self::MIN_SIZE
            + if self.source_node_id.is_some() { 8 } else { 0 }
            + if self.destination_node_id.is_some() { 8 } else { 0 }
    }

    /// Flags as written to wire - presence bits follow optional fields.
    fn wire_flags(&self) -> u8 {
        let mut flags = self.flags & !(Self::FLAG_SRC_PRESENT | Self::DSIZ_MASK);
        if self.source_node_id.is_some() {
            flags |= Self::FLAG_SRC_PRESENT;
        }
        if self.destination_node_id.is_some() {
            flags |= Self::DSIZ_64;
        }
        flags
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_to(&mut out)?;
        Ok(out)
    }

    fn encode_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u8(self.wire_flags())?;
        out.write_u16::<LittleEndian>(self.session_id)?;
        out.write_u8(self.security_flags)?;
        out.write_u32::<LittleEndian>(self.message_counter)?;
        if let Some(sn) = self.source_node_id {
            out.write_u64::<LittleEndian>(sn)?;
        }
        if let Some(dn) = self.destination_node_id {
            out.write_u64::<LittleEndian>(dn)?;
        }
        Ok(())
    }

    /// Decode header from start of buffer. Returns header and number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < Self::MIN_SIZE {
            return Err(CodecError::FrameTooShort(data.len()));
        }
        let mut cursor = Cursor::new(data);
        let flags = cursor.read_u8()?;
        let session_id = cursor.read_u16::<LittleEndian>()?;
        let security_flags = cursor.read_u8()?;
        let message_counter = cursor.read_u32::<LittleEndian>()?;

        let version = (flags & Self::VERSION_MASK) >> 4;
        if version != 0 {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let source_node_id = if flags & Self::FLAG_SRC_PRESENT != 0 {
            Some(
                cursor
                    .read_u64::<LittleEndian>()
                    .map_err(|_| CodecError::FrameTruncated { field: "source node id" })?,
            )
        } else {
            None
        };
        let destination_node_id = match flags & Self::DSIZ_MASK {
            0 => None,
            Self::DSIZ_64 => Some(
                cursor
                    .read_u64::<LittleEndian>()
                    .map_err(|_| CodecError::FrameTruncated { field: "destination node id" })?,
            ),
            dsiz => return Err(CodecError::UnsupportedDestination(dsiz)),
        };
        Ok((
            Self {
                flags,
                session_id,
                security_flags,
                message_counter,
                source_node_id,
                destination_node_id,
            },
            cursor.position() as usize,
        ))
    }
}

/// Exchange (protocol) header.
///
/// Field order is fixed: flags, opcode, exchange id, protocol id, [vendor id], [ack counter],
/// [secured extensions length, secured extensions].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessageHeader {
    pub exchange_flags: u8,
    pub opcode: u8,
    pub exchange_id: u16,
    pub protocol_id: u16,
    pub vendor_id: Option<u16>,
    pub ack_counter: Option<u32>,
    pub secured_extensions: Option<Vec<u8>>,
}

impl ProtocolMessageHeader {
    pub const MIN_SIZE: usize = 6;

    pub const FLAG_INITIATOR: u8 = 0x01;
    pub const FLAG_ACK: u8 = 0x02;
    pub const FLAG_RELIABILITY: u8 = 0x04;
    pub const FLAG_SECURED_EXTENSIONS: u8 = 0x08;
    pub const FLAG_VENDOR: u8 = 0x10;

    pub const OPCODE_ACK: u8 = 0x10;
    pub const OPCODE_PBKDF_REQ: u8 = 0x20;
    pub const OPCODE_PBKDF_RESP: u8 = 0x21;
    pub const OPCODE_PASE_PAKE1: u8 = 0x22;
    pub const OPCODE_PASE_PAKE2: u8 = 0x23;
    pub const OPCODE_PASE_PAKE3: u8 = 0x24;
    pub const OPCODE_STATUS: u8 = 0x40;

    pub const PROTOCOL_ID_SECURE_CHANNEL: u16 = 0;
    pub const PROTOCOL_ID_INTERACTION: u16 = 1;

    pub fn new(exchange_flags: u8, opcode: u8, exchange_id: u16, protocol_id: u16) -> Self {
        Self {
            exchange_flags,
            opcode,
            exchange_id,
            protocol_id,
            vendor_id: None,
            ack_counter: None,
            secured_extensions: None,
        }
    }

    pub fn with_ack(mut self, ack_counter: u32) -> Self {
        self.exchange_flags |= Self::FLAG_ACK;
        self.ack_counter = Some(ack_counter);
        self
    }

    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.exchange_flags |= Self::FLAG_VENDOR;
        self.vendor_id = Some(vendor_id);
        self
    }

    pub fn with_secured_extensions(mut self, ext: Vec<u8>) -> Self {
        self.exchange_flags |= Self::FLAG_SECURED_EXTENSIONS;
        self.secured_extensions = Some(ext);
        self
    }

    pub fn is_initiator(&self) -> bool {
        self.exchange_flags & Self::FLAG_INITIATOR != 0
    }
    pub fn is_ack(&self) -> bool {
        self.exchange_flags & Self::FLAG_ACK != 0
    }
    pub fn needs_ack(&self) -> bool {
        self.exchange_flags & Self::FLAG_RELIABILITY != 0
    }
    pub fn has_vendor_id(&self) -> bool {
        self.exchange_flags & Self::FLAG_VENDOR != 0
    }
    pub fn has_secured_extensions(&self) -> bool {
        self.exchange_flags & Self::FLAG_SECURED_EXTENSIONS != 0
    }

    pub fn encoded_len(&self) -> usize {
        Self::MIN_SIZE
            + self.vendor_id.map_or(0, |_| 2)
            + self.ack_counter.map_or(0, |_| 4)
            + self.secured_extensions.as_ref().map_or(0, |e| 2 + e.len())
    }

    fn wire_flags(&self) -> u8 {
        let mut flags =
            self.exchange_flags & !(Self::FLAG_ACK | Self::FLAG_VENDOR | Self::FLAG_SECURED_EXTENSIONS);
        if self.vendor_id.is_some() {
            flags |= Self::FLAG_VENDOR;
        }
        if self.ack_counter.is_some() {
            flags |= Self::FLAG_ACK;
        }
        if self.secured_extensions.is_some() {
            flags |= Self::FLAG_SECURED_EXTENSIONS;
        }
        flags
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_to(&mut out)?;
        Ok(out)
    }

    fn encode_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u8(self.wire_flags())?;
        out.write_u8(self.opcode)?;
        out.write_u16::<LittleEndian>(self.exchange_id)?;
        out.write_u16::<LittleEndian>(self.protocol_id)?;
        if let Some(vendor_id) = self.vendor_id {
            out.write_u16::<LittleEndian>(vendor_id)?;
        }
        if let Some(ack_counter) = self.ack_counter {
            out.write_u32::<LittleEndian>(ack_counter)?;
        }
        if let Some(ext) = &self.secured_extensions {
            write_length_prefixed(out, ext, "secured extensions")?;
        }
        Ok(())
    }

    /// Decode header from start of buffer. Returns header and number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < Self::MIN_SIZE {
            return Err(CodecError::HeaderTooShort(data.len()));
        }
        let mut cursor = Cursor::new(data);
        let exchange_flags = cursor.read_u8()?;
        let opcode = cursor.read_u8()?;
        let exchange_id = cursor.read_u16::<LittleEndian>()?;
        let protocol_id = cursor.read_u16::<LittleEndian>()?;
        let vendor_id = if exchange_flags & Self::FLAG_VENDOR != 0 {
            Some(
                cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|_| CodecError::HeaderTruncated { field: "vendor id" })?,
            )
        } else {
            None
        };
        let ack_counter = if exchange_flags & Self::FLAG_ACK != 0 {
            Some(
                cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|_| CodecError::HeaderTruncated { field: "ack counter" })?,
            )
        } else {
            None
        };
        let secured_extensions = if exchange_flags & Self::FLAG_SECURED_EXTENSIONS != 0 {
            Some(read_length_prefixed(&mut cursor).map_err(|_| CodecError::HeaderTruncated {
                field: "secured extensions",
            })?)
        } else {
            None
        };
        Ok((
            Self {
                exchange_flags,
                opcode,
                exchange_id,
                protocol_id,
                vendor_id,
                ack_counter,
                secured_extensions,
            },
            cursor.position() as usize,
        ))
    }
}

fn write_length_prefixed(out: &mut Vec<u8>, data: &[u8], what: &str) -> Result<()> {
    let len = u16::try_from(data.len())
        .map_err(|_| CodecError::InvalidPayload(format!("{} longer than 65535 bytes", what)))?;
    out.write_u16::<LittleEndian>(len)?;
    out.write_all(data)?;
    Ok(())
}

fn read_length_prefixed(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Vec<u8>> {
    let len = cursor.read_u16::<LittleEndian>()? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    let mut out = vec![0; len];
    cursor.read_exact(&mut out)?;
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureChannelGeneralCode {
    Success = 0,
    Failure = 1,
    BadPrecondition = 2,
    OutOfRange = 3,
    BadRequest = 4,
    Unsupported = 5,
    Unexpected = 6,
    ResourceExhausted = 7,
    Busy = 8,
    Timeout = 9,
    Continue = 10,
    Aborted = 11,
    InvalidArgument = 12,
    NotFound = 13,
    AlreadyExists = 14,
    PermissionDenied = 15,
    DataLoss = 16,
    MessageTooLarge = 17,
    Unknown = 0xffff,
}

impl From<u16> for SecureChannelGeneralCode {
    fn from(value: u16) -> Self {
        use SecureChannelGeneralCode::*;
        const ALL: [SecureChannelGeneralCode; 18] = [
            Success,
            Failure,
            BadPrecondition,
            OutOfRange,
            BadRequest,
            Unsupported,
            Unexpected,
            ResourceExhausted,
            Busy,
            Timeout,
            Continue,
            Aborted,
            InvalidArgument,
            NotFound,
            AlreadyExists,
            PermissionDenied,
            DataLoss,
            MessageTooLarge,
        ];
        ALL.get(value as usize).copied().unwrap_or(Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureChannelProtocolCode {
    SessionEstablishmentSuccess = 0,
    NoSharedTrustRoots = 1,
    InvalidParameter = 2,
    CloseSession = 3,
    Busy = 4,
    Unknown = 0xffff,
}

impl From<u16> for SecureChannelProtocolCode {
    fn from(value: u16) -> Self {
        match value {
            0 => SecureChannelProtocolCode::SessionEstablishmentSuccess,
            1 => SecureChannelProtocolCode::NoSharedTrustRoots,
            2 => SecureChannelProtocolCode::InvalidParameter,
            3 => SecureChannelProtocolCode::CloseSession,
            4 => SecureChannelProtocolCode::Busy,
            _ => SecureChannelProtocolCode::Unknown,
        }
    }
}

/// Payload of secure channel StatusReport message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub general_code: u16,
    pub protocol_id: u32,
    pub protocol_code: u16,
}

impl StatusReport {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let short = |_| CodecError::MessageTooShort { stage: "status report" };
        let general_code = cursor.read_u16::<LittleEndian>().map_err(short)?;
        let protocol_id = cursor.read_u32::<LittleEndian>().map_err(short)?;
        let protocol_code = cursor.read_u16::<LittleEndian>().map_err(short)?;
        Ok(Self {
            general_code,
            protocol_id,
            protocol_code,
        })
    }
    pub fn is_ok(&self) -> bool {
        self.general_code == 0 && self.protocol_code == 0
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "StatusReport: OK");
        }
        let gc = SecureChannelGeneralCode::from(self.general_code);
        if self.protocol_id == ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL as u32 {
            let pc = SecureChannelProtocolCode::from(self.protocol_code);
            write!(
                f,
                "StatusReport: general_code={:?}({}) protocol_id={} protocol_code={:?}({})",
                gc, self.general_code, self.protocol_id, pc, self.protocol_code
            )
        } else {
            write!(
                f,
                "StatusReport: general_code={:?}({}) protocol_id={} protocol_code={}",
                gc, self.general_code, self.protocol_id, self.protocol_code
            )
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    pub message_header: MessageHeader,
    pub protocol_header: ProtocolMessageHeader,
    /// message extensions; present iff message header security flags have extensions bit
    pub extensions: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("message_header", &self.message_header)
            .field("protocol_header", &self.protocol_header)
            .field("extensions", &self.extensions.as_ref().map(hex::encode))
            .field("payload", &hex::encode(&self.payload))
            .finish()
    }
}

impl Message {
    pub fn new(
        message_header: MessageHeader,
        protocol_header: ProtocolMessageHeader,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_header,
            protocol_header,
            extensions: None,
            payload,
        }
    }

    pub fn with_extensions(mut self, ext: Vec<u8>) -> Self {
        self.message_header.security_flags |= MessageHeader::SEC_FLAG_EXTENSIONS;
        self.extensions = Some(ext);
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut header = self.message_header.clone();
        if self.extensions.is_some() {
            header.security_flags |= MessageHeader::SEC_FLAG_EXTENSIONS;
        } else {
            header.security_flags &= !MessageHeader::SEC_FLAG_EXTENSIONS;
        }
        let ext_len = self.extensions.as_ref().map_or(0, |e| e.len() + 2);
        let mut out = Vec::with_capacity(
            header.encoded_len() + self.protocol_header.encoded_len() + ext_len + self.payload.len(),
        );
        header.encode_to(&mut out)?;
        self.protocol_header.encode_to(&mut out)?;
        if let Some(ext) = &self.extensions {
            write_length_prefixed(&mut out, ext, "message extensions")?;
        }
        out.write_all(&self.payload)?;
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let (message_header, used) = MessageHeader::decode(data).map_err(|e| {
            if e.is_truncation() {
                log::trace!("message header: {}", e);
                CodecError::MessageTooShort { stage: "message header" }
            } else {
                e
            }
        })?;
        let rest = &data[used..];
        let (protocol_header, used) = ProtocolMessageHeader::decode(rest).map_err(|e| {
            if e.is_truncation() {
                log::trace!("protocol header: {}", e);
                CodecError::MessageTooShort { stage: "protocol header" }
            } else {
                e
            }
        })?;
        let rest = &rest[used..];
        let (extensions, rest) = if message_header.has_extensions() {
            let mut cursor = Cursor::new(rest);
            let ext = read_length_prefixed(&mut cursor)
                .map_err(|_| CodecError::MessageTooShort { stage: "message extensions" })?;
            (Some(ext), &rest[cursor.position() as usize..])
        } else {
            (None, rest)
        };
        Ok(Self {
            message_header,
            protocol_header,
            extensions,
            payload: rest.to_vec(),
        })
    }

    pub fn is_secure_channel(&self, opcode: u8) -> bool {
        self.protocol_header.protocol_id == ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL
            && self.protocol_header.opcode == opcode
    }

    /// Standalone acknowledgement - ack flag set, no payload.
    pub fn is_standalone_ack(&self) -> bool {
        self.protocol_header.is_ack()
            && self.payload.is_empty()
            && (self.protocol_header.opcode == 0 || self.is_secure_channel(ProtocolMessageHeader::OPCODE_ACK))
    }

    /// Decode payload as tlv.
    pub fn tlv(&self) -> Result<TlvItem> {
        tlv::decode_tlv(&self.payload)
    }

    /// Status report carried by this message, None when message is not secure channel StatusReport.
    pub fn status_report(&self) -> Result<Option<StatusReport>> {
        if !self.is_secure_channel(ProtocolMessageHeader::OPCODE_STATUS) {
            return Ok(None);
        }
        StatusReport::parse(&self.payload).map(Some)
    }
}

/// Tlv payload of PBKDFParamRequest.
pub fn pbkdf_param_request(initiator_random: &[u8; 32], initiator_session_id: u16) -> Result<Vec<u8>> {
    let mut tlv = tlv::TlvBuffer::new();
    tlv.write_anon_struct()?;
    tlv.write_octetstring(1, initiator_random)?;
    tlv.write_uint16(2, initiator_session_id)?;
    tlv.write_uint8(3, 0)?; // passcode id
    tlv.write_bool(4, false)?; // has pbkdf parameters
    tlv.write_struct_end()?;
    Ok(tlv.data)
}

/// Decoded PBKDFParamResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbkdfParamResponse {
    pub initiator_random: Vec<u8>,
    pub responder_random: Vec<u8>,
    pub responder_session_id: u16,
    pub iterations: Option<u32>,
    pub salt: Option<Vec<u8>>,
}

impl PbkdfParamResponse {
    pub fn parse(tlv: &TlvItem) -> Result<Self> {
        let missing = |what: &str| CodecError::InvalidPayload(format!("pbkdf response: {} missing", what));
        Ok(Self {
            initiator_random: tlv
                .get_octet_string(&[1])
                .ok_or_else(|| missing("initiator random"))?
                .to_vec(),
            responder_random: tlv
                .get_octet_string(&[2])
                .ok_or_else(|| missing("responder random"))?
                .to_vec(),
            responder_session_id: tlv.get_u16(&[3]).ok_or_else(|| missing("session id"))?,
            iterations: tlv.get_u32(&[4, 1]),
            salt: tlv.get_octet_string(&[4, 2]).map(|s| s.to_vec()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

    #[test]
    fn device_captures() {
        let msg = "04000000a5a0b90d3320764c7d52ef86052060d5000015300120cabe444262d4e5dd568c755ed77e0829b9983c4d62b480b579811ec383eb69c625020837240300280418";
        let msg = hex::decode(msg).unwrap();
        let m = Message::decode(&msg).unwrap();
        assert_eq!(m.message_header.source_node_id, Some(0x86ef527d4c762033));
        assert_eq!(m.message_header.destination_node_id, None);
        assert_eq!(m.message_header.message_counter, 0x0db9a0a5);
        assert!(m.is_secure_channel(ProtocolMessageHeader::OPCODE_PBKDF_REQ));
        assert!(m.protocol_header.needs_ack());
        let tlv = m.tlv().unwrap();
        assert_eq!(tlv.get_u16(&[2]), Some(0x3708));
        assert_eq!(m.encode().unwrap(), msg);

        let msg = "04000000000000000000000000000000012001000000153001203052998af1897150086e6c84003c074df93a796b4f68a9221ee4e40325014aaf25020100240300280418";
        let msg = hex::decode(msg).unwrap();
        let m = Message::decode(&msg).unwrap();
        assert_eq!(m.protocol_header.exchange_id, 1);
        assert_eq!(m.protocol_header.exchange_flags, 0x01);
        assert_eq!(m.encode().unwrap(), msg);
    }

    #[test]
    fn exchange_header_fixture() {
        let (h, used) = ProtocolMessageHeader::decode(&[0x05, 0x20, 0x34, 0x12, 0x00, 0x00]).unwrap();
        assert_eq!(used, 6);
        assert_eq!(h.exchange_flags, 0x05);
        assert!(h.is_initiator());
        assert!(h.needs_ack());
        assert_eq!(h.opcode, 0x20);
        assert_eq!(h.exchange_id, 0x1234);
        assert_eq!(h.protocol_id, 0);
        assert!(!h.has_vendor_id());
        assert!(!h.is_ack());
    }

    #[test]
    fn minimal_message_fixture() {
        let mut data = vec![0x00, 0x00, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12];
        data.extend_from_slice(&[0x05, 0x20, 0x34, 0x12, 0x00, 0x00]);
        data.extend_from_slice(&[1, 2, 3, 4]);
        let m = Message::decode(&data).unwrap();
        assert_eq!(m.message_header.message_counter, 0x12345678);
        assert_eq!(m.message_header.encoded_len(), 8);
        assert_eq!(m.payload, vec![1, 2, 3, 4]);
        assert_eq!(m.extensions, None);
        assert_eq!(m.encode().unwrap(), data);
    }

    #[test]
    fn message_header_optional_fields() {
        let h = MessageHeader::new(0x4321, 0, 7)
            .with_source_node_id(0x1122334455667788)
            .with_destination_node_id(0x99);
        let enc = h.encode().unwrap();
        assert_eq!(enc.len(), 24);
        assert_eq!(enc[0], MessageHeader::FLAG_SRC_PRESENT | MessageHeader::DSIZ_64);
        assert_eq!(&enc[1..3], &[0x21, 0x43]);
        assert_eq!(&enc[8..16], &0x1122334455667788u64.to_le_bytes());
        let (d, used) = MessageHeader::decode(&enc).unwrap();
        assert_eq!(used, 24);
        assert_eq!(d, h);
    }

    #[test]
    fn message_header_errors() {
        assert!(matches!(MessageHeader::decode(&[0; 7]), Err(CodecError::FrameTooShort(7))));
        assert!(matches!(
            MessageHeader::decode(&[0x04, 0, 0, 0, 0, 0, 0, 0, 1, 2]),
            Err(CodecError::FrameTruncated { field: "source node id" })
        ));
        assert!(matches!(
            MessageHeader::decode(&[0x01, 0, 0, 0, 0, 0, 0, 0]),
            Err(CodecError::FrameTruncated { field: "destination node id" })
        ));
        assert!(matches!(
            MessageHeader::decode(&[0x10, 0, 0, 0, 0, 0, 0, 0]),
            Err(CodecError::UnsupportedVersion(1))
        ));
        assert!(matches!(
            MessageHeader::decode(&[0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(CodecError::UnsupportedDestination(2))
        ));
    }

    #[test]
    fn protocol_header_errors() {
        assert!(matches!(
            ProtocolMessageHeader::decode(&[0x05, 0x20, 0x34]),
            Err(CodecError::HeaderTooShort(3))
        ));
        assert!(matches!(
            ProtocolMessageHeader::decode(&[0x10, 0, 0, 0, 0, 0, 1]),
            Err(CodecError::HeaderTruncated { field: "vendor id" })
        ));
        assert!(matches!(
            ProtocolMessageHeader::decode(&[0x02, 0, 0, 0, 0, 0, 1, 2, 3]),
            Err(CodecError::HeaderTruncated { field: "ack counter" })
        ));
        assert!(matches!(
            ProtocolMessageHeader::decode(&[0x08, 0, 0, 0, 0, 0, 5, 0, 1, 2]),
            Err(CodecError::HeaderTruncated { field: "secured extensions" })
        ));
    }

    #[test]
    fn protocol_header_field_order() {
        let h = ProtocolMessageHeader::new(ProtocolMessageHeader::FLAG_INITIATOR, 0x22, 0xabcd, 0x0001)
            .with_vendor_id(0xfff1)
            .with_ack(0x01020304)
            .with_secured_extensions(vec![0xaa, 0xbb]);
        let enc = h.encode().unwrap();
        assert_eq!(hex::encode(&enc), "1b22cdab0100f1ff040302010200aabb");
        let (d, used) = ProtocolMessageHeader::decode(&enc).unwrap();
        assert_eq!(used, enc.len());
        assert_eq!(d, h);
    }

    #[test]
    fn message_extensions() {
        let m = Message::new(
            MessageHeader::new(1, 0, 2),
            ProtocolMessageHeader::new(0, 1, 2, 3),
            vec![9, 9],
        )
        .with_extensions(vec![1, 2, 3]);
        let enc = m.encode().unwrap();
        assert_eq!(enc.len(), 8 + 6 + 2 + 3 + 2);
        let d = Message::decode(&enc).unwrap();
        assert_eq!(d, m);
        assert!(matches!(
            Message::decode(&enc[..15]),
            Err(CodecError::MessageTooShort { stage: "message extensions" })
        ));
        assert!(matches!(
            Message::decode(&enc[..10]),
            Err(CodecError::MessageTooShort { stage: "protocol header" })
        ));
        assert!(matches!(
            Message::decode(&enc[..3]),
            Err(CodecError::MessageTooShort { stage: "message header" })
        ));
    }

    fn random_message(rng: &mut StdRng) -> Message {
        let mut mh = MessageHeader::new(rng.gen(), rng.gen::<u8>() & !MessageHeader::SEC_FLAG_EXTENSIONS, rng.gen());
        if rng.gen() {
            mh = mh.with_source_node_id(rng.gen());
        }
        if rng.gen() {
            mh = mh.with_destination_node_id(rng.gen());
        }
        let mut ph = ProtocolMessageHeader::new(rng.gen::<u8>() & 0x05, rng.gen(), rng.gen(), rng.gen());
        if rng.gen() {
            ph = ph.with_vendor_id(rng.gen());
        }
        if rng.gen() {
            ph = ph.with_ack(rng.gen());
        }
        if rng.gen() {
            let mut ext = vec![0; rng.gen_range(0..20)];
            rng.fill_bytes(&mut ext);
            ph = ph.with_secured_extensions(ext);
        }
        let mut payload = vec![0; rng.gen_range(0..64)];
        rng.fill_bytes(&mut payload);
        let m = Message::new(mh, ph, payload);
        if rng.gen() {
            let mut ext = vec![0; rng.gen_range(0..20)];
            rng.fill_bytes(&mut ext);
            m.with_extensions(ext)
        } else {
            m
        }
    }

    #[test]
    fn round_trip_random() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..1000 {
            let m = random_message(&mut rng);
            let enc = m.encode().unwrap();
            assert_eq!(Message::decode(&enc).unwrap(), m);
        }
    }

    #[test]
    fn fuzz_never_panics() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(Message::decode(&[]).is_err());
        assert!(Message::decode(&[0]).is_err());
        for i in 0..20000 {
            let len = match i % 3 {
                0 => rng.gen_range(0..32),
                1 => rng.gen_range(0..128),
                _ => 1024,
            };
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);
            // bias towards valid version so optional field paths get exercised
            if !data.is_empty() && rng.gen() {
                data[0] &= 0x0f;
            }
            if let Ok(m) = Message::decode(&data) {
                let _ = m.tlv();
                let _ = m.status_report();
            }
        }
    }

    #[test]
    fn status_report() {
        let m = Message::new(
            MessageHeader::new(0, 0, 1),
            ProtocolMessageHeader::new(0, ProtocolMessageHeader::OPCODE_STATUS, 1, 0),
            vec![1, 0, 0, 0, 0, 0, 2, 0],
        );
        let sr = m.status_report().unwrap().unwrap();
        assert!(!sr.is_ok());
        assert_eq!(SecureChannelGeneralCode::from(sr.general_code), SecureChannelGeneralCode::Failure);
        assert_eq!(
            sr.to_string(),
            "StatusReport: general_code=Failure(1) protocol_id=0 protocol_code=InvalidParameter(2)"
        );
        assert_eq!(SecureChannelGeneralCode::from(200), SecureChannelGeneralCode::Unknown);

        let short = Message::new(m.message_header.clone(), m.protocol_header.clone(), vec![0, 0]);
        assert!(short.status_report().is_err());
        let other = Message::new(m.message_header.clone(), ProtocolMessageHeader::new(0, 0x21, 1, 0), vec![]);
        assert_eq!(other.status_report().unwrap(), None);
    }

    #[test]
    fn pbkdf_request_response() {
        let random = [7u8; 32];
        let req = pbkdf_param_request(&random, 0x1234).unwrap();
        let t = tlv::decode_tlv(&req).unwrap();
        assert_eq!(t.get_octet_string(&[1]), Some(&random[..]));
        assert_eq!(t.get_u16(&[2]), Some(0x1234));
        assert_eq!(t.get_bool(&[4]), Some(false));

        let mut resp = tlv::TlvBuffer::new();
        resp.write_anon_struct().unwrap();
        resp.write_octetstring(1, &random).unwrap();
        resp.write_octetstring(2, &[8u8; 32]).unwrap();
        resp.write_uint16(3, 0x55).unwrap();
        resp.write_struct(4).unwrap();
        resp.write_uint32(1, 1000).unwrap();
        resp.write_octetstring(2, b"SPAKE2P Key Salt").unwrap();
        resp.write_struct_end().unwrap();
        resp.write_struct_end().unwrap();
        let r = PbkdfParamResponse::parse(&tlv::decode_tlv(&resp.data).unwrap()).unwrap();
        assert_eq!(r.initiator_random, random.to_vec());
        assert_eq!(r.responder_session_id, 0x55);
        assert_eq!(r.iterations, Some(1000));
        assert_eq!(r.salt.as_deref(), Some(&b"SPAKE2P Key Salt"[..]));

        let mut bad = tlv::TlvBuffer::new();
        bad.write_anon_struct().unwrap();
        bad.write_struct_end().unwrap();
        assert!(PbkdfParamResponse::parse(&tlv::decode_tlv(&bad.data).unwrap()).is_err());
    }
}
