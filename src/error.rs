//! Error taxonomy of the wire codecs.
//!
//! Every decoder in this crate returns [CodecError] instead of panicking, whatever the input.
//! Layers above the codecs (transport wrapper, commissioner) use [anyhow] and add context naming
//! the phase that failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Less than the fixed 8 byte message header.
    #[error("frame too short: {0} bytes, need at least 8")]
    FrameTooShort(usize),

    /// Header flags announce an optional field which is not in the buffer.
    #[error("frame truncated: missing {field}")]
    FrameTruncated { field: &'static str },

    /// Less than the fixed 6 byte exchange header.
    #[error("exchange header too short: {0} bytes, need at least 6")]
    HeaderTooShort(usize),

    #[error("exchange header truncated: missing {field}")]
    HeaderTruncated { field: &'static str },

    #[error("message too short while reading {stage}")]
    MessageTooShort { stage: &'static str },

    /// Character outside of base38 alphabet or invalid trailing group.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Field value outside of its domain.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),

    /// Destination size field in message flags other than none / 64bit node id.
    #[error("unsupported destination size {0}")]
    UnsupportedDestination(u8),

    #[error("invalid BTP handshake: {0} bytes, need at least 6")]
    InvalidHandshake(usize),

    #[error("invalid tlv: {0}")]
    InvalidTlv(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// True for errors caused by missing bytes.
    /// Stream transports may wait for more data, datagram transports shall drop the packet.
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            CodecError::FrameTooShort(_)
                | CodecError::FrameTruncated { .. }
                | CodecError::HeaderTooShort(_)
                | CodecError::HeaderTruncated { .. }
                | CodecError::MessageTooShort { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
