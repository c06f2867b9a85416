//! Matter commissioning client
//!
//! This library implements the early part of Matter commissioning: decoding of onboarding payloads,
//! discovery filtering, BTP handshake, message framing and reliability acknowledgements.
//! Asynchronous parts use Tokio.
//! Following are main parts of api:
//! - [onboarding](onboarding) - QR code (`MT:` + [base38]) and manual pairing code (with [verhoeff] check digit)
//!                              encoders and decoders.
//! - [messages](messages) - Matter message header, protocol (exchange) header and complete [Message](messages::Message).
//! - [mrp](mrp) - message counter and standalone acknowledgements.
//! - [btp](btp) - Bluetooth transport protocol handshake frames.
//! - [MessageCodec](codec::MessageCodec) - wraps any [ByteTransport](codec::ByteTransport), encodes and decodes messages
//!                              and automatically acknowledges messages which request it.
//! - [UdpTransport](transport::UdpTransport) - UDP implementation of [ByteTransport](codec::ByteTransport).
//! - [Commissioner](commissioner::Commissioner) - discovers device described by pairing code using injected
//!                              [DiscoverySource](commissioner::DiscoverySource)s, connects to it and performs
//!                              PBKDF parameter exchange.
//! - [tlv](tlv) - Module with simple matter tlv encoders and decoders.
//!
//! Example how to decode manual pairing code and check QR code round trip:
//! ```
//! # use anyhow::Result;
//! # fn main() -> Result<()> {
//! let payload = matcom::onboarding::decode("MT:Y.ET08O614CCY06A810")?;
//! assert_eq!(payload.vendor_id, 5010);
//! assert_eq!(payload.passcode, 57630675);
//! assert_eq!(payload.to_qr_code()?, "MT:Y.ET08O614CCY06A810");
//! # Ok(())
//! # }
//! ```
//!
//! Example how to send PBKDF parameter request over UDP to device at known address:
//! ```no_run
//! # use anyhow::Result;
//! # use std::time::Duration;
//! # use matcom::{codec::MessageCodec, messages, transport::UdpTransport};
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let transport = UdpTransport::connect("0.0.0.0:0", "192.168.1.10:5540", Duration::from_secs(3)).await?;
//! let codec = MessageCodec::new(transport);
//! let payload = messages::pbkdf_param_request(&rand::random(), 1)?;
//! let msg = messages::Message::new(
//!     messages::MessageHeader::new(0, 0, codec.next_message_counter()).with_source_node_id(rand::random()),
//!     messages::ProtocolMessageHeader::new(
//!         messages::ProtocolMessageHeader::FLAG_INITIATOR | messages::ProtocolMessageHeader::FLAG_RELIABILITY,
//!         messages::ProtocolMessageHeader::OPCODE_PBKDF_REQ,
//!         rand::random(),
//!         messages::ProtocolMessageHeader::PROTOCOL_ID_SECURE_CHANNEL,
//!     ),
//!     payload,
//! );
//! codec.transmit(&msg).await?;
//! // response is acknowledged automatically
//! let response = codec.receive().await?;
//! println!("{:?}", response);
//! # Ok(())
//! # }
//! ```

pub mod base38;
pub mod btp;
pub mod codec;
pub mod commissioner;
pub mod config;
pub mod discover;
pub mod error;
pub mod messages;
pub mod mrp;
pub mod onboarding;
pub mod tlv;
pub mod transport;
pub mod util;
pub mod verhoeff;
