//! Message level wrapper around byte transport.
//!
//! [MessageCodec] encodes outgoing [Message]s, decodes incoming ones and answers messages which
//! request reliability with standalone ack.

use anyhow::{Context, Result};
use std::future::Future;

use crate::{
    messages::Message,
    mrp::{self, MessageCounter},
};

/// Byte level transport - BLE GATT characteristic pair or UDP socket.
pub trait ByteTransport: Send + Sync {
    fn transmit(&self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;
    fn receive(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

pub struct MessageCodec<T: ByteTransport> {
    transport: T,
    counter: MessageCounter,
    auto_ack: bool,
}

impl<T: ByteTransport> MessageCodec<T> {
    pub fn new(transport: T) -> Self {
        Self::with_counter(transport, MessageCounter::new())
    }

    /// Use existing counter (for example randomly initialized session counter).
    pub fn with_counter(transport: T, counter: MessageCounter) -> Self {
        Self {
            transport,
            counter,
            auto_ack: true,
        }
    }

    pub fn set_auto_ack(&mut self, auto_ack: bool) {
        self.auto_ack = auto_ack;
    }

    pub fn auto_ack(&self) -> bool {
        self.auto_ack
    }

    /// Allocate counter for next outbound message.
    pub fn next_message_counter(&self) -> u32 {
        self.counter.next()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub async fn transmit(&self, msg: &Message) -> Result<()> {
        let data = msg.encode().context("encoding message")?;
        log::trace!(
            "send exchange:{} opcode:0x{:x} counter:{} len:{}",
            msg.protocol_header.exchange_id,
            msg.protocol_header.opcode,
            msg.message_header.message_counter,
            data.len()
        );
        self.transport.transmit(&data).await
    }

    /// Receive and decode next message. Sends standalone ack when message requests it and
    /// auto ack is enabled. Failure to send the ack is only logged.
    pub async fn receive(&self) -> Result<Message> {
        let data = self.transport.receive().await?;
        let msg = Message::decode(&data)
            .with_context(|| format!("decoding received message ({} bytes)", data.len()))?;
        log::trace!("received message {:?}", msg);
        if self.auto_ack && mrp::is_ack_requested(&msg) {
            let ack = mrp::build_standalone_ack(&msg, self.counter.next());
            match self.transmit(&ack).await {
                Ok(()) => log::trace!(
                    "sent ack for exchange:{} counter:{}",
                    msg.protocol_header.exchange_id,
                    msg.message_header.message_counter
                ),
                Err(e) => log::warn!(
                    "failed to send ack for exchange:{} counter:{}: {:?}",
                    msg.protocol_header.exchange_id,
                    msg.message_header.message_counter,
                    e
                ),
            }
        }
        Ok(msg)
    }
}
