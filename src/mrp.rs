//! Message reliability protocol - message counters and standalone acknowledgements.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::messages::{Message, MessageHeader, ProtocolMessageHeader};

/// Outbound message counter of one session. Post increment semantics, wraps on overflow.
#[derive(Debug, Default)]
pub struct MessageCounter {
    counter: AtomicU32,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(value: u32) -> Self {
        Self {
            counter: AtomicU32::new(value),
        }
    }

    /// Return current value and increment.
    pub fn next(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn current(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }
}

pub fn is_ack_requested(msg: &Message) -> bool {
    msg.protocol_header.needs_ack()
}

/// Build standalone ack for `received`.
///
/// Ack travels on same session/exchange/protocol, carries only the ack flag and acknowledges
/// message counter of `received`. When `received` has source node id it becomes destination of the ack.
pub fn build_standalone_ack(received: &Message, outbound_counter: u32) -> Message {
    let rh = &received.message_header;
    let mut message_header = MessageHeader::new(
        rh.session_id,
        rh.security_flags & !MessageHeader::SEC_FLAG_EXTENSIONS,
        outbound_counter,
    );
    if let Some(source) = rh.source_node_id {
        message_header = message_header.with_destination_node_id(source);
    }
    let protocol_header = ProtocolMessageHeader::new(
        0,
        0,
        received.protocol_header.exchange_id,
        received.protocol_header.protocol_id,
    )
    .with_ack(rh.message_counter);
    Message::new(message_header, protocol_header, Vec::new())
}
