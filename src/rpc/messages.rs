//! IPC message set.
//!
//! ```text
//! Message
//! ├── header  { message_id, group = 0x110D, function }
//! └── body    Request(BrokerRequest)
//!             Response(BrokerResponse)
//!             Event { subscriber, BrokerEvent }
//! ```
//!
//! A message is serialized with postcard and carried in one
//! length-prefixed frame (see [`codec`](super::codec)). The header's
//! function code must agree with the body; a mismatch is treated like a
//! truncated message.

use log::warn;
use serde::{Deserialize, Serialize};

use super::codec::{MAX_FRAME_SIZE, frame_to_vec};
use crate::app::commands::{BrokerRequest, BrokerResponse};
use crate::app::events::BrokerEvent;
use crate::error::{BrokerError, Result};
use crate::types::SubscriberId;

/// Message group of every Cycling Power broker message.
pub const MESSAGE_GROUP: u16 = 0x110D;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub message_id: u32,
    pub group: u16,
    pub function: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    Request(BrokerRequest),
    /// Answer to the request whose function code the header repeats.
    Response(BrokerResponse),
    Event { subscriber: SubscriberId, event: BrokerEvent },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl Message {
    pub fn request(message_id: u32, request: BrokerRequest) -> Self {
        Self {
            header: header(message_id, request.function()),
            body: MessageBody::Request(request),
        }
    }

    /// Response echoing the request's id and function.
    pub fn response(request: &MessageHeader, response: BrokerResponse) -> Self {
        Self {
            header: header(request.message_id, request.function),
            body: MessageBody::Response(response),
        }
    }

    pub fn event(message_id: u32, subscriber: SubscriberId, event: BrokerEvent) -> Self {
        Self {
            header: header(message_id, event.function()),
            body: MessageBody::Event { subscriber, event },
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = postcard::to_allocvec(self).map_err(|_| BrokerError::AllocationFailure)?;
        if bytes.len() > MAX_FRAME_SIZE {
            warn!("IO: message 0x{:05X} too large ({} bytes)", self.header.function, bytes.len());
            return Err(BrokerError::AllocationFailure);
        }
        Ok(bytes)
    }

    /// Encode and wrap in a length-prefixed frame.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        frame_to_vec(&self.encode()?).ok_or(BrokerError::AllocationFailure)
    }

    /// Decode and validate a frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let msg: Self = postcard::from_bytes(payload).map_err(|_| BrokerError::ResponseMalformed)?;
        if msg.header.group != MESSAGE_GROUP {
            return Err(BrokerError::ResponseMalformed);
        }
        let expected = match &msg.body {
            MessageBody::Request(r) => Some(r.function()),
            MessageBody::Event { event, .. } => Some(event.function()),
            MessageBody::Response(_) => None,
        };
        if expected.is_some_and(|f| f != msg.header.function) {
            return Err(BrokerError::ResponseMalformed);
        }
        Ok(msg)
    }
}

const fn header(message_id: u32, function: u32) -> MessageHeader {
    MessageHeader {
        message_id,
        group: MESSAGE_GROUP,
        function,
    }
}
