//! IPC event sink adapter.
//!
//! Implements [`EventSink`] by serializing each [`BrokerEvent`] into an
//! event [`Message`] frame and queuing it on the outbound channel for the
//! subscriber's origin. This is the "push" direction of the IPC link.

use std::sync::Arc;

use log::warn;

use crate::app::events::BrokerEvent;
use crate::app::ports::EventSink;
use crate::rpc::channels::IpcChannels;
use crate::rpc::messages::Message;
use crate::types::{OriginId, SubscriberId};

/// Event message ids live in the upper half so they never collide with
/// client-chosen request ids.
const EVENT_ID_BASE: u32 = 0x8000_0000;

pub struct IpcEventSink {
    channels: Arc<IpcChannels>,
    msg_id: u32,
    dropped: u64,
}

impl IpcEventSink {
    pub fn new(channels: Arc<IpcChannels>) -> Self {
        Self {
            channels,
            msg_id: EVENT_ID_BASE,
            dropped: 0,
        }
    }

    fn alloc_msg_id(&mut self) -> u32 {
        let id = self.msg_id;
        self.msg_id = self.msg_id.wrapping_add(1);
        id
    }

    /// Events that could not be encoded or queued.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl EventSink for IpcEventSink {
    fn deliver(&mut self, origin: OriginId, subscriber: SubscriberId, event: &BrokerEvent) {
        let id = self.alloc_msg_id();
        let frame = match Message::event(id, subscriber, event.clone()).to_frame() {
            Ok(f) => f,
            Err(e) => {
                warn!("RPC[{}]: event 0x{:05X} not encoded: {}", origin, event.function(), e);
                self.dropped += 1;
                return;
            }
        };
        if !self.channels.send_frame(origin, frame) {
            self.dropped += 1;
        }
    }
}
