//! Channels between the transport side and the broker worker.
//!
//! Uses `embassy-sync` bounded MPMC channels. Transports push client
//! bytes and the engine / device manager push notifications from any
//! thread; the worker drains them on its single context and pushes
//! response and event frames back out.
//!
//! ```text
//! ┌─────────────┐  InboundBytes  ┌──────────────┐
//! │  Transport  │───────────────▶│              │
//! │             │◀───────────────│    Worker    │
//! └─────────────┘  OutboundFrame │  (executor)  │
//! ┌─────────────┐  Notification  │              │
//! │ Engine/DevM │───────────────▶│              │
//! └─────────────┘                └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use crate::app::events::{DeviceEvent, EngineEvent};
use crate::types::OriginId;

/// Raw bytes read from one client connection.
pub struct InboundBytes {
    pub origin: OriginId,
    pub data: Vec<u8>,
}

/// A length-prefixed frame ready to write to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub origin: OriginId,
    pub frame: Vec<u8>,
}

/// Asynchronous input that is not a client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Engine(EngineEvent),
    Device(DeviceEvent),
    /// The client at this origin disconnected.
    ClientGone(OriginId),
    /// Stop the worker.
    Shutdown,
}

/// Channel depth for inbound client bytes.
const INBOUND_DEPTH: usize = 16;

/// Channel depth for outbound frames.
const OUTBOUND_DEPTH: usize = 32;

/// Channel depth for notifications.
const NOTIFY_DEPTH: usize = 32;

/// The worker's channel set. Share it behind an `Arc`.
pub struct IpcChannels {
    inbound: Channel<CriticalSectionRawMutex, InboundBytes, INBOUND_DEPTH>,
    outbound: Channel<CriticalSectionRawMutex, OutboundFrame, OUTBOUND_DEPTH>,
    notifications: Channel<CriticalSectionRawMutex, Notification, NOTIFY_DEPTH>,
}

impl Default for IpcChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcChannels {
    pub const fn new() -> Self {
        Self {
            inbound: Channel::new(),
            outbound: Channel::new(),
            notifications: Channel::new(),
        }
    }

    // ── Transport side ───────────────────────────────────────

    /// Hand bytes read from a client to the worker.
    pub fn feed_bytes(&self, origin: OriginId, data: &[u8]) -> bool {
        let msg = InboundBytes {
            origin,
            data: data.to_vec(),
        };
        if self.inbound.try_send(msg).is_err() {
            warn!("IO[{}]: inbound channel full, dropping {} bytes", origin, data.len());
            return false;
        }
        true
    }

    /// Next frame to write out, if any.
    pub fn try_recv_frame(&self) -> Option<OutboundFrame> {
        self.outbound.try_receive().ok()
    }

    pub fn client_gone(&self, origin: OriginId) -> bool {
        self.notify(Notification::ClientGone(origin))
    }

    // ── Engine / device manager side ─────────────────────────

    pub fn notify(&self, notification: Notification) -> bool {
        if self.notifications.try_send(notification).is_err() {
            warn!("IO: notification channel full, dropping");
            return false;
        }
        true
    }

    // ── Worker side ──────────────────────────────────────────

    /// Queue a frame for a client. Drops it when the transport lags.
    pub fn send_frame(&self, origin: OriginId, frame: Vec<u8>) -> bool {
        if self.outbound.try_send(OutboundFrame { origin, frame }).is_err() {
            warn!("IO[{}]: outbound channel full, dropping frame", origin);
            return false;
        }
        true
    }

    pub(crate) async fn recv_bytes(&self) -> InboundBytes {
        self.inbound.receive().await
    }

    pub(crate) async fn recv_notification(&self) -> Notification {
        self.notifications.receive().await
    }
}
