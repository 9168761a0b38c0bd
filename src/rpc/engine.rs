//! RPC engine: turns client byte streams into broker requests.
//!
//! **Transport-decoupled**: the engine does not own a transport. Callers
//! feed `(origin, bytes)` via [`RpcEngine::feed_bytes`] and get back
//! ready-to-write response frames. The worker bridges the transport side
//! to this engine through channels.
//!
//! Every request passes through two gates:
//!
//! 1. **Decode**: frame payload must be a well-formed [`Message`] of the
//!    broker's message group carrying a request.
//! 2. **Rate limiting**: a per-origin token bucket (via `burster`) rejects
//!    bursts with an `AllocationFailure` status.

use burster::Limiter;
use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info, warn};

use super::codec::FrameDecoder;
use super::messages::{Message, MessageBody};
use crate::app::commands::BrokerResponse;
use crate::app::ports::{EventSink, GattEngine, StoragePort};
use crate::app::service::Broker;
use crate::error::BrokerError;
use crate::types::{LOCAL_ORIGIN, OriginId};

/// Per-client decoding and rate-limit state.
struct ClientState {
    decoder: FrameDecoder,
    rate_limiter: burster::TokenBucket<fn() -> Duration>,
}

impl ClientState {
    fn new(requests_per_sec: u32) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            rate_limiter: burster::TokenBucket::new_with_time_provider(
                requests_per_sec.into(),
                requests_per_sec.into(),
                platform_now as fn() -> Duration,
            ),
        }
    }

    fn check_rate_limit(&mut self) -> bool {
        self.rate_limiter.try_consume(1).is_ok()
    }
}

/// Multi-client request dispatcher.
pub struct RpcEngine {
    clients: BTreeMap<OriginId, ClientState>,
    requests_per_sec: u32,
}

impl RpcEngine {
    pub fn new(requests_per_sec: u32) -> Self {
        Self {
            clients: BTreeMap::new(),
            requests_per_sec,
        }
    }

    /// Feed raw bytes from `origin` and dispatch every complete frame.
    ///
    /// Returns the response frames to send back, in request order.
    pub fn feed_bytes<E, S, K>(&mut self, origin: OriginId, data: &[u8], broker: &Broker<E, S, K>) -> Vec<Vec<u8>>
    where
        E: GattEngine,
        S: StoragePort,
        K: EventSink,
    {
        if origin == LOCAL_ORIGIN {
            warn!("RPC[{}]: origin reserved for in-process subscribers", origin);
            return Vec::new();
        }

        let rate = self.requests_per_sec;
        let client = self.clients.entry(origin).or_insert_with(|| {
            info!("RPC[{}]: client attached", origin);
            ClientState::new(rate)
        });
        let mut frames = Vec::new();
        client.decoder.feed(data, |f| frames.push(f.to_vec()));

        frames
            .iter()
            .filter_map(|frame| self.dispatch(origin, frame, broker))
            .collect()
    }

    /// Dispatch one complete frame payload. Returns the response frame.
    pub fn dispatch<E, S, K>(&mut self, origin: OriginId, payload: &[u8], broker: &Broker<E, S, K>) -> Option<Vec<u8>>
    where
        E: GattEngine,
        S: StoragePort,
        K: EventSink,
    {
        let msg = match Message::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("RPC[{}]: invalid message: {}", origin, e);
                return None;
            }
        };
        let MessageBody::Request(request) = msg.body else {
            warn!("RPC[{}]: unexpected non-request message 0x{:05X}", origin, msg.header.function);
            return None;
        };

        // ── Gate: rate limiting ───────────────────────────────
        let rate = self.requests_per_sec;
        let client = self.clients.entry(origin).or_insert_with(|| ClientState::new(rate));
        let response = if client.check_rate_limit() {
            debug!("RPC[{}]: request 0x{:04X} (msg {})", origin, msg.header.function, msg.header.message_id);
            broker.handle_request(origin, request)
        } else {
            warn!("RPC[{}]: rate limit exceeded", origin);
            BrokerResponse::error(BrokerError::AllocationFailure.status())
        };

        match Message::response(&msg.header, response).to_frame() {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("RPC[{}]: response 0x{:04X} not sent: {}", origin, msg.header.function, e);
                None
            }
        }
    }

    /// The client at `origin` went away: forget its stream state and
    /// destroy its subscribers.
    pub fn client_disconnected<E, S, K>(&mut self, origin: OriginId, broker: &Broker<E, S, K>)
    where
        E: GattEngine,
        S: StoragePort,
        K: EventSink,
    {
        if let Some(client) = self.clients.remove(&origin) {
            if client.decoder.is_mid_frame() {
                debug!("RPC[{}]: partial frame discarded", origin);
            }
        }
        match broker.remove_origin(origin) {
            Ok(n) => info!("RPC[{}]: client detached, {} subscribers removed", origin, n),
            Err(e) => warn!("RPC[{}]: cleanup failed: {}", origin, e),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}
