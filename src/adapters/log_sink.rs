//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing every remote-bound event to the
//! logger. Useful when no IPC transport is attached, and as the default
//! sink in tools and tests.

use log::info;

use crate::app::events::BrokerEvent;
use crate::app::ports::EventSink;
use crate::types::{OriginId, SubscriberId};

/// Adapter that logs every [`BrokerEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink {
    delivered: u64,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events seen so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl EventSink for LogEventSink {
    fn deliver(&mut self, origin: OriginId, subscriber: SubscriberId, event: &BrokerEvent) {
        self.delivered += 1;
        match event {
            BrokerEvent::Connected {
                address,
                instance_count,
            } => {
                info!("EVENT[{}/{}] | connected {} ({} instances)", origin, subscriber, address, instance_count);
            }
            BrokerEvent::Disconnected { address } => {
                info!("EVENT[{}/{}] | disconnected {}", origin, subscriber, address);
            }
            BrokerEvent::WriteResponse {
                kind,
                address,
                instance,
                transaction,
                status,
            } => {
                info!(
                    "EVENT[{}/{}] | {:?} {}/{} txn={} status={}",
                    origin, subscriber, kind, address, instance, transaction, status
                );
            }
            BrokerEvent::Measurement { address, instance, data } => {
                info!(
                    "EVENT[{}/{}] | measurement {}/{} power={}W flags=0x{:04X}",
                    origin, subscriber, address, instance, data.instantaneous_power, data.flags
                );
            }
            BrokerEvent::Vector { address, instance, data } => {
                info!(
                    "EVENT[{}/{}] | vector {}/{} {:?} magnitudes={}",
                    origin,
                    subscriber,
                    address,
                    instance,
                    data.direction(),
                    data.magnitudes.len()
                );
            }
            BrokerEvent::ControlPoint {
                address,
                instance,
                timeout,
                response,
            } => match response {
                Some(r) => info!(
                    "EVENT[{}/{}] | procedure 0x{:02X} on {}/{} -> {:?}",
                    origin, subscriber, r.request_opcode, address, instance, r.response_code
                ),
                None => info!(
                    "EVENT[{}/{}] | procedure on {}/{} timeout={}",
                    origin, subscriber, address, instance, timeout
                ),
            },
            BrokerEvent::SensorFeatures {
                address,
                instance,
                features,
                status,
                ..
            } => {
                info!(
                    "EVENT[{}/{}] | features {}/{} = 0x{:08X} status={}",
                    origin, subscriber, address, instance, features, status
                );
            }
            BrokerEvent::SensorLocation {
                address,
                instance,
                location,
                status,
                ..
            } => {
                info!(
                    "EVENT[{}/{}] | location {}/{} = {:?} status={}",
                    origin, subscriber, address, instance, location, status
                );
            }
        }
    }
}
