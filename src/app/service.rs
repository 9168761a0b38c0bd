//! Broker service: the hexagonal core's single entry point.
//!
//! [`Broker`] wraps the [`BrokerState`] in the broker lock and exposes
//! every operation the outside world may trigger: local calls, decoded
//! IPC requests, engine events, device events and timer ticks.
//!
//! ```text
//!  local API ──┐
//!  IPC request ┤    ┌──────────────────────────┐    ┌─ local callback
//!  EngineEvent ┼──▶ │ lock · BrokerState · drop │ ──▶┤
//!  DeviceEvent ┤    └──────────────────────────┘    └─ EventSink (remote)
//!  tick ───────┘          queued deliveries
//! ```
//!
//! Events are produced under the lock but delivered after it is released,
//! so a callback may call straight back into the broker. A panicking
//! callback is caught and logged.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;

use log::{debug, info, warn};

use crate::broker::procedure::ProcedureState;
use crate::broker::subscriber::{LocalCallback, Subscription};
use crate::broker::transaction::{ReadTarget, Transaction};
use crate::broker::{BrokerState, Delivery, DeliveryTarget};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::protocol::ProcedureRequest;
use crate::types::{BdAddr, Characteristic, InstanceId, LOCAL_ORIGIN, OriginId, SubscriberId, TransactionId};

use super::commands::{BrokerRequest, BrokerResponse, InstanceRecord, ReadableAttribute};
use super::events::{DeviceEvent, EngineEvent};
use super::ports::{EventSink, GattEngine, StoragePort};

// ───────────────────────────────────────────────────────────────
// Broker
// ───────────────────────────────────────────────────────────────

pub struct Broker<E, S, K> {
    state: Mutex<BrokerState<E, S>>,
    sink: Mutex<K>,
}

impl<E: GattEngine, S: StoragePort, K: EventSink> Broker<E, S, K> {
    /// Construct the broker. Nothing is accepted until [`start`](Self::start).
    pub fn new(config: BrokerConfig, engine: E, storage: S, sink: K) -> Self {
        Self {
            state: Mutex::new(BrokerState::new(config, engine, storage)),
            sink: Mutex::new(sink),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(&self) -> Result<()> {
        let mut state = self.lock()?;
        if state.is_initialized() {
            debug!("Broker: already started");
            return Ok(());
        }
        if let Err(e) = state.config().validate() {
            warn!("Broker: refusing to start: {}", e);
            return Err(BrokerError::InvalidParameter);
        }
        state.set_initialized(true);
        info!("Broker: started");
        Ok(())
    }

    /// Drop every entity, subscriber and timer. Requests fail with
    /// `NotInitialized` until the next [`start`](Self::start).
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.ensure_initialized()?;
        state.reset();
        state.set_initialized(false);
        info!("Broker: shut down");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().map(|s| s.is_initialized()).unwrap_or(false)
    }

    // ── Subscribers ──────────────────────────────────────────

    /// Register an in-process subscriber. The callback is mandatory.
    pub fn register_local(&self, callback: Option<LocalCallback>) -> Result<SubscriberId> {
        self.run(|s| s.register(LOCAL_ORIGIN, callback))
    }

    /// Register a subscriber whose events go to a remote `origin`.
    pub fn register_remote(&self, origin: OriginId) -> Result<SubscriberId> {
        if origin == LOCAL_ORIGIN {
            return Err(BrokerError::InvalidParameter);
        }
        self.run(|s| s.register(origin, None))
    }

    pub fn unregister(&self, subscriber: SubscriberId) -> Result<()> {
        self.call(LOCAL_ORIGIN, BrokerRequest::Unregister { subscriber }).map(|_| ())
    }

    /// A remote client disconnected; destroy its subscribers.
    pub fn remove_origin(&self, origin: OriginId) -> Result<usize> {
        self.run(|s| Ok(s.remove_origin(origin)))
    }

    // ── Operations ───────────────────────────────────────────

    pub fn subscribe(
        &self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        characteristic: Characteristic,
        enable: bool,
    ) -> Result<u32> {
        self.call(
            LOCAL_ORIGIN,
            BrokerRequest::Subscribe {
                subscriber,
                address,
                instance,
                characteristic,
                enable,
            },
        )
    }

    pub fn unsubscribe(
        &self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        characteristic: Characteristic,
    ) -> Result<u32> {
        self.call(
            LOCAL_ORIGIN,
            BrokerRequest::Unsubscribe {
                subscriber,
                address,
                instance,
                characteristic,
            },
        )
    }

    pub fn enable_broadcast(&self, subscriber: SubscriberId, address: BdAddr, instance: InstanceId) -> Result<TransactionId> {
        self.call(LOCAL_ORIGIN, BrokerRequest::EnableBroadcast { subscriber, address, instance })
    }

    pub fn disable_broadcast(&self, subscriber: SubscriberId, address: BdAddr, instance: InstanceId) -> Result<TransactionId> {
        self.call(LOCAL_ORIGIN, BrokerRequest::DisableBroadcast { subscriber, address, instance })
    }

    pub fn read_attribute(
        &self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        attribute: ReadableAttribute,
    ) -> Result<TransactionId> {
        self.call(
            LOCAL_ORIGIN,
            BrokerRequest::ReadAttribute {
                subscriber,
                address,
                instance,
                attribute,
            },
        )
    }

    pub fn write_control_point(
        &self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        request: ProcedureRequest,
    ) -> Result<TransactionId> {
        self.call(
            LOCAL_ORIGIN,
            BrokerRequest::WriteControlPoint {
                subscriber,
                address,
                instance,
                request,
            },
        )
    }

    /// Total number of known sensors and up to `max` of their addresses.
    pub fn list_entities(&self, max: usize) -> Result<(usize, Vec<BdAddr>)> {
        self.run(|s| Ok(s.list_entities(max)))
    }

    pub fn list_instances(&self, address: BdAddr, max: usize) -> Result<(usize, Vec<InstanceRecord>)> {
        self.run(|s| s.list_instances(&address, max))
    }

    // ── Inbound traffic ──────────────────────────────────────

    /// Serve a decoded IPC request on behalf of `origin`.
    pub fn handle_request(&self, origin: OriginId, request: BrokerRequest) -> BrokerResponse {
        match request {
            BrokerRequest::Register => BrokerResponse::from_result(self.register_remote(origin)),
            BrokerRequest::ListEntities { max } => match self.list_entities(max as usize) {
                Ok((total, addresses)) => BrokerResponse::Entities {
                    status: 0,
                    total: total as u32,
                    addresses,
                },
                Err(e) => BrokerResponse::Entities {
                    status: e.status(),
                    total: 0,
                    addresses: Vec::new(),
                },
            },
            BrokerRequest::ListInstances { address, max } => match self.list_instances(address, max as usize) {
                Ok((total, records)) => BrokerResponse::Instances {
                    status: 0,
                    total: total as u32,
                    records,
                },
                Err(e) => BrokerResponse::Instances {
                    status: e.status(),
                    total: 0,
                    records: Vec::new(),
                },
            },
            other => BrokerResponse::from_result(self.call(origin, other)),
        }
    }

    pub fn handle_engine_event(&self, event: EngineEvent) {
        if let Err(e) = self.run(|s| {
            s.handle_engine_event(event);
            Ok(())
        }) {
            debug!("Broker: engine event dropped: {}", e);
        }
    }

    pub fn handle_device_event(&self, event: DeviceEvent) {
        if let Err(e) = self.run(|s| {
            s.handle_device_event(event);
            Ok(())
        }) {
            debug!("Broker: device event dropped: {}", e);
        }
    }

    /// Advance procedure timers by `elapsed_ms`.
    pub fn tick(&self, elapsed_ms: u32) {
        if let Err(e) = self.run(|s| {
            s.expire_procedures(elapsed_ms);
            Ok(())
        }) {
            debug!("Timer: tick skipped: {}", e);
        }
    }

    // ── Inspection ───────────────────────────────────────────

    pub fn procedure_state(&self, address: BdAddr, instance: InstanceId) -> Result<ProcedureState> {
        self.run(|s| s.procedure_state(&address, instance))
    }

    pub fn subscriptions(&self, subscriber: SubscriberId) -> Result<Vec<Subscription>> {
        self.run(|s| {
            let sub = s.subscribers().find(subscriber).ok_or(BrokerError::SubscriberNotFound)?;
            Ok(sub.subscriptions().to_vec())
        })
    }

    pub fn pending_transactions(&self, subscriber: SubscriberId) -> Result<Vec<Transaction>> {
        self.run(|s| {
            let sub = s.subscribers().find(subscriber).ok_or(BrokerError::SubscriberNotFound)?;
            Ok(sub.transactions().to_vec())
        })
    }

    pub fn instance_state(&self, address: BdAddr, instance: InstanceId) -> Result<InstanceRecord> {
        self.run(|s| Ok(s.entities().find_instance(&address, instance)?.record()))
    }

    /// Run `f` against the locked state without the started check.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut BrokerState<E, S>) -> R) -> Result<R> {
        let mut state = self.lock()?;
        Ok(f(&mut state))
    }

    // ── Internals ────────────────────────────────────────────

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BrokerState<E, S>>> {
        self.state.lock().map_err(|_| {
            warn!("Broker: lock poisoned");
            BrokerError::LockUnavailable
        })
    }

    /// Lock, check started, run `op`, release, then deliver what `op` queued.
    fn run<T>(&self, op: impl FnOnce(&mut BrokerState<E, S>) -> Result<T>) -> Result<T> {
        let (result, outbox) = {
            let mut state = self.lock()?;
            state.ensure_initialized()?;
            let result = op(&mut state);
            (result, state.take_outbox())
        };
        self.flush(outbox);
        result
    }

    /// Subscriber-scoped operations, checked against the calling origin.
    fn call(&self, origin: OriginId, request: BrokerRequest) -> Result<u32> {
        let Some(subscriber) = request.subscriber() else {
            return Err(BrokerError::InvalidParameter);
        };
        self.run(|s| {
            s.check_owner(subscriber, origin)?;
            apply(s, subscriber, request)
        })
    }

    fn flush(&self, outbox: Vec<Delivery>) {
        for delivery in outbox {
            let Delivery {
                subscriber,
                target,
                event,
            } = delivery;
            match target {
                DeliveryTarget::Local(callback) => {
                    if catch_unwind(AssertUnwindSafe(|| callback(subscriber, &event))).is_err() {
                        warn!("Broker: callback of subscriber {} panicked", subscriber);
                    }
                }
                DeliveryTarget::Remote(origin) => match self.sink.lock() {
                    Ok(mut sink) => sink.deliver(origin, subscriber, &event),
                    Err(_) => warn!("Broker: event sink unavailable, event for {} dropped", subscriber),
                },
            }
        }
    }
}

fn apply<E: GattEngine, S: StoragePort>(
    s: &mut BrokerState<E, S>,
    subscriber: SubscriberId,
    request: BrokerRequest,
) -> Result<u32> {
    match request {
        BrokerRequest::Unregister { .. } => s.unregister(subscriber).map(|_| 0),
        BrokerRequest::Subscribe {
            address,
            instance,
            characteristic,
            enable,
            ..
        } => s.subscribe(subscriber, address, instance, characteristic, enable),
        BrokerRequest::Unsubscribe {
            address,
            instance,
            characteristic,
            ..
        } => s.unsubscribe(subscriber, address, instance, characteristic),
        BrokerRequest::EnableBroadcast { address, instance, .. } => s.set_broadcast(subscriber, address, instance, true),
        BrokerRequest::DisableBroadcast { address, instance, .. } => s.set_broadcast(subscriber, address, instance, false),
        BrokerRequest::ReadAttribute {
            address,
            instance,
            attribute,
            ..
        } => {
            let target = match attribute {
                ReadableAttribute::SensorFeatures => ReadTarget::SensorFeatures,
                ReadableAttribute::SensorLocation => ReadTarget::SensorLocation,
            };
            s.read_attribute(subscriber, address, instance, target)
        }
        BrokerRequest::WriteControlPoint {
            address,
            instance,
            request,
            ..
        } => s.write_control_point(subscriber, address, instance, &request),
        BrokerRequest::Register | BrokerRequest::ListEntities { .. } | BrokerRequest::ListInstances { .. } => {
            Err(BrokerError::InvalidParameter)
        }
    }
}
