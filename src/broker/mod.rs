//! Broker core: registries, multiplexing and procedures.
//!
//! ```text
//!   request ──▶ SubscriberRegistry ──▶ GattEngine ──▶ txn id
//!                     │                                  │
//!                     ▼                                  ▼
//!              Transaction Tracker ◀── completion ── EngineEvent
//!                     │
//!                     ▼
//!            Subscription Multiplexer ──▶ outbox ──▶ callbacks / IPC
//! ```
//!
//! [`BrokerState`] owns every registry and is only ever touched under the
//! broker lock held by [`Broker`](crate::app::service::Broker). It never
//! calls subscriber code itself: events are queued as [`Delivery`] values
//! and flushed by the service once the lock is released.

pub mod bonding;
pub mod completion;
pub mod entity;
pub mod lifecycle;
pub mod multiplexer;
pub mod procedure;
pub mod subscriber;
pub mod transaction;

use log::debug;

use crate::app::events::BrokerEvent;
use crate::app::ports::{GattEngine, StoragePort};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::timer::TimerQueue;
use crate::types::{BdAddr, OriginId, SYSTEM_SUBSCRIBER, SubscriberId};

use entity::{EntityRegistry, InstanceRecord};
use procedure::ProcedureKey;
use subscriber::{LocalCallback, Subscriber, SubscriberRegistry};

/// Where a queued event goes.
#[derive(Clone)]
pub enum DeliveryTarget {
    Local(LocalCallback),
    Remote(OriginId),
}

/// One event queued for one subscriber.
#[derive(Clone)]
pub struct Delivery {
    pub subscriber: SubscriberId,
    pub target: DeliveryTarget,
    pub event: BrokerEvent,
}

/// Everything the broker lock protects.
pub struct BrokerState<E, S> {
    pub(crate) config: BrokerConfig,
    pub(crate) entities: EntityRegistry,
    pub(crate) subscribers: SubscriberRegistry,
    pub(crate) timers: TimerQueue<ProcedureKey>,
    pub(crate) engine: E,
    pub(crate) storage: S,
    outbox: Vec<Delivery>,
    initialized: bool,
}

impl<E: GattEngine, S: StoragePort> BrokerState<E, S> {
    pub fn new(config: BrokerConfig, engine: E, storage: S) -> Self {
        let subscribers = SubscriberRegistry::new(
            config.max_subscribers,
            config.max_subscriptions_per_subscriber,
            config.max_pending_transactions,
        );
        Self {
            config,
            entities: EntityRegistry::new(),
            subscribers,
            timers: TimerQueue::new(),
            engine,
            storage,
            outbox: Vec::new(),
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(BrokerError::NotInitialized)
        }
    }

    pub(crate) fn set_initialized(&mut self, on: bool) {
        self.initialized = on;
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Drain queued deliveries in the order they were produced.
    pub fn take_outbox(&mut self) -> Vec<Delivery> {
        core::mem::take(&mut self.outbox)
    }

    /// A request arriving over IPC may only act on its own subscribers.
    pub fn check_owner(&self, subscriber: SubscriberId, origin: OriginId) -> Result<()> {
        match self.subscribers.find(subscriber) {
            Some(s) if s.origin == origin && subscriber != SYSTEM_SUBSCRIBER => Ok(()),
            _ => Err(BrokerError::SubscriberNotFound),
        }
    }

    /// Queue `event` for one subscriber.
    ///
    /// Returns `false` when nobody can receive it: the subscriber is gone
    /// or is the system subscriber.
    pub(crate) fn queue_to(&mut self, subscriber: SubscriberId, event: BrokerEvent) -> bool {
        match self.subscribers.find(subscriber).and_then(|s| delivery_for(s, event)) {
            Some(d) => {
                self.outbox.push(d);
                true
            }
            None => {
                debug!("Broker: event for subscriber {} discarded", subscriber);
                false
            }
        }
    }

    /// Queue `event` for every subscriber except zero.
    pub(crate) fn queue_all(&mut self, event: &BrokerEvent) {
        let batch: Vec<Delivery> = self
            .subscribers
            .iter()
            .filter_map(|s| delivery_for(s, event.clone()))
            .collect();
        self.outbox.extend(batch);
    }

    // ── Listing ───────────────────────────────────────────────

    /// Total entity count and up to `max` addresses.
    pub fn list_entities(&self, max: usize) -> (usize, Vec<BdAddr>) {
        (self.entities.len(), self.entities.addresses().take(max).collect())
    }

    /// Total instance count of `address` and up to `max` records.
    pub fn list_instances(&self, address: &BdAddr, max: usize) -> Result<(usize, Vec<InstanceRecord>)> {
        let entity = self.entities.find(address).ok_or(BrokerError::InstanceNotFound)?;
        let records = entity.instances().iter().take(max).map(|i| i.record()).collect();
        Ok((entity.instances().len(), records))
    }
}

fn delivery_for(sub: &Subscriber, event: BrokerEvent) -> Option<Delivery> {
    if sub.id == SYSTEM_SUBSCRIBER {
        return None;
    }
    let target = match sub.callback() {
        Some(cb) if sub.is_local() => DeliveryTarget::Local(cb.clone()),
        _ => DeliveryTarget::Remote(sub.origin),
    };
    Some(Delivery {
        subscriber: sub.id,
        target,
        event,
    })
}
