//! Subscriber Registry.
//!
//! A subscriber is either an in-process callback (origin
//! [`LOCAL_ORIGIN`]) or a remote IPC client identified by its origin id.
//! Each one owns its standing subscriptions and the transactions it has
//! outstanding with the engine.
//!
//! Subscriber zero is the system subscriber: always present, never
//! removable, never delivered to. Automatic re-reads run under it.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use super::transaction::Transaction;
use crate::app::events::BrokerEvent;
use crate::error::{BrokerError, Result};
use crate::types::{
    BdAddr, Characteristic, InstanceId, LOCAL_ORIGIN, OriginId, SYSTEM_SUBSCRIBER, SubscriberId,
};

/// In-process event handler. Invoked without the broker lock held.
pub type LocalCallback = Arc<dyn Fn(SubscriberId, &BrokerEvent) + Send + Sync>;

/// Ids stay below the sign bit so they survive the status-integer path.
const ID_LIMIT: SubscriberId = 0x8000_0000;

// ───────────────────────────────────────────────────────────────
// Subscription
// ───────────────────────────────────────────────────────────────

/// Standing interest in updates of one characteristic on one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub address: BdAddr,
    pub instance: InstanceId,
    pub characteristic: Characteristic,
}

// ───────────────────────────────────────────────────────────────
// Subscriber
// ───────────────────────────────────────────────────────────────

pub struct Subscriber {
    pub id: SubscriberId,
    pub origin: OriginId,
    callback: Option<LocalCallback>,
    pub(crate) subscriptions: Vec<Subscription>,
    pub(crate) transactions: Vec<Transaction>,
}

impl core::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("local", &self.callback.is_some())
            .field("subscriptions", &self.subscriptions)
            .field("transactions", &self.transactions)
            .finish()
    }
}

impl Subscriber {
    pub fn is_local(&self) -> bool {
        self.origin == LOCAL_ORIGIN
    }

    pub fn callback(&self) -> Option<&LocalCallback> {
        self.callback.as_ref()
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn has_subscription(&self, sub: &Subscription) -> bool {
        self.subscriptions.contains(sub)
    }

    /// Record a subscription. Returns `Ok(false)` for a duplicate.
    pub fn add_subscription(&mut self, sub: Subscription, capacity: usize) -> Result<bool> {
        if self.has_subscription(&sub) {
            return Ok(false);
        }
        if self.subscriptions.len() >= capacity {
            return Err(BrokerError::AllocationFailure);
        }
        self.subscriptions.push(sub);
        Ok(true)
    }

    pub fn remove_subscription(&mut self, sub: &Subscription) -> bool {
        match self.subscriptions.iter().position(|s| s == sub) {
            Some(pos) => {
                self.subscriptions.remove(pos);
                true
            }
            None => false,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────

pub struct SubscriberRegistry {
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    next_id: SubscriberId,
    capacity: usize,
    pub(crate) max_subscriptions: usize,
    pub(crate) max_transactions: usize,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize, max_subscriptions: usize, max_transactions: usize) -> Self {
        let mut subscribers = BTreeMap::new();
        subscribers.insert(
            SYSTEM_SUBSCRIBER,
            Subscriber {
                id: SYSTEM_SUBSCRIBER,
                origin: LOCAL_ORIGIN,
                callback: None,
                subscriptions: Vec::new(),
                transactions: Vec::new(),
            },
        );
        Self {
            subscribers,
            next_id: 1,
            capacity,
            max_subscriptions,
            max_transactions,
        }
    }

    fn alloc_id(&mut self) -> SubscriberId {
        loop {
            let id = self.next_id;
            self.next_id += 1;
            if self.next_id & ID_LIMIT != 0 {
                self.next_id = 1;
            }
            if !self.subscribers.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register a subscriber.
    ///
    /// Local subscribers must supply a callback. Remote ones never carry
    /// one; their events are routed to `origin` through the event sink.
    pub fn register(&mut self, origin: OriginId, callback: Option<LocalCallback>) -> Result<SubscriberId> {
        let callback = match (origin, callback) {
            (LOCAL_ORIGIN, None) => return Err(BrokerError::InvalidParameter),
            (LOCAL_ORIGIN, cb) => cb,
            (_, _) => None,
        };
        if self.subscribers.len() >= self.capacity {
            return Err(BrokerError::AllocationFailure);
        }

        let id = self.alloc_id();
        self.subscribers.insert(
            id,
            Subscriber {
                id,
                origin,
                callback,
                subscriptions: Vec::new(),
                transactions: Vec::new(),
            },
        );
        info!("Broker: subscriber {} registered (origin {})", id, origin);
        Ok(id)
    }

    /// Remove a subscriber, discarding its subscriptions and transactions.
    pub fn unregister(&mut self, id: SubscriberId) -> Result<Subscriber> {
        if id == SYSTEM_SUBSCRIBER {
            return Err(BrokerError::InvalidParameter);
        }
        let sub = self.subscribers.remove(&id).ok_or(BrokerError::SubscriberNotFound)?;
        info!(
            "Broker: subscriber {} unregistered ({} subscriptions, {} pending dropped)",
            id,
            sub.subscriptions.len(),
            sub.transactions.len()
        );
        Ok(sub)
    }

    /// Remove every subscriber belonging to a remote origin.
    pub fn remove_origin(&mut self, origin: OriginId) -> Vec<Subscriber> {
        if origin == LOCAL_ORIGIN {
            return Vec::new();
        }
        let ids: Vec<_> = self
            .subscribers
            .values()
            .filter(|s| s.origin == origin)
            .map(|s| s.id)
            .collect();
        let removed: Vec<_> = ids.iter().filter_map(|id| self.subscribers.remove(id)).collect();
        if !removed.is_empty() {
            info!("Broker: origin {} gone, {} subscribers removed", origin, removed.len());
        }
        removed
    }

    pub fn find(&self, id: SubscriberId) -> Option<&Subscriber> {
        self.subscribers.get(&id)
    }

    pub fn find_mut(&mut self, id: SubscriberId) -> Option<&mut Subscriber> {
        self.subscribers.get_mut(&id)
    }

    /// Subscribers in registry order, system subscriber first.
    pub fn iter(&self) -> impl Iterator<Item = &Subscriber> {
        self.subscribers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Subscriber> {
        self.subscribers.values_mut()
    }

    /// Whether any subscriber other than `except` holds `sub`.
    pub fn held_by_others(&self, sub: &Subscription, except: SubscriberId) -> bool {
        self.subscribers
            .values()
            .any(|s| s.id != except && s.has_subscription(sub))
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Drop everyone except the system subscriber, and its pending work.
    pub fn clear(&mut self) {
        self.subscribers.retain(|id, _| *id == SYSTEM_SUBSCRIBER);
        if let Some(system) = self.subscribers.get_mut(&SYSTEM_SUBSCRIBER) {
            system.transactions.clear();
            system.subscriptions.clear();
        }
    }

    /// Point every subscription at a re-resolved device address.
    pub fn rebind_address(&mut self, from: &BdAddr, to: BdAddr) {
        for s in self.subscribers.values_mut() {
            for sub in s.subscriptions.iter_mut().filter(|sub| sub.address == *from) {
                sub.address = to;
            }
            for txn in s.transactions.iter_mut().filter(|t| t.address == *from) {
                txn.address = to;
            }
        }
    }
}
