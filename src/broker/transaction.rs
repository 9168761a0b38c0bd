//! Transaction Tracker.
//!
//! The engine hands out transaction ids from one global space and says
//! nothing about what an id was for. Each outstanding id is therefore
//! filed under the subscriber that caused it together with its purpose,
//! and resolved by scanning every subscriber when the completion arrives.

use log::debug;
use serde::{Deserialize, Serialize};

use super::subscriber::SubscriberRegistry;
use crate::error::{BrokerError, Result};
use crate::types::{
    BdAddr, Characteristic, InstanceId, OriginId, SYSTEM_SUBSCRIBER, SubscriberId, TransactionId,
};

/// Attribute a read transaction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadTarget {
    SensorFeatures,
    SensorLocation,
    /// Client configuration of a characteristic (system re-read).
    Cccd(Characteristic),
    /// Measurement server configuration (system re-read).
    MeasurementSccd,
}

/// What an outstanding engine operation is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Enable(Characteristic),
    Disable(Characteristic),
    EnableBroadcast,
    DisableBroadcast,
    WriteControlPoint,
    Read(ReadTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub address: BdAddr,
    pub instance: InstanceId,
}

/// A transaction popped from the tracker, with its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub subscriber: SubscriberId,
    pub origin: OriginId,
    pub transaction: Transaction,
}

impl SubscriberRegistry {
    /// File `txn` under `subscriber`.
    ///
    /// The system subscriber is not capacity limited; a reconnect re-read
    /// may issue several reads per instance.
    pub fn add_transaction(&mut self, subscriber: SubscriberId, txn: Transaction) -> Result<()> {
        let limit = self.max_transactions;
        let s = self.find_mut(subscriber).ok_or(BrokerError::SubscriberNotFound)?;
        if subscriber != SYSTEM_SUBSCRIBER && s.transactions.len() >= limit {
            return Err(BrokerError::AllocationFailure);
        }
        s.transactions.push(txn);
        Ok(())
    }

    /// Whether `subscriber` can take one more transaction.
    pub fn has_transaction_room(&self, subscriber: SubscriberId) -> Result<()> {
        let s = self.find(subscriber).ok_or(BrokerError::SubscriberNotFound)?;
        if subscriber != SYSTEM_SUBSCRIBER && s.transactions.len() >= self.max_transactions {
            return Err(BrokerError::AllocationFailure);
        }
        Ok(())
    }

    /// Find and remove the first transaction with `id` across all subscribers.
    ///
    /// A hit is already removed; a second call with the same id misses.
    pub fn take_by_transaction(&mut self, id: TransactionId) -> Option<Resolved> {
        for s in self.iter_mut() {
            if let Some(pos) = s.transactions.iter().position(|t| t.id == id) {
                let transaction = s.transactions.remove(pos);
                return Some(Resolved {
                    subscriber: s.id,
                    origin: s.origin,
                    transaction,
                });
            }
        }
        debug!("Broker: no pending transaction {}", id);
        None
    }

    /// Forget every transaction `subscriber` has outstanding.
    pub fn discard_transactions(&mut self, subscriber: SubscriberId) -> usize {
        self.find_mut(subscriber).map_or(0, |s| {
            let n = s.transactions.len();
            s.transactions.clear();
            n
        })
    }
}
