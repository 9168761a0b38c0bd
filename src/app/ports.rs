//! Port traits: the hexagonal boundary between the broker and the outside world.
//!
//! ```text
//!   GATT engine ◀── GattEngine ──┐
//!                                ├── BrokerState (domain)
//!   Flash / file ◀── StoragePort ┘        │
//!                                         ▼
//!   IPC / log    ◀── EventSink ◀── Broker (delivery flush)
//! ```
//!
//! Adapters implement these traits. The [`Broker`](super::service::Broker)
//! consumes them via generics, so the domain core never touches a radio,
//! a file or a socket directly.

use crate::app::events::BrokerEvent;
use crate::error::EngineError;
use crate::types::{BdAddr, OriginId, SubscriberId, TransactionId};

// ───────────────────────────────────────────────────────────────
// GATT engine port (driven adapter: domain → radio stack)
// ───────────────────────────────────────────────────────────────

/// The external GATT engine. Every call is asynchronous on the remote
/// side: it returns a transaction id immediately and the outcome arrives
/// later as an [`EngineEvent`](super::events::EngineEvent) carrying the
/// same id.
pub trait GattEngine {
    /// Write `value` to the attribute at `handle`.
    fn write_value(&mut self, address: BdAddr, handle: u16, value: &[u8]) -> Result<TransactionId, EngineError>;

    /// Read the attribute at `handle`.
    fn read_value(&mut self, address: BdAddr, handle: u16) -> Result<TransactionId, EngineError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → remote subscribers)
// ───────────────────────────────────────────────────────────────

/// Receives events for subscribers living behind a remote origin.
///
/// Called without the broker lock held, in production order.
pub trait EventSink {
    fn deliver(&mut self, origin: OriginId, subscriber: SubscriberId, event: &BrokerEvent);
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ persistent store)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for bonded-device entries.
///
/// Keys are namespaced so the broker's entries never collide with other
/// users of the same store.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from loading or validating [`BrokerConfig`](crate::config::BrokerConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The config document failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Store is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored blob could not be decoded.
    Corrupted,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored data corrupted"),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
