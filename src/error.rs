//! Unified error types for the broker.
//!
//! Every fallible broker operation funnels into [`BrokerError`]. The request
//! path reports errors as negative status integers (see [`BrokerError::status`]),
//! so the same type round-trips through the IPC response messages.
//! All variants are `Copy` so they can be stamped into events without
//! allocation.

use core::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

pub const STATUS_SUCCESS: i32 = 0;
pub const STATUS_INVALID_PARAMETER: i32 = -1;
pub const STATUS_NOT_INITIALIZED: i32 = -2;
pub const STATUS_SUBSCRIBER_NOT_FOUND: i32 = -3;
pub const STATUS_INSTANCE_NOT_FOUND: i32 = -4;
pub const STATUS_ALLOCATION_FAILURE: i32 = -5;
pub const STATUS_LOCK_UNAVAILABLE: i32 = -6;
pub const STATUS_SUBSCRIPTION_NOT_FOUND: i32 = -7;
pub const STATUS_RESPONSE_MALFORMED: i32 = -8;
pub const STATUS_TRANSACTION_TIMEOUT: i32 = -9;
pub const STATUS_ENGINE_UNKNOWN: i32 = -10;

/// Engine refusal codes at or below this pass through verbatim; -1..-99
/// belong to the broker.
pub const ENGINE_CODE_MAX: i32 = -100;

// ---------------------------------------------------------------------------
// Top-level broker error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerError {
    /// A required argument was null/zero or referenced an absent attribute.
    InvalidParameter,
    /// The broker has not been started (or was shut down).
    NotInitialized,
    SubscriberNotFound,
    InstanceNotFound,
    /// The subscriber holds no subscription for the requested triple.
    SubscriptionNotFound,
    /// A registry or list reached its configured capacity.
    AllocationFailure,
    /// The broker lock could not be acquired (poisoned).
    LockUnavailable,
    /// A reply was shorter than its declared content requires.
    ResponseMalformed,
    /// Failure reported by the external GATT engine.
    Engine(EngineError),
}

impl BrokerError {
    /// Status integer used on the IPC request path and in event status fields.
    pub const fn status(self) -> i32 {
        match self {
            Self::InvalidParameter => STATUS_INVALID_PARAMETER,
            Self::NotInitialized => STATUS_NOT_INITIALIZED,
            Self::SubscriberNotFound => STATUS_SUBSCRIBER_NOT_FOUND,
            Self::InstanceNotFound => STATUS_INSTANCE_NOT_FOUND,
            Self::SubscriptionNotFound => STATUS_SUBSCRIPTION_NOT_FOUND,
            Self::AllocationFailure => STATUS_ALLOCATION_FAILURE,
            Self::LockUnavailable => STATUS_LOCK_UNAVAILABLE,
            Self::ResponseMalformed => STATUS_RESPONSE_MALFORMED,
            Self::Engine(e) => e.status(),
        }
    }

    /// Inverse of [`status`](Self::status). Returns `None` for success
    /// values (zero or positive transaction ids that are not ATT codes).
    ///
    /// Positive values are ambiguous on the request path (they are
    /// transaction ids there), so only event status fields should be
    /// passed here.
    pub fn from_status(status: i32) -> Option<Self> {
        match status {
            STATUS_SUCCESS => None,
            STATUS_INVALID_PARAMETER => Some(Self::InvalidParameter),
            STATUS_NOT_INITIALIZED => Some(Self::NotInitialized),
            STATUS_SUBSCRIBER_NOT_FOUND => Some(Self::SubscriberNotFound),
            STATUS_INSTANCE_NOT_FOUND => Some(Self::InstanceNotFound),
            STATUS_SUBSCRIPTION_NOT_FOUND => Some(Self::SubscriptionNotFound),
            STATUS_ALLOCATION_FAILURE => Some(Self::AllocationFailure),
            STATUS_LOCK_UNAVAILABLE => Some(Self::LockUnavailable),
            STATUS_RESPONSE_MALFORMED => Some(Self::ResponseMalformed),
            STATUS_TRANSACTION_TIMEOUT => Some(Self::Engine(EngineError::TransactionTimeout)),
            STATUS_ENGINE_UNKNOWN => Some(Self::Engine(EngineError::Unknown)),
            1..=0xFF => Some(Self::Engine(EngineError::Att(status as u8))),
            s if s <= ENGINE_CODE_MAX => Some(Self::Engine(EngineError::Code(s))),
            s if s < 0 => Some(Self::Engine(EngineError::Unknown)),
            _ => None,
        }
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::NotInitialized => write!(f, "broker not initialized"),
            Self::SubscriberNotFound => write!(f, "subscriber not found"),
            Self::InstanceNotFound => write!(f, "instance not found"),
            Self::SubscriptionNotFound => write!(f, "subscription not registered"),
            Self::AllocationFailure => write!(f, "allocation failure"),
            Self::LockUnavailable => write!(f, "broker lock unavailable"),
            Self::ResponseMalformed => write!(f, "response malformed"),
            Self::Engine(e) => write!(f, "engine: {e}"),
        }
    }
}

impl std::error::Error for BrokerError {}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Errors originating in the external GATT engine, either synchronously
/// (a refused read/write) or asynchronously (an error response event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    /// Numeric refusal code returned by the engine. Only codes at or below
    /// [`ENGINE_CODE_MAX`] keep their value as a status.
    Code(i32),
    /// ATT protocol error code carried by an error response.
    Att(u8),
    /// The engine gave up waiting for the remote response.
    TransactionTimeout,
    /// Any other engine failure (e.g. prepare-write data mismatch).
    Unknown,
}

impl EngineError {
    pub const fn status(self) -> i32 {
        match self {
            Self::Code(c) if c <= ENGINE_CODE_MAX => c,
            Self::Code(_) => STATUS_ENGINE_UNKNOWN,
            Self::Att(code) => code as i32,
            Self::TransactionTimeout => STATUS_TRANSACTION_TIMEOUT,
            Self::Unknown => STATUS_ENGINE_UNKNOWN,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(c) => write!(f, "engine code {c}"),
            Self::Att(code) => write!(f, "ATT error 0x{code:02X} ({})", att_error_name(*code)),
            Self::TransactionTimeout => write!(f, "transaction timeout"),
            Self::Unknown => write!(f, "unknown engine error"),
        }
    }
}

impl From<EngineError> for BrokerError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

/// Human-readable name for an ATT protocol error code.
pub fn att_error_name(code: u8) -> &'static str {
    match code {
        0x01 => "invalid handle",
        0x02 => "read not permitted",
        0x03 => "write not permitted",
        0x04 => "invalid PDU",
        0x05 => "insufficient authentication",
        0x06 => "request not supported",
        0x07 => "invalid offset",
        0x08 => "insufficient authorization",
        0x09 => "prepare queue full",
        0x0A => "attribute not found",
        0x0B => "attribute not long",
        0x0C => "insufficient encryption key size",
        0x0D => "invalid attribute value length",
        0x0E => "unlikely error",
        0x0F => "insufficient encryption",
        0x10 => "unsupported group type",
        0x11 => "insufficient resources",
        0xFD => "CCCD improperly configured",
        0xFE => "procedure already in progress",
        0xFF => "out of range",
        _ => "reserved",
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Broker-wide `Result` alias.
pub type Result<T> = core::result::Result<T, BrokerError>;
