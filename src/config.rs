//! Broker configuration parameters
//!
//! All tunable limits and timings for the broker.
//! Values can be loaded from a JSON document or left at their defaults.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// Storage namespaces are limited to 15 characters plus terminator.
pub type Namespace = heapless::String<16>;

/// Core broker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    // --- Procedures ---
    /// Control-point procedure timeout (milliseconds)
    pub procedure_timeout_ms: u32,

    // --- Persistence ---
    /// Storage namespace holding the bonded-sensor entries
    pub bonded_namespace: Namespace,
    /// Re-read attributes of bonded sensors when they reconnect
    pub reread_on_reconnect: bool,

    // --- Capacities ---
    /// Maximum registered subscribers (including the system subscriber)
    pub max_subscribers: usize,
    /// Maximum subscriptions held by a single subscriber
    pub max_subscriptions_per_subscriber: usize,
    /// Maximum outstanding transactions per subscriber
    pub max_pending_transactions: usize,
    /// Maximum service instances recorded per sensor
    pub max_instances_per_entity: usize,

    // --- Timing ---
    /// Worker tick that drives procedure timers (milliseconds)
    pub timer_tick_ms: u32,
    /// IPC requests accepted per second from one origin
    pub ipc_requests_per_sec: u32,
}

/// ATT transaction timeout, in seconds.
const ATT_TIMEOUT_SECS: u32 = 30;

impl Default for BrokerConfig {
    fn default() -> Self {
        let mut bonded_namespace = Namespace::new();
        // Fits: 14 characters.
        let _ = bonded_namespace.push_str("CPPM-Collector");

        Self {
            // Procedures
            procedure_timeout_ms: ATT_TIMEOUT_SECS * 1000,

            // Persistence
            bonded_namespace,
            reread_on_reconnect: true,

            // Capacities
            max_subscribers: 32,
            max_subscriptions_per_subscriber: 64,
            max_pending_transactions: 16,
            max_instances_per_entity: 8,

            // Timing
            timer_tick_ms: 100,      // 10 Hz
            ipc_requests_per_sec: 20,
        }
    }
}

impl BrokerConfig {
    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|_| ConfigError::Corrupted)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would leave the broker unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_subscribers < 2 {
            // The system subscriber always occupies one slot.
            return Err(ConfigError::ValidationFailed("max_subscribers must be at least 2"));
        }
        if self.max_subscriptions_per_subscriber == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_subscriptions_per_subscriber must be non-zero",
            ));
        }
        if self.max_pending_transactions == 0 {
            return Err(ConfigError::ValidationFailed("max_pending_transactions must be non-zero"));
        }
        if self.max_instances_per_entity == 0 {
            return Err(ConfigError::ValidationFailed("max_instances_per_entity must be non-zero"));
        }
        if self.timer_tick_ms == 0 {
            return Err(ConfigError::ValidationFailed("timer_tick_ms must be non-zero"));
        }
        if self.procedure_timeout_ms < self.timer_tick_ms {
            return Err(ConfigError::ValidationFailed(
                "procedure_timeout_ms shorter than one timer tick",
            ));
        }
        if self.ipc_requests_per_sec == 0 {
            return Err(ConfigError::ValidationFailed("ipc_requests_per_sec must be non-zero"));
        }
        if self.bonded_namespace.is_empty() {
            return Err(ConfigError::ValidationFailed("bonded_namespace must not be empty"));
        }
        Ok(())
    }
}
