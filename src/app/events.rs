//! Events crossing the broker boundary.
//!
//! [`BrokerEvent`]s go out to subscribers, either through a local callback
//! or through the [`EventSink`](super::ports::EventSink) port. The
//! engine and the device manager feed the broker with [`EngineEvent`]s and
//! [`DeviceEvent`]s.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::protocol::{ControlPointResponse, MeasurementData, SensorLocation, VectorData};
use crate::types::{BdAddr, InstanceId, ServiceHandles, TransactionId};

// ───────────────────────────────────────────────────────────────
// Outbound
// ───────────────────────────────────────────────────────────────

/// Which operation a [`BrokerEvent::WriteResponse`] acknowledges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteResponseKind {
    MeasurementsSet,
    VectorsSet,
    ProceduresSet,
    BroadcastsSet,
    ProcedureBegun,
}

/// Structured events delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerEvent {
    /// A sensor was seen for the first time since it was last removed.
    Connected { address: BdAddr, instance_count: u32 },

    Disconnected { address: BdAddr },

    /// Outcome of a configuration or control-point write.
    WriteResponse {
        kind: WriteResponseKind,
        address: BdAddr,
        instance: InstanceId,
        transaction: TransactionId,
        status: i32,
    },

    Measurement { address: BdAddr, instance: InstanceId, data: MeasurementData },

    Vector { address: BdAddr, instance: InstanceId, data: VectorData },

    /// Result of a control-point procedure. `response` is `None` on timeout.
    ControlPoint {
        address: BdAddr,
        instance: InstanceId,
        timeout: bool,
        response: Option<ControlPointResponse>,
    },

    SensorFeatures {
        address: BdAddr,
        instance: InstanceId,
        transaction: TransactionId,
        features: u32,
        status: i32,
    },

    SensorLocation {
        address: BdAddr,
        instance: InstanceId,
        transaction: TransactionId,
        location: Option<SensorLocation>,
        status: i32,
    },
}

impl BrokerEvent {
    /// IPC function code of this event.
    pub const fn function(&self) -> u32 {
        match self {
            Self::Connected { .. } => 0x10001,
            Self::Disconnected { .. } => 0x10002,
            Self::WriteResponse { .. } => 0x11003,
            Self::Measurement { .. } => 0x11004,
            Self::Vector { .. } => 0x11005,
            Self::ControlPoint { .. } => 0x11006,
            Self::SensorFeatures { .. } => 0x11007,
            Self::SensorLocation { .. } => 0x11008,
        }
    }

    pub fn address(&self) -> BdAddr {
        match self {
            Self::Connected { address, .. }
            | Self::Disconnected { address }
            | Self::WriteResponse { address, .. }
            | Self::Measurement { address, .. }
            | Self::Vector { address, .. }
            | Self::ControlPoint { address, .. }
            | Self::SensorFeatures { address, .. }
            | Self::SensorLocation { address, .. } => *address,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Inbound
// ───────────────────────────────────────────────────────────────

/// Asynchronous callbacks from the GATT engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Notification (`indication == false`) or indication from the sensor.
    HandleValue {
        address: BdAddr,
        handle: u16,
        indication: bool,
        value: Vec<u8>,
    },
    ReadResponse {
        address: BdAddr,
        transaction: TransactionId,
        handle: u16,
        value: Vec<u8>,
    },
    WriteResponse {
        address: BdAddr,
        transaction: TransactionId,
        handle: u16,
    },
    ErrorResponse {
        address: BdAddr,
        transaction: TransactionId,
        handle: u16,
        error: EngineError,
    },
}

/// Connection and pairing changes reported by the device manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Connected with service discovery complete. `services` holds one
    /// handle table per Cycling Power service instance found.
    Connected { address: BdAddr, services: Vec<ServiceHandles> },
    Disconnected { address: BdAddr },
    /// The device record was deleted from the device manager.
    Deleted { address: BdAddr },
    Paired { address: BdAddr },
    Unpaired { address: BdAddr },
    /// A resolvable private address was resolved to a new identity.
    AddressChanged { previous: BdAddr, current: BdAddr },
    /// The local radio went down.
    PoweredOff,
}
