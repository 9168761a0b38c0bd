//! Core identifiers and the per-instance attribute table.
//!
//! Every Cycling Power service instance discovered on a sensor resolves
//! a fixed set of attribute handles once at discovery time. Instead of
//! poking at struct offsets, the table is indexed by [`AttributeKind`],
//! and the three subscribable characteristics map onto their
//! `(value, client-config)` pairs through [`Characteristic`].
//!
//! ```text
//!  Characteristic ──▶ value handle   (AttributeKind::Measurement …)
//!                 └─▶ CCCD handle    (AttributeKind::MeasurementCccd …)
//!                 └─▶ state bit      (StateMask::MEASUREMENT …)
//! ```

use core::fmt;

use serde::{Deserialize, Serialize};

// ───────────────────────────────────────────────────────────────
// Identifiers
// ───────────────────────────────────────────────────────────────

/// Registered consumer of broker events.
pub type SubscriberId = u32;

/// Process that owns a subscriber. Zero is the broker process itself.
pub type OriginId = u32;

/// Service instance within an entity, sequential from 1.
pub type InstanceId = u32;

/// Engine-assigned identifier of one outstanding read or write.
pub type TransactionId = u32;

/// Origin value reserved for in-process subscribers.
pub const LOCAL_ORIGIN: OriginId = 0;

/// Permanent subscriber that performs automatic re-reads.
pub const SYSTEM_SUBSCRIBER: SubscriberId = 0;

/// 48-bit Bluetooth device address, stored in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const NULL: Self = Self([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0; 6]
    }

    pub const fn bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

// ───────────────────────────────────────────────────────────────
// Attribute table
// ───────────────────────────────────────────────────────────────

/// Every attribute handle an instance may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeKind {
    Measurement,
    MeasurementCccd,
    /// Server characteristic configuration (broadcast toggle).
    MeasurementSccd,
    Feature,
    SensorLocation,
    Vector,
    VectorCccd,
    ControlPoint,
    ControlPointCccd,
}

impl AttributeKind {
    pub const COUNT: usize = 9;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Measurement,
        Self::MeasurementCccd,
        Self::MeasurementSccd,
        Self::Feature,
        Self::SensorLocation,
        Self::Vector,
        Self::VectorCccd,
        Self::ControlPoint,
        Self::ControlPointCccd,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

/// Handles resolved for one service instance. Zero means "absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceHandles {
    handles: [u16; AttributeKind::COUNT],
}

impl ServiceHandles {
    pub const fn new() -> Self {
        Self {
            handles: [0; AttributeKind::COUNT],
        }
    }

    /// Builder-style setter, handy when describing discovery results.
    #[must_use]
    pub const fn with(mut self, kind: AttributeKind, handle: u16) -> Self {
        self.handles[kind.index()] = handle;
        self
    }

    /// Returns the handle for `kind`, or `None` when the sensor lacks it.
    pub fn get(&self, kind: AttributeKind) -> Option<u16> {
        match self.handles[kind.index()] {
            0 => None,
            h => Some(h),
        }
    }

    /// Reverse lookup used when the engine reports a bare handle.
    pub fn find(&self, handle: u16) -> Option<AttributeKind> {
        if handle == 0 {
            return None;
        }
        AttributeKind::ALL
            .into_iter()
            .find(|k| self.handles[k.index()] == handle)
    }
}

// ───────────────────────────────────────────────────────────────
// Subscribable characteristics
// ───────────────────────────────────────────────────────────────

/// Client characteristic configuration values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CccdFlag {
    Notify = 0x0001,
    Indicate = 0x0002,
}

/// Bits of an instance's state mask: which updates are enabled remotely.
pub struct StateMask;

impl StateMask {
    pub const MEASUREMENT: u32 = 0x0000_0001;
    pub const VECTOR: u32 = 0x0000_0002;
    pub const CONTROL_POINT: u32 = 0x0000_0004;
    pub const BROADCAST: u32 = 0x0000_0008;
}

/// The three characteristics a subscriber can ask updates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Characteristic {
    Measurement,
    Vector,
    ControlPoint,
}

impl Characteristic {
    pub const ALL: [Self; 3] = [Self::Measurement, Self::Vector, Self::ControlPoint];

    pub const fn value_kind(self) -> AttributeKind {
        match self {
            Self::Measurement => AttributeKind::Measurement,
            Self::Vector => AttributeKind::Vector,
            Self::ControlPoint => AttributeKind::ControlPoint,
        }
    }

    pub const fn cccd_kind(self) -> AttributeKind {
        match self {
            Self::Measurement => AttributeKind::MeasurementCccd,
            Self::Vector => AttributeKind::VectorCccd,
            Self::ControlPoint => AttributeKind::ControlPointCccd,
        }
    }

    pub const fn state_bit(self) -> u32 {
        match self {
            Self::Measurement => StateMask::MEASUREMENT,
            Self::Vector => StateMask::VECTOR,
            Self::ControlPoint => StateMask::CONTROL_POINT,
        }
    }

    /// Configuration written to the CCCD to turn updates on.
    pub const fn enable_flag(self) -> CccdFlag {
        match self {
            Self::Measurement | Self::Vector => CccdFlag::Notify,
            Self::ControlPoint => CccdFlag::Indicate,
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measurement => write!(f, "measurement"),
            Self::Vector => write!(f, "vector"),
            Self::ControlPoint => write!(f, "control point"),
        }
    }
}
