//! Inbound operation requests.
//!
//! Remote clients send these over IPC; the
//! [`Broker`](super::service::Broker) interprets them on behalf of the
//! requesting origin and answers with a [`BrokerResponse`].

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result, STATUS_SUCCESS};
use crate::protocol::ProcedureRequest;
use crate::types::{BdAddr, Characteristic, InstanceId, SubscriberId};

pub use crate::broker::entity::InstanceRecord;

/// Attributes a subscriber may read on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadableAttribute {
    SensorFeatures,
    SensorLocation,
}

/// Operations a client can ask the broker for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerRequest {
    /// Register a new subscriber under the requesting origin.
    Register,

    Unregister { subscriber: SubscriberId },

    /// Start receiving `characteristic` updates. With `enable`, the
    /// remote configuration descriptor is written as well.
    Subscribe {
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        characteristic: Characteristic,
        enable: bool,
    },

    Unsubscribe {
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        characteristic: Characteristic,
    },

    EnableBroadcast { subscriber: SubscriberId, address: BdAddr, instance: InstanceId },

    DisableBroadcast { subscriber: SubscriberId, address: BdAddr, instance: InstanceId },

    ReadAttribute {
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        attribute: ReadableAttribute,
    },

    WriteControlPoint {
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        request: ProcedureRequest,
    },

    /// Known sensors, at most `max` of them.
    ListEntities { max: u32 },

    ListInstances { address: BdAddr, max: u32 },
}

impl BrokerRequest {
    /// IPC function code of this request.
    pub const fn function(&self) -> u32 {
        match self {
            Self::Register => 0x1001,
            Self::Unregister { .. } => 0x1002,
            Self::Subscribe { characteristic, .. } => subscribe_function(*characteristic),
            Self::Unsubscribe { characteristic, .. } => subscribe_function(*characteristic) + 1,
            Self::EnableBroadcast { .. } => 0x1109,
            Self::DisableBroadcast { .. } => 0x1110,
            Self::ReadAttribute { attribute, .. } => match attribute {
                ReadableAttribute::SensorFeatures => 0x1111,
                ReadableAttribute::SensorLocation => 0x1112,
            },
            Self::WriteControlPoint { .. } => 0x1113,
            Self::ListEntities { .. } => 0x1114,
            Self::ListInstances { .. } => 0x1115,
        }
    }

    /// The subscriber the request acts on, if it names one.
    pub const fn subscriber(&self) -> Option<SubscriberId> {
        match self {
            Self::Unregister { subscriber }
            | Self::Subscribe { subscriber, .. }
            | Self::Unsubscribe { subscriber, .. }
            | Self::EnableBroadcast { subscriber, .. }
            | Self::DisableBroadcast { subscriber, .. }
            | Self::ReadAttribute { subscriber, .. }
            | Self::WriteControlPoint { subscriber, .. } => Some(*subscriber),
            Self::Register | Self::ListEntities { .. } | Self::ListInstances { .. } => None,
        }
    }
}

const fn subscribe_function(characteristic: Characteristic) -> u32 {
    match characteristic {
        Characteristic::Measurement => 0x1103,
        Characteristic::Vector => 0x1105,
        Characteristic::ControlPoint => 0x1107,
    }
}

/// Answer to a [`BrokerRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerResponse {
    /// Negative error status, zero, subscriber id or transaction id.
    Status(i32),
    Entities { status: i32, total: u32, addresses: Vec<BdAddr> },
    Instances { status: i32, total: u32, records: Vec<InstanceRecord> },
}

impl BrokerResponse {
    /// A success value beyond `i32::MAX` cannot be told apart from an
    /// error status, so it is reported as malformed.
    pub fn from_result(result: Result<u32>) -> Self {
        let status = match result {
            Ok(v) => i32::try_from(v).unwrap_or(BrokerError::ResponseMalformed.status()),
            Err(e) => e.status(),
        };
        Self::Status(status)
    }

    pub fn error(status: i32) -> Self {
        Self::Status(status)
    }

    pub const fn status(&self) -> i32 {
        match self {
            Self::Status(s) => *s,
            Self::Entities { status, .. } | Self::Instances { status, .. } => *status,
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status() >= STATUS_SUCCESS
    }
}
