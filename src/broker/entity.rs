//! Entity Registry: connected sensors and their service instances.
//!
//! One [`Entity`] per device address. Each entity owns the Cycling Power
//! service instances found during discovery, numbered from 1 in discovery
//! order. Instances carry the resolved handle table plus whatever the
//! broker has learned about the remote side (state mask, features,
//! location) and the instance's control-point procedure record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::procedure::ProcedureRecord;
use crate::error::{BrokerError, Result};
use crate::protocol::SensorLocation;
use crate::types::{AttributeKind, BdAddr, InstanceId, ServiceHandles};

// ───────────────────────────────────────────────────────────────
// Instance
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub handles: ServiceHandles,
    /// [`StateMask`](crate::types::StateMask) bits currently enabled remotely.
    pub state: u32,
    pub features: u32,
    pub location: Option<SensorLocation>,
    pub procedure: ProcedureRecord,
}

impl Instance {
    fn new(id: InstanceId, handles: ServiceHandles) -> Self {
        Self {
            id,
            handles,
            state: 0,
            features: 0,
            location: None,
            procedure: ProcedureRecord::Idle,
        }
    }

    /// Resolve a handle, failing with `InvalidParameter` when absent.
    pub fn handle(&self, kind: AttributeKind) -> Result<u16> {
        self.handles.get(kind).ok_or(BrokerError::InvalidParameter)
    }

    pub fn set_state_bit(&mut self, bit: u32, on: bool) {
        if on {
            self.state |= bit;
        } else {
            self.state &= !bit;
        }
    }

    pub fn record(&self) -> InstanceRecord {
        InstanceRecord {
            instance: self.id,
            state: self.state,
            features: self.features,
            location: self.location,
        }
    }
}

/// Snapshot of an instance reported by `listInstances`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance: InstanceId,
    pub state: u32,
    pub features: u32,
    pub location: Option<SensorLocation>,
}

// ───────────────────────────────────────────────────────────────
// Entity
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Entity {
    pub address: BdAddr,
    instances: Vec<Instance>,
}

impl Entity {
    /// Build an entity from discovery results, numbering instances from 1.
    ///
    /// Fails with `AllocationFailure` when discovery found more instances
    /// than `max_instances` allows.
    pub fn from_discovery(address: BdAddr, services: &[ServiceHandles], max_instances: usize) -> Result<Self> {
        if address.is_null() || services.is_empty() {
            return Err(BrokerError::InvalidParameter);
        }
        if services.len() > max_instances {
            return Err(BrokerError::AllocationFailure);
        }
        let instances = services
            .iter()
            .zip(1..)
            .map(|(handles, id)| Instance::new(id, *handles))
            .collect();
        Ok(Self { address, instances })
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut [Instance] {
        &mut self.instances
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    /// Find the instance owning `handle` and which attribute it is.
    pub fn instance_by_handle(&self, handle: u16) -> Option<(InstanceId, AttributeKind)> {
        self.instances
            .iter()
            .find_map(|i| i.handles.find(handle).map(|kind| (i.id, kind)))
    }
}

// ───────────────────────────────────────────────────────────────
// Registry
// ───────────────────────────────────────────────────────────────

/// At most one entity per address.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<BdAddr, Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entity` unless its address is already known.
    ///
    /// Returns the stored entity and `true` when it was newly inserted.
    pub fn insert(&mut self, entity: Entity) -> (&mut Entity, bool) {
        use std::collections::btree_map::Entry;
        match self.entities.entry(entity.address) {
            Entry::Occupied(e) => (e.into_mut(), false),
            Entry::Vacant(v) => (v.insert(entity), true),
        }
    }

    pub fn find(&self, address: &BdAddr) -> Option<&Entity> {
        self.entities.get(address)
    }

    pub fn find_mut(&mut self, address: &BdAddr) -> Option<&mut Entity> {
        self.entities.get_mut(address)
    }

    pub fn remove(&mut self, address: &BdAddr) -> Option<Entity> {
        self.entities.remove(address)
    }

    /// Zero for an unknown address.
    pub fn count_instances(&self, address: &BdAddr) -> usize {
        self.entities.get(address).map_or(0, |e| e.instances.len())
    }

    pub fn find_instance(&self, address: &BdAddr, id: InstanceId) -> Result<&Instance> {
        self.find(address)
            .and_then(|e| e.instance(id))
            .ok_or(BrokerError::InstanceNotFound)
    }

    pub fn find_instance_mut(&mut self, address: &BdAddr, id: InstanceId) -> Result<&mut Instance> {
        self.find_mut(address)
            .and_then(|e| e.instance_mut(id))
            .ok_or(BrokerError::InstanceNotFound)
    }

    /// Move an entity to a re-resolved address. No-op if `from` is unknown
    /// or `to` is already taken.
    pub fn rebind(&mut self, from: &BdAddr, to: BdAddr) -> bool {
        if self.entities.contains_key(&to) {
            return false;
        }
        match self.entities.remove(from) {
            Some(mut e) => {
                e.address = to;
                self.entities.insert(to, e);
                true
            }
            None => false,
        }
    }

    pub fn addresses(&self) -> impl Iterator<Item = BdAddr> + '_ {
        self.entities.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drop every entity, returning them so callers can release timers.
    pub fn clear(&mut self) -> Vec<Entity> {
        core::mem::take(&mut self.entities).into_values().collect()
    }
}
