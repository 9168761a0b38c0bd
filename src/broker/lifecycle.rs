//! Device and subscriber lifecycle.
//!
//! ```text
//!   DeviceEvent ──▶ Connected ──▶ EntityRegistry.insert ──▶ Connected event
//!                                        │ bonded?
//!                                        ▼
//!                           subscriber 0 re-reads attributes
//!
//!   Disconnected / Deleted ──▶ remove entity, stop timers ──▶ Disconnected event
//!   Paired / Unpaired      ──▶ bonded entry written / removed
//!   AddressChanged         ──▶ entry, entity and subscriptions follow
//!   PoweredOff             ──▶ everything dropped, no events
//! ```
//!
//! Subscriptions survive a disconnect. A bonded sensor keeps its client
//! configuration across connections, so updates flow again as soon as it
//! is back.

use log::{debug, info, warn};

use super::BrokerState;
use super::bonding;
use super::entity::Entity;
use super::procedure::ProcedureRecord;
use super::subscriber::LocalCallback;
use super::transaction::ReadTarget;
use crate::app::events::{BrokerEvent, DeviceEvent};
use crate::app::ports::{GattEngine, StoragePort};
use crate::error::Result;
use crate::types::{
    AttributeKind, BdAddr, Characteristic, InstanceId, OriginId, SYSTEM_SUBSCRIBER, ServiceHandles, SubscriberId,
};

impl<E: GattEngine, S: StoragePort> BrokerState<E, S> {
    // ── Subscribers ──────────────────────────────────────────

    pub fn register(&mut self, origin: OriginId, callback: Option<LocalCallback>) -> Result<SubscriberId> {
        self.subscribers.register(origin, callback)
    }

    /// Destroy a subscriber with its subscriptions and pending
    /// transactions. Remote streams are left as they are.
    pub fn unregister(&mut self, subscriber: SubscriberId) -> Result<()> {
        self.subscribers.unregister(subscriber).map(|_| ())
    }

    /// A remote client went away: drop everything it registered.
    pub fn remove_origin(&mut self, origin: OriginId) -> usize {
        self.subscribers.remove_origin(origin).len()
    }

    /// Drop all runtime state. The system subscriber stays.
    pub(crate) fn reset(&mut self) {
        let dropped = self.entities.clear();
        if !dropped.is_empty() {
            info!("Broker: {} entities dropped", dropped.len());
        }
        self.timers.clear();
        self.subscribers.clear();
        self.take_outbox();
    }

    // ── Devices ──────────────────────────────────────────────

    pub fn handle_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connected { address, services } => self.on_connected(address, &services),
            DeviceEvent::Disconnected { address } => self.remove_entity(address),
            DeviceEvent::Deleted { address } => {
                self.remove_entity(address);
                self.forget_bond(address);
            }
            DeviceEvent::Paired { address } => {
                let ns = self.config.bonded_namespace.clone();
                if let Err(e) = bonding::mark_bonded(&mut self.storage, &ns, &address) {
                    warn!("Store: bond entry for {} not written: {}", address, e);
                }
            }
            DeviceEvent::Unpaired { address } => self.forget_bond(address),
            DeviceEvent::AddressChanged { previous, current } => self.rebind_address(previous, current),
            DeviceEvent::PoweredOff => self.power_off(),
        }
    }

    fn on_connected(&mut self, address: BdAddr, services: &[ServiceHandles]) {
        if services.is_empty() {
            debug!("Broker: {} connected without a Cycling Power service", address);
            return;
        }
        let entity = match Entity::from_discovery(address, services, self.config.max_instances_per_entity) {
            Ok(e) => e,
            Err(e) => {
                warn!("Broker: {} not tracked: {}", address, e);
                return;
            }
        };

        let (_, fresh) = self.entities.insert(entity);
        if !fresh {
            debug!("Broker: {} already known", address);
            return;
        }
        let instance_count = self.entities.count_instances(&address) as u32;
        info!("Broker: {} connected with {} instances", address, instance_count);
        self.queue_all(&BrokerEvent::Connected {
            address,
            instance_count,
        });

        let ns = self.config.bonded_namespace.clone();
        if self.config.reread_on_reconnect && bonding::is_bonded(&self.storage, &ns, &address) {
            self.reread(address);
        }
    }

    /// Subscriber zero refreshes what a bonded sensor remembered from last time.
    fn reread(&mut self, address: BdAddr) {
        let plan: Vec<(InstanceId, ReadTarget)> = self
            .entities
            .find(&address)
            .map(|e| {
                e.instances()
                    .iter()
                    .flat_map(|i| reread_targets(&i.handles).into_iter().map(move |t| (i.id, t)))
                    .collect()
            })
            .unwrap_or_default();

        info!("Broker: re-reading {} attributes of bonded {}", plan.len(), address);
        for (instance, target) in plan {
            if let Err(e) = self.read_attribute(SYSTEM_SUBSCRIBER, address, instance, target) {
                warn!("Broker: re-read of {:?} on {}/{} failed: {}", target, address, instance, e);
            }
        }
    }

    fn remove_entity(&mut self, address: BdAddr) {
        let Some(entity) = self.entities.remove(&address) else {
            debug!("Broker: {} was not tracked", address);
            return;
        };
        self.cancel_procedures(entity.instances());
        info!("Broker: {} disconnected", address);
        self.queue_all(&BrokerEvent::Disconnected { address });
    }

    fn forget_bond(&mut self, address: BdAddr) {
        let ns = self.config.bonded_namespace.clone();
        if let Err(e) = bonding::forget(&mut self.storage, &ns, &address) {
            warn!("Store: bond entry for {} not removed: {}", address, e);
        }
    }

    fn rebind_address(&mut self, previous: BdAddr, current: BdAddr) {
        // Another sensor already answers at `current`; its subscribers
        // must not inherit this one's streams.
        if self.entities.find(&current).is_some() {
            warn!("Broker: {} re-resolved to {}, which is already tracked", previous, current);
            return;
        }
        let ns = self.config.bonded_namespace.clone();
        if let Err(e) = bonding::rebind(&mut self.storage, &ns, &previous, &current) {
            warn!("Store: bond entry for {} not moved: {}", previous, e);
        }

        if !self.entities.rebind(&previous, current) {
            debug!("Broker: no entity to move from {} to {}", previous, current);
        }
        // Subscriptions outlive a disconnect, so they follow even when no
        // entity moved.
        self.subscribers.rebind_address(&previous, current);

        if let Some(entity) = self.entities.find_mut(&current) {
            for inst in entity.instances_mut() {
                if let ProcedureRecord::AwaitingIndication { address, timer, .. } = &mut inst.procedure {
                    *address = current;
                    self.timers.rekey(*timer, (current, inst.id));
                }
            }
        }
        info!("Broker: {} re-resolved to {}", previous, current);
    }

    fn power_off(&mut self) {
        let dropped = self.entities.clear();
        self.timers.clear();
        // The engine answers nothing once the radio is down.
        for s in self.subscribers.iter_mut() {
            s.transactions.clear();
        }
        info!("Broker: powered off, {} entities dropped", dropped.len());
    }
}

/// Reads issued on reconnect: location, features, then every present
/// configuration descriptor.
fn reread_targets(handles: &ServiceHandles) -> Vec<ReadTarget> {
    let mut targets = Vec::new();
    if handles.get(AttributeKind::SensorLocation).is_some() {
        targets.push(ReadTarget::SensorLocation);
    }
    if handles.get(AttributeKind::Feature).is_some() {
        targets.push(ReadTarget::SensorFeatures);
    }
    for ch in Characteristic::ALL {
        if handles.get(ch.cccd_kind()).is_some() {
            targets.push(ReadTarget::Cccd(ch));
        }
    }
    if handles.get(AttributeKind::MeasurementSccd).is_some() {
        targets.push(ReadTarget::MeasurementSccd);
    }
    targets
}
