//! Subscription Multiplexer.
//!
//! Several subscribers may share one remote notification stream. The
//! first subscriber asking for updates with `enable` writes the client
//! configuration; the stream is only switched off again when the last
//! subscriber for that triple leaves. Every unsubscribe scans all
//! subscribers for that.
//!
//! Inbound updates are fanned out to every subscriber holding the
//! matching triple, in registry order.

use log::{debug, info, warn};

use super::BrokerState;
use super::subscriber::Subscription;
use super::transaction::{ReadTarget, Transaction, TransactionKind};
use crate::app::events::BrokerEvent;
use crate::app::ports::{GattEngine, StoragePort};
use crate::error::{BrokerError, Result};
use crate::protocol::ProcedureRequest;
use crate::types::{AttributeKind, BdAddr, Characteristic, InstanceId, SubscriberId, TransactionId};

/// CCCD / SCCD value switching updates off.
const CONFIG_DISABLED: u16 = 0x0000;

/// SCCD value enabling broadcast of measurements.
const SCCD_BROADCAST: u16 = 0x0001;

impl<E: GattEngine, S: StoragePort> BrokerState<E, S> {
    // ── Subscribe / unsubscribe ──────────────────────────────

    /// Record interest in `characteristic` updates of one instance.
    ///
    /// Returns `0` when only the subscription was recorded (or it already
    /// existed), or the transaction id of the enable write.
    pub fn subscribe(
        &mut self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        characteristic: Characteristic,
        enable: bool,
    ) -> Result<u32> {
        if self.subscribers.find(subscriber).is_none() {
            return Err(BrokerError::SubscriberNotFound);
        }
        let inst = self.entities.find_instance(&address, instance)?;
        inst.handle(characteristic.value_kind())?;
        let cccd = if enable {
            Some(inst.handle(characteristic.cccd_kind())?)
        } else {
            None
        };
        if cccd.is_some() {
            self.subscribers.has_transaction_room(subscriber)?;
        }

        let sub = Subscription {
            address,
            instance,
            characteristic,
        };
        let capacity = self.subscribers.max_subscriptions;
        let added = self
            .subscribers
            .find_mut(subscriber)
            .ok_or(BrokerError::SubscriberNotFound)?
            .add_subscription(sub, capacity)?;
        if !added {
            debug!("Broker: subscriber {} already holds {} on {}/{}", subscriber, characteristic, address, instance);
            return Ok(0);
        }

        let Some(cccd) = cccd else {
            info!("Broker: subscriber {} registered for {} on {}/{}", subscriber, characteristic, address, instance);
            return Ok(0);
        };

        let value = (characteristic.enable_flag() as u16).to_le_bytes();
        match self.engine.write_value(address, cccd, &value) {
            Ok(id) => {
                self.track(subscriber, id, TransactionKind::Enable(characteristic), address, instance)?;
                info!(
                    "Broker: subscriber {} enabling {} on {}/{} (txn {})",
                    subscriber, characteristic, address, instance, id
                );
                Ok(id)
            }
            Err(e) => {
                // Leave no trace of a subscription the sensor never saw.
                if let Some(s) = self.subscribers.find_mut(subscriber) {
                    s.remove_subscription(&sub);
                }
                warn!("Broker: enable write for {} on {} refused: {}", characteristic, address, e);
                Err(e.into())
            }
        }
    }

    /// Drop one subscription; disable the remote stream if it was the last.
    ///
    /// Returns `0` when no disable write was needed, otherwise its
    /// transaction id.
    pub fn unsubscribe(
        &mut self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        characteristic: Characteristic,
    ) -> Result<u32> {
        let sub = Subscription {
            address,
            instance,
            characteristic,
        };
        if !self
            .subscribers
            .find(subscriber)
            .ok_or(BrokerError::SubscriberNotFound)?
            .has_subscription(&sub)
        {
            return Err(BrokerError::SubscriptionNotFound);
        }

        // Last holder of the triple on a sensor with a configuration
        // descriptor: a disable write follows, so it needs a free slot.
        let cccd = if self.subscribers.held_by_others(&sub, subscriber) {
            None
        } else {
            self.entities
                .find_instance(&address, instance)
                .ok()
                .and_then(|i| i.handles.get(characteristic.cccd_kind()))
        };
        if cccd.is_some() {
            self.subscribers.has_transaction_room(subscriber)?;
        }

        if let Some(s) = self.subscribers.find_mut(subscriber) {
            s.remove_subscription(&sub);
        }
        info!("Broker: subscriber {} dropped {} on {}/{}", subscriber, characteristic, address, instance);

        let Some(cccd) = cccd else {
            return Ok(0);
        };

        let id = match self.engine.write_value(address, cccd, &CONFIG_DISABLED.to_le_bytes()) {
            Ok(id) => id,
            Err(e) => {
                // The stream stays on, so the subscription stays too.
                let capacity = self.subscribers.max_subscriptions;
                if let Some(s) = self.subscribers.find_mut(subscriber) {
                    s.add_subscription(sub, capacity)?;
                }
                warn!("Broker: disable write for {} on {} refused: {}", characteristic, address, e);
                return Err(e.into());
            }
        };
        self.track(subscriber, id, TransactionKind::Disable(characteristic), address, instance)?;
        info!("Broker: last subscriber left, disabling {} on {}/{} (txn {})", characteristic, address, instance, id);
        Ok(id)
    }

    // ── Broadcast, reads, control point ──────────────────────

    /// Toggle measurement broadcast through the server configuration.
    pub fn set_broadcast(
        &mut self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        enable: bool,
    ) -> Result<TransactionId> {
        let value = if enable { SCCD_BROADCAST } else { CONFIG_DISABLED };
        let kind = if enable {
            TransactionKind::EnableBroadcast
        } else {
            TransactionKind::DisableBroadcast
        };
        self.write_tracked(subscriber, address, instance, AttributeKind::MeasurementSccd, &value.to_le_bytes(), kind)
    }

    /// Read the sensor's feature mask or location.
    pub fn read_attribute(
        &mut self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        target: ReadTarget,
    ) -> Result<TransactionId> {
        let kind = match target {
            ReadTarget::SensorFeatures => AttributeKind::Feature,
            ReadTarget::SensorLocation => AttributeKind::SensorLocation,
            ReadTarget::Cccd(ch) => ch.cccd_kind(),
            ReadTarget::MeasurementSccd => AttributeKind::MeasurementSccd,
        };
        self.subscribers.find(subscriber).ok_or(BrokerError::SubscriberNotFound)?;
        let handle = self.entities.find_instance(&address, instance)?.handle(kind)?;
        self.subscribers.has_transaction_room(subscriber)?;

        let id = self.engine.read_value(address, handle)?;
        self.track(subscriber, id, TransactionKind::Read(target), address, instance)?;
        Ok(id)
    }

    /// Start a control-point procedure. The procedure is armed once the
    /// write is acknowledged.
    pub fn write_control_point(
        &mut self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        request: &ProcedureRequest,
    ) -> Result<TransactionId> {
        let bytes = request.encode();
        let id = self.write_tracked(
            subscriber,
            address,
            instance,
            AttributeKind::ControlPoint,
            &bytes,
            TransactionKind::WriteControlPoint,
        )?;
        info!(
            "Broker: subscriber {} wrote control point opcode 0x{:02X} on {}/{} (txn {})",
            subscriber,
            request.opcode(),
            address,
            instance,
            id
        );
        Ok(id)
    }

    fn write_tracked(
        &mut self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        kind: AttributeKind,
        value: &[u8],
        txn_kind: TransactionKind,
    ) -> Result<TransactionId> {
        self.subscribers.find(subscriber).ok_or(BrokerError::SubscriberNotFound)?;
        let handle = self.entities.find_instance(&address, instance)?.handle(kind)?;
        self.subscribers.has_transaction_room(subscriber)?;

        let id = self.engine.write_value(address, handle, value)?;
        self.track(subscriber, id, txn_kind, address, instance)?;
        Ok(id)
    }

    pub(crate) fn track(
        &mut self,
        subscriber: SubscriberId,
        id: TransactionId,
        kind: TransactionKind,
        address: BdAddr,
        instance: InstanceId,
    ) -> Result<()> {
        let txn = Transaction {
            id,
            kind,
            address,
            instance,
        };
        self.subscribers.add_transaction(subscriber, txn).inspect_err(|e| {
            warn!("Broker: cannot track txn {} for subscriber {}: {}", id, subscriber, e);
        })
    }

    // ── Fan-out ──────────────────────────────────────────────

    /// Deliver an unsolicited update to every matching subscriber.
    ///
    /// Returns how many deliveries were queued; zero matches is not an
    /// error.
    pub fn dispatch(
        &mut self,
        address: BdAddr,
        instance: InstanceId,
        characteristic: Characteristic,
        event: &BrokerEvent,
    ) -> usize {
        let sub = Subscription {
            address,
            instance,
            characteristic,
        };
        let targets: Vec<SubscriberId> = self
            .subscribers
            .iter()
            .filter(|s| s.has_subscription(&sub))
            .map(|s| s.id)
            .collect();

        let delivered = targets
            .into_iter()
            .filter(|&id| self.queue_to(id, event.clone()))
            .count();
        if delivered == 0 {
            debug!("Broker: {} update from {}/{} has no subscribers", characteristic, address, instance);
        }
        delivered
    }

    /// Single-subscriber path used for completions and procedure results.
    pub fn deliver(&mut self, subscriber: SubscriberId, event: BrokerEvent) -> bool {
        self.queue_to(subscriber, event)
    }
}
