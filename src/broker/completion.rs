//! Engine completions: write/read/error responses and handle-value updates.
//!
//! Every response carries the engine's transaction id. The id is resolved
//! through the Transaction Tracker, which also tells us what the operation
//! was for and who asked. Responses nobody is waiting for are dropped with
//! a debug line.

use log::{debug, warn};

use super::BrokerState;
use super::transaction::{ReadTarget, Resolved, TransactionKind};
use crate::app::events::{BrokerEvent, EngineEvent, WriteResponseKind};
use crate::app::ports::{GattEngine, StoragePort};
use crate::error::{EngineError, STATUS_SUCCESS};
use crate::protocol::cps::decode_features;
use crate::protocol::reader::ByteReader;
use crate::protocol::{ControlPointResponse, MeasurementData, SensorLocation, VectorData};
use crate::types::{AttributeKind, BdAddr, Characteristic, SYSTEM_SUBSCRIBER, StateMask};

impl<E: GattEngine, S: StoragePort> BrokerState<E, S> {
    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::HandleValue {
                address,
                handle,
                indication,
                value,
            } => self.on_handle_value(address, handle, indication, &value),
            EngineEvent::ReadResponse { transaction, value, .. } => {
                if let Some(resolved) = self.subscribers.take_by_transaction(transaction) {
                    self.on_read_response(resolved, &value);
                }
            }
            EngineEvent::WriteResponse { transaction, .. } => {
                if let Some(resolved) = self.subscribers.take_by_transaction(transaction) {
                    self.on_write_response(resolved);
                }
            }
            EngineEvent::ErrorResponse { transaction, error, .. } => {
                if let Some(resolved) = self.subscribers.take_by_transaction(transaction) {
                    self.on_error_response(resolved, error);
                }
            }
        }
    }

    // ── Handle-value ─────────────────────────────────────────

    fn on_handle_value(&mut self, address: BdAddr, handle: u16, indication: bool, value: &[u8]) {
        let Some((instance, kind)) = self.entities.find(&address).and_then(|e| e.instance_by_handle(handle)) else {
            debug!("Broker: update on unknown handle 0x{:04X} from {}", handle, address);
            return;
        };

        match kind {
            AttributeKind::Measurement => match MeasurementData::decode(value) {
                Ok(data) => {
                    let event = BrokerEvent::Measurement { address, instance, data };
                    self.dispatch(address, instance, Characteristic::Measurement, &event);
                }
                Err(e) => warn!("Broker: measurement from {}/{} dropped: {}", address, instance, e),
            },
            AttributeKind::Vector => match VectorData::decode(value) {
                Ok(data) => {
                    let event = BrokerEvent::Vector { address, instance, data };
                    self.dispatch(address, instance, Characteristic::Vector, &event);
                }
                Err(e) => warn!("Broker: vector from {}/{} dropped: {}", address, instance, e),
            },
            AttributeKind::ControlPoint => {
                if !indication {
                    debug!("Broker: control point notification from {} ignored", address);
                    return;
                }
                // A malformed indication leaves the procedure waiting for its timer.
                match ControlPointResponse::decode(value) {
                    Ok(response) => {
                        self.complete_procedure(address, instance, response);
                    }
                    Err(e) => warn!("Broker: control point indication from {}/{} dropped: {}", address, instance, e),
                }
            }
            other => debug!("Broker: unexpected update on {:?} from {}", other, address),
        }
    }

    // ── Read responses ───────────────────────────────────────

    fn on_read_response(&mut self, resolved: Resolved, value: &[u8]) {
        let Resolved {
            subscriber,
            transaction: txn,
            ..
        } = resolved;
        let (address, instance) = (txn.address, txn.instance);

        let target = match txn.kind {
            TransactionKind::Read(target) => target,
            other => {
                warn!("Broker: read response for non-read txn {} ({:?})", txn.id, other);
                return;
            }
        };

        match target {
            ReadTarget::SensorFeatures => {
                let (features, status) = match decode_features(value) {
                    Ok(f) => (f, STATUS_SUCCESS),
                    Err(e) => {
                        warn!("Broker: feature read from {}/{} malformed", address, instance);
                        (0, e.status())
                    }
                };
                if status == STATUS_SUCCESS {
                    if let Ok(inst) = self.entities.find_instance_mut(&address, instance) {
                        inst.features = features;
                    }
                }
                if subscriber != SYSTEM_SUBSCRIBER {
                    self.deliver(
                        subscriber,
                        BrokerEvent::SensorFeatures {
                            address,
                            instance,
                            transaction: txn.id,
                            features,
                            status,
                        },
                    );
                }
            }
            ReadTarget::SensorLocation => {
                let (location, status) = match SensorLocation::decode(value) {
                    Ok(l) => (Some(l), STATUS_SUCCESS),
                    Err(e) => {
                        warn!("Broker: location read from {}/{} malformed", address, instance);
                        (None, e.status())
                    }
                };
                if location.is_some() {
                    if let Ok(inst) = self.entities.find_instance_mut(&address, instance) {
                        inst.location = location;
                    }
                }
                if subscriber != SYSTEM_SUBSCRIBER {
                    self.deliver(
                        subscriber,
                        BrokerEvent::SensorLocation {
                            address,
                            instance,
                            transaction: txn.id,
                            location,
                            status,
                        },
                    );
                }
            }
            ReadTarget::Cccd(ch) => {
                let Ok(config) = ByteReader::new(value).read_u16_le() else {
                    warn!("Broker: {} configuration read from {} malformed", ch, address);
                    return;
                };
                if let Ok(inst) = self.entities.find_instance_mut(&address, instance) {
                    inst.set_state_bit(ch.state_bit(), config & ch.enable_flag() as u16 != 0);
                }
            }
            ReadTarget::MeasurementSccd => {
                let Ok(config) = ByteReader::new(value).read_u16_le() else {
                    warn!("Broker: broadcast configuration read from {} malformed", address);
                    return;
                };
                if let Ok(inst) = self.entities.find_instance_mut(&address, instance) {
                    inst.set_state_bit(StateMask::BROADCAST, config & 0x0001 != 0);
                }
            }
        }
    }

    // ── Write responses ──────────────────────────────────────

    fn on_write_response(&mut self, resolved: Resolved) {
        let Resolved {
            subscriber,
            origin,
            transaction: txn,
        } = resolved;
        let (address, instance) = (txn.address, txn.instance);

        let Some(kind) = write_response_kind(txn.kind) else {
            warn!("Broker: write response for non-write txn {} ({:?})", txn.id, txn.kind);
            return;
        };

        match txn.kind {
            TransactionKind::Enable(ch) | TransactionKind::Disable(ch) => {
                let on = matches!(txn.kind, TransactionKind::Enable(_));
                if let Ok(inst) = self.entities.find_instance_mut(&address, instance) {
                    inst.set_state_bit(ch.state_bit(), on);
                }
            }
            TransactionKind::EnableBroadcast | TransactionKind::DisableBroadcast => {
                let on = txn.kind == TransactionKind::EnableBroadcast;
                if let Ok(inst) = self.entities.find_instance_mut(&address, instance) {
                    inst.set_state_bit(StateMask::BROADCAST, on);
                }
            }
            TransactionKind::WriteControlPoint => self.begin_procedure(address, instance, subscriber, origin),
            TransactionKind::Read(_) => {}
        }

        self.deliver(
            subscriber,
            BrokerEvent::WriteResponse {
                kind,
                address,
                instance,
                transaction: txn.id,
                status: STATUS_SUCCESS,
            },
        );
    }

    // ── Error responses ──────────────────────────────────────

    fn on_error_response(&mut self, resolved: Resolved, error: EngineError) {
        let Resolved {
            subscriber,
            transaction: txn,
            ..
        } = resolved;
        let (address, instance) = (txn.address, txn.instance);
        let status = error.status();
        warn!("Broker: txn {} on {}/{} failed: {}", txn.id, address, instance, error);

        let event = match txn.kind {
            TransactionKind::Read(ReadTarget::SensorFeatures) => BrokerEvent::SensorFeatures {
                address,
                instance,
                transaction: txn.id,
                features: 0,
                status,
            },
            TransactionKind::Read(ReadTarget::SensorLocation) => BrokerEvent::SensorLocation {
                address,
                instance,
                transaction: txn.id,
                location: None,
                status,
            },
            TransactionKind::Read(_) => return,
            write => match write_response_kind(write) {
                Some(kind) => BrokerEvent::WriteResponse {
                    kind,
                    address,
                    instance,
                    transaction: txn.id,
                    status,
                },
                None => return,
            },
        };
        if subscriber != SYSTEM_SUBSCRIBER {
            self.deliver(subscriber, event);
        }
    }
}

fn write_response_kind(kind: TransactionKind) -> Option<WriteResponseKind> {
    let characteristic_kind = |ch: Characteristic| match ch {
        Characteristic::Measurement => WriteResponseKind::MeasurementsSet,
        Characteristic::Vector => WriteResponseKind::VectorsSet,
        Characteristic::ControlPoint => WriteResponseKind::ProceduresSet,
    };
    match kind {
        TransactionKind::Enable(ch) | TransactionKind::Disable(ch) => Some(characteristic_kind(ch)),
        TransactionKind::EnableBroadcast | TransactionKind::DisableBroadcast => Some(WriteResponseKind::BroadcastsSet),
        TransactionKind::WriteControlPoint => Some(WriteResponseKind::ProcedureBegun),
        TransactionKind::Read(_) => None,
    }
}
