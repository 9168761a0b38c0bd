//! Procedure State Machine.
//!
//! ```text
//!            write ack                indication
//!   Idle ──────────────▶ Awaiting ─────────────────▶ Completed ──┐
//!    ▲                   Indication                              │
//!    │                      │ timer expiry                       │
//!    │                      └─────────────────────▶ TimedOut ────┤
//!    └───────────────────────────────────────────────────────────┘
//! ```
//!
//! One record per instance. The result of a procedure goes only to the
//! subscriber that started it. `Completed` and `TimedOut` are transient:
//! the record is back to `Idle` as soon as the outcome is queued.

use log::{debug, info, warn};

use super::BrokerState;
use crate::app::events::BrokerEvent;
use crate::app::ports::{GattEngine, StoragePort};
use crate::protocol::ControlPointResponse;
use crate::timer::TimerId;
use crate::types::{BdAddr, InstanceId, OriginId, SubscriberId};

/// Timer key identifying the instance a procedure runs on.
pub type ProcedureKey = (BdAddr, InstanceId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcedureRecord {
    #[default]
    Idle,
    AwaitingIndication {
        subscriber: SubscriberId,
        origin: OriginId,
        address: BdAddr,
        timer: TimerId,
    },
}

/// Observable procedure state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureState {
    Idle,
    AwaitingIndication,
}

/// How a procedure ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureOutcome {
    Completed(ControlPointResponse),
    TimedOut,
}

impl ProcedureRecord {
    pub fn state(&self) -> ProcedureState {
        match self {
            Self::Idle => ProcedureState::Idle,
            Self::AwaitingIndication { .. } => ProcedureState::AwaitingIndication,
        }
    }
}

impl<E: GattEngine, S: StoragePort> BrokerState<E, S> {
    /// `Idle -> AwaitingIndication` after the control-point write is acked.
    ///
    /// A procedure already in flight is replaced: its timer is stopped and
    /// the new owner waits for the next indication.
    pub(crate) fn begin_procedure(
        &mut self,
        address: BdAddr,
        instance: InstanceId,
        subscriber: SubscriberId,
        origin: OriginId,
    ) {
        let timeout = self.config.procedure_timeout_ms;
        let Ok(inst) = self.entities.find_instance_mut(&address, instance) else {
            debug!("Broker: procedure on vanished {}/{} not started", address, instance);
            return;
        };

        if let ProcedureRecord::AwaitingIndication { subscriber: prev, timer, .. } = inst.procedure {
            warn!(
                "Broker: procedure on {}/{} still awaiting for subscriber {}, replaced",
                address, instance, prev
            );
            self.timers.stop(timer);
        }

        let timer = self.timers.start(timeout, (address, instance));
        inst.procedure = ProcedureRecord::AwaitingIndication {
            subscriber,
            origin,
            address,
            timer,
        };
        info!("Broker: procedure begun on {}/{} for subscriber {}", address, instance, subscriber);
    }

    /// `AwaitingIndication -> Completed -> Idle` on a matching indication.
    ///
    /// Returns `false` when no procedure was waiting.
    pub(crate) fn complete_procedure(
        &mut self,
        address: BdAddr,
        instance: InstanceId,
        response: ControlPointResponse,
    ) -> bool {
        let Ok(inst) = self.entities.find_instance_mut(&address, instance) else {
            return false;
        };
        let ProcedureRecord::AwaitingIndication { subscriber, timer, .. } = inst.procedure else {
            debug!("Broker: unsolicited control point indication from {}/{}", address, instance);
            return false;
        };
        inst.procedure = ProcedureRecord::Idle;
        self.timers.stop(timer);

        info!(
            "Broker: procedure 0x{:02X} on {}/{} completed ({:?})",
            response.request_opcode, address, instance, response.response_code
        );
        self.finish_procedure(subscriber, address, instance, ProcedureOutcome::Completed(response));
        true
    }

    /// Advance procedure timers and time out whatever expired.
    pub(crate) fn expire_procedures(&mut self, elapsed_ms: u32) {
        for expired in self.timers.advance(elapsed_ms) {
            let (address, instance) = expired.key;
            let Ok(inst) = self.entities.find_instance_mut(&address, instance) else {
                continue;
            };
            // Only the timer that armed the current record counts.
            let subscriber = match inst.procedure {
                ProcedureRecord::AwaitingIndication { subscriber, timer, .. } if timer == expired.id => subscriber,
                _ => continue,
            };
            inst.procedure = ProcedureRecord::Idle;

            warn!("Broker: procedure on {}/{} timed out", address, instance);
            self.finish_procedure(subscriber, address, instance, ProcedureOutcome::TimedOut);
        }
    }

    fn finish_procedure(
        &mut self,
        subscriber: SubscriberId,
        address: BdAddr,
        instance: InstanceId,
        outcome: ProcedureOutcome,
    ) {
        let event = match outcome {
            ProcedureOutcome::Completed(response) => BrokerEvent::ControlPoint {
                address,
                instance,
                timeout: false,
                response: Some(response),
            },
            ProcedureOutcome::TimedOut => BrokerEvent::ControlPoint {
                address,
                instance,
                timeout: true,
                response: None,
            },
        };
        self.deliver(subscriber, event);
    }

    /// Stop the timers of every procedure running on `address`.
    pub(crate) fn cancel_procedures(&mut self, instances: &[super::entity::Instance]) {
        for inst in instances {
            if let ProcedureRecord::AwaitingIndication { timer, .. } = inst.procedure {
                self.timers.stop(timer);
            }
        }
    }

    pub fn procedure_state(&self, address: &BdAddr, instance: InstanceId) -> crate::error::Result<ProcedureState> {
        Ok(self.entities.find_instance(address, instance)?.procedure.state())
    }
}
