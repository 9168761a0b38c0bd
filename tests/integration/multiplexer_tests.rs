//! Subscription multiplexing, fan-out and transaction correlation.

use cppm_broker::app::commands::{BrokerRequest, ReadableAttribute};
use cppm_broker::app::events::{BrokerEvent, EngineEvent, WriteResponseKind};
use cppm_broker::broker::subscriber::Subscription;
use cppm_broker::broker::transaction::TransactionKind;
use cppm_broker::config::BrokerConfig;
use cppm_broker::error::{BrokerError, EngineError};
use cppm_broker::protocol::SensorLocation;
use cppm_broker::types::{Characteristic, StateMask};

use crate::mock_engine::{EngineCall, Fixture, SENSOR_A, SENSOR_B, collector};

const MEASUREMENT: u16 = 0x11;
const MEASUREMENT_CCCD: u16 = 0x12;
const FEATURE: u16 = 0x14;
const VECTOR_CCCD: u16 = 0x17;
const CONTROL_POINT_CCCD: u16 = 0x19;

/// Flags 0, 250 W.
const POWER_250W: [u8; 4] = [0x00, 0x00, 0xFA, 0x00];

fn measurements(received: &crate::mock_engine::Received) -> usize {
    received
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, e)| matches!(e, BrokerEvent::Measurement { .. }))
        .count()
}

// ── Subscribe / unsubscribe ──────────────────────────────────

#[test]
fn enable_writes_the_client_configuration() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    let txn = fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Measurement, true).unwrap();
    assert_ne!(txn, 0);
    assert_eq!(fx.engine.writes_to(MEASUREMENT_CCCD), vec![vec![0x01, 0x00]]);

    fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Vector, true).unwrap();
    fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::ControlPoint, true).unwrap();
    assert_eq!(fx.engine.writes_to(VECTOR_CCCD), vec![vec![0x01, 0x00]]);
    assert_eq!(fx.engine.writes_to(CONTROL_POINT_CCCD), vec![vec![0x02, 0x00]]);

    let pending = fx.broker.pending_transactions(id).unwrap();
    assert_eq!(pending.len(), 3);
    assert_eq!(pending[0].kind, TransactionKind::Enable(Characteristic::Measurement));
}

#[test]
fn subscribe_without_enable_only_records() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    assert_eq!(fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Measurement, false), Ok(0));
    assert!(fx.engine.calls().is_empty());
    assert_eq!(
        fx.broker.subscriptions(id).unwrap(),
        vec![Subscription {
            address: SENSOR_A,
            instance: 1,
            characteristic: Characteristic::Measurement
        }]
    );
}

#[test]
fn duplicate_subscription_is_not_rewritten() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Measurement, true).unwrap();
    assert_eq!(fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Measurement, true), Ok(0));
    assert_eq!(fx.engine.writes_to(MEASUREMENT_CCCD).len(), 1);
    assert_eq!(fx.broker.subscriptions(id).unwrap().len(), 1);
}

#[test]
fn subscribe_validates_its_target() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 2);
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    assert_eq!(
        fx.broker.subscribe(id, SENSOR_B, 1, Characteristic::Measurement, true),
        Err(BrokerError::InstanceNotFound)
    );
    assert_eq!(
        fx.broker.subscribe(id, SENSOR_A, 3, Characteristic::Measurement, true),
        Err(BrokerError::InstanceNotFound)
    );
    assert_eq!(
        fx.broker.subscribe(77, SENSOR_A, 1, Characteristic::Measurement, true),
        Err(BrokerError::SubscriberNotFound)
    );
    assert!(fx.engine.calls().is_empty());
}

#[test]
fn refused_enable_leaves_no_subscription() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    fx.engine.refuse(Some(EngineError::Code(-42)));
    assert_eq!(
        fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Measurement, true),
        Err(BrokerError::Engine(EngineError::Code(-42)))
    );
    assert!(fx.broker.subscriptions(id).unwrap().is_empty());
    assert!(fx.broker.pending_transactions(id).unwrap().is_empty());
}

#[test]
fn unsubscribe_unknown_subscription_fails() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    assert_eq!(
        fx.broker.unsubscribe(id, SENSOR_A, 1, Characteristic::Vector),
        Err(BrokerError::SubscriptionNotFound)
    );
}

#[test]
fn pending_transaction_limit_is_enforced() {
    let config = BrokerConfig {
        max_pending_transactions: 2,
        ..BrokerConfig::default()
    };
    let fx = Fixture::with_config(config);
    fx.connect(SENSOR_A, 1);
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    fx.broker.read_attribute(id, SENSOR_A, 1, ReadableAttribute::SensorFeatures).unwrap();
    fx.broker.read_attribute(id, SENSOR_A, 1, ReadableAttribute::SensorLocation).unwrap();
    assert_eq!(
        fx.broker.read_attribute(id, SENSOR_A, 1, ReadableAttribute::SensorFeatures),
        Err(BrokerError::AllocationFailure)
    );
    assert_eq!(fx.engine.calls().len(), 2);
}

#[test]
fn last_unsubscribe_needs_a_free_transaction_slot() {
    let config = BrokerConfig {
        max_pending_transactions: 1,
        ..BrokerConfig::default()
    };
    let fx = Fixture::with_config(config);
    fx.connect(SENSOR_A, 1);
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Measurement, false).unwrap();
    let read = fx.broker.read_attribute(id, SENSOR_A, 1, ReadableAttribute::SensorFeatures).unwrap();

    assert_eq!(
        fx.broker.unsubscribe(id, SENSOR_A, 1, Characteristic::Measurement),
        Err(BrokerError::AllocationFailure)
    );
    assert!(fx.engine.writes_to(MEASUREMENT_CCCD).is_empty());
    assert_eq!(fx.broker.subscriptions(id).unwrap().len(), 1);

    fx.broker.handle_engine_event(EngineEvent::ReadResponse {
        address: SENSOR_A,
        transaction: read,
        handle: FEATURE,
        value: vec![0x01, 0x00, 0x00, 0x00],
    });
    let txn = fx.broker.unsubscribe(id, SENSOR_A, 1, Characteristic::Measurement).unwrap();
    assert_ne!(txn, 0);
    assert_eq!(fx.engine.writes_to(MEASUREMENT_CCCD), vec![vec![0x00, 0x00]]);
    assert_eq!(fx.broker.pending_transactions(id).unwrap()[0].id, txn);

    fx.ack_write(SENSOR_A, txn, MEASUREMENT_CCCD);
    let acks = got
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, e)| matches!(e, BrokerEvent::WriteResponse { transaction, .. } if *transaction == txn))
        .count();
    assert_eq!(acks, 1);
}

#[test]
fn refused_disable_keeps_the_subscription() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();
    fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Vector, false).unwrap();

    fx.engine.refuse(Some(EngineError::Code(-40)));
    assert_eq!(
        fx.broker.unsubscribe(id, SENSOR_A, 1, Characteristic::Vector),
        Err(BrokerError::Engine(EngineError::Code(-40)))
    );
    assert_eq!(fx.broker.subscriptions(id).unwrap().len(), 1);
    assert!(fx.broker.pending_transactions(id).unwrap().is_empty());

    fx.engine.refuse(None);
    assert_ne!(fx.broker.unsubscribe(id, SENSOR_A, 1, Characteristic::Vector).unwrap(), 0);
    assert!(fx.broker.subscriptions(id).unwrap().is_empty());
}

// ── Fan-out ──────────────────────────────────────────────────

#[test]
fn updates_only_reach_matching_subscribers() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 2);
    let (cb_a, got_a) = collector();
    let (cb_b, got_b) = collector();
    let a = fx.broker.register_local(Some(cb_a)).unwrap();
    let b = fx.broker.register_local(Some(cb_b)).unwrap();

    fx.broker.subscribe(a, SENSOR_A, 1, Characteristic::Measurement, false).unwrap();
    fx.broker.subscribe(b, SENSOR_A, 2, Characteristic::Measurement, false).unwrap();

    fx.notify(SENSOR_A, MEASUREMENT, false, &POWER_250W);

    assert_eq!(measurements(&got_a), 1);
    assert_eq!(measurements(&got_b), 0);
    let (_, event) = got_a.lock().unwrap().last().cloned().unwrap();
    match event {
        BrokerEvent::Measurement { instance, data, .. } => {
            assert_eq!(instance, 1);
            assert_eq!(data.instantaneous_power, 250);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn malformed_update_is_dropped() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();
    fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Measurement, false).unwrap();

    fx.notify(SENSOR_A, MEASUREMENT, false, &[0x00]);
    assert_eq!(measurements(&got), 0);
}

#[test]
fn remote_subscribers_receive_through_the_sink() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let remote = fx.broker.register_remote(12).unwrap();
    let resp = fx.broker.handle_request(
        12,
        BrokerRequest::Subscribe {
            subscriber: remote,
            address: SENSOR_A,
            instance: 1,
            characteristic: Characteristic::Measurement,
            enable: false,
        },
    );
    assert!(resp.is_success());

    fx.notify(SENSOR_A, MEASUREMENT, false, &POWER_250W);

    let events = fx.remote_events();
    assert_eq!(events.len(), 1);
    assert_eq!((events[0].0, events[0].1), (12, remote));
}

#[test]
fn callback_may_reenter_the_broker() {
    use std::sync::{Arc, Mutex};

    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let broker = fx.broker.clone();
    let seen: Arc<Mutex<Option<usize>>> = Arc::default();
    let seen_cb = seen.clone();
    let cb: cppm_broker::broker::subscriber::LocalCallback = Arc::new(move |_: u32, _: &BrokerEvent| {
        // Would deadlock if the broker still held its lock.
        *seen_cb.lock().unwrap() = broker.list_entities(4).ok().map(|(n, _)| n);
    });
    let id = fx.broker.register_local(Some(cb)).unwrap();
    fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Measurement, false).unwrap();

    fx.notify(SENSOR_A, MEASUREMENT, false, &POWER_250W);
    assert_eq!(*seen.lock().unwrap(), Some(1));
}

#[test]
fn panicking_callback_does_not_stop_delivery() {
    use std::sync::Arc;

    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let bad: cppm_broker::broker::subscriber::LocalCallback = Arc::new(|_: u32, _: &BrokerEvent| panic!("subscriber bug"));
    let (good_cb, got) = collector();
    let bad_id = fx.broker.register_local(Some(bad)).unwrap();
    let good_id = fx.broker.register_local(Some(good_cb)).unwrap();
    fx.broker.subscribe(bad_id, SENSOR_A, 1, Characteristic::Measurement, false).unwrap();
    fx.broker.subscribe(good_id, SENSOR_A, 1, Characteristic::Measurement, false).unwrap();

    fx.notify(SENSOR_A, MEASUREMENT, false, &POWER_250W);

    assert_eq!(measurements(&got), 1);
    assert!(fx.broker.list_entities(1).is_ok());
}

// ── Completions ──────────────────────────────────────────────

#[test]
fn write_ack_sets_state_and_reports_once() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    let txn = fx.broker.subscribe(id, SENSOR_A, 1, Characteristic::Measurement, true).unwrap();
    fx.ack_write(SENSOR_A, txn, MEASUREMENT_CCCD);
    // A repeated completion resolves nothing.
    fx.ack_write(SENSOR_A, txn, MEASUREMENT_CCCD);

    let record = fx.broker.instance_state(SENSOR_A, 1).unwrap();
    assert_ne!(record.state & StateMask::MEASUREMENT, 0);
    assert!(fx.broker.pending_transactions(id).unwrap().is_empty());

    let responses: Vec<_> = got
        .lock()
        .unwrap()
        .iter()
        .filter_map(|(_, e)| match e {
            BrokerEvent::WriteResponse {
                kind,
                transaction,
                status,
                ..
            } => Some((*kind, *transaction, *status)),
            _ => None,
        })
        .collect();
    assert_eq!(responses, vec![(WriteResponseKind::MeasurementsSet, txn, 0)]);
}

#[test]
fn error_response_carries_the_engine_status() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    let txn = fx.broker.enable_broadcast(id, SENSOR_A, 1).unwrap();
    fx.broker.handle_engine_event(EngineEvent::ErrorResponse {
        address: SENSOR_A,
        transaction: txn,
        handle: 0x13,
        error: EngineError::Att(0x03),
    });

    let last = got.lock().unwrap().last().cloned().unwrap().1;
    assert_eq!(
        last,
        BrokerEvent::WriteResponse {
            kind: WriteResponseKind::BroadcastsSet,
            address: SENSOR_A,
            instance: 1,
            transaction: txn,
            status: 0x03,
        }
    );
    let record = fx.broker.instance_state(SENSOR_A, 1).unwrap();
    assert_eq!(record.state & StateMask::BROADCAST, 0);
}

#[test]
fn broadcast_toggle_writes_the_server_configuration() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    let on = fx.broker.enable_broadcast(id, SENSOR_A, 1).unwrap();
    fx.ack_write(SENSOR_A, on, 0x13);
    assert_ne!(fx.broker.instance_state(SENSOR_A, 1).unwrap().state & StateMask::BROADCAST, 0);

    let off = fx.broker.disable_broadcast(id, SENSOR_A, 1).unwrap();
    fx.ack_write(SENSOR_A, off, 0x13);
    assert_eq!(fx.broker.instance_state(SENSOR_A, 1).unwrap().state & StateMask::BROADCAST, 0);
    assert_eq!(fx.engine.writes_to(0x13), vec![vec![0x01, 0x00], vec![0x00, 0x00]]);
}

#[test]
fn reads_update_the_instance_record() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    let features_txn = fx.broker.read_attribute(id, SENSOR_A, 1, ReadableAttribute::SensorFeatures).unwrap();
    let location_txn = fx.broker.read_attribute(id, SENSOR_A, 1, ReadableAttribute::SensorLocation).unwrap();
    assert!(matches!(fx.engine.calls()[0], EngineCall::Read { handle: 0x14, .. }));

    fx.broker.handle_engine_event(EngineEvent::ReadResponse {
        address: SENSOR_A,
        transaction: features_txn,
        handle: 0x14,
        value: vec![0x0C, 0x00, 0x00, 0x00],
    });
    fx.broker.handle_engine_event(EngineEvent::ReadResponse {
        address: SENSOR_A,
        transaction: location_txn,
        handle: 0x15,
        value: vec![0x05],
    });

    let record = fx.broker.instance_state(SENSOR_A, 1).unwrap();
    assert_eq!(record.features, 0x0C);
    assert_eq!(record.location, Some(SensorLocation::LeftCrank));

    let events = got.lock().unwrap().clone();
    assert!(events.iter().any(|(_, e)| matches!(
        e,
        BrokerEvent::SensorFeatures { features: 0x0C, status: 0, .. }
    )));
    assert!(events.iter().any(|(_, e)| matches!(
        e,
        BrokerEvent::SensorLocation {
            location: Some(SensorLocation::LeftCrank),
            status: 0,
            ..
        }
    )));
}
