//! Control-point procedures: arming, completion, timeout and replacement.

use cppm_broker::app::events::{BrokerEvent, DeviceEvent, WriteResponseKind};
use cppm_broker::broker::procedure::ProcedureState;
use cppm_broker::config::BrokerConfig;
use cppm_broker::protocol::{ProcedureRequest, ResponseCode, ResponseParameter};
use cppm_broker::types::{SubscriberId, TransactionId};

use crate::mock_engine::{Fixture, Received, SENSOR_A, collector};

const CONTROL_POINT: u16 = 0x18;

/// Success response to "request crank length", 172.5 mm.
const CRANK_LENGTH_RESPONSE: [u8; 5] = [0x20, 0x05, 0x01, 0x5D, 0x03];

fn fixture() -> Fixture {
    let config = BrokerConfig {
        procedure_timeout_ms: 1_000,
        ..BrokerConfig::default()
    };
    let fx = Fixture::with_config(config);
    fx.connect(SENSOR_A, 1);
    fx
}

fn procedure_events(received: &Received) -> Vec<(SubscriberId, BrokerEvent)> {
    received
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, e)| matches!(e, BrokerEvent::ControlPoint { .. }))
        .cloned()
        .collect()
}

fn start(fx: &Fixture, subscriber: SubscriberId, request: ProcedureRequest) -> TransactionId {
    let txn = fx.broker.write_control_point(subscriber, SENSOR_A, 1, request).unwrap();
    fx.ack_write(SENSOR_A, txn, CONTROL_POINT);
    txn
}

#[test]
fn request_is_encoded_onto_the_control_point() {
    let fx = fixture();
    let (cb, _) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    fx.broker
        .write_control_point(id, SENSOR_A, 1, ProcedureRequest::SetCrankLength(1725))
        .unwrap();
    assert_eq!(fx.engine.writes_to(CONTROL_POINT), vec![vec![0x04, 0xBD, 0x06]]);
}

#[test]
fn procedure_arms_only_after_the_write_is_acknowledged() {
    let fx = fixture();
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    let txn = fx
        .broker
        .write_control_point(id, SENSOR_A, 1, ProcedureRequest::RequestCrankLength)
        .unwrap();
    assert_eq!(fx.broker.procedure_state(SENSOR_A, 1), Ok(ProcedureState::Idle));

    fx.ack_write(SENSOR_A, txn, CONTROL_POINT);
    assert_eq!(fx.broker.procedure_state(SENSOR_A, 1), Ok(ProcedureState::AwaitingIndication));

    let last = got.lock().unwrap().last().cloned().unwrap().1;
    assert!(matches!(
        last,
        BrokerEvent::WriteResponse {
            kind: WriteResponseKind::ProcedureBegun,
            status: 0,
            ..
        }
    ));
}

#[test]
fn indication_completes_the_procedure_once() {
    let fx = fixture();
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();
    start(&fx, id, ProcedureRequest::RequestCrankLength);

    fx.notify(SENSOR_A, CONTROL_POINT, true, &CRANK_LENGTH_RESPONSE);
    // A late duplicate finds nothing waiting.
    fx.notify(SENSOR_A, CONTROL_POINT, true, &CRANK_LENGTH_RESPONSE);
    fx.broker.tick(5_000);

    let results = procedure_events(&got);
    assert_eq!(results.len(), 1);
    match &results[0].1 {
        BrokerEvent::ControlPoint {
            timeout: false,
            response: Some(r),
            ..
        } => {
            assert_eq!(r.request_opcode, 0x05);
            assert_eq!(r.response_code, ResponseCode::Success);
            assert_eq!(r.parameter, Some(ResponseParameter::CrankLength(861)));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(fx.broker.procedure_state(SENSOR_A, 1), Ok(ProcedureState::Idle));
}

#[test]
fn timeout_fires_exactly_once() {
    let fx = fixture();
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();
    start(&fx, id, ProcedureRequest::StartOffsetCompensation);

    fx.broker.tick(999);
    assert!(procedure_events(&got).is_empty());

    fx.broker.tick(1);
    fx.broker.tick(1_000);
    fx.notify(SENSOR_A, CONTROL_POINT, true, &[0x20, 0x0C, 0x01, 0x00, 0x00]);

    let results = procedure_events(&got);
    assert_eq!(
        results,
        vec![(
            id,
            BrokerEvent::ControlPoint {
                address: SENSOR_A,
                instance: 1,
                timeout: true,
                response: None,
            }
        )]
    );
    assert_eq!(fx.broker.procedure_state(SENSOR_A, 1), Ok(ProcedureState::Idle));
}

#[test]
fn result_goes_only_to_the_originator() {
    let fx = fixture();
    let (cb_a, got_a) = collector();
    let (cb_b, got_b) = collector();
    let a = fx.broker.register_local(Some(cb_a)).unwrap();
    let b = fx.broker.register_local(Some(cb_b)).unwrap();
    fx.broker
        .subscribe(b, SENSOR_A, 1, cppm_broker::types::Characteristic::ControlPoint, false)
        .unwrap();

    start(&fx, a, ProcedureRequest::RequestCrankLength);
    fx.notify(SENSOR_A, CONTROL_POINT, true, &CRANK_LENGTH_RESPONSE);

    assert_eq!(procedure_events(&got_a).len(), 1);
    assert!(procedure_events(&got_b).is_empty());
}

#[test]
fn second_write_replaces_the_waiting_procedure() {
    let fx = fixture();
    let (cb_a, got_a) = collector();
    let (cb_b, got_b) = collector();
    let a = fx.broker.register_local(Some(cb_a)).unwrap();
    let b = fx.broker.register_local(Some(cb_b)).unwrap();

    start(&fx, a, ProcedureRequest::RequestChainLength);
    fx.broker.tick(600);
    start(&fx, b, ProcedureRequest::RequestCrankLength);

    // The first timer would have fired here.
    fx.broker.tick(500);
    assert!(procedure_events(&got_a).is_empty());
    assert!(procedure_events(&got_b).is_empty());

    fx.notify(SENSOR_A, CONTROL_POINT, true, &CRANK_LENGTH_RESPONSE);
    assert!(procedure_events(&got_a).is_empty());
    assert_eq!(procedure_events(&got_b).len(), 1);
}

#[test]
fn notification_on_the_control_point_is_ignored() {
    let fx = fixture();
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();
    start(&fx, id, ProcedureRequest::RequestCrankLength);

    fx.notify(SENSOR_A, CONTROL_POINT, false, &CRANK_LENGTH_RESPONSE);
    assert!(procedure_events(&got).is_empty());
    assert_eq!(fx.broker.procedure_state(SENSOR_A, 1), Ok(ProcedureState::AwaitingIndication));
}

#[test]
fn malformed_indication_leaves_the_timer_running() {
    let fx = fixture();
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();
    start(&fx, id, ProcedureRequest::RequestCrankLength);

    fx.notify(SENSOR_A, CONTROL_POINT, true, &[0x20, 0x05]);
    assert_eq!(fx.broker.procedure_state(SENSOR_A, 1), Ok(ProcedureState::AwaitingIndication));

    fx.broker.tick(1_000);
    let results = procedure_events(&got);
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].1, BrokerEvent::ControlPoint { timeout: true, .. }));
}

#[test]
fn disconnect_cancels_the_procedure() {
    let fx = fixture();
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();
    start(&fx, id, ProcedureRequest::RequestCrankLength);

    fx.broker.handle_device_event(DeviceEvent::Disconnected { address: SENSOR_A });
    fx.broker.tick(2_000);
    assert!(procedure_events(&got).is_empty());

    fx.connect(SENSOR_A, 1);
    assert_eq!(fx.broker.procedure_state(SENSOR_A, 1), Ok(ProcedureState::Idle));
}

#[test]
fn failed_write_never_arms() {
    let fx = fixture();
    let (cb, got) = collector();
    let id = fx.broker.register_local(Some(cb)).unwrap();

    let txn = fx
        .broker
        .write_control_point(id, SENSOR_A, 1, ProcedureRequest::RequestCrankLength)
        .unwrap();
    fx.broker.handle_engine_event(cppm_broker::app::events::EngineEvent::ErrorResponse {
        address: SENSOR_A,
        transaction: txn,
        handle: CONTROL_POINT,
        error: cppm_broker::error::EngineError::Att(0x80),
    });

    assert_eq!(fx.broker.procedure_state(SENSOR_A, 1), Ok(ProcedureState::Idle));
    fx.broker.tick(2_000);
    assert!(procedure_events(&got).is_empty());
}
