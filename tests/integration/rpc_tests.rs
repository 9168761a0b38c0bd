//! IPC path: framing, dispatch, ownership, rate limiting and the worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cppm_broker::adapters::ipc_sink::IpcEventSink;
use cppm_broker::adapters::store::MemoryStore;
use cppm_broker::app::commands::{BrokerRequest, BrokerResponse};
use cppm_broker::app::events::{BrokerEvent, DeviceEvent};
use cppm_broker::app::service::Broker;
use cppm_broker::config::BrokerConfig;
use cppm_broker::error::{STATUS_ALLOCATION_FAILURE, STATUS_SUBSCRIBER_NOT_FOUND};
use cppm_broker::rpc::channels::{IpcChannels, Notification};
use cppm_broker::rpc::codec::FrameDecoder;
use cppm_broker::rpc::engine::RpcEngine;
use cppm_broker::rpc::messages::{MESSAGE_GROUP, Message, MessageBody};
use cppm_broker::rpc::worker;
use cppm_broker::types::Characteristic;

use crate::mock_engine::{Fixture, MockEngine, SENSOR_A, instance_handles};

fn request(id: u32, req: BrokerRequest) -> Vec<u8> {
    Message::request(id, req).to_frame().unwrap()
}

fn decode_all(frames: &[Vec<u8>]) -> Vec<Message> {
    let mut decoder = FrameDecoder::new();
    let mut out = Vec::new();
    for f in frames {
        decoder.feed(f, |p| out.push(Message::decode(p).unwrap()));
    }
    out
}

fn response_of(msg: &Message) -> &BrokerResponse {
    match &msg.body {
        MessageBody::Response(r) => r,
        other => panic!("expected a response, got {:?}", other),
    }
}

// ── Dispatch ─────────────────────────────────────────────────

#[test]
fn register_echoes_id_and_function() {
    let fx = Fixture::new();
    let mut rpc = RpcEngine::new(20);

    let frames = rpc.feed_bytes(5, &request(77, BrokerRequest::Register), &*fx.broker);
    let msgs = decode_all(&frames);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].header.message_id, 77);
    assert_eq!(msgs[0].header.group, MESSAGE_GROUP);
    assert_eq!(msgs[0].header.function, 0x1001);
    assert_eq!(response_of(&msgs[0]), &BrokerResponse::Status(1));
    assert_eq!(rpc.client_count(), 1);
}

#[test]
fn frames_may_arrive_split_or_batched() {
    let fx = Fixture::new();
    let mut rpc = RpcEngine::new(20);

    let mut bytes = request(1, BrokerRequest::Register);
    bytes.extend(request(2, BrokerRequest::ListEntities { max: 4 }));

    let (head, tail) = bytes.split_at(3);
    assert!(rpc.feed_bytes(5, head, &*fx.broker).is_empty());
    let msgs = decode_all(&rpc.feed_bytes(5, tail, &*fx.broker));

    let ids: Vec<u32> = msgs.iter().map(|m| m.header.message_id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn clients_cannot_touch_each_others_subscribers() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 1);
    let mut rpc = RpcEngine::new(20);

    let owner = decode_all(&rpc.feed_bytes(5, &request(1, BrokerRequest::Register), &*fx.broker));
    let subscriber = response_of(&owner[0]).status() as u32;

    let subscribe = BrokerRequest::Subscribe {
        subscriber,
        address: SENSOR_A,
        instance: 1,
        characteristic: Characteristic::Measurement,
        enable: true,
    };
    let foreign = decode_all(&rpc.feed_bytes(6, &request(2, subscribe.clone()), &*fx.broker));
    assert_eq!(response_of(&foreign[0]).status(), STATUS_SUBSCRIBER_NOT_FOUND);
    assert!(fx.engine.calls().is_empty());

    let own = decode_all(&rpc.feed_bytes(5, &request(3, subscribe), &*fx.broker));
    assert!(response_of(&own[0]).status() > 0);
    assert_eq!(fx.engine.calls().len(), 1);
}

#[test]
fn list_requests_carry_their_payload() {
    let fx = Fixture::new();
    fx.connect(SENSOR_A, 2);
    let mut rpc = RpcEngine::new(20);

    let mut bytes = request(1, BrokerRequest::ListEntities { max: 8 });
    bytes.extend(request(2, BrokerRequest::ListInstances { address: SENSOR_A, max: 1 }));
    let msgs = decode_all(&rpc.feed_bytes(5, &bytes, &*fx.broker));

    assert_eq!(
        response_of(&msgs[0]),
        &BrokerResponse::Entities {
            status: 0,
            total: 1,
            addresses: vec![SENSOR_A]
        }
    );
    match response_of(&msgs[1]) {
        BrokerResponse::Instances { status, total, records } => {
            assert_eq!((*status, *total), (0, 2));
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].instance, 1);
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[test]
fn bursts_beyond_the_rate_limit_are_refused() {
    let fx = Fixture::new();
    let mut rpc = RpcEngine::new(2);

    let mut bytes = Vec::new();
    for id in 0..3 {
        bytes.extend(request(id, BrokerRequest::ListEntities { max: 1 }));
    }
    let msgs = decode_all(&rpc.feed_bytes(5, &bytes, &*fx.broker));
    let statuses: Vec<i32> = msgs.iter().map(|m| response_of(m).status()).collect();
    assert_eq!(statuses, vec![0, 0, STATUS_ALLOCATION_FAILURE]);

    // Another client has its own bucket.
    let other = decode_all(&rpc.feed_bytes(6, &request(9, BrokerRequest::ListEntities { max: 1 }), &*fx.broker));
    assert_eq!(response_of(&other[0]).status(), 0);
}

#[test]
fn invalid_input_gets_no_response() {
    let fx = Fixture::new();
    let mut rpc = RpcEngine::new(20);

    // Reserved origin.
    assert!(rpc.feed_bytes(0, &request(1, BrokerRequest::Register), &*fx.broker).is_empty());

    // Undecodable payload.
    let junk = cppm_broker::rpc::codec::frame_to_vec(&[0xFF, 0xFF, 0xFF]).unwrap();
    assert!(rpc.feed_bytes(5, &junk, &*fx.broker).is_empty());

    // A response is not a request.
    let stray = Message::response(&Message::request(1, BrokerRequest::Register).header, BrokerResponse::Status(0));
    assert!(rpc.feed_bytes(5, &stray.to_frame().unwrap(), &*fx.broker).is_empty());
}

#[test]
fn client_disconnect_removes_its_subscribers() {
    let fx = Fixture::new();
    let mut rpc = RpcEngine::new(20);
    let msgs = decode_all(&rpc.feed_bytes(5, &request(1, BrokerRequest::Register), &*fx.broker));
    let subscriber = response_of(&msgs[0]).status() as u32;

    rpc.client_disconnected(5, &*fx.broker);
    assert_eq!(rpc.client_count(), 0);
    assert!(fx.broker.subscriptions(subscriber).is_err());
}

// ── Worker ───────────────────────────────────────────────────

fn wait_for_frames(channels: &IpcChannels, count: usize) -> Vec<Vec<u8>> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut frames = Vec::new();
    while frames.len() < count && Instant::now() < deadline {
        match channels.try_recv_frame() {
            Some(f) => frames.push(f.frame),
            None => std::thread::sleep(Duration::from_millis(5)),
        }
    }
    frames
}

#[test]
fn worker_serves_requests_and_pushes_events() {
    let channels = Arc::new(IpcChannels::new());
    let (engine, _) = MockEngine::new();
    let config = BrokerConfig::default();
    let broker = Arc::new(Broker::new(
        config.clone(),
        engine,
        MemoryStore::new(),
        IpcEventSink::new(channels.clone()),
    ));
    broker.start().unwrap();
    let handle = worker::spawn(broker.clone(), channels.clone(), &config).unwrap();

    assert!(channels.feed_bytes(3, &request(10, BrokerRequest::Register)));
    let reply = decode_all(&wait_for_frames(&channels, 1));
    assert_eq!(reply.len(), 1);
    let subscriber = response_of(&reply[0]).status() as u32;

    assert!(channels.notify(Notification::Device(DeviceEvent::Connected {
        address: SENSOR_A,
        services: vec![instance_handles(1)],
    })));
    let pushed = decode_all(&wait_for_frames(&channels, 1));
    assert_eq!(pushed.len(), 1);
    assert_eq!(
        pushed[0].body,
        MessageBody::Event {
            subscriber,
            event: BrokerEvent::Connected {
                address: SENSOR_A,
                instance_count: 1
            }
        }
    );
    assert!(pushed[0].header.message_id >= 0x8000_0000);

    assert!(channels.client_gone(3));
    assert!(channels.notify(Notification::Shutdown));
    handle.join().unwrap();
    assert!(broker.subscriptions(subscriber).is_err());
}
