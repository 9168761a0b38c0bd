//! Mock adapters for integration tests.
//!
//! [`MockEngine`] records every GATT call and hands out sequential
//! transaction ids; [`RecordingSink`] records every remote delivery. Both
//! keep their logs behind shared handles so tests can inspect them after
//! the adapters have moved into the broker.

use std::sync::{Arc, Mutex};

use cppm_broker::adapters::store::MemoryStore;
use cppm_broker::app::events::{BrokerEvent, DeviceEvent, EngineEvent};
use cppm_broker::app::ports::{EventSink, GattEngine};
use cppm_broker::app::service::Broker;
use cppm_broker::broker::subscriber::LocalCallback;
use cppm_broker::config::BrokerConfig;
use cppm_broker::error::EngineError;
use cppm_broker::types::{AttributeKind, BdAddr, OriginId, ServiceHandles, SubscriberId, TransactionId};

// ── Engine call record ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Write {
        txn: TransactionId,
        address: BdAddr,
        handle: u16,
        value: Vec<u8>,
    },
    Read {
        txn: TransactionId,
        address: BdAddr,
        handle: u16,
    },
}

#[allow(dead_code)]
impl EngineCall {
    pub fn txn(&self) -> TransactionId {
        match self {
            Self::Write { txn, .. } | Self::Read { txn, .. } => *txn,
        }
    }

    pub fn handle(&self) -> u16 {
        match self {
            Self::Write { handle, .. } | Self::Read { handle, .. } => *handle,
        }
    }
}

// ── MockEngine ────────────────────────────────────────────────

#[derive(Default)]
struct EngineShared {
    calls: Vec<EngineCall>,
    refuse_with: Option<EngineError>,
}

/// Shared view on a [`MockEngine`]'s history.
#[derive(Clone, Default)]
pub struct EngineLog(Arc<Mutex<EngineShared>>);

#[allow(dead_code)]
impl EngineLog {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn writes_to(&self, handle: u16) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Write { handle: h, value, .. } if h == handle => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn last(&self) -> Option<EngineCall> {
        self.0.lock().unwrap().calls.last().cloned()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().calls.clear();
    }

    /// Make every following call fail with `error`.
    pub fn refuse(&self, error: Option<EngineError>) {
        self.0.lock().unwrap().refuse_with = error;
    }
}

pub struct MockEngine {
    log: EngineLog,
    next_txn: TransactionId,
}

impl MockEngine {
    pub fn new() -> (Self, EngineLog) {
        let log = EngineLog::default();
        (
            Self {
                log: log.clone(),
                next_txn: 100,
            },
            log,
        )
    }

    fn record(&mut self, call: impl FnOnce(TransactionId) -> EngineCall) -> Result<TransactionId, EngineError> {
        let mut shared = self.log.0.lock().unwrap();
        if let Some(e) = shared.refuse_with {
            return Err(e);
        }
        let txn = self.next_txn;
        self.next_txn += 1;
        shared.calls.push(call(txn));
        Ok(txn)
    }
}

impl GattEngine for MockEngine {
    fn write_value(&mut self, address: BdAddr, handle: u16, value: &[u8]) -> Result<TransactionId, EngineError> {
        let value = value.to_vec();
        self.record(|txn| EngineCall::Write {
            txn,
            address,
            handle,
            value,
        })
    }

    fn read_value(&mut self, address: BdAddr, handle: u16) -> Result<TransactionId, EngineError> {
        self.record(|txn| EngineCall::Read { txn, address, handle })
    }
}

// ── RecordingSink ─────────────────────────────────────────────

pub type Delivered = Arc<Mutex<Vec<(OriginId, SubscriberId, BrokerEvent)>>>;

#[derive(Default)]
pub struct RecordingSink {
    pub events: Delivered,
}

impl EventSink for RecordingSink {
    fn deliver(&mut self, origin: OriginId, subscriber: SubscriberId, event: &BrokerEvent) {
        self.events.lock().unwrap().push((origin, subscriber, event.clone()));
    }
}

// ── Local subscriber helper ───────────────────────────────────

pub type Received = Arc<Mutex<Vec<(SubscriberId, BrokerEvent)>>>;

/// A callback that stores everything it is given.
pub fn collector() -> (LocalCallback, Received) {
    let received: Received = Arc::default();
    let sink = received.clone();
    let cb: LocalCallback = Arc::new(move |id: SubscriberId, event: &BrokerEvent| {
        sink.lock().unwrap().push((id, event.clone()));
    });
    (cb, received)
}

// ── Fixture ───────────────────────────────────────────────────

pub type TestBroker = Broker<MockEngine, MemoryStore, RecordingSink>;

pub struct Fixture {
    pub broker: Arc<TestBroker>,
    pub engine: EngineLog,
    pub remote: Delivered,
}

pub const SENSOR_A: BdAddr = BdAddr([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x0B]);
pub const SENSOR_B: BdAddr = BdAddr([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x02]);

/// Handle layout: instance `n` occupies `0x10 * n + 1 ..= 0x10 * n + 9`.
pub fn instance_handles(n: u16) -> ServiceHandles {
    let base = 0x10 * n;
    ServiceHandles::new()
        .with(AttributeKind::Measurement, base + 1)
        .with(AttributeKind::MeasurementCccd, base + 2)
        .with(AttributeKind::MeasurementSccd, base + 3)
        .with(AttributeKind::Feature, base + 4)
        .with(AttributeKind::SensorLocation, base + 5)
        .with(AttributeKind::Vector, base + 6)
        .with(AttributeKind::VectorCccd, base + 7)
        .with(AttributeKind::ControlPoint, base + 8)
        .with(AttributeKind::ControlPointCccd, base + 9)
}

#[allow(dead_code)]
impl Fixture {
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        let (engine, log) = MockEngine::new();
        let sink = RecordingSink::default();
        let remote = sink.events.clone();
        let broker = Arc::new(Broker::new(config, engine, MemoryStore::new(), sink));
        broker.start().unwrap();
        Self {
            broker,
            engine: log,
            remote,
        }
    }

    /// Connect `address` with `instances` service instances.
    pub fn connect(&self, address: BdAddr, instances: u16) {
        let services = (1..=instances).map(instance_handles).collect();
        self.broker.handle_device_event(DeviceEvent::Connected { address, services });
    }

    pub fn ack_write(&self, address: BdAddr, txn: TransactionId, handle: u16) {
        self.broker.handle_engine_event(EngineEvent::WriteResponse {
            address,
            transaction: txn,
            handle,
        });
    }

    pub fn ack_last_write(&self, address: BdAddr) {
        let call = self.engine.last().expect("no engine call recorded");
        self.ack_write(address, call.txn(), call.handle());
    }

    pub fn notify(&self, address: BdAddr, handle: u16, indication: bool, value: &[u8]) {
        self.broker.handle_engine_event(EngineEvent::HandleValue {
            address,
            handle,
            indication,
            value: value.to_vec(),
        });
    }

    pub fn remote_events(&self) -> Vec<(OriginId, SubscriberId, BrokerEvent)> {
        self.remote.lock().unwrap().clone()
    }
}
