//! Serialized broker worker.
//!
//! Runs in a dedicated thread using `edge-executor` for cooperative
//! scheduling and `async-io-mini` for reactor-driven timers. Three
//! concurrent futures share the thread, so every broker operation runs on
//! this one context:
//!
//! 1. **Requests**: wakes on inbound client bytes, dispatches them
//!    through the [`RpcEngine`] and queues the response frames
//! 2. **Notifications**: engine events, device events and client-gone
//!    notices; a `Shutdown` notification ends the worker
//! 3. **Tick**: advances procedure timers every `timer_tick_ms`
//!
//! ```text
//!  ┌────────────────────────────────────────────────────────┐
//!  │  Worker thread                                         │
//!  │  ┌──────────────────────────────────────────────────┐  │
//!  │  │  edge_executor::LocalExecutor                    │  │
//!  │  │  ┌──────────┐  ┌───────────────┐  ┌───────────┐  │  │
//!  │  │  │ Requests │  │ Notifications │  │   Tick    │  │  │
//!  │  │  │ wake-on- │  │ wake-on-send  │  │ 100ms ⏱  │  │  │
//!  │  │  │ send     │  │ (runs until   │  │           │  │  │
//!  │  │  │          │  │  Shutdown)    │  │           │  │  │
//!  │  │  └──────────┘  └───────────────┘  └───────────┘  │  │
//!  │  └──────────────────────────────────────────────────┘  │
//!  └────────────────────────────────────────────────────────┘
//! ```

use core::cell::RefCell;
use core::time::Duration;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use log::info;

use super::channels::{IpcChannels, Notification};
use super::engine::RpcEngine;
use crate::app::ports::{EventSink, GattEngine, StoragePort};
use crate::app::service::Broker;
use crate::config::BrokerConfig;

const WORKER_STACK_SIZE: usize = 64 * 1024;

type SharedEngine = Rc<RefCell<RpcEngine>>;

// ── Tasks ────────────────────────────────────────────────────

async fn request_loop<E, S, K>(broker: Arc<Broker<E, S, K>>, channels: Arc<IpcChannels>, engine: SharedEngine)
where
    E: GattEngine,
    S: StoragePort,
    K: EventSink,
{
    loop {
        let msg = channels.recv_bytes().await;
        let frames = engine.borrow_mut().feed_bytes(msg.origin, &msg.data, &*broker);
        for frame in frames {
            channels.send_frame(msg.origin, frame);
        }
    }
}

/// Returns when a `Shutdown` notification arrives.
async fn notification_loop<E, S, K>(broker: Arc<Broker<E, S, K>>, channels: Arc<IpcChannels>, engine: SharedEngine)
where
    E: GattEngine,
    S: StoragePort,
    K: EventSink,
{
    loop {
        match channels.recv_notification().await {
            Notification::Engine(event) => broker.handle_engine_event(event),
            Notification::Device(event) => broker.handle_device_event(event),
            Notification::ClientGone(origin) => engine.borrow_mut().client_disconnected(origin, &*broker),
            Notification::Shutdown => {
                info!("IO: shutdown requested");
                return;
            }
        }
    }
}

/// The reactor timer only bounds the wait; elapsed time is measured so a
/// late wake still advances procedure timers by the real amount.
async fn tick_loop<E, S, K>(broker: Arc<Broker<E, S, K>>, tick_ms: u32)
where
    E: GattEngine,
    S: StoragePort,
    K: EventSink,
{
    let mut last = Instant::now();
    loop {
        async_io_mini::Timer::after(Duration::from_millis(u64::from(tick_ms))).await;
        let elapsed = u32::try_from(last.elapsed().as_millis()).unwrap_or(u32::MAX);
        last += Duration::from_millis(u64::from(elapsed));
        broker.tick(elapsed);
    }
}

// ── Entry point ──────────────────────────────────────────────

fn run_worker<E, S, K>(broker: Arc<Broker<E, S, K>>, channels: Arc<IpcChannels>, tick_ms: u32, requests_per_sec: u32)
where
    E: GattEngine,
    S: StoragePort,
    K: EventSink,
{
    let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();
    let engine: SharedEngine = Rc::new(RefCell::new(RpcEngine::new(requests_per_sec)));

    executor
        .spawn(request_loop(broker.clone(), channels.clone(), engine.clone()))
        .detach();
    executor.spawn(tick_loop(broker.clone(), tick_ms)).detach();

    info!("IO: broker worker started (tick {} ms, {} req/s per client)", tick_ms, requests_per_sec);

    futures_lite::future::block_on(executor.run(notification_loop(broker, channels, engine)));

    info!("IO: broker worker stopped");
}

/// Spawn the worker thread.
///
/// The broker should already be started; requests arriving before
/// [`Broker::start`] are answered with `NotInitialized`.
pub fn spawn<E, S, K>(
    broker: Arc<Broker<E, S, K>>,
    channels: Arc<IpcChannels>,
    config: &BrokerConfig,
) -> std::io::Result<std::thread::JoinHandle<()>>
where
    E: GattEngine + Send + 'static,
    S: StoragePort + Send + 'static,
    K: EventSink + Send + 'static,
{
    let tick_ms = config.timer_tick_ms;
    let requests_per_sec = config.ipc_requests_per_sec;
    std::thread::Builder::new()
        .name("cppm-broker".into())
        .stack_size(WORKER_STACK_SIZE)
        .spawn(move || run_worker(broker, channels, tick_ms, requests_per_sec))
}
