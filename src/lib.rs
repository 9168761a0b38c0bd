//! CPPM collector capability broker.
//!
//! Sits between a GATT client engine and any number of local or remote
//! subscribers to Cycling Power sensors. The broker tracks connected
//! sensors and their service instances, multiplexes notification and
//! indication subscriptions onto a single set of CCCD writes, correlates
//! engine transactions back to the subscriber that caused them, and runs
//! the control point procedure timeout.
//!
//! The hexagonal split follows [`app`]: ports in [`app::ports`], the
//! request/event vocabulary in [`app::commands`] and [`app::events`], and
//! the thread-safe facade in [`app::service::Broker`]. The IPC surface for
//! remote subscribers lives in [`rpc`].

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod broker;
pub mod config;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod timer;
pub mod types;
