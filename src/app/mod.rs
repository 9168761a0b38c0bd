//! Application core: the broker service and its ports.
//!
//! Everything that talks to the outside world (the GATT engine, the
//! bonded-device store, remote subscribers) does so through the
//! **port traits** in [`ports`], so the whole broker runs against mock
//! adapters in tests.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
