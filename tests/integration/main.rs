//! Integration test driver for `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that exercises one broker subsystem
//! against mock adapters. Everything runs on the host; no GATT engine or
//! IPC transport is required.

mod mock_engine;
mod multiplexer_tests;
mod procedure_tests;
mod rpc_tests;
