//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements   | Connects to                   |
//! |------------|--------------|-------------------------------|
//! | `ipc_sink` | EventSink    | IPC outbound frame channel    |
//! | `log_sink` | EventSink    | Log output                    |
//! | `store`    | StoragePort  | In-memory map / JSON file     |

pub mod ipc_sink;
pub mod log_sink;
pub mod store;
