//! IPC subsystem.
//!
//! Length-prefixed binary frames carrying postcard-encoded messages.
//! Remote clients talk to the broker through this stack; events flow back
//! through the same frames.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        IPC Stack                           │
//! │                                                            │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────┐   │
//! │  │ Channels │──▶│  Codec   │──▶│  Engine (dispatcher)  │   │
//! │  │ (bytes)  │   │ (framing)│   │  → Broker             │   │
//! │  └──────────┘   └──────────┘   └───────────────────────┘   │
//! │       ▲                                    │               │
//! │       │              ┌─────────────────────┘               │
//! │       │              ▼                                     │
//! │  ┌──────────┐   ┌──────────┐                               │
//! │  │ Channels │◀──│ Messages │   (responses + events)        │
//! │  │ (frames) │   │ (encode) │                               │
//! │  └──────────┘   └──────────┘                               │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`worker`] module runs all of it on one serialized context.

pub mod channels;
pub mod codec;
pub mod engine;
pub mod messages;
pub mod worker;
