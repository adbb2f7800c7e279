//! radiomq bus - topic pub/sub with local short-circuit delivery
//!
//! Modules and radios in one gateway process exchange [`Message`]s through a
//! [`MessageBus`]. A publish reaches local subscribers immediately and is
//! also sent to an external [`Broker`] so other processes see it. The
//! broker's echo of our own publish is recognized and dropped.
//!
//! # Architecture
//!
//! ```text
//! publish(topic, payload)
//!     │
//!     ├──► local hooks on topic (registration order)
//!     │
//!     └──► CBOR ──► dedup table ──► Broker::publish
//!                       ▲                 │
//!                       │ echo?           ▼
//!                       └──────── broker callback ──► decode ──► handler
//! ```
//!
//! # Modules
//!
//! - [`bus`] - The message bus and its counters
//! - [`broker`] - Broker trait and the in-process loopback broker
//! - [`dedup`] - Echo suppression table
//! - [`wire`] - CBOR payload encoding
//! - [`config`] - Bus settings
//!
//! [`Message`]: radiomq_core::Message

#![warn(missing_docs)]

pub mod broker;
pub mod bus;
pub mod config;
pub mod dedup;
pub mod error;
pub mod wire;

pub use broker::{Broker, InboundCallback, LoopbackBroker};
pub use bus::{BusStats, Handler, MessageBus};
pub use config::BusConfig;
pub use dedup::{DedupKey, DedupTable};
pub use error::{BusError, Result};
