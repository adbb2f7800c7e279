//! radiomq gateway - packet radios on a pub/sub bus
//!
//! Wires radios and protocol modules to a [`MessageBus`] according to a
//! [`GatewayConfig`].
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  <prefix>/rx   ┌────────────┐   jl-ack, jll-decode, ...
//!  │  Radio   │ ─────────────► │            │ ─────────────────────────┐
//!  │ (engine) │                │ MessageBus │                          │
//!  │          │ ◄───────────── │            │ ◄────────────────────────┘
//!  └──────────┘  <prefix>/tx   └─────┬──────┘   module outputs
//!                                    │
//!                                    ▼
//!                                  Broker
//! ```
//!
//! # Modules
//!
//! - [`config`] - Configuration types, JSON loading, validation
//! - [`gateway`] - Start-up sequence
//! - [`radio`] - Radio to bus wiring
//! - [`hardware`] - SPI and pin access, shared-bus resolution
//! - [`modules`] - Module registry and the built-in modules
//! - [`router`] - Module instantiation
//! - [`logging`] - Subscriber set-up
//! - [`test_utils`] - Simulated hardware
//!
//! [`MessageBus`]: radiomq_bus::MessageBus

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod hardware;
pub mod logging;
pub mod modules;
pub mod radio;
pub mod router;
pub mod test_utils;

pub use config::{GatewayConfig, GatewayConfigBuilder, ModuleConfig, RadioConfig, RadioKind};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use hardware::{HardwareProvider, MuxTable};
pub use modules::{ModuleContext, ModuleRegistry, ModuleSpec, Outbound};
pub use radio::{start_radio, RadioLink};
pub use router::Router;
