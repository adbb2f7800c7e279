//! radiomq radio - interrupt-driven packet engine for sub-GHz radios
//!
//! This crate turns a radio chip behind a register bus and an interrupt
//! line into a stream of [`RawPacket`]s and a transmit sink.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      RadioEngine                          │
//! │   ┌────────────┐   ┌────────────┐   ┌──────────────────┐  │
//! │   │ line waiter│   │ TX queue   │   │ threshold tuner  │  │
//! │   │ (thread)   │   │ (4)        │   │ (10s)            │  │
//! │   └─────┬──────┘   └─────┬──────┘   └────────┬─────────┘  │
//! │         └────────────────┼───────────────────┘            │
//! │                          ▼                                │
//! │                ┌────────────────────┐                     │
//! │                │ Modem (SX1231 /    │                     │
//! │                │        SX1276)     │                     │
//! │                └─────────┬──────────┘                     │
//! │                          ▼                                │
//! │          RegisterBus ─► RadioBus (SPI, SpiMux, sim)       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`engine`] - Worker loop, handle, fatal error latching
//! - [`modem`] - Chip driver trait
//! - [`sx1231`] - FSK driver (RFM69)
//! - [`sx1276`] - LoRa driver (RFM9x)
//! - [`hal`] - Bus, interrupt line and pin traits
//! - [`spimux`] - Two radios on one bus
//! - [`tuner`] - Adaptive RSSI threshold
//! - [`test_utils`] - Register-file chip simulators
//!
//! [`RawPacket`]: radiomq_core::RawPacket

#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod hal;
pub mod modem;
pub mod regs;
pub mod spimux;
pub mod state;
pub mod sx1231;
pub mod sx1276;
pub mod test_utils;
pub mod tuner;

pub use engine::{EngineConfig, RadioEngine, RadioHandle};
pub use error::{RadioError, Result};
pub use hal::{Edge, InterruptLine, OutputPin, RadioBus, SpiMode};
pub use modem::{Interrupt, Modem, Outcome};
pub use spimux::{split, MuxedBus};
pub use state::{RadioState, RadioStats};
pub use sx1231::{Sx1231, Sx1231Config};
pub use sx1276::{Sx1276, Sx1276Config};
pub use tuner::{ThresholdStep, ThresholdTuner};
