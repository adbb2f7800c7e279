//! radiomq core - link-layer codecs and message types
//!
//! This crate holds everything about packets that does not touch hardware
//! or the network: the two JeeLabs link formats, the varint payload
//! encoding, payload format rendering and the typed message envelopes the
//! gateway routes between radios and the bus.
//!
//! # Modules
//!
//! - [`codec`] - JeeLabs FSK format: addressing, ack request, group parity
//! - [`jll`] - JeeLabs LoRa format: packet kinds, payload type, info trailer
//! - [`varint`] - JeeLabs signed varints
//! - [`format`] - Payload type registry and renderers
//! - [`packet`] - Raw packets and signal-quality metadata
//! - [`message`] - Bus message envelopes
//! - [`topic`] - Topic naming convention
//! - [`error`] - Codec errors
//!
//! # Example
//!
//! ```rust
//! use radiomq_core::codec;
//!
//! let pkt = codec::encode(6, 2, 1, true, b"hi");
//! let ack = codec::make_ack(6, &pkt).unwrap();
//! let decoded = codec::decode(6, &ack).unwrap();
//! assert_eq!((decoded.src, decoded.dst), (1, 2));
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod format;
pub mod jll;
pub mod message;
pub mod packet;
pub mod topic;
pub mod varint;

pub use codec::AddressedPacket;
pub use error::{CodecError, Result};
pub use format::{FormatRegistry, PayloadFormat};
pub use jll::{JllPacket, LinkQualityScale, PacketKind};
pub use message::{Decoded, Message, MessagePayload, NodePacket, NodeTx, PayloadKind, RawTx};
pub use packet::{LinkQuality, RawPacket};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
