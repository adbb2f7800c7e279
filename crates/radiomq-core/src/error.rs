//! Error types for link-layer packet decoding
//!
//! Codec errors are per-packet conditions: a receiver logs and counts them
//! and keeps going. They never indicate a problem with the radio itself.

use thiserror::Error;

/// Errors produced while decoding link-layer packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Packet does not even hold the 2-byte header
    #[error("packet too short: {len} bytes")]
    TooShort {
        /// Number of bytes received
        len: usize,
    },

    /// Group parity bits in the header do not match the configured group
    #[error("bad group parity: got {got:#04x} want {want:#04x} for group {group}")]
    GroupMismatch {
        /// Parity bits found in byte 0 (already masked with 0xc0)
        got: u8,
        /// Parity bits computed from the configured group
        want: u8,
        /// Configured group id
        group: u8,
    },
}

impl CodecError {
    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            CodecError::TooShort { .. } => "TOO_SHORT",
            CodecError::GroupMismatch { .. } => "GROUP_MISMATCH",
        }
    }
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
