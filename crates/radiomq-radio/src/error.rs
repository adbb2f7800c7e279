//! Error types for radio operations
//!
//! Radio errors fall in three groups. Fatal errors (bus failures, mode switch
//! timeouts, a dead interrupt line) end the engine: the receive sequence is
//! closed and the error is latched for [`RadioHandle::error`]. Start-up
//! errors abort bring-up of one radio. [`RadioError::Busy`] is the only
//! retriable condition.
//!
//! [`RadioHandle::error`]: crate::engine::RadioHandle::error

use std::io;
use std::sync::Arc;
use thiserror::Error;

use crate::state::RadioState;

/// Main error type for radio operations
#[derive(Error, Debug, Clone)]
pub enum RadioError {
    // ===== Fatal =====
    /// Register bus transfer or configuration failed
    #[error("bus I/O error: {0}")]
    Bus(Arc<io::Error>),

    /// Interrupt line could not be configured
    #[error("interrupt line error: {0}")]
    InterruptLine(Arc<io::Error>),

    /// Chip did not report mode-ready in time
    #[error("{chip}: timeout switching modes {from} -> {to}")]
    ModeSwitchTimeout {
        /// Chip name
        chip: &'static str,
        /// Mode before the switch
        from: RadioState,
        /// Requested mode
        to: RadioState,
    },

    /// The interrupt waiter stopped delivering events
    #[error("interrupt waiter stopped")]
    WaiterStopped,

    // ===== Start-up =====
    /// Register write/read-back handshake failed
    #[error("{chip}: cannot sync with chip, pattern {pattern:#04x} not read back")]
    ChipNotResponding {
        /// Chip name
        chip: &'static str,
        /// Pattern that failed to read back
        pattern: u8,
    },

    /// The radio never raised its interrupt line during the self test
    #[error("{chip}: interrupts from radio do not work on {line}")]
    InterruptSelfTest {
        /// Chip name
        chip: &'static str,
        /// Interrupt line name
        line: String,
    },

    /// Sync word has an unusable length
    #[error("invalid sync word: {0}")]
    InvalidSyncWord(String),

    /// Bit rate or modem profile not in the parameter table
    #[error("unknown {kind} '{name}', valid: {valid}")]
    UnknownProfile {
        /// What was looked up ("bit rate", "LoRa config")
        kind: &'static str,
        /// Requested name
        name: String,
        /// Comma separated list of valid names
        valid: String,
    },

    // ===== Transmit =====
    /// Transmit queue is full, retry shortly
    #[error("radio busy, transmit queue full")]
    Busy,

    /// Engine has stopped
    #[error("radio closed: {cause}")]
    Closed {
        /// Latched fatal error, or why the engine stopped
        cause: String,
    },
}

impl RadioError {
    /// True if the engine cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RadioError::Bus(_)
                | RadioError::InterruptLine(_)
                | RadioError::ModeSwitchTimeout { .. }
                | RadioError::WaiterStopped
        )
    }

    /// True if the operation may succeed when retried after a short delay
    pub fn is_retriable(&self) -> bool {
        matches!(self, RadioError::Busy)
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            RadioError::Bus(_) => "BUS_IO",
            RadioError::InterruptLine(_) => "INTERRUPT_LINE",
            RadioError::ModeSwitchTimeout { .. } => "MODE_SWITCH_TIMEOUT",
            RadioError::WaiterStopped => "WAITER_STOPPED",
            RadioError::ChipNotResponding { .. } => "CHIP_NOT_RESPONDING",
            RadioError::InterruptSelfTest { .. } => "INTERRUPT_SELF_TEST",
            RadioError::InvalidSyncWord(_) => "INVALID_SYNC_WORD",
            RadioError::UnknownProfile { .. } => "UNKNOWN_PROFILE",
            RadioError::Busy => "BUSY",
            RadioError::Closed { .. } => "CLOSED",
        }
    }

    pub(crate) fn line(err: io::Error) -> Self {
        RadioError::InterruptLine(Arc::new(err))
    }
}

impl From<io::Error> for RadioError {
    fn from(err: io::Error) -> Self {
        RadioError::Bus(Arc::new(err))
    }
}

/// Result type alias for radio operations
pub type Result<T> = std::result::Result<T, RadioError>;
