//! Chip driver interface used by the engine

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use radiomq_core::RawPacket;
use std::time::Instant;

use crate::error::Result;
use crate::hal::InterruptLine;
use crate::state::RadioState;
use crate::tuner::ThresholdStep;

/// When an interrupt was observed
#[derive(Debug, Clone, Copy)]
pub struct Interrupt {
    /// Wall clock, stamped on received packets
    pub at: DateTime<Utc>,
    /// Monotonic clock, used for receive deadlines
    pub instant: Instant,
}

impl Interrupt {
    /// Interrupt observed now
    pub fn now() -> Self {
        Self {
            at: Utc::now(),
            instant: Instant::now(),
        }
    }
}

/// Result of servicing an interrupt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A good packet
    Packet(RawPacket),
    /// Packet failed its CRC and was discarded
    CrcError,
    /// No packet by the deadline; receiver restarted
    Timeout,
    /// Length byte larger than the chip allows
    Oversize(usize),
    /// Receiver no longer sees a signal
    NotReceiving,
    /// Transmission finished, `confirmed` if the chip flagged it sent
    Sent {
        /// Chip reported packet-sent
        confirmed: bool,
    },
    /// Nothing to do for the current mode
    Spurious,
}

/// One radio chip
///
/// All methods are called from the engine thread only, so a driver owns its
/// bus exclusively and needs no locking of its own.
#[async_trait]
pub trait Modem: Send + 'static {
    /// Chip name for logs and errors
    fn chip(&self) -> &'static str;

    /// Largest payload the chip can send
    fn max_payload(&self) -> usize;

    /// Current mode as last set by the driver
    fn state(&self) -> RadioState;

    /// Bring the chip up: bus setup, handshake, configuration, interrupt
    /// self test. Blocking; the engine runs it off the async runtime.
    fn init(&mut self, line: &dyn InterruptLine) -> Result<()>;

    /// Enter continuous receive
    fn start_receiving(&mut self) -> Result<()>;

    /// Service an interrupt according to the current mode
    async fn on_interrupt(&mut self, intr: Interrupt) -> Result<Outcome>;

    /// True if a packet is arriving right now
    fn receiving(&mut self) -> Result<bool>;

    /// Finish an in-flight reception before transmitting
    async fn complete_reception(&mut self, intr: Interrupt) -> Result<Outcome> {
        self.on_interrupt(intr).await
    }

    /// Start transmitting; false if there was nothing to send
    fn send(&mut self, payload: &[u8]) -> Result<bool>;

    /// Periodic liveness check when no interrupt arrived for a while
    fn on_idle(&mut self) -> Result<()> {
        Ok(())
    }

    /// True if the chip has a tunable RSSI threshold
    fn tunes_threshold(&self) -> bool {
        false
    }

    /// Apply a threshold decision, returning the new threshold in dBm
    fn adjust_threshold(&mut self, _step: ThresholdStep) -> Result<Option<f64>> {
        Ok(None)
    }
}
