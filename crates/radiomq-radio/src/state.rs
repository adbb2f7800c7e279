//! Radio operating state and engine counters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operating mode of a radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioState {
    /// Lowest power, registers retained
    Sleep,
    /// Oscillator running, idle
    Standby,
    /// Frequency synthesizer running, ready to switch to TX or RX
    FrequencySynthesis,
    /// Transmitting a packet
    Transmitting,
    /// Listening for packets
    Receiving,
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioState::Sleep => write!(f, "sleep"),
            RadioState::Standby => write!(f, "standby"),
            RadioState::FrequencySynthesis => write!(f, "fs"),
            RadioState::Transmitting => write!(f, "transmitting"),
            RadioState::Receiving => write!(f, "receiving"),
        }
    }
}

/// Snapshot of engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadioStats {
    /// Interrupts handled, missed ones included
    pub interrupts: u64,
    /// Packets delivered to the receive sequence
    pub packets_received: u64,
    /// Packets pushed into the transmitter
    pub packets_sent: u64,
    /// Packets discarded for a bad CRC
    pub crc_errors: u64,
    /// Receptions abandoned at the deadline (receiver restarted)
    pub rx_timeouts: u64,
    /// Packets with an impossible length byte
    pub oversize: u64,
    /// Packets dropped because the receive queue was full
    pub dropped: u64,
    /// Interrupts with nothing to do
    pub spurious: u64,
    /// Interrupts found by level check after a wait timed out
    pub missed_interrupts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub interrupts: AtomicU64,
    pub packets_received: AtomicU64,
    pub packets_sent: AtomicU64,
    pub crc_errors: AtomicU64,
    pub rx_timeouts: AtomicU64,
    pub oversize: AtomicU64,
    pub dropped: AtomicU64,
    pub spurious: AtomicU64,
    pub missed_interrupts: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RadioStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RadioStats {
            interrupts: get(&self.interrupts),
            packets_received: get(&self.packets_received),
            packets_sent: get(&self.packets_sent),
            crc_errors: get(&self.crc_errors),
            rx_timeouts: get(&self.rx_timeouts),
            oversize: get(&self.oversize),
            dropped: get(&self.dropped),
            spurious: get(&self.spurious),
            missed_interrupts: get(&self.missed_interrupts),
        }
    }
}
