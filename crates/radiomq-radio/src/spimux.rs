//! Two radios on one SPI bus, chip select steered by an output pin
//!
//! [`split`] turns a bus and a pin into two bus handles. Every transfer on a
//! handle drives the pin to that handle's level and performs the transfer
//! while holding a shared lock, so a transfer never runs with the other
//! handle's selection.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

use crate::hal::{OutputPin, RadioBus, SpiMode};

struct Shared<B, P> {
    bus: B,
    pin: P,
}

/// One side of a multiplexed bus
pub struct MuxedBus<B, P> {
    shared: Arc<Mutex<Shared<B, P>>>,
    select: bool,
}

impl<B, P> MuxedBus<B, P> {
    /// Pin level this handle selects with
    pub fn select_level(&self) -> bool {
        self.select
    }
}

/// Split `bus` into the handle selected by a low pin and the one selected
/// by a high pin, in that order
pub fn split<B: RadioBus, P: OutputPin>(bus: B, pin: P) -> (MuxedBus<B, P>, MuxedBus<B, P>) {
    let shared = Arc::new(Mutex::new(Shared { bus, pin }));
    (
        MuxedBus {
            shared: Arc::clone(&shared),
            select: false,
        },
        MuxedBus {
            shared,
            select: true,
        },
    )
}

impl<B: RadioBus, P: OutputPin> RadioBus for MuxedBus<B, P> {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        let mut shared = self.shared.lock();
        shared.pin.set_level(self.select)?;
        shared.bus.transfer(write, read)
    }

    // Both radios use the same clock settings, so these pass straight through.
    fn configure(&mut self, mode: SpiMode, bits: u8) -> io::Result<()> {
        self.shared.lock().bus.configure(mode, bits)
    }

    fn set_clock_rate(&mut self, hz: u32) -> io::Result<()> {
        self.shared.lock().bus.set_clock_rate(hz)
    }
}
