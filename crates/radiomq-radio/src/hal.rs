//! Hardware seams: register bus, interrupt line, output pin
//!
//! Drivers only talk to hardware through these traits, so the same driver
//! code runs against Linux spidev/GPIO adapters or the register-file
//! simulators in [`crate::test_utils`].

use std::io;
use std::time::Duration;

/// SPI clock polarity/phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    Mode0,
    /// CPOL=0, CPHA=1
    Mode1,
    /// CPOL=1, CPHA=0
    Mode2,
    /// CPOL=1, CPHA=1
    Mode3,
}

/// Edge sensitivity of an interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Edge detection disabled
    None,
    /// Low to high
    Rising,
    /// High to low
    Falling,
    /// Both transitions
    Both,
}

/// Full-duplex register bus (SPI)
pub trait RadioBus: Send {
    /// Clock `write` out while clocking the same number of bytes into `read`
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()>;

    /// Set clock mode and word size
    fn configure(&mut self, mode: SpiMode, bits: u8) -> io::Result<()>;

    /// Set the clock rate in Hz
    fn set_clock_rate(&mut self, hz: u32) -> io::Result<()>;
}

impl<B: RadioBus + ?Sized> RadioBus for Box<B> {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        (**self).transfer(write, read)
    }

    fn configure(&mut self, mode: SpiMode, bits: u8) -> io::Result<()> {
        (**self).configure(mode, bits)
    }

    fn set_clock_rate(&mut self, hz: u32) -> io::Result<()> {
        (**self).set_clock_rate(hz)
    }
}

/// Digital input with edge detection, wired to the radio's interrupt output
///
/// Shared between the engine and its blocking waiter thread, hence `&self`.
pub trait InterruptLine: Send + Sync {
    /// Line name for log messages
    fn name(&self) -> &str;

    /// Current level
    fn read_level(&self) -> bool;

    /// Block until an edge or the timeout; true if an edge was seen.
    /// A zero timeout only consumes an already pending edge.
    fn wait_for_edge(&self, timeout: Duration) -> bool;

    /// Select which transitions count as edges
    fn set_edge(&self, edge: Edge) -> io::Result<()>;
}

/// Digital output (chip-select multiplexer)
pub trait OutputPin: Send {
    /// Drive the pin
    fn set_level(&mut self, high: bool) -> io::Result<()>;
}

impl<P: OutputPin + ?Sized> OutputPin for Box<P> {
    fn set_level(&mut self, high: bool) -> io::Result<()> {
        (**self).set_level(high)
    }
}
