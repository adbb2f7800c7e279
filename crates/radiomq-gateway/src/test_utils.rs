//! Simulated hardware for gateway tests
//!
//! [`SimHardware`] serves register-level chip simulators as SPI devices and
//! their simulated interrupt lines as pins. A muxed device routes each
//! transfer to one of two simulators by the level of its select pin, so the
//! real multiplexer code runs against it.

use parking_lot::Mutex;
use radiomq_radio::test_utils::SimLine;
use radiomq_radio::{InterruptLine, OutputPin, RadioBus, SpiMode};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::hardware::HardwareProvider;

/// Output pin recording its level in a shared flag
#[derive(Clone, Default)]
pub struct SimPin {
    level: Arc<AtomicBool>,
}

impl SimPin {
    /// Current level
    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl OutputPin for SimPin {
    fn set_level(&mut self, high: bool) -> io::Result<()> {
        self.level.store(high, Ordering::SeqCst);
        Ok(())
    }
}

/// Device routing transfers to `low` or `high` by the select pin
struct PinSteered<L, H> {
    select: SimPin,
    low: L,
    high: H,
}

impl<L: RadioBus, H: RadioBus> RadioBus for PinSteered<L, H> {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        if self.select.level() {
            self.high.transfer(write, read)
        } else {
            self.low.transfer(write, read)
        }
    }

    fn configure(&mut self, mode: SpiMode, bits: u8) -> io::Result<()> {
        if self.select.level() {
            self.high.configure(mode, bits)
        } else {
            self.low.configure(mode, bits)
        }
    }

    fn set_clock_rate(&mut self, hz: u32) -> io::Result<()> {
        if self.select.level() {
            self.high.set_clock_rate(hz)
        } else {
            self.low.set_clock_rate(hz)
        }
    }
}

/// In-memory hardware provider
#[derive(Default)]
pub struct SimHardware {
    spi: Mutex<HashMap<(u8, u8), Box<dyn RadioBus>>>,
    pins: Mutex<HashMap<String, SimPin>>,
    lines: Mutex<HashMap<String, Arc<dyn InterruptLine>>>,
    opens: AtomicUsize,
}

impl SimHardware {
    /// Hardware with nothing attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device at `bus`.`cs`
    pub fn add_spi(&self, bus: u8, cs: u8, device: impl RadioBus + 'static) {
        self.spi.lock().insert((bus, cs), Box::new(device));
    }

    /// Attach two devices behind a chip-select mux steered by `pin`
    pub fn add_muxed(
        &self,
        bus: u8,
        cs: u8,
        pin: &str,
        low: impl RadioBus + 'static,
        high: impl RadioBus + 'static,
    ) {
        let select = SimPin::default();
        self.pins.lock().insert(pin.to_string(), select.clone());
        self.add_spi(bus, cs, PinSteered { select, low, high });
    }

    /// Attach an interrupt line under `name`
    pub fn add_line(&self, name: &str, line: SimLine) {
        self.lines.lock().insert(name.to_string(), Arc::new(line));
    }

    /// Number of successful SPI opens
    pub fn spi_opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl HardwareProvider for SimHardware {
    fn open_spi(&self, bus: u8, cs: u8) -> Result<Box<dyn RadioBus>> {
        let device = self
            .spi
            .lock()
            .remove(&(bus, cs))
            .ok_or(GatewayError::SpiNotFound { bus, cs })?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(device)
    }

    fn output_pin(&self, name: &str) -> Result<Box<dyn OutputPin>> {
        self.pins
            .lock()
            .get(name)
            .cloned()
            .map(|pin| Box::new(pin) as Box<dyn OutputPin>)
            .ok_or_else(|| GatewayError::PinNotFound(name.to_string()))
    }

    fn interrupt_line(&self, name: &str) -> Result<Arc<dyn InterruptLine>> {
        self.lines
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::PinNotFound(name.to_string()))
    }
}
