//! Access to SPI devices and pins
//!
//! The gateway never opens hardware itself; a [`HardwareProvider`] hands out
//! buses and lines by name. Radios sharing one SPI device through a
//! chip-select multiplexer are resolved by [`MuxTable`]: the first radio on a
//! mux splits the device, the second picks up the half it left behind.

use radiomq_radio::{split, InterruptLine, MuxedBus, OutputPin, RadioBus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::RadioConfig;
use crate::error::{GatewayError, Result};

/// Source of buses and pins
pub trait HardwareProvider: Send + Sync {
    /// Open SPI device `bus`.`cs`
    fn open_spi(&self, bus: u8, cs: u8) -> Result<Box<dyn RadioBus>>;

    /// Open a pin for output
    fn output_pin(&self, name: &str) -> Result<Box<dyn OutputPin>>;

    /// Open a pin as a radio interrupt line
    fn interrupt_line(&self, name: &str) -> Result<Arc<dyn InterruptLine>>;
}

type SharedHalf = MuxedBus<Box<dyn RadioBus>, Box<dyn OutputPin>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MuxKey {
    bus: u8,
    cs: u8,
    pin: String,
    value: bool,
}

/// Halves of split SPI devices waiting for their second radio
#[derive(Default)]
pub struct MuxTable {
    spare: HashMap<MuxKey, SharedHalf>,
}

impl MuxTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus for `radio`, opening or splitting the device as needed
    pub fn open(
        &mut self,
        radio: &RadioConfig,
        hardware: &dyn HardwareProvider,
    ) -> Result<Box<dyn RadioBus>> {
        let Some(pin) = &radio.cs_mux_pin else {
            return hardware.open_spi(radio.spi_bus, radio.spi_cs);
        };
        if radio.cs_mux_value > 1 {
            return Err(GatewayError::InvalidConfig(format!(
                "{}: cs_mux_value must be 0 or 1",
                radio.prefix
            )));
        }

        let key = |value: bool| MuxKey {
            bus: radio.spi_bus,
            cs: radio.spi_cs,
            pin: pin.clone(),
            value,
        };
        let want = radio.cs_mux_value == 1;
        if let Some(half) = self.spare.remove(&key(want)) {
            debug!(prefix = %radio.prefix, pin = %pin, select = want, "using shared SPI half");
            return Ok(Box::new(half));
        }

        let bus = hardware.open_spi(radio.spi_bus, radio.spi_cs)?;
        let select = hardware.output_pin(pin)?;
        let (low, high) = split(bus, select);
        let (mine, other) = if want { (high, low) } else { (low, high) };
        debug!(
            prefix = %radio.prefix,
            spi = %format!("SPI{}.{}", radio.spi_bus, radio.spi_cs),
            pin = %pin,
            select = want,
            "split SPI device"
        );
        self.spare.insert(key(!want), other);
        Ok(Box::new(mine))
    }

    /// Number of halves not yet claimed
    pub fn spare(&self) -> usize {
        self.spare.len()
    }
}

impl std::fmt::Debug for MuxTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxTable").field("spare", &self.spare.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SimHardware;
    use radiomq_radio::test_utils::Sx1231Sim;

    fn radio(prefix: &str, value: u8) -> RadioConfig {
        RadioConfig::new("fsk.rfm69", prefix, "P0", 868, "0x2d06", "49230")
            .with_spi(0, 1)
            .with_mux("CSMUX", value)
    }

    #[test]
    fn test_second_radio_gets_other_half() {
        let hw = SimHardware::new();
        hw.add_muxed(0, 1, "CSMUX", Sx1231Sim::new(), Sx1231Sim::new());

        let mut muxes = MuxTable::new();
        muxes.open(&radio("a", 1), &hw).unwrap();
        assert_eq!(muxes.spare(), 1);
        muxes.open(&radio("b", 0), &hw).unwrap();
        assert_eq!(muxes.spare(), 0);
        // the device was opened once
        assert_eq!(hw.spi_opens(), 1);
    }

    #[test]
    fn test_plain_device_and_missing_pin() {
        let hw = SimHardware::new();
        hw.add_spi(0, 0, Sx1231Sim::new());
        let mut muxes = MuxTable::new();

        let plain = RadioConfig::new("fsk.rfm69", "a", "P0", 868, "0x2d06", "49230");
        muxes.open(&plain, &hw).unwrap();

        hw.add_spi(0, 1, Sx1231Sim::new());
        let err = muxes.open(&radio("b", 0), &hw).err().unwrap();
        assert!(matches!(err, GatewayError::PinNotFound(ref p) if p == "CSMUX"));
    }
}
