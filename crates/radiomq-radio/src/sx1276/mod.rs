//! SX1276 / RFM9x LoRa driver
//!
//! LoRa packets are complete when the interrupt fires (DIO0 = RxDone), so
//! receive is a single pass over the FIFO. Transmission writes the payload
//! at FIFO address 0 and waits for TxDone on DIO0.

pub mod registers;

use async_trait::async_trait;
use radiomq_core::{LinkQuality, RawPacket};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{RadioError, Result};
use crate::hal::{Edge, InterruptLine, RadioBus, SpiMode};
use crate::modem::{Interrupt, Modem, Outcome};
use crate::regs::RegisterBus;
use crate::state::RadioState;

use registers::*;

const CHIP: &str = "sx1276";
const SPI_CLOCK_HZ: u32 = 4_000_000;
const HANDSHAKE_TRIES: usize = 10;
const MODE_READY_TIMEOUT: Duration = Duration::from_millis(100);
const SELF_TEST_WAIT: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Radio parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sx1276Config {
    /// Carrier frequency in Hz, kHz or MHz
    pub frequency: u32,
    /// Profile name, one of [`registers::PROFILES`]
    pub profile: String,
    /// LoRa sync byte
    pub sync: u8,
    /// Output power in dBm, 2..=20
    pub power: u8,
}

impl Sx1276Config {
    /// Create a configuration at 17dBm
    pub fn new(frequency: u32, profile: impl Into<String>, sync: u8) -> Self {
        Self {
            frequency,
            profile: profile.into(),
            sync,
            power: 17,
        }
    }

    /// Set output power
    pub fn with_power(mut self, dbm: u8) -> Self {
        self.power = dbm;
        self
    }
}

/// SX1276 driver
pub struct Sx1276<B> {
    regs: RegisterBus<B>,
    config: Sx1276Config,
    profile: &'static Profile,
    mode: Option<u8>,
}

impl<B: RadioBus> Sx1276<B> {
    /// Mode last confirmed by the chip, standby before the first switch
    fn current_state(&self) -> RadioState {
        self.mode.map(mode_state).unwrap_or(RadioState::Standby)
    }

    /// Create a driver, validating the profile name
    pub fn new(bus: B, config: Sx1276Config) -> Result<Self> {
        let profile = lookup(&config.profile)?;
        Ok(Self {
            regs: RegisterBus::new(bus),
            config,
            profile,
            mode: None,
        })
    }

    /// Active modem profile
    pub fn profile(&self) -> &'static Profile {
        self.profile
    }

    fn set_mode(&mut self, mode: u8) -> Result<()> {
        let mode = mode & MODE_MASK;
        if self.mode == Some(mode) {
            return Ok(());
        }
        let dio = match mode {
            MODE_TX => DIO_TXDONE,
            MODE_RX_CONT | MODE_RX_SINGLE => DIO_RXDONE,
            _ => DIO_NONE,
        };
        self.regs.write8(REG_DIOMAPPING1, dio)?;
        self.regs.write8(REG_OPMODE, mode + OPMODE_LORA_LF)?;

        let start = Instant::now();
        loop {
            if self.regs.read8(REG_OPMODE)? & MODE_MASK == mode {
                self.mode = Some(mode);
                return Ok(());
            }
            if start.elapsed() >= MODE_READY_TIMEOUT {
                return Err(RadioError::ModeSwitchTimeout {
                    chip: CHIP,
                    from: self.current_state(),
                    to: mode_state(mode),
                });
            }
        }
    }

    fn in_standby(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        let saved = self.mode;
        self.set_mode(MODE_STANDBY)?;
        f(self)?;
        match saved {
            Some(mode) => self.set_mode(mode),
            None => Ok(()),
        }
    }

    /// Program the carrier frequency
    pub fn set_frequency(&mut self, freq: u32) -> Result<()> {
        let frf = crate::sx1231::frf_bytes(freq);
        self.in_standby(|r| r.regs.write(REG_FRFMSB, &frf))?;
        debug!(chip = CHIP, freq, frf = %hex::encode(frf), "frequency set");
        Ok(())
    }

    /// Switch to another modem profile
    pub fn set_profile(&mut self, name: &str) -> Result<()> {
        let profile = lookup(name)?;
        self.in_standby(|r| {
            // explicit header
            r.regs.write8(REG_MODEMCONF1, profile.conf1 & !1)?;
            // single TX, CRC on
            r.regs.write8(REG_MODEMCONF2, (profile.conf2 & 0xf0) | 0x04)?;
            // LNA AGC on
            r.regs.write8(REG_MODEMCONF3, profile.conf3 | 0x04)
        })?;
        self.profile = profile;
        self.config.profile = name.to_string();
        debug!(chip = CHIP, profile = name, info = profile.info, "profile set");
        Ok(())
    }

    /// Program output power on PA_BOOST
    pub fn set_power(&mut self, dbm: u8) -> Result<()> {
        let dbm = dbm.clamp(2, 20);
        self.in_standby(|r| {
            if dbm > 17 {
                // 20dBm mode offsets PACONFIG by 3
                r.regs.write8(REG_PADAC, 0x07)?;
                r.regs.write8(REG_PACONFIG, 0xf0 + (dbm - 5))
            } else {
                r.regs.write8(REG_PACONFIG, 0xf0 + (dbm - 2))?;
                r.regs.write8(REG_PADAC, 0x04)
            }
        })?;
        self.config.power = dbm;
        debug!(chip = CHIP, dbm, "power set");
        Ok(())
    }

    fn push_packet(&mut self, payload: &[u8]) -> Result<()> {
        self.set_mode(MODE_STANDBY)?;
        self.regs.write8(REG_FIFOPTR, 0)?;
        self.regs.write(REG_FIFO, payload)?;
        self.regs.write8(REG_PAYLENGTH, payload.len() as u8)?;
        self.set_mode(MODE_TX)
    }

    fn drain_edges(line: &dyn InterruptLine) {
        while line.wait_for_edge(Duration::ZERO) {
            debug!(chip = CHIP, line = line.name(), "discarding stale edge");
        }
    }

    /// Send a one-byte packet and expect TxDone on the interrupt line
    fn interrupt_self_test(&mut self, line: &dyn InterruptLine) -> Result<()> {
        line.set_edge(Edge::Rising).map_err(RadioError::line)?;
        Self::drain_edges(line);
        self.push_packet(&[0])?;
        if !line.wait_for_edge(SELF_TEST_WAIT) {
            self.regs.dump(CHIP, 0x4f)?;
            return Err(RadioError::InterruptSelfTest {
                chip: CHIP,
                line: line.name().to_string(),
            });
        }
        self.regs.write8(REG_IRQFLAGS, IRQ_CLEAR_ALL)?;
        std::thread::sleep(Duration::from_millis(10));
        Self::drain_edges(line);
        Ok(())
    }

    /// Frequency error in Hz from the 20-bit FEI register
    fn read_fei(&mut self) -> Result<i32> {
        let raw = self.regs.read_burst(REG_FEI, 3)?;
        let mut fei = ((raw[0] as i32 & 0x0f) << 16) | ((raw[1] as i32) << 8) | raw[2] as i32;
        if fei & 0x8_0000 != 0 {
            fei -= 0x10_0000;
        }
        Ok(fei_hz(fei, self.profile.bandwidth))
    }

    fn receive(&mut self, intr: Interrupt) -> Result<Outcome> {
        let irq = self.regs.read8(REG_IRQFLAGS)?;
        if irq & IRQ_RXDONE == 0 {
            debug!(chip = CHIP, irq = %format!("{irq:#04x}"), "RX interrupt but no packet");
            self.regs.write8(REG_IRQFLAGS, IRQ_CLEAR_ALL)?;
            return Ok(Outcome::Spurious);
        }
        if irq & IRQ_CRCERR != 0 {
            self.regs.write8(REG_IRQFLAGS, IRQ_CLEAR_ALL)?;
            debug!(chip = CHIP, "CRC error");
            return Ok(Outcome::CrcError);
        }

        let len = self.regs.read8(REG_RXBYTES)? as usize;
        let ptr = self.regs.read8(REG_FIFORXCURR)?;
        self.regs.write8(REG_FIFOPTR, ptr)?;
        let payload = self.regs.read_burst(REG_FIFO, len)?;

        let snr = self.regs.read8(REG_PKTSNR)? as i8 as i32 / 4;
        let rssi = packet_rssi(self.regs.read8(REG_PKTRSSI)?, snr);
        let fei = self.read_fei()?;
        self.regs.write8(REG_IRQFLAGS, IRQ_CLEAR_ALL)?;

        let packet = RawPacket::new(payload)
            .with_quality(LinkQuality::new(rssi, fei))
            .with_snr(snr)
            .at(intr.at);
        Ok(Outcome::Packet(packet))
    }

    fn transmit_done(&mut self) -> Result<Outcome> {
        let confirmed = self.regs.read8(REG_IRQFLAGS)? & IRQ_TXDONE != 0;
        if !confirmed {
            warn!(chip = CHIP, "TX interrupt without TxDone flag");
        }
        self.regs.write8(REG_IRQFLAGS, IRQ_CLEAR_ALL)?;
        self.set_mode(MODE_RX_CONT)?;
        Ok(Outcome::Sent { confirmed })
    }
}

#[async_trait]
impl<B: RadioBus + 'static> Modem for Sx1276<B> {
    fn chip(&self) -> &'static str {
        CHIP
    }

    fn max_payload(&self) -> usize {
        MAX_PAYLOAD
    }

    fn state(&self) -> RadioState {
        self.current_state()
    }

    fn init(&mut self, line: &dyn InterruptLine) -> Result<()> {
        let bus = self.regs.bus_mut();
        bus.set_clock_rate(SPI_CLOCK_HZ)?;
        bus.configure(SpiMode::Mode0, 8)?;

        if let Err(pattern) = self.regs.handshake(REG_SYNC, HANDSHAKE_TRIES)? {
            return Err(RadioError::ChipNotResponding { chip: CHIP, pattern });
        }

        self.set_mode(MODE_SLEEP)?;
        let version = self.regs.read8(REG_VERSION)?;
        info!(chip = CHIP, version = %format!("{version:#04x}"), "radio found");

        self.regs.write_table(CONFIG_REGS)?;
        self.mode = Some(MODE_SLEEP);

        let profile = self.config.profile.clone();
        self.set_profile(&profile)?;
        self.set_frequency(self.config.frequency)?;
        self.set_power(self.config.power)?;
        self.regs.write8(REG_SYNC, self.config.sync)?;

        self.interrupt_self_test(line)?;
        self.regs.dump(CHIP, 0x4f)?;
        info!(
            chip = CHIP,
            freq = self.config.frequency,
            profile = %self.config.profile,
            power = self.config.power,
            sync = %format!("{:#04x}", self.config.sync),
            "radio ready"
        );
        Ok(())
    }

    fn start_receiving(&mut self) -> Result<()> {
        self.set_mode(MODE_RX_CONT)
    }

    async fn on_interrupt(&mut self, intr: Interrupt) -> Result<Outcome> {
        match self.mode {
            Some(MODE_RX_CONT) => self.receive(intr),
            Some(MODE_TX) => self.transmit_done(),
            _ => {
                self.regs.write8(REG_IRQFLAGS, IRQ_CLEAR_ALL)?;
                Ok(Outcome::Spurious)
            }
        }
    }

    fn receiving(&mut self) -> Result<bool> {
        if self.mode != Some(MODE_RX_CONT) {
            return Ok(false);
        }
        let stat = self.regs.read8(REG_MODEMSTAT)?;
        let irq = self.regs.read8(REG_IRQFLAGS)?;
        Ok(stat & MODEMSTAT_SIGNAL != 0 || irq & IRQ_RXDONE != 0)
    }

    /// Wait for RxDone, bounded by the air time of a maximum-size packet
    async fn complete_reception(&mut self, intr: Interrupt) -> Result<Outcome> {
        let deadline = intr.instant + self.profile.time_on_air(MAX_PAYLOAD);
        loop {
            if self.regs.read8(REG_IRQFLAGS)? & IRQ_RXDONE != 0 {
                return self.receive(intr);
            }
            if self.regs.read8(REG_MODEMSTAT)? & MODEMSTAT_SIGNAL == 0 {
                return Ok(Outcome::NotReceiving);
            }
            if Instant::now() >= deadline {
                return Ok(Outcome::Timeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn send(&mut self, payload: &[u8]) -> Result<bool> {
        let payload = &payload[..payload.len().min(MAX_PAYLOAD)];
        if payload.is_empty() {
            return Ok(false);
        }
        self.push_packet(payload)?;
        Ok(true)
    }
}

fn lookup(name: &str) -> Result<&'static Profile> {
    profile(name).ok_or_else(|| RadioError::UnknownProfile {
        kind: "LoRa config",
        name: name.to_string(),
        valid: PROFILES.iter().map(|p| p.name).collect::<Vec<_>>().join(", "),
    })
}

fn mode_state(mode: u8) -> RadioState {
    match mode {
        MODE_SLEEP => RadioState::Sleep,
        MODE_FS_TX | MODE_FS_RX => RadioState::FrequencySynthesis,
        MODE_TX => RadioState::Transmitting,
        MODE_RX_CONT | MODE_RX_SINGLE => RadioState::Receiving,
        _ => RadioState::Standby,
    }
}

/// Packet RSSI in dBm (HF port formula), SNR folded in when negative
pub fn packet_rssi(reg: u8, snr: i32) -> i32 {
    let r = reg as i32;
    let rssi = -164 + r + (r >> 4);
    if snr < 0 {
        rssi + snr
    } else {
        rssi
    }
}

/// Scale a raw FEI reading to Hz: fei * 2^24 / FXOSC * bw / 500kHz
pub fn fei_hz(fei: i32, bandwidth: u32) -> i32 {
    let hz = fei as i64 * (1 << 24) * bandwidth as i64 / (FXOSC as i64 * 500_000);
    hz as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_rssi() {
        assert_eq!(packet_rssi(0, 0), -164);
        // 100 + 100/16 = 106
        assert_eq!(packet_rssi(100, 5), -58);
        assert_eq!(packet_rssi(100, -3), -61);
    }

    #[test]
    fn test_fei_scaling() {
        assert_eq!(fei_hz(0, 125_000), 0);
        // one LSB at 500kHz is 2^24/32e6 = 0.524Hz
        assert_eq!(fei_hz(1000, 500_000), 524);
        assert_eq!(fei_hz(-1000, 125_000), -131);
    }

    #[test]
    fn test_unknown_profile_lists_valid() {
        let err = lookup("bw250").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bw250"));
        assert!(msg.contains("bw125cr48sf4096"));
        assert_eq!(err.error_code(), "UNKNOWN_PROFILE");
    }
}
