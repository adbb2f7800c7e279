//! SX1231 / RFM69 FSK driver
//!
//! The chip stays in continuous receive. DIO0 is mapped to RSSI in receive
//! mode so the interrupt fires as soon as a signal rises above the RSSI
//! threshold, well before the payload is complete. The interrupt handler
//! then polls until the payload is ready, capturing RSSI and frequency error
//! at sync match, and gives up at a deadline sized for the largest packet.
//!
//! Transmission goes through FS mode, fills the FIFO and switches to TX.
//! DIO0 signals packet-sent, after which the driver goes back to receive.

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
use crate::tuner::ThresholdStep;

use registers::*;

const CHIP: &str = "sx1231";
const SPI_CLOCK_HZ: u32 = 4_000_000;
const HANDSHAKE_TRIES: usize = 10;
const MODE_READY_TIMEOUT: Duration = Duration::from_millis(100);
const SELF_TEST_WAIT: Duration = Duration::from_millis(100);
const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Receive deadline in bit times: 80 bytes at the configured rate
const RX_DEADLINE_BITS: u64 = 80 * 8;
/// Above this power the PA needs the high-power test registers
const HIGH_POWER_DBM: u8 = 17;

/// Radio parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sx1231Config {
    /// Carrier frequency in Hz, kHz or MHz (scaled up until >= 100MHz)
    pub frequency: u32,
    /// Bit rate, one of [`registers::RATES`]
    pub rate: u32,
    /// Sync word, 1 to 8 bytes
    pub sync: Vec<u8>,
    /// Output power in dBm
    pub power: u8,
    /// Module has the high-power PA_BOOST output (RFM69HW/HCW)
    pub pa_boost: bool,
}

impl Sx1231Config {
    /// Create a configuration at the default power of 13dBm
    pub fn new(frequency: u32, rate: u32, sync: impl Into<Vec<u8>>) -> Self {
        Self {
            frequency,
            rate,
            sync: sync.into(),
            power: 13,
            pa_boost: false,
        }
    }

    /// Set output power
    pub fn with_power(mut self, dbm: u8) -> Self {
        self.power = dbm;
        self
    }

    /// Enable the PA_BOOST output
    pub fn with_pa_boost(mut self, pa_boost: bool) -> Self {
        self.pa_boost = pa_boost;
        self
    }
}

/// SX1231 driver
pub struct Sx1231<B> {
    regs: RegisterBus<B>,
    config: Sx1231Config,
    rate: RateParams,
    /// Mode last confirmed by mode-ready, None before the first switch
    mode: Option<u8>,
    power: u8,
}

impl<B: RadioBus> Sx1231<B> {
    /// Mode last confirmed by the chip, standby before the first switch
    fn current_state(&self) -> RadioState {
        self.mode.map(mode_state).unwrap_or(RadioState::Standby)
    }

    /// Create a driver, validating the bit rate and sync word
    pub fn new(bus: B, config: Sx1231Config) -> Result<Self> {
        let rate = rate_params(config.rate).ok_or_else(|| RadioError::UnknownProfile {
            kind: "bit rate",
            name: config.rate.to_string(),
            valid: valid_rates(),
        })?;
        check_sync(&config.sync)?;
        Ok(Self {
            regs: RegisterBus::new(bus),
            power: config.power,
            config,
            rate,
            mode: None,
        })
    }

    /// Configured parameters
    pub fn config(&self) -> &Sx1231Config {
        &self.config
    }

    fn set_mode(&mut self, mode: u8) -> Result<()> {
        let mode = mode & MODE_MASK;
        if self.mode == Some(mode) {
            return Ok(());
        }

        match mode {
            MODE_TRANSMIT => {
                if self.power > HIGH_POWER_DBM {
                    self.regs.write8(REG_TESTPA1, 0x5d)?;
                    self.regs.write8(REG_TESTPA2, 0x7c)?;
                }
                // packet-sent mapping does not fire on the switch itself
                self.regs.write8(REG_DIOMAPPING1, DIO_MAPPING + DIO_PKTSENT)?;
                self.regs.write8(REG_OPMODE, mode)?;
            }
            MODE_RECEIVE => {
                if self.power > HIGH_POWER_DBM {
                    self.regs.write8(REG_TESTPA1, 0x55)?;
                    self.regs.write8(REG_TESTPA2, 0x70)?;
                }
                // coming from FS with the plain mapping: switch first, then map RSSI
                self.regs.write8(REG_OPMODE, mode)?;
                self.regs.write8(REG_DIOMAPPING1, DIO_MAPPING + DIO_RSSI)?;
            }
            _ => {
                // no interrupt may fire while switching
                if self.mode == Some(MODE_RECEIVE) {
                    self.regs.write8(REG_DIOMAPPING1, DIO_MAPPING)?;
                    self.regs.write8(REG_OPMODE, mode)?;
                } else {
                    self.regs.write8(REG_OPMODE, mode)?;
                    self.regs.write8(REG_DIOMAPPING1, DIO_MAPPING)?;
                }
            }
        }

        let start = Instant::now();
        loop {
            if self.regs.read8(REG_IRQFLAGS1)? & IRQ1_MODEREADY != 0 {
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

    /// Run `f` in standby, then return to the previous mode
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
        let frf = frf_bytes(freq);
        self.in_standby(|r| r.regs.write(REG_FRFMSB, &frf))?;
        debug!(chip = CHIP, freq, frf = %hex::encode(frf), "frequency set");
        Ok(())
    }

    /// Program bit rate and the matching deviation and filter bandwidths
    pub fn set_rate(&mut self, rate: u32) -> Result<()> {
        let params = rate_params(rate).ok_or_else(|| RadioError::UnknownProfile {
            kind: "bit rate",
            name: rate.to_string(),
            valid: valid_rates(),
        })?;
        self.in_standby(|r| {
            r.regs.write(REG_BITRATEMSB, &bitrate_bytes(rate))?;
            r.regs.write(REG_FDEVMSB, &fdev_bytes(params.fdev))?;
            r.regs.write8(REG_DATAMODUL, params.shaping & 0x3)?;
            r.regs.write(REG_RXBW, &[params.rx_bw, params.afc_bw])?;
            r.regs.write8(REG_TESTAFC, (params.fdev / 10 / 488) as u8)?;
            if r.regs.read8(REG_AFCCTRL)? != 0 {
                r.set_mode(MODE_FS)?;
                r.regs.write8(REG_AFCCTRL, 0)?;
            }
            Ok(())
        })?;
        self.rate = params;
        self.config.rate = rate;
        debug!(chip = CHIP, rate, fdev = params.fdev, "bit rate set");
        Ok(())
    }

    /// Program output power, capped by the PA configuration
    pub fn set_power(&mut self, dbm: u8) -> Result<()> {
        let (level, dbm) = pa_level(dbm, self.config.pa_boost);
        self.in_standby(|r| {
            r.regs.write8(REG_PALEVEL, level)?;
            // the high-power values are rewritten on every TX/RX switch
            r.regs.write8(REG_TESTPA1, 0x55)?;
            r.regs.write8(REG_TESTPA2, 0x70)
        })?;
        self.power = dbm;
        debug!(chip = CHIP, dbm, "power set");
        Ok(())
    }

    fn write_sync(&mut self) -> Result<()> {
        let sync = self.config.sync.clone();
        let mut data = Vec::with_capacity(sync.len() + 1);
        data.push(0x80 + (((sync.len() - 1) as u8) << 3));
        data.extend_from_slice(&sync);
        self.regs.write(REG_SYNCCONFIG, &data)
    }

    fn drain_edges(line: &dyn InterruptLine) {
        while line.wait_for_edge(Duration::ZERO) {
            debug!(chip = CHIP, line = line.name(), "discarding stale edge");
        }
    }

    /// Map PLL-lock to DIO0 in FS mode and expect a rising edge
    fn interrupt_self_test(&mut self, line: &dyn InterruptLine) -> Result<()> {
        line.set_edge(Edge::Rising).map_err(RadioError::line)?;
        for attempt in 0..2 {
            Self::drain_edges(line);
            self.set_mode(MODE_FS)?;
            self.regs.write8(REG_DIOMAPPING1, DIO_MAPPING + DIO_PLLLOCK)?;
            if line.wait_for_edge(SELF_TEST_WAIT) {
                self.regs.write8(REG_DIOMAPPING1, DIO_MAPPING)?;
                Self::drain_edges(line);
                return Ok(());
            }
            warn!(chip = CHIP, line = line.name(), attempt, "no interrupt from radio, retrying");
            self.regs.write8(REG_DIOMAPPING1, DIO_MAPPING)?;
            self.set_mode(MODE_STANDBY)?;
            std::thread::sleep(SELF_TEST_WAIT);
        }
        Err(RadioError::InterruptSelfTest {
            chip: CHIP,
            line: line.name().to_string(),
        })
    }

    fn read_quality(&mut self) -> Result<LinkQuality> {
        let rssi = -(self.regs.read8(REG_RSSIVALUE)? as i32) / 2;
        let afc = self.regs.read16(REG_AFCMSB)? as i16 as i32;
        let fei = (afc * (FXOSC >> 13) as i32) >> 6;
        Ok(LinkQuality::new(rssi, fei))
    }

    fn read_fifo(&mut self) -> Result<Vec<u8>> {
        self.regs.read_burst(REG_FIFO, FIFO_READ)
    }

    fn rx_deadline(&self, intr: &Interrupt) -> Instant {
        let micros = RX_DEADLINE_BITS * 1_000_000 / self.config.rate.max(1) as u64;
        intr.instant + Duration::from_micros(micros)
    }

    async fn receive(&mut self, intr: Interrupt) -> Result<Outcome> {
        let deadline = self.rx_deadline(&intr);
        let mut quality: Option<LinkQuality> = None;

        loop {
            let irq2 = self.regs.read8(REG_IRQFLAGS2)?;
            if irq2 & IRQ2_PAYLOADREADY != 0 {
                if irq2 & IRQ2_CRCOK == 0 {
                    // flush the bad packet
                    self.read_fifo()?;
                    debug!(chip = CHIP, "CRC error");
                    return Ok(Outcome::CrcError);
                }
                if quality.is_none() {
                    // packet completed between polls, take the values as they stand
                    debug!(chip = CHIP, "payload ready before sync was seen");
                    quality = Some(self.read_quality()?);
                }
                break;
            }

            let irq1 = self.regs.read8(REG_IRQFLAGS1)?;
            if irq1 & (IRQ1_RXREADY | IRQ1_RSSI) != IRQ1_RXREADY | IRQ1_RSSI {
                debug!(chip = CHIP, irq1 = %format!("{irq1:#04x}"), "signal gone");
                return Ok(Outcome::NotReceiving);
            }
            if quality.is_none() && irq1 & IRQ1_SYNCMATCH != 0 {
                quality = Some(self.read_quality()?);
            }

            if Instant::now() >= deadline {
                if irq2 & IRQ2_FIFONOTEMPTY != 0 {
                    let partial = self.read_fifo()?;
                    debug!(chip = CHIP, fifo = %hex::encode(&partial[..16]), "partial packet at timeout");
                }
                self.regs.write8(REG_PKTCONFIG2, PKTCONFIG2_RESTART)?;
                return Ok(Outcome::Timeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let buf = self.read_fifo()?;
        let len = buf[0] as usize;
        if len > MAX_PAYLOAD {
            debug!(chip = CHIP, len, "oversize packet");
            return Ok(Outcome::Oversize(len));
        }
        let packet = RawPacket::new(buf[1..=len].to_vec())
            .with_quality(quality.unwrap_or_default())
            .at(intr.at);
        Ok(Outcome::Packet(packet))
    }

    fn transmit_done(&mut self) -> Result<Outcome> {
        let confirmed = self.regs.read8(REG_IRQFLAGS2)? & IRQ2_PACKETSENT != 0;
        if !confirmed {
            warn!(chip = CHIP, "TX interrupt without packet-sent flag");
        }
        self.set_mode(MODE_RECEIVE)?;
        Ok(Outcome::Sent { confirmed })
    }
}

#[async_trait]
impl<B: RadioBus + 'static> Modem for Sx1231<B> {
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

        if let Err(pattern) = self.regs.handshake(REG_SYNCVALUE1, HANDSHAKE_TRIES)? {
            return Err(RadioError::ChipNotResponding { chip: CHIP, pattern });
        }

        self.set_mode(MODE_SLEEP)?;
        self.set_mode(MODE_STANDBY)?;
        let version = self.regs.read8(REG_VERSION)?;
        info!(chip = CHIP, version = %format!("{version:#04x}"), "radio found");

        self.regs.write_table(CONFIG_REGS)?;
        // config table forces sleep behind our back
        self.mode = Some(MODE_SLEEP);
        self.set_mode(MODE_STANDBY)?;

        self.set_rate(self.config.rate)?;
        self.set_frequency(self.config.frequency)?;
        self.set_power(self.config.power)?;
        self.write_sync()?;

        self.interrupt_self_test(line)?;
        self.regs.dump(CHIP, 0x4f)?;
        info!(
            chip = CHIP,
            freq = self.config.frequency,
            rate = self.config.rate,
            fdev = self.rate.fdev,
            power = self.power,
            sync = %hex::encode(&self.config.sync),
            "radio ready"
        );
        Ok(())
    }

    fn start_receiving(&mut self) -> Result<()> {
        self.set_mode(MODE_RECEIVE)
    }

    async fn on_interrupt(&mut self, intr: Interrupt) -> Result<Outcome> {
        match self.mode {
            Some(MODE_RECEIVE) => self.receive(intr).await,
            Some(MODE_TRANSMIT) => self.transmit_done(),
            _ => Ok(Outcome::Spurious),
        }
    }

    fn receiving(&mut self) -> Result<bool> {
        if self.mode != Some(MODE_RECEIVE) {
            return Ok(false);
        }
        Ok(self.regs.read8(REG_IRQFLAGS1)? & IRQ1_SYNCMATCH != 0)
    }

    fn send(&mut self, payload: &[u8]) -> Result<bool> {
        let payload = &payload[..payload.len().min(MAX_PAYLOAD)];
        if payload.is_empty() {
            return Ok(false);
        }
        self.set_mode(MODE_FS)?;
        let mut fifo = Vec::with_capacity(payload.len() + 1);
        fifo.push(payload.len() as u8);
        fifo.extend_from_slice(payload);
        self.regs.write(REG_FIFO, &fifo)?;
        self.set_mode(MODE_TRANSMIT)?;
        Ok(true)
    }

    fn on_idle(&mut self) -> Result<()> {
        if self.mode == Some(MODE_RECEIVE)
            && self.regs.read8(REG_IRQFLAGS1)? & IRQ1_TIMEOUT != 0
        {
            warn!(chip = CHIP, "receiver timed out without interrupt, restarting");
            self.set_mode(MODE_FS)?;
            self.set_mode(MODE_RECEIVE)?;
        }
        Ok(())
    }

    fn tunes_threshold(&self) -> bool {
        true
    }

    fn adjust_threshold(&mut self, step: ThresholdStep) -> Result<Option<f64>> {
        let reg = self.regs.read8(REG_RSSITHRES)?;
        let next = match step {
            ThresholdStep::Raise => reg.saturating_sub(1),
            ThresholdStep::Lower => reg.saturating_add(1),
            ThresholdStep::Hold => reg,
        };
        if next != reg {
            self.regs.write8(REG_RSSITHRES, next)?;
        }
        Ok(Some(-(next as f64) / 2.0))
    }
}

fn mode_state(mode: u8) -> RadioState {
    match mode {
        MODE_SLEEP => RadioState::Sleep,
        MODE_FS => RadioState::FrequencySynthesis,
        MODE_TRANSMIT => RadioState::Transmitting,
        MODE_RECEIVE => RadioState::Receiving,
        _ => RadioState::Standby,
    }
}

fn valid_rates() -> String {
    RATES
        .iter()
        .map(|(r, _)| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_sync(sync: &[u8]) -> Result<()> {
    if sync.is_empty() || sync.len() > 8 {
        return Err(RadioError::InvalidSyncWord(format!(
            "sx1231 needs 1 to 8 sync bytes, got {}",
            sync.len()
        )));
    }
    Ok(())
}

/// FRF register bytes for a frequency given in Hz, kHz or MHz
pub fn frf_bytes(freq: u32) -> [u8; 3] {
    let mut freq = freq as u64;
    while freq > 0 && freq < 100_000_000 {
        freq *= 10;
    }
    let frf = (freq << 2) / (FXOSC as u64 >> 11);
    [(frf >> 10) as u8, (frf >> 2) as u8, (frf << 6) as u8]
}

/// BITRATE register bytes, rounded to nearest
pub fn bitrate_bytes(rate: u32) -> [u8; 2] {
    let val = (FXOSC + rate / 2) / rate;
    [(val >> 8) as u8, val as u8]
}

/// FDEV register bytes: deviation in steps of FXOSC / 2^19, rounded
pub fn fdev_bytes(fdev: u32) -> [u8; 2] {
    let val = (((fdev as u64) << 19) + FXOSC as u64 / 2) / FXOSC as u64;
    [(val >> 8) as u8, val as u8]
}

/// PALEVEL value and the effective power after capping
pub fn pa_level(dbm: u8, pa_boost: bool) -> (u8, u8) {
    if pa_boost {
        let dbm = dbm.min(20);
        let level = match dbm {
            0..=13 => 0x40 + 18 + dbm,
            14..=17 => 0x60 + 14 + dbm,
            _ => 0x60 + 11 + dbm,
        };
        (level, dbm)
    } else {
        let dbm = dbm.min(13);
        (0x80 + 18 + dbm, dbm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frf_scaling() {
        assert_eq!(frf_bytes(868), [0xd9, 0x00, 0x00]);
        assert_eq!(frf_bytes(868_000), [0xd9, 0x00, 0x00]);
        assert_eq!(frf_bytes(868_000_000), [0xd9, 0x00, 0x00]);
        assert_eq!(frf_bytes(915), [0xe4, 0xc0, 0x00]);
        assert_eq!(frf_bytes(433_920_000), [0x6c, 0x7a, 0xc0]);
    }

    #[test]
    fn test_bitrate_and_deviation() {
        // 32MHz / 49230 = 650.02
        assert_eq!(bitrate_bytes(49230), [0x02, 0x8a]);
        assert_eq!(bitrate_bytes(50000), [0x02, 0x80]);
        // 45kHz / 61.035Hz = 737.3
        assert_eq!(fdev_bytes(45000), [0x02, 0xe1]);
        assert_eq!(fdev_bytes(90000), [0x05, 0xc3]);
    }

    #[test]
    fn test_pa_levels() {
        assert_eq!(pa_level(13, false), (0x9f, 13));
        assert_eq!(pa_level(20, false), (0x9f, 13));
        assert_eq!(pa_level(10, true), (0x5c, 10));
        assert_eq!(pa_level(17, true), (0x7f, 17));
        assert_eq!(pa_level(20, true), (0x7f, 20));
        assert_eq!(pa_level(25, true), (0x7f, 20));
    }

    #[test]
    fn test_rate_table() {
        assert_eq!(rate_params(49230).unwrap().rx_bw, 0x4a);
        assert!(rate_params(9600).is_none());
        assert_eq!(valid_rates(), "49230, 49231, 49232, 49233, 50000");
    }

    #[test]
    fn test_sync_length() {
        assert!(check_sync(&[0x2d]).is_ok());
        assert!(check_sync(&[0xaa; 8]).is_ok());
        assert!(check_sync(&[]).is_err());
        assert!(check_sync(&[0xaa; 9]).is_err());
    }
}
