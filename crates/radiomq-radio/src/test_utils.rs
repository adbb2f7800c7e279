//! Register-file simulators for testing without hardware
//!
//! [`Sx1231Sim`] and [`Sx1276Sim`] implement [`RadioBus`] over a register
//! array with just enough chip behavior for the drivers: mode-ready flags,
//! FIFO access, packet-sent / TxDone on transmit, receiver restart, and
//! write-one-to-clear IRQ flags. Both share a [`SimLine`] that tests pulse
//! to raise interrupts. Clones share state, so a test keeps one clone to
//! inject traffic and inspect registers while the engine owns another.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::hal::{Edge, InterruptLine, RadioBus, SpiMode};
use crate::sx1231::registers as fsk;
use crate::sx1276::registers as lora;

// ============================================================================
// Interrupt line
// ============================================================================

struct LineState {
    pending: usize,
    level: bool,
    edge: Edge,
}

struct LineInner {
    name: String,
    state: Mutex<LineState>,
    cond: Condvar,
}

/// Simulated interrupt line with a queue of pending edges
#[derive(Clone)]
pub struct SimLine {
    inner: Arc<LineInner>,
}

impl SimLine {
    /// Create a line with edge detection disabled
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LineInner {
                name: name.into(),
                state: Mutex::new(LineState {
                    pending: 0,
                    level: false,
                    edge: Edge::None,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Raise an edge, ignored while edge detection is off
    pub fn pulse(&self) {
        let mut state = self.inner.state.lock();
        if state.edge != Edge::None {
            state.pending += 1;
            self.inner.cond.notify_all();
        }
    }

    /// Hold the level high or low without producing an edge
    pub fn set_level(&self, high: bool) {
        self.inner.state.lock().level = high;
    }

    /// Current edge configuration
    pub fn edge(&self) -> Edge {
        self.inner.state.lock().edge
    }

    /// Edges not yet consumed
    pub fn pending(&self) -> usize {
        self.inner.state.lock().pending
    }
}

impl InterruptLine for SimLine {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn read_level(&self) -> bool {
        self.inner.state.lock().level
    }

    fn wait_for_edge(&self, timeout: Duration) -> bool {
        let mut state = self.inner.state.lock();
        if state.pending == 0 && !timeout.is_zero() {
            let deadline = Instant::now() + timeout;
            while state.pending == 0 {
                if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }
        if state.pending > 0 {
            state.pending -= 1;
            true
        } else {
            false
        }
    }

    fn set_edge(&self, edge: Edge) -> io::Result<()> {
        let mut state = self.inner.state.lock();
        state.edge = edge;
        if edge == Edge::None {
            state.pending = 0;
        }
        self.inner.cond.notify_all();
        Ok(())
    }
}

/// Common failure knobs
#[derive(Default)]
struct Faults {
    bus_down: bool,
    unresponsive: bool,
}

impl Faults {
    fn check(&self) -> io::Result<()> {
        if self.bus_down {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated bus failure"));
        }
        Ok(())
    }
}

// ============================================================================
// SX1231
// ============================================================================

struct Sx1231Chip {
    regs: [u8; 0x80],
    rx_fifo: VecDeque<u8>,
    tx_fifo: Vec<u8>,
    sent: Vec<Vec<u8>>,
    restarts: usize,
    transfers: usize,
    mode_ready: bool,
    pll_interrupt: bool,
    faults: Faults,
}

impl Sx1231Chip {
    fn mode(&self) -> u8 {
        self.regs[fsk::REG_OPMODE as usize] & fsk::MODE_MASK
    }

    fn write_reg(&mut self, addr: u8, value: u8, line: &SimLine) {
        let prev_mode = self.mode();
        self.regs[addr as usize & 0x7f] = value;
        match addr {
            fsk::REG_OPMODE => {
                let mode = value & fsk::MODE_MASK;
                let irq1 = &mut self.regs[fsk::REG_IRQFLAGS1 as usize];
                if self.mode_ready {
                    *irq1 |= fsk::IRQ1_MODEREADY;
                } else {
                    *irq1 &= !fsk::IRQ1_MODEREADY;
                }
                if mode == fsk::MODE_RECEIVE {
                    *irq1 |= fsk::IRQ1_RXREADY;
                } else {
                    *irq1 &= !(fsk::IRQ1_RXREADY | fsk::IRQ1_RSSI | fsk::IRQ1_SYNCMATCH);
                }
                if prev_mode == fsk::MODE_TRANSMIT && mode != fsk::MODE_TRANSMIT {
                    self.regs[fsk::REG_IRQFLAGS2 as usize] &= !fsk::IRQ2_PACKETSENT;
                }
                if mode == fsk::MODE_TRANSMIT && !self.tx_fifo.is_empty() {
                    let len = self.tx_fifo[0] as usize;
                    let end = (len + 1).min(self.tx_fifo.len());
                    self.sent.push(self.tx_fifo[1..end].to_vec());
                    self.tx_fifo.clear();
                    self.regs[fsk::REG_IRQFLAGS2 as usize] |= fsk::IRQ2_PACKETSENT;
                    line.pulse();
                }
            }
            fsk::REG_DIOMAPPING1 => {
                let pll = value & 0xc0 == fsk::DIO_PLLLOCK;
                if self.mode() == fsk::MODE_FS && pll && self.pll_interrupt {
                    line.pulse();
                }
            }
            fsk::REG_PKTCONFIG2 if value & fsk::PKTCONFIG2_RESTART_BIT != 0 => {
                self.restarts += 1;
                self.regs[addr as usize] = value & !fsk::PKTCONFIG2_RESTART_BIT;
                self.regs[fsk::REG_IRQFLAGS1 as usize] &=
                    !(fsk::IRQ1_RSSI | fsk::IRQ1_SYNCMATCH | fsk::IRQ1_TIMEOUT);
                self.regs[fsk::REG_IRQFLAGS2 as usize] = 0;
                self.rx_fifo.clear();
            }
            _ => {}
        }
    }

    fn transfer(&mut self, write: &[u8], read: &mut [u8], line: &SimLine) -> io::Result<()> {
        self.transfers += 1;
        self.faults.check()?;
        read.iter_mut().for_each(|b| *b = 0);
        if self.faults.unresponsive || write.is_empty() {
            return Ok(());
        }
        let addr = write[0] & 0x7f;
        if write[0] & 0x80 != 0 {
            if addr == fsk::REG_FIFO {
                self.tx_fifo.extend_from_slice(&write[1..]);
            } else {
                for (i, &value) in write[1..].iter().enumerate() {
                    self.write_reg(addr.wrapping_add(i as u8) & 0x7f, value, line);
                }
            }
            return Ok(());
        }
        for i in 1..write.len().min(read.len()) {
            read[i] = if addr == fsk::REG_FIFO {
                self.rx_fifo.pop_front().unwrap_or(0)
            } else {
                self.regs[(addr as usize + i - 1) & 0x7f]
            };
        }
        if addr == fsk::REG_FIFO {
            // packet consumed, the chip restarts reception by itself
            self.rx_fifo.clear();
            self.regs[fsk::REG_IRQFLAGS2 as usize] &=
                !(fsk::IRQ2_PAYLOADREADY | fsk::IRQ2_CRCOK | fsk::IRQ2_FIFONOTEMPTY);
            self.regs[fsk::REG_IRQFLAGS1 as usize] &= !(fsk::IRQ1_RSSI | fsk::IRQ1_SYNCMATCH);
        }
        Ok(())
    }

    fn load_packet(&mut self, payload: &[u8], crc_ok: bool) {
        self.rx_fifo.clear();
        self.rx_fifo.push_back(payload.len() as u8);
        self.rx_fifo.extend(payload.iter().copied());
        self.regs[fsk::REG_IRQFLAGS1 as usize] |=
            fsk::IRQ1_RXREADY | fsk::IRQ1_RSSI | fsk::IRQ1_SYNCMATCH;
        let mut irq2 = fsk::IRQ2_PAYLOADREADY | fsk::IRQ2_FIFONOTEMPTY;
        if crc_ok {
            irq2 |= fsk::IRQ2_CRCOK;
        }
        self.regs[fsk::REG_IRQFLAGS2 as usize] |= irq2;
    }
}

/// Simulated SX1231
#[derive(Clone)]
pub struct Sx1231Sim {
    chip: Arc<Mutex<Sx1231Chip>>,
    line: SimLine,
}

impl Sx1231Sim {
    /// Power-on chip with a fresh interrupt line
    pub fn new() -> Self {
        let mut regs = [0u8; 0x80];
        regs[fsk::REG_VERSION as usize] = 0x24;
        regs[fsk::REG_RSSITHRES as usize] = 0xe4;
        regs[fsk::REG_IRQFLAGS1 as usize] = fsk::IRQ1_MODEREADY;
        Self {
            chip: Arc::new(Mutex::new(Sx1231Chip {
                regs,
                rx_fifo: VecDeque::new(),
                tx_fifo: Vec::new(),
                sent: Vec::new(),
                restarts: 0,
                transfers: 0,
                mode_ready: true,
                pll_interrupt: true,
                faults: Faults::default(),
            })),
            line: SimLine::new("sim-dio0"),
        }
    }

    /// Interrupt line wired to DIO0
    pub fn line(&self) -> SimLine {
        self.line.clone()
    }

    /// A complete packet with good CRC, signalled by an interrupt
    pub fn inject_packet(&self, payload: &[u8], rssi_reg: u8, afc: i16) {
        self.stage_packet(payload, rssi_reg, afc);
        self.line.pulse();
    }

    /// A complete packet sitting in the FIFO without an interrupt yet
    pub fn stage_packet(&self, payload: &[u8], rssi_reg: u8, afc: i16) {
        let mut chip = self.chip.lock();
        chip.regs[fsk::REG_RSSIVALUE as usize] = rssi_reg;
        let [hi, lo] = afc.to_be_bytes();
        chip.regs[fsk::REG_AFCMSB as usize] = hi;
        chip.regs[fsk::REG_AFCMSB as usize + 1] = lo;
        chip.load_packet(payload, true);
    }

    /// A packet that fails its CRC
    pub fn inject_crc_error(&self, payload: &[u8]) {
        self.chip.lock().load_packet(payload, false);
        self.line.pulse();
    }

    /// A packet whose length byte is `len`
    pub fn inject_oversize(&self, len: u8) {
        let mut chip = self.chip.lock();
        chip.load_packet(&[0u8; 65], true);
        chip.rx_fifo[0] = len;
        drop(chip);
        self.line.pulse();
    }

    /// Signal above threshold that never syncs
    pub fn inject_noise(&self) {
        self.chip.lock().regs[fsk::REG_IRQFLAGS1 as usize] |= fsk::IRQ1_RXREADY | fsk::IRQ1_RSSI;
        self.line.pulse();
    }

    /// Payloads transmitted so far, length byte stripped
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.chip.lock().sent.clone()
    }

    /// Receiver restarts issued by the driver
    pub fn restarts(&self) -> usize {
        self.chip.lock().restarts
    }

    /// Read a register without a bus transfer
    pub fn reg(&self, addr: u8) -> u8 {
        self.chip.lock().regs[addr as usize & 0x7f]
    }

    /// Set a register without side effects
    pub fn set_reg(&self, addr: u8, value: u8) {
        self.chip.lock().regs[addr as usize & 0x7f] = value;
    }

    /// Fail every following transfer
    pub fn fail_bus(&self) {
        self.chip.lock().faults.bus_down = true;
    }

    /// Stop (or resume) reporting mode-ready
    pub fn set_mode_ready(&self, ready: bool) {
        self.chip.lock().mode_ready = ready;
    }

    /// Disable the PLL-lock interrupt used by the self test
    pub fn set_pll_interrupt(&self, enabled: bool) {
        self.chip.lock().pll_interrupt = enabled;
    }

    /// Read back zeros as if no chip were attached
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.chip.lock().faults.unresponsive = unresponsive;
    }

    /// Bus transfers performed
    pub fn transfers(&self) -> usize {
        self.chip.lock().transfers
    }
}

impl Default for Sx1231Sim {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioBus for Sx1231Sim {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        self.chip.lock().transfer(write, read, &self.line)
    }

    fn configure(&mut self, _mode: SpiMode, _bits: u8) -> io::Result<()> {
        self.chip.lock().faults.check()
    }

    fn set_clock_rate(&mut self, _hz: u32) -> io::Result<()> {
        self.chip.lock().faults.check()
    }
}

// ============================================================================
// SX1276
// ============================================================================

struct Sx1276Chip {
    regs: [u8; 0x80],
    fifo: [u8; 256],
    sent: Vec<Vec<u8>>,
    tx_interrupt: bool,
    faults: Faults,
}

impl Sx1276Chip {
    fn fifo_next(&mut self) -> usize {
        let ptr = &mut self.regs[lora::REG_FIFOPTR as usize];
        let at = *ptr as usize;
        *ptr = ptr.wrapping_add(1);
        at
    }

    fn write_reg(&mut self, addr: u8, value: u8, line: &SimLine) {
        match addr {
            lora::REG_IRQFLAGS => {
                self.regs[addr as usize] &= !value;
            }
            lora::REG_OPMODE => {
                self.regs[addr as usize] = value;
                if value & lora::MODE_MASK == lora::MODE_TX {
                    let len = self.regs[lora::REG_PAYLENGTH as usize] as usize;
                    self.sent.push(self.fifo[..len].to_vec());
                    self.regs[lora::REG_IRQFLAGS as usize] |= lora::IRQ_TXDONE;
                    if self.tx_interrupt {
                        line.pulse();
                    }
                }
            }
            _ => self.regs[addr as usize & 0x7f] = value,
        }
    }

    fn transfer(&mut self, write: &[u8], read: &mut [u8], line: &SimLine) -> io::Result<()> {
        self.faults.check()?;
        read.iter_mut().for_each(|b| *b = 0);
        if self.faults.unresponsive || write.is_empty() {
            return Ok(());
        }
        let addr = write[0] & 0x7f;
        if write[0] & 0x80 != 0 {
            for (i, &value) in write[1..].iter().enumerate() {
                if addr == lora::REG_FIFO {
                    let at = self.fifo_next();
                    self.fifo[at] = value;
                } else {
                    self.write_reg(addr.wrapping_add(i as u8) & 0x7f, value, line);
                }
            }
            return Ok(());
        }
        for i in 1..write.len().min(read.len()) {
            read[i] = if addr == lora::REG_FIFO {
                let at = self.fifo_next();
                self.fifo[at]
            } else {
                self.regs[(addr as usize + i - 1) & 0x7f]
            };
        }
        Ok(())
    }
}

/// Simulated SX1276 in LoRa mode
#[derive(Clone)]
pub struct Sx1276Sim {
    chip: Arc<Mutex<Sx1276Chip>>,
    line: SimLine,
}

impl Sx1276Sim {
    /// Power-on chip with a fresh interrupt line
    pub fn new() -> Self {
        let mut regs = [0u8; 0x80];
        regs[lora::REG_VERSION as usize] = 0x12;
        Self {
            chip: Arc::new(Mutex::new(Sx1276Chip {
                regs,
                fifo: [0; 256],
                sent: Vec::new(),
                tx_interrupt: true,
                faults: Faults::default(),
            })),
            line: SimLine::new("sim-dio0"),
        }
    }

    /// Interrupt line wired to DIO0
    pub fn line(&self) -> SimLine {
        self.line.clone()
    }

    /// A received packet at FIFO address 0x80, signalled by RxDone
    pub fn inject_packet(&self, payload: &[u8], snr_reg: i8, rssi_reg: u8, fei_raw: i32) {
        let mut chip = self.chip.lock();
        chip.fifo[0x80..0x80 + payload.len()].copy_from_slice(payload);
        let regs = &mut chip.regs;
        regs[lora::REG_FIFORXCURR as usize] = 0x80;
        regs[lora::REG_RXBYTES as usize] = payload.len() as u8;
        regs[lora::REG_PKTSNR as usize] = snr_reg as u8;
        regs[lora::REG_PKTRSSI as usize] = rssi_reg;
        let fei = (fei_raw as u32) & 0x0f_ffff;
        regs[lora::REG_FEI as usize] = (fei >> 16) as u8;
        regs[lora::REG_FEI as usize + 1] = (fei >> 8) as u8;
        regs[lora::REG_FEI as usize + 2] = fei as u8;
        regs[lora::REG_IRQFLAGS as usize] |= lora::IRQ_RXDONE;
        drop(chip);
        self.line.pulse();
    }

    /// RxDone with the CRC error flag
    pub fn inject_crc_error(&self) {
        self.chip.lock().regs[lora::REG_IRQFLAGS as usize] |= lora::IRQ_RXDONE | lora::IRQ_CRCERR;
        self.line.pulse();
    }

    /// Payloads transmitted so far, self-test packet included
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.chip.lock().sent.clone()
    }

    /// Read a register without a bus transfer
    pub fn reg(&self, addr: u8) -> u8 {
        self.chip.lock().regs[addr as usize & 0x7f]
    }

    /// Fail every following transfer
    pub fn fail_bus(&self) {
        self.chip.lock().faults.bus_down = true;
    }

    /// Suppress the TxDone interrupt
    pub fn set_tx_interrupt(&self, enabled: bool) {
        self.chip.lock().tx_interrupt = enabled;
    }

    /// Read back zeros as if no chip were attached
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.chip.lock().faults.unresponsive = unresponsive;
    }
}

impl Default for Sx1276Sim {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioBus for Sx1276Sim {
    fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
        self.chip.lock().transfer(write, read, &self.line)
    }

    fn configure(&mut self, _mode: SpiMode, _bits: u8) -> io::Result<()> {
        self.chip.lock().faults.check()
    }

    fn set_clock_rate(&mut self, _hz: u32) -> io::Result<()> {
        self.chip.lock().faults.check()
    }
}
