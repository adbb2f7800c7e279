//! SX1276 LoRa register map, modes, flags and modem profiles

#![allow(missing_docs)]

use std::time::Duration;

pub const REG_FIFO: u8 = 0x00;
pub const REG_OPMODE: u8 = 0x01;
pub const REG_FRFMSB: u8 = 0x06;
pub const REG_PACONFIG: u8 = 0x09;
pub const REG_FIFOPTR: u8 = 0x0d;
pub const REG_FIFORXCURR: u8 = 0x10;
pub const REG_IRQFLAGS: u8 = 0x12;
pub const REG_RXBYTES: u8 = 0x13;
pub const REG_MODEMSTAT: u8 = 0x18;
pub const REG_PKTSNR: u8 = 0x19;
pub const REG_PKTRSSI: u8 = 0x1a;
pub const REG_MODEMCONF1: u8 = 0x1d;
pub const REG_MODEMCONF2: u8 = 0x1e;
pub const REG_PAYLENGTH: u8 = 0x22;
pub const REG_MODEMCONF3: u8 = 0x26;
pub const REG_FEI: u8 = 0x28;
pub const REG_SYNC: u8 = 0x39;
pub const REG_DIOMAPPING1: u8 = 0x40;
pub const REG_VERSION: u8 = 0x42;
pub const REG_PADAC: u8 = 0x4d;

pub const MODE_SLEEP: u8 = 0;
pub const MODE_STANDBY: u8 = 1;
pub const MODE_FS_TX: u8 = 2;
pub const MODE_TX: u8 = 3;
pub const MODE_FS_RX: u8 = 4;
pub const MODE_RX_CONT: u8 = 5;
pub const MODE_RX_SINGLE: u8 = 6;
pub const MODE_CAD: u8 = 7;
pub const MODE_MASK: u8 = 0x07;
/// Added to every mode written: LoRa mode, low-frequency registers
pub const OPMODE_LORA_LF: u8 = 0x88;

pub const IRQ_RXTIMEOUT: u8 = 1 << 7;
pub const IRQ_RXDONE: u8 = 1 << 6;
pub const IRQ_CRCERR: u8 = 1 << 5;
pub const IRQ_VALIDHDR: u8 = 1 << 4;
pub const IRQ_TXDONE: u8 = 1 << 3;
pub const IRQ_CLEAR_ALL: u8 = 0xff;

/// MODEMSTAT: signal detected or synchronized
pub const MODEMSTAT_SIGNAL: u8 = 0x03;

pub const DIO_TXDONE: u8 = 0x40;
pub const DIO_RXDONE: u8 = 0x00;
pub const DIO_NONE: u8 = 0xc0;

pub const MAX_PAYLOAD: usize = 250;
pub const FXOSC: u32 = 32_000_000;
/// Preamble length from the power-up table (PREAMBLE_LSB = 0x0a)
pub const PREAMBLE_SYMBOLS: u32 = 10;

/// Power-up configuration, written in order
pub const CONFIG_REGS: &[(u8, u8)] = &[
    (0x01, 0x88), // OpMode = LoRa+LF+sleep
    (0x01, 0x88), // again, the first write only switches to LoRa
    (0x0b, 0x32), // over-current protection @150mA
    (0x0c, 0x23), // max LNA gain
    (0x0d, 0x00), // FIFO ptr = 0
    (0x0e, 0x00), // FIFO TX base = 0
    (0x0f, 0x00), // FIFO RX base = 0
    (0x10, 0x00), // FIFO RX current = 0
    (0x11, 0x12), // mask valid header and FHSS change interrupts
    (0x1f, 0xff), // RX timeout at 255 bytes
    (0x20, 0x00), // preamble MSB
    (0x21, 0x0a), // preamble LSB
    (0x23, 0xff), // max payload of 255 bytes
    (0x24, 0x00), // no freq hopping
    (0x27, 0x00), // no ppm freq correction
    (0x31, 0x03), // detection optimize for SF7-12
    (0x33, 0x27), // no I/Q invert
    (0x37, 0x0a), // detection threshold for SF7-12
    (0x40, 0x00), // DIO mapping 1
    (0x41, 0x00), // DIO mapping 2
];

/// One LoRa modem configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    /// Configuration name used in radio config
    pub name: &'static str,
    /// MODEMCONF1: bandwidth, coding rate, header mode
    pub conf1: u8,
    /// MODEMCONF2: spreading factor, TX mode, CRC
    pub conf2: u8,
    /// MODEMCONF3: low data rate optimize, LNA AGC
    pub conf3: u8,
    /// Signal bandwidth in Hz
    pub bandwidth: u32,
    /// Spreading factor (chips per symbol = 2^sf)
    pub sf: u8,
    /// Coding rate denominator, 5..=8 for 4/5..4/8
    pub cr: u8,
    /// Human-readable summary
    pub info: &'static str,
}

impl Profile {
    /// Symbol duration
    pub fn symbol_time(&self) -> Duration {
        Duration::from_nanos((1u64 << self.sf) * 1_000_000_000 / self.bandwidth as u64)
    }

    /// Time on air of a packet with explicit header and CRC
    pub fn time_on_air(&self, len: usize) -> Duration {
        let sf = self.sf as i64;
        let de = if self.symbol_time() > Duration::from_millis(16) { 1 } else { 0 };
        let num = 8 * len as i64 - 4 * sf + 28 + 16;
        let den = 4 * (sf - 2 * de);
        let extra = if num > 0 { (num + den - 1) / den * self.cr as i64 } else { 0 };
        let payload_symbols = 8 + extra as u64;
        // preamble plus 4.25 symbols of sync, counted in quarter symbols
        let quarters = (PREAMBLE_SYMBOLS as u64 * 4 + 17) + payload_symbols * 4;
        self.symbol_time() * quarters as u32 / 4
    }
}

/// Supported profiles
pub const PROFILES: &[Profile] = &[
    Profile {
        name: "bw500cr45sf128",
        conf1: 0x92,
        conf2: 0x74,
        conf3: 0x00,
        bandwidth: 500_000,
        sf: 7,
        cr: 5,
        info: "500kHz bandwidth, 4/5 coding, SF7",
    },
    Profile {
        name: "bw125cr45sf128",
        conf1: 0x72,
        conf2: 0x74,
        conf3: 0x00,
        bandwidth: 125_000,
        sf: 7,
        cr: 5,
        info: "125kHz bandwidth, 4/5 coding, SF7",
    },
    Profile {
        name: "bw125cr48sf4096",
        conf1: 0x78,
        conf2: 0xc4,
        conf3: 0x00,
        bandwidth: 125_000,
        sf: 12,
        cr: 8,
        info: "125kHz bandwidth, 4/8 coding, SF12",
    },
    Profile {
        name: "bw31cr48sf512",
        conf1: 0x48,
        conf2: 0x94,
        conf3: 0x00,
        bandwidth: 31_250,
        sf: 9,
        cr: 8,
        info: "31.25kHz bandwidth, 4/8 coding, SF9",
    },
];

/// Look up a profile by name
pub fn profile(name: &str) -> Option<&'static Profile> {
    PROFILES.iter().find(|p| p.name == name)
}
