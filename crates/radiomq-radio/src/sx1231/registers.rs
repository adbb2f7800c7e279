//! SX1231 register map, mode values and flags

#![allow(missing_docs)]

pub const REG_FIFO: u8 = 0x00;
pub const REG_OPMODE: u8 = 0x01;
pub const REG_DATAMODUL: u8 = 0x02;
pub const REG_BITRATEMSB: u8 = 0x03;
pub const REG_FDEVMSB: u8 = 0x05;
pub const REG_FRFMSB: u8 = 0x07;
pub const REG_AFCCTRL: u8 = 0x0b;
pub const REG_VERSION: u8 = 0x10;
pub const REG_PALEVEL: u8 = 0x11;
pub const REG_RXBW: u8 = 0x19;
pub const REG_AFCMSB: u8 = 0x1f;
pub const REG_RSSIVALUE: u8 = 0x24;
pub const REG_DIOMAPPING1: u8 = 0x25;
pub const REG_IRQFLAGS1: u8 = 0x27;
pub const REG_IRQFLAGS2: u8 = 0x28;
pub const REG_RSSITHRES: u8 = 0x29;
pub const REG_SYNCCONFIG: u8 = 0x2e;
pub const REG_SYNCVALUE1: u8 = 0x2f;
pub const REG_PKTCONFIG2: u8 = 0x3d;
pub const REG_TESTPA1: u8 = 0x5a;
pub const REG_TESTPA2: u8 = 0x5c;
pub const REG_TESTAFC: u8 = 0x71;

pub const MODE_SLEEP: u8 = 0x00;
pub const MODE_STANDBY: u8 = 0x04;
pub const MODE_FS: u8 = 0x08;
pub const MODE_TRANSMIT: u8 = 0x0c;
pub const MODE_RECEIVE: u8 = 0x10;
pub const MODE_MASK: u8 = 0x1c;

pub const IRQ1_MODEREADY: u8 = 1 << 7;
pub const IRQ1_RXREADY: u8 = 1 << 6;
pub const IRQ1_RSSI: u8 = 1 << 3;
pub const IRQ1_TIMEOUT: u8 = 1 << 2;
pub const IRQ1_SYNCMATCH: u8 = 1 << 0;

pub const IRQ2_FIFONOTEMPTY: u8 = 1 << 6;
pub const IRQ2_PACKETSENT: u8 = 1 << 3;
pub const IRQ2_PAYLOADREADY: u8 = 1 << 2;
pub const IRQ2_CRCOK: u8 = 1 << 1;

/// DIO0 payload-ready/packet-sent, DIO3 sync, DIO4 timeout
pub const DIO_MAPPING: u8 = 0x31;
/// DIO0 as RSSI in RX mode (rises on signal, before sync)
pub const DIO_RSSI: u8 = 0xc0;
/// DIO0 as packet-sent in TX mode
pub const DIO_PKTSENT: u8 = 0x00;
/// DIO0 as PLL lock in FS mode, used for the interrupt self test
pub const DIO_PLLLOCK: u8 = 0xc0;

/// PKTCONFIG2: inter-packet delay 1, restart RX, auto-restart on
pub const PKTCONFIG2_RESTART: u8 = 0x16;
/// Restart bit within PKTCONFIG2
pub const PKTCONFIG2_RESTART_BIT: u8 = 0x04;

/// Maximum payload: the FIFO holds 66 bytes including the length byte
pub const MAX_PAYLOAD: usize = 65;
/// FIFO read size: length byte plus 65 payload bytes
pub const FIFO_READ: usize = 66;

/// Crystal frequency
pub const FXOSC: u32 = 32_000_000;

/// Power-up configuration, written in order
pub const CONFIG_REGS: &[(u8, u8)] = &[
    (0x01, 0x00), // OpMode = sleep
    (0x11, 0x9f), // PaLevel = PA0 on, max level
    (0x12, 0x09), // PaRamp 40us
    (0x1e, 0x0c), // AfcAutoclearOn, AfcAutoOn
    (0x25, 0x31), // DioMapping1: payload ready, sync, timeout
    (0x26, 0x07), // DioMapping2: clkout off
    (0x29, 0xa8), // RssiThresh -84dBm
    (0x2a, 0x00), // RxStartTimeout: off
    (0x2b, 0x40), // RssiTimeout after 128 bytes
    (0x2d, 0x05), // PreambleSize = 5
    (0x37, 0xd8), // PacketConfig1 = variable, white, filt none, crc on
    (0x38, 0x42), // PayloadLength = max
    (0x3c, 0x8f), // FifoTresh, not-empty, level 15
    (0x3d, 0x12), // PacketConfig2, interpkt = 1, autorxrestart on
    (0x6f, 0x30), // TestDagc, continuous DAGC with low-beta offset
];

/// Modulation parameters for one bit rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateParams {
    /// Frequency deviation in Hz
    pub fdev: u32,
    /// Gaussian shaping (DATAMODUL low bits)
    pub shaping: u8,
    /// RXBW register value
    pub rx_bw: u8,
    /// AFCBW register value
    pub afc_bw: u8,
}

/// Supported bit rates
///
/// 49230 is the JeeLabs native rate. 49231..49233 are the same rate with
/// wider deviation or filter bandwidth for other node firmware.
pub const RATES: &[(u32, RateParams)] = &[
    (49230, RateParams { fdev: 45000, shaping: 0, rx_bw: 0x4a, afc_bw: 0x42 }),
    (49231, RateParams { fdev: 180000, shaping: 0, rx_bw: 0x49, afc_bw: 0x49 }),
    (49232, RateParams { fdev: 45000, shaping: 0, rx_bw: 0x52, afc_bw: 0x4a }),
    (49233, RateParams { fdev: 51660, shaping: 0, rx_bw: 0x52, afc_bw: 0x4a }),
    (50000, RateParams { fdev: 90000, shaping: 0, rx_bw: 0x42, afc_bw: 0x42 }),
];

/// Look up a bit rate
pub fn rate_params(rate: u32) -> Option<RateParams> {
    RATES.iter().find(|(r, _)| *r == rate).map(|(_, p)| *p)
}
