//! Register access over a [`RadioBus`]
//!
//! Both chips use the same framing: the first byte is the register address,
//! with bit 7 set for writes. Consecutive bytes address consecutive
//! registers, except for the FIFO register which absorbs them all.

use tracing::debug;

use crate::error::Result;
use crate::hal::RadioBus;

const WRITE: u8 = 0x80;
const ADDR_MASK: u8 = 0x7f;

/// Register-level view of a radio bus
pub struct RegisterBus<B> {
    bus: B,
}

impl<B: RadioBus> RegisterBus<B> {
    /// Wrap a bus
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Direct access to the bus for clock setup
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Write one or more consecutive registers
    pub fn write(&mut self, addr: u8, data: &[u8]) -> Result<()> {
        let mut w = Vec::with_capacity(data.len() + 1);
        w.push(addr | WRITE);
        w.extend_from_slice(data);
        let mut r = vec![0u8; w.len()];
        self.bus.transfer(&w, &mut r)?;
        Ok(())
    }

    /// Write a single register
    pub fn write8(&mut self, addr: u8, value: u8) -> Result<()> {
        self.write(addr, &[value])
    }

    /// Read a single register
    pub fn read8(&mut self, addr: u8) -> Result<u8> {
        let mut r = [0u8; 2];
        self.bus.transfer(&[addr & ADDR_MASK, 0], &mut r)?;
        Ok(r[1])
    }

    /// Read a big-endian 16-bit register pair
    pub fn read16(&mut self, addr: u8) -> Result<u16> {
        let mut r = [0u8; 3];
        self.bus.transfer(&[addr & ADDR_MASK, 0, 0], &mut r)?;
        Ok(u16::from_be_bytes([r[1], r[2]]))
    }

    /// Read `len` bytes starting at `addr`
    pub fn read_burst(&mut self, addr: u8, len: usize) -> Result<Vec<u8>> {
        let mut w = vec![0u8; len + 1];
        w[0] = addr & ADDR_MASK;
        let mut r = vec![0u8; len + 1];
        self.bus.transfer(&w, &mut r)?;
        r.remove(0);
        Ok(r)
    }

    /// Write a table of `(register, value)` pairs in order
    pub fn write_table(&mut self, table: &[(u8, u8)]) -> Result<()> {
        for &(addr, value) in table {
            self.write8(addr, value)?;
        }
        Ok(())
    }

    /// Write/read-back handshake proving the chip answers on the bus
    ///
    /// Returns the pattern that failed after `tries` attempts.
    pub fn handshake(&mut self, addr: u8, tries: usize) -> Result<std::result::Result<(), u8>> {
        for pattern in [0xaa_u8, 0x55] {
            let mut ok = false;
            for _ in 0..tries {
                self.write8(addr, pattern)?;
                if self.read8(addr)? == pattern {
                    ok = true;
                    break;
                }
            }
            if !ok {
                return Ok(Err(pattern));
            }
        }
        Ok(Ok(()))
    }

    /// Log registers 1..=last in rows of 16 at debug level
    pub fn dump(&mut self, chip: &str, last: u8) -> Result<()> {
        let regs = self.read_burst(1, last as usize)?;
        for (row, chunk) in regs.chunks(16).enumerate() {
            debug!(chip, base = row * 16 + 1, regs = %hex::encode(chunk), "register dump");
        }
        Ok(())
    }

    /// Give the bus back
    pub fn into_inner(self) -> B {
        self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Default)]
    struct Recorder {
        writes: Vec<Vec<u8>>,
        reply: Vec<u8>,
    }

    impl RadioBus for Recorder {
        fn transfer(&mut self, write: &[u8], read: &mut [u8]) -> io::Result<()> {
            self.writes.push(write.to_vec());
            for (i, b) in read.iter_mut().enumerate() {
                *b = self.reply.get(i).copied().unwrap_or(0);
            }
            Ok(())
        }
        fn configure(&mut self, _: crate::hal::SpiMode, _: u8) -> io::Result<()> {
            Ok(())
        }
        fn set_clock_rate(&mut self, _: u32) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_sets_high_bit() {
        let mut regs = RegisterBus::new(Recorder::default());
        regs.write(0x07, &[0xd9, 0x00, 0x00]).unwrap();
        assert_eq!(regs.into_inner().writes, vec![vec![0x87, 0xd9, 0x00, 0x00]]);
    }

    #[test]
    fn test_read_framing() {
        let mut regs = RegisterBus::new(Recorder {
            reply: vec![0xff, 0x24],
            ..Default::default()
        });
        assert_eq!(regs.read8(0x90).unwrap(), 0x24);
        assert_eq!(regs.into_inner().writes, vec![vec![0x10, 0x00]]);
    }

    #[test]
    fn test_read16_big_endian() {
        let mut regs = RegisterBus::new(Recorder {
            reply: vec![0, 0xff, 0xfe],
            ..Default::default()
        });
        assert_eq!(regs.read16(0x1f).unwrap() as i16, -2);
    }
}
