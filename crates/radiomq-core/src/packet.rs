//! Raw radio packets and their signal-quality metadata

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signal quality of a received packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkQuality {
    /// Received signal strength in dBm
    pub rssi: i32,
    /// Frequency error estimate in Hz
    pub fei: i32,
}

impl LinkQuality {
    /// Create a link quality sample
    pub fn new(rssi: i32, fei: i32) -> Self {
        Self { rssi, fei }
    }
}

/// Bytes exchanged with a radio, excluding the preamble, sync word, length
/// byte and CRC the hardware adds on its own.
///
/// Signal metadata is filled in on receive only; a packet handed to a radio
/// for transmission just carries its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPacket {
    /// Packet bytes, link-layer header included
    pub packet: Bytes,
    /// Received signal strength in dBm, 0 if unknown
    pub rssi: i32,
    /// Signal-to-noise ratio in dB, LoRa radios only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<i32>,
    /// Frequency error in Hz, 0 if unknown
    pub fei: i32,
    /// Time of the receive interrupt
    pub at: DateTime<Utc>,
}

impl RawPacket {
    /// Create a packet without signal metadata, stamped now
    pub fn new(packet: impl Into<Bytes>) -> Self {
        Self {
            packet: packet.into(),
            rssi: 0,
            snr: None,
            fei: 0,
            at: Utc::now(),
        }
    }

    /// Attach signal strength and frequency error
    pub fn with_quality(mut self, quality: LinkQuality) -> Self {
        self.rssi = quality.rssi;
        self.fei = quality.fei;
        self
    }

    /// Attach a signal-to-noise ratio
    pub fn with_snr(mut self, snr: i32) -> Self {
        self.snr = Some(snr);
        self
    }

    /// Override the capture timestamp
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// Signal strength and frequency error of this packet
    pub fn quality(&self) -> LinkQuality {
        LinkQuality::new(self.rssi, self.fei)
    }

    /// Number of packet bytes
    pub fn len(&self) -> usize {
        self.packet.len()
    }

    /// True for a zero-length packet
    pub fn is_empty(&self) -> bool {
        self.packet.is_empty()
    }

    /// Packet bytes as lowercase hex, for log lines
    pub fn hex(&self) -> String {
        hex::encode(&self.packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_fills_metadata() {
        let pkt = RawPacket::new(vec![1u8, 2, 3])
            .with_quality(LinkQuality::new(-80, 1200))
            .with_snr(7);
        assert_eq!(pkt.len(), 3);
        assert_eq!(pkt.rssi, -80);
        assert_eq!(pkt.fei, 1200);
        assert_eq!(pkt.snr, Some(7));
        assert_eq!(pkt.quality(), LinkQuality::new(-80, 1200));
        assert_eq!(pkt.hex(), "010203");
    }

    #[test]
    fn test_snr_omitted_when_absent() {
        let pkt = RawPacket::new(vec![0xaau8]);
        let json = serde_json::to_string(&pkt).unwrap();
        assert!(!json.contains("snr"));
        let back: RawPacket = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pkt);
    }
}
