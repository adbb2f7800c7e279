//! JeeLabs LoRa (JLL) packet format
//!
//! A JLL packet is a header byte, a payload-type byte, the payload and an
//! optional 2-byte info trailer:
//!
//! ```text
//!  byte 0: C  G  A  n4 n3 n2 n1 n0   ctrl, from-gateway, ack, node
//!  byte 1: I  t6 t5 t4 t3 t2 t1 t0   info trailer flag, payload type
//!  byte 2..n-2: payload
//!  trailer: rssi + 164 (0..127), fei / 128 (signed byte)
//! ```
//!
//! The ctrl and ack bits select one of four [`PacketKind`]s. Node 0 is
//! broadcast and node 31 an anonymous transmit-only node. The trailer carries
//! the signal quality of the most recent packet received from the peer, so a
//! node learns how well it is heard without a separate message.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::packet::LinkQuality;

/// Broadcast node id
pub const BROADCAST_NODE: u8 = 0;

/// Anonymous transmit-only node id
pub const ANONYMOUS_NODE: u8 = 31;

/// Payload type of an empty packet, typically an ack
pub const TYPE_EMPTY: u8 = 0;

/// Payload type of a node details report
pub const TYPE_NODE_DETAILS: u8 = 1;

const HEADER_LEN: usize = 2;
const TRAILER_LEN: usize = 2;
const NODE_MASK: u8 = 0x1f;
const FROM_GATEWAY_BIT: u8 = 0x40;
const TYPE_MASK: u8 = 0x7f;
const TRAILER_BIT: u8 = 0x80;

/// The four JLL packet kinds, encoded by the ctrl and ack header bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    /// Data, no ack requested
    DataNoAck,
    /// Data, ack requested
    DataAck,
    /// Acknowledgement
    Ack,
    /// Reserved
    Special,
}

impl PacketKind {
    /// Two-bit code: ctrl in bit 1, ack in bit 0
    pub fn code(self) -> u8 {
        match self {
            PacketKind::DataNoAck => 0,
            PacketKind::DataAck => 1,
            PacketKind::Ack => 2,
            PacketKind::Special => 3,
        }
    }

    /// Inverse of [`code`](Self::code), only the low two bits are looked at
    pub fn from_code(code: u8) -> Self {
        match code & 3 {
            0 => PacketKind::DataNoAck,
            1 => PacketKind::DataAck,
            2 => PacketKind::Ack,
            _ => PacketKind::Special,
        }
    }

    /// True for packets carrying application data
    pub fn is_data(self) -> bool {
        matches!(self, PacketKind::DataNoAck | PacketKind::DataAck)
    }

    /// Short label used in log lines
    pub fn label(self) -> &'static str {
        match self {
            PacketKind::DataNoAck => "D",
            PacketKind::DataAck => "DA",
            PacketKind::Ack => "A",
            PacketKind::Special => "?",
        }
    }
}

/// Calibration of the info trailer
///
/// These are calibration choices rather than protocol law. The defaults
/// match deployed nodes; the 127 strength cap means the best signal a peer
/// can report is `127 - rssi_offset` (-37 dBm by default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkQualityScale {
    /// Added to the dBm value before clamping
    pub rssi_offset: i32,
    /// Largest encodable strength byte
    pub rssi_max: u8,
    /// Hz per unit of the frequency error byte
    pub fei_step: i32,
}

impl Default for LinkQualityScale {
    fn default() -> Self {
        Self {
            rssi_offset: 164,
            rssi_max: 127,
            fei_step: 128,
        }
    }
}

impl LinkQualityScale {
    /// Encode a link quality sample as trailer bytes
    ///
    /// Out-of-range values clamp. A zero `fei_step` reports no frequency error.
    pub fn encode(&self, quality: LinkQuality) -> [u8; TRAILER_LEN] {
        let rssi = quality
            .rssi
            .saturating_add(self.rssi_offset)
            .clamp(0, i32::from(self.rssi_max));
        let fei = quality
            .fei
            .checked_div(self.fei_step)
            .unwrap_or(0)
            .clamp(i32::from(i8::MIN), i32::from(i8::MAX));
        [rssi as u8, fei as i8 as u8]
    }

    /// Decode trailer bytes
    pub fn decode(&self, trailer: [u8; TRAILER_LEN]) -> LinkQuality {
        LinkQuality {
            rssi: i32::from(trailer[0]).saturating_sub(self.rssi_offset),
            fei: i32::from(trailer[1] as i8).saturating_mul(self.fei_step),
        }
    }

    /// Strongest signal the trailer can report
    pub fn rssi_ceiling(&self) -> i32 {
        i32::from(self.rssi_max).saturating_sub(self.rssi_offset)
    }
}

/// Decoded view of a JLL packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JllPacket {
    /// Packet kind
    pub kind: PacketKind,
    /// Direction: true when travelling towards the gateway
    pub to_gateway: bool,
    /// Node id (0-31)
    pub node: u8,
    /// Payload type (0-127)
    pub payload_type: u8,
    /// Payload, header and trailer stripped
    pub payload: Bytes,
    /// Signal quality reported by the peer in the info trailer
    pub remote: Option<LinkQuality>,
}

impl JllPacket {
    /// Create a data packet without a trailer
    pub fn data(node: u8, payload_type: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: PacketKind::DataNoAck,
            to_gateway: false,
            node,
            payload_type,
            payload: payload.into(),
            remote: None,
        }
    }

    /// Create an ack to `node` reporting the quality its packet arrived with
    pub fn ack(node: u8, quality: LinkQuality) -> Self {
        Self {
            kind: PacketKind::Ack,
            to_gateway: false,
            node,
            payload_type: TYPE_EMPTY,
            payload: Bytes::new(),
            remote: Some(quality),
        }
    }

    /// Encode with the default trailer calibration
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with(&LinkQualityScale::default())
    }

    /// Encode with an explicit trailer calibration
    pub fn encode_with(&self, scale: &LinkQualityScale) -> Vec<u8> {
        let mut pkt = Vec::with_capacity(HEADER_LEN + self.payload.len() + TRAILER_LEN);
        let code = self.kind.code();
        let mut header = ((code & 2) << 6) | ((code & 1) << 5) | (self.node & NODE_MASK);
        if !self.to_gateway {
            header |= FROM_GATEWAY_BIT;
        }
        pkt.push(header);
        pkt.push(self.payload_type & TYPE_MASK);
        pkt.extend_from_slice(&self.payload);
        if let Some(quality) = self.remote {
            pkt[1] |= TRAILER_BIT;
            pkt.extend_from_slice(&scale.encode(quality));
        }
        pkt
    }
}

/// Encode a JLL packet
///
/// A zero `rssi` means no trailer, matching what deployed nodes send.
pub fn encode(
    kind: PacketKind,
    to_gateway: bool,
    node: u8,
    payload_type: u8,
    payload: &[u8],
    rssi: i32,
    fei: i32,
) -> Vec<u8> {
    JllPacket {
        kind,
        to_gateway,
        node,
        payload_type,
        payload: Bytes::copy_from_slice(payload),
        remote: (rssi != 0).then(|| LinkQuality::new(rssi, fei)),
    }
    .encode()
}

/// Decode a JLL packet with the default trailer calibration
pub fn decode(pkt: &[u8]) -> Result<JllPacket> {
    decode_with(pkt, &LinkQualityScale::default())
}

/// Decode a JLL packet with an explicit trailer calibration
///
/// The trailer is only parsed when its flag is set and at least 4 bytes are
/// present; otherwise everything after the header is payload.
pub fn decode_with(pkt: &[u8], scale: &LinkQualityScale) -> Result<JllPacket> {
    if pkt.len() < HEADER_LEN {
        return Err(CodecError::TooShort { len: pkt.len() });
    }

    let code = ((pkt[0] & 0x80) >> 6) | ((pkt[0] & 0x20) >> 5);
    let has_trailer = pkt[1] & TRAILER_BIT != 0 && pkt.len() >= HEADER_LEN + TRAILER_LEN;
    let (payload, remote) = if has_trailer {
        let i = pkt.len() - TRAILER_LEN;
        (&pkt[HEADER_LEN..i], Some(scale.decode([pkt[i], pkt[i + 1]])))
    } else {
        (&pkt[HEADER_LEN..], None)
    };

    Ok(JllPacket {
        kind: PacketKind::from_code(code),
        to_gateway: pkt[0] & FROM_GATEWAY_BIT == 0,
        node: pkt[0] & NODE_MASK,
        payload_type: pkt[1] & TYPE_MASK,
        payload: Bytes::copy_from_slice(payload),
        remote,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Vector {
        kind: PacketKind,
        node: u8,
        payload_type: u8,
        to_gateway: bool,
        rssi: i32,
        fei: i32,
        payload: Vec<u8>,
        encoded: Vec<u8>,
    }

    fn vectors() -> Vec<Vector> {
        vec![
            Vector {
                kind: PacketKind::DataAck,
                node: 2,
                payload_type: 3,
                to_gateway: false,
                rssi: -44,
                fei: 5,
                payload: vec![],
                encoded: vec![0x62, 0x83, 120, 0],
            },
            Vector {
                kind: PacketKind::DataNoAck,
                node: 12,
                payload_type: 69,
                to_gateway: true,
                rssi: -87,
                fei: 5432,
                payload: vec![34, 35, 36, 37],
                encoded: vec![12, 197, 34, 35, 36, 37, 77, 42],
            },
            Vector {
                kind: PacketKind::DataAck,
                node: 11,
                payload_type: 1,
                to_gateway: false,
                rssi: 0,
                fei: 100,
                payload: vec![34, 35, 36],
                encoded: vec![0x6b, 1, 34, 35, 36],
            },
            Vector {
                kind: PacketKind::Ack,
                node: 23,
                payload_type: 0,
                to_gateway: false,
                rssi: 1,
                fei: -50000,
                payload: vec![],
                encoded: vec![0xd7, 0x80, 127, 0x80],
            },
        ]
    }

    #[test]
    fn test_encode_vectors() {
        for v in vectors() {
            let got = encode(
                v.kind,
                v.to_gateway,
                v.node,
                v.payload_type,
                &v.payload,
                v.rssi,
                v.fei,
            );
            assert_eq!(got, v.encoded, "{:?} node {}", v.kind, v.node);
        }
    }

    #[test]
    fn test_decode_vectors() {
        let ceiling = LinkQualityScale::default().rssi_ceiling();
        for v in vectors() {
            let pkt = decode(&v.encoded).unwrap();
            assert_eq!(pkt.kind, v.kind);
            assert_eq!(pkt.node, v.node);
            assert_eq!(pkt.payload_type, v.payload_type);
            assert_eq!(pkt.to_gateway, v.to_gateway);
            assert_eq!(&pkt.payload[..], &v.payload[..]);

            match pkt.remote {
                None => assert_eq!(v.rssi, 0),
                Some(q) => {
                    assert_eq!(q.rssi, v.rssi.min(ceiling));
                    let fei = (v.fei / 128).clamp(-128, 127) * 128;
                    assert_eq!(q.fei, fei);
                }
            }
        }
    }

    #[test]
    fn test_rssi_ceiling() {
        assert_eq!(LinkQualityScale::default().rssi_ceiling(), -37);
        let pkt = JllPacket::ack(5, LinkQuality::new(-10, 0)).encode();
        assert_eq!(decode(&pkt).unwrap().remote.unwrap().rssi, -37);
    }

    #[test]
    fn test_weak_signal_clamps_to_zero() {
        let trailer = LinkQualityScale::default().encode(LinkQuality::new(-200, 0));
        assert_eq!(trailer[0], 0);
    }

    #[test]
    fn test_degenerate_scale_does_not_panic() {
        let scale = LinkQualityScale {
            rssi_offset: i32::MAX,
            rssi_max: 127,
            fei_step: 0,
        };
        assert_eq!(scale.encode(LinkQuality::new(i32::MAX, 5000)), [127, 0]);
        assert_eq!(scale.encode(LinkQuality::new(i32::MIN, i32::MIN)), [0, 0]);
        assert_eq!(scale.decode([0, 0x80]), LinkQuality::new(-i32::MAX, 0));
        assert_eq!(scale.rssi_ceiling(), 127 - i32::MAX);

        let negative = LinkQualityScale {
            rssi_offset: i32::MIN,
            rssi_max: 127,
            fei_step: -1,
        };
        assert_eq!(negative.encode(LinkQuality::new(-1, -256)), [0, 127]);
        assert_eq!(negative.encode(LinkQuality::new(0, i32::MIN)), [0, 0]);
        assert_eq!(negative.decode([127, 0x80]).rssi, i32::MAX);
    }

    #[test]
    fn test_custom_scale() {
        let scale = LinkQualityScale {
            rssi_offset: 150,
            rssi_max: 127,
            fei_step: 64,
        };
        let pkt = JllPacket::ack(3, LinkQuality::new(-100, 640)).encode_with(&scale);
        assert_eq!(&pkt[2..], &[50, 10]);
        let back = decode_with(&pkt, &scale).unwrap();
        assert_eq!(back.remote, Some(LinkQuality::new(-100, 640)));
    }

    #[test]
    fn test_trailer_flag_on_short_packet_is_ignored() {
        let pkt = decode(&[0x42, 0x85, 7]).unwrap();
        assert!(pkt.remote.is_none());
        assert_eq!(&pkt.payload[..], &[7]);
        assert_eq!(pkt.payload_type, 5);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(decode(&[0x42]), Err(CodecError::TooShort { len: 1 }));
    }

    #[test]
    fn test_kind_codes() {
        for kind in [
            PacketKind::DataNoAck,
            PacketKind::DataAck,
            PacketKind::Ack,
            PacketKind::Special,
        ] {
            assert_eq!(PacketKind::from_code(kind.code()), kind);
        }
        assert!(PacketKind::DataAck.is_data());
        assert!(!PacketKind::Ack.is_data());
    }
}
