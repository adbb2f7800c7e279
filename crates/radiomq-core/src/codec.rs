//! JeeLabs packet format used on the FSK (RFM69) radios
//!
//! # Wire Layout
//!
//! ```text
//!  byte 0: p7 p6 d5 d4 d3 d2 d1 d0   destination node + group parity
//!  byte 1: A  -  s5 s4 s3 s2 s1 s0   source node + ack request
//!  byte 2..: application payload, unchanged
//! ```
//!
//! The parity bits are derived from the group id (the second sync byte on
//! air): `p7 = g7^g5^g3^g1`, `p6 = g6^g4^g2^g0`. A receiver rejects a packet
//! from another group with a single comparison, without the group travelling
//! in the packet itself.
//!
//! Node id 0 is broadcast, 62 is used by anonymous transmit-only nodes and 63
//! marks a promiscuous receiver.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// Broadcast destination
pub const BROADCAST: u8 = 0;

/// Source id of anonymous transmit-only nodes
pub const ANONYMOUS: u8 = 62;

/// Receiver id accepting every destination
pub const PROMISCUOUS: u8 = 63;

/// Size of the JeeLabs header
pub const HEADER_LEN: usize = 2;

/// First sync byte of every JeeLabs packet
pub const SYNC_PREFIX: u8 = 0x2d;

const NODE_MASK: u8 = 0x3f;
const PARITY_MASK: u8 = 0xc0;
const ACK_BIT: u8 = 0x80;

/// Decoded view of a JeeLabs packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressedPacket {
    /// Source node id (0-63)
    pub src: u8,
    /// Destination node id (0-63)
    pub dst: u8,
    /// Sender asks for an acknowledgement
    pub ack_requested: bool,
    /// Application payload with the header stripped
    pub payload: Bytes,
}

impl AddressedPacket {
    /// True if the packet is addressed to everyone
    pub fn is_broadcast(&self) -> bool {
        self.dst == BROADCAST
    }

    /// Re-encode under `group`
    pub fn encode(&self, group: u8) -> Vec<u8> {
        encode(group, self.src, self.dst, self.ack_requested, &self.payload)
    }
}

/// Parity bits for `group`, positioned at bits 7 and 6
pub fn group_parity(group: u8) -> u8 {
    let odd = (group >> 7) ^ (group >> 5) ^ (group >> 3) ^ (group >> 1);
    let even = (group >> 6) ^ (group >> 4) ^ (group >> 2) ^ group;
    ((odd & 1) << 7) | ((even & 1) << 6)
}

/// Sync bytes a radio must be configured with to hear `group`
pub fn sync_bytes(group: u8) -> [u8; 2] {
    [SYNC_PREFIX, group]
}

/// Encode a packet
///
/// Node ids are masked to 6 bits; the payload is appended unchanged.
pub fn encode(group: u8, src: u8, dst: u8, ack: bool, payload: &[u8]) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(HEADER_LEN + payload.len());
    pkt.push((dst & NODE_MASK) | group_parity(group));
    pkt.push((src & NODE_MASK) | if ack { ACK_BIT } else { 0 });
    pkt.extend_from_slice(payload);
    pkt
}

/// Decode a packet received on `group`
///
/// The input is left untouched; the returned payload is a copy of the bytes
/// following the header.
pub fn decode(group: u8, pkt: &[u8]) -> Result<AddressedPacket> {
    if pkt.len() < HEADER_LEN {
        return Err(CodecError::TooShort { len: pkt.len() });
    }

    let want = group_parity(group);
    let got = pkt[0] & PARITY_MASK;
    if got != want {
        return Err(CodecError::GroupMismatch { got, want, group });
    }

    Ok(AddressedPacket {
        src: pkt[1] & NODE_MASK,
        dst: pkt[0] & NODE_MASK,
        ack_requested: pkt[1] & ACK_BIT != 0,
        payload: Bytes::copy_from_slice(&pkt[HEADER_LEN..]),
    })
}

/// Build the acknowledgement for a received packet
///
/// Returns `None` when the packet does not decode under `group` or does not
/// ask for an ack. The ack goes back to the original sender, carries no
/// payload and does not itself request an ack.
pub fn make_ack(group: u8, received: &[u8]) -> Option<Vec<u8>> {
    match decode(group, received) {
        Ok(pkt) if pkt.ack_requested => Some(encode(group, pkt.dst, pkt.src, false, &[])),
        _ => None,
    }
}
