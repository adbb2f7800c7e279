//! Typed message envelopes carried on the bus
//!
//! Every message is a topic plus one strongly typed payload. The payload
//! variant is what modules declare as their input, and what the router
//! checks at start-up.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::packet::{LinkQuality, RawPacket};

/// A message on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Topic the message was published on
    #[serde(rename = "Topic")]
    pub topic: String,
    /// Typed payload
    #[serde(rename = "Payload")]
    pub payload: MessagePayload,
}

impl Message {
    /// Create a message
    pub fn new(topic: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Kind tag of the payload
    pub fn kind(&self) -> PayloadKind {
        self.payload.kind()
    }
}

/// Payload of a bus message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePayload {
    /// Packet received by a radio
    RawRx(RawPacket),
    /// Packet for a radio to transmit
    RawTx(RawTx),
    /// Link-decoded packet from a node
    NodeRx(NodePacket),
    /// Packet to encode and send to a node
    NodeTx(NodeTx),
    /// Application values decoded from a node packet
    Decoded(Decoded),
}

impl MessagePayload {
    /// Kind tag of this payload
    pub fn kind(&self) -> PayloadKind {
        match self {
            MessagePayload::RawRx(_) => PayloadKind::RawRx,
            MessagePayload::RawTx(_) => PayloadKind::RawTx,
            MessagePayload::NodeRx(_) => PayloadKind::NodeRx,
            MessagePayload::NodeTx(_) => PayloadKind::NodeTx,
            MessagePayload::Decoded(_) => PayloadKind::Decoded,
        }
    }
}

/// Tag naming a [`MessagePayload`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// [`MessagePayload::RawRx`]
    RawRx,
    /// [`MessagePayload::RawTx`]
    RawTx,
    /// [`MessagePayload::NodeRx`]
    NodeRx,
    /// [`MessagePayload::NodeTx`]
    NodeTx,
    /// [`MessagePayload::Decoded`]
    Decoded,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::RawRx => "raw-rx",
            PayloadKind::RawTx => "raw-tx",
            PayloadKind::NodeRx => "node-rx",
            PayloadKind::NodeTx => "node-tx",
            PayloadKind::Decoded => "decoded",
        };
        f.write_str(name)
    }
}

/// Packet bytes to hand to a radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTx {
    /// Packet, link-layer header included
    pub packet: Bytes,
}

impl RawTx {
    /// Wrap packet bytes
    pub fn new(packet: impl Into<Bytes>) -> Self {
        Self {
            packet: packet.into(),
        }
    }
}

/// Packet from a node after link-layer decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePacket {
    /// Sending node
    pub node: u8,
    /// Payload type, when the link format carries one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<u8>,
    /// Application payload
    pub payload: Bytes,
    /// Quality the gateway received the packet with
    pub quality: LinkQuality,
    /// Quality the node reported for the gateway's last packet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<LinkQuality>,
}

/// Application payload to send to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTx {
    /// Destination node
    pub node: u8,
    /// Payload type
    pub payload_type: u8,
    /// Application payload
    pub payload: Bytes,
}

/// Values decoded from a node payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoded {
    /// Sending node
    pub node: u8,
    /// Payload type, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_type: Option<u8>,
    /// Name of the payload format, if registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Decoded numbers
    pub values: Vec<i64>,
    /// Human-readable rendering
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let rx = MessagePayload::RawRx(RawPacket::new(vec![1u8]));
        assert_eq!(rx.kind(), PayloadKind::RawRx);
        let tx = MessagePayload::RawTx(RawTx::new(vec![2u8]));
        assert_eq!(tx.kind(), PayloadKind::RawTx);
        assert_eq!(Message::new("a/tx", tx).kind(), PayloadKind::RawTx);
    }

    #[test]
    fn test_envelope_field_names() {
        let msg = Message::new("rfm/tx", MessagePayload::RawTx(RawTx::new(vec![0x81u8, 2])));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.starts_with(r#"{"Topic":"rfm/tx","Payload":{"raw_tx""#));
    }

    #[test]
    fn test_packet_bytes_are_cbor_byte_strings() {
        let payload = MessagePayload::RawTx(RawTx::new(vec![0x81u8, 0x02]));
        let wire = serde_cbor::to_vec(&payload).unwrap();
        // major type 2 (byte string), length 2, then the raw bytes
        assert!(wire.windows(3).any(|w| w == [0x42, 0x81, 0x02]));
        let back: MessagePayload = serde_cbor::from_slice(&wire).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_display_kind() {
        assert_eq!(PayloadKind::NodeRx.to_string(), "node-rx");
    }
}
