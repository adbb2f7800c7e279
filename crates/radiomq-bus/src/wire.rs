//! Wire encoding of bus payloads
//!
//! The payload enum travels as CBOR: field-name keyed maps, with packet
//! bytes as CBOR byte strings. The topic is carried by the broker, not in
//! the bytes.

use bytes::Bytes;
use radiomq_core::MessagePayload;

use crate::error::{BusError, Result};

/// Serialize a payload for the broker
pub fn encode(payload: &MessagePayload) -> Result<Bytes> {
    serde_cbor::to_vec(payload)
        .map(Bytes::from)
        .map_err(|e| BusError::Encode(e.to_string()))
}

/// Parse broker bytes back into a payload
pub fn decode(bytes: &[u8]) -> Result<MessagePayload> {
    Ok(serde_cbor::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiomq_core::{LinkQuality, RawPacket, RawTx};

    #[test]
    fn test_received_packet_keeps_metadata() {
        let pkt = RawPacket::new(vec![0x81u8, 0x02, 0x41])
            .with_quality(LinkQuality::new(-70, 2000))
            .with_snr(6);
        let payload = MessagePayload::RawRx(pkt);
        let back = decode(&encode(&payload).unwrap()).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_identical_payloads_identical_bytes() {
        let a = encode(&MessagePayload::RawTx(RawTx::new(vec![1u8, 2]))).unwrap();
        let b = encode(&MessagePayload::RawTx(RawTx::new(vec![1u8, 2]))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_garbage_rejected() {
        let err = decode(b"\xff\x00junk").unwrap_err();
        assert_eq!(err.error_code(), "DECODE");
    }
}
