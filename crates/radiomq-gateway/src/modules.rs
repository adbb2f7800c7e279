//! Protocol modules
//!
//! A module is a pure function from one inbound message to any number of
//! outbound payloads. It declares the payload kind it accepts so the router
//! can reject nonsensical wiring at start-up. The registry is an explicit
//! value built once and handed to the router.

use radiomq_core::{
    codec, jll, varint, Decoded, FormatRegistry, Message, MessagePayload, NodePacket, PacketKind,
    PayloadKind, RawTx,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::ModuleConfig;

/// Per-instance parameters a module runs with
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// Module name
    pub name: String,
    /// Topic the instance consumes
    pub sub: String,
    /// Topic the instance publishes on
    pub publish: String,
    /// JeeLabs group
    pub group: u8,
    /// Payload formats for rendering
    pub formats: Arc<FormatRegistry>,
}

impl ModuleContext {
    /// Context for a configured instance
    pub fn new(config: &ModuleConfig, formats: Arc<FormatRegistry>) -> Self {
        Self {
            name: config.name.clone(),
            sub: config.sub.clone(),
            publish: config.publish.clone(),
            group: config.group,
            formats,
        }
    }
}

/// Payload a module wants published
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Appended to the publish topic as `/<suffix>`
    pub suffix: Option<String>,
    /// What to publish
    pub payload: MessagePayload,
}

impl Outbound {
    /// Publish on the configured topic
    pub fn here(payload: MessagePayload) -> Self {
        Self {
            suffix: None,
            payload,
        }
    }

    /// Publish one level below the configured topic
    pub fn below(suffix: impl ToString, payload: MessagePayload) -> Self {
        Self {
            suffix: Some(suffix.to_string()),
            payload,
        }
    }
}

/// Module body
pub type RunFn = fn(&ModuleContext, &Message) -> Vec<Outbound>;

/// A registered module
#[derive(Clone, Copy)]
pub struct ModuleSpec {
    /// Name used in the configuration
    pub name: &'static str,
    /// Payload kind the module accepts
    pub input: PayloadKind,
    /// Module body
    pub run: RunFn,
}

impl std::fmt::Debug for ModuleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSpec")
            .field("name", &self.name)
            .field("input", &self.input)
            .finish()
    }
}

/// Modules available for configuration
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<&'static str, ModuleSpec>,
}

impl ModuleRegistry {
    /// Registry without modules
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in module
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ModuleSpec {
            name: "jl-ack",
            input: PayloadKind::RawRx,
            run: jl_ack,
        });
        registry.register(ModuleSpec {
            name: "jl-decode",
            input: PayloadKind::RawRx,
            run: jl_decode,
        });
        registry.register(ModuleSpec {
            name: "jll-ack",
            input: PayloadKind::RawRx,
            run: jll_ack,
        });
        registry.register(ModuleSpec {
            name: "jll-decode",
            input: PayloadKind::RawRx,
            run: jll_decode,
        });
        registry.register(ModuleSpec {
            name: "jll-encode",
            input: PayloadKind::NodeTx,
            run: jll_encode,
        });
        registry.register(ModuleSpec {
            name: "varint-decode",
            input: PayloadKind::NodeRx,
            run: varint_decode,
        });
        registry
    }

    /// Add or replace a module
    pub fn register(&mut self, spec: ModuleSpec) {
        self.modules.insert(spec.name, spec);
    }

    /// Look up a module by name
    pub fn get(&self, name: &str) -> Option<&ModuleSpec> {
        self.modules.get(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.keys().copied().collect()
    }
}

/// Acknowledge JeeLabs packets that ask for it
fn jl_ack(ctx: &ModuleContext, msg: &Message) -> Vec<Outbound> {
    let MessagePayload::RawRx(rx) = &msg.payload else {
        return Vec::new();
    };
    match codec::make_ack(ctx.group, &rx.packet) {
        Some(ack) => {
            debug!(module = %ctx.name, dst = ack[0] & 0x3f, "ACK reply");
            vec![Outbound::here(MessagePayload::RawTx(RawTx::new(ack)))]
        }
        None => Vec::new(),
    }
}

/// Strip the JeeLabs header and publish per source node
fn jl_decode(ctx: &ModuleContext, msg: &Message) -> Vec<Outbound> {
    let MessagePayload::RawRx(rx) = &msg.payload else {
        return Vec::new();
    };
    match codec::decode(ctx.group, &rx.packet) {
        Ok(pkt) => vec![Outbound::below(
            pkt.src,
            MessagePayload::NodeRx(NodePacket {
                node: pkt.src,
                payload_type: None,
                payload: pkt.payload,
                quality: rx.quality(),
                remote: None,
            }),
        )],
        Err(e) => {
            debug!(module = %ctx.name, error = %e, "cannot decode JL packet");
            Vec::new()
        }
    }
}

/// Acknowledge JLL data packets that ask for it, reporting reception quality
fn jll_ack(ctx: &ModuleContext, msg: &Message) -> Vec<Outbound> {
    let MessagePayload::RawRx(rx) = &msg.payload else {
        return Vec::new();
    };
    match jll::decode(&rx.packet) {
        Ok(pkt) if pkt.kind == PacketKind::DataAck => {
            debug!(module = %ctx.name, node = pkt.node, rssi = rx.rssi, fei = rx.fei, "ACK reply");
            let ack = jll::JllPacket::ack(pkt.node, rx.quality()).encode();
            vec![Outbound::here(MessagePayload::RawTx(RawTx::new(ack)))]
        }
        Ok(_) => Vec::new(),
        Err(e) => {
            debug!(module = %ctx.name, error = %e, "cannot decode JLL packet");
            Vec::new()
        }
    }
}

/// Publish JLL data packets per node
fn jll_decode(ctx: &ModuleContext, msg: &Message) -> Vec<Outbound> {
    let MessagePayload::RawRx(rx) = &msg.payload else {
        return Vec::new();
    };
    let pkt = match jll::decode(&rx.packet) {
        Ok(pkt) => pkt,
        Err(e) => {
            debug!(module = %ctx.name, error = %e, "cannot decode JLL packet");
            return Vec::new();
        }
    };
    debug!(
        module = %ctx.name,
        node = pkt.node,
        kind = pkt.kind.label(),
        len = pkt.payload.len(),
        rssi = rx.rssi,
        fei = rx.fei,
        text = %ctx.formats.render(pkt.payload_type, &pkt.payload),
        "JLL packet"
    );
    if !pkt.kind.is_data() {
        return Vec::new();
    }
    vec![Outbound::below(
        pkt.node,
        MessagePayload::NodeRx(NodePacket {
            node: pkt.node,
            payload_type: Some(pkt.payload_type),
            payload: pkt.payload,
            quality: rx.quality(),
            remote: pkt.remote,
        }),
    )]
}

/// Encode node payloads as JLL data packets for the radio
fn jll_encode(ctx: &ModuleContext, msg: &Message) -> Vec<Outbound> {
    let MessagePayload::NodeTx(tx) = &msg.payload else {
        return Vec::new();
    };
    debug!(module = %ctx.name, node = tx.node, payload_type = tx.payload_type, "TX");
    let pkt = jll::JllPacket::data(tx.node, tx.payload_type, tx.payload.clone()).encode();
    vec![Outbound::here(MessagePayload::RawTx(RawTx::new(pkt)))]
}

/// Decode varint payloads, publishing per payload type when there is one
fn varint_decode(ctx: &ModuleContext, msg: &Message) -> Vec<Outbound> {
    let MessagePayload::NodeRx(node) = &msg.payload else {
        return Vec::new();
    };
    let values = varint::decode(&node.payload);
    let (format, text) = match node.payload_type {
        Some(t) => (
            ctx.formats.name(t).map(str::to_string),
            ctx.formats.render_values(t, &values),
        ),
        None => (None, radiomq_core::format::render_numbers(&values)),
    };
    let decoded = MessagePayload::Decoded(Decoded {
        node: node.node,
        payload_type: node.payload_type,
        format,
        values,
        text,
    });
    match node.payload_type {
        Some(t) => vec![Outbound::below(t, decoded)],
        None => vec![Outbound::here(decoded)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiomq_core::{LinkQuality, NodeTx, RawPacket};

    fn ctx(name: &str, publish: &str) -> ModuleContext {
        ModuleContext::new(
            &ModuleConfig::new(name, "radio/rx", publish),
            Arc::new(FormatRegistry::default()),
        )
    }

    fn rx(bytes: &[u8], rssi: i32, fei: i32) -> Message {
        let pkt = RawPacket::new(bytes.to_vec()).with_quality(LinkQuality::new(rssi, fei));
        Message::new("radio/rx", MessagePayload::RawRx(pkt))
    }

    fn raw_tx(out: &Outbound) -> &[u8] {
        match &out.payload {
            MessagePayload::RawTx(tx) => &tx.packet,
            other => panic!("expected raw tx, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_builtin_names() {
        let registry = ModuleRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec!["jl-ack", "jl-decode", "jll-ack", "jll-decode", "jll-encode", "varint-decode"]
        );
        assert_eq!(registry.get("jll-encode").unwrap().input, PayloadKind::NodeTx);
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_jl_ack_replies_to_sender() {
        // group 6, node 2 -> node 1, ack requested
        let pkt = codec::encode(6, 2, 1, true, b"hi");
        let out = jl_ack(&ctx("jl-ack", "radio/tx"), &rx(&pkt, -60, 0));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].suffix, None);
        let ack = codec::decode(6, raw_tx(&out[0])).unwrap();
        assert_eq!((ack.src, ack.dst, ack.ack_requested), (1, 2, false));
        assert!(ack.payload.is_empty());
    }

    #[test]
    fn test_jl_ack_silent_without_request_or_group() {
        let m = ctx("jl-ack", "radio/tx");
        assert!(jl_ack(&m, &rx(&codec::encode(6, 2, 1, false, b"x"), 0, 0)).is_empty());
        // parity of another group
        assert!(jl_ack(&m, &rx(&codec::encode(5, 2, 1, true, b"x"), 0, 0)).is_empty());
        assert!(jl_ack(&m, &rx(&[0x81], 0, 0)).is_empty());
    }

    #[test]
    fn test_jl_decode_per_source() {
        let pkt = codec::encode(6, 9, 0, false, &[1, 2]);
        let out = jl_decode(&ctx("jl-decode", "jl"), &rx(&pkt, -72, 500));
        assert_eq!(out[0].suffix.as_deref(), Some("9"));
        let MessagePayload::NodeRx(node) = &out[0].payload else {
            panic!("expected node rx");
        };
        assert_eq!(node.node, 9);
        assert_eq!(&node.payload[..], &[1, 2]);
        assert_eq!(node.quality, LinkQuality::new(-72, 500));
    }

    #[test]
    fn test_jll_ack_carries_reception_quality() {
        let pkt = jll::encode(PacketKind::DataAck, true, 23, 5, &[7], 0, 0);
        let out = jll_ack(&ctx("jll-ack", "lora/tx"), &rx(&pkt, -163, -50000));
        assert_eq!(raw_tx(&out[0]), &[0xd7, 0x80, 1, 0x80]);

        let back = jll::decode(raw_tx(&out[0])).unwrap();
        assert_eq!(back.kind, PacketKind::Ack);
        assert_eq!(back.node, 23);
        assert!(!back.to_gateway);

        let no_ack = jll::encode(PacketKind::DataNoAck, true, 23, 5, &[7], 0, 0);
        assert!(jll_ack(&ctx("jll-ack", "lora/tx"), &rx(&no_ack, -80, 0)).is_empty());
    }

    #[test]
    fn test_jll_decode_data_only() {
        let data = jll::encode(PacketKind::DataNoAck, true, 4, 10, &[1, 2, 3], -90, 256);
        let out = jll_decode(&ctx("jll-decode", "jll"), &rx(&data, -85, 1000));
        assert_eq!(out[0].suffix.as_deref(), Some("4"));
        let MessagePayload::NodeRx(node) = &out[0].payload else {
            panic!("expected node rx");
        };
        assert_eq!(node.payload_type, Some(10));
        assert_eq!(&node.payload[..], &[1, 2, 3]);
        assert_eq!(node.remote, Some(LinkQuality::new(-90, 256)));

        let ack = jll::JllPacket::ack(4, LinkQuality::new(-70, 0)).encode();
        assert!(jll_decode(&ctx("jll-decode", "jll"), &rx(&ack, -85, 0)).is_empty());
    }

    #[test]
    fn test_jll_encode() {
        let msg = Message::new(
            "jll/tx",
            MessagePayload::NodeTx(NodeTx {
                node: 3,
                payload_type: 2,
                payload: vec![9u8].into(),
            }),
        );
        let out = jll_encode(&ctx("jll-encode", "lora/tx"), &msg);
        let back = jll::decode(raw_tx(&out[0])).unwrap();
        assert_eq!(back.kind, PacketKind::DataNoAck);
        assert_eq!((back.node, back.payload_type), (3, 2));
        assert_eq!(&back.payload[..], &[9]);
    }

    #[test]
    fn test_varint_decode_by_type() {
        let node = NodePacket {
            node: 4,
            payload_type: Some(33),
            payload: varint::encode(&[1, -2, 300]).into(),
            quality: LinkQuality::default(),
            remote: None,
        };
        let msg = Message::new("jll/4", MessagePayload::NodeRx(node));
        let out = varint_decode(&ctx("varint-decode", "values"), &msg);
        assert_eq!(out[0].suffix.as_deref(), Some("33"));
        let MessagePayload::Decoded(d) = &out[0].payload else {
            panic!("expected decoded");
        };
        assert_eq!(d.values, vec![1, -2, 300]);
        assert_eq!(d.text, "1, -2, 300");
        assert_eq!(d.format, None);
    }
}
