//! End-to-end gateway tests
//!
//! Simulated chips sit behind [`SimHardware`] and the bus runs on a
//! [`LoopbackBroker`], so packets travel the full path: interrupt, driver,
//! engine, bus, module, bus, engine, driver.

use parking_lot::Mutex;
use radiomq_bus::{wire, BusConfig, Handler, LoopbackBroker};
use radiomq_core::jll::{self, PacketKind};
use radiomq_core::{codec, varint, Message, MessagePayload, PayloadKind, RawTx};
use radiomq_gateway::test_utils::SimHardware;
use radiomq_gateway::{
    Gateway, GatewayConfig, GatewayConfigBuilder, GatewayError, ModuleConfig, ModuleRegistry,
    RadioConfig,
};
use radiomq_radio::test_utils::{Sx1231Sim, Sx1276Sim};
use radiomq_radio::Edge;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("radiomq_gateway=debug,radiomq_bus=debug")
        .with_test_writer()
        .try_init();
}

fn fsk_radio(prefix: &str, line: &str) -> RadioConfig {
    RadioConfig::new("fsk.rfm69", prefix, line, 868, "0x2d06", "49230")
        .with_intr_wait(Duration::from_millis(50))
}

fn lora_radio(prefix: &str, line: &str) -> RadioConfig {
    RadioConfig::new("lora.sx1276", prefix, line, 915, "0x12", "bw125cr45sf128")
        .with_intr_wait(Duration::from_millis(50))
}

async fn start(
    config: GatewayConfig,
    hardware: &SimHardware,
) -> radiomq_gateway::Result<(Gateway, Arc<LoopbackBroker>)> {
    init_tracing();
    let broker = Arc::new(LoopbackBroker::new());
    let gateway =
        Gateway::start(config, hardware, broker.clone(), ModuleRegistry::builtin()).await?;
    Ok((gateway, broker))
}

/// Collect everything published on `topic`
async fn collect(gateway: &Gateway, topic: &str) -> Arc<Mutex<Vec<Message>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: Handler = Arc::new(move |msg: Message| sink.lock().push(msg));
    gateway.bus().subscribe(topic, handler).await.unwrap();
    seen
}

/// Poll `cond` until it holds or two seconds pass
async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ============================================================================
// FSK
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fsk_packet_published_and_acked() {
    let sim = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0"))
        .module(ModuleConfig::new("jl-ack", "rfm69/rx", "rfm69/tx"))
        .module(ModuleConfig::new("jl-decode", "rfm69/rx", "jl"))
        .build();
    let (gateway, broker) = start(config, &hardware).await.unwrap();
    assert_eq!(gateway.radios().len(), 1);
    assert_eq!(gateway.radio("rfm69").map(|r| r.chip()), Some("sx1231"));

    let rx = collect(&gateway, "rfm69/rx").await;
    let nodes = collect(&gateway, "jl/5").await;

    // node 5 to node 1, ack requested
    let pkt = codec::encode(6, 5, 1, true, &[0x41, 0x42]);
    sim.inject_packet(&pkt, 0x80, 16);

    assert!(wait_until(|| rx.lock().len() == 1).await);
    {
        let MessagePayload::RawRx(raw) = &rx.lock()[0].payload else {
            panic!("expected raw rx");
        };
        assert_eq!(&raw.packet[..], &pkt[..]);
        assert_eq!(raw.rssi, -64);
    }

    assert!(wait_until(|| nodes.lock().len() == 1).await);
    {
        let MessagePayload::NodeRx(node) = &nodes.lock()[0].payload else {
            panic!("expected node rx");
        };
        assert_eq!(node.node, 5);
        assert_eq!(&node.payload[..], &[0x41, 0x42]);
    }

    assert!(wait_until(|| sim.sent().len() == 1).await);
    assert_eq!(sim.sent()[0], codec::encode(6, 1, 5, false, &[]));

    // the broker saw every publish but nothing was delivered twice
    assert!(broker.published().iter().any(|(t, _)| t == "rfm69/tx"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rx.lock().len(), 1);
    assert_eq!(sim.sent().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_packet_without_ack_request_not_answered() {
    let sim = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0"))
        .module(ModuleConfig::new("jl-ack", "rfm69/rx", "rfm69/tx"))
        .build();
    let (gateway, _broker) = start(config, &hardware).await.unwrap();
    let rx = collect(&gateway, "rfm69/rx").await;

    sim.inject_packet(&codec::encode(6, 5, 1, false, &[1]), 0x80, 0);
    assert!(wait_until(|| rx.lock().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sim.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_external_tx_transmitted() {
    let sim = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0"))
        .build();
    let (gateway, broker) = start(config, &hardware).await.unwrap();

    let bytes = wire::encode(&MessagePayload::RawTx(RawTx::new(vec![0x01, 0x02, 0x03]))).unwrap();
    broker.inject("rfm69/tx", bytes);

    assert!(wait_until(|| sim.sent().len() == 1).await);
    assert_eq!(sim.sent()[0], vec![0x01, 0x02, 0x03]);
    assert_eq!(gateway.bus().stats().external_deliveries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_raw_payload_on_tx_ignored() {
    let sim = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0"))
        .build();
    let (gateway, _broker) = start(config, &hardware).await.unwrap();

    let wrong = MessagePayload::NodeTx(radiomq_core::NodeTx {
        node: 1,
        payload_type: 2,
        payload: vec![3u8].into(),
    });
    gateway.bus().publish("rfm69/tx", wrong).await;
    gateway
        .bus()
        .publish("rfm69/tx", MessagePayload::RawTx(RawTx::new(vec![7u8])))
        .await;

    assert!(wait_until(|| sim.sent().len() == 1).await);
    assert_eq!(sim.sent(), vec![vec![7u8]]);
}

// ============================================================================
// LoRa
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lora_module_chain() {
    let sim = Sx1276Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 1, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(lora_radio("lora", "dio0").with_spi(0, 1))
        .module(ModuleConfig::new("jll-ack", "lora/rx", "lora/tx"))
        .module(ModuleConfig::new("jll-decode", "lora/rx", "jll"))
        .module(ModuleConfig::new("varint-decode", "jll/23", "values"))
        .build();
    let (gateway, _broker) = start(config, &hardware).await.unwrap();
    assert_eq!(gateway.radio("lora").map(|r| r.chip()), Some("sx1276"));
    assert_eq!(gateway.running_modules(), 3);

    // self test
    assert_eq!(sim.sent(), vec![vec![0u8]]);
    let values = collect(&gateway, "values/5").await;

    let payload = varint::encode(&[21, -4]);
    let pkt = jll::encode(PacketKind::DataAck, true, 23, 5, &payload, 0, 0);
    sim.inject_packet(&pkt, 20, 60, 0);

    assert!(wait_until(|| sim.sent().len() == 2).await);
    let ack = jll::decode(&sim.sent()[1]).unwrap();
    assert_eq!(ack.kind, PacketKind::Ack);
    assert_eq!(ack.node, 23);

    assert!(wait_until(|| values.lock().len() == 1).await);
    let MessagePayload::Decoded(decoded) = &values.lock()[0].payload else {
        panic!("expected decoded values");
    };
    assert_eq!(decoded.node, 23);
    assert_eq!(decoded.payload_type, Some(5));
    assert_eq!(decoded.values, vec![21, -4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_jll_encode_reaches_radio() {
    let sim = Sx1276Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(lora_radio("lora", "dio0"))
        .module(ModuleConfig::new("jll-encode", "jll/tx", "lora/tx"))
        .build();
    let (gateway, _broker) = start(config, &hardware).await.unwrap();

    let tx = MessagePayload::NodeTx(radiomq_core::NodeTx {
        node: 9,
        payload_type: 3,
        payload: vec![0xaa, 0xbb].into(),
    });
    gateway.bus().publish("jll/tx", tx).await;

    assert!(wait_until(|| sim.sent().len() == 2).await);
    let pkt = jll::decode(&sim.sent()[1]).unwrap();
    assert_eq!((pkt.node, pkt.payload_type), (9, 3));
    assert_eq!(&pkt.payload[..], &[0xaa, 0xbb]);
}

// ============================================================================
// Shared SPI device
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_muxed_radios_share_one_device() {
    let low = Sx1231Sim::new();
    let high = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_muxed(0, 0, "gpio-mux", low.clone(), high.clone());
    hardware.add_line("dio-a", low.line());
    hardware.add_line("dio-b", high.line());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("a", "dio-a").with_mux("gpio-mux", 0))
        .radio(fsk_radio("b", "dio-b").with_mux("gpio-mux", 1))
        .build();
    let (gateway, _broker) = start(config, &hardware).await.unwrap();
    assert_eq!(hardware.spi_opens(), 1);
    assert_eq!(gateway.radios().len(), 2);

    let rx_a = collect(&gateway, "a/rx").await;
    let rx_b = collect(&gateway, "b/rx").await;

    high.inject_packet(&[0x42], 0x80, 0);
    assert!(wait_until(|| rx_b.lock().len() == 1).await);
    assert!(rx_a.lock().is_empty());

    gateway
        .bus()
        .publish("a/tx", MessagePayload::RawTx(RawTx::new(vec![0x10u8, 0x20])))
        .await;
    assert!(wait_until(|| low.sent().len() == 1).await);
    assert_eq!(low.sent()[0], vec![0x10, 0x20]);
    assert!(high.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropping_gateway_stops_radios() {
    let sim = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0"))
        .module(ModuleConfig::new("jl-ack", "rfm69/rx", "rfm69/tx"))
        .build();
    let (gateway, broker) = start(config, &hardware).await.unwrap();
    let line = sim.line();
    assert_eq!(line.edge(), Edge::Rising);

    drop(gateway);
    assert!(wait_until(|| line.edge() == Edge::None).await);

    let bytes = wire::encode(&MessagePayload::RawTx(RawTx::new(vec![1u8]))).unwrap();
    broker.inject("rfm69/tx", bytes);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sim.sent().is_empty());
}

// ============================================================================
// Start-up failures
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_module_rejected() {
    let sim = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0"))
        .module(ModuleConfig::new("frobnicate", "rfm69/rx", "out"))
        .build();
    match start(config, &hardware).await {
        Err(GatewayError::UnknownModule { name, known }) => {
            assert_eq!(name, "frobnicate");
            assert!(known.contains("jl-ack"));
        }
        other => panic!("expected unknown module, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_module_input_type_checked() {
    let sim = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0"))
        .module(ModuleConfig::new("varint-decode", "rfm69/rx", "values"))
        .build();
    match start(config, &hardware).await {
        Err(GatewayError::InputTypeMismatch {
            expected, found, ..
        }) => {
            assert_eq!(expected, PayloadKind::NodeRx);
            assert_eq!(found, PayloadKind::RawRx);
        }
        other => panic!("expected type mismatch, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_hardware_rejected() {
    let sim = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0"))
        .build();
    let err = start(config, &hardware).await.unwrap_err();
    assert!(matches!(err, GatewayError::PinNotFound(ref pin) if pin == "dio0"));

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0").with_spi(1, 0))
        .build();
    let err = start(config, &SimHardware::new()).await.unwrap_err();
    assert!(matches!(err, GatewayError::SpiNotFound { bus: 1, cs: 0 }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unresponsive_radio_reports_prefix() {
    let sim = Sx1231Sim::new();
    sim.set_unresponsive(true);
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());

    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("attic", "dio0"))
        .build();
    match start(config, &hardware).await {
        Err(GatewayError::Radio { prefix, .. }) => assert_eq!(prefix, "attic"),
        other => panic!("expected radio error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_broker_connect_failure() {
    init_tracing();
    let broker = Arc::new(LoopbackBroker::new());
    broker.fail_connect(true);
    let config = GatewayConfigBuilder::new()
        .radio(fsk_radio("rfm69", "dio0"))
        .build();
    let err = Gateway::start(config, &SimHardware::new(), broker, ModuleRegistry::builtin())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Bus(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_config_rejected() {
    let err = start(GatewayConfigBuilder::new().build(), &SimHardware::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidConfig(_)));
}

// ============================================================================
// Configuration file
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_from_json() {
    let json = r#"{
        "debug": true,
        "bus": { "dedup_max_age": "2m", "hook_queue": 4 },
        "radio": [
            { "type": "fsk.rfm69h", "prefix": "rfm69", "intr_pin": "dio0",
              "freq": 868, "sync": "0x2d06", "rate": "49230", "power": 14,
              "intr_wait": "50ms" }
        ],
        "module": [
            { "name": "jl-ack", "sub": "rfm69/rx", "pub": "rfm69/tx" }
        ]
    }"#;
    let config = GatewayConfig::from_json_str(json).unwrap();
    let expected = BusConfig::default()
        .with_dedup_max_age(Duration::from_secs(120))
        .with_hook_queue(4);
    assert_eq!(config.bus, expected);
    assert_eq!(config.module[0].group, 6);

    let sim = Sx1231Sim::new();
    let hardware = SimHardware::new();
    hardware.add_spi(0, 0, sim.clone());
    hardware.add_line("dio0", sim.line());
    let (gateway, _broker) = start(config, &hardware).await.unwrap();
    assert_eq!(gateway.bus().config().hook_queue, 4);

    sim.inject_packet(&codec::encode(6, 7, 2, true, &[]), 0x80, 0);
    assert!(wait_until(|| sim.sent().len() == 1).await);
    assert_eq!(sim.sent()[0], codec::encode(6, 2, 7, false, &[]));
}
