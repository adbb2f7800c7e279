//! Radio gateways
//!
//! Brings up one radio and connects it to the bus: every received packet is
//! published on `<prefix>/rx`, and raw packets published on `<prefix>/tx`
//! (locally or by another client) are queued for transmission.

use bytes::Bytes;
use radiomq_bus::{Handler, MessageBus};
use radiomq_core::{topic, Message, MessagePayload, RawPacket};
use radiomq_radio::{
    EngineConfig, InterruptLine, Modem, RadioEngine, RadioError, RadioHandle, Sx1231,
    Sx1231Config, Sx1276, Sx1276Config,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{RadioConfig, RadioKind};
use crate::error::{GatewayError, Result};
use crate::hardware::{HardwareProvider, MuxTable};

/// A radio wired to the bus
#[derive(Debug)]
pub struct RadioLink {
    /// Engine handle
    pub handle: RadioHandle,
    /// The `<prefix>/rx` and `<prefix>/tx` forwarding tasks
    pub tasks: Vec<JoinHandle<()>>,
}

/// Bring up the radio described by `config` and gateway it to `bus`
///
/// The forwarding tasks keep the engine alive; abort them to release it.
pub async fn start_radio(
    config: &RadioConfig,
    hardware: &dyn HardwareProvider,
    muxes: &mut MuxTable,
    bus: &MessageBus,
) -> Result<RadioLink> {
    let prefix = config.prefix.as_str();
    debug!(prefix, ?config, "configuring radio");

    let kind = config.radio_kind()?;
    let sync = config.sync_bytes()?;
    let dev = muxes.open(config, hardware)?;
    let line = hardware.interrupt_line(&config.intr_pin)?;
    let engine = config.engine_config();

    let (handle, rx) = match kind {
        RadioKind::Rfm69 | RadioKind::Rfm69h => {
            info!(prefix, "initializing FSK sx1231 radio");
            let mut radio = Sx1231Config::new(config.freq, config.bit_rate()?, sync)
                .with_pa_boost(kind == RadioKind::Rfm69h);
            if let Some(dbm) = config.power {
                radio = radio.with_power(dbm);
            }
            let modem = Sx1231::new(dev, radio).map_err(|e| GatewayError::radio(prefix, e))?;
            start_engine(prefix, modem, line, engine).await?
        }
        RadioKind::Sx1276 => {
            info!(prefix, "initializing LoRa sx1276 radio");
            let [sync] = sync[..] else {
                return Err(GatewayError::InvalidConfig(format!(
                    "{prefix}: LoRa sync word is one byte"
                )));
            };
            let mut radio = Sx1276Config::new(config.freq, config.rate.clone(), sync);
            if let Some(dbm) = config.power {
                radio = radio.with_power(dbm);
            }
            let modem = Sx1276::new(dev, radio).map_err(|e| GatewayError::radio(prefix, e))?;
            start_engine(prefix, modem, line, engine).await?
        }
    };
    info!(prefix, chip = handle.chip(), "radio ready");

    let rx_task = tokio::spawn(forward_rx(handle.clone(), rx, bus.clone()));

    let (feed, queue) = mpsc::channel::<Bytes>(bus.config().hook_queue.max(1));
    let tx_prefix = config.prefix.clone();
    let handler: Handler = Arc::new(move |msg: Message| match msg.payload {
        MessagePayload::RawTx(tx) => {
            if feed.try_send(tx.packet).is_err() {
                warn!(prefix = %tx_prefix, "transmit queue full, dropping packet");
            }
        }
        other => {
            warn!(prefix = %tx_prefix, kind = %other.kind(), "ignoring non-raw message on tx topic");
        }
    });
    if let Err(e) = bus.subscribe(&topic::tx(prefix), handler).await {
        rx_task.abort();
        return Err(e.into());
    }
    let tx_task = tokio::spawn(forward_tx(handle.clone(), queue));

    Ok(RadioLink {
        handle,
        tasks: vec![rx_task, tx_task],
    })
}

async fn start_engine<M: Modem>(
    prefix: &str,
    modem: M,
    line: Arc<dyn InterruptLine>,
    engine: EngineConfig,
) -> Result<(RadioHandle, mpsc::Receiver<RawPacket>)> {
    RadioEngine::start(modem, line, engine)
        .await
        .map_err(|e| GatewayError::radio(prefix, e))
}

/// Radio -> bus
async fn forward_rx(handle: RadioHandle, mut rx: mpsc::Receiver<RawPacket>, bus: MessageBus) {
    let prefix = handle.name().to_string();
    let rx_topic = topic::rx(&prefix);
    while let Some(pkt) = rx.recv().await {
        info!(
            prefix = %prefix,
            snr = ?pkt.snr,
            rssi = pkt.rssi,
            fei = pkt.fei,
            len = pkt.len(),
            packet = %pkt.hex(),
            "RX"
        );
        bus.publish(&rx_topic, MessagePayload::RawRx(pkt)).await;
    }
    match handle.error() {
        Some(e) => error!(prefix = %prefix, code = e.error_code(), error = %e, "radio stopped"),
        None => info!(prefix = %prefix, "radio receive sequence ended"),
    }
}

/// Bus -> radio, retrying while the radio is busy
async fn forward_tx(handle: RadioHandle, mut queue: mpsc::Receiver<Bytes>) {
    while let Some(packet) = queue.recv().await {
        info!(prefix = %handle.name(), len = packet.len(), packet = %hex::encode(&packet), "TX");
        match handle.transmit(packet).await {
            Ok(()) => {}
            Err(e @ RadioError::Closed { .. }) => {
                error!(prefix = %handle.name(), error = %e, "TX failed, radio closed");
                break;
            }
            Err(e) => warn!(prefix = %handle.name(), error = %e, "TX failed"),
        }
    }
}
