//! Radio engine - one worker per radio
//!
//! The engine owns a [`Modem`] and drives it from three sources: interrupt
//! events from a blocking waiter thread, transmit requests from
//! [`RadioHandle`]s, and the threshold tuner's timer. Everything that
//! touches the chip runs on the engine's own OS thread, one event at a time,
//! under a single-threaded runtime private to that radio. Blocking bus
//! transfers and mode-ready polls stay on that thread.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──► Modem::init (blocking) ──► start_receiving ──► run loop
//!                                                              │
//!                       fatal error / all users gone  ◄────────┘
//!                                   │
//!        latch error, close TX sink, line to no-edge, drop RX sender
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use radiomq_core::RawPacket;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{RadioError, Result};
use crate::hal::{Edge, InterruptLine};
use crate::modem::{Interrupt, Modem, Outcome};
use crate::state::{Counters, RadioState, RadioStats};
use crate::tuner::{self, ThresholdStep, ThresholdTuner};

/// Received packets buffered before dropping
pub const DEFAULT_RX_QUEUE: usize = 4;
/// Transmit requests buffered before `Busy`
pub const DEFAULT_TX_QUEUE: usize = 4;
/// How long the waiter blocks before reporting an idle tick
pub const DEFAULT_INTR_WAIT: Duration = Duration::from_secs(1);
/// Backoff between transmit attempts while the radio is busy
pub const TX_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Radio name for logs, usually its topic prefix
    pub name: String,
    /// Receive queue capacity
    pub rx_queue: usize,
    /// Transmit queue capacity
    pub tx_queue: usize,
    /// Interrupt wait before an idle tick
    pub intr_wait: Duration,
    /// Threshold tuner period
    pub tune_period: Duration,
    /// Timeouts per second below which the threshold is lowered
    pub tune_lower: f64,
    /// Timeouts per second above which the threshold is raised
    pub tune_upper: f64,
}

impl EngineConfig {
    /// Default settings for a named radio
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the interrupt wait
    pub fn with_intr_wait(mut self, wait: Duration) -> Self {
        self.intr_wait = wait;
        self
    }

    /// Set the threshold tuner period
    pub fn with_tune_period(mut self, period: Duration) -> Self {
        self.tune_period = period;
        self
    }

    /// Set both queue capacities
    pub fn with_queues(mut self, rx: usize, tx: usize) -> Self {
        self.rx_queue = rx.max(1);
        self.tx_queue = tx.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "radio".to_string(),
            rx_queue: DEFAULT_RX_QUEUE,
            tx_queue: DEFAULT_TX_QUEUE,
            intr_wait: DEFAULT_INTR_WAIT,
            tune_period: tuner::DEFAULT_PERIOD,
            tune_lower: tuner::DEFAULT_LOWER_RATE,
            tune_upper: tuner::DEFAULT_UPPER_RATE,
        }
    }
}

/// What the waiter thread saw
#[derive(Debug)]
enum LineEvent {
    /// Rising edge, or high level after a wait without edge (`missed`)
    Interrupt { intr: Interrupt, missed: bool },
    /// Wait elapsed with the line low
    Idle,
}

struct Shared {
    name: String,
    chip: &'static str,
    max_payload: usize,
    counters: Counters,
    error: Mutex<Option<RadioError>>,
    state: Mutex<RadioState>,
}

/// Handle for transmitting on and observing a running radio
#[derive(Clone)]
pub struct RadioHandle {
    tx: mpsc::Sender<Bytes>,
    shared: Arc<Shared>,
}

impl RadioHandle {
    /// Radio name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Chip name
    pub fn chip(&self) -> &'static str {
        self.shared.chip
    }

    /// Largest payload sent without truncation
    pub fn max_payload(&self) -> usize {
        self.shared.max_payload
    }

    /// Queue a packet without waiting
    ///
    /// Returns [`RadioError::Busy`] when the queue is full and
    /// [`RadioError::Closed`] once the engine has stopped.
    pub fn try_transmit(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.tx.try_send(payload.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RadioError::Busy,
            mpsc::error::TrySendError::Closed(_) => self.closed(),
        })
    }

    /// Queue a packet, retrying every [`TX_RETRY_DELAY`] while busy
    pub async fn transmit(&self, payload: impl Into<Bytes>) -> Result<()> {
        let payload = payload.into();
        loop {
            match self.try_transmit(payload.clone()) {
                Err(RadioError::Busy) => tokio::time::sleep(TX_RETRY_DELAY).await,
                other => return other,
            }
        }
    }

    /// The fatal error that stopped the engine, if any
    pub fn error(&self) -> Option<RadioError> {
        self.shared.error.lock().clone()
    }

    /// True once the engine has stopped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Counter snapshot
    pub fn stats(&self) -> RadioStats {
        self.shared.counters.snapshot()
    }

    /// Mode after the last handled event
    pub fn state(&self) -> RadioState {
        *self.shared.state.lock()
    }

    fn closed(&self) -> RadioError {
        let cause = self
            .error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "engine stopped".to_string());
        RadioError::Closed { cause }
    }
}

impl std::fmt::Debug for RadioHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioHandle")
            .field("name", &self.shared.name)
            .field("chip", &self.shared.chip)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Worker driving one radio
pub struct RadioEngine<M> {
    modem: M,
    line: Arc<dyn InterruptLine>,
    shared: Arc<Shared>,
    tuner: ThresholdTuner,
    rx: mpsc::Sender<RawPacket>,
    tx: mpsc::Receiver<Bytes>,
    events: mpsc::Receiver<LineEvent>,
}

impl<M: Modem> RadioEngine<M> {
    /// Bring the radio up and start its worker
    ///
    /// Returns a handle and the receive sequence. The sequence ends when the
    /// engine stops; check [`RadioHandle::error`] for the reason.
    pub async fn start(
        modem: M,
        line: Arc<dyn InterruptLine>,
        config: EngineConfig,
    ) -> Result<(RadioHandle, mpsc::Receiver<RawPacket>)> {
        let init_line = Arc::clone(&line);
        let (modem, init) = tokio::task::spawn_blocking(move || {
            let mut modem = modem;
            let res = modem
                .init(init_line.as_ref())
                .and_then(|()| modem.start_receiving());
            (modem, res)
        })
        .await
        .map_err(|e| RadioError::Closed {
            cause: format!("radio init task failed: {e}"),
        })?;
        init?;

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            chip: modem.chip(),
            max_payload: modem.max_payload(),
            counters: Counters::default(),
            error: Mutex::new(None),
            state: Mutex::new(modem.state()),
        });

        let (rx_tx, rx_rx) = mpsc::channel(config.rx_queue.max(1));
        let (tx_tx, tx_rx) = mpsc::channel(config.tx_queue.max(1));
        let (ev_tx, ev_rx) = mpsc::channel(1);

        let waiter_line = Arc::clone(&line);
        let waiter_name = config.name.clone();
        let wait = config.intr_wait;
        std::thread::Builder::new()
            .name(format!("{}-intr", config.name))
            .spawn(move || wait_for_interrupts(waiter_line, ev_tx, wait, waiter_name))
            .map_err(RadioError::line)?;

        let engine = RadioEngine {
            modem,
            line,
            shared: Arc::clone(&shared),
            tuner: ThresholdTuner::with_band(config.tune_period, config.tune_lower, config.tune_upper),
            rx: rx_tx,
            tx: tx_rx,
            events: ev_rx,
        };
        std::thread::Builder::new()
            .name(format!("{}-radio", config.name))
            .spawn(move || engine.run_on_thread())
            .map_err(RadioError::line)?;

        Ok((RadioHandle { tx: tx_tx, shared }, rx_rx))
    }

    /// Worker thread body
    fn run_on_thread(self) {
        match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime.block_on(self.run()),
            Err(e) => self.shutdown(Err(RadioError::line(e))),
        }
    }

    async fn run(mut self) {
        info!(
            radio = %self.shared.name,
            chip = self.shared.chip,
            "radio engine started"
        );

        let tuning = self.modem.tunes_threshold();
        let mut tick = tokio::time::interval(self.tuner.period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;
        let mut tx_open = true;

        let result = loop {
            let step = tokio::select! {
                biased;

                event = self.events.recv() => match event {
                    Some(LineEvent::Interrupt { intr, missed }) => {
                        self.handle_interrupt(intr, missed).await
                    }
                    Some(LineEvent::Idle) => self.modem.on_idle(),
                    None => Err(RadioError::WaiterStopped),
                },

                request = self.tx.recv(), if tx_open => match request {
                    Some(payload) => self.handle_transmit(payload).await,
                    None => {
                        tx_open = false;
                        Ok(())
                    }
                },

                _ = tick.tick(), if tuning => self.tune(),
            };

            if let Err(e) = step {
                break Err(e);
            }
            *self.shared.state.lock() = self.modem.state();
            if !tx_open && self.rx.is_closed() {
                break Ok(());
            }
        };

        self.shutdown(result);
    }

    async fn handle_interrupt(&mut self, intr: Interrupt, missed: bool) -> Result<()> {
        let counters = &self.shared.counters;
        Counters::bump(&counters.interrupts);
        if missed {
            Counters::bump(&counters.missed_interrupts);
        }
        let outcome = self.modem.on_interrupt(intr).await?;
        self.record(outcome);
        Ok(())
    }

    async fn handle_transmit(&mut self, payload: Bytes) -> Result<()> {
        if self.modem.receiving()? {
            debug!(radio = %self.shared.name, "finishing reception before transmit");
            let outcome = self.modem.complete_reception(Interrupt::now()).await?;
            self.record(outcome);
        }
        if self.modem.send(&payload)? {
            Counters::bump(&self.shared.counters.packets_sent);
            debug!(
                radio = %self.shared.name,
                len = payload.len().min(self.shared.max_payload),
                "packet queued for transmit"
            );
        }
        Ok(())
    }

    fn record(&mut self, outcome: Outcome) {
        let counters = &self.shared.counters;
        match outcome {
            Outcome::Packet(packet) => {
                debug!(
                    radio = %self.shared.name,
                    len = packet.len(),
                    rssi = packet.rssi,
                    fei = packet.fei,
                    "packet received"
                );
                match self.rx.try_send(packet) {
                    Ok(()) => Counters::bump(&counters.packets_received),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        Counters::bump(&counters.dropped);
                        warn!(radio = %self.shared.name, "receive queue full, packet dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        Counters::bump(&counters.dropped);
                    }
                }
            }
            Outcome::CrcError => Counters::bump(&counters.crc_errors),
            Outcome::Timeout => {
                Counters::bump(&counters.rx_timeouts);
                self.tuner.record_timeout();
            }
            Outcome::Oversize(len) => {
                Counters::bump(&counters.oversize);
                warn!(radio = %self.shared.name, len, "oversize packet dropped");
            }
            Outcome::Spurious => {
                Counters::bump(&counters.spurious);
                debug!(radio = %self.shared.name, state = %self.modem.state(), "spurious interrupt");
            }
            Outcome::NotReceiving | Outcome::Sent { .. } => {}
        }
    }

    fn tune(&mut self) -> Result<()> {
        let Some((rate, step)) = self.tuner.evaluate(Instant::now()) else {
            return Ok(());
        };
        if let Some(dbm) = self.modem.adjust_threshold(step)? {
            if step == ThresholdStep::Hold {
                debug!(radio = %self.shared.name, rate, threshold = dbm, "rssi threshold unchanged");
            } else {
                info!(
                    radio = %self.shared.name,
                    rate,
                    threshold = dbm,
                    step = ?step,
                    "rssi threshold adjusted"
                );
            }
        }
        Ok(())
    }

    fn shutdown(mut self, result: Result<()>) {
        match result {
            Ok(()) => info!(radio = %self.shared.name, "radio engine stopped"),
            Err(e) => {
                error!(
                    radio = %self.shared.name,
                    chip = self.shared.chip,
                    code = e.error_code(),
                    error = %e,
                    "radio failed"
                );
                *self.shared.error.lock() = Some(e);
            }
        }
        *self.shared.state.lock() = self.modem.state();
        self.tx.close();
        self.events.close();
        if let Err(e) = self.line.set_edge(Edge::None) {
            warn!(radio = %self.shared.name, error = %e, "cannot disable interrupt line");
        }
        // dropping self closes the receive sequence and releases the bus
    }
}

/// Blocking loop turning edge waits into events
fn wait_for_interrupts(
    line: Arc<dyn InterruptLine>,
    events: mpsc::Sender<LineEvent>,
    wait: Duration,
    name: String,
) {
    // an edge that happened before we started waiting
    if line.read_level() {
        let event = LineEvent::Interrupt {
            intr: Interrupt::now(),
            missed: false,
        };
        if events.blocking_send(event).is_err() {
            return;
        }
    }
    loop {
        let event = if line.wait_for_edge(wait) {
            LineEvent::Interrupt {
                intr: Interrupt::now(),
                missed: false,
            }
        } else if line.read_level() {
            warn!(radio = %name, line = line.name(), "interrupt was missed");
            LineEvent::Interrupt {
                intr: Interrupt::now(),
                missed: true,
            }
        } else {
            LineEvent::Idle
        };
        if events.blocking_send(event).is_err() {
            debug!(radio = %name, "interrupt waiter exiting");
            return;
        }
    }
}
