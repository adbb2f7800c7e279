//! The message bus
//!
//! Publishing does two things. Local hooks registered on the exact topic are
//! called right away, in registration order, so modules in this process see
//! the message without a broker round trip. Then the payload is encoded and
//! handed to the broker for everyone else. The broker echoes it back to our
//! own subscription; the dedup table recognizes the echo and drops it, so a
//! local subscriber sees each of our publishes exactly once while messages
//! from other clients are delivered at least once.
//!
//! Each topic has a single broker subscription, made with its first hook.
//! Inbound messages are checked against the dedup table once and then fanned
//! out to every hook on the topic.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use radiomq_core::{Message, MessagePayload};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::broker::{Broker, InboundCallback};
use crate::config::BusConfig;
use crate::dedup::{DedupKey, DedupTable, Recorded};
use crate::error::{BusError, Result};
use crate::wire;

/// Subscriber callback, called with its own copy of each message
pub type Handler = Arc<dyn Fn(Message) + Send + Sync>;

/// Bus counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Messages handed to the broker
    pub published: u64,
    /// Deliveries to local hooks
    pub local_deliveries: u64,
    /// Deliveries to hooks of messages that came from the broker
    pub external_deliveries: u64,
    /// Broker echoes of our own publishes that were dropped
    pub echoes_suppressed: u64,
    /// Failed encodes and broker publishes
    pub publish_errors: u64,
    /// Inbound messages that could not be decoded
    pub decode_errors: u64,
    /// Dedup entries removed by age
    pub dedup_expired: u64,
    /// Dedup entries evicted because the table was full
    pub dedup_evicted: u64,
}

struct Inner {
    broker: Arc<dyn Broker>,
    hooks: RwLock<HashMap<String, Vec<Handler>>>,
    // serializes subscribe so a topic gets exactly one broker subscription
    subscribing: tokio::sync::Mutex<()>,
    dedup: DedupTable,
    stats: Mutex<BusStats>,
    config: BusConfig,
}

/// Topic bus with short-circuit local delivery and echo suppression
///
/// Cheap to clone; clones share hooks, dedup table and counters.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

impl MessageBus {
    /// Connect to the broker and start the dedup sweeper
    pub async fn connect(broker: Arc<dyn Broker>, config: BusConfig) -> Result<Self> {
        broker.connect().await.map_err(|e| match e {
            BusError::ConnectFailed(_) => e,
            other => BusError::ConnectFailed(other.to_string()),
        })?;
        info!(broker = broker.name(), "bus connected");

        let inner = Arc::new(Inner {
            dedup: DedupTable::new(config.dedup_capacity, config.dedup_max_age),
            broker,
            hooks: RwLock::new(HashMap::new()),
            subscribing: tokio::sync::Mutex::new(()),
            stats: Mutex::new(BusStats::default()),
            config,
        });
        tokio::spawn(sweep(Arc::downgrade(&inner), inner.config.gc_interval));
        Ok(Self { inner })
    }

    /// Publish a payload on `topic`
    ///
    /// Broker failures are logged and counted; publishing never fails for
    /// the caller.
    pub async fn publish(&self, topic: &str, payload: MessagePayload) {
        let message = Message::new(topic, payload);

        let hooks = self.inner.hooks.read().get(topic).cloned().unwrap_or_default();
        for hook in &hooks {
            hook(message.clone());
        }
        if !hooks.is_empty() {
            self.inner.stats.lock().local_deliveries += hooks.len() as u64;
            trace!(topic, hooks = hooks.len(), "delivered locally");
        }
        tokio::task::yield_now().await;

        let bytes = match wire::encode(&message.payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(topic, code = e.error_code(), error = %e, "cannot encode payload");
                self.inner.stats.lock().publish_errors += 1;
                return;
            }
        };

        // record first: a broker may echo before publish returns
        let key = DedupKey::new(topic, &bytes);
        if self.inner.dedup.record(key) == Recorded::Evicted {
            self.inner.stats.lock().dedup_evicted += 1;
        }

        match self.inner.broker.publish(topic, bytes).await {
            Ok(()) => self.inner.stats.lock().published += 1,
            Err(e) => {
                self.inner.dedup.take(&key);
                warn!(topic, code = e.error_code(), error = %e, "broker publish failed");
                self.inner.stats.lock().publish_errors += 1;
            }
        }
    }

    /// Subscribe `handler` to `topic`
    ///
    /// The handler gets local publishes through a hook and other clients'
    /// messages through the topic's broker subscription, created on the
    /// first subscribe to the topic.
    pub async fn subscribe(&self, topic: &str, handler: Handler) -> Result<()> {
        let _guard = self.inner.subscribing.lock().await;

        if !self.inner.hooks.read().contains_key(topic) {
            let weak = Arc::downgrade(&self.inner);
            let callback: InboundCallback = Arc::new(move |topic: &str, bytes: Bytes| {
                if let Some(inner) = weak.upgrade() {
                    inner.inbound(topic, bytes);
                }
            });
            self.inner
                .broker
                .subscribe(topic, callback)
                .await
                .map_err(|e| match e {
                    BusError::SubscribeFailed { .. } => e,
                    other => BusError::SubscribeFailed {
                        topic: topic.to_string(),
                        reason: other.to_string(),
                    },
                })?;
            debug!(topic, broker = self.inner.broker.name(), "broker subscription added");
        }

        let mut hooks = self.inner.hooks.write();
        let topic_hooks = hooks.entry(topic.to_string()).or_default();
        topic_hooks.push(handler);
        debug!(topic, hooks = topic_hooks.len(), "subscribed");
        Ok(())
    }

    /// Counter snapshot
    pub fn stats(&self) -> BusStats {
        self.inner.stats.lock().clone()
    }

    /// Published messages still waiting for their echo
    pub fn pending_echoes(&self) -> usize {
        self.inner.dedup.len()
    }

    /// Number of local hooks on `topic`
    pub fn hook_count(&self, topic: &str) -> usize {
        self.inner.hooks.read().get(topic).map_or(0, Vec::len)
    }

    /// Settings the bus was started with
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("broker", &self.inner.broker.name())
            .field("topics", &self.inner.hooks.read().len())
            .field("pending_echoes", &self.inner.dedup.len())
            .finish()
    }
}

impl Inner {
    fn inbound(&self, topic: &str, bytes: Bytes) {
        let key = DedupKey::new(topic, &bytes);
        if self.dedup.take(&key) {
            trace!(topic, key = %key, "echo suppressed");
            self.stats.lock().echoes_suppressed += 1;
            return;
        }

        let payload = match wire::decode(&bytes) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, len = bytes.len(), error = %e, "cannot decode inbound payload");
                self.stats.lock().decode_errors += 1;
                return;
            }
        };

        let hooks = self.hooks.read().get(topic).cloned().unwrap_or_default();
        let message = Message::new(topic, payload);
        for hook in &hooks {
            hook(message.clone());
        }
        self.stats.lock().external_deliveries += hooks.len() as u64;
    }
}

/// Periodically drop dedup entries whose echo never came
///
/// Ends once the bus is gone.
async fn sweep(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let expired = inner.dedup.expire(Instant::now());
        if expired > 0 {
            debug!(expired, remaining = inner.dedup.len(), "dedup sweep");
            inner.stats.lock().dedup_expired += expired as u64;
        }
    }
}
