//! External broker collaborator
//!
//! The bus talks to the outside world through [`Broker`]. An MQTT client is
//! the usual implementation; [`LoopbackBroker`] delivers in-process, which is
//! enough for a single-host gateway and for tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::error::{BusError, Result};

/// Callback for messages arriving from the broker: (topic, wire bytes)
pub type InboundCallback = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Publish/subscribe transport
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Establish the connection
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Publish wire bytes on a topic
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to an exact topic
    async fn subscribe(&self, topic: &str, callback: InboundCallback) -> Result<()>;

    /// Broker name for logging
    fn name(&self) -> &str;
}

/// In-process broker with exact topic matching
///
/// Publishing delivers synchronously to every subscriber of the topic,
/// including the publisher's own subscriptions, like a real broker echoes.
/// Failures can be switched on for tests.
#[derive(Default)]
pub struct LoopbackBroker {
    subscribers: RwLock<HashMap<String, Vec<InboundCallback>>>,
    published: Mutex<Vec<(String, Bytes)>>,
    held: Mutex<Option<Vec<(String, Bytes)>>>,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
}

impl LoopbackBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Make connection attempts fail
    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make publishes fail
    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make subscriptions fail
    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Queue published messages instead of delivering them
    ///
    /// Models a broker whose echoes arrive after several publishes.
    pub fn hold_delivery(&self) {
        self.held.lock().get_or_insert_with(Vec::new);
    }

    /// Deliver everything queued since [`hold_delivery`](Self::hold_delivery)
    /// and go back to immediate delivery
    pub fn release(&self) {
        let held = self.held.lock().take().unwrap_or_default();
        for (topic, payload) in held {
            self.deliver(&topic, payload);
        }
    }

    /// Deliver bytes as if another client had published them
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        self.deliver(topic, payload.into());
    }

    /// Everything published through this broker, in order
    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().clone()
    }

    /// Number of subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.read().get(topic).map_or(0, Vec::len)
    }

    fn deliver(&self, topic: &str, payload: Bytes) {
        let callbacks = self.subscribers.read().get(topic).cloned().unwrap_or_default();
        trace!(topic, subscribers = callbacks.len(), "loopback deliver");
        for callback in callbacks {
            callback(topic, payload.clone());
        }
    }
}

impl std::fmt::Debug for LoopbackBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBroker")
            .field("topics", &self.subscribers.read().len())
            .field("published", &self.published.lock().len())
            .finish()
    }
}

#[async_trait]
impl Broker for LoopbackBroker {
    async fn connect(&self) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BusError::ConnectFailed("loopback: connection refused".into()));
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BusError::PublishFailed {
                topic: topic.to_string(),
                reason: "loopback: publish rejected".into(),
            });
        }
        self.published.lock().push((topic.to_string(), payload.clone()));
        if let Some(held) = self.held.lock().as_mut() {
            held.push((topic.to_string(), payload));
            return Ok(());
        }
        self.deliver(topic, payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, callback: InboundCallback) -> Result<()> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BusError::SubscribeFailed {
                topic: topic.to_string(),
                reason: "loopback: subscription rejected".into(),
            });
        }
        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(callback);
        Ok(())
    }

    fn name(&self) -> &str {
        "loopback"
    }
}
