//! Wiring modules to the bus
//!
//! Each configured module gets a bounded queue fed by a bus subscription and
//! a task that runs the module on every message and publishes what it
//! returns. A full queue drops the message with a warning rather than
//! stalling the publisher.

use radiomq_bus::{Handler, MessageBus};
use radiomq_core::{topic, FormatRegistry, Message};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ModuleConfig;
use crate::error::{GatewayError, Result};
use crate::modules::{ModuleContext, ModuleRegistry, ModuleSpec};

/// Hooks configured modules into a bus
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<ModuleRegistry>,
    bus: MessageBus,
    formats: Arc<FormatRegistry>,
    radios: Arc<[String]>,
}

impl Router {
    /// Router over `registry` publishing on `bus`
    pub fn new(registry: ModuleRegistry, bus: MessageBus) -> Self {
        Self {
            registry: Arc::new(registry),
            bus,
            formats: Arc::new(FormatRegistry::default()),
            radios: Arc::from(Vec::new()),
        }
    }

    /// Topic prefixes of the radios whose `/rx` and `/tx` topics are raw
    pub fn with_radios<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.radios = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the payload formats modules render with
    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = Arc::new(formats);
        self
    }

    /// Check a module configuration without subscribing
    pub fn resolve(&self, config: &ModuleConfig) -> Result<ModuleSpec> {
        let spec = *self
            .registry
            .get(&config.name)
            .ok_or_else(|| GatewayError::UnknownModule {
                name: config.name.clone(),
                known: self.registry.names().join(", "),
            })?;

        if let Some(found) = topic::raw_kind(&config.sub, &self.radios[..]) {
            if found != spec.input {
                return Err(GatewayError::InputTypeMismatch {
                    module: config.name.clone(),
                    topic: config.sub.clone(),
                    expected: spec.input,
                    found,
                });
            }
        }
        Ok(spec)
    }

    /// Instantiate a module: subscribe to its topic and start its task
    pub async fn hook(&self, config: &ModuleConfig) -> Result<JoinHandle<()>> {
        let spec = self.resolve(config)?;
        debug!(module = spec.name, sub = %config.sub, publish = %config.publish, "hooking module");

        let (queue, inbox) = mpsc::channel::<Message>(self.bus.config().hook_queue.max(1));
        let name = spec.name;
        let handler: Handler = Arc::new(move |msg: Message| {
            match queue.try_send(msg) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    warn!(module = name, topic = %msg.topic, "module queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(module = name, "module stopped, dropping message");
                }
            }
        });
        self.bus.subscribe(&config.sub, handler).await?;

        let ctx = ModuleContext::new(config, Arc::clone(&self.formats));
        let task = tokio::spawn(run_module(spec, ctx, inbox, self.bus.clone()));
        info!(module = spec.name, sub = %config.sub, publish = %config.publish, "module ready");
        Ok(task)
    }
}

async fn run_module(
    spec: ModuleSpec,
    ctx: ModuleContext,
    mut inbox: mpsc::Receiver<Message>,
    bus: MessageBus,
) {
    while let Some(msg) = inbox.recv().await {
        if msg.kind() != spec.input {
            warn!(
                module = spec.name,
                topic = %msg.topic,
                expected = %spec.input,
                found = %msg.kind(),
                "dropping message of wrong kind"
            );
            continue;
        }
        for out in (spec.run)(&ctx, &msg) {
            let topic = match &out.suffix {
                Some(suffix) => topic::child(&ctx.publish, suffix),
                None => ctx.publish.clone(),
            };
            bus.publish(&topic, out.payload).await;
        }
    }
    debug!(module = spec.name, "module stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiomq_bus::{BusConfig, LoopbackBroker};

    async fn router() -> Router {
        let bus = MessageBus::connect(Arc::new(LoopbackBroker::new()), BusConfig::default())
            .await
            .unwrap();
        Router::new(ModuleRegistry::builtin(), bus).with_radios(["rfm69", "lora"])
    }

    #[tokio::test]
    async fn test_unknown_module_lists_known() {
        let router = router().await;
        let err = router
            .hook(&ModuleConfig::new("jl-nack", "rfm69/rx", "rfm69/tx"))
            .await
            .unwrap_err();
        let GatewayError::UnknownModule { name, known } = err else {
            panic!("expected unknown module");
        };
        assert_eq!(name, "jl-nack");
        assert!(known.contains("jl-ack"));
        assert!(known.contains("varint-decode"));
    }

    #[tokio::test]
    async fn test_raw_topic_kind_checked() {
        let router = router().await;
        let err = router
            .hook(&ModuleConfig::new("jl-ack", "rfm69/tx", "rfm69/tx"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InputTypeMismatch { .. }));

        let err = router
            .resolve(&ModuleConfig::new("jll-encode", "lora/rx", "lora/tx"))
            .unwrap_err();
        assert_eq!(err.error_code(), "INPUT_TYPE_MISMATCH");

        // non-raw topics carry whatever their publisher chose
        router
            .resolve(&ModuleConfig::new("varint-decode", "jll/4", "values"))
            .unwrap();
    }

    #[tokio::test]
    async fn test_tx_topic_of_unknown_radio_not_raw() {
        let router = router().await;
        let spec = router
            .resolve(&ModuleConfig::new("jll-encode", "jll/tx", "lora/tx"))
            .unwrap();
        assert_eq!(spec.name, "jll-encode");
        router
            .hook(&ModuleConfig::new("jl-ack", "jl/rx", "rfm69/tx"))
            .await
            .unwrap()
            .abort();
    }
}
