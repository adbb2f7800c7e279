//! Gateway start-up
//!
//! Order matters: the bus comes first, then every radio, then the modules.
//! Any failure aborts start-up with the error of the step that failed, and
//! dropping the [`Gateway`] stops everything it started.

use radiomq_bus::{Broker, MessageBus};
use radiomq_radio::RadioHandle;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::hardware::{HardwareProvider, MuxTable};
use crate::modules::ModuleRegistry;
use crate::radio::start_radio;
use crate::router::Router;

/// A running gateway
#[derive(Debug)]
pub struct Gateway {
    bus: MessageBus,
    radios: Vec<RadioHandle>,
    forwarders: Vec<JoinHandle<()>>,
    modules: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Validate `config`, connect the bus, bring up radios, hook modules
    pub async fn start(
        config: GatewayConfig,
        hardware: &dyn HardwareProvider,
        broker: Arc<dyn Broker>,
        registry: ModuleRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let bus = MessageBus::connect(broker, config.bus.clone()).await?;

        info!(count = config.radio.len(), "configuring radios");
        let mut muxes = MuxTable::new();
        let mut radios = Vec::with_capacity(config.radio.len());
        let mut forwarders = Vec::new();
        for radio in &config.radio {
            match start_radio(radio, hardware, &mut muxes, &bus).await {
                Ok(link) => {
                    radios.push(link.handle);
                    forwarders.extend(link.tasks);
                }
                Err(e) => {
                    error!(prefix = %radio.prefix, code = e.error_code(), error = %e, "failed to configure radio");
                    abort_all(&forwarders);
                    return Err(e);
                }
            }
        }

        info!(count = config.module.len(), "configuring modules");
        let router = Router::new(registry, bus.clone())
            .with_radios(config.radio.iter().map(|radio| radio.prefix.clone()));
        let mut modules = Vec::with_capacity(config.module.len());
        for module in &config.module {
            match router.hook(module).await {
                Ok(task) => modules.push(task),
                Err(e) => {
                    error!(
                        module = %module.name,
                        sub = %module.sub,
                        publish = %module.publish,
                        error = %e,
                        "failed to install module"
                    );
                    abort_all(&forwarders);
                    abort_all(&modules);
                    return Err(e);
                }
            }
        }

        info!("gateway is ready");
        Ok(Self {
            bus,
            radios,
            forwarders,
            modules,
        })
    }

    /// The message bus
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// All radios, in configuration order
    pub fn radios(&self) -> &[RadioHandle] {
        &self.radios
    }

    /// Radio by topic prefix
    pub fn radio(&self, prefix: &str) -> Option<&RadioHandle> {
        self.radios.iter().find(|r| r.name() == prefix)
    }

    /// Number of module tasks still running
    pub fn running_modules(&self) -> usize {
        self.modules.iter().filter(|t| !t.is_finished()).count()
    }
}

// Forwarders hold radio handles and bus clones while the bus holds their
// hooks; aborting them breaks the cycle so the engines can stop.
impl Drop for Gateway {
    fn drop(&mut self) {
        abort_all(&self.forwarders);
        abort_all(&self.modules);
    }
}

fn abort_all(tasks: &[JoinHandle<()>]) {
    for task in tasks {
        task.abort();
    }
}
