//! Log output
//!
//! `RUST_LOG` takes precedence; otherwise the gateway logs at `info`, or at
//! `debug` for its own crates when debug is enabled.

use tracing_subscriber::EnvFilter;

use crate::error::{GatewayError, Result};

const DEBUG_FILTER: &str = "info,radiomq_core=debug,radiomq_radio=debug,radiomq_bus=debug,radiomq_gateway=debug";

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(debug: bool) -> &'static str {
    if debug {
        DEBUG_FILTER
    } else {
        "info"
    }
}

/// Install the global fmt subscriber
///
/// Fails if a subscriber is already installed.
pub fn init(debug: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(debug)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .try_init()
        .map_err(|e| GatewayError::Logging(e.to_string()))
}
