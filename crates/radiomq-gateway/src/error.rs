//! Error types for gateway start-up

use radiomq_bus::BusError;
use radiomq_core::PayloadKind;
use radiomq_radio::RadioError;
use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Configuration =====
    /// Configuration text could not be parsed
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Configuration file could not be read
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is syntactically fine but unusable
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Radio type is not one of the supported chips
    #[error("unknown radio type '{0}', valid: fsk.rfm69, fsk.rfm69h, lora.sx1276")]
    UnknownRadioType(String),

    // ===== Hardware =====
    /// Named pin does not exist
    #[error("cannot open pin {0}")]
    PinNotFound(String),

    /// SPI device does not exist
    #[error("cannot open SPI{bus}.{cs}")]
    SpiNotFound {
        /// Bus number
        bus: u8,
        /// Chip select
        cs: u8,
    },

    /// Radio bring-up failed
    #[error("radio {prefix}: {source}")]
    Radio {
        /// Topic prefix of the radio
        prefix: String,
        /// Underlying error
        #[source]
        source: RadioError,
    },

    // ===== Routing =====
    /// No module is registered under the configured name
    #[error("module {name} not found, known modules: {known}")]
    UnknownModule {
        /// Configured name
        name: String,
        /// Comma separated list of registered names
        known: String,
    },

    /// Module would receive messages of a kind it cannot handle
    #[error("module {module} takes {expected} but {topic} carries {found}")]
    InputTypeMismatch {
        /// Module name
        module: String,
        /// Subscribed topic
        topic: String,
        /// Kind the module accepts
        expected: PayloadKind,
        /// Kind the topic carries
        found: PayloadKind,
    },

    /// Bus connect or subscribe failed
    #[error("bus: {0}")]
    Bus(#[from] BusError),

    /// Logging could not be installed
    #[error("cannot initialize logging: {0}")]
    Logging(String),
}

impl GatewayError {
    /// Wrap a radio error with the radio's prefix
    pub fn radio(prefix: &str, source: RadioError) -> Self {
        GatewayError::Radio {
            prefix: prefix.to_string(),
            source,
        }
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Parse(_) => "CONFIG_PARSE",
            GatewayError::Io(_) => "CONFIG_IO",
            GatewayError::InvalidConfig(_) => "INVALID_CONFIG",
            GatewayError::UnknownRadioType(_) => "UNKNOWN_RADIO_TYPE",
            GatewayError::PinNotFound(_) => "PIN_NOT_FOUND",
            GatewayError::SpiNotFound { .. } => "SPI_NOT_FOUND",
            GatewayError::Radio { source, .. } => source.error_code(),
            GatewayError::UnknownModule { .. } => "UNKNOWN_MODULE",
            GatewayError::InputTypeMismatch { .. } => "INPUT_TYPE_MISMATCH",
            GatewayError::Bus(e) => e.error_code(),
            GatewayError::Logging(_) => "LOGGING",
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
