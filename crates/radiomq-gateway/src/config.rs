//! Gateway configuration
//!
//! Loaded from JSON. A minimal file:
//!
//! ```json
//! {
//!   "radio": [{
//!     "type": "fsk.rfm69", "prefix": "rfm69",
//!     "intr_pin": "XIO-P0", "freq": 868, "sync": "0x2d06", "rate": "49230"
//!   }],
//!   "module": [{ "name": "jl-ack", "sub": "rfm69/rx", "pub": "rfm69/tx" }]
//! }
//! ```

use radiomq_bus::BusConfig;
use radiomq_radio::engine::{DEFAULT_INTR_WAIT, EngineConfig};
use radiomq_radio::tuner;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// JeeLabs group modules use when none is configured
pub const DEFAULT_GROUP: u8 = 6;

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Log at debug level
    #[serde(default)]
    pub debug: bool,

    /// Message bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Radios to bring up, in order
    #[serde(default)]
    pub radio: Vec<RadioConfig>,

    /// Modules to hook up, in order
    #[serde(default)]
    pub module: Vec<ModuleConfig>,
}

/// Supported radio chips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioKind {
    /// SX1231 on an RFM69, PA0 only
    Rfm69,
    /// SX1231 on an RFM69H, PA1 and PA2
    Rfm69h,
    /// SX1276 on an RFM9x in LoRa mode
    Sx1276,
}

impl RadioKind {
    /// True for the FSK chips
    pub fn is_fsk(self) -> bool {
        matches!(self, RadioKind::Rfm69 | RadioKind::Rfm69h)
    }
}

impl FromStr for RadioKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fsk.rfm69" => Ok(RadioKind::Rfm69),
            "fsk.rfm69h" => Ok(RadioKind::Rfm69h),
            "lora.sx1276" => Ok(RadioKind::Sx1276),
            other => Err(GatewayError::UnknownRadioType(other.to_string())),
        }
    }
}

/// One radio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Chip type: `fsk.rfm69`, `fsk.rfm69h` or `lora.sx1276`
    #[serde(rename = "type")]
    pub kind: String,

    /// Topic prefix; the radio uses `<prefix>/rx` and `<prefix>/tx`
    pub prefix: String,

    /// SPI bus number
    #[serde(default)]
    pub spi_bus: u8,

    /// SPI chip select
    #[serde(default)]
    pub spi_cs: u8,

    /// Pin steering a chip-select multiplexer, if the bus is shared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cs_mux_pin: Option<String>,

    /// Mux pin level selecting this radio, 0 or 1
    #[serde(default)]
    pub cs_mux_value: u8,

    /// Interrupt pin (DIO0)
    pub intr_pin: String,

    /// Center frequency in Hz, kHz or MHz
    pub freq: u32,

    /// Sync word as an integer literal, e.g. `"0x2d06"`
    pub sync: String,

    /// FSK bit rate or LoRa profile name
    pub rate: String,

    /// Output power in dBm, chip default if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<u8>,

    /// Interrupt wait before an idle check
    #[serde(with = "radiomq_bus::config::humantime_serde", default = "default_intr_wait")]
    pub intr_wait: Duration,

    /// Receiver threshold tuning period
    #[serde(with = "radiomq_bus::config::humantime_serde", default = "default_tune_period")]
    pub tune_period: Duration,
}

fn default_intr_wait() -> Duration {
    DEFAULT_INTR_WAIT
}

fn default_tune_period() -> Duration {
    tuner::DEFAULT_PERIOD
}

impl RadioConfig {
    /// Radio with required fields set and everything else defaulted
    pub fn new(
        kind: impl Into<String>,
        prefix: impl Into<String>,
        intr_pin: impl Into<String>,
        freq: u32,
        sync: impl Into<String>,
        rate: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            prefix: prefix.into(),
            spi_bus: 0,
            spi_cs: 0,
            cs_mux_pin: None,
            cs_mux_value: 0,
            intr_pin: intr_pin.into(),
            freq,
            sync: sync.into(),
            rate: rate.into(),
            power: None,
            intr_wait: DEFAULT_INTR_WAIT,
            tune_period: tuner::DEFAULT_PERIOD,
        }
    }

    /// Place the radio on an SPI device
    pub fn with_spi(mut self, bus: u8, cs: u8) -> Self {
        self.spi_bus = bus;
        self.spi_cs = cs;
        self
    }

    /// Share the SPI device through a chip-select multiplexer
    pub fn with_mux(mut self, pin: impl Into<String>, value: u8) -> Self {
        self.cs_mux_pin = Some(pin.into());
        self.cs_mux_value = value;
        self
    }

    /// Set output power
    pub fn with_power(mut self, dbm: u8) -> Self {
        self.power = Some(dbm);
        self
    }

    /// Set the interrupt wait
    pub fn with_intr_wait(mut self, wait: Duration) -> Self {
        self.intr_wait = wait;
        self
    }

    /// Parsed chip type
    pub fn radio_kind(&self) -> Result<RadioKind> {
        self.kind.parse()
    }

    /// Sync word bytes, most significant first
    pub fn sync_bytes(&self) -> Result<Vec<u8>> {
        parse_sync(&self.sync)
    }

    /// FSK bit rate
    pub fn bit_rate(&self) -> Result<u32> {
        parse_int(&self.rate)
            .and_then(|r| u32::try_from(r).ok())
            .ok_or_else(|| {
                GatewayError::InvalidConfig(format!(
                    "{}: cannot parse data rate {}",
                    self.prefix, self.rate
                ))
            })
    }

    /// Engine settings for this radio
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(self.prefix.clone())
            .with_intr_wait(self.intr_wait)
            .with_tune_period(self.tune_period)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(GatewayError::InvalidConfig(msg));
        if self.prefix.is_empty() {
            return invalid("radio prefix must not be empty".into());
        }
        let kind = self.radio_kind()?;
        if self.cs_mux_pin.is_some() && self.cs_mux_value > 1 {
            return invalid(format!("{}: cs_mux_value must be 0 or 1", self.prefix));
        }
        let sync = self.sync_bytes()?;
        if kind.is_fsk() {
            if sync.len() > 8 {
                return invalid(format!("{}: FSK sync word is 1 to 8 bytes", self.prefix));
            }
            self.bit_rate()?;
        } else if sync.len() != 1 {
            return invalid(format!("{}: LoRa sync word is one byte", self.prefix));
        }
        Ok(())
    }
}

/// One module instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Registered module name
    pub name: String,

    /// Topic the module consumes
    pub sub: String,

    /// Topic (or topic prefix) the module publishes on
    #[serde(rename = "pub")]
    pub publish: String,

    /// JeeLabs group id
    #[serde(default = "default_group")]
    pub group: u8,
}

fn default_group() -> u8 {
    DEFAULT_GROUP
}

impl ModuleConfig {
    /// Module in the default group
    pub fn new(name: impl Into<String>, sub: impl Into<String>, publish: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub: sub.into(),
            publish: publish.into(),
            group: DEFAULT_GROUP,
        }
    }

    /// Set the JeeLabs group
    pub fn with_group(mut self, group: u8) -> Self {
        self.group = group;
        self
    }
}

impl GatewayConfig {
    /// Parse JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check everything that can be checked without hardware
    pub fn validate(&self) -> Result<()> {
        if self.radio.is_empty() {
            return Err(GatewayError::InvalidConfig(
                "at least one radio must be specified".into(),
            ));
        }
        let mut prefixes = HashSet::new();
        for radio in &self.radio {
            radio.validate()?;
            if !prefixes.insert(radio.prefix.as_str()) {
                return Err(GatewayError::InvalidConfig(format!(
                    "duplicate radio prefix {}",
                    radio.prefix
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`GatewayConfig`]
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Create a builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable debug logging
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Set bus settings
    pub fn bus(mut self, bus: BusConfig) -> Self {
        self.config.bus = bus;
        self
    }

    /// Add a radio
    pub fn radio(mut self, radio: RadioConfig) -> Self {
        self.config.radio.push(radio);
        self
    }

    /// Add a module
    pub fn module(mut self, module: ModuleConfig) -> Self {
        self.config.module.push(module);
        self
    }

    /// Build the configuration
    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

/// Integer literal with an optional `0x`, `0o`, `0b` or leading-zero octal prefix
fn parse_int(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (bin, 2)
    } else if let Some(oct) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (oct, 8)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    u64::from_str_radix(&digits.replace('_', ""), radix).ok()
}

/// Parse a sync word literal into big-endian bytes without leading zeros
pub fn parse_sync(s: &str) -> Result<Vec<u8>> {
    let value = parse_int(s)
        .ok_or_else(|| GatewayError::InvalidConfig(format!("cannot parse sync bytes {s}")))?;
    if value == 0 {
        return Err(GatewayError::InvalidConfig(format!(
            "sync word {s} has no bytes"
        )));
    }
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    Ok(bytes[first..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "debug": true,
        "bus": { "dedup_max_age": "5m" },
        "radio": [
            { "type": "fsk.rfm69h", "prefix": "rfm69", "spi_bus": 0, "spi_cs": 0,
              "cs_mux_pin": "CSID0", "cs_mux_value": 0, "intr_pin": "XIO-P0",
              "freq": 868, "sync": "0x2d06", "rate": "49230", "power": 17 },
            { "type": "lora.sx1276", "prefix": "lora", "cs_mux_pin": "CSID0",
              "cs_mux_value": 1, "intr_pin": "XIO-P1", "freq": 915000,
              "sync": "0x12", "rate": "bw125cr45sf128", "intr_wait": "500ms" }
        ],
        "module": [
            { "name": "jl-ack", "sub": "rfm69/rx", "pub": "rfm69/tx" },
            { "name": "jl-decode", "sub": "rfm69/rx", "pub": "jl", "group": 212 }
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = GatewayConfig::from_json_str(SAMPLE).unwrap();
        assert!(config.debug);
        assert_eq!(config.bus.dedup_max_age, Duration::from_secs(300));
        assert_eq!(config.bus.gc_interval, Duration::from_secs(60));

        let fsk = &config.radio[0];
        assert_eq!(fsk.radio_kind().unwrap(), RadioKind::Rfm69h);
        assert_eq!(fsk.sync_bytes().unwrap(), vec![0x2d, 0x06]);
        assert_eq!(fsk.bit_rate().unwrap(), 49230);
        assert_eq!(fsk.power, Some(17));
        assert_eq!(fsk.intr_wait, Duration::from_secs(1));

        let lora = &config.radio[1];
        assert_eq!(lora.radio_kind().unwrap(), RadioKind::Sx1276);
        assert_eq!(lora.cs_mux_value, 1);
        assert_eq!(lora.intr_wait, Duration::from_millis(500));
        assert_eq!(lora.engine_config().intr_wait, Duration::from_millis(500));

        assert_eq!(config.module[0].group, DEFAULT_GROUP);
        assert_eq!(config.module[0].publish, "rfm69/tx");
        assert_eq!(config.module[1].group, 212);
        config.validate().unwrap();
    }

    #[test]
    fn test_radio_durations_use_humantime() {
        let radio = r#"{ "type": "fsk.rfm69", "prefix": "rfm69", "intr_pin": "P0",
            "freq": 868, "sync": "0x2d06", "rate": "49230", "tune_period": "1m 30s" }"#;
        let config: RadioConfig = serde_json::from_str(radio).unwrap();
        assert_eq!(config.tune_period, Duration::from_secs(90));
        assert!(serde_json::to_string(&config).unwrap().contains(r#""tune_period":"1m 30s""#));

        let bad = radio.replace(r#""tune_period": "1m 30s""#, r#""intr_wait": "soon""#);
        assert!(GatewayConfig::from_json_str(&format!(r#"{{"radio":[{bad}]}}"#)).is_err());
    }

    #[test]
    fn test_parse_sync_literals() {
        assert_eq!(parse_sync("0x2d06").unwrap(), vec![0x2d, 0x06]);
        assert_eq!(parse_sync("0x12").unwrap(), vec![0x12]);
        assert_eq!(parse_sync("11526").unwrap(), vec![0x2d, 0x06]);
        assert_eq!(parse_sync("0b1010").unwrap(), vec![0x0a]);
        assert_eq!(parse_sync("017").unwrap(), vec![0x0f]);
        assert_eq!(parse_sync("0xaabbccddeeff0011").unwrap().len(), 8);
        assert!(parse_sync("0").is_err());
        assert!(parse_sync("sync").is_err());
    }

    #[test]
    fn test_validate_rejects() {
        let ok = RadioConfig::new("fsk.rfm69", "rfm69", "P0", 868, "0x2d06", "49230");

        assert!(GatewayConfig::default().validate().is_err());

        let config = GatewayConfigBuilder::new().radio(ok.clone().with_mux("CS", 2)).build();
        assert!(matches!(config.validate(), Err(GatewayError::InvalidConfig(_))));

        let mut bad_type = ok.clone();
        bad_type.kind = "fsk.cc1101".into();
        let config = GatewayConfigBuilder::new().radio(bad_type).build();
        assert!(matches!(config.validate(), Err(GatewayError::UnknownRadioType(_))));

        let lora = RadioConfig::new("lora.sx1276", "lora", "P1", 915, "0x2d06", "bw125cr45sf128");
        let config = GatewayConfigBuilder::new().radio(lora).build();
        assert!(config.validate().is_err());

        let config = GatewayConfigBuilder::new().radio(ok.clone()).radio(ok).build();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_bad_rate() {
        let radio = RadioConfig::new("fsk.rfm69", "rfm69", "P0", 868, "0x2d06", "fast");
        assert_eq!(radio.bit_rate().unwrap_err().error_code(), "INVALID_CONFIG");
    }
}
