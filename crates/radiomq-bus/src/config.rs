//! Bus configuration
//!
//! Durations are written in humantime form (`"10m"`, `"1min"`, `"30s"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default age after which an unmatched dedup entry is dropped
pub const DEFAULT_DEDUP_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Default interval between dedup sweeps
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Default hard bound on the number of dedup entries
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;

/// Default depth of each module's inbound queue
pub const DEFAULT_HOOK_QUEUE: usize = 10;

/// Message bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Published messages whose echo has not arrived by then are forgotten
    #[serde(with = "humantime_serde", default = "default_dedup_max_age")]
    pub dedup_max_age: Duration,

    /// How often the dedup table is swept
    #[serde(with = "humantime_serde", default = "default_gc_interval")]
    pub gc_interval: Duration,

    /// Maximum number of dedup entries, oldest evicted first
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Queue depth between a subscription and the module consuming it
    #[serde(default = "default_hook_queue")]
    pub hook_queue: usize,
}

fn default_dedup_max_age() -> Duration {
    DEFAULT_DEDUP_MAX_AGE
}

fn default_gc_interval() -> Duration {
    DEFAULT_GC_INTERVAL
}

fn default_dedup_capacity() -> usize {
    DEFAULT_DEDUP_CAPACITY
}

fn default_hook_queue() -> usize {
    DEFAULT_HOOK_QUEUE
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dedup_max_age: DEFAULT_DEDUP_MAX_AGE,
            gc_interval: DEFAULT_GC_INTERVAL,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            hook_queue: DEFAULT_HOOK_QUEUE,
        }
    }
}

impl BusConfig {
    /// Set the dedup age bound
    pub fn with_dedup_max_age(mut self, age: Duration) -> Self {
        self.dedup_max_age = age;
        self
    }

    /// Set the sweep interval
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Set the dedup capacity (at least 1)
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity.max(1);
        self
    }

    /// Set the module queue depth (at least 1)
    pub fn with_hook_queue(mut self, depth: usize) -> Self {
        self.hook_queue = depth.max(1);
        self
    }
}

/// Serde adapter for [`Duration`] fields written as humantime text
///
/// Use with `#[serde(with = "radiomq_bus::config::humantime_serde")]`.
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Write `duration` as e.g. `"1m 30s"`
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Parse humantime text such as `"500ms"` or `"10m"`
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BusConfig::default();
        assert_eq!(config.dedup_max_age, Duration::from_secs(600));
        assert_eq!(config.gc_interval, Duration::from_secs(60));
        assert_eq!(config.dedup_capacity, 10_000);
        assert_eq!(config.hook_queue, 10);
    }

    #[test]
    fn test_humantime_fields() {
        let config: BusConfig =
            serde_json::from_str(r#"{"dedup_max_age":"5m","gc_interval":"30s"}"#).unwrap();
        assert_eq!(config.dedup_max_age, Duration::from_secs(300));
        assert_eq!(config.gc_interval, Duration::from_secs(30));
        assert_eq!(config.dedup_capacity, DEFAULT_DEDUP_CAPACITY);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""dedup_max_age":"5m""#));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let err = serde_json::from_str::<BusConfig>(r#"{"gc_interval":"soon"}"#).unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn test_builder_clamps() {
        let config = BusConfig::default().with_dedup_capacity(0).with_hook_queue(0);
        assert_eq!(config.dedup_capacity, 1);
        assert_eq!(config.hook_queue, 1);
    }
}
