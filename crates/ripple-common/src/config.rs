//! Configuration access for Ripple
//!
//! `Configuration` wraps a [`config::Config`] and exposes typed accessors with
//! defaults. Replicated map settings are resolved per map name:
//! `replicatedmap.<name>.<field>`, then `replicatedmap.default.<field>`, then
//! the built-in default.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::DEFAULT_MAP_CONFIG_NAME;
use crate::error::{Result, RippleError};

pub const MEMBER_ID: &str = "member.id";
pub const MEMBER_ADDRESS: &str = "member.address";
pub const MEMBER_LITE: &str = "member.lite";
pub const EVICTION_INTERVAL_MILLIS: &str = "replicatedmap.eviction_interval_millis";
pub const METRICS_PROMETHEUS_PORT: &str = "metrics.prometheus.port";
pub const LOG_DIR: &str = "logging.dir";
pub const LOG_LEVEL: &str = "logging.level";

pub const DEFAULT_EVICTION_INTERVAL_MILLIS: u64 = 1000;
pub const DEFAULT_REPLICATION_DELAY_MILLIS: u64 = 100;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_INBOUND_QUEUE_CAPACITY: usize = 10_000;
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 10_000;
pub const DEFAULT_TOMBSTONE_TTL_MILLIS: u64 = 300_000;

/// How a replicated map keeps values in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InMemoryFormat {
    /// Values are kept deserialized
    #[default]
    Object,
    /// Values are kept in serialized form
    Binary,
    /// Off-heap storage, not available for replicated maps
    Native,
}

impl InMemoryFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InMemoryFormat::Object => "OBJECT",
            InMemoryFormat::Binary => "BINARY",
            InMemoryFormat::Native => "NATIVE",
        }
    }
}

impl fmt::Display for InMemoryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InMemoryFormat {
    type Err = RippleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OBJECT" => Ok(InMemoryFormat::Object),
            "BINARY" => Ok(InMemoryFormat::Binary),
            "NATIVE" => Ok(InMemoryFormat::Native),
            _ => Err(RippleError::ConfigError(format!(
                "Invalid in-memory format: {}",
                s
            ))),
        }
    }
}

/// Settings of one replicated map, read when its record store is constructed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedMapConfig {
    pub name: String,
    pub in_memory_format: InMemoryFormat,
    pub statistics_enabled: bool,
    /// Delay before buffered local mutations are broadcast, 0 flushes immediately
    pub replication_delay_millis: u64,
    /// Buffered mutations that trigger an early flush
    pub max_batch_size: usize,
    /// Capacity of the inbound replication queue
    pub inbound_queue_capacity: usize,
    /// Entry events waiting for listeners; events beyond it are dropped
    pub event_queue_capacity: usize,
    /// How long a removed key keeps its vector clock
    pub tombstone_ttl_millis: u64,
}

impl ReplicatedMapConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            in_memory_format: InMemoryFormat::default(),
            statistics_enabled: true,
            replication_delay_millis: DEFAULT_REPLICATION_DELAY_MILLIS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            inbound_queue_capacity: DEFAULT_INBOUND_QUEUE_CAPACITY,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            tombstone_ttl_millis: DEFAULT_TOMBSTONE_TTL_MILLIS,
        }
    }

    pub fn with_in_memory_format(mut self, format: InMemoryFormat) -> Self {
        self.in_memory_format = format;
        self
    }

    pub fn with_statistics_enabled(mut self, enabled: bool) -> Self {
        self.statistics_enabled = enabled;
        self
    }

    pub fn with_replication_delay_millis(mut self, delay: u64) -> Self {
        self.replication_delay_millis = delay;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_tombstone_ttl_millis(mut self, ttl: u64) -> Self {
        self.tombstone_ttl_millis = ttl;
        self
    }
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Create a new configuration from a Config instance
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Load configuration from an optional file and `RIPPLE__`-prefixed
    /// environment variables (`RIPPLE__MEMBER__LITE=true`)
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("conf/ripple").required(false));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("RIPPLE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(Self { config })
    }

    /// Copy of this configuration with one value overridden
    pub fn with_override<T>(self, key: &str, value: T) -> Result<Self>
    where
        T: Into<config::Value>,
    {
        let config = Config::builder()
            .add_source(self.config)
            .set_override(key, value)?
            .build()?;
        Ok(Self { config })
    }

    // ===================== Member Configuration =====================

    /// Configured member identity, if any
    pub fn member_id(&self) -> Option<String> {
        self.config.get_string(MEMBER_ID).ok()
    }

    /// Advertised member address (default: local IP)
    pub fn member_address(&self) -> String {
        self.config
            .get_string(MEMBER_ADDRESS)
            .unwrap_or_else(|_| crate::local_ip())
    }

    /// Whether this member holds no data
    pub fn is_lite_member(&self) -> bool {
        self.config.get_bool(MEMBER_LITE).unwrap_or(false)
    }

    // ===================== Replicated Map Configuration =====================

    /// Interval of the expiration sweep in milliseconds (default: 1000ms)
    pub fn eviction_interval_millis(&self) -> u64 {
        self.config
            .get_int(EVICTION_INTERVAL_MILLIS)
            .map(|v| v.max(1) as u64)
            .unwrap_or(DEFAULT_EVICTION_INTERVAL_MILLIS)
    }

    /// Resolve the configuration of a replicated map by name
    pub fn replicated_map_config(&self, name: &str) -> Result<ReplicatedMapConfig> {
        let defaults = ReplicatedMapConfig::new(name);

        let in_memory_format = match self.map_setting::<String>(name, "in_memory_format") {
            Some(value) => value.parse()?,
            None => defaults.in_memory_format,
        };

        Ok(ReplicatedMapConfig {
            name: name.to_string(),
            in_memory_format,
            statistics_enabled: self
                .map_setting(name, "statistics_enabled")
                .unwrap_or(defaults.statistics_enabled),
            replication_delay_millis: self
                .map_setting(name, "replication_delay_millis")
                .unwrap_or(defaults.replication_delay_millis),
            max_batch_size: self
                .map_setting::<usize>(name, "max_batch_size")
                .map(|v| v.max(1))
                .unwrap_or(defaults.max_batch_size),
            inbound_queue_capacity: self
                .map_setting::<usize>(name, "inbound_queue_capacity")
                .map(|v| v.max(1))
                .unwrap_or(defaults.inbound_queue_capacity),
            event_queue_capacity: self
                .map_setting::<usize>(name, "event_queue_capacity")
                .map(|v| v.max(1))
                .unwrap_or(defaults.event_queue_capacity),
            tombstone_ttl_millis: self
                .map_setting(name, "tombstone_ttl_millis")
                .unwrap_or(defaults.tombstone_ttl_millis),
        })
    }

    fn map_setting<T: DeserializeOwned>(&self, name: &str, field: &str) -> Option<T> {
        self.config
            .get::<T>(&format!("replicatedmap.{}.{}", name, field))
            .or_else(|_| {
                self.config.get::<T>(&format!(
                    "replicatedmap.{}.{}",
                    DEFAULT_MAP_CONFIG_NAME, field
                ))
            })
            .ok()
    }

    // ===================== Observability Configuration =====================

    /// Port of the Prometheus scrape endpoint, disabled when unset
    pub fn metrics_prometheus_port(&self) -> Option<u16> {
        self.config
            .get_int(METRICS_PROMETHEUS_PORT)
            .ok()
            .and_then(|v| u16::try_from(v).ok())
    }

    /// Directory for rolling log files, stdout only when unset
    pub fn log_dir(&self) -> Option<String> {
        self.config.get_string(LOG_DIR).ok()
    }

    /// Default log filter (default: info)
    pub fn log_level(&self) -> String {
        self.config
            .get_string(LOG_LEVEL)
            .unwrap_or_else(|_| "info".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configuration(overrides: &[(&str, &str)]) -> Configuration {
        let mut builder = Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        Configuration::from_config(builder.build().unwrap())
    }

    #[test]
    fn test_in_memory_format_parse() {
        assert_eq!(
            "object".parse::<InMemoryFormat>().unwrap(),
            InMemoryFormat::Object
        );
        assert_eq!(
            "BINARY".parse::<InMemoryFormat>().unwrap(),
            InMemoryFormat::Binary
        );
        assert_eq!(
            "Native".parse::<InMemoryFormat>().unwrap(),
            InMemoryFormat::Native
        );
        assert!("offheap".parse::<InMemoryFormat>().is_err());
        assert_eq!(InMemoryFormat::default(), InMemoryFormat::Object);
    }

    #[test]
    fn test_member_defaults() {
        let config = Configuration::default();
        assert!(config.member_id().is_none());
        assert!(!config.is_lite_member());
        assert!(!config.member_address().is_empty());
        assert_eq!(config.eviction_interval_millis(), 1000);
        assert_eq!(config.log_level(), "info");
        assert!(config.metrics_prometheus_port().is_none());
    }

    #[test]
    fn test_member_overrides() {
        let config = configuration(&[
            (MEMBER_ID, "member-1"),
            (MEMBER_LITE, "true"),
            (MEMBER_ADDRESS, "10.0.0.1:5701"),
        ]);
        assert_eq!(config.member_id().as_deref(), Some("member-1"));
        assert!(config.is_lite_member());
        assert_eq!(config.member_address(), "10.0.0.1:5701");
    }

    #[test]
    fn test_replicated_map_config_defaults() {
        let config = Configuration::default();
        let map = config.replicated_map_config("orders").unwrap();
        assert_eq!(map, ReplicatedMapConfig::new("orders"));
        assert_eq!(map.in_memory_format, InMemoryFormat::Object);
        assert!(map.statistics_enabled);
    }

    #[test]
    fn test_replicated_map_config_resolution_order() {
        let config = configuration(&[
            ("replicatedmap.default.in_memory_format", "binary"),
            ("replicatedmap.default.replication_delay_millis", "0"),
            ("replicatedmap.orders.statistics_enabled", "false"),
            ("replicatedmap.orders.in_memory_format", "object"),
        ]);

        let orders = config.replicated_map_config("orders").unwrap();
        assert_eq!(orders.in_memory_format, InMemoryFormat::Object);
        assert!(!orders.statistics_enabled);
        assert_eq!(orders.replication_delay_millis, 0);

        let other = config.replicated_map_config("other").unwrap();
        assert_eq!(other.in_memory_format, InMemoryFormat::Binary);
        assert!(other.statistics_enabled);
    }

    #[test]
    fn test_invalid_in_memory_format_is_config_error() {
        let config = configuration(&[("replicatedmap.orders.in_memory_format", "disk")]);
        let err = config.replicated_map_config("orders").unwrap_err();
        assert!(matches!(err, RippleError::ConfigError(_)));
    }

    #[test]
    fn test_prometheus_port_out_of_range_is_ignored() {
        let config = configuration(&[(METRICS_PROMETHEUS_PORT, "9100")]);
        assert_eq!(config.metrics_prometheus_port(), Some(9100));

        let config = configuration(&[(METRICS_PROMETHEUS_PORT, "70000")]);
        assert!(config.metrics_prometheus_port().is_none());

        let config = configuration(&[(METRICS_PROMETHEUS_PORT, "-1")]);
        assert!(config.metrics_prometheus_port().is_none());
    }

    #[test]
    fn test_event_queue_capacity_setting() {
        let config = configuration(&[("replicatedmap.default.event_queue_capacity", "0")]);
        assert_eq!(config.replicated_map_config("orders").unwrap().event_queue_capacity, 1);
        assert_eq!(
            ReplicatedMapConfig::new("orders").event_queue_capacity,
            DEFAULT_EVENT_QUEUE_CAPACITY
        );
    }

    #[test]
    fn test_with_override() {
        let config = Configuration::default()
            .with_override(MEMBER_LITE, true)
            .unwrap();
        assert!(config.is_lite_member());
    }
}
