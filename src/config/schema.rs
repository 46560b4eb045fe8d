//! Configuration schema definitions.
//!
//! Field names follow snake_case for TOML. The camelCase aliases accept the
//! JSON API-config layout used by existing affinity-aware clients.

use serde::{Deserialize, Serialize};

/// Root configuration for the connection pool.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Pool size and stream limits.
    #[serde(alias = "channelPool")]
    pub channel_pool: ChannelPoolConfig,

    /// Per-method affinity rules.
    #[serde(alias = "method")]
    pub methods: Vec<MethodConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelPoolConfig {
    /// Maximum number of connections in the pool.
    #[serde(alias = "maxSize")]
    pub max_size: u32,

    /// Open streams per connection above which the pool tries to grow.
    #[serde(alias = "maxConcurrentStreamsLowWatermark")]
    pub max_concurrent_streams_low_watermark: u32,
}

pub const DEFAULT_MAX_CONN: u32 = 10;
pub const DEFAULT_MAX_STREAM: u32 = 100;

impl Default for ChannelPoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_CONN,
            max_concurrent_streams_low_watermark: DEFAULT_MAX_STREAM,
        }
    }
}

/// Affinity rule for a set of methods.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MethodConfig {
    /// Fully-qualified method names, e.g. "/google.spanner.v1.Spanner/ExecuteSql".
    pub name: Vec<String>,

    /// Affinity behaviour of these methods.
    #[serde(default)]
    pub affinity: Option<AffinityConfig>,
}

/// What a method does with its affinity key.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AffinityCommand {
    /// The response carries a new key; bind it to the connection used.
    Bind,
    /// The request carries a key; route to its bound connection.
    Bound,
    /// The request carries a key; route to it, then release the binding.
    Unbind,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AffinityConfig {
    pub command: AffinityCommand,

    /// Dotted field path of the key inside the request or response message.
    #[serde(alias = "affinityKey")]
    pub affinity_key: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
