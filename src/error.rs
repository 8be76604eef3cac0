//! Error types for the nxgate gateway.

use std::io;

use thiserror::Error;

use crate::blocklist::manager::ManagerError;
use crate::dns::codec::CodecError;
use crate::dns::resolver::ResolveError;

/// Main error type for nxgate operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("packet codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("resolver error: {0}")]
    Resolver(#[from] ResolveError),

    #[error("blocklist error: {0}")]
    Blocklist(#[from] ManagerError),

    #[error("tunnel error: {0}")]
    Tunnel(#[source] io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("upstream_url must start with http:// or https://: {url:?}")]
    InvalidUpstreamUrl { url: String },

    #[error("upstream_timeout_secs must be greater than 0")]
    ZeroUpstreamTimeout,

    #[error("fetch_timeout_secs must be greater than 0")]
    ZeroFetchTimeout,

    #[error("refresh_interval_hours must be greater than 0")]
    ZeroRefreshInterval,

    #[error("refresh_interval_hours must be at most {max}, got {hours}")]
    RefreshIntervalTooLarge { hours: u64, max: u64 },

    #[error("concurrent_downloads must be greater than 0")]
    ZeroConcurrentDownloads,

    #[error("max_inflight_queries must be greater than 0")]
    ZeroMaxInflight,

    #[error("channel_capacity must be greater than 0")]
    ZeroChannelCapacity,

    #[error("history_capacity must be greater than 0")]
    ZeroHistoryCapacity,

    #[error("tunnel.mtu must be at least {min}, got {mtu}")]
    MtuTooSmall { mtu: usize, min: usize },

    #[error("allowlist entry cannot be empty")]
    EmptyAllowlistEntry,

    #[error("blocklist source name cannot be empty")]
    EmptyBlocklistSourceName,

    #[error("duplicate blocklist source url: {url:?}")]
    DuplicateBlocklistSourceUrl { url: String },

    #[error(
        "blocklist source {name:?} has invalid URL (must start with http:// or https://): {url:?}"
    )]
    InvalidBlocklistSourceUrl { name: String, url: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
