//! Configuration loading and validation.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::blocklist::remote::default_cache_dir;
use crate::blocklist::scheduler::MAX_REFRESH_INTERVAL;
use crate::blocklist::sources::BlocklistSource;
use crate::dns::resolver::DEFAULT_ENDPOINT;
use crate::error::{ConfigError, Result, ValidationError};

/// Smallest MTU every IPv4 host must accept.
pub const MIN_MTU: usize = 576;

/// Largest accepted `refresh_interval_hours`.
pub const MAX_REFRESH_INTERVAL_HOURS: u64 = MAX_REFRESH_INTERVAL.as_secs() / 3600;

/// Main configuration for the nxgate gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// DNS-over-HTTPS endpoint receiving forwarded queries.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// Timeout for a single upstream resolution.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Timeout for downloading a single filter list.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Interval between scheduled filter list refreshes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_hours: u64,

    /// Number of filter lists downloaded at the same time.
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    /// Upper bound on queries waiting for an upstream answer.
    #[serde(default = "default_max_inflight_queries")]
    pub max_inflight_queries: usize,

    /// Capacity of the outgoing packet and query event queues.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Number of query events kept in the in-memory history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Directory holding cached filter lists. Platform cache dir if unset.
    pub cache_dir: Option<PathBuf>,

    /// Domains that are never blocked, seeded into the allow store.
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Virtual interface settings.
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Filter list sources seeded into the source store.
    /// The built-in defaults are used when empty.
    #[serde(default)]
    pub blocklist_sources: Vec<BlocklistSourceConfig>,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Virtual interface settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelConfig {
    /// Already-open TUN descriptor handed over by the platform layer.
    pub fd: Option<i32>,

    /// Largest datagram read from the interface.
    #[serde(default = "default_mtu")]
    pub mtu: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            fd: None,
            mtu: default_mtu(),
        }
    }
}

/// A filter list source declared in the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlocklistSourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_source_enabled")]
    pub enabled: bool,
}

impl From<&BlocklistSourceConfig> for BlocklistSource {
    fn from(value: &BlocklistSourceConfig) -> Self {
        let mut source = BlocklistSource::new(&value.url, &value.name);
        source.enabled = value.enabled;
        source
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

fn default_upstream_url() -> String {
    DEFAULT_ENDPOINT.to_string()
}

const fn default_upstream_timeout() -> u64 {
    5
}

const fn default_fetch_timeout() -> u64 {
    30
}

const fn default_refresh_interval() -> u64 {
    24
}

const fn default_concurrent_downloads() -> usize {
    4
}

const fn default_max_inflight_queries() -> usize {
    256
}

const fn default_channel_capacity() -> usize {
    1024
}

const fn default_history_capacity() -> usize {
    10_000
}

const fn default_mtu() -> usize {
    1500
}

const fn default_source_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 9090))
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if !is_http_url(&self.upstream_url) {
            return Err(ValidationError::InvalidUpstreamUrl {
                url: self.upstream_url.clone(),
            });
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ValidationError::ZeroUpstreamTimeout);
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ValidationError::ZeroFetchTimeout);
        }
        if self.refresh_interval_hours == 0 {
            return Err(ValidationError::ZeroRefreshInterval);
        }
        if self.refresh_interval_hours > MAX_REFRESH_INTERVAL_HOURS {
            return Err(ValidationError::RefreshIntervalTooLarge {
                hours: self.refresh_interval_hours,
                max: MAX_REFRESH_INTERVAL_HOURS,
            });
        }
        if self.concurrent_downloads == 0 {
            return Err(ValidationError::ZeroConcurrentDownloads);
        }
        if self.max_inflight_queries == 0 {
            return Err(ValidationError::ZeroMaxInflight);
        }
        if self.channel_capacity == 0 {
            return Err(ValidationError::ZeroChannelCapacity);
        }
        if self.history_capacity == 0 {
            return Err(ValidationError::ZeroHistoryCapacity);
        }
        if self.tunnel.mtu < MIN_MTU {
            return Err(ValidationError::MtuTooSmall {
                mtu: self.tunnel.mtu,
                min: MIN_MTU,
            });
        }
        if self.allowlist.iter().any(|d| d.trim().is_empty()) {
            return Err(ValidationError::EmptyAllowlistEntry);
        }

        let mut seen = HashSet::new();
        for source in &self.blocklist_sources {
            if source.name.trim().is_empty() {
                return Err(ValidationError::EmptyBlocklistSourceName);
            }
            if !is_http_url(&source.url) {
                return Err(ValidationError::InvalidBlocklistSourceUrl {
                    name: source.name.clone(),
                    url: source.url.clone(),
                });
            }
            if !seen.insert(source.url.as_str()) {
                return Err(ValidationError::DuplicateBlocklistSourceUrl {
                    url: source.url.clone(),
                });
            }
        }

        Ok(())
    }

    /// Directory where downloaded filter lists are cached.
    #[must_use]
    pub fn blocklist_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    #[must_use]
    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_hours.saturating_mul(3600))
    }
}
