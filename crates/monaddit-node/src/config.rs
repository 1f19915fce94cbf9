//! Node configuration types

use anyhow::{bail, Context};
use monaddit_ledger::LedgerParams;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `MONADDIT__API__LISTEN_ADDR`
pub const ENV_PREFIX: &str = "MONADDIT";

/// Complete node configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity
    #[serde(default)]
    pub node: NodeSettings,

    /// HTTP command API
    #[serde(default)]
    pub api: ApiConfig,

    /// Protocol parameters
    #[serde(default)]
    pub ledger: LedgerParams,

    /// Epoch worker
    #[serde(default)]
    pub rewards: RewardsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl NodeConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let loaded: NodeConfig = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }

    /// Reject configurations the node cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        self.ledger.validate()?;
        self.api.socket_addr()?;
        let limit = &self.api.rate_limit;
        if limit.enabled && (limit.max_requests == 0 || limit.window_secs == 0) {
            bail!("api.rate_limit needs a positive max_requests and window_secs");
        }
        if self.rewards.poll_interval_secs == 0 {
            bail!("rewards.poll_interval_secs must be positive");
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => bail!("unknown logging.format {other:?} (expected \"text\" or \"json\")"),
        }
        Ok(())
    }
}

/// Basic node settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Name reported by `/health` and the startup banner
    #[serde(default = "default_node_name")]
    pub name: String,
}

fn default_node_name() -> String {
    "monaddit-ledger".to_string()
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: default_node_name(),
        }
    }
}

/// HTTP API configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS origins; `*` allows any
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Per-client request limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

impl ApiConfig {
    /// Parsed listen address
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen_addr
            .parse()
            .with_context(|| format!("invalid api.listen_addr {:?}", self.listen_addr))
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Fixed-window request limit per client IP
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

/// Background epoch worker
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Run the worker
    #[serde(default = "default_true")]
    pub worker_enabled: bool,

    /// Seconds between accrual attempts
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    3600
}

impl RewardsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve `/metrics`
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
