//! Configuration loading and typed config structures for the dynpool agent.
//!
//! The canonical configuration lives in `dynpool-config.yaml`. Every section
//! and field has a default, so an empty file is a valid configuration.
//!
//! Environment variables override two values:
//! - `DYNPOOL_APP_NAME` overrides `application.name`
//! - `REDIS_URL` overrides `registry.url`

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::pool::{PoolError, QueueKind, WorkerPool, WorkerPoolOptions};
use crate::reporting::ReportingOptions;
use crate::service::PoolSet;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A pool section could not be turned into a live pool.
    #[error("invalid pool definition: {source}")]
    Pool {
        /// The pool's rejection.
        #[from]
        source: PoolError,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level agent configuration, mirroring `dynpool-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    /// Identity of the hosting application.
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Registry connection settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Reporting cadence and retention.
    #[serde(default)]
    pub reporting: ReportingConfig,

    /// Override listener settings.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Pools to create and put under control.
    #[serde(default)]
    pub pools: Vec<PoolSpec>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Load configuration from a YAML file at the given path, then apply
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DYNPOOL_APP_NAME") {
            self.application.name = Some(val);
        }
        if let Ok(val) = std::env::var("REDIS_URL") {
            self.registry.url = val;
        }
    }

    /// Application name, empty when not configured.
    pub fn app_name(&self) -> &str {
        self.application.name.as_deref().unwrap_or_default()
    }

    /// Create every configured pool, in file order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Pool`] for the first pool whose sizing is
    /// invalid. Pools created before it are shut down.
    pub fn build_pools(&self) -> Result<PoolSet, ConfigError> {
        let mut created: Vec<WorkerPool> = Vec::with_capacity(self.pools.len());
        for spec in &self.pools {
            match WorkerPool::new(&spec.name, spec.options()) {
                Ok(pool) => created.push(pool),
                Err(error) => {
                    for pool in &created {
                        pool.shutdown();
                    }
                    return Err(error.into());
                }
            }
        }
        Ok(created
            .into_iter()
            .map(|pool| (pool.name().to_owned(), pool))
            .collect())
    }
}

/// Identity of the hosting application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApplicationConfig {
    /// Name every snapshot and override is scoped by.
    #[serde(default)]
    pub name: Option<String>,
}

/// Registry (Redis) connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryConfig {
    /// Connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Password, when not part of the URL.
    #[serde(default)]
    pub password: Option<String>,

    /// Database index, when not part of the URL.
    #[serde(default)]
    pub database: Option<u8>,

    /// Number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Reconnect attempts before a connection gives up.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay between reconnect attempts in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u32,

    /// Ping idle connections periodically.
    #[serde(default = "default_true")]
    pub keep_alive: bool,

    /// Ping period in milliseconds.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

impl RegistryConfig {
    /// Connect timeout as a [`Duration`].
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Ping period as a [`Duration`].
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            password: None,
            database: None,
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
            keep_alive: true,
            ping_interval_ms: default_ping_interval_ms(),
        }
    }
}

/// Reporting cadence and record retention.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportingConfig {
    /// Seconds between reporting cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Start cycles on wall-clock multiples of the interval.
    #[serde(default = "default_true")]
    pub align_to_interval: bool,

    /// Days a per-pool record survives without being rewritten.
    #[serde(default = "default_record_ttl_days")]
    pub record_ttl_days: u64,
}

impl ReportingConfig {
    /// Scheduling options for the reporting job. A zero interval is
    /// raised to one second.
    pub fn options(&self) -> ReportingOptions {
        ReportingOptions {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            align_to_interval: self.align_to_interval,
        }
    }

    /// Retention of per-pool records.
    pub const fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_days.saturating_mul(86_400))
    }
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            align_to_interval: true,
            record_ttl_days: default_record_ttl_days(),
        }
    }
}

/// Override listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListenerConfig {
    /// Whether inbound overrides are accepted at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Publish fresh state right after applying an override.
    #[serde(default)]
    pub republish_on_apply: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            republish_on_apply: false,
        }
    }
}

/// One pool to create at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PoolSpec {
    /// Pool name, unique within the application.
    pub name: String,

    /// Initial core size.
    pub core_size: usize,

    /// Initial max size.
    pub max_size: usize,

    /// Queueing discipline.
    #[serde(default)]
    pub queue: QueueKind,

    /// Idle time in milliseconds before a surplus worker retires.
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
}

impl PoolSpec {
    /// Construction options for [`WorkerPool::new`].
    pub const fn options(&self) -> WorkerPoolOptions {
        WorkerPoolOptions::new(self.core_size, self.max_size)
            .with_queue(self.queue)
            .with_keep_alive(Duration::from_millis(self.keep_alive_ms))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_redis_url() -> String {
    "redis://localhost:6379".to_owned()
}

const fn default_pool_size() -> usize {
    4
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_retry_interval_ms() -> u32 {
    1_500
}

const fn default_ping_interval_ms() -> u64 {
    30_000
}

const fn default_interval_secs() -> u64 {
    20
}

const fn default_record_ttl_days() -> u64 {
    30
}

const fn default_keep_alive_ms() -> u64 {
    60_000
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}
