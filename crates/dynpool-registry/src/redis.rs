//! Redis-backed [`Registry`].
//!
//! # Key Patterns
//!
//! | Key | Type | Description |
//! |-----|------|-------------|
//! | `THREAD_POOL_CONFIG_LIST_KEY` | List | JSON snapshot of every pool, in report order |
//! | `THREAD_POOL_CONFIG_PARAMETER_LIST_KEY_{app}_{pool}` | String (EX) | JSON snapshot of one pool |
//! | `DYNAMIC_THREAD_POOL_REDIS_TOPIC` | Pub/Sub channel | Inbound sizing overrides |

use std::time::Duration;

use dynpool_core::config::RegistryConfig;
use dynpool_core::registry::{Registry, RegistryError};
use dynpool_core::shutdown;
use dynpool_types::{PoolConfig, RegistryKey};
use fred::prelude::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::DbError;

/// Build a fred [`Builder`] from the connection settings.
pub(crate) fn client_builder(settings: &RegistryConfig) -> Result<Builder, DbError> {
    let mut config = Config::from_url(&settings.url)
        .map_err(|e| DbError::Config(format!("Invalid Redis URL: {e}")))?;
    if settings.password.is_some() {
        config.password.clone_from(&settings.password);
    }
    if settings.database.is_some() {
        config.database = settings.database;
    }

    let mut builder = Builder::from_config(config);
    builder
        .with_connection_config(|connection| {
            connection.connection_timeout = settings.connect_timeout();
        })
        .set_policy(ReconnectPolicy::new_constant(
            settings.retry_attempts,
            settings.retry_interval_ms,
        ));
    Ok(builder)
}

/// Connection pool to a Redis instance holding the pool registry.
#[derive(Clone)]
pub struct RedisRegistry {
    pool: Pool,
    record_ttl_secs: i64,
}

impl RedisRegistry {
    /// Connect using `settings`. Per-pool records expire `record_ttl` after
    /// their last write (minimum one second).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Redis`] if the connection fails.
    pub async fn connect(settings: &RegistryConfig, record_ttl: Duration) -> Result<Self, DbError> {
        let pool = client_builder(settings)?.build_pool(settings.pool_size.max(1))?;
        pool.init().await?;

        info!(pool_size = settings.pool_size.max(1), "Connected to Redis");
        Ok(Self {
            pool,
            record_ttl_secs: i64::try_from(record_ttl.as_secs())
                .unwrap_or(i64::MAX)
                .max(1),
        })
    }

    /// Replace the batch list with `snapshots`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or a write fails.
    pub async fn write_batch(&self, snapshots: &[PoolConfig]) -> Result<(), DbError> {
        let key = RegistryKey::ThreadPoolConfigList.as_str();
        let encoded = snapshots
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        let client = self.pool.next();
        let _: i64 = client.del(key).await?;
        // RPUSH with no values is a syntax error; the DEL already cleared it.
        if !encoded.is_empty() {
            let _: i64 = client.rpush(key, encoded).await?;
        }
        debug!(key, records = snapshots.len(), "batch written");
        Ok(())
    }

    /// Write one pool's record with the configured expiry.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the write fails.
    pub async fn write_record(&self, config: &PoolConfig) -> Result<(), DbError> {
        let key = config.parameter_key();
        let json = serde_json::to_string(config)?;
        let _: () = self
            .pool
            .next()
            .set(
                key.as_str(),
                json.as_str(),
                Some(Expiration::EX(self.record_ttl_secs)),
                None,
                false,
            )
            .await?;
        Ok(())
    }

    /// Read the batch list, oldest entry first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if deserialization or the read fails.
    pub async fn fetch_batch(&self) -> Result<Vec<PoolConfig>, DbError> {
        let values: Vec<String> = self
            .pool
            .next()
            .lrange(RegistryKey::ThreadPoolConfigList.as_str(), 0, -1)
            .await?;
        let mut configs = Vec::with_capacity(values.len());
        for v in &values {
            configs.push(serde_json::from_str(v)?);
        }
        Ok(configs)
    }

    /// Read one pool's record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if deserialization or the read fails.
    pub async fn fetch_record(
        &self,
        app_name: &str,
        pool_name: &str,
    ) -> Result<Option<PoolConfig>, DbError> {
        let key = RegistryKey::parameter_key(app_name, pool_name);
        let value: Option<String> = self.pool.next().get(key.as_str()).await?;
        Ok(value.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    /// Publish a sizing override on the override topic. Returns the number
    /// of subscribers that received it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the publish fails.
    pub async fn submit_override(&self, request: &PoolConfig) -> Result<i64, DbError> {
        let topic = RegistryKey::DynamicThreadPoolTopic.as_str();
        let json = serde_json::to_string(request)?;
        let receivers: i64 = self.pool.next().publish(topic, json.as_str()).await?;
        info!(
            topic,
            app_name = request.app_name,
            pool = request.pool_name,
            core_size = request.core_size,
            max_size = request.max_size,
            receivers,
            "override submitted"
        );
        Ok(receivers)
    }

    /// Ping every pooled connection each `every` until `shutdown` fires.
    pub fn start_keep_alive(
        &self,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let every = every.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; connections are fresh.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = shutdown::requested(&mut shutdown) => break,
                }
                for client in pool.clients() {
                    if let Err(error) = client.ping::<String>(None).await {
                        warn!(error = %error, "Redis keep-alive ping failed");
                    }
                }
            }
            debug!("Redis keep-alive stopped");
        })
    }

    /// Close every pooled connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the connections cannot be closed cleanly.
    pub async fn quit(&self) -> Result<(), DbError> {
        self.pool.quit().await?;
        info!("Disconnected from Redis");
        Ok(())
    }

    /// Return a reference to the underlying [`Pool`].
    pub const fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl Registry for RedisRegistry {
    async fn publish_batch(&self, snapshots: &[PoolConfig]) -> Result<(), RegistryError> {
        Ok(self.write_batch(snapshots).await?)
    }

    async fn publish_one(&self, config: &PoolConfig) -> Result<(), RegistryError> {
        Ok(self.write_record(config).await?)
    }

    async fn read_batch(&self) -> Result<Vec<PoolConfig>, RegistryError> {
        Ok(self.fetch_batch().await?)
    }

    async fn read_one(
        &self,
        app_name: &str,
        pool_name: &str,
    ) -> Result<Option<PoolConfig>, RegistryError> {
        Ok(self.fetch_record(app_name, pool_name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_bad_url() {
        let settings = RegistryConfig {
            url: "not a url".to_owned(),
            ..RegistryConfig::default()
        };
        assert!(matches!(client_builder(&settings), Err(DbError::Config(_))));
    }

    #[test]
    fn builder_accepts_default_settings() {
        assert!(client_builder(&RegistryConfig::default()).is_ok());
    }
}
