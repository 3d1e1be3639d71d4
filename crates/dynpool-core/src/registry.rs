//! The [`Registry`] capability and an in-memory implementation.
//!
//! The registry is the only I/O boundary of the control loop. It stores
//! two independent representations of the reported state:
//!
//! - the latest batch of every pool snapshot, replaced whole on each write;
//! - one record per `(app_name, pool_name)` with a finite retention.
//!
//! The two are written separately and never transactionally, so a reader
//! may observe one updated before the other.
//!
//! [`InMemoryRegistry`] has the same semantics as the Redis implementation
//! in `dynpool-registry` and stores JSON, so it exercises the wire format.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dynpool_types::{PoolConfig, RegistryKey};

/// Default retention of per-pool records (30 days).
pub const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(2_592_000);

/// Errors surfaced by a [`Registry`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The store could not be reached or rejected the command.
    #[error("registry transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// A record could not be encoded or decoded.
    #[error("registry codec error: {source}")]
    Codec {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

/// Store that receives published snapshots and serves them back.
///
/// Implementations perform no local retry; transport failures are returned
/// to the caller as [`RegistryError::Transport`].
pub trait Registry: Send + Sync {
    /// Replace the stored batch with `snapshots`. An empty slice clears it.
    fn publish_batch(
        &self,
        snapshots: &[PoolConfig],
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;

    /// Write (or overwrite) the record for `(config.app_name, config.pool_name)`
    /// with the registry's retention. Idempotent.
    fn publish_one(
        &self,
        config: &PoolConfig,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;

    /// Read the stored batch, in publish order.
    fn read_batch(&self) -> impl Future<Output = Result<Vec<PoolConfig>, RegistryError>> + Send;

    /// Read one pool's record, if present and not expired.
    fn read_one(
        &self,
        app_name: &str,
        pool_name: &str,
    ) -> impl Future<Output = Result<Option<PoolConfig>, RegistryError>> + Send;
}

struct StoredRecord {
    json: String,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    batch: Vec<String>,
    records: HashMap<String, StoredRecord>,
    failing_pools: HashSet<String>,
    batch_failing: bool,
}

/// Process-local [`Registry`] with fault injection, for tests and
/// single-process setups.
pub struct InMemoryRegistry {
    record_ttl: Duration,
    state: Mutex<MemoryState>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RECORD_TTL)
    }
}

impl InMemoryRegistry {
    /// Create an empty registry whose records expire after `record_ttl`.
    pub fn new(record_ttl: Duration) -> Self {
        Self {
            record_ttl,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `publish_one` for `pool_name` fail with a transport error.
    pub fn fail_pool(&self, pool_name: &str) {
        self.lock().failing_pools.insert(pool_name.to_owned());
    }

    /// Make `publish_batch` fail (or succeed again).
    pub fn fail_batch(&self, failing: bool) {
        self.lock().batch_failing = failing;
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.failing_pools.clear();
        state.batch_failing = false;
    }

    /// Number of unexpired per-pool records.
    pub fn record_count(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .records
            .values()
            .filter(|r| r.expires_at > now)
            .count()
    }
}

impl Registry for InMemoryRegistry {
    async fn publish_batch(&self, snapshots: &[PoolConfig]) -> Result<(), RegistryError> {
        let encoded = snapshots
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.lock();
        if state.batch_failing {
            return Err(RegistryError::Transport {
                message: format!("injected failure writing {}", RegistryKey::ThreadPoolConfigList),
            });
        }
        state.batch = encoded;
        Ok(())
    }

    async fn publish_one(&self, config: &PoolConfig) -> Result<(), RegistryError> {
        let json = serde_json::to_string(config)?;
        let key = config.parameter_key();

        let mut state = self.lock();
        if state.failing_pools.contains(&config.pool_name) {
            return Err(RegistryError::Transport {
                message: format!("injected failure writing {key}"),
            });
        }
        let now = Instant::now();
        // Sweep on write; the map only ever holds live keys plus this one.
        state.records.retain(|_, r| r.expires_at > now);
        let expires_at = now.checked_add(self.record_ttl).unwrap_or(now);
        state.records.insert(key, StoredRecord { json, expires_at });
        Ok(())
    }

    async fn read_batch(&self) -> Result<Vec<PoolConfig>, RegistryError> {
        let batch = self.lock().batch.clone();
        let mut configs = Vec::with_capacity(batch.len());
        for json in &batch {
            configs.push(serde_json::from_str(json)?);
        }
        Ok(configs)
    }

    async fn read_one(
        &self,
        app_name: &str,
        pool_name: &str,
    ) -> Result<Option<PoolConfig>, RegistryError> {
        let key = RegistryKey::parameter_key(app_name, pool_name);
        let json = {
            let mut state = self.lock();
            let expired = state
                .records
                .get(&key)
                .is_some_and(|r| r.expires_at <= Instant::now());
            if expired {
                state.records.remove(&key);
            }
            state.records.get(&key).map(|r| r.json.clone())
        };
        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(RegistryError::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn snapshot(pool: &str, core: usize, max: usize) -> PoolConfig {
        PoolConfig::sizing_override("orders", pool, core, max)
    }

    #[tokio::test]
    async fn batch_is_replaced_whole() {
        let registry = InMemoryRegistry::default();
        registry
            .publish_batch(&[snapshot("io", 2, 10), snapshot("cpu", 4, 4)])
            .await
            .unwrap();
        registry.publish_batch(&[snapshot("io", 3, 10)]).await.unwrap();

        let batch = registry.read_batch().await.unwrap();
        assert_eq!(batch, vec![snapshot("io", 3, 10)]);
    }

    #[tokio::test]
    async fn empty_batch_clears_previous() {
        let registry = InMemoryRegistry::default();
        registry.publish_batch(&[snapshot("io", 2, 10)]).await.unwrap();
        registry.publish_batch(&[]).await.unwrap();
        assert!(registry.read_batch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_one_is_idempotent() {
        let registry = InMemoryRegistry::default();
        let record = snapshot("io", 2, 10);
        registry.publish_one(&record).await.unwrap();
        registry.publish_one(&record).await.unwrap();

        assert_eq!(registry.record_count(), 1);
        assert_eq!(registry.read_one("orders", "io").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn records_are_keyed_per_application() {
        let registry = InMemoryRegistry::default();
        registry.publish_one(&snapshot("io", 2, 10)).await.unwrap();
        registry
            .publish_one(&PoolConfig::sizing_override("billing", "io", 1, 1))
            .await
            .unwrap();
        assert_eq!(registry.record_count(), 2);
        assert!(registry.read_one("other", "io").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_records_are_invisible() {
        let registry = InMemoryRegistry::new(Duration::ZERO);
        registry.publish_one(&snapshot("io", 2, 10)).await.unwrap();
        assert_eq!(registry.record_count(), 0);
        assert!(registry.read_one("orders", "io").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writes_sweep_expired_records() {
        let registry = InMemoryRegistry::new(Duration::ZERO);
        for pool in ["io", "cpu", "batch"] {
            registry.publish_one(&snapshot(pool, 1, 1)).await.unwrap();
        }
        // Only the latest write is still stored; earlier ones were dropped.
        let keys: Vec<String> = registry.lock().records.keys().cloned().collect();
        assert_eq!(keys, vec![RegistryKey::parameter_key("orders", "batch")]);
    }

    #[tokio::test]
    async fn injected_faults_surface_as_transport_errors() {
        let registry = InMemoryRegistry::default();
        registry.fail_batch(true);
        registry.fail_pool("io");

        assert!(matches!(
            registry.publish_batch(&[]).await,
            Err(RegistryError::Transport { .. })
        ));
        assert!(matches!(
            registry.publish_one(&snapshot("io", 1, 1)).await,
            Err(RegistryError::Transport { .. })
        ));
        registry.publish_one(&snapshot("cpu", 1, 1)).await.unwrap();

        registry.clear_faults();
        registry.publish_one(&snapshot("io", 1, 1)).await.unwrap();
        assert_eq!(registry.record_count(), 2);
    }

    #[tokio::test]
    async fn batch_and_records_are_independent() {
        let registry = InMemoryRegistry::default();
        registry.publish_batch(&[snapshot("io", 2, 10)]).await.unwrap();
        assert!(registry.read_one("orders", "io").await.unwrap().is_none());

        registry.publish_one(&snapshot("io", 5, 10)).await.unwrap();
        let batch = registry.read_batch().await.unwrap();
        assert_eq!(batch.first().map(|c| c.core_size), Some(2));
    }
}
