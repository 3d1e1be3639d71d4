//! Pool inspection and override application.
//!
//! [`PoolInspectorService`] is the only component that reads or mutates
//! live pools. It turns [`PoolHandle`]s into [`PoolConfig`] values and
//! applies sizing overrides back onto them.
//!
//! The name-to-handle mapping ([`PoolSet`]) is built once at startup and
//! never changes afterwards. The only mutation the service performs is
//! [`PoolHandle::resize`], which relies on the pool's own synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use dynpool_types::{PoolConfig, RemainingCapacity, normalize_app_name};
use tracing::{debug, info, warn};

use crate::pool::{PoolError, WorkerPool};

/// Errors raised while applying an override.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The pool refused the requested sizing.
    #[error("override for pool {pool} rejected: {source}")]
    Validation {
        /// Pool the override targeted.
        pool: String,
        /// The pool's rejection.
        #[source]
        source: PoolError,
    },
}

/// What [`PoolInspectorService::apply_override`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideOutcome {
    /// The pool now runs with the requested sizing.
    Applied,
    /// The request names another application; nothing changed.
    IdentityMismatch,
    /// No pool with the requested name; nothing changed.
    PoolNotFound,
}

/// A live pool the service can inspect and re-size.
///
/// [`WorkerPool`] is the in-tree implementation; hosting applications with
/// their own executors can implement this to put them under control.
pub trait PoolHandle: Send + Sync {
    /// Current core size.
    fn core_size(&self) -> usize;
    /// Current max size.
    fn max_size(&self) -> usize;
    /// Workers currently running a task.
    fn active_count(&self) -> usize;
    /// Workers currently alive.
    fn pool_size(&self) -> usize;
    /// Label naming the queueing discipline.
    fn queue_type(&self) -> &'static str;
    /// Tasks waiting in the queue.
    fn queue_size(&self) -> usize;
    /// Free queue slots.
    fn remaining_capacity(&self) -> RemainingCapacity;
    /// Apply new core and max sizes together, or reject them unchanged.
    fn resize(&self, core_size: usize, max_size: usize) -> Result<(), PoolError>;
}

impl PoolHandle for WorkerPool {
    fn core_size(&self) -> usize {
        Self::core_size(self)
    }

    fn max_size(&self) -> usize {
        Self::max_size(self)
    }

    fn active_count(&self) -> usize {
        Self::active_count(self)
    }

    fn pool_size(&self) -> usize {
        Self::pool_size(self)
    }

    fn queue_type(&self) -> &'static str {
        self.queue_kind().label()
    }

    fn queue_size(&self) -> usize {
        Self::queue_size(self)
    }

    fn remaining_capacity(&self) -> RemainingCapacity {
        Self::remaining_capacity(self)
    }

    fn resize(&self, core_size: usize, max_size: usize) -> Result<(), PoolError> {
        Self::resize(self, core_size, max_size)
    }
}

/// Ordered, name-indexed set of pool handles.
///
/// Iteration follows insertion order. Inserting an existing name replaces
/// the handle but keeps its original position.
#[derive(Default)]
pub struct PoolSet {
    handles: Vec<(String, Arc<dyn PoolHandle>)>,
    index: HashMap<String, usize>,
}

impl PoolSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the handle registered under `name`.
    pub fn insert(&mut self, name: &str, handle: Arc<dyn PoolHandle>) {
        if let Some(slot) = self.index.get(name).and_then(|&i| self.handles.get_mut(i)) {
            slot.1 = handle;
            return;
        }
        self.index.insert(name.to_owned(), self.handles.len());
        self.handles.push((name.to_owned(), handle));
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: &str, handle: Arc<dyn PoolHandle>) -> Self {
        self.insert(name, handle);
        self
    }

    /// Look up a handle by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn PoolHandle>> {
        self.index
            .get(name)
            .and_then(|&i| self.handles.get(i))
            .map(|(_, handle)| handle)
    }

    /// Pool names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(|(name, _)| name.as_str())
    }

    /// `(name, handle)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn PoolHandle>)> {
        self.handles.iter().map(|(name, handle)| (name.as_str(), handle))
    }

    /// Number of pools.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether the set holds no pools.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl FromIterator<(String, WorkerPool)> for PoolSet {
    fn from_iter<I: IntoIterator<Item = (String, WorkerPool)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, pool) in iter {
            set.insert(&name, Arc::new(pool));
        }
        set
    }
}

impl core::fmt::Debug for PoolSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Bridge between live pools and [`PoolConfig`] snapshots.
#[derive(Debug)]
pub struct PoolInspectorService {
    app_name: String,
    pools: PoolSet,
}

impl PoolInspectorService {
    /// Create the service for `app_name`, taking ownership of the pool set.
    ///
    /// A blank `app_name` falls back to
    /// [`UNKNOWN_APP_NAME`](dynpool_types::UNKNOWN_APP_NAME).
    pub fn new(app_name: &str, pools: PoolSet) -> Self {
        let resolved = normalize_app_name(app_name);
        if app_name.trim().is_empty() {
            warn!(
                using = resolved,
                "application name not configured, pools will report under a fallback name"
            );
        }
        info!(app_name = resolved, pool_count = pools.len(), "pool inspector ready");
        Self {
            app_name: resolved,
            pools,
        }
    }

    /// Application name every snapshot carries.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// The managed pools.
    pub const fn pools(&self) -> &PoolSet {
        &self.pools
    }

    /// Snapshot every pool, in pool-set order.
    pub fn snapshot_all(&self) -> Vec<PoolConfig> {
        self.pools
            .iter()
            .map(|(name, handle)| self.capture(name, handle.as_ref()))
            .collect()
    }

    /// Snapshot one pool.
    ///
    /// An unknown name yields the identity-only sentinel (see
    /// [`PoolConfig::is_unknown`]), not an error.
    pub fn snapshot(&self, pool_name: &str) -> PoolConfig {
        let Some(handle) = self.pools.get(pool_name) else {
            debug!(app_name = self.app_name, pool = pool_name, "snapshot of unknown pool");
            return PoolConfig::new(&self.app_name, pool_name);
        };
        let config = self.capture(pool_name, handle.as_ref());
        debug!(
            app_name = self.app_name,
            pool = pool_name,
            core_size = config.core_size,
            max_size = config.max_size,
            active_count = config.active_count,
            queue_size = config.queue_size,
            "pool snapshot"
        );
        config
    }

    /// Apply the sizing carried by `request` to the matching live pool.
    ///
    /// Requests for another application, or for a pool this service does
    /// not manage, change nothing and are reported through the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] if the pool rejects the sizing
    /// (for example `core_size > max_size`). The pool is left unchanged.
    pub fn apply_override(&self, request: &PoolConfig) -> Result<OverrideOutcome, ServiceError> {
        if request.app_name != self.app_name {
            return Ok(OverrideOutcome::IdentityMismatch);
        }
        let Some(handle) = self.pools.get(&request.pool_name) else {
            return Ok(OverrideOutcome::PoolNotFound);
        };

        handle
            .resize(request.core_size, request.max_size)
            .map_err(|source| ServiceError::Validation {
                pool: request.pool_name.clone(),
                source,
            })?;

        info!(
            app_name = self.app_name,
            pool = request.pool_name,
            core_size = request.core_size,
            max_size = request.max_size,
            "override applied"
        );
        Ok(OverrideOutcome::Applied)
    }

    fn capture(&self, pool_name: &str, handle: &dyn PoolHandle) -> PoolConfig {
        PoolConfig {
            app_name: self.app_name.clone(),
            pool_name: pool_name.to_owned(),
            core_size: handle.core_size(),
            max_size: handle.max_size(),
            active_count: handle.active_count(),
            pool_size: handle.pool_size(),
            queue_type: handle.queue_type().to_owned(),
            queue_size: handle.queue_size(),
            remaining_capacity: handle.remaining_capacity(),
        }
    }
}
