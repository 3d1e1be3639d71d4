//! The [`PoolConfig`] record: one worker pool's identity, tunable sizing,
//! and observed runtime counters.
//!
//! A `PoolConfig` is a value. The inspector builds a fresh one for every
//! snapshot, the registry stores serialized copies, and operators send one
//! back (with new sizing) to request an override. Only `core_size` and
//! `max_size` are ever read from an inbound record; every other field is
//! observational and recomputed at snapshot time.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::registry_key::RegistryKey;

/// Application name used when the hosting process does not configure one.
pub const UNKNOWN_APP_NAME: &str = "unknown";

/// Free slots left in a pool's task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum RemainingCapacity {
    /// The queue accepts at most this many more tasks.
    Bounded(usize),
    /// The queue has no capacity limit.
    Unbounded,
}

impl Default for RemainingCapacity {
    fn default() -> Self {
        Self::Bounded(0)
    }
}

impl core::fmt::Display for RemainingCapacity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bounded(slots) => write!(f, "{slots}"),
            Self::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Snapshot (or override request) for one worker pool of one application.
///
/// `(app_name, pool_name)` identifies the record. A record whose
/// observational fields are all at their defaults is the "not found"
/// sentinel returned for unknown pool names; see [`PoolConfig::is_unknown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PoolConfig {
    /// Owning application instance. Never empty.
    pub app_name: String,
    /// Logical pool name, unique within the application.
    pub pool_name: String,
    /// Minimum number of worker threads kept alive.
    pub core_size: usize,
    /// Upper bound on worker threads.
    pub max_size: usize,
    /// Workers currently executing a task.
    #[serde(default)]
    pub active_count: usize,
    /// Workers currently alive (busy or idle).
    #[serde(default)]
    pub pool_size: usize,
    /// Label of the queueing discipline in use.
    #[serde(default)]
    pub queue_type: String,
    /// Tasks waiting in the queue.
    #[serde(default)]
    pub queue_size: usize,
    /// Free queue slots, or unbounded.
    #[serde(default)]
    pub remaining_capacity: RemainingCapacity,
}

impl PoolConfig {
    /// Create a record carrying only identity; every other field is zero.
    ///
    /// A blank `app_name` is replaced with [`UNKNOWN_APP_NAME`].
    pub fn new(app_name: &str, pool_name: &str) -> Self {
        Self {
            app_name: normalize_app_name(app_name),
            pool_name: pool_name.to_owned(),
            ..Self::default()
        }
    }

    /// Build an override request asking `pool_name` to run with the given sizing.
    pub fn sizing_override(
        app_name: &str,
        pool_name: &str,
        core_size: usize,
        max_size: usize,
    ) -> Self {
        Self {
            core_size,
            max_size,
            ..Self::new(app_name, pool_name)
        }
    }

    /// Whether this is the "not found" sentinel rather than a live snapshot.
    ///
    /// Live snapshots always carry a queue label, so an empty label means
    /// the counters are unknown, not idle.
    pub fn is_unknown(&self) -> bool {
        self.queue_type.is_empty()
    }

    /// Registry key of this pool's individual parameter record.
    pub fn parameter_key(&self) -> String {
        RegistryKey::parameter_key(&self.app_name, &self.pool_name)
    }
}

/// Replace a blank application name with [`UNKNOWN_APP_NAME`].
pub fn normalize_app_name(app_name: &str) -> String {
    let trimmed = app_name.trim();
    if trimmed.is_empty() {
        UNKNOWN_APP_NAME.to_owned()
    } else {
        trimmed.to_owned()
    }
}
