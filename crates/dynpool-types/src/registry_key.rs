//! Well-known registry keys shared by every process reporting into the
//! same store.
//!
//! | Key | Type | Description |
//! |-----|------|-------------|
//! | `THREAD_POOL_CONFIG_LIST_KEY` | List | Latest full batch of snapshots |
//! | `THREAD_POOL_CONFIG_PARAMETER_LIST_KEY_{app}_{pool}` | JSON, 30d TTL | One pool's latest record |
//! | `DYNAMIC_THREAD_POOL_REDIS_TOPIC` | Pub/sub channel | Inbound sizing overrides |

use serde::{Deserialize, Serialize};

/// One of the fixed registry key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryKey {
    /// List holding the latest batch of pool snapshots.
    ThreadPoolConfigList,
    /// Prefix of the per-pool parameter records.
    ThreadPoolConfigParameter,
    /// Channel on which operators publish sizing overrides.
    DynamicThreadPoolTopic,
}

impl RegistryKey {
    /// The literal key (or key prefix) used in the store.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ThreadPoolConfigList => "THREAD_POOL_CONFIG_LIST_KEY",
            Self::ThreadPoolConfigParameter => "THREAD_POOL_CONFIG_PARAMETER_LIST_KEY",
            Self::DynamicThreadPoolTopic => "DYNAMIC_THREAD_POOL_REDIS_TOPIC",
        }
    }

    /// Human-readable description, for logs and tooling.
    pub const fn description(self) -> &'static str {
        match self {
            Self::ThreadPoolConfigList => "pool snapshot list",
            Self::ThreadPoolConfigParameter => "pool parameter record",
            Self::DynamicThreadPoolTopic => "pool override topic",
        }
    }

    /// Key of the parameter record for `(app_name, pool_name)`.
    pub fn parameter_key(app_name: &str, pool_name: &str) -> String {
        format!(
            "{}_{app_name}_{pool_name}",
            Self::ThreadPoolConfigParameter.as_str()
        )
    }
}

impl core::fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
