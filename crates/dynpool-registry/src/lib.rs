//! Redis backing for the dynpool registry.
//!
//! ```text
//! ReportingJob ---- DEL + RPUSH ----> THREAD_POOL_CONFIG_LIST_KEY
//!              \--- SET .. EX ------> THREAD_POOL_CONFIG_PARAMETER_LIST_KEY_{app}_{pool}
//!
//! operator ---- PUBLISH ----> DYNAMIC_THREAD_POOL_REDIS_TOPIC ----> RedisOverrideSource
//! ```
//!
//! # Modules
//!
//! - [`redis`] -- [`RedisRegistry`], the [`Registry`] over a fred connection pool
//! - [`subscriber`] -- [`RedisOverrideSource`], the override topic subscription
//! - [`error`] -- Shared error types
//!
//! [`Registry`]: dynpool_core::registry::Registry

pub mod error;
pub mod redis;
pub mod subscriber;

// Re-export primary types for convenience.
pub use error::DbError;
pub use redis::RedisRegistry;
pub use subscriber::{RedisOverrideSource, decode_override};
