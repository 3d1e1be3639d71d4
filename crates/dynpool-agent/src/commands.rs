//! Operator commands: submit an override, print stored records.

use dynpool_core::config::AgentConfig;
use dynpool_registry::RedisRegistry;
use dynpool_types::{PoolConfig, normalize_app_name};
use tracing::warn;

use crate::error::AgentError;

/// Refuse sizing no pool would accept.
const fn check_sizing(core_size: usize, max_size: usize) -> Result<(), AgentError> {
    if max_size == 0 || core_size > max_size {
        return Err(AgentError::InvalidOverride {
            core_size,
            max_size,
        });
    }
    Ok(())
}

/// Name the reporting job files `app`'s records under. A blank name is
/// reported as `unknown`.
fn record_owner(app: &str) -> String {
    normalize_app_name(app)
}

/// Publish a sizing override for `app`'s pool `pool`.
pub async fn submit_override(
    config: &AgentConfig,
    app: &str,
    pool: &str,
    core_size: usize,
    max_size: usize,
) -> Result<(), AgentError> {
    check_sizing(core_size, max_size)?;
    let request = PoolConfig::sizing_override(app, pool, core_size, max_size);

    let registry = RedisRegistry::connect(&config.registry, config.reporting.record_ttl()).await?;
    let receivers = registry.submit_override(&request).await?;
    registry.quit().await?;

    if receivers == 0 {
        warn!(app_name = request.app_name, pool, "no agent is listening on the override topic");
    }
    println!(
        "override {}/{} -> core_size={core_size} max_size={max_size} ({receivers} listener(s))",
        request.app_name, request.pool_name
    );
    Ok(())
}

/// Print the stored batch, or `app`'s record for `pool`, as JSON.
pub async fn show(config: &AgentConfig, app: &str, pool: Option<&str>) -> Result<(), AgentError> {
    let registry = RedisRegistry::connect(&config.registry, config.reporting.record_ttl()).await?;

    let rendered = match pool {
        Some(pool) => {
            let app = record_owner(app);
            let record = registry.fetch_record(&app, pool).await?;
            match record {
                Some(record) => serde_json::to_string_pretty(&record)?,
                None => format!("no record for {app}/{pool}"),
            }
        }
        None => {
            let batch = registry.fetch_batch().await?;
            serde_json::to_string_pretty(&batch)?
        }
    };
    registry.quit().await?;

    println!("{rendered}");
    Ok(())
}
