//! The `run` command: wire pools, reporting, and the override listener.
//!
//! # Startup Sequence
//!
//! 1. Create the configured pools
//! 2. Build the pool inspector
//! 3. Connect to Redis and start the keep-alive
//! 4. Spawn the reporting job
//! 5. Subscribe to the override topic and spawn the listener
//! 6. Wait for Ctrl-C, then stop every task and disconnect

use std::sync::Arc;

use dynpool_core::config::AgentConfig;
use dynpool_core::listener::{ListenerStats, OverrideListener};
use dynpool_core::reporting::ReportingJob;
use dynpool_core::service::PoolInspectorService;
use dynpool_core::shutdown;
use dynpool_registry::{RedisOverrideSource, RedisRegistry};
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::error::AgentError;

fn task_error(task: &str, error: &JoinError) -> AgentError {
    AgentError::Task {
        message: format!("{task} task failed: {error}"),
    }
}

/// Run the agent until Ctrl-C.
pub async fn run(config: AgentConfig) -> Result<(), AgentError> {
    info!("dynpool-agent starting");

    // 1-2. Pools and inspector.
    let pools = config.build_pools()?;
    let service = Arc::new(PoolInspectorService::new(config.app_name(), pools));
    if service.pools().is_empty() {
        warn!("no pools configured, reporting will publish an empty batch");
    }

    // 3. Registry.
    let registry = Arc::new(
        RedisRegistry::connect(&config.registry, config.reporting.record_ttl()).await?,
    );
    let (stop, signal) = shutdown::channel();
    let keep_alive = config.registry.keep_alive.then(|| {
        registry.start_keep_alive(config.registry.ping_interval(), signal.clone())
    });

    // 4. Reporting job.
    let job = ReportingJob::new(
        Arc::clone(&service),
        Arc::clone(&registry),
        config.reporting.options(),
    );
    let reporting = {
        let signal = signal.clone();
        tokio::spawn(async move { job.run(signal).await })
    };

    // 5. Override listener.
    let listener: Option<JoinHandle<ListenerStats>> = if config.listener.enabled {
        let source = RedisOverrideSource::subscribe(&config.registry).await?;
        let listener = OverrideListener::new(Arc::clone(&service), Arc::clone(&registry), source)
            .republish_on_apply(config.listener.republish_on_apply);
        Some(tokio::spawn(listener.run(signal.clone())))
    } else {
        info!("override listener disabled");
        None
    };
    drop(signal);

    info!(
        app_name = service.app_name(),
        pools = service.pools().len(),
        "dynpool-agent running, press Ctrl-C to stop"
    );

    // 6. Shutdown.
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    stop.send_replace(true);

    let cycles = reporting
        .await
        .map_err(|e| task_error("reporting", &e))?;
    if let Some(listener) = listener {
        let stats = listener.await.map_err(|e| task_error("listener", &e))?;
        info!(
            received = stats.received,
            applied = stats.applied,
            ignored = stats.ignored,
            rejected = stats.rejected,
            "override listener finished"
        );
    }
    if let Some(keep_alive) = keep_alive {
        keep_alive
            .await
            .map_err(|e| task_error("keep-alive", &e))?;
    }

    registry.quit().await?;
    info!(cycles, "dynpool-agent stopped");
    Ok(())
}
