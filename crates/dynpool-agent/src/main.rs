//! Agent binary for dynpool.
//!
//! `run` (the default) creates the configured pools, reports them to Redis
//! on a fixed cadence, and applies overrides arriving on the override topic
//! until Ctrl-C. `override` and `show` are operator commands against the
//! same registry.
//!
//! ```bash
//! dynpool-agent --config dynpool-config.yaml run
//! dynpool-agent override io 8 16
//! dynpool-agent show --pool io
//! ```

mod agent;
mod commands;
mod error;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use dynpool_core::config::{AgentConfig, LoggingConfig};
use tracing_subscriber::EnvFilter;

use crate::error::AgentError;

#[derive(Parser)]
#[command(
    name = "dynpool-agent",
    about = "Report worker pools to Redis and apply sizing overrides",
    version
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, global = true, default_value = "dynpool-config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report pools and listen for overrides until Ctrl-C.
    Run,

    /// Ask a pool to run with new sizing.
    Override {
        /// Pool name.
        pool: String,

        /// New core size.
        core_size: usize,

        /// New max size.
        max_size: usize,

        /// Target application (defaults to the configured name).
        #[arg(long)]
        app: Option<String>,
    },

    /// Print the stored batch, or one pool's record.
    Show {
        /// Print only this pool's record.
        #[arg(long)]
        pool: Option<String>,

        /// Application the record belongs to (defaults to the configured name).
        #[arg(long)]
        app: Option<String>,
    },
}

/// Application entry point for the agent.
///
/// # Errors
///
/// Returns an error if configuration, the registry connection, or the
/// selected command fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config.logging);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => agent::run(config).await?,
        Commands::Override {
            pool,
            core_size,
            max_size,
            app,
        } => {
            let app = app.unwrap_or_else(|| config.app_name().to_owned());
            commands::submit_override(&config, &app, &pool, core_size, max_size).await?;
        }
        Commands::Show { pool, app } => {
            let app = app.unwrap_or_else(|| config.app_name().to_owned());
            commands::show(&config, &app, pool.as_deref()).await?;
        }
    }
    Ok(())
}

/// Load configuration from `path`, falling back to defaults (plus
/// environment overrides) when the file does not exist.
fn load_config(path: &Path) -> Result<AgentConfig, AgentError> {
    if path.exists() {
        Ok(AgentConfig::from_file(path)?)
    } else {
        let mut config = AgentConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

/// Initialize structured logging. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["dynpool-agent"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("dynpool-config.yaml"));
    }

    #[test]
    fn override_takes_positional_sizing() {
        let cli =
            Cli::try_parse_from(["dynpool-agent", "override", "io", "4", "8", "--app", "orders"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Override { ref pool, core_size: 4, max_size: 8, ref app })
                if pool == "io" && app.as_deref() == Some("orders")
        ));
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["dynpool-agent", "show", "--config", "other.yaml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("other.yaml"));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let config = load_config(Path::new("does-not-exist.yaml")).unwrap();
        assert!(config.pools.is_empty());
    }
}
