mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tt_core::config::Config;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// tether -- inspect and recover agent task checkpoints.
#[derive(Parser)]
#[command(name = "tether", version, about)]
struct Cli {
    /// Config file (default: ~/.tether/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List checkpointed tasks that were interrupted before finishing.
    Recover {
        /// Owner of the threads (default: general.user_id).
        #[arg(long)]
        user: Option<String>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Classify an error message the way the orchestrator would.
    Classify {
        /// Error message text.
        message: String,
        /// Optional stack trace text.
        #[arg(long)]
        stack: Option<String>,
    },

    /// Delete a task's checkpoint so it can be retried from scratch.
    Clear {
        /// Task id, e.g. task_1700000000000_abc123xyz.
        task_id: String,
        /// Owner of the thread (default: general.user_id).
        #[arg(long)]
        user: Option<String>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    tt_telemetry::logging::init_from_config("tether", &config.logging);
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    tracing::debug!(
        config = %config_path.display(),
        user_id = %config.general.user_id,
        "configuration loaded"
    );

    match cli.command {
        Commands::Recover { user, json } => {
            commands::recover::run(&config, user.as_deref(), json).await?;
        }
        Commands::Classify { message, stack } => {
            commands::classify::run(&config, &message, stack.as_deref())?;
        }
        Commands::Clear { task_id, user } => {
            commands::clear::run(&config, &task_id, user.as_deref()).await?;
        }
        Commands::Config => {
            commands::config::run(&config)?;
        }
    }

    Ok(())
}
