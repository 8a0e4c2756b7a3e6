//! mitosisd: the Mitosis daemon.
//!
//! Single binary that assembles the Mitosis subsystems:
//! - Catalog store (redb)
//! - Shard stores behind the in-process transport
//! - Split-shard orchestrator
//! - REST API
//!
//! # Usage
//!
//! ```text
//! mitosisd init-config --path mitosis.toml
//! mitosisd standalone --config mitosis.toml --port 8443 --data-dir /var/lib/mitosis
//! mitosisd split --config mitosis.toml --from-shard rs0 --new-shard rs1 --remove-orphans
//! ```

mod config;
mod standalone;

use std::path::{Path, PathBuf};

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use mitosis_split::{Caller, OperationContext, SplitShardRequest};

use crate::config::MitosisConfig;

#[derive(Parser)]
#[command(name = "mitosisd", about = "Mitosis daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (catalog, shards and API in one process).
    Standalone {
        /// Path to mitosis.toml.
        #[arg(long, default_value = "mitosis.toml")]
        config: PathBuf,

        /// Port to listen on (overrides api.port).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides data_dir).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Write a starter mitosis.toml.
    InitConfig {
        /// Where to write the file.
        #[arg(long, default_value = "mitosis.toml")]
        path: PathBuf,

        /// Data directory recorded in the file.
        #[arg(long, default_value = "/var/lib/mitosis")]
        data_dir: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Split a shard directly against the local data directory.
    Split {
        #[arg(long, default_value = "mitosis.toml")]
        config: PathBuf,

        #[arg(long)]
        from_shard: String,

        #[arg(long)]
        new_shard: String,

        /// Record range deletion tasks for ranges each shard lost.
        #[arg(long)]
        remove_orphans: bool,

        /// Drop unsharded collections left behind by moved databases.
        #[arg(long)]
        drop_orphaned_collections: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,mitosisd=debug,mitosis=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
        } => {
            let mut config = load_config(&config)?;
            if let Some(port) = port {
                config.api.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            standalone::run_standalone(config).await
        }
        Command::InitConfig {
            path,
            data_dir,
            force,
        } => init_config(&path, &data_dir, force),
        Command::Split {
            config,
            from_shard,
            new_shard,
            remove_orphans,
            drop_orphaned_collections,
        } => {
            let config = load_config(&config)?;
            let request = SplitShardRequest {
                from_shard,
                new_shard,
                remove_orphans,
                drop_orphaned_collections,
            };
            run_split(&config, &request).await
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<MitosisConfig> {
    let config = MitosisConfig::from_file(path)?;
    info!(path = ?path, shards = config.shards.len(), "configuration loaded");
    Ok(config)
}

fn init_config(path: &Path, data_dir: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = MitosisConfig::scaffold(data_dir);
    std::fs::write(path, config.to_toml_string()?)?;
    info!(path = ?path, "wrote starter configuration");
    Ok(())
}

/// Run one split in-process as the local operator; Ctrl-C cancels it.
async fn run_split(config: &MitosisConfig, request: &SplitShardRequest) -> anyhow::Result<()> {
    let node = standalone::assemble(config)?;
    let (ctx, cancel) = OperationContext::cancellable();

    let interrupt = tokio::spawn(async move {
        standalone::wait_for_ctrl_c().await;
        warn!("interrupt received, cancelling split");
        cancel.cancel();
    });
    let result = node
        .orchestrator
        .split_shard(&ctx, &Caller::internal(), request)
        .await;
    interrupt.abort();
    let report = result?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
