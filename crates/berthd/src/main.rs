//! berthd: the berth daemon.
//!
//! Single binary that assembles the engine:
//! - State store (redb)
//! - Resource queue and packing scheduler
//! - Completion listener
//! - REST API
//!
//! # Usage
//!
//! ```text
//! berthd standalone --config /etc/berth/berth.toml --port 8443 --data-dir /var/lib/berth
//! berthd config --config /etc/berth/berth.toml
//! ```

mod seed;
mod standalone;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use berth_core::BerthConfig;

const DEFAULT_LOG_FILTER: &str = "info,berthd=debug,berth=debug";

#[derive(Parser)]
#[command(name = "berthd", about = "Berth admission and scheduling daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (single process, embedded store).
    Standalone {
        /// Path to berth.toml. Built-in defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on. Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state. Overrides `server.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            standalone::run_standalone(config).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BerthConfig> {
    match path {
        Some(path) => BerthConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("load config {}: {e}", path.display())),
        None => Ok(BerthConfig::default()),
    }
}
