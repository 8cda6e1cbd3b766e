use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peermesh::config::{Config, ConfigOverrides};
use peermesh::{health, logging};

#[derive(Parser, Debug)]
#[command(name = "peermesh", version)]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the signaling relay and wait for its pong
    Check {
        /// Signaling server URL (ws, wss, http or https)
        #[arg(long = "url")]
        url: Option<String>,
        #[arg(long = "timeout-ms", value_parser = clap::value_parser!(u64).range(1..))]
        timeout_ms: Option<u64>,
    },
    /// Load the config and print the effective settings
    Validate {
        #[arg(long = "room")]
        room: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { url, timeout_ms } => {
            let mut cfg = load_config(
                cli.config.as_deref(),
                ConfigOverrides {
                    signaling_url: url,
                    room: None,
                },
            )?;
            if let Some(ms) = timeout_ms {
                cfg.health_timeout_ms = ms;
            }
            init_logging(&cfg)?;
            let reply = health::check_status(cfg.signaling_url()?, cfg.health_timeout())
                .await
                .context("status check")?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Commands::Validate { room } => {
            let cfg = load_config(
                cli.config.as_deref(),
                ConfigOverrides {
                    signaling_url: None,
                    room,
                },
            )?;
            let options = cfg.orchestrator_options();
            if options.room.is_none() {
                anyhow::bail!("room cannot be empty");
            }
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>, overrides: ConfigOverrides) -> Result<Config> {
    match path {
        Some(path) => Config::load_with_overrides(path, overrides),
        None => Config::from_overrides(overrides),
    }
}

fn init_logging(cfg: &Config) -> Result<()> {
    match &cfg.log_file {
        Some(path) => logging::init_log_file(path),
        None => {
            logging::init_stderr();
            Ok(())
        }
    }
}
