//! `pcm-bridge` entry point.

use std::path::Path;

use anyhow::{Result, bail};
use clap::Parser;
use pcm_bridge::cli::{Args, Command};
use pcm_bridge::config::BridgeConfig;
use pcm_bridge::runtime;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,pcm_bridge=info,pcm_player=info";

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = args
        .log_level
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let file_config = load_config(args.config.as_deref())?;
    match &args.cmd {
        Some(Command::Listen { bind }) => {
            runtime::run_listen(file_config.listen_config(&args, *bind)?)
        }
        Some(Command::Play { path }) => {
            runtime::run_play(file_config.play_config(&args, path.clone())?)
        }
        None => bail!("no command given; use `listen`, `play <path>` or --list-devices"),
    }
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => {
            let config = BridgeConfig::load(path)?;
            tracing::info!(path = ?path, "loaded config");
            Ok(config)
        }
        None => Ok(BridgeConfig::default()),
    }
}
