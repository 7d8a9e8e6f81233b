//! Configuration loading and resolution.
//!
//! Values come from built-in defaults, then an optional TOML file, then command-line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use pcm_player::PlaybackConfig;
use serde::Deserialize;

use crate::cli::Args;

/// Default TCP bind address for `listen`.
pub const DEFAULT_BIND: &str = "0.0.0.0:5557";
/// Default output volume.
pub const DEFAULT_VOLUME: f32 = 0.9;

/// Top-level configuration file schema.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Stream format and scheduling.
    pub player: PlaybackConfig,
    pub listen: ListenSection,
    pub output: OutputSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenSection {
    /// Bind address (host:port).
    pub bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    /// Output device name substring.
    pub device: Option<String>,
    /// Output volume in [0, 1].
    pub volume: Option<f32>,
}

/// Resolved settings for `listen`.
#[derive(Clone, Debug)]
pub struct BridgeListenConfig {
    pub bind: SocketAddr,
    pub device: Option<String>,
    pub volume: f32,
    pub playback: PlaybackConfig,
}

/// Resolved settings for `play`.
#[derive(Clone, Debug)]
pub struct BridgePlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub volume: f32,
    pub playback: PlaybackConfig,
}

impl BridgeConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<BridgeConfig>(raw)?)
    }

    /// Resolve `listen` settings, with `bind` from the subcommand taking precedence.
    pub fn listen_config(&self, args: &Args, bind: Option<SocketAddr>) -> Result<BridgeListenConfig> {
        let bind = match bind {
            Some(addr) => addr,
            None => {
                let raw = self.listen.bind.as_deref().unwrap_or(DEFAULT_BIND);
                raw.parse()
                    .with_context(|| format!("parse listen bind {raw}"))?
            }
        };
        Ok(BridgeListenConfig {
            bind,
            device: self.device(args),
            volume: self.volume(args)?,
            playback: self.playback(args)?,
        })
    }

    /// Resolve `play` settings.
    pub fn play_config(&self, args: &Args, path: PathBuf) -> Result<BridgePlayConfig> {
        Ok(BridgePlayConfig {
            path,
            device: self.device(args),
            volume: self.volume(args)?,
            playback: self.playback(args)?,
        })
    }

    fn device(&self, args: &Args) -> Option<String> {
        normalize_device_name(args.device.clone().or_else(|| self.output.device.clone()))
    }

    fn volume(&self, args: &Args) -> Result<f32> {
        let volume = args.volume.or(self.output.volume).unwrap_or(DEFAULT_VOLUME);
        ensure!((0.0..=1.0).contains(&volume), "volume must be within [0, 1], got {volume}");
        Ok(volume)
    }

    fn playback(&self, args: &Args) -> Result<PlaybackConfig> {
        let mut playback = self.player.clone();
        if let Some(encoding) = args.encoding {
            playback.encoding = encoding;
        }
        if let Some(channels) = args.channels {
            playback.channels = channels;
        }
        if let Some(rate) = args.sample_rate {
            playback.sample_rate = rate;
        }
        if let Some(ms) = args.frame_ms {
            playback.frame_duration_ms = ms;
        }
        if let Some(ms) = args.max_lag_ms {
            playback.max_lag_ms = ms;
        }
        if args.reduce_clicking_noise {
            playback.reduce_clicking_noise = true;
        }
        playback.validated().context("invalid player configuration")
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
