use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pcm_player::Encoding;

#[derive(Parser, Debug)]
#[command(name = "pcm-bridge", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// TOML configuration file; flags given on the command line take precedence
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Sample encoding of the incoming stream (8bitInt, 16bitIntLE, 16bitIntBE, 32bitIntLE, 32bitIntBE, 32bitFloatLE, 32bitFloatBE)
    #[arg(long, global = true)]
    pub encoding: Option<Encoding>,

    /// Interleaved channel count of the incoming stream
    #[arg(long, global = true)]
    pub channels: Option<u16>,

    /// Sample rate of the incoming stream in Hz (the device must support it; no resampling)
    #[arg(long, global = true)]
    pub sample_rate: Option<u32>,

    /// Duration of one scheduled frame in milliseconds
    #[arg(long, global = true)]
    pub frame_ms: Option<u32>,

    /// Scheduled backlog tolerated before re-anchoring, in milliseconds (at least 2 frames)
    #[arg(long, global = true)]
    pub max_lag_ms: Option<u32>,

    /// Fade the edges of every frame instead of only re-anchored ones
    #[arg(long, global = true)]
    pub reduce_clicking_noise: bool,

    /// Output volume in [0, 1]
    #[arg(long, global = true)]
    pub volume: Option<f32>,

    /// Default log filter when RUST_LOG is unset, e.g. debug or info,pcm_player=debug
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept raw PCM over TCP and play it (one client at a time; a new client evicts the old)
    Listen {
        /// Bind address, e.g. 0.0.0.0:5557
        #[arg(long)]
        bind: Option<SocketAddr>,
    },

    /// Play a raw PCM file in real time (use `-` for stdin)
    Play {
        /// Path to headerless PCM data in the configured format
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listen_with_format_flags() {
        let args = Args::try_parse_from([
            "pcm-bridge",
            "--encoding",
            "32bitFloatLE",
            "--channels",
            "1",
            "listen",
            "--bind",
            "127.0.0.1:6000",
            "--sample-rate",
            "48000",
        ])
        .unwrap();
        assert_eq!(args.encoding, Some(Encoding::Float32Le));
        assert_eq!(args.channels, Some(1));
        assert_eq!(args.sample_rate, Some(48_000));
        match args.cmd {
            Some(Command::Listen { bind }) => {
                assert_eq!(bind, Some("127.0.0.1:6000".parse::<SocketAddr>().unwrap()));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_play_path() {
        let args = Args::try_parse_from(["pcm-bridge", "play", "-", "--volume", "0.5"]).unwrap();
        assert_eq!(args.volume, Some(0.5));
        assert!(matches!(args.cmd, Some(Command::Play { ref path }) if path.as_os_str() == "-"));
    }

    #[test]
    fn rejects_unknown_encoding() {
        let res = Args::try_parse_from(["pcm-bridge", "--encoding", "24bitIntLE", "listen"]);
        assert!(res.is_err());
    }

    #[test]
    fn list_devices_needs_no_command() {
        let args = Args::try_parse_from(["pcm-bridge", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.cmd.is_none());
    }
}
