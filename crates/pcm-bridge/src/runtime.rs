//! Bridge runtime: device listing, TCP listening and local file playback.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use pcm_player::{ClockState, CpalSink, OutputOptions, PlaybackConfig, Player, PlayerEvent};

use crate::config::{BridgeListenConfig, BridgePlayConfig};
use crate::net::{self, Ingest};

const INGEST_QUEUE: usize = 64;

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    pcm_player::device::list_devices(&host)
}

/// Accept raw PCM over TCP and play it until interrupted.
///
/// One client is served at a time; a new connection evicts the current one. The player is
/// started fresh for every client and stopped when it goes away.
pub fn run_listen(config: BridgeListenConfig) -> Result<()> {
    let (sink, clock_rx) = CpalSink::open(
        &config.playback,
        &OutputOptions {
            device: config.device.clone(),
        },
    )?;
    let mut player = Player::new(config.playback.clone(), sink)?;

    let listener =
        TcpListener::bind(config.bind).with_context(|| format!("bind {}", config.bind))?;
    tracing::info!(bind = %config.bind, "listening (one client at a time)");

    let (tx, rx) = crossbeam_channel::bounded(INGEST_QUEUE);
    let shutdown_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(Ingest::Shutdown);
    })
    .context("install ctrl-c handler")?;
    let _acceptor = net::spawn_acceptor(listener, config.playback.encoding.sample_width(), tx);

    let mut session: Option<Session> = None;
    'serve: loop {
        crossbeam_channel::select! {
            recv(rx) -> msg => {
                let Ok(msg) = msg else { break 'serve };
                match msg {
                    Ingest::Connected { id, peer } => {
                        if let Some(prev) = session.take() {
                            prev.finish("evicted");
                            player.stop();
                        }
                        tracing::info!(%peer, "client connected");
                        player.start();
                        player.set_volume(config.volume);
                        session = Some(Session::new(id, peer));
                    }
                    Ingest::Chunk { id, bytes } => {
                        let Some(current) = session.as_mut().filter(|s| s.id == id) else {
                            continue 'serve;
                        };
                        let events = player.feed(&bytes);
                        current.stats.record(bytes.len(), &events);
                    }
                    Ingest::Closed { id, error } => {
                        if session.as_ref().is_none_or(|s| s.id != id) {
                            continue 'serve;
                        }
                        if let Some(error) = error {
                            tracing::warn!("client read error: {error}");
                        }
                        if let Some(done) = session.take() {
                            done.finish("disconnected");
                        }
                        tracing::info!(status = ?player.status(), "player status");
                        player.stop();
                        tracing::info!("ready for next connection");
                    }
                    Ingest::Shutdown => {
                        tracing::info!("shutdown requested");
                        break 'serve;
                    }
                }
            }
            recv(clock_rx) -> state => {
                let Ok(state) = state else { break 'serve };
                apply_clock_state(&mut player, state);
            }
        }
    }

    if let Some(open) = session.take() {
        open.finish("shutdown");
    }
    tracing::info!(status = ?player.status(), "player status");
    player.destroy();
    Ok(())
}

/// Play a raw PCM file (or stdin for `-`) in real time, then wait for it to drain.
pub fn run_play(config: BridgePlayConfig) -> Result<()> {
    let mut reader = open_input(&config)?;
    let (sink, clock_rx) = CpalSink::open(
        &config.playback,
        &OutputOptions {
            device: config.device.clone(),
        },
    )?;
    let mut player = Player::new(config.playback.clone(), sink)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .context("install ctrl-c handler")?;
    }

    player.start();
    player.set_volume(config.volume);

    let width = config.playback.encoding.sample_width();
    let lead_ms = play_lead_ms(&config.playback);
    let poll = Duration::from_secs_f64(config.playback.frame_duration_seconds() / 2.0);
    let mut buf = vec![0u8; config.playback.bytes_per_chunk()];
    let mut stats = SessionStats::default();
    tracing::info!(path = ?config.path, lead_ms, "playing");

    while !stop.load(Ordering::Relaxed) {
        drain_clock_events(&mut player, &clock_rx);
        let n = read_full(&mut reader, &mut buf)
            .with_context(|| format!("read {:?}", config.path))?;
        if n == 0 {
            break;
        }
        let aligned = n - n % width;
        if aligned < n {
            tracing::debug!(bytes = n - aligned, "dropping trailing partial sample");
        }
        let events = player.feed(&buf[..aligned]);
        stats.record(aligned, &events);

        while !stop.load(Ordering::Relaxed)
            && player.status().backlog_ms.is_some_and(|ms| ms > lead_ms)
        {
            std::thread::sleep(poll);
            drain_clock_events(&mut player, &clock_rx);
        }
        if n < buf.len() {
            break;
        }
    }

    if !stop.load(Ordering::Relaxed) {
        if let Some(ms) = player.status().backlog_ms {
            std::thread::sleep(Duration::from_secs_f64(ms / 1000.0));
        }
    }
    stats.log("finished");
    tracing::info!(status = ?player.status(), "player status");
    player.destroy();
    Ok(())
}

fn open_input(config: &BridgePlayConfig) -> Result<Box<dyn Read>> {
    if config.path.as_os_str() == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(&config.path).with_context(|| format!("open {:?}", config.path))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Backlog to keep queued ahead of the clock while pacing a file.
///
/// Half the lag limit, but never less than one frame; the lag limit is always at least two
/// frames, so pacing never trips the excess-lag reset.
fn play_lead_ms(playback: &PlaybackConfig) -> f64 {
    (f64::from(playback.max_lag_ms) / 2.0).max(f64::from(playback.frame_duration_ms))
}

fn drain_clock_events<S: pcm_player::OutputSink>(
    player: &mut Player<S>,
    clock_rx: &Receiver<ClockState>,
) {
    for state in clock_rx.try_iter() {
        apply_clock_state(player, state);
    }
}

fn apply_clock_state<S: pcm_player::OutputSink>(player: &mut Player<S>, state: ClockState) {
    if !state.is_running() {
        tracing::warn!(?state, "audio clock not running; buffered audio dropped");
    }
    player.on_clock_state(state);
}

/// Read until `buf` is full or the reader is exhausted. Returns the bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A connected TCP client.
struct Session {
    id: u64,
    peer: SocketAddr,
    stats: SessionStats,
}

impl Session {
    fn new(id: u64, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            stats: SessionStats::default(),
        }
    }

    fn finish(self, reason: &str) {
        tracing::info!(peer = %self.peer, "client {reason}");
        self.stats.log(reason);
    }
}

/// Per-session tallies of what the player reported.
#[derive(Debug, Default, PartialEq)]
struct SessionStats {
    bytes: u64,
    frames: u64,
    faded_frames: u64,
    underruns: u64,
    lag_resets: u64,
    misaligned: u64,
}

impl SessionStats {
    fn record(&mut self, bytes: usize, events: &[PlayerEvent]) {
        self.bytes += bytes as u64;
        for event in events {
            match event {
                PlayerEvent::FrameScheduled { faded, .. } => {
                    self.frames += 1;
                    if *faded {
                        self.faded_frames += 1;
                    }
                }
                PlayerEvent::Underrun { .. } => self.underruns += 1,
                PlayerEvent::ExcessLag { .. } => self.lag_resets += 1,
                PlayerEvent::Misaligned {
                    byte_len,
                    sample_width,
                } => {
                    self.misaligned += 1;
                    tracing::warn!(
                        byte_len,
                        sample_width,
                        "chunk not aligned to sample width; dropped"
                    );
                }
            }
        }
    }

    fn log(&self, reason: &str) {
        tracing::info!(
            bytes = self.bytes,
            frames = self.frames,
            faded_frames = self.faded_frames,
            underruns = self.underruns,
            lag_resets = self.lag_resets,
            misaligned = self.misaligned,
            "session {reason}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_player::ManualSink;

    #[test]
    fn read_full_fills_across_short_reads() {
        struct Dribble(Vec<u8>);
        impl Read for Dribble {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0.remove(0);
                Ok(1)
            }
        }

        let mut reader = Dribble(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 4];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }

    #[test]
    fn play_lead_stays_below_lag_limit() {
        let defaults = PlaybackConfig::default();
        assert_eq!(play_lead_ms(&defaults), 125.0);

        let tight = PlaybackConfig {
            max_lag_ms: 0,
            ..PlaybackConfig::default()
        }
        .validated()
        .unwrap();
        assert_eq!(play_lead_ms(&tight), 20.0);
        assert!(play_lead_ms(&tight) < f64::from(tight.max_lag_ms));
    }

    #[test]
    fn stats_count_player_events() {
        let mut stats = SessionStats::default();
        stats.record(
            8,
            &[
                PlayerEvent::Underrun { missed_ms: 3 },
                PlayerEvent::FrameScheduled {
                    start_time: 1.0,
                    duration_seconds: 0.02,
                    samples_per_channel: 882,
                    faded: true,
                },
                PlayerEvent::FrameScheduled {
                    start_time: 1.02,
                    duration_seconds: 0.02,
                    samples_per_channel: 882,
                    faded: false,
                },
            ],
        );
        stats.record(
            3,
            &[PlayerEvent::Misaligned {
                byte_len: 3,
                sample_width: 2,
            }],
        );
        stats.record(4, &[PlayerEvent::ExcessLag { lag_ms: 300 }]);
        assert_eq!(
            stats,
            SessionStats {
                bytes: 15,
                frames: 2,
                faded_frames: 1,
                underruns: 1,
                lag_resets: 1,
                misaligned: 1,
            }
        );
    }

    #[test]
    fn clock_events_reach_the_player() {
        let mut player = Player::new(PlaybackConfig::default(), ManualSink::new()).unwrap();
        player.start();
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(ClockState::Suspended).unwrap();
        drain_clock_events(&mut player, &rx);
        assert_eq!(player.status().clock, ClockState::Suspended);
        assert_eq!(player.status().counters.clock_resets, 1);

        tx.send(ClockState::Running).unwrap();
        drain_clock_events(&mut player, &rx);
        assert!(player.status().clock.is_running());
    }
}
