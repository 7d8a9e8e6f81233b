//! Frame accumulation and clock scheduling.
//!
//! [`Player`] turns a stream of raw PCM chunks into back-to-back frames on the sink clock:
//! - decoded samples collect in a fixed-size interleaved accumulation buffer
//! - every full buffer becomes one [`ScheduledFrame`] starting where the previous one ended
//! - a missed start time (underrun) or an oversized backlog re-anchors the schedule just ahead
//!   of the clock and fades the frame edges to hide the discontinuity
//!
//! Every anomaly is handled locally by resetting the schedule; nothing here is fatal.

use anyhow::Result;

use crate::config::PlaybackConfig;
use crate::encoding::EncodingProfile;
use crate::frame::ScheduledFrame;
use crate::sink::{ClockState, OutputSink};
use crate::status::{PlayerCounters, StatusSnapshot};

/// Diagnostic reported by [`Player::feed`].
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    /// A frame was handed to the sink.
    FrameScheduled {
        start_time: f64,
        duration_seconds: f64,
        samples_per_channel: usize,
        faded: bool,
    },
    /// The chunk length was not a multiple of the sample width; it was dropped.
    Misaligned { byte_len: usize, sample_width: usize },
    /// The scheduled start had already passed when the frame was ready.
    Underrun { missed_ms: i64 },
    /// More audio was queued ahead of the clock than the lag limit allows.
    ExcessLag { lag_ms: i64 },
}

/// Streaming PCM player bound to one output sink.
pub struct Player<S: OutputSink> {
    config: PlaybackConfig,
    profile: &'static EncodingProfile,
    sink: S,
    playing: bool,
    clock: ClockState,
    /// Sink time for the next frame; `0.0` means anchor on the next flush.
    next_start_time: f64,
    samples: Vec<f32>,
    cursor: usize,
    volume: f32,
    counters: PlayerCounters,
}

impl<S: OutputSink> Player<S> {
    /// Validate `config` and take ownership of `sink`. The player starts stopped.
    pub fn new(config: PlaybackConfig, sink: S) -> Result<Self> {
        let config = config.validated()?;
        let clock = sink.clock_state();
        let capacity = config.accumulation_capacity();
        tracing::info!(
            encoding = %config.encoding,
            channels = config.channels,
            rate_hz = config.sample_rate,
            frame_ms = config.frame_duration_ms,
            max_lag_ms = config.max_lag_ms,
            capacity_samples = capacity,
            "pcm player created"
        );
        Ok(Self {
            profile: config.encoding.profile(),
            config,
            sink,
            playing: false,
            clock,
            next_start_time: 0.0,
            samples: vec![0.0; capacity],
            cursor: 0,
            volume: 1.0,
            counters: PlayerCounters::default(),
        })
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Begin accepting audio. Has no effect when already playing.
    pub fn start(&mut self) {
        if self.playing {
            return;
        }
        self.reset_schedule();
        self.playing = true;
        tracing::info!("pcm player started");
    }

    /// Stop accepting audio and forget the current schedule.
    pub fn stop(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        self.reset_schedule();
        tracing::info!("pcm player stopped");
    }

    /// Stop and release the sink.
    pub fn destroy(mut self) {
        self.stop();
        self.sink.close();
        tracing::info!("pcm player destroyed");
    }

    /// Set output gain. Ignored while stopped or when `volume` is outside `[0, 1]`.
    pub fn set_volume(&mut self, volume: f32) -> bool {
        if !self.playing || !(0.0..=1.0).contains(&volume) {
            return false;
        }
        self.volume = volume;
        self.sink.set_gain(volume);
        true
    }

    /// Deliver a sink clock state change.
    ///
    /// Any state other than [`ClockState::Running`] drops pending samples and the schedule so
    /// nothing stale is scheduled once the clock resumes.
    pub fn on_clock_state(&mut self, state: ClockState) {
        if state != self.clock {
            tracing::info!(from = ?self.clock, to = ?state, "audio clock state");
        }
        self.clock = state;
        if !state.is_running() {
            self.reset_schedule();
            self.counters.clock_resets += 1;
        }
    }

    /// Ingest one chunk of raw PCM.
    ///
    /// Returns the frames scheduled and anomalies handled during this call. Empty chunks,
    /// chunks arriving while stopped, and chunks arriving while the clock is not running are
    /// ignored.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<PlayerEvent> {
        let mut events = Vec::new();
        if bytes.is_empty() {
            return events;
        }
        if !self.playing || !self.clock.is_running() {
            self.counters.ignored_chunks += 1;
            return events;
        }

        let width = self.profile.sample_width;
        if !self.profile.is_aligned(bytes.len()) {
            tracing::debug!(
                bytes = bytes.len(),
                sample_width = width,
                "dropping misaligned chunk"
            );
            self.next_start_time = 0.0;
            self.counters.misaligned_chunks += 1;
            events.push(PlayerEvent::Misaligned {
                byte_len: bytes.len(),
                sample_width: width,
            });
            return events;
        }

        for offset in (0..bytes.len()).step_by(width) {
            self.samples[self.cursor] = self.profile.decode(bytes, offset);
            self.cursor += 1;
            if self.cursor == self.samples.len() {
                self.flush(&mut events);
                self.cursor = 0;
            }
        }
        events
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::new(
            self.playing,
            self.clock,
            self.sink.now(),
            self.next_start_time,
            self.cursor,
            self.volume,
            self.counters,
        )
    }

    /// Schedule the full accumulation buffer.
    fn flush(&mut self, events: &mut Vec<PlayerEvent>) {
        let channels = self.config.channels as usize;
        let mut frame =
            ScheduledFrame::from_interleaved(&self.samples, channels, self.config.sample_rate);

        let now = self.sink.now();
        let lag_ms = ((self.next_start_time - now) * 1000.0).floor() as i64;
        let mut force_fade = false;

        if self.next_start_time != 0.0 && lag_ms < 0 {
            tracing::debug!(missed_ms = -lag_ms, "audio start time missed");
            force_fade = true;
            self.next_start_time = 0.0;
            self.counters.underruns += 1;
            events.push(PlayerEvent::Underrun { missed_ms: -lag_ms });
        }

        if lag_ms > i64::from(self.config.max_lag_ms) {
            tracing::debug!(lag_ms, max_lag_ms = self.config.max_lag_ms, "too much audio lag");
            force_fade = true;
            self.next_start_time = 0.0;
            self.counters.lag_resets += 1;
            events.push(PlayerEvent::ExcessLag { lag_ms });
        }

        let faded = force_fade || self.config.reduce_clicking_noise;
        if faded {
            frame.fade_edges(self.config.fade_samples);
        }

        if self.next_start_time == 0.0 {
            self.next_start_time = now + self.config.anchor_lookahead_ms / 1000.0;
        }

        frame.start_time = self.next_start_time;
        let duration = frame.duration_seconds();
        events.push(PlayerEvent::FrameScheduled {
            start_time: frame.start_time,
            duration_seconds: duration,
            samples_per_channel: frame.len(),
            faded,
        });
        self.sink.submit(frame);
        self.counters.frames_scheduled += 1;

        self.next_start_time += duration;
    }

    fn reset_schedule(&mut self) {
        self.next_start_time = 0.0;
        self.cursor = 0;
    }
}
