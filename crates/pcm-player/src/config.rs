use anyhow::{Result, ensure};
use serde::Deserialize;

use crate::encoding::Encoding;

/// Stream format and scheduling parameters, fixed for the lifetime of a player.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlaybackConfig {
    /// Wire encoding of incoming samples.
    pub encoding: Encoding,
    /// Interleaved channel count.
    pub channels: u16,
    /// Stream sample rate in Hz.
    pub sample_rate: u32,
    /// Duration of one scheduled frame in milliseconds.
    pub frame_duration_ms: u32,
    /// Backlog (scheduled but unplayed audio) tolerated before re-anchoring.
    ///
    /// Raised to at least twice the frame duration on validation.
    pub max_lag_ms: u32,
    /// Fade every frame's edges, not only the re-anchored ones.
    ///
    /// Without it, the first frame after start or after a schedule reset plays unfaded; only
    /// underruns and excess lag force a fade. Enable it to fade those anchors too.
    pub reduce_clicking_noise: bool,
    /// Length of the fade-in ramp in samples; the fade-out spans one sample more.
    pub fade_samples: usize,
    /// Lead time added to the clock when a new schedule is anchored.
    pub anchor_lookahead_ms: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::Int16Le,
            channels: 2,
            sample_rate: 44_100,
            frame_duration_ms: 20,
            max_lag_ms: 250,
            reduce_clicking_noise: false,
            fade_samples: 50,
            anchor_lookahead_ms: 5.0,
        }
    }
}

impl PlaybackConfig {
    /// Check invariants and apply the lag floor.
    pub fn validated(mut self) -> Result<Self> {
        ensure!(self.channels >= 1, "channel count must be at least 1");
        ensure!(self.sample_rate > 0, "sample rate must be positive");
        ensure!(self.frame_duration_ms > 0, "frame duration must be positive");
        ensure!(
            self.anchor_lookahead_ms.is_finite() && self.anchor_lookahead_ms >= 0.0,
            "anchor lookahead must be a non-negative number of milliseconds"
        );
        ensure!(
            self.frames_per_chunk() > 0,
            "{} ms at {} Hz holds no samples",
            self.frame_duration_ms,
            self.sample_rate
        );

        let floor = self.frame_duration_ms.saturating_mul(2);
        if self.max_lag_ms < floor {
            tracing::debug!(
                configured_ms = self.max_lag_ms,
                clamped_ms = floor,
                "max lag raised to twice the frame duration"
            );
            self.max_lag_ms = floor;
        }
        Ok(self)
    }

    /// Samples per channel in one scheduled frame.
    pub fn frames_per_chunk(&self) -> usize {
        (u64::from(self.frame_duration_ms) * u64::from(self.sample_rate) / 1000) as usize
    }

    /// Interleaved samples held by the accumulation buffer.
    pub fn accumulation_capacity(&self) -> usize {
        self.frames_per_chunk() * self.channels as usize
    }

    /// Bytes of wire data that fill exactly one frame.
    pub fn bytes_per_chunk(&self) -> usize {
        self.accumulation_capacity() * self.encoding.sample_width()
    }

    pub fn frame_duration_seconds(&self) -> f64 {
        self.frames_per_chunk() as f64 / f64::from(self.sample_rate)
    }
}
