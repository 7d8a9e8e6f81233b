//! CPAL-backed output sink.
//!
//! The sink keeps a timeline of scheduled frames and a clock counted in rendered device
//! frames. The real-time callback:
//! - renders every pending frame whose span covers the current clock position (overlapping
//!   frames are mixed; gaps are silence)
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise) and output gain
//! - converts `f32` samples to the device sample format
//!
//! Because the clock only advances when the callback runs, a halted stream also halts `now()`.
//! Errors that stop the stream mark the clock suspended and are announced on the state channel;
//! the next rendered buffer announces it running again. Buffer underruns only log, since the
//! stream keeps rendering through them.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::config::PlaybackConfig;
use crate::device;
use crate::frame::ScheduledFrame;
use crate::sink::{ClockState, OutputSink};

/// Output selection for [`CpalSink::open`].
#[derive(Clone, Debug, Default)]
pub struct OutputOptions {
    /// Substring of the output device name; `None` selects the host default.
    pub device: Option<String>,
}

/// A frame placed on the sink timeline, addressed in device frames.
struct PendingFrame {
    start: u64,
    channels: Vec<Vec<f32>>,
}

impl PendingFrame {
    fn end(&self) -> u64 {
        self.start + self.channels.first().map_or(0, Vec::len) as u64
    }
}

/// State shared between the sink handle and the audio callback.
struct Shared {
    timeline: Mutex<Vec<PendingFrame>>,
    rendered_frames: AtomicU64,
    gain_bits: AtomicU32,
    running: AtomicBool,
}

impl Shared {
    fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }
}

/// Audio output through a CPAL stream.
pub struct CpalSink {
    stream: Option<cpal::Stream>,
    shared: Arc<Shared>,
    sample_rate: u32,
    state_tx: Sender<ClockState>,
}

impl CpalSink {
    /// Open the output device and start the stream.
    ///
    /// Returns the sink and the channel on which clock state changes are announced; the owner
    /// forwards those into [`Player::on_clock_state`](crate::scheduler::Player::on_clock_state).
    pub fn open(
        config: &PlaybackConfig,
        options: &OutputOptions,
    ) -> Result<(Self, Receiver<ClockState>)> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, options.device.as_deref())?;
        let supported = device::pick_output_config(&device, config.sample_rate, config.channels)
            .with_context(|| format!("select output config on {}", describe(&device)))?;
        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        let target = u32::try_from(config.frames_per_chunk() / 2).unwrap_or(u32::MAX).max(64);
        if let Some(buf) = device::pick_buffer_size(&supported, target) {
            stream_config.buffer_size = buf;
        }
        tracing::info!(
            device = %describe(&device),
            rate_hz = stream_config.sample_rate,
            device_channels = stream_config.channels,
            stream_channels = config.channels,
            sample_format = ?supported.sample_format(),
            buffer_size = ?stream_config.buffer_size,
            "output device config"
        );

        let shared = Arc::new(Shared {
            timeline: Mutex::new(Vec::new()),
            rendered_frames: AtomicU64::new(0),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            running: AtomicBool::new(true),
        });
        let (state_tx, state_rx) = crossbeam_channel::unbounded();

        let stream = build_output_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            config.channels as usize,
            &shared,
            state_tx.clone(),
        )?;
        stream.play().context("start output stream")?;

        Ok((
            Self {
                stream: Some(stream),
                shared,
                sample_rate: config.sample_rate,
                state_tx,
            },
            state_rx,
        ))
    }
}

impl OutputSink for CpalSink {
    fn now(&self) -> f64 {
        self.shared.rendered_frames.load(Ordering::Relaxed) as f64 / f64::from(self.sample_rate)
    }

    fn clock_state(&self) -> ClockState {
        if self.stream.is_none() {
            ClockState::Closed
        } else if self.shared.running.load(Ordering::Relaxed) {
            ClockState::Running
        } else {
            ClockState::Suspended
        }
    }

    fn submit(&mut self, frame: ScheduledFrame) {
        if self.stream.is_none() {
            return;
        }
        let start = frame_position(frame.start_time, self.sample_rate);
        let pending = PendingFrame {
            start,
            channels: frame.into_channels(),
        };
        if let Ok(mut timeline) = self.shared.timeline.lock() {
            timeline.push(pending);
        }
    }

    fn set_gain(&mut self, gain: f32) {
        self.shared.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            drop(stream);
            self.shared.running.store(false, Ordering::Relaxed);
            if let Ok(mut timeline) = self.shared.timeline.lock() {
                timeline.clear();
            }
            let _ = self.state_tx.send(ClockState::Closed);
            tracing::info!("output stream closed");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn describe(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown device".to_string())
}

/// Build a CPAL output stream rendering the shared timeline.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    src_channels: usize,
    shared: &Arc<Shared>,
    state_tx: Sender<ClockState>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, src_channels, shared, state_tx),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, src_channels, shared, state_tx),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, src_channels, shared, state_tx),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, src_channels, shared, state_tx),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    src_channels: usize,
    shared: &Arc<Shared>,
    state_tx: Sender<ClockState>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let shared_cb = shared.clone();
    let shared_err = shared.clone();
    let mut mix = vec![0.0f32; src_channels];

    let state_tx_cb = state_tx.clone();
    let err_fn = move |err: cpal::StreamError| note_stream_error(&shared_err, &err, &state_tx);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            note_rendering(&shared_cb, &state_tx_cb);
            let frames = data.len() / channels_out;
            let base = shared_cb.rendered_frames.load(Ordering::Relaxed);
            let gain = shared_cb.gain();

            let Ok(mut timeline) = shared_cb.timeline.lock() else {
                data.fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
                return;
            };

            for frame in 0..frames {
                let pos = base + frame as u64;
                render_position(&timeline, pos, &mut mix);
                for ch in 0..channels_out {
                    let sample = map_channel(&mix, channels_out, ch) * gain;
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }

            let end = base + frames as u64;
            advance_timeline(&mut timeline, end);
            drop(timeline);
            shared_cb.rendered_frames.store(end, Ordering::Relaxed);
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Whether a stream error halts rendering.
///
/// Underruns are reported while the stream keeps running; anything else may have stopped it.
fn stream_error_suspends(err: &cpal::StreamError) -> bool {
    !matches!(err, cpal::StreamError::BufferUnderrun)
}

fn note_stream_error(shared: &Shared, err: &cpal::StreamError, state_tx: &Sender<ClockState>) {
    if !stream_error_suspends(err) {
        tracing::warn!("output buffer underrun: {err}");
        return;
    }
    tracing::warn!("stream error: {err}");
    if shared.running.swap(false, Ordering::Relaxed) {
        let _ = state_tx.send(ClockState::Suspended);
    }
}

/// Called at the top of every callback; a stream that renders again after an error is running.
fn note_rendering(shared: &Shared, state_tx: &Sender<ClockState>) {
    if !shared.running.swap(true, Ordering::Relaxed) {
        tracing::info!("output stream rendering again");
        let _ = state_tx.send(ClockState::Running);
    }
}

/// Device frame index for a start time in seconds. Times before zero map to frame 0.
fn frame_position(start_time: f64, sample_rate: u32) -> u64 {
    (start_time * f64::from(sample_rate)).round().max(0.0) as u64
}

/// Drop frames that end at or before `end`; frames still sounding past `end` stay.
fn advance_timeline(timeline: &mut Vec<PendingFrame>, end: u64) {
    timeline.retain(|p| p.end() > end);
}

/// Sum every pending frame covering `pos` into `mix` (one slot per stream channel).
fn render_position(timeline: &[PendingFrame], pos: u64, mix: &mut [f32]) {
    mix.fill(0.0);
    for pending in timeline {
        if pos < pending.start || pos >= pending.end() {
            continue;
        }
        let idx = (pos - pending.start) as usize;
        for (slot, channel) in mix.iter_mut().zip(&pending.channels) {
            *slot += channel[idx];
        }
    }
}

/// Fetch one output sample for `dst_ch` after applying basic channel mapping.
///
/// Mapping rules:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - stereo → stereo: pass-through
/// - other layouts: best-effort “clamp to available channels”
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    let get_src = |ch: usize| src.get(ch).copied().unwrap_or(0.0);
    match (src.len(), dst_channels) {
        (1, 1) => get_src(0),
        (2, 2) => get_src(dst_ch.min(1)),
        (2, 1) => 0.5 * (get_src(0) + get_src(1)),
        (1, 2) => get_src(0),
        _ => get_src(dst_ch.min(src.len().saturating_sub(1))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(start: u64, left: &[f32], right: &[f32]) -> PendingFrame {
        PendingFrame {
            start,
            channels: vec![left.to_vec(), right.to_vec()],
        }
    }

    #[test]
    fn render_position_leaves_gaps_silent() {
        let timeline = vec![pending(10, &[1.0, 1.0], &[-1.0, -1.0])];
        let mut mix = vec![9.0; 2];
        render_position(&timeline, 9, &mut mix);
        assert_eq!(mix, vec![0.0, 0.0]);
        render_position(&timeline, 12, &mut mix);
        assert_eq!(mix, vec![0.0, 0.0]);
    }

    #[test]
    fn render_position_indexes_into_frame() {
        let timeline = vec![pending(100, &[0.1, 0.2, 0.3], &[0.4, 0.5, 0.6])];
        let mut mix = vec![0.0; 2];
        render_position(&timeline, 101, &mut mix);
        assert_eq!(mix, vec![0.2, 0.5]);
    }

    #[test]
    fn render_position_mixes_overlapping_frames() {
        let timeline = vec![
            pending(0, &[0.25; 4], &[0.5; 4]),
            pending(2, &[0.25; 4], &[0.25; 4]),
        ];
        let mut mix = vec![0.0; 2];
        render_position(&timeline, 3, &mut mix);
        assert_eq!(mix, vec![0.5, 0.75]);
    }

    #[test]
    fn pending_frame_end_counts_samples() {
        assert_eq!(pending(5, &[0.0; 3], &[0.0; 3]).end(), 8);
        let empty = PendingFrame {
            start: 7,
            channels: Vec::new(),
        };
        assert_eq!(empty.end(), 7);
    }

    fn shared() -> Shared {
        Shared {
            timeline: Mutex::new(Vec::new()),
            rendered_frames: AtomicU64::new(0),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            running: AtomicBool::new(true),
        }
    }

    #[test]
    fn underrun_keeps_clock_running() {
        let shared = shared();
        let (tx, rx) = crossbeam_channel::unbounded();
        note_stream_error(&shared, &cpal::StreamError::BufferUnderrun, &tx);
        assert!(shared.running.load(Ordering::Relaxed));
        assert!(rx.try_recv().is_err());

        note_rendering(&shared, &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn lost_device_suspends_until_rendering_resumes() {
        let shared = shared();
        let (tx, rx) = crossbeam_channel::unbounded();
        note_stream_error(&shared, &cpal::StreamError::DeviceNotAvailable, &tx);
        note_stream_error(&shared, &cpal::StreamError::DeviceNotAvailable, &tx);
        assert!(!shared.running.load(Ordering::Relaxed));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![ClockState::Suspended]);

        note_rendering(&shared, &tx);
        note_rendering(&shared, &tx);
        assert!(shared.running.load(Ordering::Relaxed));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![ClockState::Running]);
    }

    #[test]
    fn only_underruns_leave_the_stream_running() {
        assert!(!stream_error_suspends(&cpal::StreamError::BufferUnderrun));
        assert!(stream_error_suspends(&cpal::StreamError::DeviceNotAvailable));
    }

    #[test]
    fn frame_position_rounds_to_device_frames() {
        assert_eq!(frame_position(1.0, 48_000), 48_000);
        assert_eq!(frame_position(1.5, 44_100), 66_150);
        assert_eq!(frame_position(0.00001, 48_000), 0);
        assert_eq!(frame_position(-0.5, 48_000), 0);
    }

    #[test]
    fn late_frame_plays_its_remaining_samples() {
        let samples: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let mut timeline = vec![pending(90, &samples, &samples)];
        let mut mix = vec![0.0; 2];

        // The clock is already at 100 when the frame lands; it keeps its tail.
        advance_timeline(&mut timeline, 100);
        assert_eq!(timeline.len(), 1);
        render_position(&timeline, 100, &mut mix);
        assert_eq!(mix, vec![10.0, 10.0]);
        render_position(&timeline, 109, &mut mix);
        assert_eq!(mix, vec![19.0, 19.0]);

        advance_timeline(&mut timeline, 110);
        assert!(timeline.is_empty());
    }

    #[test]
    fn advance_timeline_keeps_future_frames() {
        let mut timeline = vec![
            pending(0, &[0.0; 10], &[0.0; 10]),
            pending(10, &[0.0; 10], &[0.0; 10]),
            pending(500, &[0.0; 10], &[0.0; 10]),
        ];
        advance_timeline(&mut timeline, 15);
        let starts: Vec<u64> = timeline.iter().map(|p| p.start).collect();
        assert_eq!(starts, vec![10, 500]);
    }

    #[test]
    fn map_channel_handles_common_layouts() {
        assert_eq!(map_channel(&[0.5], 2, 1), 0.5);
        assert!((map_channel(&[0.2, 0.6], 1, 0) - 0.4).abs() < 1e-6);
        assert_eq!(map_channel(&[0.2, 0.6], 2, 1), 0.6);
        assert_eq!(map_channel(&[0.1, 0.2, 0.3], 2, 1), 0.2);
        assert_eq!(map_channel(&[0.1, 0.2], 6, 5), 0.2);
    }
}
