//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config that runs at exactly the stream's sample rate

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose an output config running at exactly `rate` Hz.
///
/// Among ranges that contain `rate`, prefers one with at least `channels` channels and then
/// the most precise sample format. Fails when the device cannot run at `rate`, since the
/// player never resamples.
pub fn pick_output_config(
    device: &cpal::Device,
    rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<(bool, u16, u8, cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        if rate < range.min_sample_rate() || rate > range.max_sample_rate() {
            continue;
        }
        let covers = range.channels() >= channels;
        let format_rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((b_covers, b_channels, b_rank, _)) => is_better_candidate(
                covers,
                range.channels(),
                channels,
                format_rank,
                *b_covers,
                *b_channels,
                *b_rank,
            ),
        };
        if replace {
            best = Some((covers, range.channels(), format_rank, range));
        }
    }

    match best {
        Some((_, _, _, range)) => Ok(range.with_sample_rate(rate)),
        None => bail!("output device cannot run at {rate} Hz"),
    }
}

/// Pick a fixed callback buffer close to `target_frames`.
///
/// Small callbacks keep the rendered clock close to wall time so the player's lag checks see
/// an even cadence. Returns `None` when the device only supports its default size.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    target_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(target_frames.clamp(*min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Prefer ranges that carry every stream channel, then the channel count nearest the stream,
/// then the better sample format.
fn is_better_candidate(
    covers: bool,
    range_channels: u16,
    want_channels: u16,
    format_rank: u8,
    best_covers: bool,
    best_channels: u16,
    best_rank: u8,
) -> bool {
    if covers != best_covers {
        covers
    } else if range_channels != best_channels {
        range_channels.abs_diff(want_channels) < best_channels.abs_diff(want_channels)
    } else {
        format_rank < best_rank
    }
}

/// Print available output devices to stdout.
///
/// This is intended for CLI UX (`--list-devices`) rather than structured output.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        println!("#{i}: {}", d.description()?);
    }
    Ok(())
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
