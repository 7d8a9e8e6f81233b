//! Schedulable multi-channel frames and edge fading.

/// A block of deinterleaved samples bound to a start time on the sink clock.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledFrame {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
    /// Sink clock time (seconds) at which the first sample must play.
    pub start_time: f64,
}

impl ScheduledFrame {
    /// Allocate a silent frame of `samples` per channel.
    pub fn new(channel_count: usize, samples: usize, sample_rate: u32) -> Self {
        Self {
            channels: vec![vec![0.0; samples]; channel_count],
            sample_rate,
            start_time: 0.0,
        }
    }

    /// Build a frame by splitting an interleaved buffer.
    ///
    /// Sample `i` of channel `c` is taken from `interleaved[i * channel_count + c]`.
    pub fn from_interleaved(interleaved: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        let samples = interleaved.len() / channel_count;
        let mut frame = Self::new(channel_count, samples, sample_rate);
        for (c, channel) in frame.channels.iter_mut().enumerate() {
            for (i, slot) in channel.iter_mut().enumerate() {
                *slot = interleaved[i * channel_count + c];
            }
        }
        frame
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_seconds(&self) -> f64 {
        self.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Apply [`fade_edges`] to every channel.
    pub fn fade_edges(&mut self, fade_samples: usize) {
        for channel in &mut self.channels {
            fade_edges(channel, fade_samples);
        }
    }
}

/// Linear fade-in over the first `n` samples and fade-out over the last `n + 1`.
///
/// The fade-in weight of sample `i` is `i / n`; the fade-out walks `n / n` down to `0 / n`,
/// so the final sample is silent. The window is a fixed number of samples regardless of the
/// frame length, and both ramps apply when they overlap.
pub fn fade_edges(samples: &mut [f32], n: usize) {
    if n == 0 {
        return;
    }
    let len = samples.len();
    let scale = n as f32;
    for (i, s) in samples.iter_mut().enumerate().take(n) {
        *s = *s * i as f32 / scale;
    }
    let tail = len.saturating_sub(n + 1);
    let mut weight = n;
    for s in &mut samples[tail..] {
        *s = *s * weight as f32 / scale;
        weight = weight.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleaves_by_channel() {
        let frame = ScheduledFrame::from_interleaved(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2, 48_000);
        assert_eq!(frame.channel_count(), 2);
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.channel(0), &[1.0, 2.0, 3.0]);
        assert_eq!(frame.channel(1), &[-1.0, -2.0, -3.0]);
    }

    #[test]
    fn duration_follows_sample_count() {
        let frame = ScheduledFrame::new(2, 882, 44_100);
        assert_eq!(frame.duration_seconds(), 0.02);
        assert!(ScheduledFrame::new(1, 0, 8_000).is_empty());
    }

    #[test]
    fn fade_window_is_fixed_length() {
        let mut samples = vec![1.0f32; 400];
        fade_edges(&mut samples, 50);

        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[25], 0.5);
        assert_eq!(samples[49], 49.0 / 50.0);
        assert_eq!(samples[50], 1.0);
        assert_eq!(samples[348], 1.0);
        assert_eq!(samples[349], 1.0);
        assert_eq!(samples[374], 0.5);
        assert_eq!(samples[398], 1.0 / 50.0);
        assert_eq!(samples[399], 0.0);
    }

    #[test]
    fn fade_windows_overlap_on_short_frames() {
        let mut samples = vec![1.0f32; 60];
        fade_edges(&mut samples, 50);
        // Index 9 is the first fade-out sample (weight 50/50) and also faded in by 9/50.
        assert!((samples[9] - 9.0 / 50.0).abs() < 1e-6);
        // Index 10: fade-in 10/50 then fade-out 49/50.
        assert!((samples[10] - (10.0 / 50.0) * (49.0 / 50.0)).abs() < 1e-6);
        assert_eq!(samples[59], 0.0);
    }

    #[test]
    fn fade_handles_frames_shorter_than_window() {
        let mut samples = vec![1.0f32; 10];
        fade_edges(&mut samples, 50);
        assert_eq!(samples[0], 0.0);
        assert!(samples.iter().all(|s| (0.0..=1.0).contains(s)));

        let mut untouched = vec![1.0f32; 4];
        fade_edges(&mut untouched, 0);
        assert_eq!(untouched, vec![1.0; 4]);
    }

    #[test]
    fn frame_fade_applies_to_all_channels() {
        let mut frame = ScheduledFrame::from_interleaved(&[1.0; 400], 2, 44_100);
        frame.fade_edges(50);
        for c in 0..2 {
            assert_eq!(frame.channel(c)[0], 0.0);
            assert_eq!(frame.channel(c)[199], 0.0);
            assert_eq!(frame.channel(c)[100], 1.0);
        }
    }
}
