//! Output sink boundary.
//!
//! A sink owns the audio clock and accepts frames bound to start times on that clock. The
//! player never waits on a sink: `submit` hands the frame over and returns.

use serde::Serialize;

use crate::frame::ScheduledFrame;

/// Observable state of a sink's clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockState {
    /// Clock is advancing and scheduled frames will render.
    #[default]
    Running,
    /// Clock is halted (device interrupted, paused by the platform).
    Suspended,
    /// Sink has been released.
    Closed,
}

impl ClockState {
    pub fn is_running(self) -> bool {
        self == ClockState::Running
    }
}

/// Platform audio output as seen by the player.
pub trait OutputSink {
    /// Current clock time in seconds. Monotonic while running.
    fn now(&self) -> f64;

    /// Clock state at construction time; later changes are delivered as messages.
    fn clock_state(&self) -> ClockState;

    /// Queue `frame` to start at `frame.start_time`.
    fn submit(&mut self, frame: ScheduledFrame);

    /// Output gain in `[0, 1]`.
    fn set_gain(&mut self, gain: f32);

    /// Release the device. Must be idempotent.
    fn close(&mut self);
}

/// In-memory sink with a manually advanced clock.
///
/// Records every submitted frame; useful for offline rendering and for driving the scheduler
/// deterministically.
#[derive(Debug)]
pub struct ManualSink {
    now: f64,
    state: ClockState,
    gain: f32,
    closed: bool,
    frames: Vec<ScheduledFrame>,
}

impl Default for ManualSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualSink {
    pub fn new() -> Self {
        Self {
            now: 0.0,
            state: ClockState::Running,
            gain: 1.0,
            closed: false,
            frames: Vec::new(),
        }
    }

    /// Start with the clock in `state`.
    pub fn with_state(state: ClockState) -> Self {
        Self {
            state,
            ..Self::new()
        }
    }

    pub fn set_now(&mut self, seconds: f64) {
        self.now = seconds;
    }

    pub fn advance(&mut self, seconds: f64) {
        self.now += seconds;
    }

    pub fn frames(&self) -> &[ScheduledFrame] {
        &self.frames
    }

    /// Remove and return the recorded frames.
    pub fn take_frames(&mut self) -> Vec<ScheduledFrame> {
        std::mem::take(&mut self.frames)
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl OutputSink for ManualSink {
    fn now(&self) -> f64 {
        self.now
    }

    fn clock_state(&self) -> ClockState {
        if self.closed { ClockState::Closed } else { self.state }
    }

    fn submit(&mut self, frame: ScheduledFrame) {
        if !self.closed {
            self.frames.push(frame);
        }
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_sink_records_until_closed() {
        let mut sink = ManualSink::new();
        assert_eq!(sink.gain(), 1.0);
        sink.submit(ScheduledFrame::new(1, 4, 8_000));
        sink.close();
        sink.close();
        sink.submit(ScheduledFrame::new(1, 4, 8_000));
        assert_eq!(sink.frames().len(), 1);
        assert_eq!(sink.clock_state(), ClockState::Closed);
    }

    #[test]
    fn manual_clock_advances() {
        let mut sink = ManualSink::with_state(ClockState::Suspended);
        assert_eq!(sink.clock_state(), ClockState::Suspended);
        sink.set_now(1.5);
        sink.advance(0.25);
        assert_eq!(sink.now(), 1.75);
    }
}
