use serde::Serialize;

use crate::sink::ClockState;

/// Running totals kept by the player across its lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlayerCounters {
    /// Frames handed to the sink.
    pub frames_scheduled: u64,
    /// Flushes that found the scheduled start already in the past.
    pub underruns: u64,
    /// Flushes that found the backlog above the lag limit.
    pub lag_resets: u64,
    /// Chunks dropped because their length was not sample aligned.
    pub misaligned_chunks: u64,
    /// Chunks ignored while stopped or while the clock was not running.
    pub ignored_chunks: u64,
    /// Clock state observations that reset the schedule.
    pub clock_resets: u64,
}

/// Point-in-time view of a player, suitable for logging or an API response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub playing: bool,
    pub clock: ClockState,
    /// Sink clock time in seconds.
    pub clock_now: f64,
    /// Where the next frame will start; `None` until a schedule is anchored.
    pub next_start_time: Option<f64>,
    /// Scheduled audio ahead of the clock, in milliseconds.
    pub backlog_ms: Option<f64>,
    /// Interleaved samples waiting in the accumulation buffer.
    pub buffered_samples: usize,
    pub volume: f32,
    pub counters: PlayerCounters,
}

impl StatusSnapshot {
    pub(crate) fn new(
        playing: bool,
        clock: ClockState,
        clock_now: f64,
        next_start_time: f64,
        buffered_samples: usize,
        volume: f32,
        counters: PlayerCounters,
    ) -> Self {
        let anchored = (next_start_time != 0.0).then_some(next_start_time);
        Self {
            playing,
            clock,
            clock_now,
            next_start_time: anchored,
            backlog_ms: anchored.map(|t| ((t - clock_now) * 1000.0).max(0.0)),
            buffered_samples,
            volume,
            counters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_backlog_when_anchored() {
        let snap = StatusSnapshot::new(
            true,
            ClockState::Running,
            1.0,
            1.25,
            10,
            0.5,
            PlayerCounters::default(),
        );
        assert_eq!(snap.next_start_time, Some(1.25));
        assert_eq!(snap.backlog_ms, Some(250.0));
        assert_eq!(snap.buffered_samples, 10);
    }

    #[test]
    fn snapshot_hides_unanchored_schedule() {
        let snap = StatusSnapshot::new(
            false,
            ClockState::Suspended,
            3.0,
            0.0,
            0,
            1.0,
            PlayerCounters::default(),
        );
        assert!(snap.next_start_time.is_none());
        assert!(snap.backlog_ms.is_none());
    }

    #[test]
    fn backlog_never_negative() {
        let snap = StatusSnapshot::new(
            true,
            ClockState::Running,
            2.0,
            1.5,
            0,
            1.0,
            PlayerCounters::default(),
        );
        assert_eq!(snap.backlog_ms, Some(0.0));
    }
}
