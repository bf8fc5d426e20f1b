// src/timing.rs
//! Per-frame timing handed to the backend.

use std::time::{Duration, Instant};

/// Timing for one tick, passed to `Backend::update`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTick {
    /// 0-based index of this frame within the loop.
    pub frame_index: u64,
    /// When the timer fired.
    pub timestamp: Instant,
    /// Nominal interval of the timer that produced this tick.
    pub refresh_interval: Duration,
    /// Measured time since the previous tick (zero for the first tick).
    pub raw_delta: Duration,
    /// `raw_delta` clamped to the configured maximum.
    pub delta: Duration,
}

impl FrameTick {
    /// Clamped delta in seconds, the usual simulation step.
    pub fn dt(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// True when the measured delta was cut down by the clamp.
    pub fn was_clamped(&self) -> bool {
        self.raw_delta > self.delta
    }
}

/// Turns timer firings into [`FrameTick`]s.
#[derive(Debug)]
pub struct FrameClock {
    refresh_interval: Duration,
    max_delta: Duration,
    last: Option<Instant>,
    frame_index: u64,
}

impl FrameClock {
    pub fn new(refresh_interval: Duration, max_delta: Duration) -> Self {
        Self {
            refresh_interval,
            max_delta,
            last: None,
            frame_index: 0,
        }
    }

    /// Records a firing at `now` and returns the tick for it.
    pub fn advance(&mut self, now: Instant) -> FrameTick {
        let raw_delta = match self.last {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::ZERO,
        };
        self.last = Some(now);

        let tick = FrameTick {
            frame_index: self.frame_index,
            timestamp: now,
            refresh_interval: self.refresh_interval,
            raw_delta,
            delta: raw_delta.min(self.max_delta),
        };
        self.frame_index += 1;
        tick
    }

    /// Number of ticks produced so far.
    pub fn frames(&self) -> u64 {
        self.frame_index
    }
}

/// Nominal interval for a refresh rate in Hz.
pub fn interval_for(refresh_hz: f64) -> Duration {
    Duration::from_secs_f64(1.0 / refresh_hz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_has_zero_delta() {
        let mut clock = FrameClock::new(interval_for(60.0), Duration::from_millis(100));
        let tick = clock.advance(Instant::now());
        assert_eq!(tick.frame_index, 0);
        assert_eq!(tick.delta, Duration::ZERO);
        assert!(!tick.was_clamped());
    }

    #[test]
    fn delta_measures_time_between_ticks() {
        let mut clock = FrameClock::new(interval_for(60.0), Duration::from_millis(100));
        let t0 = Instant::now();
        clock.advance(t0);
        let tick = clock.advance(t0 + Duration::from_millis(16));
        assert_eq!(tick.frame_index, 1);
        assert_eq!(tick.delta, Duration::from_millis(16));
        assert_eq!(clock.frames(), 2);
    }

    #[test]
    fn long_stall_is_clamped() {
        let mut clock = FrameClock::new(interval_for(60.0), Duration::from_millis(100));
        let t0 = Instant::now();
        clock.advance(t0);
        let tick = clock.advance(t0 + Duration::from_secs(3));
        assert_eq!(tick.raw_delta, Duration::from_secs(3));
        assert_eq!(tick.delta, Duration::from_millis(100));
        assert!(tick.was_clamped());
    }

    #[test]
    fn interval_matches_rate() {
        let interval = interval_for(50.0);
        assert_eq!(interval, Duration::from_millis(20));
    }
}
