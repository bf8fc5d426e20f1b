// src/profiler.rs
//! Frame profiler: a ring buffer of the most recent frame records.

use std::collections::VecDeque;
use std::time::Duration;

/// Largest history a profiler keeps.
pub const MAX_HISTORY_LEN: usize = 10_000;

/// Timing of one delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRecord {
    pub index: u64,
    /// Time spent in `Backend::update`.
    pub update: Duration,
    /// Time spent in `Backend::render` plus present.
    pub render: Duration,
    /// Measured interval since the previous frame started.
    pub interval: Duration,
}

impl FrameRecord {
    pub fn work(&self) -> Duration {
        self.update + self.render
    }
}

/// Snapshot of loop statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Frames delivered since start.
    pub frames: u64,
    /// Frames that hit a backend error, counted once per frame. Under
    /// fail-fast the frame that halts the loop is counted here but not in
    /// `frames`.
    pub failed_frames: u64,
    /// Work time (update + render) of the most recent frame.
    pub last_work: Duration,
    /// Mean work time over the history window.
    pub average_work: Duration,
    /// Worst work time over the history window.
    pub worst_work: Duration,
    /// Frames per second measured from frame intervals in the window.
    pub fps: f64,
}

#[derive(Debug)]
pub struct FrameProfiler {
    records: VecDeque<FrameRecord>,
    capacity: usize,
    frames: u64,
    failed_frames: u64,
}

impl FrameProfiler {
    /// `capacity` is clamped to `1..=MAX_HISTORY_LEN`.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_HISTORY_LEN);
        Self {
            records: VecDeque::new(),
            capacity,
            frames: 0,
            failed_frames: 0,
        }
    }

    pub fn record(&mut self, record: FrameRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
        self.frames += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed_frames += 1;
    }

    pub fn last(&self) -> Option<&FrameRecord> {
        self.records.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &FrameRecord> {
        self.records.iter()
    }

    pub fn stats(&self) -> FrameStats {
        let mut stats = FrameStats {
            frames: self.frames,
            failed_frames: self.failed_frames,
            ..FrameStats::default()
        };
        if self.records.is_empty() {
            return stats;
        }

        let mut total = Duration::ZERO;
        for record in &self.records {
            let work = record.work();
            total += work;
            stats.worst_work = stats.worst_work.max(work);
        }
        stats.average_work = total / self.records.len() as u32;
        stats.last_work = self.records.back().map(FrameRecord::work).unwrap_or_default();

        // The first frame of a loop has a zero interval, skip it.
        let intervals: Vec<Duration> = self
            .records
            .iter()
            .map(|r| r.interval)
            .filter(|i| !i.is_zero())
            .collect();
        if !intervals.is_empty() {
            let sum: Duration = intervals.iter().sum();
            let mean = sum.as_secs_f64() / intervals.len() as f64;
            if mean > 0.0 {
                stats.fps = 1.0 / mean;
            }
        }
        stats
    }
}
