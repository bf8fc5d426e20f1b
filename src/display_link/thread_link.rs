// src/display_link/thread_link.rs
//! Software display link: a dedicated clock thread paced at the refresh rate.
//!
//! The thread sleeps on its control channel with `recv_timeout` until the next
//! deadline, so a `Stop` command wakes it immediately instead of waiting out
//! the frame. Deadlines advance by whole intervals. A tick that overruns its
//! next deadline skips the deadlines it missed and waits for the first one
//! still ahead, so a slow tick delays the next one instead of triggering
//! catch-up ticks.

use super::{DisplayTimer, TickCallback, TickControl, TimerId, TimerSource};
use crate::error::{LoopError, LoopResult};
use crate::timing::interval_for;
use log::*;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug)]
enum ClockCommand {
    Stop,
}

/// Refresh-paced timer backed by its own thread.
pub struct ThreadDisplayLink {
    id: TimerId,
    interval: Duration,
    callback: Option<TickCallback>,
    control_tx: Option<Sender<ClockCommand>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ThreadDisplayLink {
    pub fn new(id: TimerId, refresh_hz: f64, callback: TickCallback) -> LoopResult<Self> {
        if !(refresh_hz.is_finite() && refresh_hz > 0.0) {
            return Err(LoopError::SetupFailure(format!(
                "invalid refresh rate {} Hz",
                refresh_hz
            )));
        }
        Ok(Self {
            id,
            interval: interval_for(refresh_hz),
            callback: Some(callback),
            control_tx: None,
            thread_handle: None,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_started(&self) -> bool {
        self.thread_handle.is_some()
    }
}

impl DisplayTimer for ThreadDisplayLink {
    fn id(&self) -> TimerId {
        self.id
    }

    fn start(&mut self) -> LoopResult<()> {
        let callback = self.callback.take().ok_or_else(|| {
            LoopError::SetupFailure(format!("{} was already started", self.id))
        })?;

        let (control_tx, control_rx) = mpsc::channel();
        let id = self.id;
        let interval = self.interval;

        let thread_handle = thread::Builder::new()
            .name(format!("vsync-{}", id.0))
            .spawn(move || run_clock(id, interval, control_rx, callback))
            .map_err(|e| {
                LoopError::SetupFailure(format!("failed to spawn clock thread for {}: {}", id, e))
            })?;

        info!(
            "ThreadDisplayLink {}: Started ({:.2}ms interval)",
            id,
            interval.as_secs_f64() * 1000.0
        );
        self.control_tx = Some(control_tx);
        self.thread_handle = Some(thread_handle);
        Ok(())
    }

    fn stop(&mut self) -> LoopResult<()> {
        // Dropping the sender after `Stop` also disconnects the channel, which
        // covers a clock that is between ticks.
        if let Some(tx) = self.control_tx.take() {
            let _ = tx.send(ClockCommand::Stop);
        }
        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };

        if handle.thread().id() == thread::current().id() {
            warn!(
                "ThreadDisplayLink {}: stop() called from its own tick, not joining",
                self.id
            );
            return Ok(());
        }

        handle.join().map_err(|e| {
            error!("ThreadDisplayLink {}: Clock thread panicked: {:?}", self.id, e);
            LoopError::SetupFailure(format!("clock thread for {} panicked", self.id))
        })?;
        debug!("ThreadDisplayLink {}: Stopped", self.id);
        Ok(())
    }
}

impl Drop for ThreadDisplayLink {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("ThreadDisplayLink {}: {}", self.id, e);
        }
    }
}

fn run_clock(
    id: TimerId,
    interval: Duration,
    control_rx: Receiver<ClockCommand>,
    mut callback: TickCallback,
) {
    let mut next = Instant::now() + interval;
    loop {
        let timeout = next.saturating_duration_since(Instant::now());
        match control_rx.recv_timeout(timeout) {
            Ok(ClockCommand::Stop) => break,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("ThreadDisplayLink {}: Control channel closed, exiting", id);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                if callback(now) == TickControl::Halt {
                    debug!("ThreadDisplayLink {}: Callback halted the clock", id);
                    break;
                }
                next += interval;
                let after = Instant::now();
                if next <= after {
                    next = skip_missed(next, after, interval);
                    trace!("ThreadDisplayLink {}: Fell behind, skipping to next deadline", id);
                }
            }
        }
    }
    debug!("ThreadDisplayLink {}: Thread exiting", id);
}

/// First deadline strictly after `after`, on the grid of `next + k * interval`.
fn skip_missed(next: Instant, after: Instant, interval: Duration) -> Instant {
    let period = interval.as_nanos().max(1);
    let missed = (after - next).as_nanos() / period + 1;
    let skip = u64::try_from(missed * period).unwrap_or(u64::MAX);
    next + Duration::from_nanos(skip)
}

/// Creates a [`ThreadDisplayLink`] per loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimerSource;

impl TimerSource for ThreadTimerSource {
    fn create_timer(
        &self,
        id: TimerId,
        refresh_hz: f64,
        callback: TickCallback,
    ) -> LoopResult<Box<dyn DisplayTimer>> {
        Ok(Box::new(ThreadDisplayLink::new(id, refresh_hz, callback)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn counting_callback(counter: Arc<AtomicU64>) -> TickCallback {
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        })
    }

    #[test_log::test]
    fn rejects_non_positive_refresh_rate() {
        let counter = Arc::new(AtomicU64::new(0));
        assert!(ThreadDisplayLink::new(TimerId::next(), 0.0, counting_callback(counter)).is_err());
    }

    #[test_log::test]
    fn ticks_until_stopped() {
        let counter = Arc::new(AtomicU64::new(0));
        let mut link =
            ThreadDisplayLink::new(TimerId::next(), 200.0, counting_callback(counter.clone()))
                .unwrap();
        link.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        link.stop().unwrap();

        let after_stop = counter.load(Ordering::SeqCst);
        assert!(after_stop >= 3, "expected several ticks, got {}", after_stop);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }

    #[test_log::test]
    fn halt_ends_delivery() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = counter.clone();
        let mut link = ThreadDisplayLink::new(
            TimerId::next(),
            200.0,
            Box::new(move |_| {
                if c.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                    TickControl::Halt
                } else {
                    TickControl::Continue
                }
            }),
        )
        .unwrap();
        link.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        link.stop().unwrap();
    }

    #[test]
    fn skip_missed_lands_on_the_next_future_deadline() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(10);
        assert_eq!(
            skip_missed(t0, t0 + Duration::from_millis(15), interval),
            t0 + Duration::from_millis(20)
        );
        assert_eq!(skip_missed(t0, t0, interval), t0 + interval);
    }

    #[test_log::test]
    fn slow_tick_delays_the_next_one() {
        let interval = Duration::from_millis(20);
        let (tx, rx) = std::sync::mpsc::channel();
        let mut calls = 0;
        let mut link = ThreadDisplayLink::new(
            TimerId::next(),
            50.0,
            Box::new(move |now| {
                calls += 1;
                if calls == 1 {
                    // Overrun by half an interval.
                    thread::sleep(interval + interval / 2);
                    let _ = tx.send(Instant::now());
                    TickControl::Continue
                } else {
                    let _ = tx.send(now);
                    TickControl::Halt
                }
            }),
        )
        .unwrap();
        link.start().unwrap();

        let slow_done = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let next = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        link.stop().unwrap();

        let gap = next.saturating_duration_since(slow_done);
        assert!(gap >= Duration::from_millis(2), "next tick fired after {:?}", gap);
    }

    #[test_log::test]
    fn second_start_is_rejected_and_stop_is_repeatable() {
        let counter = Arc::new(AtomicU64::new(0));
        let mut link =
            ThreadDisplayLink::new(TimerId::next(), 60.0, counting_callback(counter)).unwrap();
        link.start().unwrap();
        assert!(link.start().is_err());
        link.stop().unwrap();
        link.stop().unwrap();
        assert!(!link.is_started());
    }
}
