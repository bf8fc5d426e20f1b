// src/driver/entry.rs
//! Per-loop state shared between the owning thread and the timer thread.
//!
//! The owning thread flips `running` and reads stats; the timer thread runs
//! `tick`. The backend lives behind `core`, and `tick` holds that lock for
//! the whole update/render/present sequence, so taking the lock on the owning
//! thread is a barrier against an in-flight frame.

use crate::backend::Backend;
use crate::config::FailurePolicy;
use crate::display_link::{TickControl, TimerId};
use crate::error::{FramePhase, LoopError};
use crate::profiler::{FrameProfiler, FrameRecord, FrameStats};
use crate::surface::{Surface, SurfaceId};
use crate::timing::{FrameClock, FrameTick};
use log::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

pub(crate) struct LoopCore {
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) clock: FrameClock,
    pub(crate) profiler: FrameProfiler,
}

pub(crate) struct LoopEntry {
    timer_id: TimerId,
    surface_id: SurfaceId,
    surface: Weak<dyn Surface>,
    policy: FailurePolicy,
    running: AtomicBool,
    core: Mutex<LoopCore>,
    pending_resize: Mutex<Option<(u32, u32)>>,
    fault: Mutex<Option<LoopError>>,
}

/// Locks ignoring poison. A panicking backend poisons `core`; teardown still
/// has to get through it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LoopEntry {
    pub(crate) fn new(
        timer_id: TimerId,
        surface_id: SurfaceId,
        surface: Weak<dyn Surface>,
        policy: FailurePolicy,
        core: LoopCore,
    ) -> Self {
        Self {
            timer_id,
            surface_id,
            surface,
            policy,
            running: AtomicBool::new(false),
            core: Mutex::new(core),
            pending_resize: Mutex::new(None),
            fault: Mutex::new(None),
        }
    }

    pub(crate) fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    pub(crate) fn surface_id(&self) -> SurfaceId {
        self.surface_id
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Blocks until no tick is executing.
    pub(crate) fn wait_for_tick(&self) {
        drop(lock(&self.core));
    }

    pub(crate) fn queue_resize(&self, width: u32, height: u32) {
        *lock(&self.pending_resize) = Some((width, height));
    }

    pub(crate) fn is_faulted(&self) -> bool {
        lock(&self.fault).is_some()
    }

    pub(crate) fn take_fault(&self) -> Option<LoopError> {
        lock(&self.fault).take()
    }

    pub(crate) fn stats(&self) -> FrameStats {
        lock(&self.core).profiler.stats()
    }

    /// One frame: pending resize, update, render, present.
    pub(crate) fn tick(&self, now: Instant) -> TickControl {
        if !self.is_running() || self.is_faulted() {
            return TickControl::Halt;
        }
        let Some(surface) = self.surface.upgrade() else {
            debug!(
                "Loop {}: {} is gone, halting ticks",
                self.timer_id, self.surface_id
            );
            return TickControl::Halt;
        };

        let mut core = lock(&self.core);
        // `stop` may have cleared the flag while this tick waited on the lock.
        if !self.is_running() {
            return TickControl::Halt;
        }
        let LoopCore {
            backend,
            clock,
            profiler,
        } = &mut *core;

        let frame = clock.frames();
        let mut failed = false;

        let resize = lock(&self.pending_resize).take();
        if let Some((width, height)) = resize {
            debug!("Loop {}: Resize to {}x{}", self.timer_id, width, height);
            if let Err(e) = backend.resize(width, height) {
                let control = self.fail(profiler, &mut failed, FramePhase::Resize, frame, e);
                if control == TickControl::Halt {
                    return TickControl::Halt;
                }
            }
        }

        let tick = clock.advance(now);
        trace!(
            "Loop {}: Frame {} (dt {:.3}ms)",
            self.timer_id,
            tick.frame_index,
            tick.delta.as_secs_f64() * 1000.0
        );

        let started = Instant::now();
        if let Err(e) = backend.update(&tick) {
            let control = self.fail(profiler, &mut failed, FramePhase::Update, frame, e);
            if control == TickControl::Halt {
                return TickControl::Halt;
            }
        }
        let updated = Instant::now();

        if let Err(e) = backend.render() {
            let control = self.fail(profiler, &mut failed, FramePhase::Render, frame, e);
            if control == TickControl::Halt {
                return TickControl::Halt;
            }
        }
        if let Err(e) = surface.present() {
            let control = self.fail(profiler, &mut failed, FramePhase::Present, frame, e);
            if control == TickControl::Halt {
                return TickControl::Halt;
            }
        }
        let finished = Instant::now();

        profiler.record(record_for(&tick, started, updated, finished));
        TickControl::Continue
    }

    /// Applies the failure policy. `failed` makes a frame count once in the
    /// stats however many of its phases fail.
    fn fail(
        &self,
        profiler: &mut FrameProfiler,
        failed: &mut bool,
        phase: FramePhase,
        frame: u64,
        source: anyhow::Error,
    ) -> TickControl {
        if !*failed {
            *failed = true;
            profiler.record_failure();
        }
        let error = LoopError::BackendFailure {
            phase,
            frame,
            source,
        };
        match self.policy {
            FailurePolicy::FailFast => {
                error!("Loop {}: {}. Halting loop.", self.timer_id, error);
                let mut fault = lock(&self.fault);
                if fault.is_none() {
                    *fault = Some(error);
                }
                TickControl::Halt
            }
            FailurePolicy::LogAndContinue => {
                warn!("Loop {}: {}. Continuing.", self.timer_id, error);
                TickControl::Continue
            }
        }
    }
}

fn record_for(tick: &FrameTick, started: Instant, updated: Instant, finished: Instant) -> FrameRecord {
    FrameRecord {
        index: tick.frame_index,
        update: updated.saturating_duration_since(started),
        render: finished.saturating_duration_since(updated),
        interval: if tick.frame_index == 0 {
            Duration::ZERO
        } else {
            tick.raw_delta
        },
    }
}
