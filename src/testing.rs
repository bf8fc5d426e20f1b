// src/testing.rs
//! Test doubles: a hand-cranked timer source and a recording backend.

use crate::backend::Backend;
use crate::display_link::{DisplayTimer, TickCallback, TickControl, TimerId, TimerSource};
use crate::error::{LoopError, LoopResult};
use crate::timing::FrameTick;
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Manual timer
// ============================================================================

struct ManualTimerState {
    callback: TickCallback,
    started: bool,
    stopped: bool,
    halted: bool,
}

/// Timer source whose timers only fire when the test says so.
///
/// `fire` runs the callback on the calling thread while holding the timer's
/// lock, so a concurrent `stop` waits for it exactly like a joined clock thread.
#[derive(Default)]
pub struct ManualTimerSource {
    timers: Mutex<BTreeMap<TimerId, Arc<Mutex<ManualTimerState>>>>,
    requested_rates: Mutex<Vec<f64>>,
    created: AtomicUsize,
    released: Arc<AtomicUsize>,
    fail_create: AtomicBool,
    fail_start: Arc<AtomicBool>,
}

impl ManualTimerSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `create_timer` fail.
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make every later `DisplayTimer::start` fail.
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Fire `id` once. Returns `None` if the timer is unknown, not started,
    /// stopped, or halted; otherwise what the callback returned.
    pub fn fire(&self, id: TimerId) -> Option<TickControl> {
        self.fire_at(id, Instant::now())
    }

    pub fn fire_at(&self, id: TimerId, now: Instant) -> Option<TickControl> {
        let timer = lock(&self.timers).get(&id).cloned()?;
        let mut state = lock(&timer);
        if !state.started || state.stopped || state.halted {
            return None;
        }
        let control = (state.callback)(now);
        if control == TickControl::Halt {
            state.halted = true;
        }
        Some(control)
    }

    /// Fire every started timer once, in id order.
    pub fn fire_all(&self) -> usize {
        let ids: Vec<TimerId> = lock(&self.timers).keys().copied().collect();
        ids.into_iter().filter(|id| self.fire(*id).is_some()).count()
    }

    /// Timers created and not yet stopped or dropped.
    pub fn live_timers(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }

    pub fn created_timers(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Refresh rates passed to `create_timer`, in order.
    pub fn requested_rates(&self) -> Vec<f64> {
        lock(&self.requested_rates).clone()
    }
}

impl TimerSource for ManualTimerSource {
    fn create_timer(
        &self,
        id: TimerId,
        refresh_hz: f64,
        callback: TickCallback,
    ) -> LoopResult<Box<dyn DisplayTimer>> {
        lock(&self.requested_rates).push(refresh_hz);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(LoopError::SetupFailure("manual timer creation refused".into()));
        }
        let state = Arc::new(Mutex::new(ManualTimerState {
            callback,
            started: false,
            stopped: false,
            halted: false,
        }));
        lock(&self.timers).insert(id, state.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ManualTimer {
            id,
            state,
            released: self.released.clone(),
            fail_start: self.fail_start.clone(),
            was_released: false,
        }))
    }
}

struct ManualTimer {
    id: TimerId,
    state: Arc<Mutex<ManualTimerState>>,
    released: Arc<AtomicUsize>,
    fail_start: Arc<AtomicBool>,
    was_released: bool,
}

impl ManualTimer {
    fn release(&mut self) {
        if !self.was_released {
            self.was_released = true;
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl DisplayTimer for ManualTimer {
    fn id(&self) -> TimerId {
        self.id
    }

    fn start(&mut self) -> LoopResult<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(LoopError::SetupFailure("manual timer start refused".into()));
        }
        let mut state = lock(&self.state);
        if state.started {
            return Err(LoopError::SetupFailure(format!("{} already started", self.id)));
        }
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) -> LoopResult<()> {
        // Waits for an in-flight `fire`.
        lock(&self.state).stopped = true;
        self.release();
        Ok(())
    }
}

impl Drop for ManualTimer {
    fn drop(&mut self) {
        lock(&self.state).stopped = true;
        self.release();
    }
}

// ============================================================================
// Recording backend
// ============================================================================

/// One backend call, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Initialize,
    Resize(u32, u32),
    Update(u64),
    Render,
}

#[derive(Default)]
struct Script {
    fail_initialize: bool,
    fail_update_at: Option<u64>,
    fail_render_at: Option<u64>,
    render_delay: Duration,
}

/// Backend that records every call into a shared log.
///
/// Clone the [`BackendProbe`] before handing the backend to the driver to
/// inspect the calls afterwards.
pub struct RecordingBackend {
    calls: Arc<Mutex<Vec<BackendCall>>>,
    script: Script,
    renders: u64,
    render_started: Option<std::sync::mpsc::Sender<()>>,
}

/// Read side of a [`RecordingBackend`].
#[derive(Clone)]
pub struct BackendProbe {
    calls: Arc<Mutex<Vec<BackendCall>>>,
}

impl RecordingBackend {
    pub fn new() -> (Self, BackendProbe) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                calls: calls.clone(),
                script: Script::default(),
                renders: 0,
                render_started: None,
            },
            BackendProbe { calls },
        )
    }

    pub fn failing_initialize(mut self) -> Self {
        self.script.fail_initialize = true;
        self
    }

    /// Fail `update` for the frame with this 0-based index.
    pub fn failing_update_at(mut self, frame: u64) -> Self {
        self.script.fail_update_at = Some(frame);
        self
    }

    /// Fail the `n`th (0-based) `render` call.
    pub fn failing_render_at(mut self, n: u64) -> Self {
        self.script.fail_render_at = Some(n);
        self
    }

    /// Sleep this long inside every `render`.
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.script.render_delay = delay;
        self
    }

    /// Signal `tx` whenever a `render` begins.
    pub fn notify_render_start(mut self, tx: std::sync::mpsc::Sender<()>) -> Self {
        self.render_started = Some(tx);
        self
    }

    fn push(&self, call: BackendCall) {
        lock(&self.calls).push(call);
    }
}

impl Backend for RecordingBackend {
    fn initialize(&mut self) -> Result<()> {
        self.push(BackendCall::Initialize);
        if self.script.fail_initialize {
            bail!("scripted initialize failure");
        }
        Ok(())
    }

    fn update(&mut self, tick: &FrameTick) -> Result<()> {
        self.push(BackendCall::Update(tick.frame_index));
        if self.script.fail_update_at == Some(tick.frame_index) {
            bail!("scripted update failure at frame {}", tick.frame_index);
        }
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        if let Some(tx) = &self.render_started {
            let _ = tx.send(());
        }
        if !self.script.render_delay.is_zero() {
            thread::sleep(self.script.render_delay);
        }
        self.push(BackendCall::Render);
        let n = self.renders;
        self.renders += 1;
        if self.script.fail_render_at == Some(n) {
            bail!("scripted render failure on call {}", n);
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.push(BackendCall::Resize(width, height));
        Ok(())
    }
}

impl BackendProbe {
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    pub fn initializes(&self) -> usize {
        self.count(|c| *c == BackendCall::Initialize)
    }

    pub fn updates(&self) -> usize {
        self.count(|c| matches!(c, BackendCall::Update(_)))
    }

    pub fn renders(&self) -> usize {
        self.count(|c| *c == BackendCall::Render)
    }
}
