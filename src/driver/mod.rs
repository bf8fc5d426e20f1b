// src/driver/mod.rs
//! RenderLoopDriver - drives a backend from a display-refresh timer.
//!
//! Threading model:
//! - `start`/`stop` run on the thread that owns the surface. The handle is
//!   taken by `&mut`, so the two can never interleave.
//! - Ticks arrive on the timer's own thread and reach the loop through the
//!   registry by `TimerId`. Nothing on the tick path owns the surface.
//!
//! Lifecycle: `Created -> Running -> Stopped`, one way. A stopped handle is
//! never restarted; create a new one.

mod entry;
mod registry;

#[cfg(test)]
mod tests;

use crate::backend::Backend;
use crate::config::{Config, DriverConfig, TimingConfig};
use crate::display_link::{DisplayTimer, ThreadTimerSource, TickCallback, TimerId, TimerSource};
use crate::error::{FramePhase, LoopError, LoopResult, LoopState};
use crate::profiler::{FrameProfiler, FrameStats};
use crate::surface::{Surface, SurfaceId};
use crate::timing::{interval_for, FrameClock};
use entry::{LoopCore, LoopEntry};
use log::*;
use registry::LoopRegistry;
use std::sync::{Arc, Weak};

/// Creates and tears down render loops.
pub struct RenderLoopDriver {
    registry: Arc<LoopRegistry>,
    timers: Arc<dyn TimerSource>,
    timing: TimingConfig,
    driver: DriverConfig,
}

impl RenderLoopDriver {
    /// Driver using a software display link per loop.
    pub fn new(config: &Config) -> Self {
        Self::with_timer_source(config, Arc::new(ThreadTimerSource))
    }

    pub fn with_timer_source(config: &Config, timers: Arc<dyn TimerSource>) -> Self {
        Self {
            registry: Arc::new(LoopRegistry::new()),
            timers,
            timing: config.timing.clone(),
            driver: config.driver.clone(),
        }
    }

    /// Binds `backend` to `surface` without starting anything.
    pub fn create<S>(&self, surface: &Arc<S>, backend: impl Backend + 'static) -> RenderLoopHandle
    where
        S: Surface + 'static,
    {
        let surface: Arc<dyn Surface> = surface.clone();
        self.create_dyn(&surface, backend)
    }

    /// [`create`](Self::create) for a host that only holds a trait object.
    pub fn create_dyn(
        &self,
        surface: &Arc<dyn Surface>,
        backend: impl Backend + 'static,
    ) -> RenderLoopHandle {
        RenderLoopHandle {
            timer_id: TimerId::next(),
            surface_id: surface.id(),
            surface: Arc::downgrade(surface),
            state: LoopState::Created,
            backend: Some(Box::new(backend)),
            entry: None,
            timer: None,
            registry: self.registry.clone(),
            timers: self.timers.clone(),
            timing: self.timing.clone(),
            driver: self.driver.clone(),
        }
    }

    /// Initializes `backend` and starts ticking it at `surface`'s refresh rate.
    pub fn start<S>(
        &self,
        surface: &Arc<S>,
        backend: impl Backend + 'static,
    ) -> LoopResult<RenderLoopHandle>
    where
        S: Surface + 'static,
    {
        let surface: Arc<dyn Surface> = surface.clone();
        self.start_dyn(&surface, backend)
    }

    pub fn start_dyn(
        &self,
        surface: &Arc<dyn Surface>,
        backend: impl Backend + 'static,
    ) -> LoopResult<RenderLoopHandle> {
        let mut handle = self.create_dyn(surface, backend);
        handle.start()?;
        Ok(handle)
    }

    /// `Created -> Running` for a handle made by [`create`](Self::create).
    pub fn start_handle(&self, handle: &mut RenderLoopHandle) -> LoopResult<()> {
        handle.start()
    }

    /// `Running -> Stopped`. Returns the final frame statistics.
    pub fn stop(&self, handle: &mut RenderLoopHandle) -> LoopResult<FrameStats> {
        handle.stop()
    }

    /// Number of loops currently registered for ticks.
    pub fn active_loops(&self) -> usize {
        self.registry.len()
    }

    /// Timer currently driving `surface`, if any.
    pub fn active_for(&self, surface: SurfaceId) -> Option<TimerId> {
        self.registry.active_for(surface)
    }
}

impl Default for RenderLoopDriver {
    fn default() -> Self {
        Self::new(&crate::config::CONFIG)
    }
}

/// The live timer registration bound to one surface.
///
/// Owned by whoever owns the surface. Dropping a running handle stops it.
pub struct RenderLoopHandle {
    timer_id: TimerId,
    surface_id: SurfaceId,
    surface: Weak<dyn Surface>,
    state: LoopState,
    /// Held until `start` moves it into the loop entry.
    backend: Option<Box<dyn Backend>>,
    entry: Option<Arc<LoopEntry>>,
    timer: Option<Box<dyn DisplayTimer>>,
    registry: Arc<LoopRegistry>,
    timers: Arc<dyn TimerSource>,
    timing: TimingConfig,
    driver: DriverConfig,
}

impl std::fmt::Debug for RenderLoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderLoopHandle")
            .field("timer_id", &self.timer_id)
            .field("surface_id", &self.surface_id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RenderLoopHandle {
    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    pub fn timer_id(&self) -> TimerId {
        self.timer_id
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface_id
    }

    /// True once a fail-fast backend error has halted the ticks.
    pub fn is_faulted(&self) -> bool {
        self.entry.as_ref().is_some_and(|e| e.is_faulted())
    }

    /// Frame statistics so far. Zeroes before the loop has started.
    pub fn stats(&self) -> FrameStats {
        self.entry
            .as_ref()
            .map(|e| e.stats())
            .unwrap_or_default()
    }

    /// Queue a resize for the backend, delivered before the next `update`.
    /// Ignored unless the loop is running.
    pub fn notify_resize(&self, width: u32, height: u32) {
        match (&self.entry, self.state) {
            (Some(entry), LoopState::Running) => entry.queue_resize(width, height),
            _ => debug!(
                "RenderLoopHandle {}: Resize {}x{} ignored while {}",
                self.timer_id, width, height, self.state
            ),
        }
    }

    fn start(&mut self) -> LoopResult<()> {
        if self.state != LoopState::Created {
            let err = LoopError::invalid(self.state, "start");
            error!("RenderLoopHandle {}: {}", self.timer_id, err);
            return Err(err);
        }
        if let Some(existing) = self.registry.active_for(self.surface_id) {
            let err = LoopError::invalid(LoopState::Running, "start");
            error!(
                "RenderLoopHandle {}: {} already driven by {}: {}",
                self.timer_id, self.surface_id, existing, err
            );
            return Err(err);
        }

        // Past this point every failure is terminal for the handle.
        self.state = LoopState::Stopped;

        if let Err(e) = self
            .timing
            .validate()
            .and_then(|()| self.driver.validate())
        {
            let err = LoopError::SetupFailure(format!("invalid configuration: {:#}", e));
            error!("RenderLoopHandle {}: {}", self.timer_id, err);
            return Err(err);
        }

        let Some(surface) = self.surface.upgrade() else {
            return Err(LoopError::SetupFailure(format!(
                "{} was dropped before start",
                self.surface_id
            )));
        };
        let Some(mut backend) = self.backend.take() else {
            return Err(LoopError::invalid(LoopState::Stopped, "start"));
        };

        info!("RenderLoopHandle {}: Initializing backend", self.timer_id);
        if let Err(source) = backend.initialize() {
            return Err(LoopError::BackendFailure {
                phase: FramePhase::Initialize,
                frame: 0,
                source,
            });
        }

        let reported = surface.refresh_rate().filter(|hz| hz.is_finite() && *hz > 0.0);
        drop(surface);
        let refresh_hz = match (reported, self.timing.fallback_refresh_hz) {
            (Some(hz), _) => hz,
            (None, Some(fallback)) => {
                warn!(
                    "RenderLoopHandle {}: {} has no display, using fallback {:.2} Hz",
                    self.timer_id, self.surface_id, fallback
                );
                fallback
            }
            (None, None) => {
                let err = LoopError::SetupFailure(format!(
                    "{} is not attached to a display",
                    self.surface_id
                ));
                error!("RenderLoopHandle {}: {}", self.timer_id, err);
                self.park(backend);
                return Err(err);
            }
        };
        let refresh_hz = self.timing.clamp_refresh(refresh_hz);

        let entry = Arc::new(LoopEntry::new(
            self.timer_id,
            self.surface_id,
            self.surface.clone(),
            self.driver.failure_policy,
            LoopCore {
                backend,
                clock: FrameClock::new(interval_for(refresh_hz), self.timing.max_frame_delta()),
                profiler: FrameProfiler::new(self.driver.history_len),
            },
        ));
        self.entry = Some(entry.clone());

        let registry = Arc::downgrade(&self.registry);
        let timer_id = self.timer_id;
        let callback: TickCallback = Box::new(move |now| match registry.upgrade() {
            Some(registry) => registry.dispatch(timer_id, now),
            None => crate::display_link::TickControl::Halt,
        });

        let mut timer = self
            .timers
            .create_timer(self.timer_id, refresh_hz, callback)
            .inspect_err(|e| error!("RenderLoopHandle {}: {}", self.timer_id, e))?;

        // Registered and running before the timer can fire.
        entry.set_running(true);
        if self.registry.insert(entry.clone()).is_err() {
            entry.set_running(false);
            return Err(LoopError::invalid(LoopState::Running, "start"));
        }
        if let Err(e) = timer.start() {
            error!("RenderLoopHandle {}: {}", self.timer_id, e);
            entry.set_running(false);
            self.registry.remove(self.timer_id);
            return Err(e);
        }

        self.timer = Some(timer);
        self.state = LoopState::Running;
        info!(
            "RenderLoopHandle {}: Running on {} at {:.2} Hz",
            self.timer_id, self.surface_id, refresh_hz
        );
        Ok(())
    }

    /// Keeps an initialized backend alive but idle after a failed setup.
    fn park(&mut self, backend: Box<dyn Backend>) {
        self.backend = Some(backend);
    }

    fn stop(&mut self) -> LoopResult<FrameStats> {
        if self.state != LoopState::Running {
            let err = LoopError::invalid(self.state, "stop");
            error!("RenderLoopHandle {}: {}", self.timer_id, err);
            return Err(err);
        }
        let Some(entry) = self.entry.clone() else {
            return Err(LoopError::invalid(self.state, "stop"));
        };

        info!("RenderLoopHandle {}: Stopping", self.timer_id);
        entry.set_running(false);
        entry.wait_for_tick();
        self.registry.remove(self.timer_id);

        let timer_result = match self.timer.take() {
            Some(mut timer) => timer.stop(),
            None => Ok(()),
        };
        self.state = LoopState::Stopped;

        let stats = entry.stats();
        info!(
            "RenderLoopHandle {}: Stopped after {} frames ({} failed)",
            self.timer_id, stats.frames, stats.failed_frames
        );

        if let Some(fault) = entry.take_fault() {
            return Err(fault);
        }
        timer_result?;
        Ok(stats)
    }
}

impl Drop for RenderLoopHandle {
    fn drop(&mut self) {
        if self.state == LoopState::Running {
            debug!("RenderLoopHandle {} dropped while running", self.timer_id);
            if let Err(e) = self.stop() {
                error!("RenderLoopHandle {}: {}", self.timer_id, e);
            }
        }
    }
}
