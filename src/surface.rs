// src/surface.rs
//! Drawable surface collaborator.
//!
//! The windowing layer owns the real surface (view, GL/Metal context, pixel
//! format). The render loop only needs three things from it: a stable
//! identity, the refresh rate of the display it sits on, and a way to present
//! the back buffer once `render` has finished.
//!
//! ## Threading Model
//! - `id` and `refresh_rate` are read on the owning thread during `start`.
//! - `present` is called on the timer thread, right after `render`.

use anyhow::Result;
use log::{info, trace};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a drawable surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl SurfaceId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// A configured, double-buffered drawable surface.
pub trait Surface: Send + Sync {
    fn id(&self) -> SurfaceId;

    /// Refresh rate of the display the surface is attached to, in Hz.
    /// `None` if the surface is not attached to any display.
    fn refresh_rate(&self) -> Option<f64>;

    /// Present the back buffer. Called once per tick after `render`.
    fn present(&self) -> Result<()>;
}

/// Surface with no window behind it. Counts presents.
///
/// Used by the demo binary and by tests; `detach` simulates the surface
/// losing its display.
pub struct HeadlessSurface {
    id: SurfaceId,
    refresh_rate: Mutex<Option<f64>>,
    presents: AtomicU64,
}

impl HeadlessSurface {
    pub fn new(refresh_rate: f64) -> Self {
        info!("HeadlessSurface::new() at {:.2} Hz", refresh_rate);
        Self {
            id: SurfaceId::next(),
            refresh_rate: Mutex::new(Some(refresh_rate)),
            presents: AtomicU64::new(0),
        }
    }

    /// A surface that reports no attached display.
    pub fn detached() -> Self {
        info!("HeadlessSurface::detached()");
        Self {
            id: SurfaceId::next(),
            refresh_rate: Mutex::new(None),
            presents: AtomicU64::new(0),
        }
    }

    pub fn detach(&self) {
        *self.lock_rate() = None;
    }

    pub fn presents(&self) -> u64 {
        self.presents.load(Ordering::SeqCst)
    }

    fn lock_rate(&self) -> std::sync::MutexGuard<'_, Option<f64>> {
        // The guarded value is plain data, so a poisoned lock is still usable.
        self.refresh_rate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Surface for HeadlessSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn refresh_rate(&self) -> Option<f64> {
        *self.lock_rate()
    }

    fn present(&self) -> Result<()> {
        let n = self.presents.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("HeadlessSurface {}: Present #{}", self.id, n);
        Ok(())
    }
}
