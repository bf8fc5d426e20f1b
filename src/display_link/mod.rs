// src/display_link/mod.rs
//! Display-refresh timers.
//!
//! A `DisplayTimer` fires a callback once per display refresh on a thread it
//! owns. The callback never receives a pointer to the loop it drives: it is
//! handed a [`TimerId`] at creation and the driver resolves that id through
//! its registry on every tick.
//!
//! ## Contract
//! - Callbacks for one timer are serialized (never overlap).
//! - `stop()` is synchronous: when it returns, any in-flight callback has
//!   completed and no further callback will run.
//! - A callback returning [`TickControl::Halt`] ends delivery for that timer.

pub mod thread_link;

use crate::error::LoopResult;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub use thread_link::{ThreadDisplayLink, ThreadTimerSource};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one timer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl TimerId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        TimerId(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Returned by a tick callback to tell the timer whether to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Halt,
}

/// Invoked by the timer on its own thread with the firing time.
pub type TickCallback = Box<dyn FnMut(Instant) -> TickControl + Send + 'static>;

/// A periodic, refresh-paced timer resource.
pub trait DisplayTimer: Send {
    fn id(&self) -> TimerId;

    /// Begin delivering ticks.
    fn start(&mut self) -> LoopResult<()>;

    /// Stop delivering ticks and wait for any in-flight tick to finish.
    fn stop(&mut self) -> LoopResult<()>;
}

/// Creates timers bound to a refresh rate.
pub trait TimerSource: Send + Sync {
    fn create_timer(
        &self,
        id: TimerId,
        refresh_hz: f64,
        callback: TickCallback,
    ) -> LoopResult<Box<dyn DisplayTimer>>;
}
