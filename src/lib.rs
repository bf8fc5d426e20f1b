// src/lib.rs

//! Display-synchronized render loop.
//!
//! A [`RenderLoopDriver`] binds a [`Backend`] to a [`Surface`] and drives it
//! from a refresh-paced timer: every tick calls `update`, then `render`, then
//! presents the surface. Ticks arrive on the timer's thread; `start` and `stop`
//! stay on the thread that owns the surface, and `stop` does not return while
//! a frame is still running.

pub mod backend;
pub mod config;
pub mod display_link;
pub mod driver;
pub mod error;
pub mod profiler;
pub mod surface;
pub mod testing;
pub mod timing;

pub use backend::Backend;
pub use config::{Config, FailurePolicy, CONFIG};
pub use display_link::{DisplayTimer, TickControl, TimerId, TimerSource};
pub use driver::{RenderLoopDriver, RenderLoopHandle};
pub use error::{FramePhase, LoopError, LoopResult, LoopState};
pub use profiler::{FrameRecord, FrameStats};
pub use surface::{HeadlessSurface, Surface, SurfaceId};
pub use timing::FrameTick;
