// src/backend.rs
//
// Defines the `Backend` trait, the simulation/rendering side driven by the
// render loop.

use crate::timing::FrameTick;
use anyhow::Result;

/// The external update/render capability driven once per tick.
///
/// `initialize` runs on the thread that calls `start`. Every other method runs
/// on the timer thread, which is why implementations must be `Send`. Calls for
/// one loop never overlap.
pub trait Backend: Send {
    /// Called exactly once, before the first `update`.
    fn initialize(&mut self) -> Result<()>;

    /// Advance state by one frame. Called once per tick, before `render`.
    fn update(&mut self, tick: &FrameTick) -> Result<()>;

    /// Draw the current state into the surface's back buffer.
    /// Called once per tick, after `update`. Presentation is the surface's job.
    fn render(&mut self) -> Result<()>;

    /// The drawable was resized. Delivered at the start of the next tick,
    /// before `update`.
    fn resize(&mut self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn initialize(&mut self) -> Result<()> {
        (**self).initialize()
    }

    fn update(&mut self, tick: &FrameTick) -> Result<()> {
        (**self).update(tick)
    }

    fn render(&mut self) -> Result<()> {
        (**self).render()
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        (**self).resize(width, height)
    }
}
