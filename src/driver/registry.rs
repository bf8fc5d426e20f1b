// src/driver/registry.rs
//! Typed registry of live loops, keyed by timer identity.
//!
//! Timer callbacks hold a `Weak<LoopRegistry>` and their own `TimerId`. A tick
//! for an id that is no longer registered is a no-op, which is what makes a
//! late tick after `stop` harmless.

use super::entry::{lock, LoopEntry};
use crate::display_link::{TickControl, TimerId};
use crate::surface::SurfaceId;
use log::trace;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Default)]
struct RegistryInner {
    loops: HashMap<TimerId, Arc<LoopEntry>>,
    surfaces: HashMap<SurfaceId, TimerId>,
}

#[derive(Default)]
pub(crate) struct LoopRegistry {
    inner: Mutex<RegistryInner>,
}

impl LoopRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Timer currently driving `surface`, if any.
    pub(crate) fn active_for(&self, surface: SurfaceId) -> Option<TimerId> {
        lock(&self.inner).surfaces.get(&surface).copied()
    }

    /// Registers `entry`. Fails with the existing timer id if its surface
    /// already has an active loop.
    pub(crate) fn insert(&self, entry: Arc<LoopEntry>) -> Result<(), TimerId> {
        let mut inner = lock(&self.inner);
        if let Some(existing) = inner.surfaces.get(&entry.surface_id()) {
            return Err(*existing);
        }
        inner.surfaces.insert(entry.surface_id(), entry.timer_id());
        inner.loops.insert(entry.timer_id(), entry);
        Ok(())
    }

    pub(crate) fn remove(&self, id: TimerId) -> Option<Arc<LoopEntry>> {
        let mut inner = lock(&self.inner);
        let entry = inner.loops.remove(&id)?;
        if inner.surfaces.get(&entry.surface_id()) == Some(&id) {
            inner.surfaces.remove(&entry.surface_id());
        }
        Some(entry)
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).loops.len()
    }

    /// Routes a timer firing to its loop.
    pub(crate) fn dispatch(&self, id: TimerId, now: Instant) -> TickControl {
        // Clone out of the map so the registry lock is not held during a frame.
        let entry = lock(&self.inner).loops.get(&id).cloned();
        match entry {
            Some(entry) => entry.tick(now),
            None => {
                trace!("LoopRegistry: Tick for unregistered {}, ignoring", id);
                TickControl::Halt
            }
        }
    }
}
