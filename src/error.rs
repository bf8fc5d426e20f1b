// src/error.rs

use std::fmt;
use thiserror::Error;

/// Lifecycle state of a render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Handle exists, timer not started yet.
    Created,
    /// Timer created and started; ticks are delivered.
    Running,
    /// Timer stopped and released. Terminal.
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Created => "created",
            LoopState::Running => "running",
            LoopState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Backend call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Initialize,
    Resize,
    Update,
    Render,
    Present,
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramePhase::Initialize => "initialize",
            FramePhase::Resize => "resize",
            FramePhase::Update => "update",
            FramePhase::Render => "render",
            FramePhase::Present => "present",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum LoopError {
    /// The timer resource could not be created or started.
    #[error("Render loop setup failed: {0}")]
    SetupFailure(String),

    /// A lifecycle call that the current state does not allow.
    #[error("Cannot {action} a render loop that is {from}")]
    InvalidStateTransition { from: LoopState, action: &'static str },

    /// The backend (or the surface, for `Present`) reported an error.
    #[error("Backend {phase} failed on frame {frame}: {source:#}")]
    BackendFailure {
        phase: FramePhase,
        frame: u64,
        #[source]
        source: anyhow::Error,
    },
}

impl LoopError {
    pub(crate) fn invalid(from: LoopState, action: &'static str) -> Self {
        LoopError::InvalidStateTransition { from, action }
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, LoopError::InvalidStateTransition { .. })
    }
}

pub type LoopResult<T> = std::result::Result<T, LoopError>;
