//! Typed error hierarchy for the truthcast pipeline.
//!
//! Three top-level enums cover the three subsystems:
//! - `StageError`: a single remote stage call
//! - `PipelineError`: orchestrator entry points
//! - `StoreError`: snapshot and history persistence

use thiserror::Error;
use truthcast_common::{Phase, PhaseStatus, SimulationStage};

/// Errors from one remote stage call.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Network error calling {route}: {message}")]
    Network { route: String, message: String },

    #[error("Timed out calling {route}")]
    Timeout { route: String },

    #[error("Stage {route} returned HTTP {status}: {body}")]
    Status {
        route: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {route}: {message}")]
    Decode { route: String, message: String },

    #[error("Stage call cancelled")]
    Cancelled,

    #[error("Simulation stream closed before stages {missing:?} arrived")]
    IncompleteStream { missing: Vec<SimulationStage> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    /// Whether this error should mark the phase `canceled` rather than `failed`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the transport may retry the request that produced this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

/// Errors returned by orchestrator entry points.
///
/// Phase failures are never reported here; they land in the phase status map.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input text is empty")]
    EmptyInput,

    #[error("Phase {phase} is blocked by unfinished predecessors {blocking:?}")]
    GateBlocked { phase: Phase, blocking: Vec<Phase> },

    #[error("Phase {phase} cannot be retried from status {status}")]
    NotRetryable { phase: Phase, status: PhaseStatus },

    #[error("Phase {phase} is already running")]
    AlreadyRunning { phase: Phase },

    #[error("Phase {phase} cannot start while {in_flight:?} are executing")]
    Busy { phase: Phase, in_flight: Vec<Phase> },

    #[error("Illegal transition for {phase}: {from} -> {to}")]
    IllegalTransition {
        phase: Phase,
        from: PhaseStatus,
        to: PhaseStatus,
    },

    #[error("No active task")]
    NoTask,
}

/// Errors from the snapshot and history stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Snapshot service error: {0}")]
    Http(String),

    #[error("Failed to decode stored record: {0}")]
    Decode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
