//! Shared domain types for the truthcast verification pipeline.

pub mod phase;
pub mod results;
pub mod simulation;
pub mod snapshot;
pub mod strategy;

pub use phase::{Phase, PhaseStatus, PhaseStatusMap};
pub use results::{
    AlignRequest, ClaimItem, ClaimReportItem, ClaimsRequest, ClarificationContent,
    ContentDraft, ContentRequest, DetectRequest, DetectResult, EvidenceItem, EvidenceRequest,
    FaqItem, PlatformScript, ReportRequest, ReportResult, SimulateRequest,
};
pub use simulation::{
    ActionItem, EmotionFragment, FlashpointsFragment, NarrativeItem, NarrativesFragment,
    SimulationEvent, SimulationResult, SimulationStage, SuggestionData, SuggestionFragment,
    TimelineItem,
};
pub use snapshot::{HaltReason, LatestTask, PhaseSnapshot, SnapshotUpsert, TaskMeta, now_utc};
pub use strategy::StrategyConfig;

/// Failure to parse a phase or status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid phase: {0}")]
    Phase(String),

    #[error("Invalid phase status: {0}")]
    Status(String),
}
