//! Durable per-phase snapshot records.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::{Phase, PhaseStatus, PhaseStatusMap};

/// Timestamp format used by every persisted record. Millisecond precision
/// keeps lexical order in step with write order.
pub fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Latest known record of one phase of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub updated_at: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Why the chain stopped without a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltReason {
    /// The detect gate judged the input unsuitable for deep analysis.
    OutOfScope {
        text_type: String,
        confidence: f64,
        reason: String,
    },
    /// `detect` failed and the configured policy stops the chain.
    DetectFailed,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfScope {
                text_type,
                confidence,
                reason,
            } => write!(
                f,
                "out of scope: type={} confidence={:.2} {}",
                text_type, confidence, reason
            ),
            Self::DetectFailed => write!(f, "detect failed"),
        }
    }
}

/// Task-level metadata stored next to the snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    #[serde(default, rename = "recordId", skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, rename = "haltReason", skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<HaltReason>,
    /// The run bypassed the out-of-scope gate.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
}

impl TaskMeta {
    pub fn is_empty(&self) -> bool {
        self.record_id.is_none() && self.halt_reason.is_none() && !self.force
    }
}

/// Arguments of one snapshot upsert.
///
/// Carries the whole status map so the task row always mirrors the latest
/// transition, alongside the row for the phase that transitioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotUpsert {
    pub task_id: String,
    pub input_text: String,
    pub phases: PhaseStatusMap,
    pub phase: Phase,
    pub status: PhaseStatus,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub meta: Option<TaskMeta>,
}

/// Everything persisted for the latest task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestTask {
    pub task_id: String,
    pub input_text: String,
    pub phases: PhaseStatusMap,
    #[serde(default)]
    pub meta: TaskMeta,
    pub updated_at: String,
    #[serde(default)]
    pub snapshots: Vec<PhaseSnapshot>,
}

impl LatestTask {
    pub fn snapshot(&self, phase: Phase) -> Option<&PhaseSnapshot> {
        self.snapshots.iter().find(|s| s.phase == phase)
    }
}
