//! Phase identifiers and per-phase status values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// One of the six stages of the verification workflow.
///
/// The declaration order is the fixed dependency order: every phase depends
/// on all phases declared before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Detect,
    Claims,
    Evidence,
    Report,
    Simulation,
    Content,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Detect,
        Phase::Claims,
        Phase::Evidence,
        Phase::Report,
        Phase::Simulation,
        Phase::Content,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detect => "detect",
            Self::Claims => "claims",
            Self::Evidence => "evidence",
            Self::Report => "report",
            Self::Simulation => "simulation",
            Self::Content => "content",
        }
    }

    /// Position in the fixed phase order.
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|p| p == self)
            .unwrap_or_default()
    }

    /// Phases that must settle before this one may start.
    pub fn predecessors(&self) -> &'static [Phase] {
        &Self::ALL[..self.index()]
    }

    /// The phase that follows this one in the chain.
    pub fn next(&self) -> Option<Phase> {
        Self::ALL.get(self.index() + 1).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detect" => Ok(Self::Detect),
            "claims" => Ok(Self::Claims),
            "evidence" => Ok(Self::Evidence),
            "report" => Ok(Self::Report),
            "simulation" => Ok(Self::Simulation),
            "content" => Ok(Self::Content),
            _ => Err(ParseError::Phase(s.to_string())),
        }
    }
}

/// Status of a single phase within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Idle,
    Running,
    Done,
    Failed,
    Canceled,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Whether this is a final outcome of an attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Canceled)
    }

    /// Whether a retry may be issued from this status.
    ///
    /// `canceled` is treated exactly like `failed`.
    pub fn is_retryable(&self) -> bool {
        self.is_terminal()
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(ParseError::Status(s.to_string())),
        }
    }
}

/// Status of every phase of one task.
///
/// Always holds all six phases. On the wire it is a plain JSON object keyed by
/// phase name; phases missing from an incoming object read as `idle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<Phase, PhaseStatus>", into = "BTreeMap<Phase, PhaseStatus>")]
pub struct PhaseStatusMap {
    statuses: [PhaseStatus; 6],
}

impl Default for PhaseStatusMap {
    fn default() -> Self {
        Self {
            statuses: [PhaseStatus::Idle; 6],
        }
    }
}

impl PhaseStatusMap {
    pub fn get(&self, phase: Phase) -> PhaseStatus {
        self.statuses[phase.index()]
    }

    pub fn set(&mut self, phase: Phase, status: PhaseStatus) {
        self.statuses[phase.index()] = status;
    }

    /// Build a map from explicit entries; unspecified phases are `idle`.
    pub fn from_entries(entries: impl IntoIterator<Item = (Phase, PhaseStatus)>) -> Self {
        let mut map = Self::default();
        for (phase, status) in entries {
            map.set(phase, status);
        }
        map
    }

    pub fn iter(&self) -> impl Iterator<Item = (Phase, PhaseStatus)> + '_ {
        Phase::ALL.iter().map(|p| (*p, self.get(*p)))
    }

    pub fn all_idle(&self) -> bool {
        self.statuses.iter().all(|s| *s == PhaseStatus::Idle)
    }

    /// First phase, in fixed order, with the given status.
    pub fn first_with(&self, status: PhaseStatus) -> Option<Phase> {
        self.iter().find(|(_, s)| *s == status).map(|(p, _)| p)
    }

    /// Phases currently in the given status.
    pub fn phases_with(&self, status: PhaseStatus) -> Vec<Phase> {
        self.iter()
            .filter(|(_, s)| *s == status)
            .map(|(p, _)| p)
            .collect()
    }
}

impl From<BTreeMap<Phase, PhaseStatus>> for PhaseStatusMap {
    fn from(map: BTreeMap<Phase, PhaseStatus>) -> Self {
        Self::from_entries(map)
    }
}

impl From<PhaseStatusMap> for BTreeMap<Phase, PhaseStatus> {
    fn from(map: PhaseStatusMap) -> Self {
        map.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_predecessors() {
        assert!(Phase::Detect < Phase::Claims);
        assert!(Phase::Simulation < Phase::Content);
        assert!(Phase::Detect.predecessors().is_empty());
        assert_eq!(
            Phase::Report.predecessors(),
            &[Phase::Detect, Phase::Claims, Phase::Evidence]
        );
        assert_eq!(Phase::Report.next(), Some(Phase::Simulation));
        assert_eq!(Phase::Content.next(), None);
    }

    #[test]
    fn test_phase_parse_roundtrip() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("summary".parse::<Phase>().is_err());
    }

    #[test]
    fn test_status_retryable() {
        assert!(!PhaseStatus::Idle.is_retryable());
        assert!(!PhaseStatus::Running.is_retryable());
        assert!(PhaseStatus::Done.is_retryable());
        assert!(PhaseStatus::Failed.is_retryable());
        assert!(PhaseStatus::Canceled.is_retryable());
    }

    #[test]
    fn test_status_map_serializes_as_object() {
        let map = PhaseStatusMap::from_entries([(Phase::Detect, PhaseStatus::Done)]);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["detect"], "done");
        assert_eq!(json["content"], "idle");
        assert_eq!(json.as_object().unwrap().len(), 6);
    }

    #[test]
    fn test_status_map_fills_missing_phases() {
        let map: PhaseStatusMap =
            serde_json::from_str(r#"{"detect":"done","claims":"failed"}"#).unwrap();
        assert_eq!(map.get(Phase::Detect), PhaseStatus::Done);
        assert_eq!(map.get(Phase::Claims), PhaseStatus::Failed);
        assert_eq!(map.get(Phase::Evidence), PhaseStatus::Idle);
        assert_eq!(map.first_with(PhaseStatus::Failed), Some(Phase::Claims));
    }

    #[test]
    fn test_status_map_rejects_unknown_status() {
        let parsed: Result<PhaseStatusMap, _> = serde_json::from_str(r#"{"detect":"paused"}"#);
        assert!(parsed.is_err());
    }
}
