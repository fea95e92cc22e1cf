//! The in-memory task and its per-phase results.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use truthcast_common::{
    ClaimItem, ContentDraft, DetectResult, EvidenceItem, HaltReason, LatestTask, Phase,
    PhaseStatusMap, ReportResult, SimulationResult, SnapshotUpsert, StrategyConfig, TaskMeta,
    now_utc,
};

use super::state::PhaseStateMachine;

/// Identifies one incarnation of a task. The epoch changes whenever the
/// active task is replaced, even by a task with the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TaskKey {
    pub id: String,
    pub epoch: u64,
}

/// The result one phase attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseData {
    Detect(DetectResult),
    Claims(Vec<ClaimItem>),
    Evidence {
        raw: Vec<EvidenceItem>,
        aligned: Vec<EvidenceItem>,
    },
    Report(ReportResult),
    Simulation(SimulationResult),
    Content(ContentDraft),
}

impl PhaseData {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Detect(_) => Phase::Detect,
            Self::Claims(_) => Phase::Claims,
            Self::Evidence { .. } => Phase::Evidence,
            Self::Report(_) => Phase::Report,
            Self::Simulation(_) => Phase::Simulation,
            Self::Content(_) => Phase::Content,
        }
    }
}

/// Results of every phase that has produced one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detect: Option<DetectResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Vec<ClaimItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_evidences: Option<Vec<EvidenceItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidences: Option<Vec<EvidenceItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentDraft>,
}

impl TaskResults {
    pub fn store(&mut self, data: PhaseData) {
        match data {
            PhaseData::Detect(d) => self.detect = Some(d),
            PhaseData::Claims(c) => self.claims = Some(c),
            PhaseData::Evidence { raw, aligned } => {
                self.raw_evidences = Some(raw);
                self.evidences = Some(aligned);
            }
            PhaseData::Report(r) => self.report = Some(r),
            PhaseData::Simulation(s) => self.simulation = Some(s),
            PhaseData::Content(c) => self.content = Some(c),
        }
    }

    pub fn strategy(&self) -> Option<&StrategyConfig> {
        self.detect.as_ref().and_then(|d| d.strategy.as_ref())
    }

    /// Persisted payload of `phase`, or `None` when it has no result.
    ///
    /// Payloads are objects keyed in camelCase: `detectData`, `claims`,
    /// `rawEvidences` + `evidences`, `report`, `simulation`, `content`.
    pub fn payload(&self, phase: Phase) -> Result<Option<Value>, serde_json::Error> {
        let mut map = Map::new();
        match phase {
            Phase::Detect => put(&mut map, "detectData", &self.detect)?,
            Phase::Claims => put(&mut map, "claims", &self.claims)?,
            Phase::Evidence => {
                put(&mut map, "rawEvidences", &self.raw_evidences)?;
                put(&mut map, "evidences", &self.evidences)?;
            }
            Phase::Report => put(&mut map, "report", &self.report)?,
            Phase::Simulation => put(&mut map, "simulation", &self.simulation)?,
            Phase::Content => put(&mut map, "content", &self.content)?,
        }
        Ok((!map.is_empty()).then_some(Value::Object(map)))
    }

    /// Restore the result of `phase` from a persisted payload. Keys that are
    /// absent leave the current value alone.
    pub fn restore(&mut self, phase: Phase, payload: &Value) -> Result<(), serde_json::Error> {
        match phase {
            Phase::Detect => take(payload, "detectData", &mut self.detect),
            Phase::Claims => take(payload, "claims", &mut self.claims),
            Phase::Evidence => {
                take(payload, "rawEvidences", &mut self.raw_evidences)?;
                take(payload, "evidences", &mut self.evidences)
            }
            Phase::Report => take(payload, "report", &mut self.report),
            Phase::Simulation => take(payload, "simulation", &mut self.simulation),
            Phase::Content => take(payload, "content", &mut self.content),
        }
    }
}

fn put<T: Serialize>(
    map: &mut Map<String, Value>,
    key: &str,
    value: &Option<T>,
) -> Result<(), serde_json::Error> {
    if let Some(value) = value {
        map.insert(key.to_string(), serde_json::to_value(value)?);
    }
    Ok(())
}

fn take<T: DeserializeOwned>(
    payload: &Value,
    key: &str,
    slot: &mut Option<T>,
) -> Result<(), serde_json::Error> {
    match payload.get(key) {
        Some(Value::Null) | None => Ok(()),
        Some(value) => {
            *slot = Some(T::deserialize(value)?);
            Ok(())
        }
    }
}

/// The single active task owned by the orchestrator.
#[derive(Debug)]
pub struct Task {
    pub task_id: String,
    pub input_text: String,
    pub created_at: String,
    pub updated_at: String,
    pub state: PhaseStateMachine,
    pub results: TaskResults,
    pub meta: TaskMeta,
    pub errors: BTreeMap<Phase, String>,
    pub(crate) epoch: u64,
    pub(crate) cancel: CancellationToken,
    /// Phases whose attempt is executing in this process.
    pub(crate) in_flight: BTreeSet<Phase>,
}

impl Task {
    /// Placeholder before any run or hydration. Its id is empty.
    pub fn blank() -> Self {
        Self::new(String::new(), String::new(), false, 0)
    }

    pub(crate) fn new(task_id: String, input_text: String, force: bool, epoch: u64) -> Self {
        let now = now_utc();
        Self {
            task_id,
            input_text,
            created_at: now.clone(),
            updated_at: now,
            state: PhaseStateMachine::new(),
            results: TaskResults::default(),
            meta: TaskMeta {
                force,
                ..TaskMeta::default()
            },
            errors: BTreeMap::new(),
            epoch,
            cancel: CancellationToken::new(),
            in_flight: BTreeSet::new(),
        }
    }

    /// Start over in place as a fresh task: every phase idle, no results,
    /// a new token. The caller retires the previous incarnation first.
    pub(crate) fn restart(
        &mut self,
        task_id: String,
        input_text: String,
        force: bool,
        epoch: u64,
    ) {
        let now = now_utc();
        self.task_id = task_id;
        self.input_text = input_text;
        self.created_at = now.clone();
        self.updated_at = now;
        self.state.reset();
        self.results = TaskResults::default();
        self.meta = TaskMeta {
            force,
            ..TaskMeta::default()
        };
        self.errors.clear();
        self.epoch = epoch;
        self.cancel = CancellationToken::new();
        self.in_flight.clear();
    }

    /// Whether the out-of-scope gate is bypassed for this task.
    pub fn is_forced(&self) -> bool {
        self.meta.force
    }

    /// Rebuild a task from persisted state. Statuses are taken verbatim; a
    /// payload that no longer decodes is dropped with a warning.
    pub(crate) fn restore(latest: LatestTask, epoch: u64) -> Self {
        let mut task = Self::new(latest.task_id, latest.input_text, latest.meta.force, epoch);
        task.state.replace(latest.phases);
        task.meta = latest.meta;
        task.updated_at = latest.updated_at.clone();
        task.created_at = latest.updated_at;
        for snapshot in latest.snapshots {
            if let Some(message) = snapshot.error_message {
                task.errors.insert(snapshot.phase, message);
            }
            let Some(payload) = snapshot.payload else {
                continue;
            };
            if let Err(e) = task.results.restore(snapshot.phase, &payload) {
                tracing::warn!(
                    task_id = %task.task_id,
                    phase = %snapshot.phase,
                    error = %e,
                    "Dropping undecodable phase payload"
                );
            }
        }
        task
    }

    pub fn is_blank(&self) -> bool {
        self.task_id.is_empty()
    }

    pub(crate) fn key(&self) -> TaskKey {
        TaskKey {
            id: self.task_id.clone(),
            epoch: self.epoch,
        }
    }

    pub(crate) fn is(&self, key: &TaskKey) -> bool {
        self.epoch == key.epoch && self.task_id == key.id
    }

    /// Whether adopting another task would discard something: a phase has
    /// left `idle`, or there is input other than the placeholder.
    pub fn has_active_work(&self, placeholder: &str) -> bool {
        let text = self.input_text.trim();
        !self.state.phases().all_idle() || (!text.is_empty() && text != placeholder.trim())
    }

    pub fn touch(&mut self) {
        self.updated_at = now_utc();
    }

    /// Snapshot of `phase` as it stands now, with the full status map.
    pub fn snapshot(&self, phase: Phase, duration_ms: Option<u64>) -> SnapshotUpsert {
        let payload = match self.results.payload(phase) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, phase = %phase, error = %e, "Failed to encode payload");
                None
            }
        };
        SnapshotUpsert {
            task_id: self.task_id.clone(),
            input_text: self.input_text.clone(),
            phases: self.state.phases().clone(),
            phase,
            status: self.state.get(phase),
            duration_ms,
            error_message: self.errors.get(&phase).cloned(),
            payload,
            meta: Some(self.meta.clone()),
        }
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            task_id: self.task_id.clone(),
            input_text: self.input_text.clone(),
            phases: self.state.phases().clone(),
            results: self.results.clone(),
            record_id: self.meta.record_id.clone(),
            halt_reason: self.meta.halt_reason.clone(),
            errors: self.errors.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

/// Read-only copy of the active task for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub task_id: String,
    pub input_text: String,
    pub phases: PhaseStatusMap,
    pub results: TaskResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<HaltReason>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<Phase, String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskView {
    pub fn is_blank(&self) -> bool {
        self.task_id.is_empty()
    }
}
