//! Pipeline orchestration.
//!
//! | File          | Owns                                                 |
//! |---------------|------------------------------------------------------|
//! | `state.rs`    | legal phase transitions                              |
//! | `task.rs`     | the active task, its results and payload encoding    |
//! | `runner.rs`   | phase attempts, the full run, cancellation           |
//! | `retry.rs`    | single-phase runs, retries and resume                |
//! | `hydrate.rs`  | adopting persisted tasks                             |
//!
//! `TaskOrchestrator` holds the one active task behind an async mutex.
//! Remote calls are made without the lock held; every write back checks the
//! task key first so results from a replaced task are discarded.

pub mod hydrate;
pub mod retry;
pub mod runner;
pub mod state;
pub mod task;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::Mutex;
use truthcast_common::{HaltReason, Phase, PhaseStatusMap};

use crate::config::{ContentSection, DetectFailurePolicy, SimulationSection};
use crate::remote::RemoteStages;
use crate::store::{HistoryStore, SnapshotStore, SnapshotWriter};

pub use state::PhaseStateMachine;
pub use task::{PhaseData, Task, TaskResults, TaskView};

use task::TaskKey;

/// Final summaries kept for replaced tasks.
const RETIRED_SUMMARIES: usize = 8;

/// Orchestrator knobs, resolved from `TruthcastConfig`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub detect_failure_policy: DetectFailurePolicy,
    pub content_enabled: bool,
    /// Input text that does not count as active work.
    pub placeholder_text: String,
    pub simulation: SimulationSection,
    pub content: ContentSection,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detect_failure_policy: DetectFailurePolicy::default(),
            content_enabled: true,
            placeholder_text: String::new(),
            simulation: SimulationSection::default(),
            content: ContentSection::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Reuse this id instead of generating one.
    pub task_id: Option<String>,
    /// Bypass the out-of-scope gate.
    pub force: bool,
}

/// How one phase attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Done,
    Failed,
    Canceled,
    /// The token was already triggered; the phase was left alone.
    NotStarted,
    /// The active task changed while the attempt ran.
    Superseded,
}

/// State of the task after a run, resume or retry.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub task_id: String,
    pub phases: PhaseStatusMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<HaltReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<Phase, String>,
    /// Another run or a hydration replaced the task before this call
    /// returned. The phases are those the task held when it was replaced.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub superseded: bool,
}

impl RunSummary {
    fn of(task: &Task, superseded: bool) -> Self {
        Self {
            task_id: task.task_id.clone(),
            phases: task.state.phases().clone(),
            halt_reason: task.meta.halt_reason.clone(),
            record_id: task.meta.record_id.clone(),
            errors: task.errors.clone(),
            superseded,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HydrateOptions {
    /// Adopt even when the active task has work in it.
    pub force: bool,
    /// Log outcomes at debug level.
    pub silent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HydrateOutcome {
    Adopted {
        task_id: String,
        phases: PhaseStatusMap,
    },
    SkippedActiveWork,
    NothingToResume,
    /// The snapshot store could not be read.
    Unavailable,
}

/// Summary of the latest persisted task, read without adopting it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestorableTask {
    pub task_id: String,
    pub input_text: String,
    pub phases: PhaseStatusMap,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<HaltReason>,
}

/// Drives the six-phase chain for one active task.
pub struct TaskOrchestrator {
    stages: Arc<dyn RemoteStages>,
    snapshots: Arc<dyn SnapshotStore>,
    history: Arc<dyn HistoryStore>,
    writer: SnapshotWriter,
    config: PipelineConfig,
    task: Mutex<Task>,
    epochs: AtomicU64,
    /// Settled summaries of replaced tasks by epoch, for calls still
    /// returning on their behalf.
    retired: std::sync::Mutex<BTreeMap<u64, RunSummary>>,
}

impl TaskOrchestrator {
    /// Must be called inside a tokio runtime; spawns the snapshot writer.
    pub fn new(
        stages: Arc<dyn RemoteStages>,
        snapshots: Arc<dyn SnapshotStore>,
        history: Arc<dyn HistoryStore>,
        config: PipelineConfig,
    ) -> Self {
        let writer = SnapshotWriter::spawn(snapshots.clone());
        Self {
            stages,
            snapshots,
            history,
            writer,
            config,
            task: Mutex::new(Task::blank()),
            epochs: AtomicU64::new(0),
            retired: std::sync::Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn view(&self) -> TaskView {
        self.task.lock().await.view()
    }

    pub async fn phases(&self) -> PhaseStatusMap {
        self.task.lock().await.state.phases().clone()
    }

    /// Id of the active task, if there is one.
    pub async fn task_id(&self) -> Option<String> {
        let task = self.task.lock().await;
        (!task.is_blank()).then(|| task.task_id.clone())
    }

    /// Wait until every submitted snapshot has been applied.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Summary of the task identified by `key`, even if it has since been
    /// replaced.
    async fn summary_for(&self, key: &TaskKey) -> RunSummary {
        {
            let task = self.task.lock().await;
            if task.is(key) {
                return RunSummary::of(&task, false);
            }
        }
        let retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        retired.get(&key.epoch).cloned().unwrap_or_else(|| RunSummary {
            task_id: key.id.clone(),
            phases: PhaseStatusMap::default(),
            halt_reason: None,
            record_id: None,
            errors: BTreeMap::new(),
            superseded: true,
        })
    }

    /// Keep the settled summary of a task about to be replaced.
    fn remember_retired(&self, task: &Task) {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        retired.insert(task.epoch, RunSummary::of(task, true));
        while retired.len() > RETIRED_SUMMARIES {
            retired.pop_first();
        }
    }
}
