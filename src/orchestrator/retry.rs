//! Re-running individual phases of the active task.

use tokio_util::sync::CancellationToken;
use truthcast_common::{HaltReason, Phase, PhaseStatus};

use super::runner::{ensure_idle, settle_running};
use super::task::TaskKey;
use super::{RunSummary, TaskOrchestrator};
use crate::errors::PipelineError;

impl TaskOrchestrator {
    /// Run one phase of the active task if its predecessors allow it.
    /// Does not continue the chain.
    pub async fn run_phase(&self, phase: Phase) -> Result<PhaseStatus, PipelineError> {
        let key = self.prepare_single(phase, false).await?;
        self.execute(phase, &key).await?;
        self.writer.flush().await;
        Ok(self.summary_for(&key).await.phases.get(phase))
    }

    /// Re-run a phase that has already settled (`done`, `failed` or
    /// `canceled`). Downstream phases are left as they are.
    pub async fn retry_phase(&self, phase: Phase) -> Result<PhaseStatus, PipelineError> {
        let key = self.prepare_single(phase, true).await?;
        tracing::info!(task_id = %key.id, phase = %phase, "Retrying phase");
        self.execute(phase, &key).await?;
        self.writer.flush().await;
        Ok(self.summary_for(&key).await.phases.get(phase))
    }

    /// Retry the earliest failed phase. `None` when nothing has failed.
    pub async fn retry_failed(&self) -> Result<Option<Phase>, PipelineError> {
        let Some(phase) = self.phases().await.first_with(PhaseStatus::Failed) else {
            tracing::debug!("No failed phase to retry");
            return Ok(None);
        };
        self.retry_phase(phase).await?;
        Ok(Some(phase))
    }

    /// Continue the chain from the first phase that is not `done`.
    ///
    /// Orphaned running phases are settled first. A task halted as out of
    /// scope stays halted.
    pub async fn resume(&self) -> Result<RunSummary, PipelineError> {
        let (key, start) = {
            let mut task = self.task.lock().await;
            if task.is_blank() {
                return Err(PipelineError::NoTask);
            }
            for upsert in settle_running(&mut task, false) {
                self.writer.submit(upsert);
            }
            if matches!(task.meta.halt_reason, Some(HaltReason::OutOfScope { .. })) {
                tracing::info!(task_id = %task.task_id, "Task was halted as out of scope; nothing to resume");
                (task.key(), None)
            } else {
                let start = Phase::ALL
                    .into_iter()
                    .filter(|p| *p != Phase::Content || self.config.content_enabled)
                    .find(|p| task.state.get(*p) != PhaseStatus::Done);
                if let Some(phase) = start {
                    ensure_idle(&task, phase)?;
                }
                if task.cancel.is_cancelled() {
                    task.cancel = CancellationToken::new();
                }
                (task.key(), start)
            }
        };

        match start {
            Some(Phase::Detect) => {
                let outcome = self.execute(Phase::Detect, &key).await?;
                self.continue_after_detect(&key, outcome).await?;
            }
            Some(phase) => {
                tracing::info!(task_id = %key.id, phase = %phase, "Resuming chain");
                self.run_chain(phase, &key).await?;
            }
            None => tracing::debug!(task_id = %key.id, "Every phase is already done"),
        }

        self.writer.flush().await;
        Ok(self.summary_for(&key).await)
    }

    /// Validate a single-phase request and re-arm the token if a previous
    /// cancellation left it triggered.
    async fn prepare_single(&self, phase: Phase, retry: bool) -> Result<TaskKey, PipelineError> {
        let mut task = self.task.lock().await;
        if task.is_blank() {
            return Err(PipelineError::NoTask);
        }
        for upsert in settle_running(&mut task, false) {
            self.writer.submit(upsert);
        }
        let status = task.state.get(phase);
        if status == PhaseStatus::Running {
            return Err(PipelineError::AlreadyRunning { phase });
        }
        ensure_idle(&task, phase)?;
        if retry && !status.is_retryable() {
            return Err(PipelineError::NotRetryable { phase, status });
        }
        self.check_gate(&task, phase)?;
        if task.cancel.is_cancelled() {
            task.cancel = CancellationToken::new();
        }
        Ok(task.key())
    }
}

