//! Adopting a persisted task as the active one.

use super::task::Task;
use super::{HydrateOptions, HydrateOutcome, RestorableTask, TaskOrchestrator};

impl TaskOrchestrator {
    /// Replace the active task with the persisted one.
    ///
    /// Loads `task_id`, or the most recently updated task. Statuses are
    /// adopted verbatim, so a phase persisted as `running` stays `running`
    /// until a cancel, retry or resume settles it. Without `force`, an active
    /// task with work in it is never overwritten.
    pub async fn hydrate(&self, task_id: Option<&str>, options: HydrateOptions) -> HydrateOutcome {
        let outcome = self.hydrate_inner(task_id, options).await;
        let requested = task_id.unwrap_or("latest");
        match &outcome {
            HydrateOutcome::Adopted { task_id, .. } if !options.silent => {
                tracing::info!(task_id = %task_id, "Adopted persisted task")
            }
            HydrateOutcome::Unavailable if !options.silent => {
                tracing::warn!(requested, "Snapshot store unavailable; keeping current task")
            }
            HydrateOutcome::SkippedActiveWork if !options.silent => {
                tracing::info!(requested, "Active task has work; not hydrating")
            }
            other => tracing::debug!(requested, outcome = ?other, "Hydration finished"),
        }
        outcome
    }

    async fn hydrate_inner(&self, task_id: Option<&str>, options: HydrateOptions) -> HydrateOutcome {
        let placeholder = self.config.placeholder_text.as_str();
        if !options.force && self.task.lock().await.has_active_work(placeholder) {
            return HydrateOutcome::SkippedActiveWork;
        }

        // Our own queued writes must land before we read them back.
        self.writer.flush().await;
        let latest = match self.snapshots.load_latest(task_id).await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load persisted task");
                return HydrateOutcome::Unavailable;
            }
        };
        let Some(latest) = latest.filter(|l| !l.snapshots.is_empty()) else {
            return HydrateOutcome::NothingToResume;
        };

        let mut task = self.task.lock().await;
        // Work may have started while the store was being read.
        if !options.force && task.has_active_work(placeholder) {
            return HydrateOutcome::SkippedActiveWork;
        }
        self.retire(&mut task);
        *task = Task::restore(latest, self.next_epoch());
        HydrateOutcome::Adopted {
            task_id: task.task_id.clone(),
            phases: task.state.phases().clone(),
        }
    }

    /// Describe the latest persisted task without adopting it.
    pub async fn probe_latest_restorable(&self) -> Option<RestorableTask> {
        self.writer.flush().await;
        let latest = match self.snapshots.load_latest(None).await {
            Ok(latest) => latest?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to probe persisted task");
                return None;
            }
        };
        if latest.snapshots.is_empty() {
            return None;
        }
        Some(RestorableTask {
            task_id: latest.task_id,
            input_text: latest.input_text,
            phases: latest.phases,
            updated_at: latest.updated_at,
            record_id: latest.meta.record_id,
            halt_reason: latest.meta.halt_reason,
        })
    }
}
