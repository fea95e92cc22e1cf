//! Phase attempts and the full pipeline run.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use truthcast_common::{
    AlignRequest, ClaimItem, ClaimsRequest, ContentRequest, DetectRequest, DetectResult,
    EvidenceItem, EvidenceRequest, HaltReason, Phase, PhaseStatus, ReportRequest, ReportResult,
    SimulateRequest, SimulationEvent, SimulationResult, SnapshotUpsert, StrategyConfig,
};

use super::task::{PhaseData, Task, TaskKey};
use super::{PhaseOutcome, RunOptions, RunSummary, TaskOrchestrator};
use crate::config::DetectFailurePolicy;
use crate::errors::{PipelineError, StageError};
use crate::remote::cancellable;
use crate::stream::StreamAggregator;

/// Buffered simulation events between the stage call and the aggregator.
const SIMULATION_CHANNEL_CAPACITY: usize = 16;

/// A phase attempt that failed, with whatever it produced before failing.
#[derive(Debug)]
pub(crate) struct PhaseFailure {
    pub error: StageError,
    pub partial: Option<PhaseData>,
}

impl From<StageError> for PhaseFailure {
    fn from(error: StageError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

type PhaseResult = Result<PhaseData, PhaseFailure>;

/// Upstream results a phase call needs, copied out of the task so the lock
/// is not held across the call.
struct PhaseInputs {
    text: String,
    force: bool,
    strategy: Option<StrategyConfig>,
    detect: Option<DetectResult>,
    claims: Vec<ClaimItem>,
    evidences: Vec<EvidenceItem>,
    report: Option<ReportResult>,
    simulation: Option<SimulationResult>,
}

impl PhaseInputs {
    fn from_task(task: &Task) -> Self {
        let results = &task.results;
        Self {
            text: task.input_text.clone(),
            force: task.is_forced(),
            strategy: results.strategy().cloned(),
            detect: results.detect.clone(),
            claims: results.claims.clone().unwrap_or_default(),
            evidences: results.evidences.clone().unwrap_or_default(),
            report: results.report.clone(),
            simulation: results.simulation.clone(),
        }
    }
}

pub(crate) struct Attempt {
    key: TaskKey,
    token: CancellationToken,
    started: Instant,
    inputs: PhaseInputs,
}

enum Begin {
    Started(Attempt),
    Skipped(PhaseOutcome),
}

pub(crate) fn new_task_id() -> String {
    format!("task_{}", uuid::Uuid::new_v4().simple())
}

impl TaskOrchestrator {
    /// Start a new task for `input` and drive it as far as it goes.
    ///
    /// Any active task is cancelled and replaced first. Phase failures are
    /// reported through the returned status map, not as errors.
    pub async fn run(&self, input: &str, options: RunOptions) -> Result<RunSummary, PipelineError> {
        if input.trim().is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let task_id = options
            .task_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_task_id);

        let key = {
            let mut task = self.task.lock().await;
            self.retire(&mut task);
            let epoch = self.next_epoch();
            task.restart(task_id, input.to_string(), options.force, epoch);
            self.writer.submit(task.snapshot(Phase::Detect, None));
            task.key()
        };
        tracing::info!(task_id = %key.id, force = options.force, "Starting pipeline run");

        let (detect_tx, detect_rx) = oneshot::channel();
        let detect = async {
            let outcome = self.execute(Phase::Detect, &key).await;
            let sent = outcome.as_ref().copied().unwrap_or(PhaseOutcome::NotStarted);
            let _ = detect_tx.send(sent);
            outcome
        };
        let chain = async {
            let outcome = detect_rx.await.unwrap_or(PhaseOutcome::Superseded);
            self.continue_after_detect(&key, outcome).await
        };
        let (detect_res, chain_res) = tokio::join!(detect, chain);
        for err in [detect_res.err(), chain_res.err()].into_iter().flatten() {
            tracing::warn!(task_id = %key.id, error = %err, "Pipeline step was rejected");
        }

        self.writer.flush().await;
        Ok(self.summary_for(&key).await)
    }

    /// Cancel in-flight work of the active task.
    ///
    /// Running phases whose attempt is not executing in this process (for
    /// example adopted from storage) are settled as `canceled` right away;
    /// executing attempts settle themselves when their call returns.
    pub async fn cancel(&self) {
        {
            let mut task = self.task.lock().await;
            if task.is_blank() {
                return;
            }
            task.cancel.cancel();
            for upsert in settle_running(&mut task, false) {
                self.writer.submit(upsert);
            }
            tracing::info!(task_id = %task.task_id, "Cancellation requested");
        }
        self.writer.flush().await;
    }

    /// Check the dependency gate of `phase` against the active task.
    pub async fn ensure_eligible(&self, phase: Phase) -> Result<(), PipelineError> {
        let task = self.task.lock().await;
        self.check_gate(&task, phase)
    }

    /// Cancel the current task's work and settle every running phase, ahead
    /// of replacing it.
    pub(crate) fn retire(&self, task: &mut Task) {
        if task.is_blank() {
            return;
        }
        task.cancel.cancel();
        for upsert in settle_running(task, true) {
            self.writer.submit(upsert);
        }
        self.remember_retired(task);
        tracing::debug!(task_id = %task.task_id, "Retired active task");
    }

    pub(crate) fn check_gate(&self, task: &Task, phase: Phase) -> Result<(), PipelineError> {
        let blocking: Vec<Phase> = phase
            .predecessors()
            .iter()
            .copied()
            .filter(|p| !self.satisfies_gate(task, *p))
            .collect();
        if blocking.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::GateBlocked { phase, blocking })
        }
    }

    /// A predecessor satisfies the gate when `done`, or, for `detect` under
    /// the degrade policy, when `failed`.
    pub(crate) fn satisfies_gate(&self, task: &Task, phase: Phase) -> bool {
        match task.state.get(phase) {
            PhaseStatus::Done => true,
            PhaseStatus::Failed => {
                phase == Phase::Detect
                    && self.config.detect_failure_policy == DetectFailurePolicy::Degrade
            }
            _ => false,
        }
    }

    /// Decide whether the chain continues once `detect` has settled.
    pub(crate) async fn continue_after_detect(
        &self,
        key: &TaskKey,
        outcome: PhaseOutcome,
    ) -> Result<(), PipelineError> {
        if !matches!(outcome, PhaseOutcome::Done | PhaseOutcome::Failed) {
            return Ok(());
        }
        let halt = {
            let task = self.task.lock().await;
            if !task.is(key) {
                return Ok(());
            }
            task.meta.halt_reason.clone()
        };
        if let Some(reason) = halt {
            tracing::info!(task_id = %key.id, reason = %reason, "Chain halted after detect");
            return Ok(());
        }
        if outcome == PhaseOutcome::Failed {
            tracing::warn!(task_id = %key.id, "Detect failed; continuing without a strategy");
        }
        self.run_chain(Phase::Claims, key).await
    }

    /// Run `from` and each following phase until one does not finish `done`.
    pub(crate) async fn run_chain(&self, from: Phase, key: &TaskKey) -> Result<(), PipelineError> {
        let mut next = Some(from);
        while let Some(phase) = next {
            if phase == Phase::Content && !self.config.content_enabled {
                tracing::debug!(task_id = %key.id, "Content generation disabled");
                break;
            }
            match self.execute(phase, key).await? {
                PhaseOutcome::Done => next = phase.next(),
                _ => break,
            }
        }
        Ok(())
    }

    /// One attempt of `phase`: start, call, settle.
    pub(crate) async fn execute(
        &self,
        phase: Phase,
        key: &TaskKey,
    ) -> Result<PhaseOutcome, PipelineError> {
        let attempt = match self.begin(phase, key).await? {
            Begin::Started(attempt) => attempt,
            Begin::Skipped(outcome) => return Ok(outcome),
        };
        let result = self.call_phase(phase, &attempt).await;
        Ok(self.complete(phase, attempt, result).await)
    }

    async fn begin(&self, phase: Phase, key: &TaskKey) -> Result<Begin, PipelineError> {
        let mut task = self.task.lock().await;
        if !task.is(key) {
            return Ok(Begin::Skipped(PhaseOutcome::Superseded));
        }
        if task.cancel.is_cancelled() {
            return Ok(Begin::Skipped(PhaseOutcome::NotStarted));
        }
        if task.state.get(phase) == PhaseStatus::Running {
            return Err(PipelineError::AlreadyRunning { phase });
        }
        ensure_idle(&task, phase)?;
        self.check_gate(&task, phase)?;

        task.state.set_phase(phase, PhaseStatus::Running)?;
        task.in_flight.insert(phase);
        task.errors.remove(&phase);
        task.touch();
        self.writer.submit(task.snapshot(phase, None));
        tracing::info!(task_id = %task.task_id, phase = %phase, "Phase started");

        Ok(Begin::Started(Attempt {
            key: key.clone(),
            token: task.cancel.clone(),
            started: Instant::now(),
            inputs: PhaseInputs::from_task(&task),
        }))
    }

    async fn call_phase(&self, phase: Phase, attempt: &Attempt) -> PhaseResult {
        let token = &attempt.token;
        let inputs = &attempt.inputs;
        match phase {
            Phase::Detect => {
                let request = DetectRequest {
                    text: inputs.text.clone(),
                    force: inputs.force,
                };
                let detect = cancellable(token, self.stages.detect(request, token)).await?;
                Ok(PhaseData::Detect(detect))
            }
            Phase::Claims => {
                let request = ClaimsRequest {
                    text: inputs.text.clone(),
                    strategy: inputs.strategy.clone(),
                };
                let claims = cancellable(token, self.stages.extract_claims(request, token)).await?;
                Ok(PhaseData::Claims(claims))
            }
            Phase::Evidence => {
                let request = EvidenceRequest {
                    text: Some(inputs.text.clone()),
                    claims: inputs.claims.clone(),
                    strategy: inputs.strategy.clone(),
                };
                let raw = cancellable(token, self.stages.retrieve_evidence(request, token)).await?;
                if token.is_cancelled() {
                    return Err(StageError::Cancelled.into());
                }
                let request = AlignRequest {
                    claims: inputs.claims.clone(),
                    evidences: raw.clone(),
                    strategy: inputs.strategy.clone(),
                };
                let aligned = cancellable(token, self.stages.align_evidence(request, token)).await?;
                Ok(PhaseData::Evidence { raw, aligned })
            }
            Phase::Report => {
                let request = ReportRequest {
                    text: inputs.text.clone(),
                    claims: inputs.claims.clone(),
                    evidences: inputs.evidences.clone(),
                    detect_data: inputs.detect.clone(),
                    strategy: inputs.strategy.clone(),
                };
                let report = cancellable(token, self.stages.synthesize_report(request, token)).await?;
                Ok(PhaseData::Report(report))
            }
            Phase::Simulation => self.call_simulation(attempt).await,
            Phase::Content => {
                let Some(report) = inputs.report.clone() else {
                    return Err(StageError::Other(anyhow::anyhow!("No report to base content on")).into());
                };
                let content = &self.config.content;
                let request = ContentRequest {
                    text: inputs.text.clone(),
                    report,
                    simulation: inputs.simulation.clone().filter(SimulationResult::is_complete),
                    style: content.style.clone(),
                    platforms: content.platforms.clone(),
                    include_faq: content.include_faq,
                    faq_count: content.faq_count,
                };
                let draft = cancellable(token, self.stages.generate_content(request, token)).await?;
                Ok(PhaseData::Content(draft))
            }
        }
    }

    /// Drive the simulation stream, folding each fragment into the task as
    /// it arrives. The phase is `done` only when every stage was merged.
    async fn call_simulation(&self, attempt: &Attempt) -> PhaseResult {
        let token = &attempt.token;
        let inputs = &attempt.inputs;
        let request = SimulateRequest {
            text: inputs.text.clone(),
            claims: inputs.claims.clone(),
            evidences: inputs.evidences.clone(),
            report: inputs.report.clone(),
            time_window_hours: self.config.simulation.time_window_hours,
            platform: self.config.simulation.platform.clone(),
            comments: Vec::new(),
        };

        let (tx, mut rx) = mpsc::channel(SIMULATION_CHANNEL_CAPACITY);
        let mut aggregator = StreamAggregator::new();
        let call = self.stages.simulate_opinion(request, tx, token);
        tokio::pin!(call);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break Err(StageError::Cancelled),
                Some(event) = rx.recv() => self.absorb(&mut aggregator, &event, &attempt.key).await,
                res = &mut call => {
                    while let Ok(event) = rx.try_recv() {
                        self.absorb(&mut aggregator, &event, &attempt.key).await;
                    }
                    break res;
                }
            }
        };

        let partial = (!aggregator.is_empty()).then(|| PhaseData::Simulation(aggregator.result().clone()));
        match outcome {
            Ok(()) if aggregator.result().is_complete() => {
                Ok(PhaseData::Simulation(aggregator.into_result()))
            }
            Ok(()) => Err(PhaseFailure {
                error: StageError::IncompleteStream {
                    missing: aggregator.result().missing_stages(),
                },
                partial,
            }),
            Err(error) => Err(PhaseFailure { error, partial }),
        }
    }

    async fn absorb(&self, aggregator: &mut StreamAggregator, event: &SimulationEvent, key: &TaskKey) {
        let partial = match aggregator.merge(event) {
            Ok(result) => result.clone(),
            Err(e) => {
                tracing::warn!(task_id = %key.id, stage = %event.stage, error = %e, "Rejected simulation event");
                return;
            }
        };
        let mut task = self.task.lock().await;
        if !task.is(key) {
            return;
        }
        task.results.simulation = Some(partial);
        task.touch();
        self.writer.submit(task.snapshot(Phase::Simulation, None));
    }

    async fn complete(&self, phase: Phase, attempt: Attempt, result: PhaseResult) -> PhaseOutcome {
        // Bind the history record first so the terminal snapshot carries it.
        if let Ok(data) = &result {
            self.bind_record(&attempt.key, data).await;
        }

        let mut task = self.task.lock().await;
        if !task.is(&attempt.key) {
            tracing::debug!(task_id = %attempt.key.id, phase = %phase, "Discarding result of replaced task");
            return PhaseOutcome::Superseded;
        }
        task.in_flight.remove(&phase);
        let duration_ms = u64::try_from(attempt.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (status, outcome) = match result {
            Ok(data) => {
                task.results.store(data);
                (PhaseStatus::Done, PhaseOutcome::Done)
            }
            Err(PhaseFailure { error, partial }) => {
                if let Some(partial) = partial {
                    task.results.store(partial);
                }
                if error.is_cancellation() {
                    (PhaseStatus::Canceled, PhaseOutcome::Canceled)
                } else {
                    task.errors.insert(phase, error.to_string());
                    (PhaseStatus::Failed, PhaseOutcome::Failed)
                }
            }
        };

        if let Err(e) = task.state.set_phase(phase, status) {
            tracing::warn!(task_id = %task.task_id, error = %e, "Dropping phase result");
            return PhaseOutcome::Superseded;
        }
        if phase == Phase::Detect {
            task.meta.halt_reason = self.halt_after_detect(&task, status);
        }
        task.touch();
        self.writer.submit(task.snapshot(phase, Some(duration_ms)));

        match outcome {
            PhaseOutcome::Failed => tracing::warn!(
                task_id = %task.task_id,
                phase = %phase,
                duration_ms,
                error = task.errors.get(&phase).map(String::as_str).unwrap_or_default(),
                "Phase failed"
            ),
            _ => tracing::info!(
                task_id = %task.task_id,
                phase = %phase,
                status = %status,
                duration_ms,
                "Phase settled"
            ),
        }
        outcome
    }

    fn halt_after_detect(&self, task: &Task, status: PhaseStatus) -> Option<HaltReason> {
        match status {
            PhaseStatus::Done => {
                let strategy = task.results.strategy()?;
                if task.is_forced() || strategy.in_scope() {
                    None
                } else {
                    Some(HaltReason::OutOfScope {
                        text_type: strategy.detected_text_type.clone(),
                        confidence: strategy.news_confidence,
                        reason: strategy.news_reason.clone(),
                    })
                }
            }
            PhaseStatus::Failed
                if self.config.detect_failure_policy == DetectFailurePolicy::Halt =>
            {
                Some(HaltReason::DetectFailed)
            }
            _ => None,
        }
    }

    /// Write a finished report, simulation or draft to the history store.
    ///
    /// The first report issues the record id; later writes reuse it.
    /// Simulation and content are written only once a record exists.
    async fn bind_record(&self, key: &TaskKey, data: &PhaseData) {
        let (record_id, input_text, detect) = {
            let task = self.task.lock().await;
            if !task.is(key) {
                return;
            }
            (
                task.meta.record_id.clone(),
                task.input_text.clone(),
                task.results.detect.clone(),
            )
        };

        let written = match (data, record_id) {
            (PhaseData::Report(report), None) => {
                match self.history.save_report(&input_text, report, detect.as_ref()).await {
                    Ok(id) => {
                        let mut task = self.task.lock().await;
                        if task.is(key) && task.meta.record_id.is_none() {
                            tracing::info!(task_id = %key.id, record_id = %id, "Bound history record");
                            task.meta.record_id = Some(id);
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            (PhaseData::Report(report), Some(id)) => {
                self.history.update_report(&id, report, detect.as_ref()).await
            }
            (PhaseData::Simulation(simulation), Some(id)) => {
                self.history.update_simulation(&id, simulation).await
            }
            (PhaseData::Content(content), Some(id)) => self.history.update_content(&id, content).await,
            (PhaseData::Simulation(_) | PhaseData::Content(_), None) => {
                tracing::debug!(task_id = %key.id, phase = %data.phase(), "No history record to update");
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(e) = written {
            tracing::warn!(task_id = %key.id, phase = %data.phase(), error = %e, "Failed to write history");
        }
    }
}

/// Only one attempt of a task executes at a time: `phase` may start only
/// when nothing else is in flight.
pub(crate) fn ensure_idle(task: &Task, phase: Phase) -> Result<(), PipelineError> {
    if task.in_flight.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Busy {
            phase,
            in_flight: task.in_flight.iter().copied().collect(),
        })
    }
}

/// Mark running phases `canceled` and return their snapshots. Phases whose
/// attempt is executing are left alone unless `include_in_flight`.
pub(crate) fn settle_running(task: &mut Task, include_in_flight: bool) -> Vec<SnapshotUpsert> {
    let running = task.state.phases().phases_with(PhaseStatus::Running);
    let mut upserts = Vec::new();
    for phase in running {
        if !include_in_flight && task.in_flight.contains(&phase) {
            continue;
        }
        if task.state.set_phase(phase, PhaseStatus::Canceled).is_ok() {
            task.in_flight.remove(&phase);
            task.touch();
            upserts.push(task.snapshot(phase, None));
        }
    }
    upserts
}

#[cfg(test)]
mod tests {
    use super::*;
    use truthcast_common::PhaseStatusMap;

    #[test]
    fn test_new_task_id_is_unique() {
        let a = new_task_id();
        let b = new_task_id();
        assert!(a.starts_with("task_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_settle_running_skips_in_flight() {
        let mut task = Task::new("task_s".into(), "文本".into(), false, 1);
        task.state.replace(PhaseStatusMap::from_entries([
            (Phase::Detect, PhaseStatus::Done),
            (Phase::Claims, PhaseStatus::Running),
            (Phase::Evidence, PhaseStatus::Running),
        ]));
        task.in_flight.insert(Phase::Evidence);

        let upserts = settle_running(&mut task, false);
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].phase, Phase::Claims);
        assert_eq!(upserts[0].status, PhaseStatus::Canceled);
        assert_eq!(task.state.get(Phase::Evidence), PhaseStatus::Running);

        let upserts = settle_running(&mut task, true);
        assert_eq!(upserts.len(), 1);
        assert_eq!(task.state.get(Phase::Evidence), PhaseStatus::Canceled);
        assert!(task.in_flight.is_empty());
    }

    #[test]
    fn test_ensure_idle_rejects_while_attempt_executes() {
        let mut task = Task::new("task_b".into(), "文本".into(), false, 1);
        assert!(ensure_idle(&task, Phase::Claims).is_ok());

        task.in_flight.insert(Phase::Evidence);
        match ensure_idle(&task, Phase::Claims) {
            Err(PipelineError::Busy { phase, in_flight }) => {
                assert_eq!(phase, Phase::Claims);
                assert_eq!(in_flight, vec![Phase::Evidence]);
            }
            other => panic!("expected Busy, got {other:?}"),
        }
    }
}
