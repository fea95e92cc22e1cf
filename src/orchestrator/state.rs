use truthcast_common::{Phase, PhaseStatus, PhaseStatusMap};

use crate::errors::PipelineError;

/// Canonical status of every phase of the active task.
///
/// `set_phase` is the only transition path. Dependency gating is the
/// orchestrator's job; this type only rejects moves that skip `running`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseStateMachine {
    phases: PhaseStatusMap,
}

impl PhaseStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, phase: Phase) -> PhaseStatus {
        self.phases.get(phase)
    }

    pub fn phases(&self) -> &PhaseStatusMap {
        &self.phases
    }

    pub fn set_phase(&mut self, phase: Phase, status: PhaseStatus) -> Result<(), PipelineError> {
        let from = self.phases.get(phase);
        if !is_legal(from, status) {
            return Err(PipelineError::IllegalTransition {
                phase,
                from,
                to: status,
            });
        }
        self.phases.set(phase, status);
        Ok(())
    }

    /// Every phase back to `idle`.
    pub fn reset(&mut self) {
        self.phases = PhaseStatusMap::default();
    }

    /// Install a stored map verbatim, without checking how it was reached.
    pub fn replace(&mut self, phases: PhaseStatusMap) {
        self.phases = phases;
    }
}

fn is_legal(from: PhaseStatus, to: PhaseStatus) -> bool {
    use PhaseStatus::*;
    match (from, to) {
        (_, Idle) => true,
        (Idle, Running) => true,
        (Running, Done | Failed | Canceled) => true,
        (Done | Failed | Canceled, Running) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let mut sm = PhaseStateMachine::new();
        sm.set_phase(Phase::Detect, PhaseStatus::Running).unwrap();
        sm.set_phase(Phase::Detect, PhaseStatus::Done).unwrap();
        assert_eq!(sm.get(Phase::Detect), PhaseStatus::Done);
        assert_eq!(sm.get(Phase::Claims), PhaseStatus::Idle);
    }

    #[test]
    fn test_retry_goes_back_through_running() {
        let mut sm = PhaseStateMachine::new();
        sm.set_phase(Phase::Claims, PhaseStatus::Running).unwrap();
        sm.set_phase(Phase::Claims, PhaseStatus::Failed).unwrap();
        sm.set_phase(Phase::Claims, PhaseStatus::Running).unwrap();
        sm.set_phase(Phase::Claims, PhaseStatus::Done).unwrap();
    }

    #[test]
    fn test_terminal_to_terminal_is_rejected() {
        let mut sm = PhaseStateMachine::new();
        sm.set_phase(Phase::Report, PhaseStatus::Running).unwrap();
        sm.set_phase(Phase::Report, PhaseStatus::Done).unwrap();

        let err = sm.set_phase(Phase::Report, PhaseStatus::Failed).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IllegalTransition {
                phase: Phase::Report,
                from: PhaseStatus::Done,
                to: PhaseStatus::Failed,
            }
        ));
        assert_eq!(sm.get(Phase::Report), PhaseStatus::Done);
    }

    #[test]
    fn test_idle_cannot_jump_to_terminal() {
        let mut sm = PhaseStateMachine::new();
        assert!(sm.set_phase(Phase::Evidence, PhaseStatus::Done).is_err());
        assert!(sm.set_phase(Phase::Evidence, PhaseStatus::Canceled).is_err());
        sm.set_phase(Phase::Evidence, PhaseStatus::Running).unwrap();
        assert!(sm.set_phase(Phase::Evidence, PhaseStatus::Running).is_err());
    }

    #[test]
    fn test_reset_and_replace() {
        let mut sm = PhaseStateMachine::new();
        sm.set_phase(Phase::Detect, PhaseStatus::Running).unwrap();
        sm.reset();
        assert!(sm.phases().all_idle());

        let map = PhaseStatusMap::from_entries([
            (Phase::Detect, PhaseStatus::Done),
            (Phase::Claims, PhaseStatus::Running),
        ]);
        sm.replace(map.clone());
        assert_eq!(sm.phases(), &map);
    }
}
