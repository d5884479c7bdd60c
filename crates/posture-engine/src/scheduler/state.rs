use crate::error::EngineError;
use serde::Serialize;

/// Lifecycle of the evaluation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Waiting for the next cycle
    Idle,
    /// A cycle is running
    Evaluating,
    /// Shut down; terminal
    Stopped,
}

/// Validates a scheduler transition.
///
/// # Errors
/// `IllegalTransition` if `to` cannot follow `from`
pub fn validate_transition(from: SchedulerState, to: SchedulerState) -> Result<(), EngineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: SchedulerState) -> Vec<SchedulerState> {
    use SchedulerState::{Evaluating, Idle, Stopped};
    match from {
        Idle => vec![Evaluating, Stopped],
        Evaluating => vec![Idle, Stopped],
        Stopped => vec![],
    }
}

fn allowed(from: SchedulerState, to: SchedulerState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
