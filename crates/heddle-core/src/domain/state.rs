//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a task.
///
/// State transitions:
/// - Initialized -> Pending -> EvaluatingConditions -> Ready -> Executing -> Finishing -> Finished
/// - Initialized | Pending | EvaluatingConditions | Ready -> Finishing (cancelled or rejected, body never runs)
///
/// Cancellation is a separate sticky flag, not a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Constructed, not yet handed to a queue.
    Initialized,

    /// Enqueued; waiting for dependencies.
    Pending,

    /// Conditions are being evaluated.
    EvaluatingConditions,

    /// Admitted; about to run its body.
    Ready,

    /// The body is running.
    Executing,

    /// Finish has begun; observers are being told.
    Finishing,

    /// Terminal.
    Finished,
}

impl TaskState {
    /// Is `next` a permitted successor of `self`?
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Initialized, Pending)
                | (Initialized, Finishing)
                | (Pending, EvaluatingConditions)
                | (Pending, Finishing)
                | (EvaluatingConditions, Ready)
                | (EvaluatingConditions, Finishing)
                | (Ready, Executing)
                | (Ready, Finishing)
                | (Executing, Finishing)
                | (Finishing, Finished)
        )
    }

    /// Can `start()` still be called?
    pub fn is_startable(self) -> bool {
        matches!(self, TaskState::Initialized | TaskState::Pending)
    }

    /// Dependencies, conditions and exclusivity claims may still change.
    pub fn accepts_configuration(self) -> bool {
        matches!(self, TaskState::Initialized | TaskState::Pending)
    }

    /// Finish has begun (no further errors or dependencies).
    pub fn is_finishing(self) -> bool {
        matches!(self, TaskState::Finishing | TaskState::Finished)
    }

    pub fn is_terminal(self) -> bool {
        self == TaskState::Finished
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Initialized => "initialized",
            TaskState::Pending => "pending",
            TaskState::EvaluatingConditions => "evaluating_conditions",
            TaskState::Ready => "ready",
            TaskState::Executing => "executing",
            TaskState::Finishing => "finishing",
            TaskState::Finished => "finished",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use TaskState::*;

    #[rstest]
    #[case::enqueue(Initialized, Pending)]
    #[case::evaluate(Pending, EvaluatingConditions)]
    #[case::admit(EvaluatingConditions, Ready)]
    #[case::execute(Ready, Executing)]
    #[case::finish(Executing, Finishing)]
    #[case::commit(Finishing, Finished)]
    #[case::bail_out_pending(Pending, Finishing)]
    #[case::bail_out_evaluating(EvaluatingConditions, Finishing)]
    fn permitted_transitions(#[case] from: TaskState, #[case] to: TaskState) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_conditions(Pending, Executing)]
    #[case::backwards(Executing, Pending)]
    #[case::skip_finishing(Executing, Finished)]
    #[case::after_finished(Finished, Pending)]
    #[case::finished_again(Finished, Finishing)]
    fn rejected_transitions(#[case] from: TaskState, #[case] to: TaskState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn only_finished_is_terminal() {
        assert!(Finished.is_terminal());
        assert!(!Finishing.is_terminal());
        assert!(Finishing.is_finishing());
    }

    #[test]
    fn serializes_as_snake_case() {
        let s = serde_json::to_string(&EvaluatingConditions).unwrap();
        assert_eq!(s, "\"evaluating_conditions\"");
    }
}
