//! Errors carried by tasks and faults reported to callers.
//!
//! - `TaskError`: lands in a task's `errors` list (condition rejection,
//!   dependency failure, cancellation reason, body failure).
//! - `TaskFault`: programmer misuse (double start, finish outside the body,
//!   mutating a finished task). Returned as `Err`, never swallowed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{TaskId, TaskState};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    #[error("condition '{condition}' failed: {reason}")]
    ConditionFailed { condition: String, reason: String },

    #[error("condition '{condition}' was negated")]
    ConditionNegated { condition: String },

    #[error("dependency '{dependency}' failed")]
    DependencyFailed { dependency: String },

    #[error("dependency '{dependency}' was cancelled")]
    DependencyCancelled { dependency: String },

    #[error("superseded: exclusivity category '{category}' is already held")]
    Superseded { category: String },

    #[error("timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("{message}")]
    Failed { message: String },
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed {
            message: message.into(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        TaskError::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn condition_failed(condition: impl Into<String>, reason: impl Into<String>) -> Self {
        TaskError::ConditionFailed {
            condition: condition.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFault {
    #[error("task {task} was already started (state={state})")]
    AlreadyStarted { task: TaskId, state: TaskState },

    #[error("finish() called on task {task} outside its running body (state={state})")]
    NotExecuting { task: TaskId, state: TaskState },

    #[error("task {task} has already finished")]
    AlreadyFinished { task: TaskId },

    #[error("task {task} can no longer be configured (state={state})")]
    Locked { task: TaskId, state: TaskState },

    #[error("invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("adding {dependency} as a dependency of {task} would create a cycle")]
    DependencyCycle { task: TaskId, dependency: TaskId },

    #[error("task {task} cannot depend on itself")]
    SelfDependency { task: TaskId },

    #[error("group {group} has finished and no longer accepts children")]
    GroupSealed { group: TaskId },

    #[error("no tokio runtime is available to run task {task}")]
    NoRuntime { task: TaskId },
}
