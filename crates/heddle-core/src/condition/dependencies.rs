//! Conditions that inspect a task's explicit, finished dependencies.
//!
//! Dependencies injected for ordering (by conditions or exclusivity) are not
//! looked at.

use async_trait::async_trait;

use super::{Condition, ConditionResult};
use crate::error::TaskError;
use crate::task::Task;

/// Rejects if any explicit dependency finished with errors or was cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFailedDependencies {
    ignore_cancellations: bool,
}

impl NoFailedDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancelled dependencies without errors are not treated as failures.
    pub fn ignoring_cancellations() -> Self {
        Self {
            ignore_cancellations: true,
        }
    }
}

#[async_trait]
impl Condition for NoFailedDependencies {
    fn name(&self) -> &str {
        "NoFailedDependencies"
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        for dependency in finished_dependencies(task) {
            if dependency.has_error() && !(self.ignore_cancellations && dependency.is_cancelled())
            {
                return ConditionResult::Rejected(TaskError::DependencyFailed {
                    dependency: dependency.to_string(),
                });
            }
            if dependency.is_cancelled() && !self.ignore_cancellations {
                return ConditionResult::Rejected(TaskError::DependencyCancelled {
                    dependency: dependency.to_string(),
                });
            }
        }
        ConditionResult::Admitted
    }
}

/// Rejects if any explicit dependency was cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCancelledDependencies;

#[async_trait]
impl Condition for NoCancelledDependencies {
    fn name(&self) -> &str {
        "NoCancelledDependencies"
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        match finished_dependencies(task).find(Task::is_cancelled) {
            Some(dependency) => ConditionResult::Rejected(TaskError::DependencyCancelled {
                dependency: dependency.to_string(),
            }),
            None => ConditionResult::Admitted,
        }
    }
}

fn finished_dependencies(task: &Task) -> impl Iterator<Item = Task> {
    task.explicit_dependencies()
        .into_iter()
        .filter(Task::is_finished)
}
