use async_trait::async_trait;

use super::{Condition, ConditionResult};
use crate::error::TaskError;
use crate::task::Task;

/// Makes the task wait for `gate` (injected as a dependency on enqueue).
/// Optionally rejects unless the gate finished cleanly.
pub struct DependencyCondition {
    gate: Task,
    require_success: bool,
    name: String,
}

impl DependencyCondition {
    pub fn new(gate: Task) -> Self {
        let name = format!("DependsOn<{}>", gate);
        Self {
            gate,
            require_success: false,
            name,
        }
    }

    pub fn requiring_success(mut self) -> Self {
        self.require_success = true;
        self
    }
}

#[async_trait]
impl Condition for DependencyCondition {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency_for(&self, _task: &Task) -> Option<Task> {
        Some(self.gate.clone())
    }

    async fn evaluate(&self, _task: &Task) -> ConditionResult {
        if self.require_success && self.gate.is_failed() {
            ConditionResult::Rejected(TaskError::DependencyFailed {
                dependency: self.gate.to_string(),
            })
        } else {
            ConditionResult::Admitted
        }
    }
}
