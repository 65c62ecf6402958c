use async_trait::async_trait;

use super::{Condition, ConditionResult, Exclusivity};
use crate::error::TaskError;
use crate::task::Task;

/// Inverts another condition's verdict while keeping its dependency and
/// exclusivity contributions.
pub struct NegatedCondition<C> {
    inner: C,
    name: String,
}

impl<C: Condition> NegatedCondition<C> {
    pub fn new(inner: C) -> Self {
        let name = format!("Not<{}>", inner.name());
        Self { inner, name }
    }
}

#[async_trait]
impl<C: Condition> Condition for NegatedCondition<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn exclusivity(&self) -> Option<Exclusivity> {
        self.inner.exclusivity()
    }

    fn dependency_for(&self, task: &Task) -> Option<Task> {
        self.inner.dependency_for(task)
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        match self.inner.evaluate(task).await {
            ConditionResult::Admitted => ConditionResult::Rejected(TaskError::ConditionNegated {
                condition: self.inner.name().to_string(),
            }),
            ConditionResult::Rejected(_) => ConditionResult::Admitted,
        }
    }
}
