use async_trait::async_trait;

use super::{Condition, ConditionResult, Exclusivity};
use crate::task::Task;

/// Evaluates like the wrapped condition but never injects its dependency.
pub struct SilentCondition<C> {
    inner: C,
    name: String,
}

impl<C: Condition> SilentCondition<C> {
    pub fn new(inner: C) -> Self {
        let name = format!("Silent<{}>", inner.name());
        Self { inner, name }
    }
}

#[async_trait]
impl<C: Condition> Condition for SilentCondition<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn exclusivity(&self) -> Option<Exclusivity> {
        self.inner.exclusivity()
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        self.inner.evaluate(task).await
    }
}
