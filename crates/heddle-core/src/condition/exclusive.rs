use async_trait::async_trait;

use super::{Condition, ConditionResult, Exclusivity};
use crate::exclusivity::ExclusivityPolicy;
use crate::task::Task;

/// Marks the task as a member of a mutual-exclusion category. The ordering or
/// cancellation is done by the exclusivity manager on enqueue; evaluation
/// always admits.
#[derive(Debug, Clone)]
pub struct MutuallyExclusive {
    exclusivity: Exclusivity,
    name: String,
}

impl MutuallyExclusive {
    /// Later tasks in `category` run after earlier ones.
    pub fn new(category: impl Into<String>) -> Self {
        Self::with_policy(category, ExclusivityPolicy::Enqueue)
    }

    /// Later tasks in `category` are cancelled while an earlier one is held.
    pub fn cancelling(category: impl Into<String>) -> Self {
        Self::with_policy(category, ExclusivityPolicy::Cancel)
    }

    pub fn with_policy(category: impl Into<String>, policy: ExclusivityPolicy) -> Self {
        let category = category.into();
        Self {
            name: format!("MutuallyExclusive<{}>", category),
            exclusivity: Exclusivity { category, policy },
        }
    }
}

#[async_trait]
impl Condition for MutuallyExclusive {
    fn name(&self) -> &str {
        &self.name
    }

    fn exclusivity(&self) -> Option<Exclusivity> {
        Some(self.exclusivity.clone())
    }

    async fn evaluate(&self, _task: &Task) -> ConditionResult {
        ConditionResult::Admitted
    }
}
