//! Conditions: asynchronous predicates that gate execution.
//!
//! A condition can also contribute
//! - a dependency (`dependency_for`), injected into the task when it is
//!   enqueued, and
//! - an exclusivity category (`exclusivity`), claimed when it is enqueued.

mod block;
mod dependencies;
pub(crate) mod evaluator;
mod exclusive;
mod gate;
mod negated;
mod silent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::exclusivity::ExclusivityPolicy;
use crate::task::Task;

pub use block::BlockCondition;
pub use dependencies::{NoCancelledDependencies, NoFailedDependencies};
pub use exclusive::MutuallyExclusive;
pub use gate::DependencyCondition;
pub use negated::NegatedCondition;
pub use silent::SilentCondition;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionResult {
    Admitted,
    Rejected(TaskError),
}

impl ConditionResult {
    pub fn is_admitted(&self) -> bool {
        matches!(self, ConditionResult::Admitted)
    }
}

/// Exclusivity contributed by a condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exclusivity {
    pub category: String,
    pub policy: ExclusivityPolicy,
}

#[async_trait]
pub trait Condition: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn exclusivity(&self) -> Option<Exclusivity> {
        None
    }

    /// A task that must finish before `task` is evaluated.
    fn dependency_for(&self, _task: &Task) -> Option<Task> {
        None
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult;
}

/// Condition combinators.
pub trait ConditionExt: Condition + Sized {
    fn negated(self) -> NegatedCondition<Self> {
        NegatedCondition::new(self)
    }

    fn silent(self) -> SilentCondition<Self> {
        SilentCondition::new(self)
    }
}

impl<C: Condition> ConditionExt for C {}
