//! Evaluates a task's conditions and collects their enqueue-time
//! contributions.

use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use super::{Condition, ConditionResult, Exclusivity};
use crate::error::TaskError;
use crate::task::{Task, depends_on};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    Admitted,
    /// Every rejection, in condition order.
    Rejected(Vec<TaskError>),
}

/// Run all conditions concurrently and wait for every one of them.
pub(crate) async fn evaluate(task: &Task, conditions: &[Arc<dyn Condition>]) -> Verdict {
    if conditions.is_empty() {
        return Verdict::Admitted;
    }
    let results = join_all(conditions.iter().map(|c| c.evaluate(task))).await;
    let errors: Vec<TaskError> = results
        .into_iter()
        .filter_map(|result| match result {
            ConditionResult::Admitted => None,
            ConditionResult::Rejected(error) => Some(error),
        })
        .collect();
    if errors.is_empty() {
        Verdict::Admitted
    } else {
        Verdict::Rejected(errors)
    }
}

/// Dependencies contributed by `task`'s conditions, minus any that would
/// close a cycle.
pub(crate) fn condition_dependencies(task: &Task) -> Vec<Task> {
    let mut dependencies: Vec<Task> = Vec::new();
    for condition in task.conditions() {
        let Some(dependency) = condition.dependency_for(task) else {
            continue;
        };
        if dependency == *task || depends_on(&dependency, task) {
            debug!(
                "dropping dependency {} of {} from '{}': would form a cycle",
                dependency,
                task,
                condition.name()
            );
            continue;
        }
        if !dependencies.contains(&dependency) {
            dependencies.push(dependency);
        }
    }
    dependencies
}

/// Exclusivity categories claimed by `task`'s conditions. The first
/// condition naming a category decides its policy.
pub(crate) fn exclusivity_claims(task: &Task) -> Vec<Exclusivity> {
    let mut claims: Vec<Exclusivity> = Vec::new();
    for exclusivity in task.conditions().iter().filter_map(|c| c.exclusivity()) {
        if !claims.iter().any(|c| c.category == exclusivity.category) {
            claims.push(exclusivity);
        }
    }
    claims
}
