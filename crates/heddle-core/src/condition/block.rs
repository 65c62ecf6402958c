use std::future::Future;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use super::{Condition, ConditionResult};
use crate::error::TaskError;
use crate::task::Task;

type Predicate = Box<dyn Fn(Task) -> BoxFuture<'static, bool> + Send + Sync>;

/// Condition backed by a predicate closure.
pub struct BlockCondition {
    name: String,
    predicate: Predicate,
}

impl BlockCondition {
    pub fn new(name: impl Into<String>, f: impl Fn(&Task) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(move |task| futures::future::ready(f(&task)).boxed()),
        }
    }

    pub fn from_async<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(move |task| f(task).boxed()),
        }
    }
}

#[async_trait]
impl Condition for BlockCondition {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, task: &Task) -> ConditionResult {
        if (self.predicate)(task.clone()).await {
            ConditionResult::Admitted
        } else {
            ConditionResult::Rejected(TaskError::condition_failed(
                &self.name,
                "predicate returned false",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn predicate_decides() {
        let task = Task::noop("t");
        let yes = BlockCondition::new("yes", |_| true);
        let no = BlockCondition::from_async("no", |_| async { false });

        assert_eq!(yes.evaluate(&task).await, ConditionResult::Admitted);
        assert_eq!(
            no.evaluate(&task).await,
            ConditionResult::Rejected(TaskError::condition_failed(
                "no",
                "predicate returned false"
            ))
        );
    }

    #[tokio::test]
    async fn predicate_sees_the_task() {
        let task = Task::noop("named");
        let cond = BlockCondition::new("is-named", |t| t.name() == Some("named"));
        assert!(cond.evaluate(&task).await.is_admitted());
    }
}
