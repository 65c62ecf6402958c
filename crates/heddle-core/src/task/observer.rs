//! Lifecycle observers.
//!
//! Callbacks are synchronous and run on whichever thread drives the task,
//! with no task lock held. Keep them short; spawn if real work is needed.

use std::time::Duration;

use tracing::warn;

use super::task::Task;
use super::timeout::timeout_task;
use crate::error::TaskError;

/// Every method defaults to a no-op.
pub trait TaskObserver: Send + Sync + 'static {
    fn task_did_start(&self, _task: &Task) {}

    /// Admitted, state is Executing, body not yet started.
    fn task_will_execute(&self, _task: &Task) {}

    /// First cancellation only.
    fn task_did_cancel(&self, _task: &Task) {}

    fn task_did_produce(&self, _task: &Task, _produced: &Task) {}

    /// State is Finishing.
    fn task_will_finish(&self, _task: &Task, _errors: &[TaskError]) {}

    /// State is Finished.
    fn task_did_finish(&self, _task: &Task, _errors: &[TaskError]) {}
}

type TaskCallback = Box<dyn Fn(&Task) + Send + Sync>;
type ProduceCallback = Box<dyn Fn(&Task, &Task) + Send + Sync>;
type FinishCallback = Box<dyn Fn(&Task, &[TaskError]) + Send + Sync>;

/// Observer assembled from closures.
#[derive(Default)]
pub struct BlockObserver {
    start: Option<TaskCallback>,
    will_execute: Option<TaskCallback>,
    cancel: Option<TaskCallback>,
    produce: Option<ProduceCallback>,
    will_finish: Option<FinishCallback>,
    finish: Option<FinishCallback>,
}

impl BlockObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, f: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        self.start = Some(Box::new(f));
        self
    }

    pub fn on_will_execute(mut self, f: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        self.will_execute = Some(Box::new(f));
        self
    }

    pub fn on_cancel(mut self, f: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        self.cancel = Some(Box::new(f));
        self
    }

    pub fn on_produce(mut self, f: impl Fn(&Task, &Task) + Send + Sync + 'static) -> Self {
        self.produce = Some(Box::new(f));
        self
    }

    pub fn on_will_finish(
        mut self,
        f: impl Fn(&Task, &[TaskError]) + Send + Sync + 'static,
    ) -> Self {
        self.will_finish = Some(Box::new(f));
        self
    }

    pub fn on_finish(mut self, f: impl Fn(&Task, &[TaskError]) + Send + Sync + 'static) -> Self {
        self.finish = Some(Box::new(f));
        self
    }
}

impl TaskObserver for BlockObserver {
    fn task_did_start(&self, task: &Task) {
        if let Some(f) = &self.start {
            f(task);
        }
    }

    fn task_will_execute(&self, task: &Task) {
        if let Some(f) = &self.will_execute {
            f(task);
        }
    }

    fn task_did_cancel(&self, task: &Task) {
        if let Some(f) = &self.cancel {
            f(task);
        }
    }

    fn task_did_produce(&self, task: &Task, produced: &Task) {
        if let Some(f) = &self.produce {
            f(task, produced);
        }
    }

    fn task_will_finish(&self, task: &Task, errors: &[TaskError]) {
        if let Some(f) = &self.will_finish {
            f(task, errors);
        }
    }

    fn task_did_finish(&self, task: &Task, errors: &[TaskError]) {
        if let Some(f) = &self.finish {
            f(task, errors);
        }
    }
}

/// Cancels the observed task with `TaskError::TimedOut` if it is still
/// running `after` it began executing.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutObserver {
    after: Duration,
}

impl TimeoutObserver {
    pub fn new(after: Duration) -> Self {
        Self { after }
    }
}

impl TaskObserver for TimeoutObserver {
    fn task_will_execute(&self, task: &Task) {
        let timer = timeout_task(task, self.after);
        if let Err(fault) = timer.start() {
            warn!("timeout for {} not armed: {}", task, fault);
        }
    }
}
