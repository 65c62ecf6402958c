//! Handle given to a running body.

use tracing::{debug, trace};

use super::task::Task;
use crate::error::{TaskError, TaskFault};

/// Passed to `TaskBody::execute`. Consuming `finish` ends the task; dropping
/// the context without finishing ends it with no errors.
pub struct ExecutionContext {
    task: Task,
    finished: bool,
}

impl ExecutionContext {
    pub(crate) fn new(task: Task) -> Self {
        Self {
            task,
            finished: false,
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Cancellation is advisory once executing; long bodies poll this.
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Resolves when the task is cancelled. Intended for `tokio::select!`.
    pub async fn cancelled(&self) {
        self.task.wait_until_cancelled().await
    }

    /// Report a new task produced by this body. The queue running this task
    /// picks it up.
    pub fn produce(&self, task: Task) {
        self.task.produce(&task);
    }

    pub fn finish(mut self, errors: Vec<TaskError>) -> Result<(), TaskFault> {
        self.finished = true;
        self.task.finish_internal(errors, true)
    }

    pub fn fail(self, error: TaskError) -> Result<(), TaskFault> {
        self.finish(vec![error])
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!("{} dropped its context without finishing", self.task);
        if let Err(fault) = self.task.finish_internal(Vec::new(), true) {
            trace!("implicit finish skipped: {}", fault);
        }
    }
}
