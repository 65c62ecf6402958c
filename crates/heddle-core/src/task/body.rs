//! Task bodies: the user work a task runs once admitted.

use std::future::Future;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use super::context::ExecutionContext;
use crate::error::TaskError;

/// The work a task performs.
///
/// `execute` receives the context that finishes the task. The body may call
/// `ctx.finish(..)` at any point (even after awaiting other work); if it
/// simply drops the context, the task finishes with no errors.
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    async fn execute(&self, ctx: ExecutionContext);

    /// Called instead of `execute` when the task finishes without running
    /// (cancelled before start, or rejected by a condition). Returned errors
    /// are appended to the task's errors.
    async fn abandon(&self) -> Vec<TaskError> {
        Vec::new()
    }
}

/// Body backed by a one-shot closure.
pub struct FnBody<F> {
    f: Mutex<Option<F>>,
}

impl<F> FnBody<F> {
    pub fn new(f: F) -> Self {
        Self {
            f: Mutex::new(Some(f)),
        }
    }
}

#[async_trait]
impl<F, Fut> TaskBody for FnBody<F>
where
    F: FnOnce(ExecutionContext) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn execute(&self, ctx: ExecutionContext) {
        let f = self.f.lock().take();
        match f {
            Some(f) => f(ctx).await,
            None => warn!("body of {} already consumed", ctx.task()),
        }
    }
}

/// Finishes immediately.
pub struct NoopBody;

#[async_trait]
impl TaskBody for NoopBody {
    async fn execute(&self, ctx: ExecutionContext) {
        if let Err(fault) = ctx.finish(Vec::new()) {
            warn!("noop body could not finish: {}", fault);
        }
    }
}
