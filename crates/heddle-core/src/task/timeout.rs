//! Timer task that cancels another task.

use std::time::Duration;

use tracing::info;

use super::task::Task;
use crate::error::TaskError;

/// Task that, once started, cancels `target` with `TaskError::TimedOut`
/// unless `target` finishes within `after`.
///
/// Holds only a weak reference to `target`, so an abandoned target is not
/// kept alive by its timer. The timer ends as soon as the target is dropped.
pub fn timeout_task(target: &Task, after: Duration) -> Task {
    let weak = target.downgrade();
    let mut finished = target.finished_signal();
    Task::from_fn(format!("timeout({})", target), move |ctx| async move {
        tokio::select! {
            // Err: target dropped.
            _ = async { let _ = finished.wait_for(|done| *done).await; } => {}
            _ = ctx.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                if let Some(target) = weak.upgrade()
                    && !target.is_finished()
                {
                    info!("{} timed out after {:?}", target, after);
                    target.cancel_with(TaskError::TimedOut { after });
                }
            }
        }
    })
}
