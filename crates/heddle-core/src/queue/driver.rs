//! Per-task driver spawned by `TaskQueue::add_task`.
//!
//! Waits, in order, for dependencies, for the queue to be unsuspended and for
//! a concurrency permit, then starts the task. A cancelled task skips the
//! remaining waits so that it can bail out promptly.

use tracing::{error, trace};

use super::TaskQueue;
use crate::task::Task;

pub(super) async fn drive(queue: TaskQueue, task: Task) {
    tokio::select! {
        _ = task.wait_for_dependencies() => {}
        _ = task.wait_until_cancelled() => {}
    }

    if !task.is_cancelled() {
        tokio::select! {
            _ = queue.wait_until_resumed() => {}
            _ = task.wait_until_cancelled() => {}
        }
    }

    let _permit = match queue.permits() {
        Some(permits) if !task.is_cancelled() => tokio::select! {
            permit = permits.acquire_owned() => permit.ok(),
            _ = task.wait_until_cancelled() => None,
        },
        _ => None,
    };

    trace!("{} dispatching {}", queue, task);
    let launch = match task.begin() {
        Ok(launch) => launch,
        Err(fault) => {
            error!("{} could not start {}: {}", queue, task, fault);
            return;
        }
    };
    task.run(launch).await;
    // The body may hand `finish` to other work; keep the permit until then.
    task.wait_until_finished().await;
}
