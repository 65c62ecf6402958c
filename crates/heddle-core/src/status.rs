//! Read-only views of tasks and queues, for diagnostics and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, TaskState};
use crate::error::TaskError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: Option<String>,
    pub state: TaskState,
    pub cancelled: bool,
    pub errors: Vec<TaskError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Per-state counts of the tasks a queue currently tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub evaluating_conditions: usize,
    pub ready: usize,
    pub executing: usize,
    pub finishing: usize,
    /// Tracked tasks with the cancelled flag set (any state).
    pub cancelled: usize,
}

impl QueueCounts {
    pub fn record(&mut self, state: TaskState, cancelled: bool) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::EvaluatingConditions => self.evaluating_conditions += 1,
            TaskState::Ready => self.ready += 1,
            TaskState::Executing => self.executing += 1,
            TaskState::Finishing => self.finishing += 1,
            TaskState::Initialized | TaskState::Finished => {}
        }
        if cancelled {
            self.cancelled += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.evaluating_conditions + self.ready + self.executing + self.finishing
    }
}
