//! Domain model (ids, task states).

pub mod ids;
pub mod state;

pub use ids::{QueueId, TaskId};
pub use state::TaskState;
