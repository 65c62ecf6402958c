//! Tasks: state machine, bodies, observers.

mod body;
mod context;
mod graph;
mod observer;
#[allow(clippy::module_inception)]
mod task;
mod timeout;

pub use body::{FnBody, NoopBody, TaskBody};
pub use context::ExecutionContext;
pub use graph::dependency_path;
pub use observer::{BlockObserver, TaskObserver, TimeoutObserver};
pub use task::{Task, WeakTask};
pub use timeout::timeout_task;

pub(crate) use graph::depends_on;
pub(crate) use task::DependencyOrigin;
