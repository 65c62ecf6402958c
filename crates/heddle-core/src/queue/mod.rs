//! Task queue: accepts tasks and starts each one when it becomes ready.
//!
//! # キューの役割
//! - 投入時: 条件由来の依存を注入し、排他カテゴリを確保する
//! - 実行時: タスクごとにドライバを spawn し、依存の完了・一時停止の解除・
//!   同時実行数の空きを待ってから start する
//! - 終了時: 排他カテゴリを解放し、delegate に通知する
//!
//! キャンセルされたタスクは待機をスキップして即座に終了処理へ進みます。

mod config;
mod driver;

pub use config::QueueConfig;

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, info, warn};

use crate::condition::evaluator;
use crate::domain::{QueueId, TaskState};
use crate::error::{TaskError, TaskFault};
use crate::exclusivity::ExclusivityManager;
use crate::status::QueueCounts;
use crate::task::{DependencyOrigin, Task, TaskObserver};

/// Notified about tasks entering and leaving a queue.
///
/// Called synchronously; `queue_task_did_finish` runs from inside the task's
/// finish, after its observers and before its completion callback.
pub trait QueueDelegate: Send + Sync + 'static {
    fn queue_will_add_task(&self, _queue: &TaskQueue, _task: &Task) {}

    fn queue_task_did_finish(&self, _queue: &TaskQueue, _task: &Task, _errors: &[TaskError]) {}
}

#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<QueueShared>,
}

struct QueueShared {
    id: QueueId,
    name: String,
    config: QueueConfig,
    exclusivity: Arc<ExclusivityManager>,
    permits: Option<Arc<Semaphore>>,
    suspended: watch::Sender<bool>,
    /// Tasks between `add_task` and finish.
    tasks: Mutex<Vec<Task>>,
    in_flight: watch::Sender<usize>,
    delegate: Mutex<Option<Arc<dyn QueueDelegate>>>,
}

impl TaskQueue {
    /// Queue with its own exclusivity manager.
    pub fn new(config: QueueConfig) -> Self {
        let id = QueueId::generate();
        let name = config.name.clone().unwrap_or_else(|| id.to_string());
        let exclusivity = Arc::new(ExclusivityManager::new(name.clone()));
        Self::build(id, name, config, exclusivity)
    }

    /// Queue sharing `exclusivity` with other queues.
    pub fn with_exclusivity(config: QueueConfig, exclusivity: Arc<ExclusivityManager>) -> Self {
        let id = QueueId::generate();
        let name = config.name.clone().unwrap_or_else(|| id.to_string());
        Self::build(id, name, config, exclusivity)
    }

    fn build(
        id: QueueId,
        name: String,
        config: QueueConfig,
        exclusivity: Arc<ExclusivityManager>,
    ) -> Self {
        let permits = config
            .permit_count()
            .map(|limit| Arc::new(Semaphore::new(limit)));
        let (suspended, _) = watch::channel(config.start_suspended);
        let (in_flight, _) = watch::channel(0);
        Self {
            shared: Arc::new(QueueShared {
                id,
                name,
                config,
                exclusivity,
                permits,
                suspended,
                tasks: Mutex::new(Vec::new()),
                in_flight,
                delegate: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> QueueId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn exclusivity(&self) -> &Arc<ExclusivityManager> {
        &self.shared.exclusivity
    }

    pub fn set_delegate(&self, delegate: impl QueueDelegate) {
        *self.shared.delegate.lock() = Some(Arc::new(delegate));
    }

    fn delegate(&self) -> Option<Arc<dyn QueueDelegate>> {
        self.shared.delegate.lock().clone()
    }

    // ========================================
    // Submission
    // ========================================

    /// Enqueue `task` (Initialized -> Pending) and spawn its driver on the
    /// current tokio runtime.
    pub fn add_task(&self, task: Task) -> Result<(), TaskFault> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| TaskFault::NoRuntime { task: task.id() })?;
        task.mark_enqueued()?;

        for dependency in evaluator::condition_dependencies(&task) {
            if let Err(fault) = task.add_dependency_with(&dependency, DependencyOrigin::Condition) {
                warn!("{}: condition dependency of {} skipped: {}", self, task, fault);
                continue;
            }
            if dependency.state() == TaskState::Initialized
                && let Err(fault) = self.add_task(dependency.clone())
            {
                warn!("{}: could not enqueue {}: {}", self, dependency, fault);
            }
        }

        let claims = evaluator::exclusivity_claims(&task);
        let categories: Vec<String> = claims.iter().map(|c| c.category.clone()).collect();
        let queue = Arc::downgrade(&self.shared);
        let exclusivity = Arc::clone(&self.shared.exclusivity);
        task.add_finish_hook(Box::new(move |task, errors| {
            for category in &categories {
                exclusivity.release(task, category);
            }
            if let Some(shared) = queue.upgrade() {
                TaskQueue { shared }.task_did_finish(task, errors);
            }
        }))?;
        task.add_shared_observer(Arc::new(ProduceForwarder {
            queue: Arc::downgrade(&self.shared),
        }))?;
        for claim in claims {
            self.shared
                .exclusivity
                .claim(&task, &claim.category, claim.policy);
        }

        if let Some(delegate) = self.delegate() {
            delegate.queue_will_add_task(self, &task);
        }
        {
            let mut tasks = self.shared.tasks.lock();
            tasks.push(task.clone());
            self.shared.in_flight.send_replace(tasks.len());
        }
        debug!("{} accepted {}", self, task);
        handle.spawn(driver::drive(self.clone(), task));
        Ok(())
    }

    pub fn add_tasks(&self, tasks: impl IntoIterator<Item = Task>) -> Result<(), TaskFault> {
        for task in tasks {
            self.add_task(task)?;
        }
        Ok(())
    }

    fn task_did_finish(&self, task: &Task, errors: &[TaskError]) {
        {
            let mut tasks = self.shared.tasks.lock();
            tasks.retain(|t| t != task);
            self.shared.in_flight.send_replace(tasks.len());
        }
        if let Some(delegate) = self.delegate() {
            delegate.queue_task_did_finish(self, task, errors);
        }
    }

    // ========================================
    // Control
    // ========================================

    /// Pause dispatch of tasks that have not started yet. Running tasks are
    /// unaffected; cancelled tasks still finish.
    pub fn set_suspended(&self, suspended: bool) {
        let previous = self.shared.suspended.send_replace(suspended);
        if previous != suspended {
            info!("{} {}", self, if suspended { "suspended" } else { "resumed" });
        }
    }

    pub fn is_suspended(&self) -> bool {
        *self.shared.suspended.borrow()
    }

    pub fn cancel_all(&self) {
        let tasks = self.tasks();
        info!("{} cancelling {} task(s)", self, tasks.len());
        for task in tasks {
            task.cancel();
        }
    }

    // ========================================
    // Inspection
    // ========================================

    /// Tasks added and not yet finished, in submission order.
    pub fn tasks(&self) -> Vec<Task> {
        self.shared.tasks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for task in self.tasks() {
            counts.record(task.state(), task.is_cancelled());
        }
        counts
    }

    /// Resolves once every added task has finished.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.shared.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub(crate) async fn wait_until_resumed(&self) {
        let mut rx = self.shared.suspended.subscribe();
        let _ = rx.wait_for(|suspended| !*suspended).await;
    }

    pub(crate) fn permits(&self) -> Option<Arc<Semaphore>> {
        self.shared.permits.clone()
    }
}

impl fmt::Display for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue '{}'", self.shared.name)
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("len", &self.len())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

/// Submits tasks produced by a running body to the queue running it.
struct ProduceForwarder {
    queue: Weak<QueueShared>,
}

impl TaskObserver for ProduceForwarder {
    fn task_did_produce(&self, task: &Task, produced: &Task) {
        let Some(shared) = self.queue.upgrade() else {
            return;
        };
        let queue = TaskQueue { shared };
        if let Err(fault) = queue.add_task(produced.clone()) {
            warn!("{}: task produced by {} rejected: {}", queue, task, fault);
        }
    }
}
