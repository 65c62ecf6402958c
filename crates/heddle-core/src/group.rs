//! Group task: a task whose body runs child tasks on an internal queue.
//!
//! # グループの流れ
//! 1. Assembling: `add_child` は pending に積むだけ
//! 2. Launching / Running: body が pending を内部キューへ投入し、
//!    全ての子が終了した時点でグループ自身を finish する
//! 3. Draining: 開始前にキャンセルされた場合。子はキャンセル済みで投入し、
//!    全ての子の終了を待ってから終了する
//! 4. Sealed: 以後の `add_child` は `GroupSealed`
//!
//! 子の数は「予約」で数えます。`add_child` はロック内で予約を取り、
//! 内部キューの delegate が終了を数えるので、最後の子の終了と新しい子の
//! 追加が競合してもグループが先に終わることはありません。

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::domain::{TaskId, TaskState};
use crate::error::{TaskError, TaskFault};
use crate::exclusivity::ExclusivityManager;
use crate::queue::{QueueConfig, QueueDelegate, TaskQueue};
use crate::task::{ExecutionContext, Task, TaskBody, TaskObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Assembling,
    Launching,
    Running,
    Draining,
    Sealed,
}

struct GroupInner {
    phase: Phase,
    cancelled: bool,
    /// Children added before the group started.
    pending: Vec<Task>,
    children: Vec<Task>,
    /// Children counted by `add_child`/launch, not yet seen by the queue.
    reserved: HashSet<TaskId>,
    outstanding: usize,
    aggregated: Vec<TaskError>,
    context: Option<ExecutionContext>,
}

struct GroupState {
    name: String,
    queue: TaskQueue,
    inner: Mutex<GroupInner>,
    outstanding: watch::Sender<usize>,
}

#[derive(Clone)]
pub struct GroupTask {
    task: Task,
    state: Arc<GroupState>,
}

impl GroupTask {
    pub fn new(name: impl Into<String>, children: impl IntoIterator<Item = Task>) -> Self {
        Self::with_queue(name, children, QueueConfig::default())
    }

    /// Group whose children run under `config` (concurrency limit,
    /// suspension), with a private exclusivity manager.
    pub fn with_queue(
        name: impl Into<String>,
        children: impl IntoIterator<Item = Task>,
        config: QueueConfig,
    ) -> Self {
        let name = name.into();
        let exclusivity = Arc::new(ExclusivityManager::new(format!("{}.children", name)));
        Self::with_exclusivity(name, children, config, exclusivity)
    }

    /// Group whose children claim categories in `exclusivity`.
    pub fn with_exclusivity(
        name: impl Into<String>,
        children: impl IntoIterator<Item = Task>,
        mut config: QueueConfig,
        exclusivity: Arc<ExclusivityManager>,
    ) -> Self {
        let name = name.into();
        if config.name.is_none() {
            config.name = Some(format!("{}.children", name));
        }
        let children: Vec<Task> = children.into_iter().collect();
        let (outstanding, _) = watch::channel(0);
        let state = Arc::new(GroupState {
            name: name.clone(),
            queue: TaskQueue::with_exclusivity(config, exclusivity),
            inner: Mutex::new(GroupInner {
                phase: Phase::Assembling,
                cancelled: false,
                pending: children.clone(),
                children,
                reserved: HashSet::new(),
                outstanding: 0,
                aggregated: Vec::new(),
                context: None,
            }),
            outstanding,
        });
        state.queue.set_delegate(GroupDelegate {
            state: Arc::downgrade(&state),
        });
        let task = Task::named(
            name,
            GroupBody {
                state: Arc::clone(&state),
            },
        )
        .observed_by(Arc::new(GroupCancellation {
            state: Arc::downgrade(&state),
        }));
        Self { task, state }
    }

    /// The group as a plain task (for queues, dependencies, nesting).
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn into_task(self) -> Task {
        self.task
    }

    /// The internal queue. Its limit and suspension only affect children.
    pub fn queue(&self) -> &TaskQueue {
        &self.state.queue
    }

    pub fn children(&self) -> Vec<Task> {
        self.state.inner.lock().children.clone()
    }

    /// Errors reported by children. The group's own cancellation reason is
    /// not included.
    pub fn aggregated_errors(&self) -> Vec<TaskError> {
        self.state.inner.lock().aggregated.clone()
    }

    /// Add a child. Before start it waits for the group; while the group runs
    /// it is submitted at once (cancelled on arrival if the group is
    /// cancelled). Rejected once the group has finished.
    pub fn add_child(&self, child: Task) -> Result<(), TaskFault> {
        let (submit, cancelled) = {
            let mut inner = self.state.inner.lock();
            match inner.phase {
                Phase::Sealed => {
                    return Err(TaskFault::GroupSealed {
                        group: self.task.id(),
                    });
                }
                Phase::Assembling => {
                    inner.pending.push(child.clone());
                    inner.children.push(child.clone());
                    (false, inner.cancelled)
                }
                Phase::Launching | Phase::Running | Phase::Draining => {
                    let state = child.state();
                    if state != TaskState::Initialized {
                        return Err(TaskFault::AlreadyStarted {
                            task: child.id(),
                            state,
                        });
                    }
                    inner.children.push(child.clone());
                    self.state.reserve(&mut inner, &child);
                    (true, inner.cancelled)
                }
            }
        };
        debug!("group '{}' gained child {}", self.state.name, child);
        if cancelled {
            child.cancel();
        }
        if submit {
            self.state.submit(vec![child]);
        }
        Ok(())
    }
}

impl From<GroupTask> for Task {
    fn from(group: GroupTask) -> Self {
        group.into_task()
    }
}

impl GroupState {
    fn reserve(&self, inner: &mut GroupInner, child: &Task) {
        inner.reserved.insert(child.id());
        inner.outstanding += 1;
        self.outstanding.send_replace(inner.outstanding);
    }

    fn submit(&self, children: Vec<Task>) {
        for child in children {
            if let Err(fault) = self.queue.add_task(child.clone()) {
                warn!("group '{}' could not run child {}: {}", self.name, child, fault);
                self.settle(&child, &[]);
            }
        }
    }

    /// Internal queue accepted `child`. Children produced by a running child
    /// arrive here without a reservation.
    fn child_will_enter(&self, child: &Task) {
        let cancel = {
            let mut inner = self.inner.lock();
            if inner.reserved.remove(&child.id()) {
                false
            } else {
                inner.children.push(child.clone());
                inner.outstanding += 1;
                self.outstanding.send_replace(inner.outstanding);
                inner.cancelled
            }
        };
        if cancel {
            child.cancel();
        }
    }

    /// A child finished (or could not be submitted).
    fn settle(&self, child: &Task, errors: &[TaskError]) {
        let context = {
            let mut inner = self.inner.lock();
            inner.reserved.remove(&child.id());
            inner.aggregated.extend_from_slice(errors);
            inner.outstanding = inner.outstanding.saturating_sub(1);
            self.outstanding.send_replace(inner.outstanding);
            Self::take_context_if_drained(&mut inner)
        };
        self.finish_with(context);
    }

    fn take_context_if_drained(
        inner: &mut GroupInner,
    ) -> Option<(ExecutionContext, Vec<TaskError>)> {
        if inner.phase != Phase::Running || inner.outstanding != 0 {
            return None;
        }
        inner.phase = Phase::Sealed;
        inner
            .context
            .take()
            .map(|context| (context, inner.aggregated.clone()))
    }

    fn finish_with(&self, context: Option<(ExecutionContext, Vec<TaskError>)>) {
        if let Some((context, errors)) = context {
            debug!(
                "group '{}' drained with {} child error(s)",
                self.name,
                errors.len()
            );
            if let Err(fault) = context.finish(errors) {
                warn!("group '{}' could not finish: {}", self.name, fault);
            }
        }
    }
}

struct GroupBody {
    state: Arc<GroupState>,
}

#[async_trait]
impl TaskBody for GroupBody {
    async fn execute(&self, ctx: ExecutionContext) {
        let state = &self.state;
        let pending = {
            let mut inner = state.inner.lock();
            inner.phase = Phase::Launching;
            inner.context = Some(ctx);
            let pending = std::mem::take(&mut inner.pending);
            for child in &pending {
                state.reserve(&mut inner, child);
            }
            pending
        };
        state.submit(pending);

        let context = {
            let mut inner = state.inner.lock();
            inner.phase = Phase::Running;
            GroupState::take_context_if_drained(&mut inner)
        };
        state.finish_with(context);
    }

    /// Cancelled or rejected before running: the children still have to
    /// reach Finished before the group does.
    async fn abandon(&self) -> Vec<TaskError> {
        let state = &self.state;
        let pending = {
            let mut inner = state.inner.lock();
            inner.phase = Phase::Draining;
            inner.cancelled = true;
            let pending = std::mem::take(&mut inner.pending);
            for child in &pending {
                state.reserve(&mut inner, child);
            }
            pending
        };
        for child in &pending {
            child.cancel();
        }
        state.submit(pending);

        loop {
            let mut rx = state.outstanding.subscribe();
            let _ = rx.wait_for(|outstanding| *outstanding == 0).await;
            let drained = {
                let mut inner = state.inner.lock();
                if inner.outstanding == 0 {
                    inner.phase = Phase::Sealed;
                    Some(inner.aggregated.clone())
                } else {
                    None
                }
            };
            if let Some(errors) = drained {
                return errors;
            }
        }
    }
}

/// Propagates the group's cancellation to current and future children.
struct GroupCancellation {
    state: Weak<GroupState>,
}

impl TaskObserver for GroupCancellation {
    fn task_did_cancel(&self, _task: &Task) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let children = {
            let mut inner = state.inner.lock();
            inner.cancelled = true;
            inner.children.clone()
        };
        debug!("group '{}' cancelling {} child(ren)", state.name, children.len());
        for child in children {
            child.cancel();
        }
    }
}

struct GroupDelegate {
    state: Weak<GroupState>,
}

impl QueueDelegate for GroupDelegate {
    fn queue_will_add_task(&self, _queue: &TaskQueue, task: &Task) {
        if let Some(state) = self.state.upgrade() {
            state.child_will_enter(task);
        }
    }

    fn queue_task_did_finish(&self, _queue: &TaskQueue, task: &Task, errors: &[TaskError]) {
        if let Some(state) = self.state.upgrade() {
            state.settle(task, errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::condition::BlockCondition;
    use crate::task::BlockObserver;

    fn sleeper(name: &str, ms: u64) -> Task {
        Task::from_fn(name, move |ctx| async move {
            tokio::select! {
                _ = ctx.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
            }
        })
    }

    fn failing(name: &str, message: &'static str) -> Task {
        Task::from_fn(name, move |ctx| async move {
            ctx.fail(TaskError::failed(message)).unwrap();
        })
    }

    #[tokio::test]
    async fn finishes_after_all_children() {
        let children = vec![sleeper("a", 10), sleeper("b", 20), sleeper("c", 5)];
        let group = GroupTask::new("g", children.clone());
        let watched = children.clone();
        group
            .task()
            .add_observer(BlockObserver::new().on_will_finish(move |_, _| {
                assert!(watched.iter().all(Task::is_finished));
            }))
            .unwrap();

        group.task().start().unwrap();
        group.task().wait_until_finished().await;

        assert!(children.iter().all(Task::is_finished));
        assert!(!group.task().is_failed());
        assert!(group.aggregated_errors().is_empty());
    }

    #[tokio::test]
    async fn empty_group_finishes() {
        let group = GroupTask::new("empty", Vec::new());
        group.task().start().unwrap();
        group.task().wait_until_finished().await;
        assert_eq!(group.task().state(), TaskState::Finished);
    }

    #[tokio::test]
    async fn child_errors_are_aggregated() {
        let group = GroupTask::new(
            "g",
            vec![failing("a", "one"), sleeper("b", 1), failing("c", "two")],
        );
        group.task().start().unwrap();
        group.task().wait_until_finished().await;

        let mut aggregated = group.aggregated_errors();
        aggregated.sort_by_key(|e| e.to_string());
        assert_eq!(
            aggregated,
            vec![TaskError::failed("one"), TaskError::failed("two")]
        );
        assert!(group.task().has_error());
        assert!(!group.task().is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_group_cancels_long_children() {
        let children = vec![sleeper("a", 10_000), sleeper("b", 10_000), sleeper("c", 10_000)];
        let group = GroupTask::new("g", children.clone());
        let finished_children = Arc::new(AtomicUsize::new(0));
        let (watched, counter) = (children.clone(), finished_children.clone());
        group
            .task()
            .add_observer(BlockObserver::new().on_will_finish(move |_, _| {
                counter.store(
                    watched.iter().filter(|c| c.is_finished()).count(),
                    Ordering::SeqCst,
                );
            }))
            .unwrap();

        group.task().start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        group
            .task()
            .cancel_with(TaskError::cancelled("user gave up"));
        group.task().wait_until_finished().await;

        assert!(children.iter().all(Task::is_cancelled));
        assert!(children.iter().all(Task::is_finished));
        assert_eq!(finished_children.load(Ordering::SeqCst), 3);
        assert_eq!(
            group.task().errors(),
            vec![TaskError::cancelled("user gave up")]
        );
        assert!(group.aggregated_errors().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_drains_children_without_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let children: Vec<Task> = (0..3)
            .map(|i| {
                let runs = runs.clone();
                Task::from_fn(format!("c{}", i), move |_ctx| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        let group = GroupTask::new("g", children.clone());

        group.task().cancel();
        group.task().start().unwrap();
        group.task().wait_until_finished().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(children.iter().all(|c| c.is_cancelled() && c.is_finished()));
    }

    #[tokio::test]
    async fn rejected_group_drains_children() {
        let child = sleeper("child", 10_000);
        let group = GroupTask::new("g", vec![child.clone()]);
        group
            .task()
            .add_condition(BlockCondition::new("closed", |_| false))
            .unwrap();

        group.task().start().unwrap();
        group.task().wait_until_finished().await;

        assert!(group.task().is_cancelled());
        assert!(child.is_cancelled());
        assert!(child.is_finished());
    }

    #[tokio::test]
    async fn children_added_while_running_are_run() {
        let group = GroupTask::new("g", vec![sleeper("long", 50)]);
        group.task().start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let late = Task::noop("late");
        group.add_child(late.clone()).unwrap();
        group.task().wait_until_finished().await;

        assert!(late.is_finished());
        assert!(!late.is_cancelled());
        assert_eq!(group.children().len(), 2);

        assert!(matches!(
            group.add_child(Task::noop("too late")),
            Err(TaskFault::GroupSealed { .. })
        ));
    }

    #[tokio::test]
    async fn children_added_after_cancel_are_cancelled_on_arrival() {
        let group = GroupTask::new("g", vec![sleeper("long", 10_000)]);
        group.task().start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        group.task().cancel();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let late = Task::from_fn("late", move |_ctx| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        // The group may already be sealed once its only child drained.
        if group.add_child(late.clone()).is_ok() {
            assert!(late.is_cancelled());
        }
        group.task().wait_until_finished().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn produced_tasks_become_children() {
        let grandchild = failing("grandchild", "deep");
        let produced = grandchild.clone();
        let parent = Task::from_fn("parent", move |ctx| async move {
            ctx.produce(produced);
        });
        let group = GroupTask::new("g", vec![parent]);

        group.task().start().unwrap();
        group.task().wait_until_finished().await;

        assert!(grandchild.is_finished());
        assert_eq!(group.children().len(), 2);
        assert_eq!(group.aggregated_errors(), vec![TaskError::failed("deep")]);
    }

    #[tokio::test]
    async fn groups_nest() {
        let inner = GroupTask::new("inner", vec![failing("leaf", "inner failure")]);
        let outer = GroupTask::new("outer", vec![inner.task().clone(), sleeper("sibling", 5)]);

        outer.task().start().unwrap();
        outer.task().wait_until_finished().await;

        assert!(inner.task().is_finished());
        assert_eq!(inner.aggregated_errors(), vec![TaskError::failed("inner failure")]);
        assert_eq!(outer.aggregated_errors(), vec![TaskError::failed("inner failure")]);
    }

    #[tokio::test]
    async fn group_runs_on_a_queue_like_a_leaf() {
        let queue = TaskQueue::new(QueueConfig::named("outer"));
        let group = GroupTask::with_queue("g", vec![sleeper("a", 5)], QueueConfig::serial("inner"));
        let after = Task::noop("after");
        after.add_dependency(group.task()).unwrap();

        queue.add_task(group.task().clone()).unwrap();
        queue.add_task(after.clone()).unwrap();
        queue.wait_until_idle().await;

        assert!(group.task().is_finished());
        assert!(after.is_finished());
        assert_eq!(group.queue().config().max_concurrent, Some(1));
    }
}
