//! Task: the schedulable unit and its state machine.
//!
//! Design:
//! - `Task` is a cheap-to-clone handle (`Arc`); equality is identity.
//! - All mutable state sits behind one `parking_lot::Mutex` per task. Observer
//!   callbacks, hooks and the body always run with that lock released.
//! - Dependencies are held weakly; the queue that drives a task owns it.
//! - `cancelled` / `finished` are mirrored into `watch` channels so drivers
//!   can await them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, trace};

use super::body::{FnBody, NoopBody, TaskBody};
use super::context::ExecutionContext;
use super::graph;
use super::observer::TaskObserver;
use crate::condition::Condition;
use crate::condition::evaluator::{self, Verdict};
use crate::domain::{TaskId, TaskState};
use crate::error::{TaskError, TaskFault};
use crate::status::TaskSnapshot;

/// Queue-internal bookkeeping run after `task_did_finish` observers and before
/// the completion callback.
type FinishHook = Box<dyn FnOnce(&Task, &[TaskError]) + Send>;

type CompletionCallback = Box<dyn FnOnce(&Task) + Send>;

/// Why an edge exists. Only explicit edges count as "real" dependencies for
/// the dependency-inspecting conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DependencyOrigin {
    Explicit,
    Condition,
    Exclusivity,
}

struct DependencyEdge {
    task: WeakTask,
    origin: DependencyOrigin,
}

/// How `start()` proceeds once it has been accepted.
pub(crate) enum Launch {
    /// Cancelled before start: finish without running the body.
    BailOut,
    /// Wait for dependencies, evaluate conditions, then execute.
    Evaluate,
}

struct TaskShared {
    id: TaskId,
    name: Option<String>,
    body: Box<dyn TaskBody>,
    inner: Mutex<TaskInner>,
    cancelled: watch::Sender<bool>,
    finished: watch::Sender<bool>,
    created_at: DateTime<Utc>,
}

struct TaskInner {
    state: TaskState,
    launched: bool,
    cancelled: bool,
    errors: Vec<TaskError>,
    dependencies: Vec<DependencyEdge>,
    conditions: Vec<Arc<dyn Condition>>,
    observers: Vec<Arc<dyn TaskObserver>>,
    finish_hooks: Vec<FinishHook>,
    completion: Option<CompletionCallback>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// Handle to a task.
#[derive(Clone)]
pub struct Task {
    shared: Arc<TaskShared>,
}

/// Non-owning handle to a task.
#[derive(Clone)]
pub struct WeakTask {
    shared: Weak<TaskShared>,
}

impl WeakTask {
    pub fn upgrade(&self) -> Option<Task> {
        self.shared.upgrade().map(|shared| Task { shared })
    }
}

impl Task {
    /// Unnamed task running `body`.
    pub fn new(body: impl TaskBody) -> Self {
        Self::build(None, Box::new(body))
    }

    /// Named task running `body`. The name is for diagnostics only.
    pub fn named(name: impl Into<String>, body: impl TaskBody) -> Self {
        Self::build(Some(name.into()), Box::new(body))
    }

    /// Named task whose body is a closure.
    ///
    /// The closure receives the `ExecutionContext`; dropping the context
    /// without calling `finish` finishes the task with no errors.
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(ExecutionContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Self::named(name, FnBody::new(f))
    }

    /// Task that finishes as soon as it executes.
    pub fn noop(name: impl Into<String>) -> Self {
        Self::named(name, NoopBody)
    }

    fn build(name: Option<String>, body: Box<dyn TaskBody>) -> Self {
        let (cancelled, _) = watch::channel(false);
        let (finished, _) = watch::channel(false);
        Self {
            shared: Arc::new(TaskShared {
                id: TaskId::generate(),
                name,
                body,
                inner: Mutex::new(TaskInner {
                    state: TaskState::Initialized,
                    launched: false,
                    cancelled: false,
                    errors: Vec::new(),
                    dependencies: Vec::new(),
                    conditions: Vec::new(),
                    observers: Vec::new(),
                    finish_hooks: Vec::new(),
                    completion: None,
                    started_at: None,
                    finished_at: None,
                }),
                cancelled,
                finished,
                created_at: Utc::now(),
            }),
        }
    }

    // ========================================
    // Inspection
    // ========================================

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }

    pub fn state(&self) -> TaskState {
        self.shared.inner.lock().state
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.inner.lock().cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_executing(&self) -> bool {
        self.state() == TaskState::Executing
    }

    /// Eligible to be started by an executor: enqueued, and either cancelled
    /// or every dependency has finished.
    pub fn is_ready(&self) -> bool {
        let (state, cancelled) = {
            let inner = self.shared.inner.lock();
            (inner.state, inner.cancelled)
        };
        if state != TaskState::Pending {
            return false;
        }
        cancelled || self.dependencies().iter().all(Task::is_finished)
    }

    pub fn errors(&self) -> Vec<TaskError> {
        self.shared.inner.lock().errors.clone()
    }

    pub fn has_error(&self) -> bool {
        !self.shared.inner.lock().errors.is_empty()
    }

    /// `has_error || is_cancelled`.
    pub fn is_failed(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.cancelled || !inner.errors.is_empty()
    }

    /// All live dependencies (explicit and synthetic).
    pub fn dependencies(&self) -> Vec<Task> {
        self.dependencies_where(|_| true)
    }

    /// Dependencies added through `add_dependency`, excluding the ones
    /// injected by conditions or exclusivity for ordering.
    pub fn explicit_dependencies(&self) -> Vec<Task> {
        self.dependencies_where(|origin| origin == DependencyOrigin::Explicit)
    }

    fn dependencies_where(&self, keep: impl Fn(DependencyOrigin) -> bool) -> Vec<Task> {
        self.shared
            .inner
            .lock()
            .dependencies
            .iter()
            .filter(|edge| keep(edge.origin))
            .filter_map(|edge| edge.task.upgrade())
            .collect()
    }

    pub(crate) fn conditions(&self) -> Vec<Arc<dyn Condition>> {
        self.shared.inner.lock().conditions.clone()
    }

    pub fn downgrade(&self) -> WeakTask {
        WeakTask {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.shared.inner.lock();
        TaskSnapshot {
            id: self.shared.id,
            name: self.shared.name.clone(),
            state: inner.state,
            cancelled: inner.cancelled,
            errors: inner.errors.clone(),
            created_at: self.shared.created_at,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
        }
    }

    // ========================================
    // Configuration (before start)
    // ========================================

    /// `self` will not execute before `other` has finished.
    pub fn add_dependency(&self, other: &Task) -> Result<(), TaskFault> {
        self.add_dependency_with(other, DependencyOrigin::Explicit)
    }

    pub(crate) fn add_dependency_with(
        &self,
        other: &Task,
        origin: DependencyOrigin,
    ) -> Result<(), TaskFault> {
        if self == other {
            return Err(TaskFault::SelfDependency { task: self.id() });
        }
        // Walk `other`'s graph before taking our own lock.
        if graph::depends_on(other, self) {
            return Err(TaskFault::DependencyCycle {
                task: self.id(),
                dependency: other.id(),
            });
        }

        let mut inner = self.shared.inner.lock();
        if !inner.state.accepts_configuration() {
            return Err(TaskFault::Locked {
                task: self.id(),
                state: inner.state,
            });
        }
        let known = inner
            .dependencies
            .iter()
            .any(|edge| edge.task.shared.ptr_eq(&Arc::downgrade(&other.shared)));
        if !known {
            trace!("{} now depends on {} ({:?})", self, other, origin);
            inner.dependencies.push(DependencyEdge {
                task: other.downgrade(),
                origin,
            });
        }
        Ok(())
    }

    pub fn remove_dependency(&self, other: &Task) -> Result<(), TaskFault> {
        let mut inner = self.shared.inner.lock();
        if !inner.state.accepts_configuration() {
            return Err(TaskFault::Locked {
                task: self.id(),
                state: inner.state,
            });
        }
        let target = Arc::downgrade(&other.shared);
        inner
            .dependencies
            .retain(|edge| !edge.task.shared.ptr_eq(&target));
        Ok(())
    }

    /// Attach a condition. Only allowed before the task is enqueued, because
    /// the queue reads dependency and exclusivity contributions on submission.
    pub fn add_condition(&self, condition: impl Condition) -> Result<(), TaskFault> {
        let mut inner = self.shared.inner.lock();
        if inner.state != TaskState::Initialized {
            return Err(TaskFault::Locked {
                task: self.id(),
                state: inner.state,
            });
        }
        inner.conditions.push(Arc::new(condition));
        Ok(())
    }

    pub fn add_observer(&self, observer: impl TaskObserver) -> Result<(), TaskFault> {
        self.add_shared_observer(Arc::new(observer))
    }

    pub(crate) fn add_shared_observer(
        &self,
        observer: Arc<dyn TaskObserver>,
    ) -> Result<(), TaskFault> {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_finishing() {
            return Err(TaskFault::AlreadyFinished { task: self.id() });
        }
        inner.observers.push(observer);
        Ok(())
    }

    /// Callback fired once, after every observer and queue notification.
    /// Setting it again replaces the previous callback.
    pub fn on_completion(&self, f: impl FnOnce(&Task) + Send + 'static) -> Result<(), TaskFault> {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_finishing() {
            return Err(TaskFault::AlreadyFinished { task: self.id() });
        }
        inner.completion = Some(Box::new(f));
        Ok(())
    }

    /// Attach an observer to a task nobody else has seen yet.
    pub(crate) fn observed_by(self, observer: Arc<dyn TaskObserver>) -> Self {
        self.shared.inner.lock().observers.push(observer);
        self
    }

    pub(crate) fn add_finish_hook(&self, hook: FinishHook) -> Result<(), TaskFault> {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_finishing() {
            return Err(TaskFault::AlreadyFinished { task: self.id() });
        }
        inner.finish_hooks.push(hook);
        Ok(())
    }

    /// Initialized -> Pending, on submission to a queue.
    pub(crate) fn mark_enqueued(&self) -> Result<(), TaskFault> {
        let mut inner = self.shared.inner.lock();
        if inner.state != TaskState::Initialized || inner.launched {
            return Err(TaskFault::AlreadyStarted {
                task: self.id(),
                state: inner.state,
            });
        }
        self.transition(&mut inner, TaskState::Pending)
    }

    // ========================================
    // Cancellation
    // ========================================

    /// Mark the task cancelled. Sticky, idempotent, callable from any thread.
    pub fn cancel(&self) {
        self.cancel_inner(Vec::new());
    }

    /// Cancel and record `reason`. Every call appends its reason once.
    pub fn cancel_with(&self, reason: TaskError) {
        self.cancel_inner(vec![reason]);
    }

    fn cancel_inner(&self, reasons: Vec<TaskError>) {
        let first = {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_terminal() {
                trace!("cancel of finished task {} ignored", self);
                return;
            }
            if !inner.state.is_finishing() {
                inner.errors.extend(reasons);
            }
            let first = !inner.cancelled;
            inner.cancelled = true;
            first
        };
        if first {
            debug!("task {} cancelled", self);
            self.shared.cancelled.send_replace(true);
            for observer in self.observers() {
                observer.task_did_cancel(self);
            }
        }
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Start the task on the current tokio runtime.
    ///
    /// Valid once, from Initialized or Pending. A task that is already
    /// cancelled finishes without running its body; otherwise it stays
    /// Pending until its dependencies have finished.
    pub fn start(&self) -> Result<(), TaskFault> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| TaskFault::NoRuntime { task: self.id() })?;
        let launch = self.begin()?;
        let task = self.clone();
        handle.spawn(async move { task.run(launch).await });
        Ok(())
    }

    /// Accept a start request. Synchronous so that concurrent `start`/`cancel`
    /// calls are decided under the task lock.
    pub(crate) fn begin(&self) -> Result<Launch, TaskFault> {
        let mut inner = self.shared.inner.lock();
        if inner.launched || !inner.state.is_startable() {
            let fault = if inner.state.is_finishing() {
                TaskFault::AlreadyFinished { task: self.id() }
            } else {
                TaskFault::AlreadyStarted {
                    task: self.id(),
                    state: inner.state,
                }
            };
            drop(inner);
            error!("rejected start of {}: {}", self, fault);
            return Err(fault);
        }
        inner.launched = true;
        inner.started_at = Some(Utc::now());
        if inner.state == TaskState::Initialized {
            self.transition(&mut inner, TaskState::Pending)?;
        }
        if inner.cancelled {
            return Ok(Launch::BailOut);
        }
        Ok(Launch::Evaluate)
    }

    /// Drive an accepted start to the point where the body has returned (or
    /// the task finished without it).
    ///
    /// Conditions are not evaluated before every dependency has finished.
    /// Cancellation cuts the wait short.
    pub(crate) async fn run(&self, launch: Launch) {
        match launch {
            Launch::BailOut => self.bail_out().await,
            Launch::Evaluate => {
                tokio::select! {
                    _ = self.wait_for_dependencies() => {}
                    _ = self.wait_until_cancelled() => {}
                }
                if !self.enter_evaluation() {
                    self.bail_out().await;
                    return;
                }
                for observer in self.observers() {
                    observer.task_did_start(self);
                }
                let conditions = self.conditions();
                let verdict = evaluator::evaluate(self, &conditions).await;
                if self.admit(verdict) {
                    for observer in self.observers() {
                        observer.task_will_execute(self);
                    }
                    trace!("executing body of {}", self);
                    self.shared.body.execute(ExecutionContext::new(self.clone())).await;
                } else {
                    self.bail_out().await;
                }
            }
        }
    }

    /// Pending -> EvaluatingConditions, unless cancelled while waiting.
    fn enter_evaluation(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        if inner.cancelled {
            debug!("{} cancelled before evaluating conditions", self);
            return false;
        }
        self.transition(&mut inner, TaskState::EvaluatingConditions)
            .is_ok()
    }

    /// EvaluatingConditions -> Ready -> Executing, unless the task was
    /// cancelled meanwhile (verdict discarded) or a condition rejected it
    /// (converted into a cancellation carrying the reasons).
    fn admit(&self, verdict: Verdict) -> bool {
        {
            let mut inner = self.shared.inner.lock();
            if inner.cancelled {
                debug!("{} cancelled while evaluating conditions; verdict discarded", self);
                return false;
            }
            match verdict {
                Verdict::Admitted => {
                    return self
                        .transition(&mut inner, TaskState::Ready)
                        .and_then(|()| self.transition(&mut inner, TaskState::Executing))
                        .is_ok();
                }
                Verdict::Rejected(errors) => {
                    debug!("{} rejected by {} condition(s)", self, errors.len());
                    inner.errors.extend(errors);
                    inner.cancelled = true;
                }
            }
        }
        self.shared.cancelled.send_replace(true);
        for observer in self.observers() {
            observer.task_did_cancel(self);
        }
        false
    }

    async fn bail_out(&self) {
        let errors = self.shared.body.abandon().await;
        if let Err(fault) = self.finish_internal(errors, false) {
            error!("bail-out of {} failed: {}", self, fault);
        }
    }

    /// Finish from outside the execution context. Only valid while the body
    /// is running; anything else is reported as a fault.
    pub fn finish(&self, errors: Vec<TaskError>) -> Result<(), TaskFault> {
        self.finish_internal(errors, true)
    }

    pub(crate) fn finish_internal(
        &self,
        errors: Vec<TaskError>,
        from_body: bool,
    ) -> Result<(), TaskFault> {
        let (observers, all_errors) = {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_finishing() {
                return Err(TaskFault::AlreadyFinished { task: self.id() });
            }
            if from_body && inner.state != TaskState::Executing {
                return Err(TaskFault::NotExecuting {
                    task: self.id(),
                    state: inner.state,
                });
            }
            self.transition(&mut inner, TaskState::Finishing)?;
            inner.errors.extend(errors);
            (inner.observers.clone(), inner.errors.clone())
        };

        for observer in &observers {
            observer.task_will_finish(self, &all_errors);
        }

        let (hooks, completion) = {
            let mut inner = self.shared.inner.lock();
            self.transition(&mut inner, TaskState::Finished)?;
            inner.finished_at = Some(Utc::now());
            (
                std::mem::take(&mut inner.finish_hooks),
                inner.completion.take(),
            )
        };
        debug!("task {} finished with {} error(s)", self, all_errors.len());

        for observer in &observers {
            observer.task_did_finish(self, &all_errors);
        }
        for hook in hooks {
            hook(self, &all_errors);
        }
        if let Some(completion) = completion {
            completion(self);
        }
        self.shared.finished.send_replace(true);
        Ok(())
    }

    pub(crate) fn produce(&self, produced: &Task) {
        debug!("{} produced {}", self, produced);
        for observer in self.observers() {
            observer.task_did_produce(self, produced);
        }
    }

    fn transition(&self, inner: &mut TaskInner, next: TaskState) -> Result<(), TaskFault> {
        if !inner.state.can_transition_to(next) {
            let fault = TaskFault::InvalidTransition {
                task: self.id(),
                from: inner.state,
                to: next,
            };
            error!("{}", fault);
            return Err(fault);
        }
        trace!("{}: {} -> {}", self, inner.state, next);
        inner.state = next;
        Ok(())
    }

    fn observers(&self) -> Vec<Arc<dyn TaskObserver>> {
        self.shared.inner.lock().observers.clone()
    }

    // ========================================
    // Waiting
    // ========================================

    /// Resolves once the task is Finished and every notification (observers,
    /// queue bookkeeping, completion callback) has been delivered.
    pub async fn wait_until_finished(&self) {
        let mut rx = self.shared.finished.subscribe();
        let _ = rx.wait_for(|finished| *finished).await;
    }

    /// Receiver for the finished flag. Does not keep the task alive; once the
    /// task is dropped the channel closes.
    pub(crate) fn finished_signal(&self) -> watch::Receiver<bool> {
        self.shared.finished.subscribe()
    }

    /// Resolves once the task is cancelled. Never resolves otherwise.
    pub async fn wait_until_cancelled(&self) {
        let mut rx = self.shared.cancelled.subscribe();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }

    /// Resolves once every dependency, including ones added while waiting,
    /// has finished.
    pub(crate) async fn wait_for_dependencies(&self) {
        loop {
            let unfinished: Vec<Task> = self
                .dependencies()
                .into_iter()
                .filter(|dependency| !dependency.is_finished())
                .collect();
            if unfinished.is_empty() {
                return;
            }
            for dependency in unfinished {
                dependency.wait_until_finished().await;
            }
        }
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state);
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shared.name {
            Some(name) => write!(f, "'{}'", name),
            None => write!(f, "{}", self.shared.id),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::condition::BlockCondition;
    use crate::task::BlockObserver;

    fn counting_task(name: &str, runs: Arc<AtomicUsize>) -> Task {
        Task::from_fn(name, move |ctx| async move {
            runs.fetch_add(1, Ordering::SeqCst);
            ctx.finish(Vec::new()).unwrap();
        })
    }

    #[tokio::test]
    async fn new_task_is_initialized() {
        let task = Task::noop("a");
        assert_eq!(task.state(), TaskState::Initialized);
        assert!(!task.is_cancelled());
        assert!(!task.has_error());
        assert!(!task.is_failed());
    }

    #[tokio::test]
    async fn start_runs_body_once_and_finishes() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting_task("a", runs.clone());

        task.start().unwrap();
        task.wait_until_finished().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Finished);
        assert!(!task.is_failed());
    }

    #[tokio::test]
    async fn cancelled_before_start_never_executes() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting_task("a", runs.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        task.add_observer(BlockObserver::new().on_will_execute(move |_| {
            record.lock().push("execute");
        }))
        .unwrap();

        task.cancel();
        task.start().unwrap();
        task.wait_until_finished().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(task.state(), TaskState::Finished);
        assert!(task.is_cancelled());
        assert!(task.is_failed());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn double_start_is_a_fault() {
        let task = Task::noop("a");
        task.start().unwrap();
        let err = task.start().unwrap_err();
        assert!(matches!(
            err,
            TaskFault::AlreadyStarted { .. } | TaskFault::AlreadyFinished { .. }
        ));
        task.wait_until_finished().await;
    }

    #[tokio::test]
    async fn finish_outside_body_is_a_fault() {
        let task = Task::noop("a");
        let err = task.finish(Vec::new()).unwrap_err();
        assert!(matches!(err, TaskFault::NotExecuting { .. }));
        assert_eq!(task.state(), TaskState::Initialized);
    }

    #[tokio::test]
    async fn finished_task_rejects_mutation() {
        let task = Task::noop("a");
        let other = Task::noop("b");
        task.start().unwrap();
        task.wait_until_finished().await;

        assert!(matches!(
            task.add_dependency(&other),
            Err(TaskFault::Locked { .. })
        ));
        assert!(matches!(
            task.add_observer(BlockObserver::new()),
            Err(TaskFault::AlreadyFinished { .. })
        ));
        assert!(matches!(
            task.finish(Vec::new()),
            Err(TaskFault::AlreadyFinished { .. })
        ));
        task.cancel_with(TaskError::cancelled("late"));
        assert!(!task.is_cancelled());
        assert!(task.errors().is_empty());
    }

    #[tokio::test]
    async fn body_errors_are_recorded() {
        let task = Task::from_fn("a", |ctx| async move {
            ctx.finish(vec![TaskError::failed("boom")]).unwrap();
        });
        task.start().unwrap();
        task.wait_until_finished().await;

        assert_eq!(task.errors(), vec![TaskError::failed("boom")]);
        assert!(task.has_error());
        assert!(!task.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_context_finishes_task() {
        let task = Task::from_fn("a", |_ctx| async move {});
        task.start().unwrap();
        task.wait_until_finished().await;
        assert_eq!(task.state(), TaskState::Finished);
        assert!(!task.has_error());
    }

    #[tokio::test]
    async fn each_cancel_call_appends_its_reason_once() {
        let task = Task::noop("a");
        let cancels = Arc::new(AtomicUsize::new(0));
        let counter = cancels.clone();
        task.add_observer(BlockObserver::new().on_cancel(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        task.cancel_with(TaskError::cancelled("one"));
        task.cancel_with(TaskError::cancelled("two"));
        task.cancel();

        assert_eq!(
            task.errors(),
            vec![TaskError::cancelled("one"), TaskError::cancelled("two")]
        );
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(task.state(), TaskState::Initialized);
    }

    #[tokio::test]
    async fn rejecting_condition_cancels_without_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting_task("a", runs.clone());
        task.add_condition(BlockCondition::new("never", |_| false))
            .unwrap();

        task.start().unwrap();
        task.wait_until_finished().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(task.is_cancelled());
        assert!(task.has_error());
    }

    #[tokio::test]
    async fn cancel_while_evaluating_waits_for_evaluation() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = counting_task("a", runs.clone());
        task.add_condition(BlockCondition::from_async("slow", |_| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            true
        }))
        .unwrap();

        task.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.cancel();

        assert_eq!(task.state(), TaskState::EvaluatingConditions);
        assert!(task.is_cancelled());

        task.wait_until_finished().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(task.state(), TaskState::Finished);
    }

    #[tokio::test]
    async fn notifications_are_ordered() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let task = {
            let log = log.clone();
            Task::from_fn("a", move |ctx| async move {
                log.lock().push("body");
                ctx.finish(Vec::new()).unwrap();
            })
        };
        let (l1, l2, l3, l4) = (log.clone(), log.clone(), log.clone(), log.clone());
        task.add_observer(
            BlockObserver::new()
                .on_will_execute(move |_| l1.lock().push("will_execute"))
                .on_will_finish(move |t, _| {
                    assert_eq!(t.state(), TaskState::Finishing);
                    l2.lock().push("will_finish")
                })
                .on_finish(move |t, _| {
                    assert_eq!(t.state(), TaskState::Finished);
                    l3.lock().push("did_finish")
                }),
        )
        .unwrap();
        task.on_completion(move |_| l4.lock().push("completion"))
            .unwrap();

        task.start().unwrap();
        task.wait_until_finished().await;

        assert_eq!(
            *log.lock(),
            vec!["will_execute", "body", "will_finish", "did_finish", "completion"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_cancels_and_start_finish_exactly_once() {
        for _ in 0..50 {
            let runs = Arc::new(AtomicUsize::new(0));
            let completions = Arc::new(AtomicUsize::new(0));
            let task = counting_task("race", runs.clone());
            let counter = completions.clone();
            task.on_completion(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

            let mut joins = Vec::new();
            for _ in 0..8 {
                let task = task.clone();
                joins.push(tokio::spawn(async move { task.cancel() }));
            }
            let starter = task.clone();
            joins.push(tokio::spawn(async move {
                starter.start().unwrap();
            }));
            for join in joins {
                join.await.unwrap();
            }
            task.wait_until_finished().await;

            assert_eq!(completions.load(Ordering::SeqCst), 1);
            assert!(runs.load(Ordering::SeqCst) <= 1);
            assert!(task.is_cancelled());
        }
    }

    #[tokio::test]
    async fn start_waits_for_unfinished_dependency() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dependency = {
            let log = log.clone();
            Task::from_fn("dependency", move |_ctx| async move {
                log.lock().push("dependency");
            })
        };
        let task = {
            let log = log.clone();
            Task::from_fn("dependent", move |_ctx| async move {
                log.lock().push("dependent");
            })
        };
        task.add_dependency(&dependency).unwrap();

        task.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(task.state(), TaskState::Pending);
        assert_eq!(dependency.state(), TaskState::Initialized);
        assert!(log.lock().is_empty());

        dependency.start().unwrap();
        task.wait_until_finished().await;
        assert_eq!(*log.lock(), vec!["dependency", "dependent"]);
        assert!(!task.has_error());
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_dependency_bails_out() {
        let runs = Arc::new(AtomicUsize::new(0));
        let dependency = Task::noop("never started");
        let task = counting_task("dependent", runs.clone());
        task.add_dependency(&dependency).unwrap();

        task.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.cancel();
        task.wait_until_finished().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(task.is_cancelled());
        assert_eq!(dependency.state(), TaskState::Initialized);
    }

    #[tokio::test]
    async fn explicit_cycles_are_rejected() {
        let a = Task::noop("a");
        let b = Task::noop("b");
        let c = Task::noop("c");
        b.add_dependency(&a).unwrap();
        c.add_dependency(&b).unwrap();

        assert!(matches!(
            a.add_dependency(&c),
            Err(TaskFault::DependencyCycle { .. })
        ));
        assert!(matches!(
            a.add_dependency(&a),
            Err(TaskFault::SelfDependency { .. })
        ));
    }

    #[tokio::test]
    async fn dependencies_are_weak() {
        let a = Task::noop("a");
        {
            let b = Task::noop("b");
            a.add_dependency(&b).unwrap();
            assert_eq!(a.dependencies().len(), 1);
        }
        assert!(a.dependencies().is_empty());
    }

    #[tokio::test]
    async fn snapshot_reports_timestamps() {
        let task = Task::noop("a");
        task.start().unwrap();
        task.wait_until_finished().await;

        let snapshot = task.snapshot();
        assert_eq!(snapshot.state, TaskState::Finished);
        assert_eq!(snapshot.name.as_deref(), Some("a"));
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.finished_at >= snapshot.started_at);
    }
}
