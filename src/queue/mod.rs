//! In-process task queue with a tokio worker pool.
//!
//! [`TaskQueue::submit`] never blocks: it records a `Pending` task and hands
//! its id to the pool. Workers pull ids from a shared channel, run the
//! attempt on the blocking pool through a [`TaskHandler`], and apply the
//! outcome via [`TaskMachine`]. A retried task is re-delivered after the
//! policy's backoff, so only one attempt of a task is ever in flight.

mod machine;
mod task;

pub use machine::{TaskMachine, Transition};
pub use task::{Progress, RetryPolicy, Task, TaskId, TaskState};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Classification;
use crate::workflow::{WorkflowOutcome, WorkflowRequest};

/// The body of a task: runs one attempt and classifies any failure.
pub trait TaskHandler: Send + Sync + 'static {
    fn handle(
        &self,
        request: &WorkflowRequest,
        progress: &ProgressHandle,
    ) -> Result<WorkflowOutcome, Classification>;
}

/// Lets a running attempt publish partial progress for status polling.
#[derive(Clone)]
pub struct ProgressHandle {
    target: Option<(TaskId, Arc<Shared>)>,
}

impl ProgressHandle {
    /// A handle that discards everything, for running a handler outside the queue.
    pub fn detached() -> Self {
        Self { target: None }
    }

    pub fn publish(&self, stage: &str, detail: Option<String>) {
        let Some((id, shared)) = &self.target else {
            return;
        };
        let mut tasks = shared.tasks();
        match tasks.get_mut(id) {
            Some(task) if task.state == TaskState::Started => {
                task.progress = Some(Progress {
                    stage: stage.to_string(),
                    detail,
                });
            }
            _ => {}
        }
    }
}

/// How long finished tasks stay queryable before [`TaskQueue::submit`] evicts them.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

struct Shared {
    /// Every task the queue has issued and not yet evicted, by id.
    tasks: Mutex<HashMap<TaskId, Task>>,
    /// Re-delivery channel for retries. Weak so that dropping every
    /// `TaskQueue` closes the channel and stops the workers.
    sender: mpsc::WeakUnboundedSender<TaskId>,
    /// Retry limit and backoff applied to transient failures.
    policy: RetryPolicy,
}

impl Shared {
    // Critical sections never leave a task half-updated, so a poisoned map is usable.
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-deliver a task after its backoff, if the queue still has handles.
    fn redeliver(&self, id: TaskId) {
        match self.sender.upgrade() {
            Some(sender) => self.send(&sender, id),
            None => self.fail_closed(id),
        }
    }

    fn send(&self, sender: &mpsc::UnboundedSender<TaskId>, id: TaskId) {
        if let Err(mpsc::error::SendError(id)) = sender.send(id) {
            self.fail_closed(id);
        }
    }

    fn fail_closed(&self, id: TaskId) {
        error!(task_id = %id, "queue is closed, failing task");
        if let Some(task) = self.tasks().get_mut(&id) {
            task.error = Some("task queue is closed".into());
            task.set_state(TaskState::Failed);
        }
    }

    /// Drop terminal tasks last updated before `cutoff`. Returns how many went.
    fn evict_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|_, task| !(task.state.is_terminal() && task.updated_at <= cutoff));
        before - tasks.len()
    }
}

/// Cloneable handle to the queue. Construct once at startup and pass it around.
///
/// Workers run until the last handle is dropped.
#[derive(Clone)]
pub struct TaskQueue {
    /// State shared with the workers.
    shared: Arc<Shared>,
    /// Strong end of the channel. The channel closes once every clone is gone.
    sender: mpsc::UnboundedSender<TaskId>,
    /// How long a finished task stays queryable.
    retention: Duration,
}

impl TaskQueue {
    /// Spawn `workers` workers on the current tokio runtime.
    pub fn start(workers: usize, policy: RetryPolicy, handler: Arc<dyn TaskHandler>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shared = Arc::new(Shared {
            tasks: Mutex::new(HashMap::new()),
            sender: sender.downgrade(),
            policy,
        });

        for worker in 0..workers.max(1) {
            tokio::spawn(worker_loop(
                worker,
                Arc::clone(&shared),
                Arc::clone(&receiver),
                Arc::clone(&handler),
            ));
        }

        Self {
            shared,
            sender,
            retention: DEFAULT_RETENTION,
        }
    }

    /// Keep finished tasks queryable for `retention` instead of [`DEFAULT_RETENTION`].
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Enqueue a workflow invocation and return its id immediately.
    pub fn submit(&self, request: WorkflowRequest) -> TaskId {
        self.evict_expired();

        let task = Task::new(request);
        let id = task.id.clone();
        debug!(task_id = %id, workflow = task.request.kind(), "task queued");
        self.shared.tasks().insert(id.clone(), task);
        self.shared.send(&self.sender, id.clone());
        id
    }

    /// Forget terminal tasks older than the retention window.
    pub fn evict_expired(&self) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let evicted = self.shared.evict_terminal_before(Utc::now() - retention);
        if evicted > 0 {
            debug!(evicted, "evicted expired tasks");
        }
        evicted
    }

    /// A snapshot of the task's current record.
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.shared.tasks().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskId>>>,
    handler: Arc<dyn TaskHandler>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(id) = next else {
            debug!(worker, "task channel closed, worker exiting");
            return;
        };
        run_attempt(worker, &shared, &handler, id).await;
    }
}

async fn run_attempt(
    worker: usize,
    shared: &Arc<Shared>,
    handler: &Arc<dyn TaskHandler>,
    id: TaskId,
) {
    let request = {
        let mut tasks = shared.tasks();
        let Some(task) = tasks.get_mut(&id) else {
            warn!(task_id = %id, "delivered task is unknown, dropping");
            return;
        };
        if !TaskMachine::start(task) {
            debug!(task_id = %id, state = %task.state, "task is not pending, skipping delivery");
            return;
        }
        info!(task_id = %id, worker, workflow = task.request.kind(), retry = task.retry_count, "task started");
        task.request.clone()
    };

    let progress = ProgressHandle {
        target: Some((id.clone(), Arc::clone(shared))),
    };
    let body = Arc::clone(handler);
    let outcome = match tokio::task::spawn_blocking(move || body.handle(&request, &progress)).await
    {
        Ok(outcome) => outcome,
        Err(join_err) => Err(Classification::Transient(format!(
            "task attempt aborted: {join_err}"
        ))),
    };

    let transition = {
        let mut tasks = shared.tasks();
        let Some(task) = tasks.get_mut(&id) else {
            return;
        };
        TaskMachine::finish(task, outcome, &shared.policy)
    };

    match transition {
        Transition::Succeeded => info!(task_id = %id, "task succeeded"),
        Transition::Retry {
            retry,
            delay,
            reason,
        } => {
            warn!(
                task_id = %id,
                retry,
                max = shared.policy.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %reason,
                "task failed, scheduling retry"
            );
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.redeliver(id);
            });
        }
        Transition::Failed(reason) => error!(task_id = %id, %reason, "task failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(2),
        }
    }

    fn request() -> WorkflowRequest {
        WorkflowRequest::Train {
            dataset_name: "dataset_test123".into(),
        }
    }

    fn trained() -> WorkflowOutcome {
        WorkflowOutcome::Trained {
            model_name: "model_test456".into(),
            dataset_name: "dataset_test123".into(),
        }
    }

    /// Fails transiently `transient_failures` times, then succeeds or fails permanently.
    struct Scripted {
        calls: AtomicU32,
        transient_failures: u32,
        permanent: bool,
    }

    impl Scripted {
        fn new(transient_failures: u32, permanent: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                transient_failures,
                permanent,
            })
        }
    }

    impl TaskHandler for Scripted {
        fn handle(
            &self,
            _request: &WorkflowRequest,
            _progress: &ProgressHandle,
        ) -> Result<WorkflowOutcome, Classification> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(Classification::Permanent("Dataset 'x' not found".into()));
            }
            if call < self.transient_failures {
                return Err(Classification::Transient(format!("I/O hiccup #{call}")));
            }
            Ok(trained())
        }
    }

    async fn wait_terminal(queue: &TaskQueue, id: &TaskId) -> Task {
        for _ in 0..500 {
            match queue.task(id) {
                Some(task) if task.state.is_terminal() => return task,
                _ => {}
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} did not finish");
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let handler = Scripted::new(0, false);
        let queue = TaskQueue::start(2, fast_policy(3), handler.clone());

        let id = queue.submit(request());
        let task = wait_terminal(&queue, &id).await;

        assert_eq!(task.state, TaskState::Succeeded);
        assert_eq!(task.result, Some(trained()));
        assert_eq!(task.retry_count, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let handler = Scripted::new(0, true);
        let queue = TaskQueue::start(2, fast_policy(3), handler.clone());

        let id = queue.submit(request());
        let task = wait_terminal(&queue, &id).await;

        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.error.as_deref(), Some("Dataset 'x' not found"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_below_budget_then_success() {
        let handler = Scripted::new(2, false);
        let queue = TaskQueue::start(2, fast_policy(3), handler.clone());

        let id = queue.submit(request());
        let task = wait_terminal(&queue, &id).await;

        assert_eq!(task.state, TaskState::Succeeded);
        assert_eq!(task.retry_count, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn always_transient_exhausts_budget() {
        let handler = Scripted::new(u32::MAX, false);
        let queue = TaskQueue::start(2, fast_policy(3), handler.clone());

        let id = queue.submit(request());
        let task = wait_terminal(&queue, &id).await;

        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.retry_count, 3);
        assert_eq!(task.error.as_deref(), Some("I/O hiccup #3"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    }

    struct Panicking;

    impl TaskHandler for Panicking {
        fn handle(
            &self,
            _request: &WorkflowRequest,
            _progress: &ProgressHandle,
        ) -> Result<WorkflowOutcome, Classification> {
            panic!("operation blew up");
        }
    }

    #[tokio::test]
    async fn panicking_attempt_is_treated_as_transient() {
        let queue = TaskQueue::start(1, fast_policy(1), Arc::new(Panicking));

        let id = queue.submit(request());
        let task = wait_terminal(&queue, &id).await;

        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.retry_count, 1);
    }

    /// Publishes progress, then blocks until released.
    struct Gated {
        release: Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl TaskHandler for Gated {
        fn handle(
            &self,
            _request: &WorkflowRequest,
            progress: &ProgressHandle,
        ) -> Result<WorkflowOutcome, Classification> {
            progress.publish("running", Some("fitting".into()));
            let release = self.release.lock().unwrap();
            release
                .recv()
                .map_err(|e| Classification::Transient(e.to_string()))?;
            Ok(trained())
        }
    }

    #[tokio::test]
    async fn progress_is_visible_while_started() {
        let (tx, rx) = std::sync::mpsc::channel();
        let handler = Arc::new(Gated {
            release: Mutex::new(rx),
        });
        let queue = TaskQueue::start(1, fast_policy(0), handler);

        let id = queue.submit(request());
        let mut seen = None;
        for _ in 0..500 {
            let task = queue.task(&id).unwrap();
            if task.progress.is_some() {
                seen = Some(task);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let task = seen.expect("progress never published");
        assert_eq!(task.state, TaskState::Started);
        assert_eq!(task.progress.unwrap().stage, "running");

        tx.send(()).unwrap();
        let task = wait_terminal(&queue, &id).await;
        assert_eq!(task.state, TaskState::Succeeded);
        assert!(task.progress.is_none());
    }

    #[tokio::test]
    async fn submit_returns_before_work_runs() {
        let (_tx, rx) = std::sync::mpsc::channel::<()>();
        let handler = Arc::new(Gated {
            release: Mutex::new(rx),
        });
        let queue = TaskQueue::start(1, fast_policy(0), handler);

        let id = queue.submit(request());
        let task = queue.task(&id).unwrap();
        assert!(!task.state.is_terminal());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn independent_tasks_run_concurrently() {
        let handler = Scripted::new(0, false);
        let queue = TaskQueue::start(4, fast_policy(0), handler.clone());

        let ids: Vec<_> = (0..8).map(|_| queue.submit(request())).collect();
        for id in &ids {
            assert_eq!(wait_terminal(&queue, id).await.state, TaskState::Succeeded);
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn workers_stop_when_last_handle_is_dropped() {
        let handler = Scripted::new(0, false);
        let queue = TaskQueue::start(3, fast_policy(0), handler.clone());
        let id = queue.submit(request());
        wait_terminal(&queue, &id).await;
        assert!(Arc::strong_count(&handler) > 1);

        drop(queue);
        for _ in 0..500 {
            if Arc::strong_count(&handler) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("workers still hold the handler after the queue was dropped");
    }

    #[tokio::test]
    async fn finished_tasks_are_evicted_after_retention() {
        let queue =
            TaskQueue::start(1, fast_policy(0), Scripted::new(0, false)).with_retention(Duration::ZERO);
        let first = queue.submit(request());
        wait_terminal(&queue, &first).await;

        let second = queue.submit(request());
        assert!(queue.task(&first).is_none());
        assert!(queue.task(&second).is_some());
    }

    #[tokio::test]
    async fn finished_tasks_are_kept_within_retention() {
        let queue = TaskQueue::start(1, fast_policy(0), Scripted::new(0, false));
        let first = queue.submit(request());
        wait_terminal(&queue, &first).await;

        queue.submit(request());
        assert_eq!(queue.task(&first).unwrap().state, TaskState::Succeeded);
        assert_eq!(queue.evict_expired(), 0);
    }

    #[test]
    fn detached_progress_is_a_no_op() {
        ProgressHandle::detached().publish("loading", None);
    }
}
