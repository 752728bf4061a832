use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::events::{EventDispatcher, WorkerEvent, WorkerSubscriber};
use crate::jobs::handler::MessageHandler;
use crate::jobs::registry::SchedulerRegistry;
use crate::jobs::scheduler::Scheduler;
use crate::jobs::store::{FailureRecord, TaskStore};
use crate::jobs::task::{FailedTask, Task};

/// Lower bound of the idle sleep when waiting for the next run
const MIN_IDLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    #[default]
    Idle,
    Running,
    Stopped,
    Crashed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Stop after this many executions
    pub limit: Option<usize>,
    /// Stop once the worker has been running this long
    pub time_limit: Option<Duration>,
    /// Idle sleep between two polls
    pub poll_interval: Duration,
    /// Stop after this many failed executions
    pub failure_limit: Option<usize>,
    /// Sleep until the earliest next run instead of polling
    pub sleep_until_next_run: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            limit: None,
            time_limit: None,
            poll_interval: Duration::from_secs(1),
            failure_limit: None,
            sleep_until_next_run: false,
        }
    }
}

/// Outcome of a single task execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRun {
    /// Task was running elsewhere, paused or gone
    Skipped,
    Succeeded,
    Failed(String),
}

/// Polls its schedulers for due tasks and hands them to a [`MessageHandler`].
///
/// A worker runs one task at a time. Stopping is cooperative: the stop
/// token, task limit, failure limit and time limit are checked between
/// tasks and while idle, never in the middle of a handler call.
pub struct Worker {
    name: String,
    schedulers: SchedulerRegistry,
    handler: Arc<dyn MessageHandler>,
    options: WorkerOptions,
    events: EventDispatcher,
    store: Option<Arc<dyn TaskStore>>,
    state: RwLock<WorkerState>,
    failed: Mutex<Vec<FailedTask>>,
    executed: AtomicUsize,
    stop: CancellationToken,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        schedulers: SchedulerRegistry,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            schedulers,
            handler,
            options: WorkerOptions::default(),
            events: EventDispatcher::new(),
            store: None,
            state: RwLock::new(WorkerState::Idle),
            failed: Mutex::new(Vec::new()),
            executed: AtomicUsize::new(0),
            stop: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn WorkerSubscriber>) -> Self {
        self.events.subscribe(subscriber);
        self
    }

    /// Persist task transitions and failures through `store`
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn schedulers(&self) -> &SchedulerRegistry {
        &self.schedulers
    }

    pub fn scheduler_names(&self) -> Vec<String> {
        self.schedulers.names()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Failures recorded by this worker, oldest first
    pub fn failed_tasks(&self) -> Vec<FailedTask> {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn executed_count(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    /// Request a stop; the worker finishes its current task first
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Run the polling loop until a stop condition is met.
    ///
    /// Returns an error when the worker is already running or when the task
    /// store fails, in which case the worker ends up `Crashed`.
    pub async fn execute(&self) -> JobResult<()> {
        self.begin()?;
        let started = Instant::now();

        info!(
            worker = %self.name,
            schedulers = ?self.scheduler_names(),
            limit = ?self.options.limit,
            time_limit_secs = ?self.options.time_limit.map(|d| d.as_secs()),
            "Worker starting"
        );
        self.events.dispatch(&WorkerEvent::WorkerStarted {
            worker: self.name.clone(),
            schedulers: self.scheduler_names(),
            at: Utc::now(),
        });

        if let Err(e) = self.run_loop(started).await {
            error!(worker = %self.name, error = %e, "Worker loop failed");
            self.set_state(WorkerState::Crashed);
            self.events.dispatch(&WorkerEvent::WorkerCrashed {
                worker: self.name.clone(),
                reason: e.to_string(),
                executed: self.executed_count(),
                failed: self.failed_count(),
                at: Utc::now(),
            });
            return Err(e);
        }

        self.set_state(WorkerState::Stopped);
        self.events.dispatch(&WorkerEvent::WorkerStopped {
            worker: self.name.clone(),
            executed: self.executed_count(),
            failed: self.failed_count(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn run_loop(&self, started: Instant) -> JobResult<()> {
        'poll: loop {
            if self.should_stop(started) {
                break;
            }

            let mut ran = false;
            for scheduler in &self.schedulers {
                let due = scheduler.due_tasks(Utc::now());
                for task in &due {
                    if self.should_stop(started) {
                        break 'poll;
                    }
                    if self.run_task(scheduler, task.name()).await? != TaskRun::Skipped {
                        ran = true;
                    }
                }
            }

            if ran {
                continue;
            }
            if self.should_stop(started) {
                break;
            }

            let idle = self.idle_delay(started);
            debug!(worker = %self.name, idle_ms = idle.as_millis() as u64, "No task due");
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }
        Ok(())
    }

    /// Run one task of one scheduler immediately, whether it is due or not
    pub async fn execute_task(&self, scheduler: &str, task: &str) -> JobResult<TaskRun> {
        let scheduler = self.schedulers.get(scheduler)?;
        if scheduler.task(task).is_none() {
            return Err(JobError::TaskNotFound(task.to_string()));
        }
        self.run_task(&scheduler, task).await
    }

    async fn run_task(&self, scheduler: &Scheduler, name: &str) -> JobResult<TaskRun> {
        let task = match scheduler.mark_running(name) {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(worker = %self.name, scheduler = %scheduler.name(), task = %name, "Task not dispatchable, skipped");
                return Ok(TaskRun::Skipped);
            }
            Err(JobError::TaskNotFound(_)) => {
                warn!(worker = %self.name, scheduler = %scheduler.name(), task = %name, "Task was removed before execution");
                return Ok(TaskRun::Skipped);
            }
            Err(e) => return Err(e),
        };
        if !self.claim(scheduler, &task)? {
            return Ok(TaskRun::Skipped);
        }

        let execution_id = Uuid::new_v4();
        let started = Instant::now();
        self.events.dispatch(&WorkerEvent::TaskStarted {
            worker: self.name.clone(),
            scheduler: scheduler.name().to_string(),
            task: name.to_string(),
            execution_id,
            at: Utc::now(),
        });

        let outcome = AssertUnwindSafe(self.handler.dispatch(&task))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(format!("handler panicked: {}", panic_message(&*panic))));

        let finished_at = Utc::now();
        let duration = started.elapsed();
        self.executed.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                if let Some(updated) = self.settle(scheduler, scheduler.mark_succeeded(name, finished_at))? {
                    self.persist(scheduler, &updated)?;
                }
                self.events.dispatch(&WorkerEvent::TaskSucceeded {
                    worker: self.name.clone(),
                    scheduler: scheduler.name().to_string(),
                    task: name.to_string(),
                    execution_id,
                    duration,
                    at: finished_at,
                });
                Ok(TaskRun::Succeeded)
            }
            Err(reason) => {
                let snapshot = match self.settle(scheduler, scheduler.mark_failed(name, finished_at))? {
                    Some(updated) => {
                        self.persist(scheduler, &updated)?;
                        updated
                    }
                    None => task,
                };

                let failed = FailedTask::new(snapshot, reason.clone(), finished_at);
                if let Some(store) = &self.store {
                    store.record_failure(FailureRecord::new(scheduler.name(), &failed))?;
                }
                self.failed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(failed);

                self.events.dispatch(&WorkerEvent::TaskFailed {
                    worker: self.name.clone(),
                    scheduler: scheduler.name().to_string(),
                    task: name.to_string(),
                    execution_id,
                    reason: reason.clone(),
                    duration,
                    at: finished_at,
                });
                Ok(TaskRun::Failed(reason))
            }
        }
    }

    /// A task unscheduled while it ran is only worth a warning
    fn settle(&self, scheduler: &Scheduler, result: JobResult<Task>) -> JobResult<Option<Task>> {
        match result {
            Ok(task) => Ok(Some(task)),
            Err(JobError::TaskNotFound(name)) => {
                warn!(worker = %self.name, scheduler = %scheduler.name(), task = %name, "Task was removed while running");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Take the task in the shared store; a lost claim hands it back
    fn claim(&self, scheduler: &Scheduler, task: &Task) -> JobResult<bool> {
        let Some(store) = &self.store else {
            return Ok(true);
        };
        if store.claim(scheduler.name(), task)? {
            return Ok(true);
        }

        let stored = store.load(scheduler.name())?.remove(task.name());
        self.settle(scheduler, scheduler.release(task.name(), stored))?;
        debug!(worker = %self.name, scheduler = %scheduler.name(), task = %task.name(), "Task claimed elsewhere, skipped");
        Ok(false)
    }

    fn persist(&self, scheduler: &Scheduler, task: &Task) -> JobResult<()> {
        match &self.store {
            Some(store) => store.save_task(scheduler.name(), task),
            None => Ok(()),
        }
    }

    fn begin(&self) -> JobResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == WorkerState::Running {
            return Err(JobError::WorkerAlreadyRunning(self.name.clone()));
        }
        *state = WorkerState::Running;
        Ok(())
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn failed_count(&self) -> usize {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn should_stop(&self, started: Instant) -> bool {
        if self.stop.is_cancelled() {
            debug!(worker = %self.name, "Stop requested");
            return true;
        }
        if let Some(limit) = self.options.limit.filter(|limit| self.executed_count() >= *limit) {
            info!(worker = %self.name, limit, "Task limit reached");
            return true;
        }
        if let Some(limit) = self.options.failure_limit.filter(|limit| self.failed_count() >= *limit) {
            info!(worker = %self.name, limit, "Failure limit reached");
            return true;
        }
        if let Some(limit) = self.options.time_limit.filter(|limit| started.elapsed() >= *limit) {
            info!(worker = %self.name, time_limit_secs = limit.as_secs(), "Time limit reached");
            return true;
        }
        false
    }

    fn idle_delay(&self, started: Instant) -> Duration {
        let mut delay = self.options.poll_interval;

        if self.options.sleep_until_next_run {
            let now = Utc::now();
            let next = self.schedulers.iter().filter_map(|s| s.next_due(now)).min();
            if let Some(until) = next.and_then(|next| (next - now).to_std().ok()) {
                delay = until;
            }
        }

        if let Some(limit) = self.options.time_limit {
            delay = delay.min(limit.saturating_sub(started.elapsed()));
        }
        delay.max(MIN_IDLE)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("schedulers", &self.schedulers)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::events::ChannelSubscriber;
    use crate::jobs::handler::FnHandler;
    use crate::jobs::store::{MemoryTaskStore, TaskRuntime};
    use crate::jobs::task::TaskState;
    use crate::jobs::trigger::Trigger;
    use chrono::TimeDelta;
    use std::collections::BTreeMap;

    fn every_minute(name: &str) -> Task {
        Task::new(name, Trigger::cron("* * * * *").unwrap()).unwrap()
    }

    /// Registry with one scheduler whose tasks are all overdue
    fn overdue(names: &[&str]) -> (SchedulerRegistry, Arc<Scheduler>) {
        let anchor = Utc::now() - TimeDelta::hours(1);
        let scheduler =
            Scheduler::with_tasks("foo", names.iter().map(|n| every_minute(n)), anchor).unwrap();
        let mut registry = SchedulerRegistry::new();
        let scheduler = registry.register(scheduler).unwrap();
        (registry, scheduler)
    }

    fn fail_on(name: &'static str) -> Arc<dyn MessageHandler> {
        Arc::new(FnHandler::new(move |task: &Task| {
            if task.name() == name {
                Err(format!("{} exploded", name))
            } else {
                Ok(())
            }
        }))
    }

    fn options(limit: usize) -> WorkerOptions {
        WorkerOptions {
            limit: Some(limit),
            poll_interval: Duration::from_millis(10),
            ..WorkerOptions::default()
        }
    }

    #[tokio::test]
    async fn test_failing_task_yields_exactly_one_failure() {
        let (registry, scheduler) = overdue(&["w", "x", "y"]);
        let worker = Worker::new("worker", registry, fail_on("x")).with_options(options(3));

        worker.execute().await.unwrap();

        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(worker.executed_count(), 3);
        let failed = worker.failed_tasks();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name(), "x");
        assert_eq!(failed[0].reason(), "x exploded");
        assert_eq!(failed[0].task().state(), TaskState::Failed);

        assert_eq!(scheduler.task("w").unwrap().state(), TaskState::Scheduled);
        assert_eq!(scheduler.task("x").unwrap().state(), TaskState::Failed);
        assert_eq!(scheduler.task("y").unwrap().state(), TaskState::Scheduled);
        assert!(scheduler.task("y").unwrap().last_execution().is_some());
    }

    #[tokio::test]
    async fn test_panicking_handler_is_a_failure() {
        let (registry, scheduler) = overdue(&["boom", "fine"]);
        let handler: Arc<dyn MessageHandler> = Arc::new(FnHandler::new(|task: &Task| {
            if task.name() == "boom" {
                panic!("handler bug");
            }
            Ok(())
        }));
        let worker = Worker::new("worker", registry, handler).with_options(options(2));

        worker.execute().await.unwrap();

        let failed = worker.failed_tasks();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].reason().contains("handler bug"));
        assert_eq!(scheduler.task("fine").unwrap().state(), TaskState::Scheduled);
        assert_eq!(scheduler.task("boom").unwrap().state(), TaskState::Failed);
    }

    #[tokio::test]
    async fn test_stop_token_ends_idle_worker() {
        let (registry, _) = overdue(&[]);
        let worker = Arc::new(Worker::new("idle", registry, fail_on("none")).with_options(WorkerOptions {
            poll_interval: Duration::from_secs(60),
            ..WorkerOptions::default()
        }));

        let handle = {
            let worker = Arc::clone(&worker);
            tokio::spawn(async move { worker.execute().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(worker.state(), WorkerState::Running);
        worker.stop();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(worker.executed_count(), 0);
    }

    #[tokio::test]
    async fn test_time_limit_stops_worker() {
        let (registry, _) = overdue(&[]);
        let worker = Worker::new("timed", registry, fail_on("none")).with_options(WorkerOptions {
            time_limit: Some(Duration::from_millis(100)),
            poll_interval: Duration::from_secs(60),
            ..WorkerOptions::default()
        });

        tokio::time::timeout(Duration::from_secs(5), worker.execute())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_failure_limit_stops_worker() {
        let (registry, _) = overdue(&["x", "y", "z"]);
        let handler: Arc<dyn MessageHandler> = Arc::new(FnHandler::new(|_: &Task| Err("down".to_string())));
        let worker = Worker::new("fragile", registry, handler).with_options(WorkerOptions {
            failure_limit: Some(2),
            poll_interval: Duration::from_millis(10),
            ..WorkerOptions::default()
        });

        worker.execute().await.unwrap();
        assert_eq!(worker.failed_tasks().len(), 2);
        assert_eq!(worker.executed_count(), 2);
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let (registry, _) = overdue(&["x", "y"]);
        let (subscriber, mut events) = ChannelSubscriber::channel();
        let worker = Worker::new("observed", registry, fail_on("y"))
            .with_options(options(2))
            .with_subscriber(Arc::new(subscriber));

        worker.execute().await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "worker_started",
                "task_started",
                "task_succeeded",
                "task_started",
                "task_failed",
                "worker_stopped",
            ]
        );
    }

    #[tokio::test]
    async fn test_execute_task_runs_immediately() {
        let scheduler = Scheduler::new("foo");
        scheduler
            .schedule(Task::new("later", Trigger::cron("@yearly").unwrap()).unwrap())
            .unwrap();
        let mut registry = SchedulerRegistry::new();
        registry.register(scheduler).unwrap();

        let worker = Worker::new("manual", registry, fail_on("none"));
        assert_eq!(worker.execute_task("foo", "later").await.unwrap(), TaskRun::Succeeded);
        assert!(matches!(
            worker.execute_task("bar", "later").await,
            Err(JobError::UnknownScheduler(_))
        ));
        assert!(matches!(
            worker.execute_task("foo", "missing").await,
            Err(JobError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_running_task_is_not_dispatched_twice() {
        let (registry, scheduler) = overdue(&["x"]);
        scheduler.mark_running("x").unwrap();
        let worker = Worker::new("second", registry, fail_on("none"));

        assert_eq!(worker.execute_task("foo", "x").await.unwrap(), TaskRun::Skipped);
        assert_eq!(worker.executed_count(), 0);
    }

    #[tokio::test]
    async fn test_store_receives_transitions_and_failures() {
        let (registry, _) = overdue(&["x", "y"]);
        let store = Arc::new(MemoryTaskStore::new());
        let worker = Worker::new("persisted", registry, fail_on("x"))
            .with_options(options(2))
            .with_store(store.clone());

        worker.execute().await.unwrap();

        let runtimes = store.load("foo").unwrap();
        assert_eq!(runtimes["x"].state, TaskState::Failed);
        assert_eq!(runtimes["y"].state, TaskState::Scheduled);
        let failures = store.failures(Some("foo")).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task, "x");
    }

    struct BrokenStore;

    impl TaskStore for BrokenStore {
        fn load(&self, _: &str) -> JobResult<BTreeMap<String, TaskRuntime>> {
            Ok(BTreeMap::new())
        }

        fn save_task(&self, _: &str, _: &Task) -> JobResult<()> {
            Err(JobError::Store("disk full".to_string()))
        }

        fn claim(&self, _: &str, _: &Task) -> JobResult<bool> {
            Err(JobError::Store("disk full".to_string()))
        }

        fn record_failure(&self, _: FailureRecord) -> JobResult<()> {
            Ok(())
        }

        fn failures(&self, _: Option<&str>) -> JobResult<Vec<FailureRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_store_error_crashes_worker() {
        let (registry, _) = overdue(&["x"]);
        let (subscriber, mut events) = ChannelSubscriber::channel();
        let worker = Worker::new("doomed", registry, fail_on("none"))
            .with_options(options(1))
            .with_store(Arc::new(BrokenStore))
            .with_subscriber(Arc::new(subscriber));

        assert!(matches!(worker.execute().await, Err(JobError::Store(_))));
        assert_eq!(worker.state(), WorkerState::Crashed);

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        let names: Vec<_> = received.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["worker_started", "worker_crashed"]);
        match received.last() {
            Some(WorkerEvent::WorkerCrashed { reason, .. }) => assert!(reason.contains("disk full")),
            other => panic!("Expected WorkerCrashed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sleep_until_next_run_is_bounded_by_time_limit() {
        let scheduler = Scheduler::new("foo");
        scheduler
            .schedule(Task::new("later", Trigger::cron("@yearly").unwrap()).unwrap())
            .unwrap();
        let mut registry = SchedulerRegistry::new();
        registry.register(scheduler).unwrap();

        let worker = Worker::new("sleepy", registry, fail_on("none")).with_options(WorkerOptions {
            sleep_until_next_run: true,
            time_limit: Some(Duration::from_millis(100)),
            ..WorkerOptions::default()
        });
        let started = Instant::now();
        assert!(worker.idle_delay(started) <= Duration::from_millis(100));

        tokio::time::timeout(Duration::from_secs(5), worker.execute())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }
}
