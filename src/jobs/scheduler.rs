use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::store::TaskRuntime;
use crate::jobs::task::{Task, TaskState};
use crate::jobs::task_list::TaskList;

/// Named collection of tasks answering due-task queries.
///
/// The scheduler is the single owner of its tasks. Workers go through
/// [`Scheduler::mark_running`] before executing a task, which acts as a
/// compare-and-set on the task state so one due occurrence is never
/// dispatched twice.
#[derive(Debug)]
pub struct Scheduler {
    name: String,
    tasks: RwLock<TaskList>,
}

impl Scheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: RwLock::new(TaskList::new()),
        }
    }

    /// Build a scheduler from existing tasks, anchoring them at `now`
    pub fn with_tasks(
        name: impl Into<String>,
        tasks: impl IntoIterator<Item = Task>,
        now: DateTime<Utc>,
    ) -> JobResult<Self> {
        let scheduler = Self::new(name);
        for task in tasks {
            scheduler.schedule_at(task, now)?;
        }
        Ok(scheduler)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self, task: Task) -> JobResult<()> {
        self.schedule_at(task, Utc::now())
    }

    /// Add a task; tasks without an anchor are anchored at `now`
    pub fn schedule_at(&self, mut task: Task, now: DateTime<Utc>) -> JobResult<()> {
        task.anchor(now);
        let name = task.name().to_string();
        self.write().add(task)?;
        debug!(scheduler = %self.name, task = %name, "Task scheduled");
        Ok(())
    }

    pub fn unschedule(&self, name: &str) -> Option<Task> {
        let removed = self.write().remove(name);
        if removed.is_some() {
            debug!(scheduler = %self.name, task = %name, "Task unscheduled");
        }
        removed
    }

    /// Snapshot of every task
    pub fn tasks(&self) -> TaskList {
        self.read().clone()
    }

    pub fn task(&self, name: &str) -> Option<Task> {
        self.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Tasks whose next run is at or before `now`.
    ///
    /// Paused and running tasks are skipped. A task whose trigger fails to
    /// evaluate is logged and left out; the other tasks are still evaluated.
    /// The result keeps insertion order.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> TaskList {
        self.read().filter(|task| {
            if !task.state().is_dispatchable() {
                return false;
            }
            match task.next_run_date(now) {
                Ok(Some(next)) => next <= now,
                Ok(None) => false,
                Err(e) => {
                    warn!(
                        scheduler = %self.name,
                        task = %task.name(),
                        error = %e,
                        "Trigger evaluation failed, task skipped"
                    );
                    false
                }
            }
        })
    }

    /// Next run of every task, `None` for terminal or failing triggers
    pub fn next_run_dates(&self, now: DateTime<Utc>) -> Vec<(String, Option<DateTime<Utc>>)> {
        self.read()
            .iter()
            .map(|task| {
                let next = task.next_run_date(now).unwrap_or_else(|e| {
                    warn!(scheduler = %self.name, task = %task.name(), error = %e, "Trigger evaluation failed");
                    None
                });
                (task.name().to_string(), next)
            })
            .collect()
    }

    /// Earliest upcoming run among dispatchable tasks
    pub fn next_due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.read()
            .iter()
            .filter(|task| task.state().is_dispatchable())
            .filter_map(|task| task.next_run_date(now).ok().flatten())
            .min()
    }

    /// Move a task to `running` unless it is already running or paused.
    ///
    /// Returns the task snapshot when the transition happened.
    pub fn mark_running(&self, name: &str) -> JobResult<Option<Task>> {
        let mut tasks = self.write();
        let task = tasks
            .get_mut(name)
            .ok_or_else(|| JobError::TaskNotFound(name.to_string()))?;

        match task.state() {
            TaskState::Running | TaskState::Paused => Ok(None),
            TaskState::Scheduled | TaskState::Failed => {
                task.set_state(TaskState::Running);
                Ok(Some(task.clone()))
            }
        }
    }

    /// Undo [`Scheduler::mark_running`] after another process won the task.
    ///
    /// The stored runtime, when known, replaces the local state unless it is
    /// itself `running`, and a later stored execution is adopted.
    pub fn release(&self, name: &str, stored: Option<TaskRuntime>) -> JobResult<Task> {
        let mut tasks = self.write();
        let task = tasks
            .get_mut(name)
            .ok_or_else(|| JobError::TaskNotFound(name.to_string()))?;

        if task.state() == TaskState::Running {
            let state = stored
                .map(|runtime| runtime.state)
                .filter(|state| *state != TaskState::Running)
                .unwrap_or(TaskState::Scheduled);
            task.set_state(state);
        }
        if let Some(at) = stored
            .and_then(|runtime| runtime.last_execution)
            .filter(|at| task.last_execution().is_none_or(|last| *at > last))
        {
            task.set_last_execution(at);
        }
        Ok(task.clone())
    }

    pub fn mark_succeeded(&self, name: &str, at: DateTime<Utc>) -> JobResult<Task> {
        self.finish(name, TaskState::Scheduled, at)
    }

    pub fn mark_failed(&self, name: &str, at: DateTime<Utc>) -> JobResult<Task> {
        self.finish(name, TaskState::Failed, at)
    }

    fn finish(&self, name: &str, state: TaskState, at: DateTime<Utc>) -> JobResult<Task> {
        let mut tasks = self.write();
        let task = tasks
            .get_mut(name)
            .ok_or_else(|| JobError::TaskNotFound(name.to_string()))?;
        task.set_state(state);
        task.set_last_execution(at);
        Ok(task.clone())
    }

    pub fn pause(&self, name: &str) -> JobResult<Task> {
        let mut tasks = self.write();
        let task = tasks
            .get_mut(name)
            .ok_or_else(|| JobError::TaskNotFound(name.to_string()))?;
        if task.state() != TaskState::Running {
            task.set_state(TaskState::Paused);
        }
        Ok(task.clone())
    }

    pub fn resume(&self, name: &str) -> JobResult<Task> {
        let mut tasks = self.write();
        let task = tasks
            .get_mut(name)
            .ok_or_else(|| JobError::TaskNotFound(name.to_string()))?;
        if task.state() == TaskState::Paused {
            task.set_state(TaskState::Scheduled);
        }
        Ok(task.clone())
    }

    /// Apply persisted runtime state to the matching tasks
    pub fn restore(&self, runtimes: &BTreeMap<String, TaskRuntime>) {
        let mut tasks = self.write();
        for task in tasks.iter_mut() {
            if let Some(runtime) = runtimes.get(task.name()) {
                task.set_state(runtime.state);
                if let Some(at) = runtime.last_execution {
                    task.set_last_execution(at);
                }
            }
        }
    }

    /// Clear in-flight state and return the tasks flagged to run on reboot.
    ///
    /// Tasks left `running` by an interrupted worker go back to `scheduled`.
    pub fn reboot(&self) -> Vec<Task> {
        let mut tasks = self.write();
        let mut cleared = 0usize;
        for task in tasks.iter_mut() {
            if task.state() == TaskState::Running {
                task.set_state(TaskState::Scheduled);
                cleared += 1;
            }
        }

        let reboot_tasks: Vec<Task> = tasks
            .iter()
            .filter(|task| task.runs_on_reboot() && task.state() != TaskState::Paused)
            .cloned()
            .collect();

        info!(
            scheduler = %self.name,
            cleared,
            reboot_tasks = reboot_tasks.len(),
            "Scheduler rebooted"
        );
        reboot_tasks
    }

    fn read(&self) -> RwLockReadGuard<'_, TaskList> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskList> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}
