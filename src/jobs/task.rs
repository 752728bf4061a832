use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::trigger::{Trigger, TriggerError};

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Scheduled,
    Paused,
    Running,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Scheduled => "scheduled",
            TaskState::Paused => "paused",
            TaskState::Running => "running",
            TaskState::Failed => "failed",
        }
    }

    /// Whether a task in this state may be picked up by a worker
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, TaskState::Scheduled | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(TaskState::Scheduled),
            "paused" => Ok(TaskState::Paused),
            "running" => Ok(TaskState::Running),
            "failed" => Ok(TaskState::Failed),
            _ => Err(JobError::InvalidTask(format!(
                "Invalid task state '{}'. Valid states are: scheduled, paused, running, failed",
                s
            ))),
        }
    }
}

/// A named, schedulable unit of work.
///
/// The name is fixed at construction. State and last execution are only
/// changed by the scheduler that owns the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    name: String,
    trigger: Trigger,
    #[serde(default)]
    payload: JsonValue,
    #[serde(default)]
    state: TaskState,
    #[serde(default)]
    last_execution: Option<DateTime<Utc>>,
    #[serde(default)]
    scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    run_on_reboot: bool,
}

impl Task {
    pub fn new(name: impl Into<String>, trigger: Trigger) -> JobResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(JobError::InvalidTask("task name cannot be empty".to_string()));
        }

        Ok(Self {
            name,
            trigger,
            payload: JsonValue::Null,
            state: TaskState::Scheduled,
            last_execution: None,
            scheduled_at: None,
            options: BTreeMap::new(),
            description: None,
            run_on_reboot: false,
        })
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Flag the task to be run when its scheduler is rebooted
    pub fn with_run_on_reboot(mut self, run_on_reboot: bool) -> Self {
        self.run_on_reboot = run_on_reboot;
        self
    }

    /// Anchor used as the reference time until the task first runs
    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    pub fn with_last_execution(mut self, last_execution: DateTime<Utc>) -> Self {
        self.last_execution = Some(last_execution);
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn last_execution(&self) -> Option<DateTime<Utc>> {
        self.last_execution
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn options(&self) -> &BTreeMap<String, JsonValue> {
        &self.options
    }

    pub fn option(&self, key: &str) -> Option<&JsonValue> {
        self.options.get(key)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn runs_on_reboot(&self) -> bool {
        self.run_on_reboot
    }

    /// Next due time, measured from the last execution or, for a task that
    /// never ran, from the time it was scheduled.
    ///
    /// Callbacks only ever see a real last execution, so `None` still tells
    /// them the task has not run yet.
    pub fn next_run_date(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, TriggerError> {
        let reference = match self.trigger {
            Trigger::Callback { .. } => self.last_execution,
            _ => self.last_execution.or(self.scheduled_at),
        };
        self.trigger.next_run_date(reference, now)
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub(crate) fn set_last_execution(&mut self, at: DateTime<Utc>) {
        self.last_execution = Some(at);
    }

    pub(crate) fn anchor(&mut self, now: DateTime<Utc>) {
        if self.scheduled_at.is_none() {
            self.scheduled_at = Some(now);
        }
    }
}

/// Immutable record of one failed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTask {
    task: Task,
    reason: String,
    failed_at: DateTime<Utc>,
}

impl FailedTask {
    pub fn new(task: Task, reason: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            task,
            reason: reason.into(),
            failed_at,
        }
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn failed_at(&self) -> DateTime<Utc> {
        self.failed_at
    }
}
