//! Configuration settings structures for cadence
//!
//! This module defines all configuration structures that can be loaded from
//! TOML files and environment variables, and their conversion into the
//! runtime types of the logger and the scheduler.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::error::ConfigError;
use crate::jobs::{DEFAULT_COMMAND_PREFIX, Scheduler, SchedulerRegistry, Task, Trigger, WorkerOptions};
use crate::logger::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig};

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "logs/cadence.log".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_store_path() -> String {
    ".cadence/state.json".to_string()
}

fn default_command_prefix() -> String {
    DEFAULT_COMMAND_PREFIX.to_string()
}

// ============================================================================
// Logger Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            colored: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_log_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub append: bool,

    /// Log format: "full", "compact", or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            append: default_true(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub console: ConsoleSettings,

    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Convert the file representation into the runtime `LoggerConfig`
    pub fn to_logger_config(&self) -> Result<LoggerConfig, ConfigError> {
        let console = ConsoleConfig::new(self.console.enabled, self.console.colored);
        let file = self.file.to_file_config()?;

        LoggerConfig::new(console, file, self.level.clone())
            .map_err(|e| ConfigError::validation("logger", e.to_string()))
    }
}

impl FileSettings {
    pub fn to_file_config(&self) -> Result<FileConfig, ConfigError> {
        let format = self
            .format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::validation("logger.file.format", e.to_string()))?;

        FileConfig::new(self.enabled, PathBuf::from(&self.path), self.append, format)
            .map_err(|e| ConfigError::validation("logger.file", e.to_string()))
    }
}

// ============================================================================
// Worker Settings
// ============================================================================

/// Defaults for `cadence consume`; command-line flags take precedence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Idle sleep between polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Stop after this many executed tasks
    #[serde(default)]
    pub limit: Option<usize>,

    /// Stop after this many seconds
    #[serde(default)]
    pub time_limit_secs: Option<u64>,

    /// Stop after this many failed executions
    #[serde(default)]
    pub failure_limit: Option<usize>,

    #[serde(default)]
    pub sleep_until_next_run: bool,

    /// Kill task commands running longer than this many seconds
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,

    /// Shell used to run task commands
    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            limit: None,
            time_limit_secs: None,
            failure_limit: None,
            sleep_until_next_run: false,
            command_timeout_secs: None,
            shell: default_shell(),
        }
    }
}

impl WorkerSettings {
    pub fn to_worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            limit: self.limit,
            time_limit: self.time_limit_secs.map(Duration::from_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            failure_limit: self.failure_limit,
            sleep_until_next_run: self.sleep_until_next_run,
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// Store Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// State lives only as long as the process
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub backend: StoreBackend,

    /// State file used by the file backend
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

// ============================================================================
// Export Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Command written before `<scheduler> <task>` in crontab lines
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
        }
    }
}

// ============================================================================
// Scheduler Definitions
// ============================================================================

/// One `[[schedulers.tasks]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,

    /// Cron expression, `@` macro or periodical expression
    pub expression: String,

    /// Shell command run by the process handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arbitrary payload; `command` is added to it when both are set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub run_on_reboot: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, JsonValue>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            command: None,
            payload: None,
            description: None,
            run_on_reboot: false,
            options: BTreeMap::new(),
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    fn payload(&self) -> JsonValue {
        match (&self.payload, &self.command) {
            (Some(JsonValue::Object(map)), Some(command)) => {
                let mut map = map.clone();
                map.insert("command".to_string(), JsonValue::String(command.clone()));
                JsonValue::Object(map)
            }
            (Some(payload), _) => payload.clone(),
            (None, Some(command)) => JsonValue::String(command.clone()),
            (None, None) => JsonValue::Null,
        }
    }

    /// Build the task; `field` is the path used in error messages
    pub fn to_task(&self, field: &str) -> Result<Task, ConfigError> {
        let trigger = Trigger::parse(&self.expression)
            .map_err(|e| ConfigError::invalid_task(format!("{}.expression", field), e))?;

        let mut task = Task::new(self.name.clone(), trigger)
            .map_err(|e| ConfigError::invalid_task(format!("{}.name", field), e))?
            .with_payload(self.payload())
            .with_run_on_reboot(self.run_on_reboot);
        if let Some(description) = &self.description {
            task = task.with_description(description.clone());
        }
        for (key, value) in &self.options {
            task = task.with_option(key.clone(), value.clone());
        }
        Ok(task)
    }
}

/// One `[[schedulers]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerDefinition {
    pub name: String,

    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
}

impl SchedulerDefinition {
    pub fn new(name: impl Into<String>, tasks: Vec<TaskDefinition>) -> Self {
        Self {
            name: name.into(),
            tasks,
        }
    }

    /// Build the scheduler; tasks are anchored at `now`
    pub fn to_scheduler(&self, field: &str, now: DateTime<Utc>) -> Result<Scheduler, ConfigError> {
        let scheduler = Scheduler::new(self.name.clone());
        for (index, definition) in self.tasks.iter().enumerate() {
            let field = format!("{}.tasks[{}]", field, index);
            let task = definition.to_task(&field)?;
            scheduler
                .schedule_at(task, now)
                .map_err(|e| ConfigError::invalid_task(format!("{}.name", field), e))?;
        }
        Ok(scheduler)
    }
}

// ============================================================================
// Main Settings Structure
// ============================================================================

/// Complete application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub logger: LoggerSettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub export: ExportSettings,

    #[serde(default)]
    pub schedulers: Vec<SchedulerDefinition>,
}

impl Settings {
    /// Build every configured scheduler, in configuration order
    pub fn build_schedulers(&self, now: DateTime<Utc>) -> Result<SchedulerRegistry, ConfigError> {
        let mut registry = SchedulerRegistry::new();
        for (index, definition) in self.schedulers.iter().enumerate() {
            let field = format!("schedulers[{}]", index);
            let scheduler = definition.to_scheduler(&field, now)?;
            registry
                .register(scheduler)
                .map_err(|e| ConfigError::invalid_task(format!("{}.name", field), e))?;
        }
        Ok(registry)
    }
}
