//! Export of scheduler tasks as crontab lines or JSON.

use tracing::warn;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::scheduler::Scheduler;

pub const DEFAULT_COMMAND_PREFIX: &str = "cadence execute";

/// Crontab lines generated for one scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExport {
    pub scheduler: String,
    pub lines: Vec<String>,
    /// Names of tasks whose trigger has no crontab equivalent
    pub skipped: Vec<String>,
}

impl CronExport {
    /// Crontab content with a header naming the scheduler
    pub fn render(&self) -> String {
        let mut out = format!("# cadence: {}\n", self.scheduler);
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct CronExporter {
    command_prefix: String,
}

impl CronExporter {
    pub fn new(command_prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: command_prefix.into(),
        }
    }

    /// One line per cron task: `<expression> <prefix> <scheduler> <task>`
    pub fn export_scheduler(&self, scheduler: &Scheduler) -> JobResult<CronExport> {
        let tasks = scheduler.tasks();
        if tasks.is_empty() {
            return Err(JobError::NoTaskFound(scheduler.name().to_string()));
        }

        let mut lines = Vec::with_capacity(tasks.len());
        let mut skipped = Vec::new();
        for task in &tasks {
            if !task.trigger().is_cron() {
                warn!(
                    scheduler = %scheduler.name(),
                    task = %task.name(),
                    trigger = %task.trigger(),
                    "Task has no cron expression, skipped from export"
                );
                skipped.push(task.name().to_string());
                continue;
            }

            lines.push(format!(
                "{} {} {} {}",
                task.trigger().expression(),
                escape_percent(&self.command_prefix),
                escape_percent(&shell_quote(scheduler.name())),
                escape_percent(&shell_quote(task.name()))
            ));
        }

        Ok(CronExport {
            scheduler: scheduler.name().to_string(),
            lines,
            skipped,
        })
    }
}

impl Default for CronExporter {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExporter;

impl JsonExporter {
    /// Pretty-printed JSON array of the scheduler's tasks
    pub fn export_scheduler(&self, scheduler: &Scheduler) -> JobResult<String> {
        let tasks = scheduler.tasks();
        if tasks.is_empty() {
            return Err(JobError::NoTaskFound(scheduler.name().to_string()));
        }
        Ok(serde_json::to_string_pretty(&tasks)?)
    }
}

fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/'));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// cron turns an unescaped `%` into a newline, even inside quotes
fn escape_percent(value: &str) -> String {
    value.replace('%', r"\%")
}
