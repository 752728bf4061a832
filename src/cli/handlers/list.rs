//! List command handler

use chrono::{DateTime, SecondsFormat, Utc};

use super::Output;
use crate::cli::context::CommandContext;
use crate::error::AppResult;
use crate::jobs::{JobError, Task, TaskState};

pub struct ListCommandHandler<'a> {
    context: &'a CommandContext,
}

impl<'a> ListCommandHandler<'a> {
    pub fn new(context: &'a CommandContext) -> Self {
        Self { context }
    }

    /// Print the tasks of the selected schedulers.
    ///
    /// A scheduler with no matching task gets a warning line. The command
    /// fails with `NoTaskFound` when no selected scheduler listed a task.
    pub fn execute(
        &self,
        schedulers: &[String],
        due: bool,
        state: Option<TaskState>,
        now: DateTime<Utc>,
        out: &mut Output<'_>,
    ) -> AppResult<()> {
        let selected = self.context.select_schedulers(schedulers)?;

        let mut listed = 0;
        for scheduler in &selected {
            let tasks = if due {
                scheduler.due_tasks(now)
            } else {
                scheduler.tasks()
            };
            let tasks = tasks.filter(|task| state.is_none_or(|state| task.state() == state));

            out.line(format_args!("Scheduler: {} ({} tasks)", scheduler.name(), scheduler.len()))?;
            if tasks.is_empty() {
                out.warning(format_args!("No task found in scheduler: {}", scheduler.name()))?;
                continue;
            }
            for task in &tasks {
                out.line(render_task(task, now))?;
            }
            listed += tasks.len();
        }

        if listed == 0 {
            return Err(JobError::NoTaskFound(selected.names().join(", ")).into());
        }
        Ok(())
    }
}

fn render_task(task: &Task, now: DateTime<Utc>) -> String {
    let next = match task.next_run_date(now) {
        Ok(Some(at)) => format_date(at),
        Ok(None) => "-".to_string(),
        Err(e) => format!("error ({})", e),
    };
    let last = task
        .last_execution()
        .map(format_date)
        .unwrap_or_else(|| "never".to_string());

    format!(
        "  {:<24} {:<22} {:<10} next: {:<20} last: {}",
        task.name(),
        task.trigger().expression(),
        task.state().as_str(),
        next,
        last
    )
}

fn format_date(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
