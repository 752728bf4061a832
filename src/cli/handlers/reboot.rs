//! Reboot command handler

use tracing::info;

use super::Output;
use crate::cli::context::CommandContext;
use crate::error::AppResult;
use crate::jobs::TaskRun;

pub struct RebootCommandHandler<'a> {
    context: &'a CommandContext,
}

/// Outcome counts of a reboot
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebootSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl<'a> RebootCommandHandler<'a> {
    pub fn new(context: &'a CommandContext) -> Self {
        Self { context }
    }

    /// Reset tasks left running, persist the reset, then run every task
    /// flagged `run_on_reboot`.
    ///
    /// Failures of reboot tasks are reported but do not fail the command.
    pub async fn execute(&self, scheduler: &str, out: &mut Output<'_>) -> AppResult<RebootSummary> {
        let scheduler = self.context.scheduler(scheduler)?;
        let reboot_tasks = scheduler.reboot();

        let store = self.context.store();
        for task in &scheduler.tasks() {
            store.save_task(scheduler.name(), task)?;
        }

        let options = self.context.settings().worker.to_worker_options();
        let worker = self.context.worker_for(&scheduler, options)?;

        let mut summary = RebootSummary::default();
        for task in &reboot_tasks {
            match worker.execute_task(scheduler.name(), task.name()).await? {
                TaskRun::Succeeded => {
                    summary.succeeded += 1;
                    out.ok(format_args!("Task '{}' executed.", task.name()))?;
                }
                TaskRun::Failed(reason) => {
                    summary.failed += 1;
                    out.line(format_args!("[ERROR] Task '{}' failed: {}", task.name(), reason))?;
                }
                TaskRun::Skipped => summary.skipped += 1,
            }
        }

        info!(
            scheduler = %scheduler.name(),
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Reboot finished"
        );
        out.ok(format_args!(
            "Scheduler '{}' rebooted, {} reboot task(s) run.",
            scheduler.name(),
            reboot_tasks.len()
        ))?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::handlers::test_support::settings;
    use crate::cli::context::CommandContext;
    use crate::config::settings::{SchedulerDefinition, TaskDefinition};
    use crate::jobs::{FnHandler, TaskState};
    use std::sync::Arc;

    fn reboot_context() -> CommandContext {
        let mut settings = settings();
        settings.schedulers.push(SchedulerDefinition::new(
            "boot",
            vec![
                TaskDefinition {
                    run_on_reboot: true,
                    ..TaskDefinition::new("warm-cache", "@daily").with_command("true")
                },
                TaskDefinition {
                    run_on_reboot: true,
                    ..TaskDefinition::new("broken", "@daily").with_command("false")
                },
                TaskDefinition::new("nightly", "@daily").with_command("true"),
            ],
        ));
        CommandContext::new(settings).unwrap()
    }

    #[tokio::test]
    async fn test_runs_reboot_tasks_only() {
        let context = reboot_context().with_handler(Arc::new(FnHandler::new(|task| {
            if task.name() == "broken" {
                Err("exit status 1".to_string())
            } else {
                Ok(())
            }
        })));
        let handler = RebootCommandHandler::new(&context);
        let mut buffer = Vec::new();

        let summary = handler.execute("boot", &mut Output::new(&mut buffer)).await.unwrap();
        assert_eq!(
            summary,
            RebootSummary {
                succeeded: 1,
                failed: 1,
                skipped: 0
            }
        );

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("[OK] Task 'warm-cache' executed."));
        assert!(output.contains("[ERROR] Task 'broken' failed: exit status 1"));
        let scheduler = context.scheduler("boot").unwrap();
        assert!(scheduler.task("nightly").unwrap().last_execution().is_none());
    }

    #[tokio::test]
    async fn test_clears_running_tasks() {
        let context = reboot_context();
        let scheduler = context.scheduler("foo").unwrap();
        scheduler.mark_running("poll").unwrap();
        let handler = RebootCommandHandler::new(&context);
        let mut buffer = Vec::new();

        let summary = handler.execute("foo", &mut Output::new(&mut buffer)).await.unwrap();
        assert_eq!(summary, RebootSummary::default());
        assert_eq!(scheduler.task("poll").unwrap().state(), TaskState::Scheduled);

        let stored = context.store().load("foo").unwrap();
        assert_eq!(stored["poll"].state, TaskState::Scheduled);
    }
}
