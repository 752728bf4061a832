//! Failed command handler

use chrono::SecondsFormat;

use super::Output;
use crate::cli::context::CommandContext;
use crate::error::{AppError, AppResult};

pub struct FailedCommandHandler<'a> {
    context: &'a CommandContext,
}

impl<'a> FailedCommandHandler<'a> {
    pub fn new(context: &'a CommandContext) -> Self {
        Self { context }
    }

    /// Print the recorded failures of the selected schedulers, oldest first
    pub fn execute(&self, schedulers: &[String], out: &mut Output<'_>) -> AppResult<()> {
        let selected = self.context.select_schedulers(schedulers)?;
        let store = self.context.store();

        let mut failures = store.failures(None)?;
        failures.retain(|record| selected.contains(&record.scheduler));
        if failures.is_empty() {
            return Err(AppError::NoFailedTaskFound);
        }

        for record in &failures {
            out.line(format_args!(
                "{}  {}/{}  {}",
                record.failed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                record.scheduler,
                record.task,
                record.reason
            ))?;
        }
        out.line(format_args!("{} failed execution(s)", failures.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::handlers::test_support::{capture, context};
    use crate::jobs::{FailedTask, FailureRecord};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_no_failure_recorded() {
        let context = context();
        let handler = FailedCommandHandler::new(&context);
        let (result, output) = capture(|out| handler.execute(&[], out));
        assert!(matches!(result, Err(AppError::NoFailedTaskFound)));
        assert!(output.is_empty());
    }

    #[test]
    fn test_lists_failures_of_selected_schedulers() {
        let context = context();
        let task = context.scheduler("foo").unwrap().task("poll").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        let failed = FailedTask::new(task, "exit status 2", at);
        context.store().record_failure(FailureRecord::new("foo", &failed)).unwrap();

        let handler = FailedCommandHandler::new(&context);
        let (result, output) = capture(|out| handler.execute(&["foo".to_string()], out));
        assert!(result.is_ok());
        assert!(output.contains("2024-01-02T09:00:00Z  foo/poll  exit status 2"));
        assert!(output.contains("1 failed execution(s)"));

        let (result, _) = capture(|out| handler.execute(&["bar".to_string()], out));
        assert!(matches!(result, Err(AppError::NoFailedTaskFound)));
    }
}
