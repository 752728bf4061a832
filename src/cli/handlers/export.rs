//! Export command handler

use std::fs;
use std::path::Path;

use tracing::info;

use super::Output;
use crate::cli::context::CommandContext;
use crate::cli::parser::ExportFormat;
use crate::error::{AppError, AppResult};
use crate::jobs::{CronExporter, JsonExporter};

pub struct ExportCommandHandler<'a> {
    context: &'a CommandContext,
}

impl<'a> ExportCommandHandler<'a> {
    pub fn new(context: &'a CommandContext) -> Self {
        Self { context }
    }

    /// Export one scheduler to stdout or to `output`.
    ///
    /// # Errors
    /// - Unknown scheduler
    /// - `NoTaskFound` when the scheduler has no task
    /// - Filesystem errors while writing `output`
    pub fn execute(
        &self,
        scheduler: &str,
        format: ExportFormat,
        output: Option<&Path>,
        out: &mut Output<'_>,
    ) -> AppResult<()> {
        let scheduler = self.context.scheduler(scheduler)?;

        let (content, skipped) = match format {
            ExportFormat::Cron => {
                let exporter = CronExporter::new(self.context.settings().export.command_prefix.clone());
                let export = exporter.export_scheduler(&scheduler)?;
                (export.render(), export.skipped)
            }
            ExportFormat::Json => (JsonExporter.export_scheduler(&scheduler)?, Vec::new()),
        };

        let Some(path) = output else {
            return out.write(&content);
        };

        write_file(path, &content)?;
        info!(scheduler = %scheduler.name(), path = %path.display(), "Scheduler exported");
        for task in &skipped {
            out.warning(format_args!("Task '{}' has no crontab equivalent and was skipped.", task))?;
        }
        out.ok(format_args!(
            "Scheduler '{}' exported to {}",
            scheduler.name(),
            path.display()
        ))
    }
}

/// Write `content` to `path`, creating missing parent directories
pub(crate) fn write_file(path: &Path, content: &str) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AppError::filesystem(parent, e))?;
    }
    fs::write(path, content).map_err(|e| AppError::filesystem(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::handlers::test_support::{capture, context};
    use crate::jobs::JobError;

    #[test]
    fn test_cron_export_to_stdout() {
        let context = context();
        let handler = ExportCommandHandler::new(&context);
        let (result, output) = capture(|out| handler.execute("foo", ExportFormat::Cron, None, out));

        assert!(result.is_ok());
        assert_eq!(
            output,
            "# cadence: foo\n0 9 * * * cadence execute foo send-report\n"
        );
    }

    #[test]
    fn test_json_export_lists_tasks() {
        let context = context();
        let handler = ExportCommandHandler::new(&context);
        let (result, output) = capture(|out| handler.execute("foo", ExportFormat::Json, None, out));

        assert!(result.is_ok());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_export_to_file_reports_skipped_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("foo.cron");
        let context = context();
        let handler = ExportCommandHandler::new(&context);
        let (result, output) = capture(|out| handler.execute("foo", ExportFormat::Cron, Some(path.as_path()), out));

        assert!(result.is_ok());
        assert!(output.contains("[WARNING] Task 'poll' has no crontab equivalent"));
        assert!(output.contains("[OK] Scheduler 'foo' exported to"));
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("send-report"));
    }

    #[test]
    fn test_empty_scheduler_is_a_warning() {
        let context = context();
        let handler = ExportCommandHandler::new(&context);
        let (result, output) = capture(|out| handler.execute("bar", ExportFormat::Cron, None, out));

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::Job(JobError::NoTaskFound(_))));
        assert!(err.is_warning());
        assert!(err.to_string().starts_with("No task found"));
        assert!(output.is_empty());
    }

    #[test]
    fn test_unknown_scheduler() {
        let context = context();
        let handler = ExportCommandHandler::new(&context);
        let (result, _) = capture(|out| handler.execute("nope", ExportFormat::Json, None, out));
        assert!(matches!(result, Err(AppError::Job(JobError::UnknownScheduler(_)))));
    }
}
