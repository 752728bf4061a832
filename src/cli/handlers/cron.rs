//! Cron command handler

use std::fs;
use std::path::Path;

use tracing::info;

use super::export::write_file;
use super::Output;
use crate::cli::context::CommandContext;
use crate::error::{AppError, AppResult};
use crate::jobs::{CronExporter, JobError};

pub struct CronCommandHandler<'a> {
    context: &'a CommandContext,
}

impl<'a> CronCommandHandler<'a> {
    pub fn new(context: &'a CommandContext) -> Self {
        Self { context }
    }

    /// Write `<directory>/<scheduler>.cron` for each selected scheduler.
    ///
    /// Empty schedulers are reported and skipped; returns the number of
    /// files written. Fails with `NoTaskFound` when every selected
    /// scheduler was empty.
    pub fn execute(
        &self,
        schedulers: &[String],
        directory: &Path,
        out: &mut Output<'_>,
    ) -> AppResult<usize> {
        let selected = self.context.select_schedulers(schedulers)?;
        fs::create_dir_all(directory).map_err(|e| AppError::filesystem(directory, e))?;

        let exporter = CronExporter::new(self.context.settings().export.command_prefix.clone());
        let mut written = 0;
        for scheduler in &selected {
            let export = match exporter.export_scheduler(scheduler) {
                Ok(export) => export,
                Err(JobError::NoTaskFound(name)) => {
                    out.warning(format_args!("No task found in scheduler: {}", name))?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let path = directory.join(format!("{}.cron", scheduler.name()));
            write_file(&path, &export.render())?;
            written += 1;

            info!(
                scheduler = %scheduler.name(),
                path = %path.display(),
                lines = export.lines.len(),
                skipped = export.skipped.len(),
                "Crontab generated"
            );
            out.ok(format_args!(
                "{} written ({} line(s), {} skipped)",
                path.display(),
                export.lines.len(),
                export.skipped.len()
            ))?;
        }

        if written == 0 {
            return Err(JobError::NoTaskFound(selected.names().join(", ")).into());
        }
        Ok(written)
    }
}
