//! Command executor for dispatching CLI commands
//!
//! Entry point for running a parsed command once configuration is loaded.

use super::context::CommandContext;
use super::handlers::{
    ConsumeArgs, ConsumeCommandHandler, CronCommandHandler, ExecuteCommandHandler,
    ExportCommandHandler, FailedCommandHandler, ListCommandHandler, Output, RebootCommandHandler,
};
use super::parser::Commands;
use crate::config::settings::Settings;
use crate::error::AppResult;

/// Execute a CLI command with the given settings
///
/// Builds the command context, then dispatches to the handler of `command`,
/// which writes its report to `out`.
///
/// # Errors
/// Returns errors from context assembly or from the command handler
pub async fn execute_command(command: &Commands, settings: Settings, out: &mut Output<'_>) -> AppResult<()> {
    let context = CommandContext::new(settings)?;
    dispatch(&context, command, out).await
}

/// Dispatch `command` against an assembled context
pub async fn dispatch(context: &CommandContext, command: &Commands, out: &mut Output<'_>) -> AppResult<()> {
    match command {
        Commands::Consume {
            schedulers,
            all,
            limit,
            time_limit,
            poll_interval,
            failure_limit,
        } => {
            let args = ConsumeArgs {
                schedulers: schedulers.clone(),
                all: *all,
                limit: *limit,
                time_limit_secs: *time_limit,
                poll_interval_ms: *poll_interval,
                failure_limit: *failure_limit,
            };
            ConsumeCommandHandler::new(context).execute(&args, out).await
        }
        Commands::List { schedulers, due, state } => ListCommandHandler::new(context).execute(
            schedulers,
            *due,
            state.map(Into::into),
            chrono::Utc::now(),
            out,
        ),
        Commands::Failed { schedulers } => FailedCommandHandler::new(context).execute(schedulers, out),
        Commands::Export {
            scheduler,
            format,
            output,
        } => ExportCommandHandler::new(context).execute(scheduler, *format, output.as_deref(), out),
        Commands::Cron { schedulers, directory } => {
            CronCommandHandler::new(context).execute(schedulers, directory, out)?;
            Ok(())
        }
        Commands::Reboot { scheduler } => {
            RebootCommandHandler::new(context).execute(scheduler, out).await?;
            Ok(())
        }
        Commands::Execute { scheduler, task } => {
            ExecuteCommandHandler::new(context).execute(scheduler, task, out).await
        }
    }
}
