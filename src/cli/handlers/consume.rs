//! Consume command handler
//!
//! Runs the selected workers concurrently on the current runtime until each
//! one reaches a limit or Ctrl-C cancels them all.

use futures::future::join_all;
use tracing::{info, warn};

use super::Output;
use crate::cli::context::CommandContext;
use crate::error::{AppError, AppResult};

/// Arguments of the consume command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeArgs {
    pub schedulers: Vec<String>,
    pub all: bool,
    pub limit: Option<usize>,
    pub time_limit_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub failure_limit: Option<usize>,
}

pub struct ConsumeCommandHandler<'a> {
    context: &'a CommandContext,
}

impl<'a> ConsumeCommandHandler<'a> {
    pub fn new(context: &'a CommandContext) -> Self {
        Self { context }
    }

    /// # Errors
    /// - `NoWorkerAvailable` when no worker consumes the requested schedulers
    /// - The first worker error, after every worker has stopped
    pub async fn execute(&self, args: &ConsumeArgs, out: &mut Output<'_>) -> AppResult<()> {
        let options = self.context.worker_options(
            args.limit,
            args.time_limit_secs,
            args.poll_interval_ms,
            args.failure_limit,
        );
        let workers = self.context.workers(&options)?;
        let workers = if args.all {
            workers
        } else {
            workers.filter(&args.schedulers)
        };
        if workers.is_empty() {
            return Err(AppError::NoWorkerAvailable);
        }

        let tokens: Vec<_> = workers.iter().map(|worker| worker.stop_token()).collect();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping workers");
                for token in tokens {
                    token.cancel();
                }
            }
        });

        info!(workers = ?workers.names(), "Consuming schedulers");
        let results = join_all(workers.iter().map(|worker| worker.execute())).await;
        interrupt.abort();

        let mut first_error = None;
        for (worker, result) in workers.iter().zip(results) {
            match result {
                Ok(()) => out.ok(format_args!(
                    "Worker '{}' stopped after {} execution(s), {} failed.",
                    worker.name(),
                    worker.executed_count(),
                    worker.failed_tasks().len()
                ))?,
                Err(e) => {
                    out.line(format_args!("[ERROR] Worker '{}' crashed: {}", worker.name(), e))?;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
