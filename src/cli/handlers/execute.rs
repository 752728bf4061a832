//! Execute command handler

use super::Output;
use crate::cli::context::CommandContext;
use crate::error::AppResult;
use crate::jobs::{JobError, TaskRun};

pub struct ExecuteCommandHandler<'a> {
    context: &'a CommandContext,
}

impl<'a> ExecuteCommandHandler<'a> {
    pub fn new(context: &'a CommandContext) -> Self {
        Self { context }
    }

    /// Run one task immediately through a worker bound to its scheduler.
    ///
    /// A failed run is returned as `TaskExecution` so the process exits 1.
    pub async fn execute(&self, scheduler: &str, task: &str, out: &mut Output<'_>) -> AppResult<()> {
        let scheduler = self.context.scheduler(scheduler)?;
        let options = self.context.settings().worker.to_worker_options();
        let worker = self.context.worker_for(&scheduler, options)?;

        match worker.execute_task(scheduler.name(), task).await? {
            TaskRun::Succeeded => out.ok(format_args!("Task '{}' executed.", task)),
            TaskRun::Skipped => out.warning(format_args!(
                "Task '{}' was not executed, it is paused or already running.",
                task
            )),
            TaskRun::Failed(reason) => Err(JobError::TaskExecution {
                task: task.to_string(),
                reason,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::handlers::test_support::context;
    use crate::error::AppError;
    use crate::jobs::{FnHandler, TaskState};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_execute_succeeds() {
        let context = context();
        let handler = ExecuteCommandHandler::new(&context);
        let mut buffer = Vec::new();

        handler
            .execute("foo", "send-report", &mut Output::new(&mut buffer))
            .await
            .unwrap();

        assert_eq!(String::from_utf8(buffer).unwrap(), "[OK] Task 'send-report' executed.\n");
        let task = context.scheduler("foo").unwrap().task("send-report").unwrap();
        assert!(task.last_execution().is_some());
        assert_eq!(task.state(), TaskState::Scheduled);
    }

    #[tokio::test]
    async fn test_execute_failure_is_an_error() {
        let context = context().with_handler(Arc::new(FnHandler::new(|_task| Err("exit status 3".to_string()))));
        let handler = ExecuteCommandHandler::new(&context);
        let mut buffer = Vec::new();

        let err = handler
            .execute("foo", "poll", &mut Output::new(&mut buffer))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Job(JobError::TaskExecution { .. })));
        assert!(!err.is_warning());
        assert_eq!(context.store().failures(Some("foo")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_paused_task_is_skipped() {
        let context = context();
        context.scheduler("foo").unwrap().pause("poll").unwrap();
        let handler = ExecuteCommandHandler::new(&context);
        let mut buffer = Vec::new();

        handler
            .execute("foo", "poll", &mut Output::new(&mut buffer))
            .await
            .unwrap();
        assert!(String::from_utf8(buffer).unwrap().starts_with("[WARNING]"));
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let context = context();
        let handler = ExecuteCommandHandler::new(&context);
        let mut buffer = Vec::new();

        let err = handler
            .execute("foo", "missing", &mut Output::new(&mut buffer))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Job(JobError::TaskNotFound(_))));
    }
}
