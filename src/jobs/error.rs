use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Task already exists: {0}")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Unknown scheduler: {0}")]
    UnknownScheduler(String),

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Scheduler already registered: {0}")]
    DuplicateScheduler(String),

    #[error("Worker already registered: {0}")]
    DuplicateWorker(String),

    #[error("Task '{task}' execution failed: {reason}")]
    TaskExecution { task: String, reason: String },

    #[error("No task found in scheduler: {0}")]
    NoTaskFound(String),

    #[error("Worker is already running: {0}")]
    WorkerAlreadyRunning(String),

    #[error("Task store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn invalid_expression(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;
