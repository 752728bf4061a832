use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::process::Command;
use tracing::debug;

use crate::jobs::task::Task;

/// Number of trailing stderr characters kept in a failure reason
const STDERR_TAIL: usize = 512;

/// Receives the payload of every due task a worker executes.
///
/// Returning `Err` marks the execution as failed with the given reason.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn dispatch(&self, task: &Task) -> Result<(), String>;
}

/// Adapter turning a closure into a [`MessageHandler`]
pub struct FnHandler<F> {
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Task) -> Result<(), String> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Task) -> Result<(), String> + Send + Sync,
{
    async fn dispatch(&self, task: &Task) -> Result<(), String> {
        (self.handler)(task)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Runs the task payload as a shell command.
///
/// The payload is either a string holding the command line or an object
/// with a `command` string and an optional `env` object.
#[derive(Debug, Clone)]
pub struct ProcessHandler {
    shell: String,
    timeout: Option<Duration>,
}

impl ProcessHandler {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command_line(payload: &JsonValue) -> Result<&str, String> {
        match payload {
            JsonValue::String(command) => Ok(command),
            JsonValue::Object(map) => map
                .get("command")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| "payload has no 'command' string".to_string()),
            JsonValue::Null => Err("task has no payload".to_string()),
            _ => Err("payload must be a command string or an object".to_string()),
        }
    }
}

impl Default for ProcessHandler {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl MessageHandler for ProcessHandler {
    async fn dispatch(&self, task: &Task) -> Result<(), String> {
        let command_line = Self::command_line(task.payload())?;
        if command_line.trim().is_empty() {
            return Err("command is empty".to_string());
        }

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(command_line)
            .env("CADENCE_TASK", task.name())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env) = task.payload().get("env").and_then(JsonValue::as_object) {
            for (key, value) in env {
                match value {
                    JsonValue::String(s) => command.env(key, s),
                    other => command.env(key, other.to_string()),
                };
            }
        }

        debug!(task = %task.name(), command = %command_line, "Spawning task command");

        let output = command.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, output)
                .await
                .map_err(|_| format!("command timed out after {}ms", limit.as_millis()))?,
            None => output.await,
        }
        .map_err(|e| format!("failed to spawn '{}': {}", self.shell, e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let tail: String = {
            let count = stderr.chars().count();
            stderr.chars().skip(count.saturating_sub(STDERR_TAIL)).collect()
        };

        if tail.is_empty() {
            Err(format!("command exited with {}", output.status))
        } else {
            Err(format!("command exited with {}: {}", output.status, tail))
        }
    }
}
