//! Command handlers
//!
//! One handler per subcommand. Handlers write their report through an
//! [`Output`] so tests can capture it; diagnostics go through `tracing`.

pub mod consume;
pub mod cron;
pub mod execute;
pub mod export;
pub mod failed;
pub mod list;
pub mod reboot;

pub use consume::{ConsumeArgs, ConsumeCommandHandler};
pub use cron::CronCommandHandler;
pub use execute::ExecuteCommandHandler;
pub use export::ExportCommandHandler;
pub use failed::FailedCommandHandler;
pub use list::ListCommandHandler;
pub use reboot::RebootCommandHandler;

use std::fmt::Display;
use std::io::Write;

use crate::error::{AppError, AppResult};

/// Line-oriented report writer with the `[OK]` and `[WARNING]` prefixes
pub struct Output<'a> {
    out: &'a mut dyn Write,
}

impl<'a> Output<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self { out }
    }

    pub fn line(&mut self, text: impl Display) -> AppResult<()> {
        writeln!(self.out, "{}", text).map_err(|e| AppError::from(anyhow::Error::from(e)))
    }

    /// Raw content, written as-is
    pub fn write(&mut self, content: &str) -> AppResult<()> {
        self.out
            .write_all(content.as_bytes())
            .map_err(|e| AppError::from(anyhow::Error::from(e)))
    }

    pub fn ok(&mut self, message: impl Display) -> AppResult<()> {
        self.line(format_args!("[OK] {}", message))
    }

    pub fn warning(&mut self, message: impl Display) -> AppResult<()> {
        self.line(format_args!("[WARNING] {}", message))
    }
}
