//! Triggers compute when a task is next due.
//!
//! A trigger is a closed set of variants evaluated by a single pure
//! function: given the last run (or `None` when the task never ran) and the
//! current time, it yields the next due time or `None` when the task should
//! not run again. Expressions are validated when the trigger is built, so a
//! malformed expression never reaches evaluation.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::cron_expression::CronExpression;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::periodical::PeriodicalExpression;

/// User-supplied next-run function; returning `None` stops the recurrence
pub type TriggerCallback =
    Arc<dyn Fn(Option<DateTime<Utc>>) -> Option<DateTime<Utc>> + Send + Sync>;

/// Errors raised while evaluating a single trigger
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("next run date of '{0}' is out of range")]
    OutOfRange(String),

    #[error("callback trigger '{0}' panicked")]
    CallbackPanicked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Cron,
    Periodical,
    Callback,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Cron => write!(f, "cron"),
            TriggerKind::Periodical => write!(f, "periodical"),
            TriggerKind::Callback => write!(f, "callback"),
        }
    }
}

#[derive(Clone)]
pub enum Trigger {
    Cron(CronExpression),
    Periodical(PeriodicalExpression),
    Callback {
        label: String,
        callback: TriggerCallback,
    },
}

impl Trigger {
    /// Build a cron trigger from a five-field expression or an `@` macro
    pub fn cron(expression: &str) -> JobResult<Self> {
        expression.parse().map(Trigger::Cron)
    }

    /// Build a periodical trigger such as `every 5 minutes`
    pub fn periodical(expression: &str) -> JobResult<Self> {
        expression.parse().map(Trigger::Periodical)
    }

    pub fn callback<F>(label: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Option<DateTime<Utc>>) -> Option<DateTime<Utc>> + Send + Sync + 'static,
    {
        Trigger::Callback {
            label: label.into(),
            callback: Arc::new(callback),
        }
    }

    /// Detect the trigger kind from the expression text.
    ///
    /// `@` macros and five fields with a numeric first field are cron;
    /// everything else is periodical.
    pub fn parse(expression: &str) -> JobResult<Self> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(JobError::invalid_expression(expression, "expression is empty"));
        }

        if looks_like_cron(trimmed) {
            Self::cron(trimmed)
        } else {
            Self::periodical(trimmed)
        }
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Cron(_) => TriggerKind::Cron,
            Trigger::Periodical(_) => TriggerKind::Periodical,
            Trigger::Callback { .. } => TriggerKind::Callback,
        }
    }

    pub fn is_cron(&self) -> bool {
        matches!(self, Trigger::Cron(_))
    }

    /// Source expression, or the label of a callback trigger
    pub fn expression(&self) -> &str {
        match self {
            Trigger::Cron(cron) => cron.as_str(),
            Trigger::Periodical(periodical) => periodical.as_str(),
            Trigger::Callback { label, .. } => label,
        }
    }

    /// Next due time strictly after `last_run`, or after `now` when the task
    /// has never run. `Ok(None)` means the trigger will not fire again.
    pub fn next_run_date(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, TriggerError> {
        let reference = last_run.unwrap_or(now);

        match self {
            Trigger::Cron(cron) => Ok(cron.next_after(reference)),
            Trigger::Periodical(periodical) => periodical
                .next_after(reference)
                .map(Some)
                .ok_or_else(|| TriggerError::OutOfRange(periodical.as_str().to_string())),
            Trigger::Callback { label, callback } => {
                catch_unwind(AssertUnwindSafe(|| callback(last_run)))
                    .map_err(|_| TriggerError::CallbackPanicked(label.clone()))
            }
        }
    }
}

fn looks_like_cron(expression: &str) -> bool {
    if expression.starts_with('@') {
        return true;
    }

    let fields: Vec<&str> = expression.split_whitespace().collect();
    fields.len() == 5
        && fields[0]
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '*' | '/' | ',' | '-'))
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Cron(cron) => f.debug_tuple("Cron").field(&cron.as_str()).finish(),
            Trigger::Periodical(periodical) => f
                .debug_tuple("Periodical")
                .field(&periodical.as_str())
                .finish(),
            Trigger::Callback { label, .. } => {
                f.debug_struct("Callback").field("label", label).finish_non_exhaustive()
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.expression())
    }
}

impl PartialEq for Trigger {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Trigger::Cron(a), Trigger::Cron(b)) => a == b,
            (Trigger::Periodical(a), Trigger::Periodical(b)) => a == b,
            (
                Trigger::Callback { label: a, callback: fa },
                Trigger::Callback { label: b, callback: fb },
            ) => a == b && Arc::ptr_eq(fa, fb),
            _ => false,
        }
    }
}

/// Serialized form: `{ "type": "cron", "expression": "0 9 * * *" }`
#[derive(Debug, Serialize, Deserialize)]
struct TriggerRepr {
    #[serde(rename = "type")]
    kind: TriggerKind,
    expression: String,
}

impl Serialize for Trigger {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TriggerRepr {
            kind: self.kind(),
            expression: self.expression().to_string(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = TriggerRepr::deserialize(deserializer)?;
        let trigger = match repr.kind {
            TriggerKind::Cron => Trigger::cron(&repr.expression),
            TriggerKind::Periodical => Trigger::periodical(&repr.expression),
            TriggerKind::Callback => Err(JobError::invalid_expression(
                repr.expression,
                "callback triggers cannot be deserialized",
            )),
        };
        trigger.map_err(serde::de::Error::custom)
    }
}
