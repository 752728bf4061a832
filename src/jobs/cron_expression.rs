//! Five-field cron expressions.
//!
//! Expressions use the classic crontab layout `minute hour day-of-month month
//! day-of-week` and are evaluated in UTC. The `cron` crate works on a
//! seconds-first layout with Sunday as day 1, so expressions are normalized
//! before parsing: a `0` seconds field is prepended and numeric days of week
//! (`0`-`7`, both ends meaning Sunday) are rewritten to day names.
//!
//! As in crontab, when both day-of-month and day-of-week are restricted a
//! date matching either field fires. A field starting with `*` counts as
//! unrestricted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::jobs::error::{JobError, JobResult};

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed cron expression that remembers its source text
#[derive(Clone)]
pub struct CronExpression {
    source: String,
    schedule: Schedule,
    /// Day-of-week half of an expression restricting both day fields
    by_weekday: Option<Schedule>,
}

impl CronExpression {
    /// The expression as written, e.g. `0 9 * * *` or `@daily`
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Earliest matching time strictly after `reference`
    pub fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self.schedule.after(&reference).next();
        match &self.by_weekday {
            Some(by_weekday) => {
                let other = by_weekday.after(&reference).next();
                match (next, other) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            }
            None => next,
        }
    }
}

impl FromStr for CronExpression {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = s.trim();
        if source.is_empty() {
            return Err(JobError::invalid_expression(s, "expression is empty"));
        }

        let expanded = expand_macro(source)?;
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(JobError::invalid_expression(
                source,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }

        let day_of_week = translate_day_of_week(fields[4])
            .map_err(|reason| JobError::invalid_expression(source, reason))?;
        let parse = |day_of_month: &str, day_of_week: &str| {
            let normalized = format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], day_of_month, fields[3], day_of_week
            );
            Schedule::from_str(&normalized)
                .map_err(|e| JobError::invalid_expression(source, e.to_string()))
        };

        let (schedule, by_weekday) = if is_restricted(fields[2]) && is_restricted(fields[4]) {
            (parse(fields[2], "*")?, Some(parse("*", &day_of_week)?))
        } else {
            (parse(fields[2], &day_of_week)?, None)
        };

        Ok(Self {
            source: source.to_string(),
            schedule,
            by_weekday,
        })
    }
}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field == "?")
}

fn expand_macro(source: &str) -> JobResult<String> {
    if !source.starts_with('@') {
        return Ok(source.to_string());
    }

    let expanded = match source.to_lowercase().as_str() {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        "@reboot" => {
            return Err(JobError::invalid_expression(
                source,
                "@reboot is not a schedule; flag the task with run_on_reboot instead",
            ));
        }
        _ => return Err(JobError::invalid_expression(source, "unknown macro")),
    };

    Ok(expanded.to_string())
}

fn translate_day_of_week(field: &str) -> Result<String, String> {
    let mut items = Vec::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{}'", step))?;
                if step == 0 {
                    return Err("day-of-week step must be greater than 0".to_string());
                }
                (range, Some(step))
            }
            None => (item, None),
        };
        let suffix = step.map(|s| format!("/{}", s)).unwrap_or_default();

        match range.split_once('-') {
            Some((start, end)) => {
                let start_day = numeric_day(start)?;
                let end_day = numeric_day(end)?;
                match (start_day, end_day) {
                    // Sunday closes the week as 7, but the target layout starts at Sunday
                    (Some(0), Some(7)) => items.push(format!("SUN-SAT{}", suffix)),
                    (Some(6), Some(7)) if step.is_none() => items.push("SAT".to_string()),
                    (Some(start_day), Some(7)) => {
                        items.push(format!("{}-SAT{}", DAY_NAMES[start_day], suffix));
                        if step.is_none_or(|s| (7 - start_day as u32) % s == 0) {
                            items.push("SUN".to_string());
                        }
                    }
                    _ => items.push(format!(
                        "{}-{}{}",
                        day_name(start, start_day),
                        day_name(end, end_day),
                        suffix
                    )),
                }
            }
            None => {
                let day = numeric_day(range)?;
                items.push(format!("{}{}", day_name(range, day), suffix));
            }
        }
    }

    Ok(items.join(","))
}

/// Numeric day of week, `None` for names and wildcards
fn numeric_day(token: &str) -> Result<Option<usize>, String> {
    match token.parse::<usize>() {
        Ok(day) if day <= 7 => Ok(Some(day)),
        Ok(day) => Err(format!("day of week {} is out of range (0-7)", day)),
        Err(_) => Ok(None),
    }
}

fn day_name(token: &str, day: Option<usize>) -> String {
    match day {
        Some(day) => DAY_NAMES[day % 7].to_string(),
        None => token.to_string(),
    }
}
