//! Human-readable interval expressions.
//!
//! Supported forms (case-insensitive, extra whitespace ignored):
//! - `every 5 minutes`, `every hour`, `30 seconds`, `2 weeks`
//! - `hourly`, `daily`, `weekly`, `monthly`, `yearly`
//! - `first day of next month`
//! - `midnight`, `tomorrow`
//!
//! Months and years use calendar arithmetic, everything else is a fixed
//! duration. All dates are UTC.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeDelta, Utc};
use regex::Regex;

use crate::jobs::error::JobError;

static INTERVAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:every\s+)?(?:(\d+)\s+)?(second|minute|hour|day|week|month|year)s?$")
        .expect("interval pattern is valid")
});

/// The recurrence rule behind a periodical expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Fixed wall-clock duration
    Fixed(TimeDelta),
    /// Calendar months (years are stored as twelve months)
    Months(u32),
    /// Midnight of the first day of the following month
    FirstDayOfNextMonth,
    /// Next midnight
    Midnight,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicalExpression {
    source: String,
    period: Period,
}

impl PeriodicalExpression {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// Next occurrence strictly after `reference`, `None` on calendar overflow
    pub fn next_after(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.period {
            Period::Fixed(delta) => reference.checked_add_signed(delta),
            Period::Months(months) => reference.checked_add_months(Months::new(months)),
            Period::FirstDayOfNextMonth => {
                let (year, month) = if reference.month() == 12 {
                    (reference.year().checked_add(1)?, 1)
                } else {
                    (reference.year(), reference.month() + 1)
                };
                NaiveDate::from_ymd_opt(year, month, 1)
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc())
            }
            Period::Midnight => reference
                .date_naive()
                .succ_opt()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc()),
        }
    }
}

impl FromStr for PeriodicalExpression {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = s.trim();
        let normalized = source
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        if normalized.is_empty() {
            return Err(JobError::invalid_expression(s, "expression is empty"));
        }

        let period = match normalized.as_str() {
            "first day of next month" => Period::FirstDayOfNextMonth,
            "midnight" | "tomorrow" => Period::Midnight,
            "hourly" => Period::Fixed(TimeDelta::hours(1)),
            "daily" => Period::Fixed(TimeDelta::days(1)),
            "weekly" => Period::Fixed(TimeDelta::weeks(1)),
            "monthly" => Period::Months(1),
            "yearly" | "annually" => Period::Months(12),
            other => parse_interval(source, other)?,
        };

        Ok(Self {
            source: source.to_string(),
            period,
        })
    }
}

impl fmt::Display for PeriodicalExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_interval(source: &str, normalized: &str) -> Result<Period, JobError> {
    let captures = INTERVAL_PATTERN
        .captures(normalized)
        .ok_or_else(|| JobError::invalid_expression(source, "unrecognized interval"))?;

    let count: u32 = match captures.get(1) {
        Some(count) => count
            .as_str()
            .parse()
            .map_err(|_| JobError::invalid_expression(source, "interval count is too large"))?,
        None => 1,
    };
    if count == 0 {
        return Err(JobError::invalid_expression(
            source,
            "interval must be greater than zero",
        ));
    }

    let unit_seconds: i64 = match &captures[2] {
        "second" => 1,
        "minute" => 60,
        "hour" => 3_600,
        "day" => 86_400,
        "week" => 604_800,
        "month" => return Ok(Period::Months(count)),
        "year" => {
            return count
                .checked_mul(12)
                .map(Period::Months)
                .ok_or_else(|| JobError::invalid_expression(source, "interval is too large"));
        }
        _ => unreachable!("unit alternatives are fixed by the pattern"),
    };

    i64::from(count)
        .checked_mul(unit_seconds)
        .and_then(TimeDelta::try_seconds)
        .map(Period::Fixed)
        .ok_or_else(|| JobError::invalid_expression(source, "interval is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn parse(expr: &str) -> PeriodicalExpression {
        expr.parse().unwrap()
    }

    #[test]
    fn test_every_n_units() {
        assert_eq!(parse("every 5 minutes").period(), Period::Fixed(TimeDelta::minutes(5)));
        assert_eq!(parse("Every  Hour").period(), Period::Fixed(TimeDelta::hours(1)));
        assert_eq!(parse("30 seconds").period(), Period::Fixed(TimeDelta::seconds(30)));
        assert_eq!(parse("every 2 weeks").period(), Period::Fixed(TimeDelta::weeks(2)));
        assert_eq!(parse("every 3 months").period(), Period::Months(3));
        assert_eq!(parse("every year").period(), Period::Months(12));
        assert_eq!(parse("daily").period(), Period::Fixed(TimeDelta::days(1)));
    }

    #[test]
    fn test_source_is_preserved() {
        assert_eq!(parse("  every 5 minutes ").as_str(), "every 5 minutes");
    }

    #[test]
    fn test_fixed_next_after() {
        let expr = parse("every 5 minutes");
        assert_eq!(expr.next_after(at(2024, 1, 1, 10, 0)).unwrap(), at(2024, 1, 1, 10, 5));
    }

    #[test]
    fn test_months_use_calendar_arithmetic() {
        let expr = parse("every month");
        // Clamped to the last day of February
        assert_eq!(
            expr.next_after(at(2024, 1, 31, 8, 0)).unwrap(),
            at(2024, 2, 29, 8, 0)
        );
    }

    #[test]
    fn test_first_day_of_next_month() {
        let expr = parse("first day of next month");
        assert_eq!(expr.next_after(at(2024, 1, 15, 10, 30)).unwrap(), at(2024, 2, 1, 0, 0));
        assert_eq!(expr.next_after(at(2024, 12, 1, 0, 0)).unwrap(), at(2025, 1, 1, 0, 0));
        assert_eq!(expr.next_after(at(2024, 2, 1, 0, 0)).unwrap(), at(2024, 3, 1, 0, 0));
    }

    #[test]
    fn test_midnight() {
        let expr = parse("midnight");
        assert_eq!(expr.next_after(at(2024, 1, 1, 0, 0)).unwrap(), at(2024, 1, 2, 0, 0));
        assert_eq!(expr.next_after(at(2024, 1, 1, 23, 59)).unwrap(), at(2024, 1, 2, 0, 0));
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        for expr in ["", "every", "every 0 minutes", "every -1 hours", "sometimes", "5 fortnights"] {
            assert!(
                matches!(
                    expr.parse::<PeriodicalExpression>(),
                    Err(JobError::InvalidExpression { .. })
                ),
                "expected '{}' to be rejected",
                expr
            );
        }
    }

    #[test]
    fn test_rejects_overflowing_interval() {
        assert!("every 4294967295 years".parse::<PeriodicalExpression>().is_err());
    }

    #[test]
    fn test_fixed_overflow_yields_none() {
        let expr = parse("every 4000000 weeks");
        assert!(expr.next_after(DateTime::<Utc>::MAX_UTC).is_none());
    }
}
