//! Cron expression matching for job schedules.
//!
//! Job files are hand-authored with conventional 5-field cron syntax
//! (minute, hour, day-of-month, month, day-of-week; `*`, values, lists,
//! ranges, steps), so parsing is delegated to croner rather than anything
//! home-grown. Matching is minute-granular: the evaluator truncates the
//! probe time to the start of the minute.

use chrono::{DateTime, TimeZone, Timelike};
use croner::Cron;

/// True iff `at`'s minute satisfies the 5-field expression.
pub fn matches<Tz: TimeZone>(expr: &str, at: &DateTime<Tz>) -> anyhow::Result<bool> {
    let cron = parse(expr)?;
    let minute = truncate_to_minute(at);
    cron.is_time_matching(&minute)
        .map_err(|e| anyhow::anyhow!("cron match failed for '{}': {}", expr, e))
}

/// The next time strictly after `from` satisfying the expression. Used for
/// status display only; croner's search is bounded even for expressions
/// that match rarely (e.g. Feb 29).
pub fn next_match<Tz: TimeZone>(expr: &str, from: &DateTime<Tz>) -> anyhow::Result<DateTime<Tz>> {
    let cron = parse(expr)?;
    cron.find_next_occurrence(from, false)
        .map_err(|e| anyhow::anyhow!("no next occurrence for '{}': {}", expr, e))
}

/// Validate an expression without evaluating it.
pub fn validate(expr: &str) -> anyhow::Result<()> {
    parse(expr).map(|_| ())
}

fn parse(expr: &str) -> anyhow::Result<Cron> {
    Cron::new(expr)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid cron expression '{}': {}", expr, e))
}

fn truncate_to_minute<Tz: TimeZone>(at: &DateTime<Tz>) -> DateTime<Tz> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or_else(|| at.clone())
}
