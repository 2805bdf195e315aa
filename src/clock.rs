//! Wall-clock context for user messages.
//!
//! The external process has no implicit notion of time between turns, so
//! user-facing runs get a one-line date/time prefix computed from the
//! configured timezone offset.

use chrono::{DateTime, FixedOffset, Offset, Utc};

/// Build the clock prefix line for a prompt. `offset_minutes` is the user's
/// offset from UTC; out-of-range values fall back to UTC.
pub fn clock_prompt_prefix(now: DateTime<Utc>, offset_minutes: i32) -> String {
    let offset: FixedOffset = FixedOffset::east_opt(offset_minutes.saturating_mul(60))
        .unwrap_or_else(|| Utc.fix());
    let local = now.with_timezone(&offset);
    format!(
        "Current date and time: {}",
        local.format("%a %Y-%m-%d %H:%M (UTC%:z)")
    )
}
