//! The heartbeat timer.
//!
//! A single periodic self-initiated invocation, independent of the job
//! evaluator: one fire immediately at startup, then one per configured
//! interval. Quiet-hours windows suppress the invocation at fire time —
//! the timer keeps ticking so the schedule stays aligned and the next fire
//! is still recorded for the status display.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, Timelike, Utc, Weekday};
use tracing::{error, info, warn};

use crate::config::{HeartbeatConfig, QuietWindow};
use crate::runner::{ResultNotifier, Runner, DEFAULT_HEARTBEAT_PROMPT};
use crate::state::StatusFile;

pub struct HeartbeatTimer {
    runner: Arc<Runner>,
    config: HeartbeatConfig,
    status: Arc<StatusFile>,
    notifier: Option<ResultNotifier>,
}

impl HeartbeatTimer {
    pub fn new(
        runner: Arc<Runner>,
        config: HeartbeatConfig,
        status: Arc<StatusFile>,
        notifier: Option<ResultNotifier>,
    ) -> Self {
        Self {
            runner,
            config,
            status,
            notifier,
        }
    }

    pub fn spawn(self) {
        if !self.config.enabled {
            info!("Heartbeat disabled");
            return;
        }

        let interval = Duration::from_secs(self.config.interval_minutes.max(1) * 60);
        info!(
            interval_minutes = self.config.interval_minutes,
            "Heartbeat enabled"
        );

        tokio::spawn(async move {
            loop {
                self.fire().await;
                let next = Utc::now()
                    + ChronoDuration::from_std(interval).unwrap_or(ChronoDuration::zero());
                self.status.set_heartbeat(Some(next)).await;
                tokio::time::sleep(interval).await;
            }
        });
    }

    async fn fire(&self) {
        let now = Local::now();
        if let Some(window) = matching_quiet_window(&self.config.quiet_hours, &now) {
            info!(
                start = %window.start,
                end = %window.end,
                "Heartbeat suppressed by quiet hours"
            );
            return;
        }

        let prompt = if self.config.prompt.trim().is_empty() {
            DEFAULT_HEARTBEAT_PROMPT.trim()
        } else {
            self.config.prompt.trim()
        };

        match self.runner.run("heartbeat", prompt, None).await {
            Ok(result) => {
                if result.exit_code != 0 {
                    warn!(exit_code = result.exit_code, "Heartbeat finished with error");
                }
                if let Some(notify) = &self.notifier {
                    notify("heartbeat", &result);
                }
            }
            Err(e) => error!("Heartbeat failed: {}", e),
        }
    }
}

/// The first quiet window containing `now`, if any. For windows that wrap
/// past midnight the day filter applies to the day the window started.
fn matching_quiet_window<'a>(
    windows: &'a [QuietWindow],
    now: &DateTime<Local>,
) -> Option<&'a QuietWindow> {
    let minute_of_day = now.hour() * 60 + now.minute();
    windows.iter().find(|w| {
        let (Some(start), Some(end)) = (parse_minutes(&w.start), parse_minutes(&w.end)) else {
            warn!(start = %w.start, end = %w.end, "Ignoring unparseable quiet window");
            return false;
        };
        if start < end {
            day_matches(&w.days, now.weekday()) && minute_of_day >= start && minute_of_day < end
        } else {
            // Overnight wrap: 22:00–07:00 covers late evening of the listed
            // day and the following early morning.
            (day_matches(&w.days, now.weekday()) && minute_of_day >= start)
                || (day_matches(&w.days, now.weekday().pred()) && minute_of_day < end)
        }
    })
}

/// "HH:MM" → minutes since midnight.
fn parse_minutes(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// An empty day list means every day.
fn day_matches(days: &[String], weekday: Weekday) -> bool {
    if days.is_empty() {
        return true;
    }
    let short = match weekday {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    };
    days.iter().any(|d| d.trim().eq_ignore_ascii_case(short))
}
