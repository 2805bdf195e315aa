//! Scheduled job definitions.
//!
//! Jobs live as Markdown files in the agent workspace's `jobs/` directory:
//! a front-matter block carrying the `schedule` field, then the prompt as
//! the body. The set is loaded once at daemon start and is immutable for
//! the life of the process; editing a job file requires a restart.
//!
//! ```text
//! ---
//! schedule: "30 8 * * 1-5"
//! ---
//! Summarize yesterday's journal and list today's follow-ups.
//! ```

use std::path::Path;

use tracing::{info, warn};

use crate::cron;

#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub schedule: String,
    pub prompt: String,
}

/// Load every `*.md` job file from `jobs_dir`. A missing directory is an
/// empty job list; malformed files are skipped with a warning so one bad
/// job cannot keep the daemon down.
pub async fn load_jobs(jobs_dir: &Path) -> Vec<Job> {
    let mut entries = match tokio::fs::read_dir(jobs_dir).await {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut jobs = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read jobs directory: {}", e);
                break;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(job = %name, "Failed to read job file: {}", e);
                continue;
            }
        };

        match parse_job(&name, &content) {
            Ok(job) => {
                info!(name = %job.name, schedule = %job.schedule, "Loaded job");
                jobs.push(job);
            }
            Err(e) => warn!(job = %name, "Skipping malformed job: {}", e),
        }
    }

    // Directory order is filesystem-dependent; keep the list stable.
    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    jobs
}

/// Parse one job file: front matter delimited by `---` lines with a
/// `schedule` field, body becomes the prompt.
fn parse_job(name: &str, content: &str) -> anyhow::Result<Job> {
    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| anyhow::anyhow!("missing front matter"))?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let (front, body) = rest
        .split_once("\n---")
        .ok_or_else(|| anyhow::anyhow!("unterminated front matter"))?;

    let mut schedule = None;
    for line in front.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() == "schedule" {
            let value = value.trim().trim_matches('"').trim_matches('\'').trim();
            if !value.is_empty() {
                schedule = Some(value.to_string());
            }
        }
    }
    let schedule = schedule.ok_or_else(|| anyhow::anyhow!("no schedule field"))?;
    cron::validate(&schedule)?;

    let body = body.strip_prefix('\n').unwrap_or(body);
    let prompt = body.trim().to_string();
    if prompt.is_empty() {
        anyhow::bail!("empty prompt body");
    }

    Ok(Job {
        name: name.to_string(),
        schedule,
        prompt,
    })
}
