//! Next-run state for the status display.
//!
//! The heartbeat timer and the job evaluator both record when they will
//! fire next; `valetd status` (and any statusline script) reads the file
//! back. Writes are best-effort whole-file rewrites; losing one is
//! harmless, the next tick rewrites it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatState>,
    #[serde(default)]
    pub jobs: Vec<JobState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatState {
    /// Unix epoch milliseconds of the next scheduled fire.
    pub next_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub name: String,
    pub next_at: i64,
}

/// Shared writer for `state.json`. One instance per daemon; the heartbeat
/// and the scheduler each update their own slice.
pub struct StatusFile {
    paths: Paths,
    data: Mutex<StateData>,
}

impl StatusFile {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            data: Mutex::new(StateData::default()),
        }
    }

    pub async fn set_heartbeat(&self, next_at: Option<DateTime<Utc>>) {
        let snapshot = {
            let mut data = self.data.lock().await;
            data.heartbeat = next_at.map(|t| HeartbeatState {
                next_at: t.timestamp_millis(),
            });
            data.clone()
        };
        self.write(&snapshot).await;
    }

    pub async fn set_jobs(&self, jobs: Vec<(String, DateTime<Utc>)>) {
        let snapshot = {
            let mut data = self.data.lock().await;
            data.jobs = jobs
                .into_iter()
                .map(|(name, next)| JobState {
                    name,
                    next_at: next.timestamp_millis(),
                })
                .collect();
            data.clone()
        };
        self.write(&snapshot).await;
    }

    async fn write(&self, data: &StateData) {
        let json = match serde_json::to_string_pretty(data) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize state: {}", e);
                return;
            }
        };
        if let Some(parent) = self.paths.state_file().parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(e) = tokio::fs::write(self.paths.state_file(), format!("{}\n", json)).await {
            warn!("Failed to write state file: {}", e);
        }
    }
}

/// Read the state file back, for `valetd status`.
pub fn read_state(paths: &Paths) -> Option<StateData> {
    let content = std::fs::read_to_string(paths.state_file()).ok()?;
    serde_json::from_str(&content).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_heartbeat_and_jobs_independently() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let status = StatusFile::new(paths.clone());

        let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        status.set_heartbeat(Some(t1)).await;
        status.set_jobs(vec![("digest".into(), t2)]).await;

        let state = read_state(&paths).unwrap();
        assert_eq!(state.heartbeat.unwrap().next_at, t1.timestamp_millis());
        assert_eq!(state.jobs.len(), 1);
        assert_eq!(state.jobs[0].name, "digest");
        assert_eq!(state.jobs[0].next_at, t2.timestamp_millis());
    }

    #[tokio::test]
    async fn clearing_heartbeat_removes_it() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let status = StatusFile::new(paths.clone());

        status
            .set_heartbeat(Some(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()))
            .await;
        status.set_heartbeat(None).await;

        let state = read_state(&paths).unwrap();
        assert!(state.heartbeat.is_none());
    }
}
