//! Durable agent-id → session mapping.
//!
//! Each agent owns at most one resumable session, persisted as JSON in its
//! workspace. A write-through in-memory cache avoids re-reading the file on
//! every run within a daemon's lifetime. The store is constructed once at
//! startup and shared by `Arc`; no module-level state. Concurrent daemon
//! processes sharing the same files are unsupported and would race.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Settings;
use crate::paths::Paths;

/// The resumable conversation handle for one agent. Field names match the
/// on-disk JSON written by earlier installs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

pub struct SessionStore {
    paths: Paths,
    settings: Arc<Settings>,
    cache: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(paths: Paths, settings: Arc<Settings>) -> Self {
        Self {
            paths,
            settings,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn session_file(&self, agent_id: &str) -> std::path::PathBuf {
        let workspace = self
            .settings
            .agent(agent_id)
            .and_then(|a| a.workspace.as_deref());
        self.paths.agent(agent_id, workspace).session_file
    }

    /// Get the session for an agent, refreshing `lastUsedAt` and persisting
    /// the refresh. Never creates a session.
    pub async fn get(&self, agent_id: &str) -> Option<Session> {
        let mut session = {
            let cache = self.cache.read().await;
            cache.get(agent_id).cloned()
        };

        if session.is_none() {
            session = self.read_from_disk(agent_id).await;
        }

        let mut session = session?;
        session.last_used_at = Utc::now();
        self.persist(agent_id, &session).await;
        self.cache
            .write()
            .await
            .insert(agent_id.to_string(), session.clone());
        Some(session)
    }

    /// Read without touching `lastUsedAt`. Used by status/introspection.
    pub async fn peek(&self, agent_id: &str) -> Option<Session> {
        {
            let cache = self.cache.read().await;
            if let Some(session) = cache.get(agent_id) {
                return Some(session.clone());
            }
        }
        self.read_from_disk(agent_id).await
    }

    /// Record a session id issued by the external process, overwriting any
    /// existing record with fresh timestamps.
    pub async fn create(&self, session_id: &str, agent_id: &str) -> anyhow::Result<()> {
        let now = Utc::now();
        let session = Session {
            session_id: session_id.to_string(),
            created_at: now,
            last_used_at: now,
        };

        let file = self.session_file(agent_id);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&session)?;
        tokio::fs::write(&file, format!("{}\n", json)).await?;

        self.cache
            .write()
            .await
            .insert(agent_id.to_string(), session);
        info!(agent = %agent_id, session = %session_id, "Session created");
        Ok(())
    }

    /// Delete the session file and purge the cache. Idempotent.
    pub async fn reset(&self, agent_id: &str) -> anyhow::Result<()> {
        self.cache.write().await.remove(agent_id);
        match tokio::fs::remove_file(self.session_file(agent_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Rename the session file aside as `session_<n>.backup`, where n is one
    /// past the highest existing backup index in the same directory. Returns
    /// the backup file name, or None when there is nothing to back up.
    pub async fn backup(&self, agent_id: &str) -> anyhow::Result<Option<String>> {
        self.cache.write().await.remove(agent_id);

        let file = self.session_file(agent_id);
        if !file.exists() {
            return Ok(None);
        }

        let dir = file
            .parent()
            .ok_or_else(|| anyhow::anyhow!("session file has no parent directory"))?;
        let next = next_backup_index(dir).await?;
        let backup_name = format!("session_{}.backup", next);
        tokio::fs::rename(&file, dir.join(&backup_name)).await?;
        info!(agent = %agent_id, backup = %backup_name, "Session backed up");
        Ok(Some(backup_name))
    }

    async fn read_from_disk(&self, agent_id: &str) -> Option<Session> {
        let file = self.session_file(agent_id);
        let content = tokio::fs::read_to_string(&file).await.ok()?;
        match serde_json::from_str::<Session>(&content) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(agent = %agent_id, "Ignoring unreadable session file: {}", e);
                None
            }
        }
    }

    /// Best-effort write of the refreshed record; a failed refresh must not
    /// hide an otherwise valid session from the caller.
    async fn persist(&self, agent_id: &str, session: &Session) {
        let file = self.session_file(agent_id);
        let json = match serde_json::to_string_pretty(session) {
            Ok(json) => json,
            Err(e) => {
                warn!(agent = %agent_id, "Failed to serialize session: {}", e);
                return;
            }
        };
        if let Some(parent) = file.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Err(e) = tokio::fs::write(&file, format!("{}\n", json)).await {
            warn!(agent = %agent_id, "Failed to persist session refresh: {}", e);
        }
    }
}

/// 1 + the highest `session_<n>.backup` index in `dir`; 1 when none exist.
async fn next_backup_index(dir: &std::path::Path) -> anyhow::Result<u32> {
    let mut max = 0u32;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(index) = name
            .strip_prefix("session_")
            .and_then(|rest| rest.strip_suffix(".backup"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        max = max.max(index);
    }
    Ok(max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SessionStore {
        SessionStore::new(
            Paths::new(dir.path()),
            Arc::new(Settings::default()),
        )
    }

    #[tokio::test]
    async fn get_returns_none_without_session() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.get("main").await.is_none());
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.create("sess-abc", "main").await.unwrap();
        let session = store.get("main").await.unwrap();
        assert_eq!(session.session_id, "sess-abc");
        assert!(dir.path().join("session.json").exists());
    }

    #[tokio::test]
    async fn get_refreshes_last_used_but_peek_does_not() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.create("sess-abc", "main").await.unwrap();
        let created = store.peek("main").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let got = store.get("main").await.unwrap();
        assert!(got.last_used_at > created.last_used_at);

        let after = store.peek("main").await.unwrap();
        assert_eq!(after.last_used_at, got.last_used_at);
    }

    #[tokio::test]
    async fn get_survives_cache_loss() {
        let dir = TempDir::new().unwrap();
        {
            let store = store(&dir);
            store.create("sess-abc", "main").await.unwrap();
        }
        // Fresh store, cold cache — must read the file.
        let store = store(&dir);
        assert_eq!(store.get("main").await.unwrap().session_id, "sess-abc");
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.reset("main").await.unwrap();
        store.create("sess-abc", "main").await.unwrap();
        store.reset("main").await.unwrap();
        store.reset("main").await.unwrap();
        assert!(store.get("main").await.is_none());
        assert!(!dir.path().join("session.json").exists());
    }

    #[tokio::test]
    async fn backup_numbering_increments() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for expected in ["session_1.backup", "session_2.backup", "session_3.backup"] {
            store.create("sess", "main").await.unwrap();
            let name = store.backup("main").await.unwrap().unwrap();
            assert_eq!(name, expected);
        }
        // Unrelated files in the directory must not affect numbering.
        std::fs::write(dir.path().join("session_9.bak"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        store.create("sess", "main").await.unwrap();
        assert_eq!(
            store.backup("main").await.unwrap().unwrap(),
            "session_4.backup"
        );
    }

    #[tokio::test]
    async fn backup_without_session_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.backup("main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn backup_clears_cache_so_next_run_is_new_mode() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.create("sess-abc", "main").await.unwrap();
        store.backup("main").await.unwrap();
        assert!(store.get("main").await.is_none());
    }

    #[tokio::test]
    async fn agents_use_isolated_session_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.create("sess-main", "main").await.unwrap();
        store.create("sess-research", "research").await.unwrap();

        assert_eq!(store.get("main").await.unwrap().session_id, "sess-main");
        assert_eq!(
            store.get("research").await.unwrap().session_id,
            "sess-research"
        );
        assert!(dir
            .path()
            .join("agents/research/session.json")
            .exists());
    }
}
