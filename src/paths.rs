//! Central path registry for valetd.
//!
//! All runtime data lives under `~/.valetd/` — a global, user-level directory
//! so configuration is portable and not tied to a project working directory.
//!
//! Directory layout:
//!
//! ```text
//! ~/.valetd/
//!   config.toml            — daemon configuration
//!   state.json             — next-run state for the status display
//!   daemon.pid             — running daemon PID
//!   browser-mcp.json       — browser tool-server MCP config (optional)
//!   workspace/             — the 'main' agent's workspace
//!     AGENTS.md            — persona / identity
//!     SOUL.md              — behavioral guidelines
//!     USER.md              — user context
//!     IDENTITY.md          — identity override
//!     BOOTUP.md            — boot checklist used by bootstrap (optional)
//!     MEMORY.md            — curated memory, auto-compacted
//!     memory/              — dated daily journal entries (YYYY-MM-DD.md)
//!     jobs/                — cron job definitions (*.md with front matter)
//!   session.json           — the 'main' agent's session handle
//!   memory-mcp.json        — the 'main' agent's memory MCP config (optional)
//!   mcp.json               — the 'main' agent's extra MCP config (optional)
//!   agents/<id>/           — isolated workspaces for other agents
//!   logs/                  — per-run execution logs
//! ```
//!
//! The `main` agent maps to the legacy top-level layout so existing installs
//! need no migration. Every other agent gets an isolated workspace under
//! `agents/<id>/` (or a configured override directory) holding all of the
//! same files, session handle included.

use std::path::{Path, PathBuf};

/// Root of the valetd data directory. Constructed once at startup and passed
/// by reference; tests point it at a temp directory.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

/// Resolved workspace paths for one agent.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub workspace_dir: PathBuf,
    pub agents_md: PathBuf,
    pub soul_md: PathBuf,
    pub user_md: PathBuf,
    pub identity_md: PathBuf,
    pub bootup_md: PathBuf,
    pub memory_md: PathBuf,
    pub memory_dir: PathBuf,
    pub jobs_dir: PathBuf,
    pub session_file: PathBuf,
    pub memory_mcp_config: PathBuf,
    pub mcp_config: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `~/.valetd` from the HOME environment variable.
    pub fn from_home() -> anyhow::Result<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| anyhow::anyhow!("HOME is not set; cannot locate ~/.valetd"))?;
        Ok(Self::new(Path::new(&home).join(".valetd")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.root.join("workspace")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.root.join("agents")
    }

    /// MCP config for the browser tool server. Global: one browser per host.
    pub fn browser_mcp_config(&self) -> PathBuf {
        self.root.join("browser-mcp.json")
    }

    /// Resolve all workspace paths for an agent. The `main` agent keeps the
    /// legacy top-level layout; everything else is isolated under
    /// `agents/<id>/` unless a custom workspace directory is configured.
    pub fn agent(&self, agent_id: &str, custom_workspace: Option<&str>) -> AgentPaths {
        if agent_id == "main" && custom_workspace.is_none() {
            let workspace = self.workspace_dir();
            return AgentPaths {
                agents_md: workspace.join("AGENTS.md"),
                soul_md: workspace.join("SOUL.md"),
                user_md: workspace.join("USER.md"),
                identity_md: workspace.join("IDENTITY.md"),
                bootup_md: workspace.join("BOOTUP.md"),
                memory_md: workspace.join("MEMORY.md"),
                memory_dir: workspace.join("memory"),
                jobs_dir: workspace.join("jobs"),
                session_file: self.root.join("session.json"),
                memory_mcp_config: self.root.join("memory-mcp.json"),
                mcp_config: self.root.join("mcp.json"),
                workspace_dir: workspace,
            };
        }

        let workspace = custom_workspace
            .map(PathBuf::from)
            .unwrap_or_else(|| self.agents_dir().join(agent_id));
        AgentPaths {
            agents_md: workspace.join("AGENTS.md"),
            soul_md: workspace.join("SOUL.md"),
            user_md: workspace.join("USER.md"),
            identity_md: workspace.join("IDENTITY.md"),
            bootup_md: workspace.join("BOOTUP.md"),
            memory_md: workspace.join("MEMORY.md"),
            memory_dir: workspace.join("memory"),
            jobs_dir: workspace.join("jobs"),
            session_file: workspace.join("session.json"),
            memory_mcp_config: workspace.join("memory-mcp.json"),
            mcp_config: workspace.join("mcp.json"),
            workspace_dir: workspace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_agent_uses_legacy_layout() {
        let paths = Paths::new("/data/.valetd");
        let agent = paths.agent("main", None);
        assert_eq!(agent.session_file, PathBuf::from("/data/.valetd/session.json"));
        assert_eq!(
            agent.memory_md,
            PathBuf::from("/data/.valetd/workspace/MEMORY.md")
        );
        assert_eq!(agent.jobs_dir, PathBuf::from("/data/.valetd/workspace/jobs"));
    }

    #[test]
    fn other_agents_are_isolated() {
        let paths = Paths::new("/data/.valetd");
        let agent = paths.agent("research", None);
        assert_eq!(
            agent.session_file,
            PathBuf::from("/data/.valetd/agents/research/session.json")
        );
        assert_eq!(
            agent.memory_mcp_config,
            PathBuf::from("/data/.valetd/agents/research/memory-mcp.json")
        );
    }

    #[test]
    fn custom_workspace_overrides_default() {
        let paths = Paths::new("/data/.valetd");
        let agent = paths.agent("work", Some("/srv/work-agent"));
        assert_eq!(agent.workspace_dir, PathBuf::from("/srv/work-agent"));
        assert_eq!(
            agent.session_file,
            PathBuf::from("/srv/work-agent/session.json")
        );
    }

    #[test]
    fn main_with_custom_workspace_is_isolated() {
        let paths = Paths::new("/data/.valetd");
        let agent = paths.agent("main", Some("/srv/main-agent"));
        assert_eq!(
            agent.session_file,
            PathBuf::from("/srv/main-agent/session.json")
        );
    }
}
