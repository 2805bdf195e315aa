use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::warn;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Offset from UTC, in minutes, used for the clock prefix on user
    /// messages. The daemon itself keeps timestamps in UTC.
    #[serde(default)]
    pub timezone_offset_minutes: i32,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    /// The external CLI invoked for every run.
    #[serde(default = "default_runner_command")]
    pub command: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: default_runner_command(),
        }
    }
}

fn default_runner_command() -> String {
    "claude".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelsConfig {
    #[serde(default)]
    pub primary: ModelConfig,
    #[serde(default)]
    pub fallback: ModelConfig,
}

/// One model/credential pair. Empty fields mean "use the CLI's own default".
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModelConfig {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api: String,
}

impl ModelConfig {
    /// True when the entry carries anything at all.
    pub fn is_configured(&self) -> bool {
        !self.model.trim().is_empty() || !self.api.trim().is_empty()
    }

    /// Model names compare case-insensitively; credentials compare exactly.
    pub fn same_as(&self, other: &ModelConfig) -> bool {
        self.model.trim().eq_ignore_ascii_case(other.model.trim())
            && self.api.trim() == other.api.trim()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub level: SecurityLevel,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    Locked,
    Strict,
    #[default]
    Moderate,
    Unrestricted,
}

/// Unknown levels downgrade to `moderate` instead of failing the whole
/// config load; a partially-migrated config file must not brick the daemon.
impl<'de> Deserialize<'de> for SecurityLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.to_ascii_lowercase().as_str() {
            "locked" => SecurityLevel::Locked,
            "strict" => SecurityLevel::Strict,
            "moderate" => SecurityLevel::Moderate,
            "unrestricted" => SecurityLevel::Unrestricted,
            other => {
                warn!(level = %other, "Unknown security level, falling back to moderate");
                SecurityLevel::Moderate
            }
        })
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SecurityLevel::Locked => "locked",
            SecurityLevel::Strict => "strict",
            SecurityLevel::Moderate => "moderate",
            SecurityLevel::Unrestricted => "unrestricted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BrowserConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_minutes: u64,
    /// Prompt sent on each heartbeat. Empty means the bundled template.
    #[serde(default)]
    pub prompt: String,
    /// Windows during which heartbeat fires are suppressed.
    #[serde(default)]
    pub quiet_hours: Vec<QuietWindow>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_heartbeat_interval(),
            prompt: String::new(),
            quiet_hours: Vec::new(),
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    15
}

/// A day-of-week + time-of-day exclusion window, e.g. nightly 22:00–07:00.
/// `days` are lowercase three-letter names; empty means every day. An `end`
/// at or before `start` wraps past midnight.
#[derive(Debug, Deserialize, Clone)]
pub struct QuietWindow {
    #[serde(default)]
    pub days: Vec<String>,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentsConfig {
    #[serde(default = "default_agent_id")]
    pub default: String,
    #[serde(default)]
    pub list: Vec<AgentConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            default: default_agent_id(),
            list: Vec::new(),
        }
    }
}

fn default_agent_id() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Inline persona text, or a path to a prompt file. Replaces the
    /// workspace AGENTS.md when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Workspace directory override.
    #[serde(default)]
    pub workspace: Option<String>,
}

impl Settings {
    /// Load settings from a TOML file. A missing file yields defaults (the
    /// daemon runs with everything off); a malformed file is fatal.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
        Ok(settings)
    }

    /// Look up a configured agent by id. `main` exists even when absent from
    /// the list; `None` means "unconfigured", not "unknown" — path
    /// resolution still works for any id.
    pub fn agent(&self, agent_id: &str) -> Option<&AgentConfig> {
        self.agents.list.iter().find(|a| a.id == agent_id)
    }

    /// All known agent ids: `main` first, then the configured list.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids = vec!["main".to_string()];
        for agent in &self.agents.list {
            if agent.id != "main" {
                ids.push(agent.id.clone());
            }
        }
        ids
    }

    /// True if the id names `main` or a configured agent.
    pub fn is_known_agent(&self, agent_id: &str) -> bool {
        agent_id == "main" || self.agents.list.iter().any(|a| a.id == agent_id)
    }
}
