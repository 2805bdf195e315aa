//! The execution engine.
//!
//! Every prompt (heartbeat, scheduled job, chat transport, CLI `send`)
//! reaches the external CLI through [`Runner::run`], which serializes the
//! actual invocation through the global [`RunQueue`] and owns every
//! session-lifecycle decision: new vs. resume, rate-limit fallback, session
//! persistence, run logging, and journal upkeep.
//!
//! Provider-side failures (spawn errors, non-zero exits, usage limits,
//! unparseable new-session output) are surfaced through the returned
//! [`RunResult`], never as `Err`. The engine returns `Err` only for local
//! programmer/environment errors such as an unwritable data directory.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config::{AgentConfig, BrowserConfig, ModelConfig, SecurityConfig, SecurityLevel, Settings};
use crate::memory;
use crate::paths::{AgentPaths, Paths};
use crate::queue::RunQueue;
use crate::sessions::SessionStore;
use crate::utils::prefix_chars;
use crate::{clock, mcp};

/// Outcome of one run, as seen by callers. Never persisted beyond the
/// per-run log file and the journal excerpt.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Hook through which chat transports receive the results of self-initiated
/// runs (heartbeat fires, scheduled jobs). Called with the run's name.
pub type ResultNotifier = Arc<dyn Fn(&str, &RunResult) + Send + Sync>;

/// Provider output that means "you have used up your quota". Matched
/// case-insensitively against trimmed stdout, then stderr.
static RATE_LIMIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)you(?:'|’)ve hit your limit").expect("static pattern compiles"));

const ENGINE_IDENTITY: &str = "You are running inside valetd.";
const BOOTSTRAP_GREETING: &str = "Wakeup, my friend!";

const MEMORY_RECALL_PROMPT: &str = "## Memory Recall\n\
    Before answering anything about prior work, decisions, preferences, or todos: \
    run memory_search with a relevant query, then use memory_get to pull only the needed lines. \
    Citations: include Source: <path#line> when it helps verify memory snippets.";

const DEFAULT_IDENTITY: &str = include_str!("../prompts/IDENTITY.md");
const DEFAULT_SOUL: &str = include_str!("../prompts/SOUL.md");
const DEFAULT_USER: &str = include_str!("../prompts/USER.md");
const DEFAULT_OVERRIDE: &str = include_str!("../prompts/OVERRIDE.md");
pub const DEFAULT_HEARTBEAT_PROMPT: &str = include_str!("../prompts/HEARTBEAT.md");

/// Every tool exposed by the Playwright MCP server, merged into the
/// allow-list when browser automation is enabled.
const PLAYWRIGHT_TOOLS: &[&str] = &[
    "browser_click",
    "browser_close",
    "browser_console_messages",
    "browser_drag",
    "browser_evaluate",
    "browser_file_upload",
    "browser_fill_form",
    "browser_generate_locator",
    "browser_handle_dialog",
    "browser_hover",
    "browser_install",
    "browser_mouse_click_xy",
    "browser_mouse_down",
    "browser_mouse_drag_xy",
    "browser_mouse_move_xy",
    "browser_mouse_up",
    "browser_mouse_wheel",
    "browser_navigate",
    "browser_navigate_back",
    "browser_network_requests",
    "browser_pdf_save",
    "browser_press_key",
    "browser_resize",
    "browser_run_code",
    "browser_select_option",
    "browser_snapshot",
    "browser_tabs",
    "browser_take_screenshot",
    "browser_type",
    "browser_verify_element_visible",
    "browser_verify_list_visible",
    "browser_verify_text_visible",
    "browser_verify_value",
    "browser_wait_for",
];

pub struct Runner {
    settings: Arc<Settings>,
    paths: Paths,
    sessions: Arc<SessionStore>,
    queue: RunQueue,
}

struct Exec {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// Structured stdout of a new-session invocation.
#[derive(Deserialize)]
struct NewSessionOutput {
    session_id: String,
    result: Option<String>,
}

impl Runner {
    pub fn new(settings: Arc<Settings>, paths: Paths, sessions: Arc<SessionStore>) -> Self {
        Self {
            settings,
            paths,
            sessions,
            queue: RunQueue::new(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Resolve the effective agent for a request: explicit id, else the
    /// configured default, else `main`.
    pub fn resolve_agent_id(&self, explicit: Option<&str>) -> String {
        if let Some(id) = explicit {
            return id.to_string();
        }
        let default = self.settings.agents.default.trim();
        if default.is_empty() {
            "main".to_string()
        } else {
            default.to_string()
        }
    }

    fn agent_paths(&self, agent_id: &str) -> AgentPaths {
        let workspace = self
            .settings
            .agent(agent_id)
            .and_then(|a| a.workspace.as_deref());
        self.paths.agent(agent_id, workspace)
    }

    /// Run a prompt through the global queue. Settles with the run's own
    /// outcome once every earlier submission has fully settled.
    pub async fn run(
        self: &Arc<Self>,
        name: &str,
        prompt: &str,
        agent_id: Option<&str>,
    ) -> anyhow::Result<RunResult> {
        let agent_id = self.resolve_agent_id(agent_id);
        let runner = Arc::clone(self);
        let name = name.to_string();
        let prompt = prompt.to_string();
        self.queue
            .enqueue(async move { runner.execute(&name, &prompt, &agent_id).await })
            .await?
    }

    /// Like [`run`], but prefixes the prompt with a current date/time line —
    /// the external process has no notion of wall-clock time between turns.
    ///
    /// [`run`]: Runner::run
    pub async fn run_user_message(
        self: &Arc<Self>,
        name: &str,
        prompt: &str,
        agent_id: Option<&str>,
    ) -> anyhow::Result<RunResult> {
        let prefix =
            clock::clock_prompt_prefix(Utc::now(), self.settings.timezone_offset_minutes);
        let prompt = format!("{}\n{}", prefix, prompt);
        self.run(name, &prompt, agent_id).await
    }

    /// Force session creation ahead of the first real message. Uses the
    /// agent's BOOTUP.md checklist when present, a fixed greeting otherwise.
    /// No-op if a session already exists.
    pub async fn bootstrap(self: &Arc<Self>, agent_id: Option<&str>) -> anyhow::Result<()> {
        let agent_id = self.resolve_agent_id(agent_id);
        if self.sessions.get(&agent_id).await.is_some() {
            return Ok(());
        }

        info!(agent = %agent_id, "Bootstrapping new session");
        let agent_paths = self.agent_paths(&agent_id);
        let prompt = match tokio::fs::read_to_string(&agent_paths.bootup_md).await {
            Ok(content) if !content.trim().is_empty() => content.trim().to_string(),
            _ => BOOTSTRAP_GREETING.to_string(),
        };
        self.run("bootstrap", &prompt, Some(&agent_id)).await?;
        info!(agent = %agent_id, "Bootstrap complete; session is live");
        Ok(())
    }

    /// One full invocation. Runs inside the queue worker; never call it
    /// directly from transport code.
    async fn execute(&self, name: &str, prompt: &str, agent_id: &str) -> anyhow::Result<RunResult> {
        tokio::fs::create_dir_all(self.paths.logs_dir()).await?;

        let agent_cfg = self.settings.agent(agent_id);
        let agent_paths = self.agent_paths(agent_id);
        let existing = self.sessions.get(agent_id).await;
        let is_new = existing.is_none();
        let mode = if is_new { "new" } else { "resumed" };

        let security = &self.settings.security;
        match &existing {
            Some(session) => info!(
                name = %name,
                agent = %agent_id,
                session = %prefix_chars(&session.session_id, 8),
                security = %security.level,
                "Running (resume)"
            ),
            None => info!(
                name = %name,
                agent = %agent_id,
                security = %security.level,
                "Running (new session)"
            ),
        }

        // New sessions use structured output so the issued session id can be
        // captured; resumes use plain text.
        let output_format = if is_new { "json" } else { "text" };
        let mut args: Vec<String> = vec![
            "-p".into(),
            prompt.to_string(),
            "--output-format".into(),
            output_format.into(),
        ];
        args.extend(build_security_args(security, &self.settings.browser));

        if let Some(session) = &existing {
            args.push("--resume".into());
            args.push(session.session_id.clone());
        }

        if let Some(mcp_config) = mcp::resolve_mcp_config(&self.paths, &agent_paths).await {
            args.push("--mcp-config".into());
            args.push(mcp_config.display().to_string());
        }

        // Passed on EVERY invocation, not just new sessions: the appended
        // system prompt does not persist across --resume.
        let project_dir = std::env::current_dir()?;
        let append = self
            .build_system_append(agent_cfg, &agent_paths, security.level, &project_dir)
            .await;
        args.push("--append-system-prompt".into());
        args.push(append);

        let primary = &self.settings.models.primary;
        let fallback = &self.settings.models.fallback;

        let mut exec = self.run_once(&args, primary).await;
        let mut used_fallback = false;
        if extract_rate_limit_message(&exec.stdout, &exec.stderr).is_some()
            && fallback.is_configured()
            && !primary.same_as(fallback)
        {
            warn!(
                fallback = %fallback.model,
                "Usage limit reached; retrying with fallback"
            );
            exec = self.run_once(&args, fallback).await;
            used_fallback = true;
        }

        let raw_stdout = exec.stdout;
        let stderr = exec.stderr;
        let exit_code = exec.exit_code;
        let mut stdout = raw_stdout.clone();
        let mut session_label = existing
            .map(|s| s.session_id)
            .unwrap_or_else(|| "unknown".to_string());

        // Surface the provider's own message verbatim so transports can show
        // it to the end user as-is.
        let rate_limit = extract_rate_limit_message(&raw_stdout, &stderr);
        if let Some(message) = &rate_limit {
            stdout = message.clone();
        }

        if rate_limit.is_none() && is_new && exit_code == 0 {
            match serde_json::from_str::<NewSessionOutput>(&raw_stdout) {
                Ok(parsed) => {
                    self.sessions.create(&parsed.session_id, agent_id).await?;
                    session_label = parsed.session_id;
                    stdout = parsed.result.unwrap_or_default();
                }
                Err(e) => {
                    // The run still succeeds from the caller's point of view,
                    // but no session was persisted: the next run will attempt
                    // new-session mode again.
                    error!(
                        name = %name,
                        "Failed to parse session from {} output: {}",
                        self.settings.runner.command,
                        e
                    );
                }
            }
        }

        let result = RunResult {
            stdout,
            stderr,
            exit_code,
        };

        self.write_run_log(name, prompt, &session_label, mode, used_fallback, &result)
            .await;

        if !result.stdout.trim().is_empty() {
            memory::append_journal_entry(&agent_paths, name, &prefix_chars(&result.stdout, 500))
                .await;
        }
        memory::compact_memory_if_needed(&agent_paths).await;

        Ok(result)
    }

    /// Spawn the external CLI once with the given model/credential config.
    /// Spawn failures become a synthetic non-zero exit, not an error.
    async fn run_once(&self, args: &[String], model: &ModelConfig) -> Exec {
        let command = &self.settings.runner.command;
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);

        let model_name = model.model.trim();
        let is_glm = model_name.eq_ignore_ascii_case("glm");
        if !model_name.is_empty() && !is_glm {
            cmd.arg("--model").arg(model_name);
        }

        // A nested CLAUDECODE marker makes child processes think they are
        // running inside another agent session.
        cmd.env_remove("CLAUDECODE");
        if !model.api.trim().is_empty() {
            cmd.env("ANTHROPIC_AUTH_TOKEN", model.api.trim());
        }
        if is_glm {
            cmd.env("ANTHROPIC_BASE_URL", "https://api.z.ai/api/anthropic");
            cmd.env("API_TIMEOUT_MS", "3000000");
        }
        cmd.stdin(Stdio::null());

        match cmd.output().await {
            Ok(output) => Exec {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(1),
            },
            Err(e) => Exec {
                stdout: String::new(),
                stderr: format!("Failed to execute {}: {}", command, e),
                exit_code: 1,
            },
        }
    }

    /// Assemble the `--append-system-prompt` block: engine identity, prompt
    /// files (workspace copies falling back to bundled templates), memory
    /// recall hint, project instructions, and the directory scope.
    async fn build_system_append(
        &self,
        agent_cfg: Option<&AgentConfig>,
        agent_paths: &AgentPaths,
        level: SecurityLevel,
        project_dir: &Path,
    ) -> String {
        let mut parts: Vec<String> = vec![ENGINE_IDENTITY.to_string()];

        // Persona: a configured system_prompt (inline or file path) replaces
        // the workspace AGENTS.md.
        let persona = match agent_cfg.and_then(|a| a.system_prompt.as_deref()) {
            Some(configured) => {
                let path = Path::new(configured);
                if path.is_file() {
                    match tokio::fs::read_to_string(path).await {
                        Ok(content) => Some(content),
                        Err(e) => {
                            warn!("Failed to read system prompt file {}: {}", configured, e);
                            None
                        }
                    }
                } else {
                    Some(configured.to_string())
                }
            }
            None => prompt_part(&agent_paths.agents_md, DEFAULT_IDENTITY).await,
        };
        if let Some(persona) = persona {
            push_nonempty(&mut parts, &persona);
        }

        if let Some(soul) = prompt_part(&agent_paths.soul_md, DEFAULT_SOUL).await {
            push_nonempty(&mut parts, &soul);
        }
        if let Some(user) = prompt_part(&agent_paths.user_md, DEFAULT_USER).await {
            push_nonempty(&mut parts, &user);
        }
        if let Some(identity) = prompt_part(&agent_paths.identity_md, DEFAULT_OVERRIDE).await {
            push_nonempty(&mut parts, &identity);
        }

        // Memory is recalled through tools, never pre-loaded wholesale; the
        // hint is only useful when a memory file actually exists.
        if agent_paths.memory_md.exists() {
            parts.push(MEMORY_RECALL_PROMPT.to_string());
        }

        let project_instructions = project_dir.join("CLAUDE.md");
        if project_instructions.is_file() {
            match tokio::fs::read_to_string(&project_instructions).await {
                Ok(content) => push_nonempty(&mut parts, &content),
                Err(e) => warn!("Failed to read project CLAUDE.md: {}", e),
            }
        }

        if level != SecurityLevel::Unrestricted {
            parts.push(dir_scope_prompt(project_dir));
        }

        parts.join("\n\n")
    }

    async fn write_run_log(
        &self,
        name: &str,
        prompt: &str,
        session_label: &str,
        mode: &str,
        used_fallback: bool,
        result: &RunResult,
    ) {
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
        let log_file = self
            .paths
            .logs_dir()
            .join(format!("{}-{}.log", name, timestamp));

        let mut lines = vec![
            format!("# {}", name),
            format!("Date: {}", Utc::now().to_rfc3339()),
            format!("Session: {} ({})", session_label, mode),
            format!(
                "Model config: {}",
                if used_fallback { "fallback" } else { "primary" }
            ),
            format!("Prompt: {}", prompt),
            format!("Exit code: {}", result.exit_code),
            String::new(),
            "## Output".to_string(),
            result.stdout.clone(),
        ];
        if !result.stderr.is_empty() {
            lines.push("## Stderr".to_string());
            lines.push(result.stderr.clone());
        }

        match tokio::fs::write(&log_file, lines.join("\n")).await {
            Ok(()) => info!(name = %name, log = %log_file.display(), "Done"),
            Err(e) => warn!(name = %name, "Failed to write run log: {}", e),
        }
    }
}

/// Read a workspace prompt file, falling back to the bundled template.
/// Returns None when both are effectively empty.
async fn prompt_part(workspace_file: &Path, fallback: &str) -> Option<String> {
    match tokio::fs::read_to_string(workspace_file).await {
        Ok(content) if !content.trim().is_empty() => Some(content),
        _ => {
            if fallback.trim().is_empty() {
                None
            } else {
                Some(fallback.to_string())
            }
        }
    }
}

fn push_nonempty(parts: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
}

fn dir_scope_prompt(project_dir: &Path) -> String {
    [
        format!(
            "CRITICAL SECURITY CONSTRAINT: You are scoped to the project directory: {}",
            project_dir.display()
        ),
        "You MUST NOT read, write, edit, or delete any file outside this directory.".to_string(),
        "You MUST NOT run bash commands that modify anything outside this directory \
         (no cd /, no /etc, no ~/, no ../.. escapes)."
            .to_string(),
        "If a request requires accessing files outside the project, refuse and explain why."
            .to_string(),
    ]
    .join("\n")
}

/// Tool-scoping flags for the configured security level, merged with the
/// user's allow/deny lists.
pub(crate) fn build_security_args(
    security: &SecurityConfig,
    browser: &BrowserConfig,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["--dangerously-skip-permissions".to_string()];

    match security.level {
        SecurityLevel::Locked => {
            args.push("--tools".into());
            args.push("Read,Grep,Glob".into());
        }
        SecurityLevel::Strict => {
            args.push("--disallowedTools".into());
            args.push("Bash,WebSearch,WebFetch".into());
        }
        // Moderate scopes through the system prompt; unrestricted adds
        // nothing at all.
        SecurityLevel::Moderate | SecurityLevel::Unrestricted => {}
    }

    let mut allowed = security.allowed_tools.clone();
    if browser.enabled && security.level != SecurityLevel::Unrestricted {
        allowed.extend(PLAYWRIGHT_TOOLS.iter().map(|s| s.to_string()));
    }
    if !allowed.is_empty() {
        args.push("--allowedTools".into());
        args.push(allowed.join(","));
    }
    if !security.disallowed_tools.is_empty() {
        args.push("--disallowedTools".into());
        args.push(security.disallowed_tools.join(","));
    }

    args
}

/// The trimmed text that matched the rate-limit pattern, stdout first.
fn extract_rate_limit_message(stdout: &str, stderr: &str) -> Option<String> {
    for text in [stdout, stderr] {
        let trimmed = text.trim();
        if !trimmed.is_empty() && RATE_LIMIT_PATTERN.is_match(trimmed) {
            return Some(trimmed.to_string());
        }
    }
    None
}
