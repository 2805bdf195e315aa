//! CLI subcommands other than `start`: thin glue over the engine and the
//! session store.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::daemon;
use crate::paths::Paths;
use crate::runner::Runner;
use crate::sessions::SessionStore;
use crate::state;
use crate::utils::truncate_str;

fn build_runner(settings: Settings, paths: &Paths) -> Arc<Runner> {
    let settings = Arc::new(settings);
    let sessions = Arc::new(SessionStore::new(paths.clone(), Arc::clone(&settings)));
    Arc::new(Runner::new(settings, paths.clone(), sessions))
}

/// `valetd send <message> [--agent <id>]`: one-shot run against the shared
/// session. Prints stdout and exits with the run's exit code.
pub async fn send(settings: Settings, paths: Paths, args: &[String]) -> anyhow::Result<i32> {
    let mut agent_flag: Option<String> = None;
    let mut message_parts: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--agent" => {
                let Some(id) = args.get(i + 1).filter(|a| !a.starts_with("--")) else {
                    eprintln!("`--agent` requires an agent id.");
                    return Ok(1);
                };
                agent_flag = Some(id.clone());
                i += 1;
            }
            other => message_parts.push(other),
        }
        i += 1;
    }

    let message = message_parts.join(" ");
    if message.is_empty() {
        eprintln!("Usage: valetd send <message> [--agent <id>]");
        return Ok(1);
    }

    let agent_id = agent_flag.unwrap_or_else(|| settings.agents.default.clone());
    if !settings.is_known_agent(&agent_id) {
        eprintln!(
            "Unknown agent: \"{}\". Available: {}",
            agent_id,
            settings.agent_ids().join(", ")
        );
        return Ok(1);
    }

    let runner = build_runner(settings, &paths);
    if runner.sessions().peek(&agent_id).await.is_none() {
        eprintln!(
            "No active session for agent \"{}\". Start the daemon first.",
            agent_id
        );
        return Ok(1);
    }

    let result = runner
        .run_user_message("send", &message, Some(&agent_id))
        .await?;
    println!("{}", result.stdout);
    if result.exit_code != 0 && !result.stderr.is_empty() {
        eprintln!("{}", result.stderr);
    }
    Ok(result.exit_code)
}

/// `valetd status`: daemon liveness plus upcoming fires.
pub async fn status(settings: Settings, paths: Paths) -> anyhow::Result<i32> {
    match daemon::read_pid(&paths) {
        Some(pid) => println!("Daemon: running (pid {})", pid),
        None => println!("Daemon: not running"),
    }

    if let Some(state) = state::read_state(&paths) {
        if let Some(heartbeat) = state.heartbeat {
            println!("Heartbeat: next {}", format_countdown(heartbeat.next_at));
        }
        for job in state.jobs {
            println!("Job {}: next {}", job.name, format_countdown(job.next_at));
        }
    }

    let sessions = Arc::new(SessionStore::new(paths.clone(), Arc::new(settings.clone())));
    println!("\nAgents:");
    for id in settings.agent_ids() {
        match sessions.peek(&id).await {
            Some(session) => println!(
                "  {}: session {} (last used {})",
                id,
                session.session_id,
                session.last_used_at.to_rfc3339()
            ),
            None => println!("  {}: no session", id),
        }
    }
    Ok(0)
}

/// `valetd agents <list|show|reset|backup>`: agent roster management.
pub async fn agents(settings: Settings, paths: Paths, args: &[String]) -> anyhow::Result<i32> {
    const USAGE: &str = "Usage: valetd agents <subcommand>\n\n\
        Subcommands:\n  \
        list              List all configured agents\n  \
        show <id>         Show config and workspace paths for an agent\n  \
        reset <id>        Clear the session for an agent\n  \
        backup <id>       Move the session aside and start fresh\n";

    let Some(sub) = args.first().map(|s| s.as_str()) else {
        println!("{}", USAGE);
        return Ok(0);
    };

    let sessions = Arc::new(SessionStore::new(
        paths.clone(),
        Arc::new(settings.clone()),
    ));

    let require_known = |id: &str| -> bool {
        if settings.is_known_agent(id) {
            true
        } else {
            eprintln!(
                "Unknown agent: \"{}\". Available: {}",
                id,
                settings.agent_ids().join(", ")
            );
            false
        }
    };

    match sub {
        "list" => {
            println!("Configured agents (default: {}):\n", settings.agents.default);
            for id in settings.agent_ids() {
                let agent = settings.agent(&id);
                let workspace = agent.and_then(|a| a.workspace.as_deref());
                let agent_paths = paths.agent(&id, workspace);
                let label = agent
                    .and_then(|a| a.name.as_deref())
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default();
                let tag = if id == settings.agents.default {
                    " [default]"
                } else {
                    ""
                };
                println!("  {}{}{}", id, label, tag);
                println!("    workspace: {}", agent_paths.workspace_dir.display());
            }
            Ok(0)
        }
        "show" => {
            let Some(id) = args.get(1) else {
                eprintln!("Usage: valetd agents show <id>");
                return Ok(1);
            };
            if !require_known(id) {
                return Ok(1);
            }
            let agent = settings.agent(id);
            let agent_paths = paths.agent(id, agent.and_then(|a| a.workspace.as_deref()));

            println!("Agent: {}", id);
            if let Some(name) = agent.and_then(|a| a.name.as_deref()) {
                println!("  name:          {}", name);
            }
            if let Some(sp) = agent.and_then(|a| a.system_prompt.as_deref()) {
                println!("  systemPrompt:  {}", truncate_str(sp, 80));
            }
            println!("\nWorkspace paths:");
            println!("  workspaceDir:    {}", agent_paths.workspace_dir.display());
            println!("  memoryMd:        {}", agent_paths.memory_md.display());
            println!("  memoryDir:       {}", agent_paths.memory_dir.display());
            println!("  jobsDir:         {}", agent_paths.jobs_dir.display());
            println!("  sessionFile:     {}", agent_paths.session_file.display());
            println!(
                "  memoryMcpConfig: {}",
                agent_paths.memory_mcp_config.display()
            );
            println!("  mcpConfig:       {}", agent_paths.mcp_config.display());

            println!("\nSession:");
            match sessions.peek(id).await {
                Some(session) => {
                    println!("  id:          {}", session.session_id);
                    println!("  createdAt:   {}", format_ts(session.created_at));
                    println!("  lastUsedAt:  {}", format_ts(session.last_used_at));
                }
                None => println!("  (none)"),
            }
            Ok(0)
        }
        "reset" => {
            let Some(id) = args.get(1) else {
                eprintln!("Usage: valetd agents reset <id>");
                return Ok(1);
            };
            if !require_known(id) {
                return Ok(1);
            }
            sessions.reset(id).await?;
            println!("Session cleared for agent \"{}\".", id);
            Ok(0)
        }
        "backup" => {
            let Some(id) = args.get(1) else {
                eprintln!("Usage: valetd agents backup <id>");
                return Ok(1);
            };
            if !require_known(id) {
                return Ok(1);
            }
            match sessions.backup(id).await? {
                Some(file) => println!("Session for \"{}\" moved to {}.", id, file),
                None => println!("No session to back up for \"{}\".", id),
            }
            Ok(0)
        }
        "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(0)
        }
        other => {
            eprintln!("Unknown subcommand: \"{}\"\n", other);
            println!("{}", USAGE);
            Ok(1)
        }
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn format_countdown(next_at_ms: i64) -> String {
    let remaining_ms = next_at_ms - Utc::now().timestamp_millis();
    if remaining_ms <= 0 {
        return "now".to_string();
    }
    let secs = remaining_ms / 1000;
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("in {}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("in {}m", minutes)
    } else {
        "in <1m".to_string()
    }
}
