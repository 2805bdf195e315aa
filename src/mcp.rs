//! Tool-server (MCP) config handling.
//!
//! An agent can have up to three MCP configs available: its memory server,
//! its own extra `mcp.json`, and the host-wide browser server. The external
//! CLI accepts a single `--mcp-config` argument, so when more than one is
//! present their `mcpServers` maps are merged into one combined file inside
//! the agent workspace. The config files themselves are user-provided; this
//! module only checks existence and merges.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tracing::error;

use crate::paths::{AgentPaths, Paths};

const COMBINED_FILE: &str = "mcp-combined.json";

/// Resolve the single MCP config path to attach for this run, if any.
pub async fn resolve_mcp_config(paths: &Paths, agent: &AgentPaths) -> Option<PathBuf> {
    let mut present: Vec<PathBuf> = Vec::new();
    for candidate in [
        &agent.memory_mcp_config,
        &agent.mcp_config,
        &paths.browser_mcp_config(),
    ] {
        if candidate.exists() {
            present.push(candidate.clone());
        }
    }

    match present.len() {
        0 => None,
        1 => present.pop(),
        _ => match merge_configs(&present, &agent.workspace_dir).await {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Failed to merge MCP configs: {}", e);
                // Degrade to the first config rather than dropping tools
                // entirely.
                present.into_iter().next()
            }
        },
    }
}

/// Merge the `mcpServers` objects of every source into one combined config
/// file. Later sources win on name collisions.
async fn merge_configs(sources: &[PathBuf], workspace: &Path) -> anyhow::Result<PathBuf> {
    let mut servers = Map::new();
    for source in sources {
        let content = tokio::fs::read_to_string(source).await?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid MCP config {}: {}", source.display(), e))?;
        if let Some(Value::Object(map)) = value.get("mcpServers") {
            for (name, server) in map {
                servers.insert(name.clone(), server.clone());
            }
        }
    }

    let combined = json!({ "mcpServers": servers });
    let path = workspace.join(COMBINED_FILE);
    tokio::fs::create_dir_all(workspace).await?;
    tokio::fs::write(&path, serde_json::to_string_pretty(&combined)?).await?;
    Ok(path)
}
