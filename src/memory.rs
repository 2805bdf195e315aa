//! Journal and memory upkeep.
//!
//! Two best-effort side effects run after every invocation: a truncated
//! excerpt of the output is appended to the agent's dated journal, and the
//! agent's MEMORY.md is compacted once it outgrows its character budget.
//! Neither may ever change a run's outcome; failures are logged and
//! swallowed here.

use chrono::Local;
use tracing::{info, warn};

use crate::paths::AgentPaths;

/// Character budget for MEMORY.md (~4000 tokens).
pub const MAX_MEMORY_CHARS: usize = 16_000;

const COMPACT_NOTICE: &str = "<!-- older entries removed by auto-compact -->";

/// Append a dated entry to the agent's daily journal.
pub async fn append_journal_entry(paths: &AgentPaths, name: &str, summary: &str) {
    if let Err(e) = try_append_journal_entry(paths, name, summary).await {
        warn!(name = %name, "Journal append failed: {}", e);
    }
}

async fn try_append_journal_entry(
    paths: &AgentPaths,
    name: &str,
    summary: &str,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&paths.memory_dir).await?;

    let now = Local::now();
    let date = now.format("%Y-%m-%d");
    let file = paths.memory_dir.join(format!("{}.md", date));
    let entry = format!(
        "\n## [{}] {}\n\n{}\n",
        now.format("%H:%M:%S"),
        name,
        summary.trim()
    );

    let existing = match tokio::fs::read_to_string(&file).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            format!("# Journal — {}\n", date)
        }
        Err(e) => return Err(e.into()),
    };
    tokio::fs::write(&file, existing + &entry).await?;
    Ok(())
}

/// Compact MEMORY.md once it exceeds [`MAX_MEMORY_CHARS`]: the oldest lines
/// are dropped from the top, the most recent kept verbatim, and a notice
/// line marks the cut.
pub async fn compact_memory_if_needed(paths: &AgentPaths) {
    let content = match tokio::fs::read_to_string(&paths.memory_md).await {
        Ok(content) => content,
        Err(_) => return, // no memory file, nothing to do
    };
    let total = content.chars().count();
    if total <= MAX_MEMORY_CHARS {
        return;
    }

    let trimmed = compact(&content, MAX_MEMORY_CHARS);
    match tokio::fs::write(&paths.memory_md, &trimmed).await {
        Ok(()) => info!(
            from = total,
            to = trimmed.chars().count(),
            "MEMORY.md compacted"
        ),
        Err(e) => warn!("Failed to write compacted MEMORY.md: {}", e),
    }
}

/// Keep as many trailing lines as fit within `budget`, leaving room for the
/// notice line that replaces everything dropped.
fn compact(content: &str, budget: usize) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let line_budget = budget.saturating_sub(COMPACT_NOTICE.chars().count() + 2);

    let mut kept = 0;
    let mut used = 0;
    for line in lines.iter().rev() {
        let added = line.chars().count() + 1; // +1 for the newline
        if used + added > line_budget {
            break;
        }
        used += added;
        kept += 1;
    }

    let mut out = String::with_capacity(budget);
    out.push_str(COMPACT_NOTICE);
    for line in &lines[lines.len() - kept..] {
        out.push('\n');
        out.push_str(line);
    }
    out
}
