//! Small string helpers shared across the codebase.

/// First `max_chars` characters of `s`, with no suffix. UTF-8 safe: counts
/// characters, not bytes, so multi-byte input never panics.
pub fn prefix_chars(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        // Bytes <= max_chars implies chars <= max_chars.
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

/// Truncates a string to at most `max_chars` characters, adding "..." when
/// anything was cut. UTF-8 safe.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        return s.to_string();
    }
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }
    if max_chars <= 3 {
        return ".".repeat(max_chars);
    }
    let truncated: String = s.chars().take(max_chars - 3).collect();
    format!("{}...", truncated)
}
