//! Glob-style pattern matching shared by trigger path filters, ref
//! conditions, and artifact name lookups.
//!
//! Supported forms: exact match, `*` (within one path segment), a single
//! embedded `*`, `prefix/*`, `prefix/**`, `**/suffix`, and the bare
//! wildcards `*` / `**`.

/// Check whether `text` matches a glob `pattern`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text == prefix || text.starts_with(&format!("{}/", prefix));
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{}/", prefix);
        if text.starts_with(&prefix_slash) {
            return !text[prefix_slash.len()..].contains('/');
        }
        return false;
    }
    if let Some(suffix) = pattern.strip_prefix("**/") {
        return text == suffix || text.ends_with(&format!("/{}", suffix));
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return text.starts_with(parts[0])
                && text.ends_with(parts[1])
                && text.len() >= parts[0].len() + parts[1].len();
        }
    }
    pattern == text
}

/// Check whether any of `patterns` matches `text`.
pub fn any_match(patterns: &[String], text: &str) -> bool {
    patterns.iter().any(|p| glob_match(p, text))
}
