//! `KEY=VALUE` env file codec.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{VaultError, VaultResult};

static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-zA-Z_][a-zA-Z0-9_]*)\s*=\s*(.*)$").expect("valid"));

/// Parse an env file. Blank lines and `#` comments are skipped; values are
/// trimmed and stripped of surrounding single quotes.
pub fn parse_env(data: &str) -> VaultResult<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for line in data.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let caps = LINE_RE
            .captures(trimmed)
            .ok_or_else(|| VaultError::InvalidLine(line.to_string()))?;
        let value = caps[2].trim().trim_matches('\'').trim();
        env.insert(caps[1].to_string(), value.to_string());
    }
    Ok(env)
}

/// Render env as sorted `KEY=VALUE` lines.
pub fn render_env(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n")
}
