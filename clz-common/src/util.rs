//! Shared utilities for clusterize.

use regex::Regex;
use std::sync::LazyLock;

static SECRET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b([A-Z0-9_]*(?:TOKEN|SECRET|PASSWORD|PASS|API_KEY|PRIVATE_KEY|ACCESS_KEY|DATABASE_URL)[A-Z0-9_]*=)("[^"]*"|'[^']*'|\S+)"#,
    )
    .expect("secret assignment pattern is valid")
});

static SECRET_FLAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(--(?:token|password|api-key|secret)[ =])("[^"]*"|'[^']*'|\S+)"#)
        .expect("secret flag pattern is valid")
});

/// Mask sensitive values in a command string before logging.
///
/// Keeps the variable name or flag and replaces the value with `***`.
pub fn mask_sensitive_command(cmd: &str) -> String {
    let masked = SECRET_ASSIGNMENT.replace_all(cmd, "${1}***");
    SECRET_FLAG.replace_all(&masked, "${1}***").into_owned()
}

/// Shorten a command for log lines.
pub fn truncate_for_log(cmd: &str, max_chars: usize) -> String {
    if cmd.chars().count() <= max_chars {
        return cmd.to_string();
    }
    let mut out: String = cmd.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
