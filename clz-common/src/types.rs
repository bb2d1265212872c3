//! Common types shared by the execution engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default bound on a whole remote call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One remote endpoint.
///
/// The private key is resolved once at construction: an existing file is
/// kept as an absolute path, anything else becomes `None`, which means
/// "let ssh use the agent or its default identities".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub user: String,
    pub private_key: Option<PathBuf>,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, user: impl Into<String>, private_key: &str) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            private_key: resolve_private_key(private_key),
        }
    }

    /// Address without key material.
    pub fn unresolved(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            private_key: None,
        }
    }

    /// `user@host`, or just `host` when no user is configured.
    pub fn destination(&self) -> String {
        if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }

    /// True when both addresses authenticate the same way.
    pub fn same_credentials(&self, other: &NodeAddress) -> bool {
        self.user == other.user && self.private_key == other.private_key
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.destination())
    }
}

/// Expand `~`, absolutize and keep the path only if the file exists.
pub fn resolve_private_key(raw: &str) -> Option<PathBuf> {
    if raw.trim().is_empty() {
        return None;
    }
    let expanded = shellexpand::tilde(raw).into_owned();
    let mut path = PathBuf::from(expanded);
    if path.is_relative() {
        path = std::env::current_dir().ok()?.join(path);
    }
    if Path::new(&path).is_file() {
        Some(path)
    } else {
        None
    }
}

/// How a group contacts its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// One member at a time, in address order.
    Sequential,
    /// Every member concurrently.
    #[default]
    Parallel,
}

/// Knobs of a single `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Capture non-zero exits instead of failing.
    pub allow_failures: bool,
    /// Bound on the entire call, all members included. `None` waits for
    /// the command however long it runs.
    pub timeout: Option<Duration>,
    /// Echo captured output to the local terminal.
    pub output_visible: bool,
    /// Return once the command is launched, without waiting for it.
    pub disown: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            allow_failures: false,
            timeout: Some(DEFAULT_TIMEOUT),
            output_visible: false,
            disown: false,
        }
    }
}

impl ExecOptions {
    pub fn allow_failures(mut self) -> Self {
        self.allow_failures = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace the bound; `None` removes it.
    pub fn with_deadline(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn unbounded(self) -> Self {
        self.with_deadline(None)
    }

    pub fn visible(mut self) -> Self {
        self.output_visible = true;
        self
    }

    pub fn disowned(mut self) -> Self {
        self.disown = true;
        self
    }
}

/// Outcome of a command on one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub node: NodeAddress,
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
    pub failed: bool,
}

impl CommandResult {
    pub fn new(
        node: NodeAddress,
        exit_status: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            node,
            exit_status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            failed: exit_status != 0,
        }
    }

    pub fn success(&self) -> bool {
        !self.failed
    }
}

/// Per-member results of a group call, in group order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResult {
    results: Vec<CommandResult>,
}

impl GroupResult {
    pub fn from_results(results: Vec<CommandResult>) -> Self {
        Self { results }
    }

    pub fn get(&self, node: &NodeAddress) -> Option<&CommandResult> {
        self.results.iter().find(|r| &r.node == node)
    }

    /// Lookup by host only.
    pub fn get_host(&self, host: &str) -> Option<&CommandResult> {
        self.results.iter().find(|r| r.node.host == host)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// True if any member failed.
    pub fn failed(&self) -> bool {
        self.results.iter().any(|r| r.failed)
    }

    pub fn failed_nodes(&self) -> Vec<NodeAddress> {
        self.results
            .iter()
            .filter(|r| r.failed)
            .map(|r| r.node.clone())
            .collect()
    }

    pub fn into_results(self) -> Vec<CommandResult> {
        self.results
    }
}

impl IntoIterator for GroupResult {
    type Item = CommandResult;
    type IntoIter = std::vec::IntoIter<CommandResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// What an executor returns: one result for a single connection, a mapping for a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Single(CommandResult),
    Group(GroupResult),
}

impl ExecutionOutcome {
    pub fn failed(&self) -> bool {
        match self {
            Self::Single(result) => result.failed,
            Self::Group(group) => group.failed(),
        }
    }

    pub fn results(&self) -> Vec<&CommandResult> {
        match self {
            Self::Single(result) => vec![result],
            Self::Group(group) => group.iter().collect(),
        }
    }

    pub fn into_results(self) -> Vec<CommandResult> {
        match self {
            Self::Single(result) => vec![result],
            Self::Group(group) => group.into_results(),
        }
    }

    pub fn single(self) -> Option<CommandResult> {
        match self {
            Self::Single(result) => Some(result),
            Self::Group(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_private_key_is_cleared() {
        let addr = NodeAddress::new("10.0.0.1", "ops", "/definitely/not/here/id_rsa");
        assert!(addr.private_key.is_none());
        assert!(NodeAddress::new("h", "u", "").private_key.is_none());
    }

    #[test]
    fn test_existing_private_key_is_kept_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "key").unwrap();

        let addr = NodeAddress::new("10.0.0.1", "ops", key.to_str().unwrap());
        assert_eq!(addr.private_key.as_deref(), Some(key.as_path()));
        assert!(addr.private_key.unwrap().is_absolute());
    }

    #[test]
    fn test_destination_formatting() {
        assert_eq!(NodeAddress::unresolved("10.0.0.1", "ops").destination(), "ops@10.0.0.1");
        assert_eq!(NodeAddress::unresolved("10.0.0.1", "").destination(), "10.0.0.1");
    }

    #[test]
    fn test_same_credentials() {
        let a = NodeAddress::unresolved("10.0.0.1", "ops");
        let b = NodeAddress::unresolved("10.0.0.2", "ops");
        let c = NodeAddress::unresolved("10.0.0.3", "root");
        assert!(a.same_credentials(&b));
        assert!(!a.same_credentials(&c));
    }

    #[test]
    fn test_group_result_aggregate_failure() {
        let ok = CommandResult::new(NodeAddress::unresolved("a", "u"), 0, "x", "");
        let bad = CommandResult::new(NodeAddress::unresolved("b", "u"), 3, "", "err");
        let group = GroupResult::from_results(vec![ok.clone(), bad]);

        assert!(group.failed());
        assert_eq!(group.failed_nodes(), vec![NodeAddress::unresolved("b", "u")]);
        assert_eq!(group.get_host("a"), Some(&ok));
        assert!(ExecutionOutcome::Group(group).failed());
        assert!(!ExecutionOutcome::Single(ok).failed());
    }

    #[test]
    fn test_exec_options_builders() {
        let opts = ExecOptions::default()
            .allow_failures()
            .visible()
            .with_timeout(Duration::from_secs(5));
        assert!(opts.allow_failures);
        assert!(opts.output_visible);
        assert!(!opts.disown);
        assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
        assert_eq!(ExecOptions::default().timeout, Some(DEFAULT_TIMEOUT));
        assert_eq!(opts.unbounded().timeout, None);
    }
}
