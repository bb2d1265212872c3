//! Error types and catalog for clusterize.
//!
//! [`ClusterizeError`] is what every fallible core operation returns. Each
//! variant maps to an [`ErrorCode`] in the catalog so the CLI can print
//! remediation steps. No variant is ever retried by the core.

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use crate::types::{CommandResult, GroupResult, NodeAddress};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T, E = ClusterizeError> = std::result::Result<T, E>;

/// Which configuration invariant was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigIssue {
    Invalid,
    DockerMissing,
    CredentialMismatch,
    NameMismatch,
}

/// Errors raised by the execution engine.
#[derive(Debug, Error)]
pub enum ClusterizeError {
    /// Missing docker section, mismatched credentials, name mismatch... Always fatal.
    #[error("configuration error: {message}")]
    Configuration { issue: ConfigIssue, message: String },

    /// Non-zero exit on a single node with failures not tolerated.
    #[error(
        "command failed on {} (exit status {}): {}",
        .result.node,
        .result.exit_status,
        .result.stderr.trim()
    )]
    ExecutionFailure { result: Box<CommandResult> },

    /// At least one member of a group failed. Carries every member's result.
    #[error(
        "command failed on {} of {} nodes: [{}]",
        .failed.len(),
        .results.len(),
        .failed.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", ")
    )]
    GroupExecutionFailure {
        failed: Vec<NodeAddress>,
        results: GroupResult,
    },

    /// The whole call exceeded its deadline.
    #[error("call on {target} timed out after {}s", .timeout.as_secs_f64())]
    Timeout { target: String, timeout: Duration },

    #[error("session '{session}' already exists")]
    DuplicateSession { session: String },

    #[error("window #{window} not found in session '{session}'")]
    WindowNotFound { session: String, window: u32 },

    #[error(
        "container '{container}' found already running on: [{}]. Clean the cluster before continuing",
        .hosts.join(", ")
    )]
    ContainerConflict { container: String, hosts: Vec<String> },

    /// The channel to a node could not be established or broke mid-call.
    #[error("transport error on {node}: {message}")]
    Transport { node: String, message: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

impl ClusterizeError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            issue: ConfigIssue::Invalid,
            message: message.into(),
        }
    }

    pub fn docker_missing(cluster: &str) -> Self {
        Self::Configuration {
            issue: ConfigIssue::DockerMissing,
            message: format!("docker not enabled in the configuration of cluster '{cluster}'"),
        }
    }

    pub fn credential_mismatch(message: impl Into<String>) -> Self {
        Self::Configuration {
            issue: ConfigIssue::CredentialMismatch,
            message: message.into(),
        }
    }

    pub fn name_mismatch(project: &str, cluster: &str) -> Self {
        Self::Configuration {
            issue: ConfigIssue::NameMismatch,
            message: format!("project name '{project}' and cluster name '{cluster}' do not match"),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Catalog code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { issue, .. } => match issue {
                ConfigIssue::DockerMissing => ErrorCode::ConfigDockerMissing,
                ConfigIssue::CredentialMismatch => ErrorCode::ConfigCredentialMismatch,
                ConfigIssue::Invalid | ConfigIssue::NameMismatch => ErrorCode::ConfigInvalid,
            },
            Self::ExecutionFailure { .. } => ErrorCode::ExecNonZeroExit,
            Self::GroupExecutionFailure { .. } => ErrorCode::ExecGroupFailure,
            Self::Timeout { .. } => ErrorCode::NetworkTimeout,
            Self::DuplicateSession { .. } => ErrorCode::SessionDuplicate,
            Self::WindowNotFound { .. } => ErrorCode::SessionWindowNotFound,
            Self::ContainerConflict { .. } => ErrorCode::ContainerConflict,
            Self::Transport { .. } => ErrorCode::NetworkConnectFailed,
            Self::Io { .. } => ErrorCode::InternalIo,
            Self::Parse { .. } => ErrorCode::InternalParse,
        }
    }

    /// Per-node results attached to an execution failure, if any.
    pub fn failed_results(&self) -> Vec<&CommandResult> {
        match self {
            Self::ExecutionFailure { result } => vec![result.as_ref()],
            Self::GroupExecutionFailure { results, .. } => {
                results.iter().filter(|r| r.failed).collect()
            }
            _ => Vec::new(),
        }
    }
}
