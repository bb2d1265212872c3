//! Error catalog for clusterize.
//!
//! Every failure the engine can report maps to a unique code so that the CLI
//! can print the same remediation steps regardless of which node failed.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                             |
//! |------------|-------------|-----------------------------------------|
//! | E001-E099  | Config      | Cluster/project configuration errors    |
//! | E100-E199  | Network     | SSH channel establishment and timeouts  |
//! | E200-E299  | Execution   | Remote command failures                 |
//! | E300-E399  | Session     | Persistent terminal session errors      |
//! | E400-E499  | Container   | Docker container lifecycle errors       |
//! | E500-E599  | Internal    | Local I/O and parsing errors            |

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering every clusterize failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid or inconsistent cluster/project configuration
    ConfigInvalid,
    /// Docker section missing where containerization was requested
    ConfigDockerMissing,
    /// Head and workers do not share user or private key
    ConfigCredentialMismatch,
    /// Remote channel could not be established
    NetworkConnectFailed,
    /// A call exceeded its deadline
    NetworkTimeout,
    /// Non-zero exit status on a single node
    ExecNonZeroExit,
    /// Non-zero exit status on one or more group members
    ExecGroupFailure,
    /// Session already exists on the target
    SessionDuplicate,
    /// Window index not present in the session
    SessionWindowNotFound,
    /// Container with the same name already running
    ContainerConflict,
    /// Local filesystem error
    InternalIo,
    /// Configuration file could not be parsed
    InternalParse,
}

impl ErrorCode {
    /// Numeric part of the code.
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::ConfigInvalid => 1,
            Self::ConfigDockerMissing => 2,
            Self::ConfigCredentialMismatch => 3,
            Self::NetworkConnectFailed => 100,
            Self::NetworkTimeout => 101,
            Self::ExecNonZeroExit => 200,
            Self::ExecGroupFailure => 201,
            Self::SessionDuplicate => 300,
            Self::SessionWindowNotFound => 301,
            Self::ContainerConflict => 400,
            Self::InternalIo => 500,
            Self::InternalParse => 501,
        }
    }

    /// Code formatted as `CLZ-Exxx`.
    pub fn code_string(&self) -> String {
        format!("CLZ-E{:03}", self.code_number())
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            0..=99 => ErrorCategory::Config,
            100..=199 => ErrorCategory::Network,
            200..=299 => ErrorCategory::Execution,
            300..=399 => ErrorCategory::Session,
            400..=499 => ErrorCategory::Container,
            _ => ErrorCategory::Internal,
        }
    }

    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "The cluster or project configuration is invalid",
            Self::ConfigDockerMissing => "Docker is not enabled in the cluster configuration",
            Self::ConfigCredentialMismatch => {
                "Head and worker nodes do not share the same SSH credentials"
            }
            Self::NetworkConnectFailed => "Could not establish an SSH channel to the node",
            Self::NetworkTimeout => "The remote call did not complete before its deadline",
            Self::ExecNonZeroExit => "The remote command exited with a non-zero status",
            Self::ExecGroupFailure => "The remote command failed on one or more nodes",
            Self::SessionDuplicate => "A persistent session with this name already exists",
            Self::SessionWindowNotFound => "The requested window does not exist in the session",
            Self::ContainerConflict => "A container with the cluster name is already running",
            Self::InternalIo => "A local filesystem operation failed",
            Self::InternalParse => "A configuration file could not be parsed",
        }
    }

    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::ConfigInvalid => &[
                "Check cluster.yaml and project.yaml in the project directory",
                "Make sure project.name matches cluster_name",
            ],
            Self::ConfigDockerMissing => &["Add a `docker:` section with at least `image` to cluster.yaml"],
            Self::ConfigCredentialMismatch => &[
                "Use the same ssh_user and ssh_private_key for head and workers",
                "Remove head_auth/worker_auth overrides to fall back to `auth`",
            ],
            Self::NetworkConnectFailed => &[
                "Verify the node is reachable: ssh <user>@<host>",
                "Check the private key path in the `auth` section",
            ],
            Self::NetworkTimeout => &[
                "Increase the timeout with --timeout or CLZ_TIMEOUT_SECS",
                "Run long jobs inside a persistent session (--tmux)",
            ],
            Self::ExecNonZeroExit | Self::ExecGroupFailure => {
                &["Inspect the captured stderr of the failing node(s)"]
            }
            Self::SessionDuplicate => &["Attach to the existing session or kill it first"],
            Self::SessionWindowNotFound => &["List the windows of the session and pick an existing index"],
            Self::ContainerConflict => &[
                "Stop the running containers with `clusterize cluster stop`",
                "Or set a different docker.container_name",
            ],
            Self::InternalIo => &["Check permissions of the project directory"],
            Self::InternalParse => &["Validate the YAML syntax of the configuration files"],
        }
    }

    /// Full catalog entry for this code.
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self.remediation().iter().map(|s| s.to_string()).collect(),
        }
    }

    #[must_use]
    pub const fn all() -> &'static [ErrorCode] {
        &[
            Self::ConfigInvalid,
            Self::ConfigDockerMissing,
            Self::ConfigCredentialMismatch,
            Self::NetworkConnectFailed,
            Self::NetworkTimeout,
            Self::ExecNonZeroExit,
            Self::ExecGroupFailure,
            Self::SessionDuplicate,
            Self::SessionWindowNotFound,
            Self::ContainerConflict,
            Self::InternalIo,
            Self::InternalParse,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

/// Subsystem an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Config,
    Network,
    Execution,
    Session,
    Container,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Config => "Configuration",
            Self::Network => "Network",
            Self::Execution => "Execution",
            Self::Session => "Session",
            Self::Container => "Container",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "CLZ-E001")
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("\nRemediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
