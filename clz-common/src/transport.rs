//! Remote command execution primitive.
//!
//! The engine never speaks a wire protocol itself. A [`RemoteTransport`]
//! opens a channel to one node, runs fully rendered command lines over it
//! and closes it; it also ships files to nodes. [`crate::ssh::SshTransport`]
//! is the production implementation and [`crate::mock::MockTransport`] the
//! test one.

use crate::errors::Result;
use crate::types::NodeAddress;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;

/// Raw outcome of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RawOutput {
    pub fn new(exit_status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }
}

/// A way of running shell lines on remote nodes.
///
/// Implementations must be cheap to share: one transport serves every
/// connection of a group.
pub trait RemoteTransport: Send + Sync + 'static {
    /// Live channel to one node.
    type Channel: Send;

    fn connect(&self, node: &NodeAddress) -> impl Future<Output = Result<Self::Channel>> + Send;

    /// Run `command` verbatim. A non-zero exit is not an error here.
    fn run(
        &self,
        channel: &mut Self::Channel,
        command: &str,
    ) -> impl Future<Output = Result<RawOutput>> + Send;

    /// Drop the channel. Remote processes started with `nohup` keep running.
    fn disconnect(&self, channel: Self::Channel) -> impl Future<Output = ()> + Send;

    /// Copy a local file to an absolute path on `node`.
    fn upload(
        &self,
        node: &NodeAddress,
        local: &Path,
        remote: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Host key verification policy for the ssh transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnownHostsPolicy {
    /// Refuse unknown hosts.
    Strict,
    /// Record unknown hosts, refuse changed keys.
    #[default]
    Add,
    /// Accept anything.
    Accept,
}

impl FromStr for KnownHostsPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "add" => Ok(Self::Add),
            "accept" => Ok(Self::Accept),
            other => Err(format!("unknown known-hosts policy '{other}'")),
        }
    }
}
