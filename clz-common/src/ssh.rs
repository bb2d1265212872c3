//! SSH transport built on `openssh` (multiplexed OpenSSH master connections).

use crate::errors::{ClusterizeError, Result};
use crate::transport::{KnownHostsPolicy, RawOutput, RemoteTransport};
use crate::types::NodeAddress;
use crate::util::mask_sensitive_command;
use openssh::{KnownHosts, Session, SessionBuilder};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// SSH connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    pub connect_timeout: Duration,
    pub known_hosts: KnownHostsPolicy,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            known_hosts: KnownHostsPolicy::default(),
        }
    }
}

impl KnownHostsPolicy {
    /// Value for OpenSSH's `StrictHostKeyChecking` option.
    pub fn ssh_option(&self) -> &'static str {
        match self {
            Self::Strict => "yes",
            Self::Add => "accept-new",
            Self::Accept => "no",
        }
    }
}

impl From<KnownHostsPolicy> for KnownHosts {
    fn from(policy: KnownHostsPolicy) -> Self {
        match policy {
            KnownHostsPolicy::Strict => KnownHosts::Strict,
            KnownHostsPolicy::Add => KnownHosts::Add,
            KnownHostsPolicy::Accept => KnownHosts::Accept,
        }
    }
}

/// Open master connection to one node.
pub struct SshChannel {
    node: String,
    session: Session,
}

/// Production transport: one OpenSSH master connection per node.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    fn builder(&self, node: &NodeAddress) -> SessionBuilder {
        let mut builder = SessionBuilder::default();
        builder
            .connect_timeout(self.options.connect_timeout)
            .known_hosts_check(self.options.known_hosts.into());
        if !node.user.is_empty() {
            builder.user(node.user.clone());
        }
        if let Some(key) = &node.private_key {
            builder.keyfile(key);
        }
        builder
    }

    fn scp_command(&self, node: &NodeAddress, local: &Path, remote: &str) -> Command {
        let mut cmd = Command::new("scp");
        cmd.arg("-q");
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)));
        cmd.arg("-o")
            .arg(format!("StrictHostKeyChecking={}", self.options.known_hosts.ssh_option()));
        if let Some(key) = &node.private_key {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(local);
        cmd.arg(format!("{}:{}", node.destination(), remote));
        cmd
    }
}

impl RemoteTransport for SshTransport {
    type Channel = SshChannel;

    async fn connect(&self, node: &NodeAddress) -> Result<SshChannel> {
        debug!(node = %node, "Opening SSH session");
        let session = self
            .builder(node)
            .connect(&node.host)
            .await
            .map_err(|e| ClusterizeError::Transport {
                node: node.to_string(),
                message: format!("SSH connection failed: {e}"),
            })?;
        Ok(SshChannel {
            node: node.to_string(),
            session,
        })
    }

    async fn run(&self, channel: &mut SshChannel, command: &str) -> Result<RawOutput> {
        debug!(node = %channel.node, command = %mask_sensitive_command(command), "Running remote command");
        let output = channel
            .session
            .raw_command(command)
            .output()
            .await
            .map_err(|e| ClusterizeError::Transport {
                node: channel.node.clone(),
                message: format!("command failed to run: {e}"),
            })?;

        Ok(RawOutput {
            // No code means the remote side was killed by a signal.
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn disconnect(&self, channel: SshChannel) {
        if let Err(e) = channel.session.close().await {
            warn!("Error closing SSH session to {}: {}", channel.node, e);
        }
    }

    async fn upload(&self, node: &NodeAddress, local: &Path, remote: &str) -> Result<()> {
        debug!(node = %node, local = %local.display(), remote = %remote, "Uploading file");
        let output = self
            .scp_command(node, local, remote)
            .output()
            .await
            .map_err(|e| ClusterizeError::Transport {
                node: node.to_string(),
                message: format!("failed to spawn scp: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClusterizeError::Transport {
                node: node.to_string(),
                message: format!("scp of {} failed: {}", local.display(), stderr.trim()),
            });
        }
        Ok(())
    }
}
