//! Deterministic in-memory transport for tests.
//!
//! Responses are scripted by command substring, optionally restricted to one
//! host. The most recently added matching rule wins; unmatched commands
//! succeed with empty output. Every connect, command, completion and upload
//! is recorded so tests can assert on what reached each node and in which
//! order. Uploads never touch the filesystem.

use crate::errors::{ClusterizeError, Result};
use crate::transport::{RawOutput, RemoteTransport};
use crate::types::NodeAddress;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Dynamic responder consulted before the scripted rules.
pub type MockHandler = Arc<dyn Fn(&NodeAddress, &str) -> Option<RawOutput> + Send + Sync>;

#[derive(Debug, Clone)]
struct MockRule {
    host: Option<String>,
    pattern: String,
    output: RawOutput,
}

#[derive(Default)]
struct MockState {
    rules: Vec<MockRule>,
    handler: Option<MockHandler>,
    connect_failures: HashSet<String>,
    latency: HashMap<String, Duration>,
    connects: Vec<NodeAddress>,
    commands: Vec<(String, String)>,
    completions: Vec<String>,
    uploads: Vec<(String, PathBuf, String)>,
    disconnects: usize,
}

/// Channel handed out by [`MockTransport`].
#[derive(Debug)]
pub struct MockChannel {
    node: NodeAddress,
}

/// Scripted transport. Clones share state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer commands containing `pattern` on any host.
    pub fn respond(&self, pattern: impl Into<String>, output: RawOutput) -> &Self {
        self.state().rules.push(MockRule {
            host: None,
            pattern: pattern.into(),
            output,
        });
        self
    }

    /// Answer commands containing `pattern` on `host` only.
    pub fn respond_on(
        &self,
        host: impl Into<String>,
        pattern: impl Into<String>,
        output: RawOutput,
    ) -> &Self {
        self.state().rules.push(MockRule {
            host: Some(host.into()),
            pattern: pattern.into(),
            output,
        });
        self
    }

    pub fn with_handler<F>(&self, handler: F) -> &Self
    where
        F: Fn(&NodeAddress, &str) -> Option<RawOutput> + Send + Sync + 'static,
    {
        self.state().handler = Some(Arc::new(handler));
        self
    }

    /// Refuse connections to `host`.
    pub fn fail_connect(&self, host: impl Into<String>) -> &Self {
        self.state().connect_failures.insert(host.into());
        self
    }

    /// Delay every command on `host`.
    pub fn with_latency(&self, host: impl Into<String>, latency: Duration) -> &Self {
        self.state().latency.insert(host.into(), latency);
        self
    }

    /// Every connection attempt, in order.
    pub fn connects(&self) -> Vec<NodeAddress> {
        self.state().connects.clone()
    }

    /// Every `(host, command)` received, in arrival order.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.state().commands.clone()
    }

    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.state()
            .commands
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Hosts in the order their commands finished.
    pub fn completions(&self) -> Vec<String> {
        self.state().completions.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    /// Every `(host, local, remote)` upload, in order.
    pub fn uploads(&self) -> Vec<(String, PathBuf, String)> {
        self.state().uploads.clone()
    }

    fn answer(&self, node: &NodeAddress, command: &str) -> RawOutput {
        let (handler, scripted) = {
            let state = self.state();
            let scripted = state
                .rules
                .iter()
                .rev()
                .find(|rule| {
                    rule.host.as_deref().is_none_or(|h| h == node.host)
                        && command.contains(&rule.pattern)
                })
                .map(|rule| rule.output.clone());
            (state.handler.clone(), scripted)
        };

        if let Some(output) = handler.and_then(|h| h(node, command)) {
            return output;
        }
        scripted.unwrap_or_default()
    }
}

impl RemoteTransport for MockTransport {
    type Channel = MockChannel;

    async fn connect(&self, node: &NodeAddress) -> Result<MockChannel> {
        let refused = {
            let mut state = self.state();
            state.connects.push(node.clone());
            state.connect_failures.contains(&node.host)
        };
        if refused {
            return Err(ClusterizeError::Transport {
                node: node.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(MockChannel { node: node.clone() })
    }

    async fn run(&self, channel: &mut MockChannel, command: &str) -> Result<RawOutput> {
        let latency = {
            let mut state = self.state();
            state
                .commands
                .push((channel.node.host.clone(), command.to_string()));
            state.latency.get(&channel.node.host).copied()
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let output = self.answer(&channel.node, command);
        self.state().completions.push(channel.node.host.clone());
        Ok(output)
    }

    async fn disconnect(&self, _channel: MockChannel) {
        self.state().disconnects += 1;
    }

    async fn upload(&self, node: &NodeAddress, local: &Path, remote: &str) -> Result<()> {
        let mut state = self.state();
        if state.connect_failures.contains(&node.host) {
            return Err(ClusterizeError::Transport {
                node: node.to_string(),
                message: "upload refused".to_string(),
            });
        }
        state
            .uploads
            .push((node.host.clone(), local.to_path_buf(), remote.to_string()));
        Ok(())
    }
}
