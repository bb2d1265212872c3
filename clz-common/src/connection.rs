//! Connections and groups: the execute primitive.
//!
//! A [`Connection`] owns at most one live channel to a node, opened on first
//! use. A [`Group`] is an ordered, deduplicated set of connections addressed
//! as one unit. Channels belong to the scope that created them: use
//! [`Executor::scoped`] (or call `close` yourself) so they are released on
//! every exit path. Dropping a connection drops its channel.

use crate::env::EnvLayer;
use crate::errors::{ClusterizeError, Result};
use crate::transport::RemoteTransport;
use crate::types::{CommandResult, ExecOptions, ExecutionOutcome, GroupMode, GroupResult, NodeAddress};
use crate::util::{mask_sensitive_command, truncate_for_log};
use futures::future::{LocalBoxFuture, join_all};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Anything that can run a command line under an environment.
pub trait Execute: Send {
    fn execute(
        &mut self,
        command: &str,
        env: &EnvLayer,
        opts: &ExecOptions,
    ) -> impl Future<Output = Result<ExecutionOutcome>> + Send;
}

/// Final line sent to the node: exports, then the command.
///
/// Disowned commands are detached with `nohup` so they outlive the channel.
pub fn render_command(command: &str, env: &EnvLayer, disown: bool) -> String {
    if disown {
        let detached = format!(
            "nohup /bin/sh -c {} > /dev/null 2>&1 &",
            shell_escape::unix::escape(command.into())
        );
        env.prefix(&detached)
    } else {
        env.prefix(command)
    }
}

/// Await `fut`, giving up with the limit once `deadline` passes.
async fn within<F: Future>(
    deadline: Option<Duration>,
    fut: F,
) -> std::result::Result<F::Output, Duration> {
    match deadline {
        Some(limit) => timeout(limit, fut).await.map_err(|_| limit),
        None => Ok(fut.await),
    }
}

fn echo_output(result: &CommandResult) {
    for line in result.stdout.lines() {
        println!("[{}] {}", result.node.host, line);
    }
    for line in result.stderr.lines() {
        eprintln!("[{}] {}", result.node.host, line);
    }
}

/// Lazily established channel to one node.
pub struct Connection<T: RemoteTransport> {
    address: NodeAddress,
    transport: Arc<T>,
    channel: Option<T::Channel>,
}

impl<T: RemoteTransport> Connection<T> {
    pub fn new(address: NodeAddress, transport: Arc<T>) -> Self {
        Self {
            address,
            transport,
            channel: None,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn channel(&mut self) -> Result<&mut T::Channel> {
        let channel = match self.channel.take() {
            Some(channel) => channel,
            None => self.transport.connect(&self.address).await?,
        };
        Ok(self.channel.insert(channel))
    }

    /// Run an already rendered line, without deadline or failure policy.
    async fn run_line(&mut self, line: &str, opts: &ExecOptions) -> Result<CommandResult> {
        debug!(
            node = %self.address,
            command = %truncate_for_log(&mask_sensitive_command(line), 512),
            "Executing remote command"
        );
        let transport = Arc::clone(&self.transport);
        let channel = self.channel().await?;
        let raw = transport.run(channel, line).await?;

        let result = CommandResult::new(self.address.clone(), raw.exit_status, raw.stdout, raw.stderr);
        if opts.output_visible {
            echo_output(&result);
        }
        Ok(result)
    }

    /// Drop the channel without a graceful close.
    fn reset(&mut self) {
        self.channel = None;
    }

    /// Run `command` on this node.
    ///
    /// A non-zero exit is an [`ClusterizeError::ExecutionFailure`] unless
    /// `opts.allow_failures` is set. Exceeding `opts.timeout` is always an
    /// error.
    pub async fn execute(
        &mut self,
        command: &str,
        env: &EnvLayer,
        opts: &ExecOptions,
    ) -> Result<CommandResult> {
        let line = render_command(command, env, opts.disown);
        let result = match within(opts.timeout, self.run_line(&line, opts)).await {
            Ok(result) => result?,
            Err(limit) => {
                self.reset();
                return Err(ClusterizeError::Timeout {
                    target: self.address.to_string(),
                    timeout: limit,
                });
            }
        };

        if result.failed {
            if !opts.allow_failures {
                return Err(ClusterizeError::ExecutionFailure {
                    result: Box::new(result),
                });
            }
            warn!(node = %result.node, exit = result.exit_status, "Command failed (tolerated)");
        }
        Ok(result)
    }

    /// Close the channel if one is open.
    pub async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            self.transport.disconnect(channel).await;
        }
    }
}

impl<T: RemoteTransport> Execute for Connection<T> {
    async fn execute(
        &mut self,
        command: &str,
        env: &EnvLayer,
        opts: &ExecOptions,
    ) -> Result<ExecutionOutcome> {
        Connection::execute(self, command, env, opts)
            .await
            .map(ExecutionOutcome::Single)
    }
}

/// Ordered set of connections driven as one unit.
pub struct Group<T: RemoteTransport> {
    connections: Vec<Connection<T>>,
    transport: Arc<T>,
    mode: GroupMode,
}

impl<T: RemoteTransport> Group<T> {
    /// Duplicated addresses are dropped, first occurrence kept.
    pub fn new(
        addresses: impl IntoIterator<Item = NodeAddress>,
        transport: Arc<T>,
        mode: GroupMode,
    ) -> Self {
        let mut unique: Vec<NodeAddress> = Vec::new();
        for address in addresses {
            if !unique.contains(&address) {
                unique.push(address);
            }
        }
        let connections = unique
            .into_iter()
            .map(|address| Connection::new(address, Arc::clone(&transport)))
            .collect();
        Self {
            connections,
            transport,
            mode,
        }
    }

    /// Shared transport, for file transfers to members.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn addresses(&self) -> Vec<&NodeAddress> {
        self.connections.iter().map(Connection::address).collect()
    }

    pub fn mode(&self) -> GroupMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn describe(&self) -> String {
        let hosts: Vec<String> = self
            .connections
            .iter()
            .map(|c| c.address.to_string())
            .collect();
        format!("group [{}]", hosts.join(", "))
    }

    async fn run_all(&mut self, line: &str, opts: &ExecOptions) -> Vec<Result<CommandResult>> {
        match self.mode {
            GroupMode::Sequential => {
                let mut outcomes = Vec::with_capacity(self.connections.len());
                for connection in &mut self.connections {
                    outcomes.push(connection.run_line(line, opts).await);
                }
                outcomes
            }
            GroupMode::Parallel => {
                let calls = self
                    .connections
                    .iter_mut()
                    .map(|connection| connection.run_line(line, opts));
                join_all(calls).await
            }
        }
    }

    /// Run `command` on every member and wait for all of them.
    ///
    /// A member whose channel could not be used is reported with exit
    /// status -1 and the transport error as stderr; that always fails the
    /// call, even with `allow_failures`. Any failure surfaces as one
    /// [`ClusterizeError::GroupExecutionFailure`] carrying every result.
    pub async fn execute(
        &mut self,
        command: &str,
        env: &EnvLayer,
        opts: &ExecOptions,
    ) -> Result<GroupResult> {
        let line = render_command(command, env, opts.disown);
        let outcomes = match within(opts.timeout, self.run_all(&line, opts)).await {
            Ok(outcomes) => outcomes,
            Err(limit) => {
                self.connections.iter_mut().for_each(Connection::reset);
                return Err(ClusterizeError::Timeout {
                    target: self.describe(),
                    timeout: limit,
                });
            }
        };

        let mut unreachable = false;
        let results = self
            .connections
            .iter()
            .zip(outcomes)
            .map(|(connection, outcome)| match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(node = %connection.address, error = %e, "Group member unreachable");
                    unreachable = true;
                    CommandResult::new(connection.address.clone(), -1, "", e.to_string())
                }
            })
            .collect();
        let results = GroupResult::from_results(results);

        if results.failed() {
            if opts.allow_failures && !unreachable {
                for failed in results.failed_nodes() {
                    warn!(node = %failed, "Command failed (tolerated)");
                }
            } else {
                return Err(ClusterizeError::GroupExecutionFailure {
                    failed: results.failed_nodes(),
                    results,
                });
            }
        }
        Ok(results)
    }

    pub async fn close(&mut self) {
        for connection in &mut self.connections {
            connection.close().await;
        }
    }
}

impl<T: RemoteTransport> Execute for Group<T> {
    async fn execute(
        &mut self,
        command: &str,
        env: &EnvLayer,
        opts: &ExecOptions,
    ) -> Result<ExecutionOutcome> {
        Group::execute(self, command, env, opts)
            .await
            .map(ExecutionOutcome::Group)
    }
}

/// What a target resolves to.
pub enum Executor<T: RemoteTransport> {
    Single(Connection<T>),
    Group(Group<T>),
}

impl<T: RemoteTransport> Executor<T> {
    pub fn addresses(&self) -> Vec<&NodeAddress> {
        match self {
            Self::Single(connection) => vec![connection.address()],
            Self::Group(group) => group.addresses(),
        }
    }

    pub async fn execute(
        &mut self,
        command: &str,
        env: &EnvLayer,
        opts: &ExecOptions,
    ) -> Result<ExecutionOutcome> {
        match self {
            Self::Single(connection) => Execute::execute(connection, command, env, opts).await,
            Self::Group(group) => Execute::execute(group, command, env, opts).await,
        }
    }

    pub async fn close(&mut self) {
        match self {
            Self::Single(connection) => connection.close().await,
            Self::Group(group) => group.close().await,
        }
    }

    /// Run `body` with this executor, then close it whatever the outcome.
    pub async fn scoped<R, F>(mut self, body: F) -> Result<R>
    where
        F: for<'a> FnOnce(&'a mut Executor<T>) -> LocalBoxFuture<'a, Result<R>>,
    {
        let outcome = body(&mut self).await;
        self.close().await;
        outcome
    }
}

impl<T: RemoteTransport> Execute for Executor<T> {
    async fn execute(
        &mut self,
        command: &str,
        env: &EnvLayer,
        opts: &ExecOptions,
    ) -> Result<ExecutionOutcome> {
        Executor::execute(self, command, env, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::RawOutput;
    use std::time::Duration;

    fn node(host: &str) -> NodeAddress {
        NodeAddress::unresolved(host, "ops")
    }

    #[test]
    fn test_render_command_prefixes_env() {
        let env = EnvLayer::new().with("A", "1");
        assert_eq!(render_command("ls", &env, false), "export A=1 && ls");
        assert_eq!(render_command("ls", &EnvLayer::new(), false), "ls");
    }

    #[test]
    fn test_render_disowned_command() {
        let line = render_command("sleep 100 && echo done", &EnvLayer::new(), true);
        assert_eq!(
            line,
            "nohup /bin/sh -c 'sleep 100 && echo done' > /dev/null 2>&1 &"
        );
    }

    #[tokio::test]
    async fn test_connection_is_lazy_and_reused() {
        let mock = Arc::new(MockTransport::new());
        let mut conn = Connection::new(node("a"), Arc::clone(&mock));
        assert!(!conn.is_connected());
        assert!(mock.connects().is_empty());

        let opts = ExecOptions::default();
        conn.execute("one", &EnvLayer::new(), &opts).await.unwrap();
        conn.execute("two", &EnvLayer::new(), &opts).await.unwrap();
        assert_eq!(mock.connects().len(), 1);

        conn.close().await;
        assert!(!conn.is_connected());
        assert_eq!(mock.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_fatal_unless_allowed() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("false", RawOutput::new(1, "", "nope"));
        let mut conn = Connection::new(node("a"), Arc::clone(&mock));

        let err = conn
            .execute("false", &EnvLayer::new(), &ExecOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterizeError::ExecutionFailure { .. }));

        let result = conn
            .execute("false", &EnvLayer::new(), &ExecOptions::default().allow_failures())
            .await
            .unwrap();
        assert!(result.failed);
        assert_eq!(result.stderr, "nope");
    }

    #[tokio::test]
    async fn test_group_deduplicates_in_order() {
        let mock = Arc::new(MockTransport::new());
        let group = Group::new(
            vec![node("b"), node("a"), node("b")],
            Arc::clone(&mock),
            GroupMode::Parallel,
        );
        let hosts: Vec<_> = group.addresses().iter().map(|a| a.host.clone()).collect();
        assert_eq!(hosts, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_scoped_closes_on_error() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("boom", RawOutput::new(2, "", ""));
        let executor = Executor::Single(Connection::new(node("a"), Arc::clone(&mock)));

        let outcome = executor
            .scoped(|exec| {
                Box::pin(async move {
                    exec.execute("boom", &EnvLayer::new(), &ExecOptions::default())
                        .await
                })
            })
            .await;
        assert!(outcome.is_err());
        assert_eq!(mock.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_timeout_resets_channel() {
        let mock = Arc::new(MockTransport::new());
        mock.with_latency("slow", Duration::from_millis(500));
        let mut conn = Connection::new(node("slow"), Arc::clone(&mock));

        let opts = ExecOptions::default()
            .allow_failures()
            .with_timeout(Duration::from_millis(20));
        let err = conn.execute("sleep", &EnvLayer::new(), &opts).await.unwrap_err();
        assert!(matches!(err, ClusterizeError::Timeout { .. }));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_unbounded_call_waits_for_slow_node() {
        let mock = Arc::new(MockTransport::new());
        mock.with_latency("slow", Duration::from_millis(150));
        let mut conn = Connection::new(node("slow"), Arc::clone(&mock));

        let opts = ExecOptions::default().unbounded();
        let result = conn.execute("train", &EnvLayer::new(), &opts).await.unwrap();
        assert!(result.success());
        assert!(conn.is_connected());
    }
}
