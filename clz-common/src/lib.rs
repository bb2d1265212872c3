//! Multi-node command execution engine for clusterize.
//!
//! Resolves logical targets onto SSH connections, layers the remote
//! environment, rewrites cluster lifecycles to run in containers and drives
//! persistent multiplexer sessions.

pub mod config;
pub mod connection;
pub mod docker;
pub mod env;
pub mod errors;
pub mod logging;
pub mod mock;
pub mod session;
#[cfg(unix)]
pub mod ssh;
pub mod target;
pub mod transport;
pub mod types;
pub mod util;

pub use config::{ClusterSpec, ProjectSpec, Settings};
pub use connection::{Connection, Execute, Executor, Group};
pub use docker::{ContainerizedClusterSpec, containerize};
pub use env::{BaseEnvironment, EnvLayer, compose, session_env};
pub use errors::{ClusterizeError, ErrorCode, Result};
pub use logging::{LogConfig, LoggingGuards, init_logging};
pub use mock::MockTransport;
pub use session::{Multiplexer, SessionManager};
#[cfg(unix)]
pub use ssh::{SshOptions, SshTransport};
pub use target::{Target, TargetResolver};
pub use transport::{KnownHostsPolicy, RawOutput, RemoteTransport};
pub use types::{CommandResult, ExecOptions, ExecutionOutcome, GroupMode, GroupResult, NodeAddress};
pub use util::mask_sensitive_command;
