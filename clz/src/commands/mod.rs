//! Command implementations for the clusterize CLI.
//!
//! Handlers are generic over the transport so they run unchanged against
//! the mock transport in tests.

pub mod cluster;
pub mod deploy;
pub mod helpers;
pub mod project;
pub mod session;

use anyhow::{Context as _, Result};
use clz_common::config::discovery::{ProjectData, require_project_data};
use clz_common::{
    ClusterSpec, EnvLayer, ExecOptions, GroupMode, Multiplexer, ProjectSpec, RemoteTransport,
    Settings, TargetResolver, compose, session_env,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Everything a command needs besides its own arguments.
pub struct Context<T: RemoteTransport> {
    pub transport: Arc<T>,
    pub settings: Settings,
    mode: GroupMode,
    job_timeout: Option<Duration>,
    query_timeout: Duration,
}

impl<T: RemoteTransport> Context<T> {
    pub fn new(transport: Arc<T>, settings: Settings) -> Self {
        let mode = settings.group_mode();
        let job_timeout = settings.timeout();
        let query_timeout = settings.query_timeout();
        Self {
            transport,
            settings,
            mode,
            job_timeout,
            query_timeout,
        }
    }

    /// `--sequential` overrides the configured group mode.
    pub fn with_mode(mut self, mode: GroupMode) -> Self {
        self.mode = mode;
        self
    }

    /// `--timeout` bounds user and lifecycle commands.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn mode(&self) -> GroupMode {
        self.mode
    }

    pub fn multiplexer(&self) -> Multiplexer {
        self.settings.general.multiplexer
    }

    /// Options for the short calls whose output is parsed: checks,
    /// listings, path resolution.
    pub fn query_opts(&self) -> ExecOptions {
        ExecOptions::default().with_timeout(self.query_timeout)
    }

    /// Options for user and lifecycle commands, unbounded unless a
    /// timeout was configured.
    pub fn job_opts(&self) -> ExecOptions {
        ExecOptions::default().with_deadline(self.job_timeout)
    }

    /// Job options with output echoed per node.
    pub fn visible_opts(&self) -> ExecOptions {
        self.job_opts().visible()
    }

    pub fn resolver<'a>(&self, cluster: &'a ClusterSpec) -> TargetResolver<'a, T> {
        TargetResolver::new(cluster, Arc::clone(&self.transport)).with_mode(self.mode)
    }

    /// Base and session layers, then `caller` on top.
    pub fn session_env(&self, project: &str, session: &str, caller: &EnvLayer) -> EnvLayer {
        compose(
            &self.settings.base_environment().layer(),
            &session_env(project, session),
            caller,
        )
    }
}

/// A project loaded from disk.
pub struct LoadedProject {
    pub data: ProjectData,
    pub cluster: ClusterSpec,
    pub project: ProjectSpec,
}

impl LoadedProject {
    pub fn load(dir: &Path) -> Result<Self> {
        let data = require_project_data(dir)
            .with_context(|| format!("Failed to load project from {}", dir.display()))?;
        let cluster = data.load_cluster()?;
        let project = data.load_project()?;
        Ok(Self {
            data,
            cluster,
            project,
        })
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Session name, defaulting to the project name.
    pub fn session_name(&self, session: Option<&str>) -> String {
        session.unwrap_or(&self.data.name).to_string()
    }
}
