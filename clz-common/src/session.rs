//! Persistent terminal-multiplexer sessions on remote nodes.
//!
//! Nothing is cached: every existence or window check lists the remote
//! state again. Check-then-create is two round trips, so two callers racing
//! on the same session name can both pass the check; session names must be
//! unique per node by convention.

use crate::connection::Execute;
use crate::env::EnvLayer;
use crate::errors::{ClusterizeError, Result};
use crate::types::{ExecOptions, ExecutionOutcome};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Multiplexer flavor installed on the nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Multiplexer {
    #[default]
    Byobu,
    Tmux,
}

impl Multiplexer {
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Byobu => "byobu-tmux",
            Self::Tmux => "tmux",
        }
    }
}

impl fmt::Display for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byobu => f.write_str("byobu"),
            Self::Tmux => f.write_str("tmux"),
        }
    }
}

impl FromStr for Multiplexer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "byobu" | "byobu-tmux" => Ok(Self::Byobu),
            "tmux" => Ok(Self::Tmux),
            other => Err(format!("unknown multiplexer '{other}'")),
        }
    }
}

fn quote(value: &str) -> String {
    shell_escape::unix::escape(value.into()).into_owned()
}

fn stdout_lines(outcome: &ExecutionOutcome) -> Vec<String> {
    outcome
        .results()
        .into_iter()
        .filter(|r| !r.failed)
        .flat_map(|r| r.stdout.lines().map(str::to_string).collect::<Vec<_>>())
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

fn parse_windows(lines: &[String]) -> BTreeMap<u32, String> {
    lines
        .iter()
        .filter_map(|line| {
            let (index, name) = line.split_once(':')?;
            let index = index.trim().parse::<u32>().ok()?;
            Some((index, name.trim().to_string()))
        })
        .collect()
}

/// Drives sessions on whatever `executor` targets.
///
/// Over a group, listings are the union of every member's answer and
/// mutations run on every member.
pub struct SessionManager<'a, E: Execute> {
    executor: &'a mut E,
    multiplexer: Multiplexer,
    env: EnvLayer,
    opts: ExecOptions,
}

impl<'a, E: Execute> SessionManager<'a, E> {
    pub fn new(executor: &'a mut E, multiplexer: Multiplexer) -> Self {
        Self {
            executor,
            multiplexer,
            env: EnvLayer::new(),
            opts: ExecOptions::default(),
        }
    }

    /// Environment exported by the commands started in sessions.
    ///
    /// The exports travel with the command text itself: a shell inside the
    /// multiplexer does not inherit the environment of the ssh shell that
    /// drove it.
    pub fn with_env(mut self, env: EnvLayer) -> Self {
        self.env = env;
        self
    }

    pub fn with_options(mut self, opts: ExecOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn multiplexer(&self) -> Multiplexer {
        self.multiplexer
    }

    fn bin(&self) -> &'static str {
        self.multiplexer.binary()
    }

    async fn query(&mut self, command: &str) -> Result<Vec<String>> {
        let opts = self.opts.clone().allow_failures();
        let outcome = self.executor.execute(command, &EnvLayer::new(), &opts).await?;
        Ok(stdout_lines(&outcome))
    }

    async fn mutate(&mut self, command: &str) -> Result<()> {
        debug!(command = %command, "Session command");
        let opts = self.opts.clone();
        self.executor.execute(command, &EnvLayer::new(), &opts).await?;
        Ok(())
    }

    /// `command` as one shell token, preceded by the session exports.
    fn payload(&self, command: &str) -> String {
        quote(&self.env.prefix(command))
    }

    /// Names of the live sessions, sorted.
    pub async fn get_sessions(&mut self) -> Result<Vec<String>> {
        let command = format!(
            "{} list-sessions -F '#{{session_name}}' 2>/dev/null || true",
            self.bin()
        );
        let names: BTreeSet<String> = self.query(&command).await?.into_iter().collect();
        Ok(names.into_iter().collect())
    }

    pub async fn has_session(&mut self, session: &str) -> Result<bool> {
        Ok(self.get_sessions().await?.iter().any(|s| s == session))
    }

    /// `index -> title`; empty when the session does not exist.
    pub async fn get_windows(&mut self, session: &str) -> Result<BTreeMap<u32, String>> {
        if !self.has_session(session).await? {
            return Ok(BTreeMap::new());
        }
        let command = format!(
            "{} list-windows -t {} -F '#{{window_index}}:#{{window_name}}'",
            self.bin(),
            quote(session)
        );
        let lines = self.query(&command).await?;
        Ok(parse_windows(&lines))
    }

    /// Create a detached session, optionally with a named first window
    /// running `command`.
    pub async fn create_session(
        &mut self,
        session: &str,
        window: Option<&str>,
        command: Option<&str>,
    ) -> Result<()> {
        if self.has_session(session).await? {
            return Err(ClusterizeError::DuplicateSession {
                session: session.to_string(),
            });
        }

        let mut line = format!("{} new-session -d -s {}", self.bin(), quote(session));
        if let Some(window) = window {
            line.push_str(&format!(" -n {}", quote(window)));
        }
        if let Some(command) = command.filter(|c| !c.trim().is_empty()) {
            line.push(' ');
            line.push_str(&self.payload(command));
        }
        self.mutate(&line).await?;
        info!(session = %session, "Created persistent session");
        Ok(())
    }

    /// No-op when the session is absent.
    pub async fn kill_session(&mut self, session: &str) -> Result<()> {
        if !self.has_session(session).await? {
            return Ok(());
        }
        let line = format!("{} kill-session -t {}", self.bin(), quote(session));
        self.mutate(&line).await?;
        info!(session = %session, "Killed persistent session");
        Ok(())
    }

    /// Add a window, creating the session first if needed.
    pub async fn create_window(&mut self, session: &str, name: Option<&str>) -> Result<()> {
        if !self.has_session(session).await? {
            self.create_session(session, None, None).await?;
        }
        let mut line = format!("{} new-window -t {}", self.bin(), quote(session));
        if let Some(name) = name {
            line.push_str(&format!(" -n {}", quote(name)));
        }
        self.mutate(&line).await
    }

    /// No-op when the session or the window is absent.
    pub async fn kill_window(&mut self, session: &str, index: u32) -> Result<()> {
        if !self.get_windows(session).await?.contains_key(&index) {
            return Ok(());
        }
        let line = format!("{} kill-window -t {}:{}", self.bin(), quote(session), index);
        self.mutate(&line).await
    }

    /// Type `command` into the session followed by Enter.
    ///
    /// The session is created if missing. A given window must exist.
    /// `command` is sent as one literal token, so compound commands must be
    /// joined by the caller.
    pub async fn send_command(
        &mut self,
        session: &str,
        command: &str,
        window: Option<u32>,
    ) -> Result<()> {
        if !self.has_session(session).await? {
            self.create_session(session, None, None).await?;
        }

        let target = match window {
            None => quote(session),
            Some(index) => {
                if !self.get_windows(session).await?.contains_key(&index) {
                    return Err(ClusterizeError::WindowNotFound {
                        session: session.to_string(),
                        window: index,
                    });
                }
                format!("{}:{}", quote(session), index)
            }
        };

        let line = format!(
            "{} send-keys -t {} -- {} Enter",
            self.bin(),
            target,
            self.payload(command)
        );
        self.mutate(&line).await
    }
}
