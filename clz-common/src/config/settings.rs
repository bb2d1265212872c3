//! Tool settings: `config.toml` plus `CLZ_*` environment overrides.
//!
//! Environment parsing collects every invalid value instead of stopping at
//! the first one, so all problems can be reported together. Each invalid
//! variable keeps its default.

use crate::env::{BaseEnvironment, DEFAULT_ARTIFACT_DIR};
use crate::errors::{ClusterizeError, Result};
use crate::session::Multiplexer;
use crate::transport::KnownHostsPolicy;
use crate::types::{ExecOptions, GroupMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: u64,
        max: u64,
    },
}

/// Collecting parser for `CLZ_*` variables.
pub struct EnvParser {
    prefix: &'static str,
    vars: HashMap<String, String>,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Parser over the process environment.
    pub fn new() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Parser over an explicit variable set.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: "CLZ_",
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    pub fn get_string(&mut self, name: &str, default: &str) -> String {
        self.vars
            .get(&self.var_name(name))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Accepts 1/true/yes/on and 0/false/no/off/"".
    pub fn get_bool(&mut self, name: &str, default: bool) -> bool {
        let var_name = self.var_name(name);
        let Some(value) = self.vars.get(&var_name).cloned() else {
            return default;
        };
        match value.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "boolean (true/false/1/0/yes/no)".to_string(),
                    value,
                });
                default
            }
        }
    }

    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> u64 {
        let var_name = self.var_name(name);
        let Some(value) = self.vars.get(&var_name).cloned() else {
            return default;
        };
        match value.trim().parse::<u64>() {
            Ok(parsed) if (min..=max).contains(&parsed) => parsed,
            Ok(_) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value,
                    min,
                    max,
                });
                default
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned integer".to_string(),
                    value,
                });
                default
            }
        }
    }

    /// Parse a value with `FromStr`, recording an error on failure.
    pub fn get_parsed<T: std::str::FromStr>(&mut self, name: &str, default: T, expected: &str) -> T {
        let var_name = self.var_name(name);
        let Some(value) = self.vars.get(&var_name).cloned() else {
            return default;
        };
        match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: expected.to_string(),
                    value,
                });
                default
            }
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub multiplexer: Multiplexer,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            multiplexer: Multiplexer::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Bound on user and lifecycle commands. Unset (or 0) lets them run
    /// as long as they need.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Bound on the short calls the tool makes for itself: checks,
    /// listings, path resolution.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Contact group members concurrently.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            query_timeout_secs: default_query_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default)]
    pub known_hosts: KnownHostsPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    /// Per-node artifact directory, as a remote shell expression.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
        }
    }
}

/// clusterize settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub environment: EnvironmentSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_artifact_dir() -> String {
    DEFAULT_ARTIFACT_DIR.to_string()
}

impl Settings {
    /// `$XDG_CONFIG_HOME/clusterize/config.toml` (or the platform equivalent).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "clusterize")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .or_else(|| dirs::config_dir().map(|d| d.join("clusterize").join("config.toml")))
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ClusterizeError::io(path, e))?;
        toml::from_str(&text).map_err(|e| ClusterizeError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load the settings file (if present) and apply environment overrides.
    ///
    /// Returns the settings along with any invalid environment values.
    pub fn load(path: Option<&Path>) -> Result<(Self, Vec<EnvError>)> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut settings = match path {
            Some(ref p) if p.is_file() => Self::load_file(p)?,
            _ => Self::default(),
        };
        let mut parser = EnvParser::new();
        settings.apply_env(&mut parser);
        Ok((settings, parser.take_errors()))
    }

    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        self.general.log_level = parser.get_string("LOG_LEVEL", &self.general.log_level);
        self.general.multiplexer =
            parser.get_parsed("MULTIPLEXER", self.general.multiplexer, "byobu or tmux");
        let timeout_secs = self.execution.timeout_secs.unwrap_or(0);
        let timeout_secs = parser.get_u64_range("TIMEOUT_SECS", timeout_secs, 0, 604_800);
        self.execution.timeout_secs = (timeout_secs > 0).then_some(timeout_secs);
        self.execution.query_timeout_secs = parser.get_u64_range(
            "QUERY_TIMEOUT_SECS",
            self.execution.query_timeout_secs,
            1,
            3_600,
        );
        self.execution.connect_timeout_secs = parser.get_u64_range(
            "CONNECT_TIMEOUT_SECS",
            self.execution.connect_timeout_secs,
            1,
            600,
        );
        self.execution.parallel = parser.get_bool("PARALLEL", self.execution.parallel);
        self.ssh.known_hosts =
            parser.get_parsed("KNOWN_HOSTS", self.ssh.known_hosts, "strict, add or accept");
        self.environment.artifact_dir =
            parser.get_string("ARTIFACT_DIR", &self.environment.artifact_dir);
    }

    pub fn base_environment(&self) -> BaseEnvironment {
        BaseEnvironment::new(self.environment.artifact_dir.clone())
    }

    pub fn group_mode(&self) -> GroupMode {
        if self.execution.parallel {
            GroupMode::Parallel
        } else {
            GroupMode::Sequential
        }
    }

    /// Deadline for user and lifecycle commands; `None` is unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        self.execution
            .timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.query_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.execution.connect_timeout_secs)
    }

    /// Options for the tool's own short calls.
    pub fn query_options(&self) -> ExecOptions {
        ExecOptions::default().with_timeout(self.query_timeout())
    }

    /// Options for user and lifecycle commands.
    pub fn job_options(&self) -> ExecOptions {
        ExecOptions::default().with_deadline(self.timeout())
    }
}
