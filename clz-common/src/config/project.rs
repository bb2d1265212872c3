//! Project description (`project.yaml`).

use crate::env::EnvLayer;
use serde::{Deserialize, Serialize};

/// Shell template used when a command has no override.
pub const DEFAULT_SHELL: &str = "/bin/bash -c {}";

/// Pointer to the cluster file, relative to the project directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRef {
    #[serde(default = "default_cluster_config")]
    pub config: String,
}

impl Default for ClusterRef {
    fn default() -> Self {
        Self {
            config: default_cluster_config(),
        }
    }
}

fn default_cluster_config() -> String {
    "cluster.yaml".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub dockerimage: String,
    #[serde(default)]
    pub shell: Vec<String>,
}

/// A local file shipped to the head before a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub source: String,
    /// May reference session variables such as `$SESSION_DIR`.
    pub destination: String,
}

/// A named project command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub run: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Literal shell template with a `{}` placeholder for the quoted body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default)]
    pub env: EnvLayer,
    #[serde(default)]
    pub deploy: Vec<Resource>,
}

impl Command {
    pub fn new(name: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            name: Some(name.into()),
            shell: None,
            env: EnvLayer::new(),
            deploy: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Render the final command line with [`DEFAULT_SHELL`] as fallback template.
    pub fn expand(&self) -> String {
        self.expand_with(DEFAULT_SHELL)
    }

    /// Substitute the shell-quoted, trimmed body into the template's `{}`.
    pub fn expand_with(&self, default_shell: &str) -> String {
        let template = self.shell.as_deref().unwrap_or(default_shell);
        let quoted = shell_escape::unix::escape(self.run.trim().into());
        template.replacen("{}", &quoted, 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub url: String,
    #[serde(rename = "type", default = "default_repo_type")]
    pub kind: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_repo_type() -> String {
    "git".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

/// A project: named commands, setup steps and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cluster: ClusterRef,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub setup: Vec<Command>,
    #[serde(default)]
    pub env: EnvLayer,
    #[serde(default)]
    pub repos: Vec<Repository>,
}

impl ProjectSpec {
    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands
            .iter()
            .find(|c| c.name.as_deref() == Some(name))
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml_ng::Error> {
        serde_yaml_ng::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml_ng::Error> {
        serde_yaml_ng::to_string(self)
    }
}

/// Setup commands with the project env overlaid by each command's own env.
pub fn project_commands(project: &ProjectSpec) -> Vec<Command> {
    project
        .setup
        .iter()
        .map(|cmd| {
            let mut env = project.env.clone();
            env.extend(&cmd.env);
            Command {
                env,
                ..cmd.clone()
            }
        })
        .collect()
}
