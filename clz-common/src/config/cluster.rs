//! Cluster description (`cluster.yaml`).
//!
//! The schema follows the Ray autoscaler layout so existing cluster files
//! can be reused. Only the fields the engine acts on are interpreted; the
//! rest is carried through so the bootstrap descriptor deployed to nodes is
//! complete.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// SSH credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(default)]
    pub ssh_user: String,
    #[serde(default = "default_private_key")]
    pub ssh_private_key: String,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            ssh_user: String::new(),
            ssh_private_key: default_private_key(),
        }
    }
}

fn default_private_key() -> String {
    "~/.ssh/id_rsa".to_string()
}

/// Where the nodes are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    #[serde(rename = "type", default = "default_provider_type")]
    pub kind: String,
    #[serde(default)]
    pub head_ip: String,
    #[serde(default)]
    pub worker_ips: Vec<String>,
}

impl Default for Provider {
    fn default() -> Self {
        Self {
            kind: default_provider_type(),
            head_ip: String::new(),
            worker_ips: Vec::new(),
        }
    }
}

fn default_provider_type() -> String {
    "local".to_string()
}

/// Container settings. Presence of this section makes the cluster containerized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerSpec {
    #[serde(default)]
    pub image: String,
    /// Empty means "use the cluster name".
    #[serde(default)]
    pub container_name: String,
    #[serde(default = "default_true")]
    pub pull_before_run: bool,
    #[serde(default)]
    pub run_options: Vec<String>,
    #[serde(default)]
    pub head_image: String,
    #[serde(default)]
    pub worker_image: String,
    #[serde(default)]
    pub head_run_options: Vec<String>,
    #[serde(default)]
    pub worker_run_options: Vec<String>,
}

impl Default for DockerSpec {
    fn default() -> Self {
        Self {
            image: String::new(),
            container_name: String::new(),
            pull_before_run: true,
            run_options: Vec::new(),
            head_image: String::new(),
            worker_image: String::new(),
            head_run_options: Vec::new(),
            worker_run_options: Vec::new(),
        }
    }
}

impl DockerSpec {
    /// Head image, falling back to the shared image.
    pub fn effective_head_image(&self) -> &str {
        if self.head_image.is_empty() {
            &self.image
        } else {
            &self.head_image
        }
    }

    /// Worker image, falling back to the shared image.
    pub fn effective_worker_image(&self) -> &str {
        if self.worker_image.is_empty() {
            &self.image
        } else {
            &self.worker_image
        }
    }
}

fn default_true() -> bool {
    true
}

/// Lifecycle command lists, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Initialization,
    Setup,
    HeadSetup,
    WorkerSetup,
    HeadStart,
    WorkerStart,
}

impl LifecyclePhase {
    pub const ALL: [LifecyclePhase; 6] = [
        Self::Initialization,
        Self::Setup,
        Self::HeadSetup,
        Self::WorkerSetup,
        Self::HeadStart,
        Self::WorkerStart,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Setup => "setup",
            Self::HeadSetup => "head-setup",
            Self::WorkerSetup => "worker-setup",
            Self::HeadStart => "head-start",
            Self::WorkerStart => "worker-start",
        }
    }
}

/// A cluster: head, workers, credentials, optional docker and lifecycle commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub auth: Auth,
    /// Per-role credential override; `None` means `auth`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_auth: Option<Auth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_auth: Option<Auth>,
    #[serde(default)]
    pub max_workers: u32,
    #[serde(default)]
    pub min_workers: u32,
    #[serde(default)]
    pub head_node: BTreeMap<String, String>,
    #[serde(default)]
    pub worker_nodes: BTreeMap<String, String>,
    #[serde(default)]
    pub file_mounts: BTreeMap<String, String>,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerSpec>,

    #[serde(default)]
    pub initialization_commands: Vec<String>,
    #[serde(default)]
    pub setup_commands: Vec<String>,
    #[serde(default)]
    pub head_setup_commands: Vec<String>,
    #[serde(default)]
    pub worker_setup_commands: Vec<String>,
    #[serde(default)]
    pub head_start_ray_commands: Vec<String>,
    #[serde(default)]
    pub worker_start_ray_commands: Vec<String>,

    #[serde(default = "default_initial_workers")]
    pub initial_workers: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_minutes: u32,
    #[serde(default = "default_autoscaling_mode")]
    pub autoscaling_mode: String,
    #[serde(default = "default_utilization")]
    pub target_utilization_fraction: f64,
}

impl Default for ClusterSpec {
    fn default() -> Self {
        Self {
            cluster_name: String::new(),
            auth: Auth::default(),
            head_auth: None,
            worker_auth: None,
            max_workers: 0,
            min_workers: 0,
            head_node: BTreeMap::new(),
            worker_nodes: BTreeMap::new(),
            file_mounts: BTreeMap::new(),
            provider: Provider::default(),
            docker: None,
            initialization_commands: Vec::new(),
            setup_commands: Vec::new(),
            head_setup_commands: Vec::new(),
            worker_setup_commands: Vec::new(),
            head_start_ray_commands: Vec::new(),
            worker_start_ray_commands: Vec::new(),
            initial_workers: default_initial_workers(),
            idle_timeout_minutes: default_idle_timeout(),
            autoscaling_mode: default_autoscaling_mode(),
            target_utilization_fraction: default_utilization(),
        }
    }
}

fn default_initial_workers() -> u32 {
    1
}

fn default_idle_timeout() -> u32 {
    5
}

fn default_autoscaling_mode() -> String {
    "default".to_string()
}

fn default_utilization() -> f64 {
    1.0
}

impl ClusterSpec {
    pub fn head_auth(&self) -> &Auth {
        self.head_auth.as_ref().unwrap_or(&self.auth)
    }

    pub fn worker_auth(&self) -> &Auth {
        self.worker_auth.as_ref().unwrap_or(&self.auth)
    }

    pub fn commands(&self, phase: LifecyclePhase) -> &[String] {
        match phase {
            LifecyclePhase::Initialization => &self.initialization_commands,
            LifecyclePhase::Setup => &self.setup_commands,
            LifecyclePhase::HeadSetup => &self.head_setup_commands,
            LifecyclePhase::WorkerSetup => &self.worker_setup_commands,
            LifecyclePhase::HeadStart => &self.head_start_ray_commands,
            LifecyclePhase::WorkerStart => &self.worker_start_ray_commands,
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml_ng::Error> {
        serde_yaml_ng::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml_ng::Error> {
        serde_yaml_ng::to_string(self)
    }
}
