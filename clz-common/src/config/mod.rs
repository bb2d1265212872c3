//! Configuration: cluster and project files, discovery and tool settings.

pub mod cluster;
pub mod discovery;
pub mod project;
pub mod settings;

pub use cluster::{Auth, ClusterSpec, DockerSpec, LifecyclePhase, Provider};
pub use discovery::{
    CLUSTER_FILE, MARKER_FILE, PROJECT_FILE, ProjectData, create_project, find_projects,
    load_cluster, load_project, load_project_data, require_project_data,
};
pub use project::{Command, DEFAULT_SHELL, ProjectSpec, Resource, project_commands};
pub use settings::{EnvError, EnvParser, Settings};
