//! On-disk project discovery.
//!
//! A project directory holds `cluster.yaml`, `project.yaml` and an empty
//! `.clusterize` marker.

use super::cluster::ClusterSpec;
use super::project::{Command, Environment, ProjectSpec};
use crate::errors::{ClusterizeError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MARKER_FILE: &str = ".clusterize";
pub const CLUSTER_FILE: &str = "cluster.yaml";
pub const PROJECT_FILE: &str = "project.yaml";

/// Paths of a discovered project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectData {
    pub name: String,
    pub directory: PathBuf,
    pub cluster: PathBuf,
    pub project: PathBuf,
}

impl ProjectData {
    pub fn load_cluster(&self) -> Result<ClusterSpec> {
        load_cluster(&self.cluster)
    }

    pub fn load_project(&self) -> Result<ProjectSpec> {
        load_project(&self.project)
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| ClusterizeError::io(path, e))
}

pub fn load_cluster(path: &Path) -> Result<ClusterSpec> {
    let text = read(path)?;
    ClusterSpec::from_yaml(&text).map_err(|e| ClusterizeError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

pub fn load_project(path: &Path) -> Result<ProjectSpec> {
    let text = read(path)?;
    ProjectSpec::from_yaml(&text).map_err(|e| ClusterizeError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn absolute(dir: &Path) -> Result<PathBuf> {
    let expanded = PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).into_owned());
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        let cwd = std::env::current_dir().map_err(|e| ClusterizeError::io(".", e))?;
        Ok(cwd.join(expanded))
    }
}

/// Load the project in `dir`.
///
/// Returns `Ok(None)` when the directory does not exist. Missing files and a
/// project name that differs from the cluster name are configuration errors.
pub fn load_project_data(dir: &Path) -> Result<Option<ProjectData>> {
    let directory = absolute(dir)?;
    if !directory.exists() {
        return Ok(None);
    }

    let cluster_path = directory.join(CLUSTER_FILE);
    let project_path = directory.join(PROJECT_FILE);

    for path in [&cluster_path, &project_path] {
        if !path.is_file() {
            return Err(ClusterizeError::config(format!(
                "missing {} in project directory '{}'",
                path.file_name().unwrap_or_default().to_string_lossy(),
                directory.display()
            )));
        }
    }

    let cluster = load_cluster(&cluster_path)?;
    let project = load_project(&project_path)?;

    if project.name != cluster.cluster_name {
        return Err(ClusterizeError::name_mismatch(
            &project.name,
            &cluster.cluster_name,
        ));
    }

    debug!(project = %project.name, dir = %directory.display(), "Loaded project");

    Ok(Some(ProjectData {
        name: project.name,
        directory,
        cluster: cluster_path,
        project: project_path,
    }))
}

/// Like [`load_project_data`] but a missing directory is an error.
pub fn require_project_data(dir: &Path) -> Result<ProjectData> {
    load_project_data(dir)?.ok_or_else(|| {
        ClusterizeError::config(format!("no project found in '{}'", dir.display()))
    })
}

/// All marked projects directly under `folder`, sorted by directory name.
pub fn find_projects(folder: &Path) -> Result<Vec<ProjectData>> {
    let folder = absolute(folder)?;
    let entries = std::fs::read_dir(&folder).map_err(|e| ClusterizeError::io(&folder, e))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ClusterizeError::io(&folder, e))?;
        let path = entry.path();
        if !path.is_dir() || !path.join(MARKER_FILE).exists() {
            continue;
        }
        match load_project_data(&path)? {
            Some(data) => found.push(data),
            None => {
                return Err(ClusterizeError::config(format!(
                    "project folder '{}' is malformed",
                    path.display()
                )));
            }
        }
    }

    found.sort_by(|a, b| a.directory.cmp(&b.directory));
    Ok(found)
}

/// Scaffold a new project directory `parent/name`.
pub fn create_project(parent: &Path, name: &str, head_ip: &str, user: &str) -> Result<ProjectData> {
    let directory = absolute(parent)?.join(name);
    if directory.exists() {
        return Err(ClusterizeError::config(format!(
            "project folder '{}' already exists",
            directory.display()
        )));
    }
    std::fs::create_dir_all(&directory).map_err(|e| ClusterizeError::io(&directory, e))?;

    let mut cluster = ClusterSpec {
        cluster_name: name.to_string(),
        ..ClusterSpec::default()
    };
    cluster.provider.head_ip = head_ip.to_string();
    cluster.auth.ssh_user = user.to_string();

    let project = ProjectSpec {
        name: name.to_string(),
        environment: Environment {
            dockerimage: "ubuntu:bionic".to_string(),
            shell: vec![r#"echo "Setting up the environment""#.to_string()],
        },
        commands: vec![Command::new(
            "default",
            r#"echo "Starting ray job" && wait 600"#,
        )],
        ..ProjectSpec::default()
    };

    write_yaml(&directory.join(CLUSTER_FILE), cluster.to_yaml())?;
    write_yaml(&directory.join(PROJECT_FILE), project.to_yaml())?;
    let marker = directory.join(MARKER_FILE);
    std::fs::write(&marker, "").map_err(|e| ClusterizeError::io(&marker, e))?;

    require_project_data(&directory)
}

fn write_yaml(path: &Path, yaml: std::result::Result<String, serde_yaml_ng::Error>) -> Result<()> {
    let text = yaml.map_err(|e| ClusterizeError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    std::fs::write(path, text).map_err(|e| ClusterizeError::io(path, e))
}
