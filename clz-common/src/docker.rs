//! Containerization of cluster lifecycles and project commands.
//!
//! Every node runs one container with the same name (explicit
//! `docker.container_name`, else the cluster name). Setup and start commands
//! are rewritten to run inside it through `docker exec`. Only variable
//! *names* are passed with `-e`; the values come from the host shell that
//! already exported them, so they never show up on a `docker` command line.

use crate::config::cluster::{ClusterSpec, DockerSpec};
use crate::config::project::Command;
use crate::env::{CLUSTERIZE_DIR, EnvLayer};
use crate::errors::{ClusterizeError, Result};
use crate::types::GroupResult;
use std::ops::Deref;
use std::path::PathBuf;

/// Label set on every container started by clusterize.
pub const LABEL: &str = "clusterize";
/// Label carrying the owning cluster name.
pub const PROJECT_LABEL: &str = "clusterize.project";
/// Worker-only variable pointing at the head.
pub const HEAD_IP_VAR: &str = "RAY_HEAD_IP";

/// Rewritten cluster descriptor, deployed to every node's artifact directory.
pub const BOOTSTRAP_FILE: &str = "cluster_bootstrap.yaml";
/// Shared private key for inter-node trust, deployed next to the descriptor.
pub const CLUSTER_KEY_FILE: &str = "cluster_ssh_key.pem";

/// `<artifact dir>/<file>` as a remote path expression.
pub fn artifact_path(artifact_dir: &str, file: &str) -> String {
    format!("{}/{}", artifact_dir.trim_end_matches('/'), file)
}

fn docker_section(cluster: &ClusterSpec) -> Result<&DockerSpec> {
    cluster
        .docker
        .as_ref()
        .ok_or_else(|| ClusterizeError::docker_missing(&cluster.cluster_name))
}

/// Container name used on every node of `cluster`.
pub fn container_name(cluster: &ClusterSpec) -> Result<String> {
    let docker = docker_section(cluster)?;
    Ok(if docker.container_name.trim().is_empty() {
        cluster.cluster_name.clone()
    } else {
        docker.container_name.clone()
    })
}

/// Whether `cmd` needs a sub-shell to survive the `docker exec` boundary.
///
/// Any separator, pipe, redirection or substitution triggers it. This is a
/// lexical check, not a shell parser.
pub fn needs_subshell(cmd: &str) -> bool {
    cmd.contains(['&', ';', '|', '<', '>', '`']) || cmd.contains("$(")
}

fn env_flags<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    names.into_iter().map(|name| format!("-e {name}")).collect()
}

/// Rewrap `cmd` to run inside `container`, re-exporting `env_names`.
pub fn wrap_in_docker(cmd: &str, container: &str, env_names: &[&str]) -> String {
    let mut parts = vec!["docker exec -t".to_string()];
    parts.extend(env_flags(env_names.iter().copied()));
    parts.push(container.to_string());
    if needs_subshell(cmd) {
        parts.push(format!("/bin/sh -c {}", shell_escape::unix::escape(cmd.into())));
    } else {
        parts.push(cmd.to_string());
    }
    parts.join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Head,
    Worker,
}

fn start_commands(
    cluster: &ClusterSpec,
    docker: &DockerSpec,
    container: &str,
    env_names: &[&str],
    role: Role,
) -> Vec<String> {
    let (image, role_options) = match role {
        Role::Head => (docker.effective_head_image(), &docker.head_run_options),
        Role::Worker => (docker.effective_worker_image(), &docker.worker_run_options),
    };

    let mut commands = Vec::new();
    if docker.pull_before_run {
        commands.push(format!("docker pull {image}"));
    }

    let mut run = vec![
        "docker run -t --rm -d".to_string(),
        format!("--name {container}"),
        format!("-l {LABEL}"),
        format!("-l {PROJECT_LABEL}={}", cluster.cluster_name),
        "--net host".to_string(),
        format!("-v ${CLUSTERIZE_DIR}:${CLUSTERIZE_DIR}"),
        "-e LC_ALL=C.UTF-8 -e LANG=C.UTF-8".to_string(),
    ];
    run.extend(env_flags(env_names.iter().copied()));
    if role == Role::Worker {
        run.push(format!("-e {HEAD_IP_VAR}={}", cluster.provider.head_ip));
    }
    run.extend(
        docker
            .run_options
            .iter()
            .chain(role_options.iter())
            .filter(|opt| !opt.trim().is_empty())
            .cloned(),
    );
    run.push(format!("{image} bash"));
    commands.push(run.join(" "));
    commands
}

/// A cluster whose lifecycle runs inside containers.
///
/// Derived per execution and never written back to the project files.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerizedClusterSpec {
    spec: ClusterSpec,
    container_name: String,
}

impl ContainerizedClusterSpec {
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    pub fn into_spec(self) -> ClusterSpec {
        self.spec
    }

    /// YAML of the rewritten descriptor, for [`BOOTSTRAP_FILE`].
    pub fn bootstrap_yaml(&self) -> Result<String> {
        self.spec.to_yaml().map_err(|e| ClusterizeError::Parse {
            path: PathBuf::from(BOOTSTRAP_FILE),
            message: e.to_string(),
        })
    }
}

impl Deref for ContainerizedClusterSpec {
    type Target = ClusterSpec;

    fn deref(&self) -> &ClusterSpec {
        &self.spec
    }
}

/// Rewrite the lifecycle of `cluster` to run in containers.
///
/// Head and worker setup lists gain the pull and run commands; their
/// existing entries and both start lists are wrapped with `docker exec`.
/// Initialization and setup lists run before any container exists and are
/// left alone. `cluster` itself is not modified.
pub fn containerize(cluster: &ClusterSpec, env: &EnvLayer) -> Result<ContainerizedClusterSpec> {
    let docker = docker_section(cluster)?;
    let container = container_name(cluster)?;
    let env_names: Vec<&str> = env.keys().collect();

    let wrap_all = |commands: &[String]| -> Vec<String> {
        commands
            .iter()
            .map(|cmd| wrap_in_docker(cmd, &container, &env_names))
            .collect()
    };

    let mut head_setup = start_commands(cluster, docker, &container, &env_names, Role::Head);
    head_setup.extend(wrap_all(&cluster.head_setup_commands));

    let mut worker_setup = start_commands(cluster, docker, &container, &env_names, Role::Worker);
    worker_setup.extend(wrap_all(&cluster.worker_setup_commands));

    let spec = ClusterSpec {
        head_setup_commands: head_setup,
        worker_setup_commands: worker_setup,
        head_start_ray_commands: wrap_all(&cluster.head_start_ray_commands),
        worker_start_ray_commands: wrap_all(&cluster.worker_start_ray_commands),
        ..cluster.clone()
    };

    Ok(ContainerizedClusterSpec {
        spec,
        container_name: container,
    })
}

/// Point a project command's shell template into the cluster container.
///
/// Commands with their own `shell` are returned unchanged. The exported
/// names are the command's env keys followed by `env`'s.
pub fn dockerize_command(command: &Command, cluster: &ClusterSpec, env: &EnvLayer) -> Result<Command> {
    if command.shell.is_some() {
        return Ok(command.clone());
    }
    let container = container_name(cluster)?;

    let mut names: Vec<&str> = Vec::new();
    for name in command.env.keys().chain(env.keys()) {
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let mut parts = vec!["docker exec -t".to_string()];
    parts.extend(env_flags(names));
    parts.push(container);
    parts.push("/bin/sh -c {}".to_string());

    Ok(Command {
        shell: Some(parts.join(" ")),
        ..command.clone()
    })
}

pub fn dockerize_commands(
    commands: &[Command],
    cluster: &ClusterSpec,
    env: &EnvLayer,
) -> Result<Vec<Command>> {
    commands
        .iter()
        .map(|cmd| dockerize_command(cmd, cluster, env))
        .collect()
}

/// Lists containers named exactly `name`; prints nothing when none runs.
pub fn running_container_query(name: &str) -> String {
    format!("docker ps -f 'name=^{name}$' --format '{{{{.Names}}}}'")
}

/// Fail if any node answered the query with a running container.
pub fn ensure_no_running_container(container: &str, running: &GroupResult) -> Result<()> {
    let hosts: Vec<String> = running
        .iter()
        .filter(|r| !r.stdout.trim().is_empty())
        .map(|r| r.node.host.clone())
        .collect();
    if hosts.is_empty() {
        Ok(())
    } else {
        Err(ClusterizeError::ContainerConflict {
            container: container.to_string(),
            hosts,
        })
    }
}

/// Stop labeled containers: all of clusterize's, or one cluster's.
///
/// Succeeds when nothing is running.
pub fn stop_containers_command(project: Option<&str>) -> String {
    let list = match project {
        None => format!("docker ps -q -f label={LABEL}"),
        Some(name) => format!("docker ps -q -f label={PROJECT_LABEL}={name}"),
    };
    format!(r#"[ -n "$({list})" ] && docker stop $({list}) || true"#)
}
