//! Shipping local files to cluster nodes.

use crate::error::CliError;
use anyhow::{Context as _, Result};
use clz_common::config::Resource;
use clz_common::docker::{BOOTSTRAP_FILE, CLUSTER_KEY_FILE, artifact_path};
use clz_common::env::CLUSTERIZE_DIR;
use clz_common::{
    Connection, ContainerizedClusterSpec, EnvLayer, ExecOptions, Group, RemoteTransport,
};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A resource with a checked local source and an absolute remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    pub source: PathBuf,
    pub destination: String,
}

impl ResolvedResource {
    /// Remote path of the uploaded file.
    pub fn remote_path(&self) -> String {
        let file = self
            .source
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/{}", self.destination.trim_end_matches('/'), file)
    }
}

/// Local source of a resource: `~` expanded, relative to the project directory.
pub fn resolve_source(project_dir: &Path, source: &str) -> Result<PathBuf> {
    let expanded = PathBuf::from(shellexpand::tilde(source).into_owned());
    let path = if expanded.is_absolute() {
        expanded
    } else {
        project_dir.join(expanded)
    };
    if !path.is_file() {
        return Err(CliError::ResourceNotFound { path }.into());
    }
    Ok(path)
}

/// Expand a destination on the node itself, where session variables live.
pub async fn resolve_destination<T: RemoteTransport>(
    node: &mut Connection<T>,
    resource: &Resource,
    env: &EnvLayer,
    opts: &ExecOptions,
) -> Result<String> {
    let result = node
        .execute(&format!("echo {}", resource.destination), env, opts)
        .await?;
    let resolved = result.stdout.trim().to_string();
    if !resolved.starts_with('/') {
        return Err(CliError::RelativeDestination {
            source_file: resource.source.clone(),
            destination: resource.destination.clone(),
            resolved,
        }
        .into());
    }
    Ok(resolved)
}

/// Copy every resource of a command into its destination directory on `node`.
pub async fn deploy_resources<T: RemoteTransport>(
    node: &mut Connection<T>,
    project_dir: &Path,
    resources: &[Resource],
    env: &EnvLayer,
    opts: &ExecOptions,
) -> Result<Vec<ResolvedResource>> {
    let mut deployed = Vec::with_capacity(resources.len());
    for resource in resources {
        let source = resolve_source(project_dir, &resource.source)?;
        let destination = resolve_destination(node, resource, env, opts).await?;
        let resolved = ResolvedResource {
            source,
            destination,
        };

        let mkdir = format!(
            "mkdir -p {}",
            shell_escape::unix::escape(resolved.destination.as_str().into())
        );
        node.execute(&mkdir, &EnvLayer::new(), opts).await?;

        let remote = resolved.remote_path();
        debug!(source = %resolved.source.display(), remote = %remote, "Deploying resource");
        node.transport()
            .upload(node.address(), &resolved.source, &remote)
            .await
            .with_context(|| format!("Failed to deploy {}", resolved.source.display()))?;
        deployed.push(resolved);
    }
    Ok(deployed)
}

/// Place the bootstrap descriptor and the cluster key in every node's
/// artifact directory.
pub async fn deploy_cluster_resources<T: RemoteTransport>(
    nodes: &mut Group<T>,
    spec: &ContainerizedClusterSpec,
    env: &EnvLayer,
    opts: &ExecOptions,
) -> Result<()> {
    let mut bootstrap = tempfile::Builder::new()
        .prefix("cluster_bootstrap")
        .suffix(".yaml")
        .tempfile()
        .context("Failed to create the bootstrap file")?;
    bootstrap
        .write_all(spec.bootstrap_yaml()?.as_bytes())
        .context("Failed to write the bootstrap file")?;

    // The artifact directory is a remote expression; resolve it per node.
    let mkdir_echo = format!("mkdir -p \"${CLUSTERIZE_DIR}\" && echo \"${CLUSTERIZE_DIR}\"");
    let dirs = nodes.execute(&mkdir_echo, env, opts).await?;

    for result in dirs.iter() {
        let dir = result.stdout.trim();
        let node = &result.node;
        nodes
            .transport()
            .upload(node, bootstrap.path(), &artifact_path(dir, BOOTSTRAP_FILE))
            .await
            .with_context(|| format!("Failed to deploy the bootstrap file to {node}"))?;
        if let Some(key) = &node.private_key {
            nodes
                .transport()
                .upload(node, key, &artifact_path(dir, CLUSTER_KEY_FILE))
                .await
                .with_context(|| format!("Failed to deploy the cluster key to {node}"))?;
        }
        info!(node = %node, dir = %dir, "Deployed cluster resources");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clz_common::{MockTransport, NodeAddress, RawOutput};
    use std::sync::Arc;

    fn resource(source: &str, destination: &str) -> Resource {
        Resource {
            source: source.to_string(),
            destination: destination.to_string(),
        }
    }

    #[test]
    fn test_resolve_source_relative_to_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.csv"), "a,b\n").unwrap();

        let resolved = resolve_source(dir.path(), "data.csv").unwrap();
        assert_eq!(resolved, dir.path().join("data.csv"));
        assert!(resolve_source(dir.path(), "missing.csv").is_err());
        // Directories are not resources.
        assert!(resolve_source(dir.path(), ".").is_err());
    }

    #[tokio::test]
    async fn test_relative_destination_rejected() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("echo data", RawOutput::success("data\n"));
        let mut head = Connection::new(NodeAddress::unresolved("h", "ops"), Arc::clone(&mock));

        let err = resolve_destination(
            &mut head,
            &resource("x.csv", "data"),
            &EnvLayer::new(),
            &ExecOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not absolute"));
    }

    #[tokio::test]
    async fn test_deploy_resources_uploads_into_destination() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weights.bin"), [0u8; 4]).unwrap();

        let mock = Arc::new(MockTransport::new());
        mock.respond(
            "echo $SESSION_DIR/in",
            RawOutput::success("/home/ops/.clusterize/exp/s1/in\n"),
        );
        let mut head = Connection::new(NodeAddress::unresolved("h", "ops"), Arc::clone(&mock));
        let env = EnvLayer::new().with("SESSION_DIR", "$PROJECT_DIR/s1");

        let deployed = deploy_resources(
            &mut head,
            dir.path(),
            &[resource("weights.bin", "$SESSION_DIR/in")],
            &env,
            &ExecOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(deployed.len(), 1);
        assert_eq!(
            mock.commands_for("h")[1],
            "mkdir -p /home/ops/.clusterize/exp/s1/in"
        );
        assert_eq!(
            mock.uploads(),
            vec![(
                "h".to_string(),
                dir.path().join("weights.bin"),
                "/home/ops/.clusterize/exp/s1/in/weights.bin".to_string()
            )]
        );
    }
}
