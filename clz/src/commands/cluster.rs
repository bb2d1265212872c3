//! `clusterize cluster ...`: lifecycle, topology and ad-hoc execution.

use super::deploy::deploy_cluster_resources;
use super::helpers::{TreeNode, format_tree};
use super::{Context, LoadedProject};
use crate::error::CliError;
use anyhow::{Context as _, Result};
use clz_common::config::LifecyclePhase;
use clz_common::docker::{
    container_name, ensure_no_running_container, running_container_query,
    stop_containers_command, wrap_in_docker,
};
use clz_common::{
    ClusterSpec, ClusterizeError, Connection, EnvLayer, ExecOptions, NodeAddress,
    RemoteTransport, SessionManager, Target, TargetResolver, containerize,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Which nodes run the commands of a lifecycle phase.
pub fn phase_target(phase: LifecyclePhase) -> Target {
    match phase {
        LifecyclePhase::Initialization | LifecyclePhase::Setup => Target::Cluster,
        LifecyclePhase::HeadSetup | LifecyclePhase::HeadStart => Target::Head,
        LifecyclePhase::WorkerSetup | LifecyclePhase::WorkerStart => Target::Workers,
    }
}

async fn run_phase<T: RemoteTransport>(
    resolver: &TargetResolver<'_, T>,
    phase: LifecyclePhase,
    env: &EnvLayer,
    opts: &ExecOptions,
) -> Result<()> {
    let cluster = resolver.cluster();
    let commands = cluster.commands(phase);
    let target = phase_target(phase);
    if commands.is_empty() || (target == Target::Workers && cluster.provider.worker_ips.is_empty())
    {
        debug!(phase = phase.name(), "Nothing to run");
        return Ok(());
    }

    info!(phase = phase.name(), target = %target, "Running lifecycle phase");
    let mut executor = resolver.resolve(target)?;
    let mut outcome = Ok(());
    for command in commands {
        if let Err(e) = executor.execute(command, env, opts).await {
            outcome = Err(e);
            break;
        }
    }
    executor.close().await;
    outcome.with_context(|| format!("{} phase failed", phase.name()))
}

/// Containerize, check, deploy and bring the cluster up.
pub async fn start<T: RemoteTransport>(
    ctx: &Context<T>,
    dir: &Path,
    session: Option<&str>,
) -> Result<()> {
    let loaded = LoadedProject::load(dir)?;
    let session = loaded.session_name(session);
    let env = ctx.session_env(loaded.name(), &session, &EnvLayer::new());

    let spec = containerize(&loaded.cluster, &env)?;
    let resolver = ctx.resolver(spec.spec());
    let mut nodes = resolver.whole_cluster()?;

    let prepared: Result<()> = async {
        let running = nodes
            .execute(
                &running_container_query(spec.container_name()),
                &EnvLayer::new(),
                &ctx.query_opts(),
            )
            .await?;
        ensure_no_running_container(spec.container_name(), &running)?;
        deploy_cluster_resources(&mut nodes, &spec, &env, &ctx.query_opts()).await
    }
    .await;
    nodes.close().await;
    prepared?;

    for phase in LifecyclePhase::ALL {
        run_phase(&resolver, phase, &env, &ctx.visible_opts()).await?;
    }
    println!(
        "Cluster '{}' started (container '{}')",
        loaded.name(),
        spec.container_name()
    );
    Ok(())
}

/// Stop the project's containers, or every clusterize container with `all`.
pub async fn stop<T: RemoteTransport>(ctx: &Context<T>, dir: &Path, all: bool) -> Result<()> {
    let loaded = LoadedProject::load(dir)?;
    if loaded.cluster.docker.is_none() {
        return Err(ClusterizeError::docker_missing(&loaded.cluster.cluster_name).into());
    }

    let command = stop_containers_command((!all).then_some(loaded.cluster.cluster_name.as_str()));
    let resolver = ctx.resolver(&loaded.cluster);
    let mut nodes = resolver.whole_cluster()?;
    let outcome = nodes.execute(&command, &EnvLayer::new(), &ctx.job_opts()).await;
    nodes.close().await;
    outcome?;

    println!("Stopped containers of '{}'", loaded.name());
    Ok(())
}

/// Hardware summary of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub cpus: u32,
    pub gpus: u32,
}

fn parse_count(stdout: &str) -> u32 {
    stdout.trim().parse().unwrap_or(0)
}

async fn inspect_node<T: RemoteTransport>(
    ctx: &Context<T>,
    address: NodeAddress,
) -> Result<NodeInfo> {
    let mut node = Connection::new(address, Arc::clone(&ctx.transport));
    let env = EnvLayer::new();
    let opts = ctx.query_opts();
    let tolerant = opts.clone().allow_failures();

    let info = async {
        let nproc = node.execute("nproc", &env, &opts).await?;
        let which = node.execute("which nvidia-settings", &env, &tolerant).await?;
        let mut gpus = 0;
        if which.success() {
            let smi = node
                .execute(
                    "nvidia-smi --query-gpu=name --format=csv,noheader | wc -l",
                    &env,
                    &tolerant,
                )
                .await?;
            if smi.success() {
                gpus = parse_count(&smi.stdout);
            }
        }
        Ok::<_, ClusterizeError>(NodeInfo {
            cpus: parse_count(&nproc.stdout),
            gpus,
        })
    }
    .await;
    node.close().await;
    Ok(info?)
}

pub fn node_label(address: &NodeAddress, info: Option<NodeInfo>) -> String {
    let mut label = format!("{}@{}", address.user, address.host);
    if let Some(info) = info {
        label.push_str(&format!(" (CPU={}, GPU={})", info.cpus, info.gpus));
    }
    label
}

/// Project, head and workers as a tree; `full` inspects every node.
pub async fn topology_tree<T: RemoteTransport>(
    ctx: &Context<T>,
    name: &str,
    cluster: &ClusterSpec,
    full: bool,
) -> Result<TreeNode> {
    let resolver = ctx.resolver(cluster);
    let head = resolver.head_address()?;
    let workers = resolver.worker_addresses();

    let mut describe = Vec::with_capacity(workers.len() + 1);
    for address in std::iter::once(&head).chain(workers.iter()) {
        let info = if full {
            Some(
                inspect_node(ctx, address.clone())
                    .await
                    .with_context(|| format!("Failed to inspect {address}"))?,
            )
        } else {
            None
        };
        describe.push(TreeNode::new(node_label(address, info)));
    }
    let worker_nodes = describe.split_off(1);

    Ok(TreeNode::with_children(
        name,
        vec![
            TreeNode::with_children("Head", describe),
            TreeNode::with_children("Workers", worker_nodes),
        ],
    ))
}

pub async fn topology<T: RemoteTransport>(ctx: &Context<T>, dir: &Path, full: bool) -> Result<()> {
    let loaded = LoadedProject::load(dir)?;
    let tree = topology_tree(ctx, loaded.name(), &loaded.cluster, full).await?;
    println!("{}", format_tree(&tree));
    Ok(())
}

/// Arguments of `cluster execute`.
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    pub command: String,
    pub args: Vec<String>,
    pub on: Target,
    pub session: Option<String>,
    pub docker: bool,
    pub tmux: bool,
}

impl ExecuteRequest {
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run an ad-hoc command on a target, optionally in the container or in a
/// persistent session on the head.
pub async fn execute<T: RemoteTransport>(
    ctx: &Context<T>,
    dir: &Path,
    request: &ExecuteRequest,
) -> Result<()> {
    if request.tmux && request.on != Target::Head {
        return Err(CliError::Usage(format!(
            "persistent sessions can only run on HEAD, not {}",
            request.on
        ))
        .into());
    }

    let loaded = LoadedProject::load(dir)?;
    let session = loaded.session_name(request.session.as_deref());
    let env = ctx.session_env(loaded.name(), &session, &EnvLayer::new());

    let mut line = request.command_line();
    if request.docker {
        let container = container_name(&loaded.cluster)?;
        let names: Vec<&str> = env.keys().collect();
        line = wrap_in_docker(&line, &container, &names);
    }

    let resolver = ctx.resolver(&loaded.cluster);
    if request.tmux {
        let session_name = format!("{}_{}", loaded.name(), request.command);
        let mut head = resolver.head()?;
        let created = SessionManager::new(&mut head, ctx.multiplexer())
            .with_env(env)
            .with_options(ctx.query_opts())
            .create_session(&session_name, None, Some(&line))
            .await;
        head.close().await;
        created?;
        println!("Started '{line}' in session '{session_name}'");
        return Ok(());
    }

    let mut executor = resolver.resolve(request.on)?;
    let outcome = executor.execute(&line, &env, &ctx.visible_opts()).await;
    executor.close().await;
    outcome?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clz_common::config::discovery::create_project;
    use clz_common::config::DockerSpec;
    use clz_common::{MockTransport, RawOutput, Settings};
    use std::time::Duration;

    fn context(mock: &Arc<MockTransport>) -> Context<MockTransport> {
        Context::new(Arc::clone(mock), Settings::default())
    }

    fn project_with_workers(docker: bool) -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let data = create_project(tmp.path(), "exp", "10.0.0.1", "ops").unwrap();
        let mut cluster = data.load_cluster().unwrap();
        cluster.provider.worker_ips = vec!["10.0.0.2".to_string()];
        cluster.auth.ssh_private_key = "/nonexistent/key".to_string();
        cluster.head_start_ray_commands = vec!["ray start --head".to_string()];
        if docker {
            cluster.docker = Some(DockerSpec {
                image: "ubuntu:20.04".to_string(),
                ..DockerSpec::default()
            });
        }
        std::fs::write(&data.cluster, cluster.to_yaml().unwrap()).unwrap();
        (tmp, data.directory)
    }

    #[test]
    fn test_phase_targets() {
        assert_eq!(phase_target(LifecyclePhase::Setup), Target::Cluster);
        assert_eq!(phase_target(LifecyclePhase::HeadStart), Target::Head);
        assert_eq!(phase_target(LifecyclePhase::WorkerSetup), Target::Workers);
    }

    #[tokio::test]
    async fn test_topology_with_node_details() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("nproc", RawOutput::success("8\n"))
            .respond("which nvidia-settings", RawOutput::new(1, "", ""))
            .respond_on("10.0.0.1", "which nvidia-settings", RawOutput::success("/usr/bin/nvidia-settings\n"))
            .respond_on("10.0.0.1", "nvidia-smi", RawOutput::success("2\n"));
        let (_tmp, dir) = project_with_workers(false);
        let loaded = LoadedProject::load(&dir).unwrap();

        let tree = topology_tree(&context(&mock), "exp", &loaded.cluster, true)
            .await
            .unwrap();
        assert_eq!(tree.children[0].children[0].label, "ops@10.0.0.1 (CPU=8, GPU=2)");
        assert_eq!(tree.children[1].children[0].label, "ops@10.0.0.2 (CPU=8, GPU=0)");
        assert_eq!(mock.disconnects(), 2);
    }

    #[tokio::test]
    async fn test_topology_without_details_contacts_nothing() {
        let mock = Arc::new(MockTransport::new());
        let (_tmp, dir) = project_with_workers(false);
        let loaded = LoadedProject::load(&dir).unwrap();

        let tree = topology_tree(&context(&mock), "exp", &loaded.cluster, false)
            .await
            .unwrap();
        assert_eq!(tree.children[1].children[0].label, "ops@10.0.0.2");
        assert!(mock.connects().is_empty());
    }

    #[tokio::test]
    async fn test_start_requires_docker() {
        let mock = Arc::new(MockTransport::new());
        let (_tmp, dir) = project_with_workers(false);
        let err = start(&context(&mock), &dir, None).await.unwrap_err();
        let cause = err.downcast_ref::<ClusterizeError>().unwrap();
        assert!(cause.is_configuration());
        assert!(mock.connects().is_empty());
    }

    #[tokio::test]
    async fn test_start_runs_phases_in_order() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("echo \"$CLUSTERIZE_DIR\"", RawOutput::success("/home/ops/.clusterize\n"));
        let (_tmp, dir) = project_with_workers(true);

        start(&context(&mock), &dir, None).await.unwrap();

        let head = mock.commands_for("10.0.0.1");
        assert!(head[0].contains("docker ps -f 'name=^exp$'"));
        assert!(head[1].contains("mkdir -p \"$CLUSTERIZE_DIR\""));
        assert!(head[2].ends_with("docker pull ubuntu:20.04"));
        assert!(head[3].contains("docker run -t --rm -d --name exp"));
        assert!(head[4].ends_with("exp ray start --head"));
        assert_eq!(head.len(), 5);

        let worker = mock.commands_for("10.0.0.2");
        assert!(worker[3].contains("-e RAY_HEAD_IP=10.0.0.1"));

        let uploads = mock.uploads();
        assert_eq!(uploads.len(), 2);
        assert!(uploads.iter().all(|(_, _, remote)| remote
            == "/home/ops/.clusterize/cluster_bootstrap.yaml"));
    }

    #[tokio::test]
    async fn test_start_refuses_running_container() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_on("10.0.0.2", "docker ps -f", RawOutput::success("exp\n"));
        let (_tmp, dir) = project_with_workers(true);

        let err = start(&context(&mock), &dir, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusterizeError>(),
            Some(ClusterizeError::ContainerConflict { .. })
        ));
        assert!(mock.uploads().is_empty());
        assert_eq!(mock.disconnects(), 2);
    }

    #[tokio::test]
    async fn test_execute_tmux_only_on_head() {
        let mock = Arc::new(MockTransport::new());
        let (_tmp, dir) = project_with_workers(false);
        let request = ExecuteRequest {
            command: "htop".to_string(),
            on: Target::Workers,
            tmux: true,
            ..ExecuteRequest::default()
        };
        assert!(execute(&context(&mock), &dir, &request).await.is_err());
        assert!(mock.connects().is_empty());
    }

    #[tokio::test]
    async fn test_execute_on_workers_in_docker() {
        let mock = Arc::new(MockTransport::new());
        let (_tmp, dir) = project_with_workers(true);
        let request = ExecuteRequest {
            command: "nvidia-smi".to_string(),
            args: vec!["-L".to_string()],
            on: Target::Workers,
            docker: true,
            ..ExecuteRequest::default()
        };
        execute(&context(&mock), &dir, &request).await.unwrap();

        let sent = mock.commands_for("10.0.0.2");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].ends_with(
            "&& docker exec -t -e CLUSTERIZE_DIR -e PROJECT_DIR -e SESSION_DIR exp nvidia-smi -L"
        ));
        assert!(mock.commands_for("10.0.0.1").is_empty());
    }

    #[tokio::test]
    async fn test_execute_in_tmux_creates_named_session() {
        let mock = Arc::new(MockTransport::new());
        let (_tmp, dir) = project_with_workers(false);
        let request = ExecuteRequest {
            command: "python".to_string(),
            args: vec!["train.py".to_string()],
            tmux: true,
            ..ExecuteRequest::default()
        };
        execute(&context(&mock), &dir, &request).await.unwrap();

        let sent = mock.commands_for("10.0.0.1");
        assert_eq!(
            sent.last().unwrap(),
            "byobu-tmux new-session -d -s exp_python 'export CLUSTERIZE_DIR=$HOME/.clusterize \
             && export PROJECT_DIR=$CLUSTERIZE_DIR/exp && export SESSION_DIR=$PROJECT_DIR/exp \
             && python train.py'"
        );
    }

    #[tokio::test]
    async fn test_ad_hoc_command_outlives_query_deadline() {
        let mock = Arc::new(MockTransport::new());
        mock.with_latency("10.0.0.1", Duration::from_millis(300));
        let (_tmp, dir) = project_with_workers(false);
        let ctx = context(&mock).with_query_timeout(Duration::from_millis(50));
        let request = ExecuteRequest {
            command: "sleep".to_string(),
            args: vec!["600".to_string()],
            ..ExecuteRequest::default()
        };

        execute(&ctx, &dir, &request).await.unwrap();
        assert_eq!(mock.commands_for("10.0.0.1").len(), 1);
    }
}
