//! `clusterize project ...`: scaffolding, listing and named commands.

use super::deploy::deploy_resources;
use super::helpers::{TreeNode, format_tree, indent_lines};
use super::{Context, LoadedProject};
use crate::error::CliError;
use anyhow::{Context as _, Result};
use clz_common::config::discovery::{ProjectData, create_project, find_projects};
use clz_common::docker::dockerize_command;
use clz_common::{RemoteTransport, SessionManager};
use std::path::Path;
use tracing::info;

/// Scaffold `<parent>/<name>` owned by the local user.
pub fn create(parent: &Path, name: &str, head_ip: &str) -> Result<ProjectData> {
    let user = whoami::username().context("Failed to determine the local user name")?;
    let data = create_project(parent, name, head_ip, &user)?;
    println!("Created project '{}' in {}", data.name, data.directory.display());
    Ok(data)
}

pub fn project_tree(data: &ProjectData) -> TreeNode {
    let folder = data
        .directory
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| data.directory.display().to_string());
    TreeNode::with_children(
        format!("{folder}/"),
        vec![
            TreeNode::new(format!("name = {}", data.name)),
            TreeNode::new(format!("directory = {}", data.directory.display())),
            TreeNode::new(format!("cluster = {}", data.cluster.display())),
            TreeNode::new(format!("project = {}", data.project.display())),
        ],
    )
}

pub fn list(dir: &Path) -> Result<()> {
    let projects = find_projects(dir)?;
    if projects.is_empty() {
        println!("No projects found in '{}'", dir.display());
        return Ok(());
    }
    for project in &projects {
        println!("{}", format_tree(&project_tree(project)));
    }
    Ok(())
}

/// Human-readable listing of a project's named commands.
pub fn describe_commands(loaded: &LoadedProject) -> String {
    let mut out = format!("Active project: {}\n", loaded.project.name);
    if loaded.project.commands.is_empty() {
        out.push_str("\nNo commands found.\n");
        return out;
    }
    for command in &loaded.project.commands {
        out.push_str(&format!("\nCommand \"{}\":\n", command.display_name()));
        out.push_str(&format!("  usage: {}\n", command.display_name()));
        out.push_str(&indent_lines(&format!("run: {}", command.run.trim()), "  "));
        out.push('\n');
    }
    out
}

pub fn commands(dir: &Path) -> Result<()> {
    let loaded = LoadedProject::load(dir)?;
    print!("{}", describe_commands(&loaded));
    Ok(())
}

/// Run a named project command on the head, directly or in a new
/// persistent session named `<project>_<command>`.
pub async fn execute<T: RemoteTransport>(
    ctx: &Context<T>,
    name: &str,
    dir: &Path,
    tmux: bool,
    session: Option<&str>,
) -> Result<()> {
    let loaded = LoadedProject::load(dir)?;
    let command = loaded
        .project
        .command(name)
        .ok_or_else(|| CliError::UnknownCommand {
            name: name.to_string(),
            project: loaded.name().to_string(),
        })?;

    let session = loaded.session_name(session);
    let env = ctx.session_env(&loaded.project.name, &session, &command.env);
    let command = if loaded.cluster.docker.is_some() {
        dockerize_command(command, &loaded.cluster, &env)?
    } else {
        command.clone()
    };
    let line = command.expand();

    let resolver = ctx.resolver(&loaded.cluster);
    let mut head = resolver.head()?;
    let outcome: Result<()> = async {
        if !command.deploy.is_empty() {
            let deployed = deploy_resources(
                &mut head,
                &loaded.data.directory,
                &command.deploy,
                &env,
                &ctx.query_opts(),
            )
            .await?;
            info!(count = deployed.len(), "Deployed command resources");
        }

        if tmux {
            let session_name = format!("{}_{}", loaded.name(), name);
            let mut sessions = SessionManager::new(&mut head, ctx.multiplexer())
                .with_env(env.clone())
                .with_options(ctx.query_opts());
            // A session left over from an earlier run is reported, not reused.
            sessions.create_session(&session_name, None, None).await?;
            sessions.send_command(&session_name, &line, None).await?;
            println!("Sent '{name}' to session '{session_name}'");
        } else {
            head.execute(&line, &env, &ctx.visible_opts()).await?;
        }
        Ok(())
    }
    .await;
    head.close().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use clz_common::config::{Command, DockerSpec, Resource};
    use clz_common::{ClusterizeError, MockTransport, RawOutput, Settings};
    use std::sync::Arc;
    use std::time::Duration;

    fn context(mock: &Arc<MockTransport>) -> Context<MockTransport> {
        Context::new(Arc::clone(mock), Settings::default())
    }

    fn scaffold(docker: bool) -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let data = create_project(tmp.path(), "exp", "10.0.0.1", "ops").unwrap();

        let mut project = data.load_project().unwrap();
        let mut train = Command::new("train", "python train.py --epochs 3");
        train.env.insert("EPOCHS", "3");
        train.deploy.push(Resource {
            source: "weights.bin".to_string(),
            destination: "$SESSION_DIR/in".to_string(),
        });
        project.commands.push(train);
        std::fs::write(&data.project, project.to_yaml().unwrap()).unwrap();
        std::fs::write(data.directory.join("weights.bin"), [1u8, 2, 3]).unwrap();

        if docker {
            let mut cluster = data.load_cluster().unwrap();
            cluster.docker = Some(DockerSpec {
                image: "ubuntu:20.04".to_string(),
                ..DockerSpec::default()
            });
            std::fs::write(&data.cluster, cluster.to_yaml().unwrap()).unwrap();
        }
        (tmp, data.directory)
    }

    #[test]
    fn test_describe_commands() {
        let (_tmp, dir) = scaffold(false);
        let loaded = LoadedProject::load(&dir).unwrap();
        let text = describe_commands(&loaded);
        assert!(text.starts_with("Active project: exp\n"));
        assert!(text.contains("Command \"default\":\n  usage: default\n"));
        assert!(text.contains("  run: python train.py --epochs 3"));
    }

    #[test]
    fn test_project_tree_lists_paths() {
        let (_tmp, dir) = scaffold(false);
        let loaded = LoadedProject::load(&dir).unwrap();
        let tree = project_tree(&loaded.data);
        assert_eq!(tree.label, "exp/");
        assert_eq!(tree.children[0].label, "name = exp");
    }

    #[tokio::test]
    async fn test_execute_unknown_command() {
        let mock = Arc::new(MockTransport::new());
        let (_tmp, dir) = scaffold(false);
        let err = execute(&context(&mock), "nope", &dir, false, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'nope' not found"));
        assert!(mock.connects().is_empty());
    }

    #[tokio::test]
    async fn test_execute_deploys_then_runs_on_head() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(
            "echo $SESSION_DIR/in",
            RawOutput::success("/home/ops/.clusterize/exp/exp/in\n"),
        );
        let (_tmp, dir) = scaffold(false);

        execute(&context(&mock), "train", &dir, false, None)
            .await
            .unwrap();

        let sent = mock.commands_for("10.0.0.1");
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], "mkdir -p /home/ops/.clusterize/exp/exp/in");
        assert!(sent[2].contains("export EPOCHS=3 && /bin/bash -c 'python train.py --epochs 3'"));
        assert_eq!(
            mock.uploads()[0].2,
            "/home/ops/.clusterize/exp/exp/in/weights.bin"
        );
        assert_eq!(mock.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_execute_in_session_is_dockerized() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("echo $SESSION_DIR/in", RawOutput::success("/data/in\n"));
        let (_tmp, dir) = scaffold(true);

        execute(&context(&mock), "train", &dir, true, Some("run1"))
            .await
            .unwrap();

        let sent = mock.commands_for("10.0.0.1");
        assert!(sent.iter().any(|c| c == "byobu-tmux new-session -d -s exp_train"));
        // The exports are part of the typed text, so the shell inside the
        // window defines every name `docker exec -e` forwards.
        let keys = sent.last().unwrap();
        assert!(keys.starts_with(
            "byobu-tmux send-keys -t exp_train -- 'export CLUSTERIZE_DIR=$HOME/.clusterize && "
        ));
        assert!(keys.contains("export SESSION_DIR=$PROJECT_DIR/run1 && export EPOCHS=3 && "));
        assert!(keys.contains(
            "docker exec -t -e EPOCHS -e CLUSTERIZE_DIR -e PROJECT_DIR -e SESSION_DIR exp"
        ));
        assert!(keys.ends_with("' Enter"));
    }

    #[tokio::test]
    async fn test_execute_in_existing_session_is_refused() {
        let mock = Arc::new(MockTransport::new());
        mock.respond("echo $SESSION_DIR/in", RawOutput::success("/data/in\n"));
        mock.respond("list-sessions", RawOutput::success("exp_train\n"));
        let (_tmp, dir) = scaffold(false);

        let err = execute(&context(&mock), "train", &dir, true, None)
            .await
            .unwrap_err();

        let cause = err.downcast_ref::<ClusterizeError>().unwrap();
        assert!(matches!(cause, ClusterizeError::DuplicateSession { .. }));
        let sent = mock.commands_for("10.0.0.1");
        assert!(!sent.iter().any(|c| c.contains("send-keys")));
        assert_eq!(mock.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_foreground_job_outlives_query_deadline() {
        let mock = Arc::new(MockTransport::new());
        mock.with_latency("10.0.0.1", Duration::from_millis(300));
        let (_tmp, dir) = scaffold(false);
        let mut project = LoadedProject::load(&dir).unwrap().project;
        project.commands.push(Command::new("eval", "python eval.py"));
        std::fs::write(dir.join("project.yaml"), project.to_yaml().unwrap()).unwrap();

        let ctx = context(&mock).with_query_timeout(Duration::from_millis(50));
        execute(&ctx, "eval", &dir, false, None).await.unwrap();

        let sent = mock.commands_for("10.0.0.1");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].ends_with("/bin/bash -c 'python eval.py'"));
    }

    #[tokio::test]
    async fn test_configured_timeout_bounds_foreground_job() {
        let mock = Arc::new(MockTransport::new());
        mock.with_latency("10.0.0.1", Duration::from_millis(300));
        let (_tmp, dir) = scaffold(false);
        let mut project = LoadedProject::load(&dir).unwrap().project;
        project.commands.push(Command::new("eval", "python eval.py"));
        std::fs::write(dir.join("project.yaml"), project.to_yaml().unwrap()).unwrap();

        let ctx = context(&mock).with_timeout(Duration::from_millis(50));
        let err = execute(&ctx, "eval", &dir, false, None).await.unwrap_err();
        let cause = err.downcast_ref::<ClusterizeError>().unwrap();
        assert!(matches!(cause, ClusterizeError::Timeout { .. }));
    }
}
