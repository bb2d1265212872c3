//! `clusterize session ...`: project setup and persistent sessions.

use super::{Context, LoadedProject};
use anyhow::{Context as _, Result};
use clz_common::config::project_commands;
use clz_common::docker::dockerize_commands;
use clz_common::{EnvLayer, RemoteTransport, SessionManager, Target};
use std::path::Path;
use tracing::info;

/// Run the project setup commands on every node.
pub async fn start<T: RemoteTransport>(
    ctx: &Context<T>,
    dir: &Path,
    session: Option<&str>,
) -> Result<()> {
    let loaded = LoadedProject::load(dir)?;
    let session = loaded.session_name(session);
    let session_layer = ctx.session_env(&loaded.project.name, &session, &EnvLayer::new());

    let mut commands = project_commands(&loaded.project);
    if loaded.cluster.docker.is_some() {
        commands = dockerize_commands(&commands, &loaded.cluster, &session_layer)?;
    }

    let mut executor = ctx.resolver(&loaded.cluster).resolve(Target::Cluster)?;
    let outcome: Result<()> = async {
        for command in &commands {
            info!(command = command.display_name(), "Running setup command");
            let env = ctx.session_env(&loaded.project.name, &session, &command.env);
            executor
                .execute(&command.expand(), &env, &ctx.visible_opts())
                .await
                .with_context(|| format!("Setup command '{}' failed", command.display_name()))?;
        }
        Ok(())
    }
    .await;
    executor.close().await;
    outcome?;

    println!(
        "Session '{session}' of '{}' ready ({} setup commands)",
        loaded.name(),
        commands.len()
    );
    Ok(())
}

/// Persistent sessions alive on the head.
pub async fn sessions<T: RemoteTransport>(ctx: &Context<T>, dir: &Path) -> Result<Vec<String>> {
    let loaded = LoadedProject::load(dir)?;
    let mut head = ctx.resolver(&loaded.cluster).head()?;
    let names = SessionManager::new(&mut head, ctx.multiplexer())
        .with_options(ctx.query_opts())
        .get_sessions()
        .await;
    head.close().await;
    Ok(names?)
}

pub async fn list<T: RemoteTransport>(ctx: &Context<T>, dir: &Path) -> Result<()> {
    let names = sessions(ctx, dir).await?;
    if names.is_empty() {
        println!("No sessions found.");
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}
