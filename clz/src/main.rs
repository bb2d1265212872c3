//! clusterize: run project commands across a head node and its workers.

mod commands;
mod error;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use clz_common::{
    ClusterizeError, GroupMode, LogConfig, RemoteTransport, Settings, Target, init_logging,
};
use commands::Context;
use commands::cluster::ExecuteRequest;
use commands::helpers::indent_lines;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "clusterize")]
#[command(author, version)]
#[command(about = "Clusterize - run project commands across a head node and its workers")]
#[command(propagate_version = true)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Contact group members one at a time
    #[arg(long, global = true)]
    sequential: bool,

    /// Bound on user and lifecycle commands, in seconds (default: none)
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Settings file (default: the platform config directory)
    #[arg(long, global = true, value_name = "PATH", env = "CLZ_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster lifecycle and ad-hoc execution
    Cluster {
        #[command(subcommand)]
        action: ClusterAction,
    },

    /// Project scaffolding and named commands
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Project sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum ClusterAction {
    /// Start the containerized cluster of a project
    Start {
        #[arg(value_name = "DIR")]
        project_dir: PathBuf,

        /// Session tag (default: the project name)
        #[arg(long, value_name = "NAME")]
        session: Option<String>,
    },

    /// Stop the project's containers
    Stop {
        #[arg(value_name = "DIR")]
        project_dir: PathBuf,

        /// Stop every clusterize container, not only this project's
        #[arg(long)]
        all: bool,
    },

    /// Print the cluster topology
    Topology {
        #[arg(value_name = "DIR")]
        project_dir: PathBuf,

        /// Connect to the nodes to count CPUs and GPUs
        #[arg(long)]
        full: bool,
    },

    /// Execute a command on the cluster
    Execute(ClusterExecuteArgs),
}

#[derive(Args)]
struct ClusterExecuteArgs {
    #[arg(value_name = "DIR")]
    project_dir: PathBuf,

    #[arg(value_name = "CMD")]
    command: String,

    /// Arguments passed to the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Where to run: HEAD, WORKERS or CLUSTER
    #[arg(long, value_name = "NODE", default_value = "HEAD")]
    on: Target,

    /// Session name (default: the project name)
    #[arg(long, value_name = "NAME")]
    session: Option<String>,

    /// Run inside the cluster containers
    #[arg(long)]
    docker: bool,

    /// Run in a persistent session on the head
    #[arg(long)]
    tmux: bool,
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a new project in the current directory
    Create {
        #[arg(value_name = "NAME")]
        project_name: String,

        /// IP address of the head node (default: this host's primary address)
        #[arg(long, value_name = "IP")]
        head_ip: Option<String>,
    },

    /// List the projects found in a directory
    List {
        /// Directory containing the projects (default: current directory)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// Print the commands of a project
    Commands {
        #[arg(value_name = "DIR")]
        project_dir: PathBuf,
    },

    /// Execute a named project command on the head
    Execute {
        #[arg(value_name = "CMD")]
        command: String,

        #[arg(value_name = "DIR")]
        project_dir: PathBuf,

        /// Run in a persistent session
        #[arg(long)]
        tmux: bool,

        /// Session name (default: the project name)
        #[arg(long, value_name = "NAME")]
        session: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Run the project setup commands on every node
    Start {
        #[arg(value_name = "DIR")]
        project_dir: PathBuf,

        /// Session name (default: the project name)
        #[arg(long, value_name = "NAME")]
        session: Option<String>,
    },

    /// List persistent sessions on the head
    List {
        #[arg(value_name = "DIR")]
        project_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (settings, env_errors) = match Settings::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        settings.general.log_level.clone()
    };
    let _guards = match init_logging(&LogConfig::from_env(&level)) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    for e in &env_errors {
        warn!("{e}");
    }

    match run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
async fn run(cli: Cli, settings: Settings) -> Result<()> {
    use clz_common::{SshOptions, SshTransport};
    use std::sync::Arc;

    let transport = SshTransport::new(SshOptions {
        connect_timeout: settings.connect_timeout(),
        known_hosts: settings.ssh.known_hosts,
    });
    let mut ctx = Context::new(Arc::new(transport), settings);
    if cli.sequential {
        ctx = ctx.with_mode(GroupMode::Sequential);
    }
    if let Some(secs) = cli.timeout {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }
    debug!(mode = ?ctx.mode(), "Dispatching command");
    dispatch(&ctx, cli.command).await
}

#[cfg(not(unix))]
async fn run(_cli: Cli, _settings: Settings) -> Result<()> {
    anyhow::bail!("clusterize needs an OpenSSH client and only runs on unix hosts")
}

async fn dispatch<T: RemoteTransport>(ctx: &Context<T>, command: Commands) -> Result<()> {
    match command {
        Commands::Cluster { action } => match action {
            ClusterAction::Start {
                project_dir,
                session,
            } => commands::cluster::start(ctx, &project_dir, session.as_deref()).await,
            ClusterAction::Stop { project_dir, all } => {
                commands::cluster::stop(ctx, &project_dir, all).await
            }
            ClusterAction::Topology { project_dir, full } => {
                commands::cluster::topology(ctx, &project_dir, full).await
            }
            ClusterAction::Execute(args) => {
                let request = ExecuteRequest {
                    command: args.command,
                    args: args.args,
                    on: args.on,
                    session: args.session,
                    docker: args.docker,
                    tmux: args.tmux,
                };
                commands::cluster::execute(ctx, &args.project_dir, &request).await
            }
        },
        Commands::Project { action } => match action {
            ProjectAction::Create {
                project_name,
                head_ip,
            } => {
                let head_ip = match head_ip {
                    Some(ip) => ip,
                    None => commands::helpers::default_head_ip()?,
                };
                let cwd = std::env::current_dir().context("Failed to read current directory")?;
                commands::project::create(&cwd, &project_name, &head_ip).map(|_| ())
            }
            ProjectAction::List { dir } => {
                let dir = match dir {
                    Some(dir) => dir,
                    None => std::env::current_dir().context("Failed to read current directory")?,
                };
                commands::project::list(&dir)
            }
            ProjectAction::Commands { project_dir } => commands::project::commands(&project_dir),
            ProjectAction::Execute {
                command,
                project_dir,
                tmux,
                session,
            } => {
                commands::project::execute(ctx, &command, &project_dir, tmux, session.as_deref())
                    .await
            }
        },
        Commands::Session { action } => match action {
            SessionAction::Start {
                project_dir,
                session,
            } => commands::session::start(ctx, &project_dir, session.as_deref()).await,
            SessionAction::List { project_dir } => {
                commands::session::list(ctx, &project_dir).await
            }
        },
    }
}

/// Print the error chain, failed node output and catalog remediation.
fn report(err: &anyhow::Error) {
    eprintln!("Error: {err:#}");
    let Some(cause) = err.downcast_ref::<ClusterizeError>() else {
        return;
    };
    for result in cause.failed_results() {
        eprintln!("\n{} (exit status {}):", result.node, result.exit_status);
        let output = if result.stderr.trim().is_empty() {
            &result.stdout
        } else {
            &result.stderr
        };
        if !output.trim().is_empty() {
            eprintln!("{}", indent_lines(output.trim_end(), "  | "));
        }
    }
    eprintln!("\n{}", cause.code().entry().format_full());
}
