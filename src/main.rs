use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cmd;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Multi-stage software production workflow engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer every prompt automatically (approve the plan, accept the delivery)
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new conductor project
    Init,
    /// Start a run for a software request and drive it
    Run {
        /// What should be built
        request: String,
    },
    /// Continue a paused or interrupted run
    Resume { run_id: String },
    /// Show the state of a run (the newest one by default)
    Status { run_id: Option<String> },
    /// List all runs
    Runs,
    /// Show the step journal and log of a run
    History { run_id: String },
    /// Execute one command in the sandbox with live output
    Exec {
        /// Shell command, run with `sh -c` in the workspace
        command: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and report problems
    Validate,
}

/// Stderr logging always; file logging once the project has a log directory.
fn init_tracing(project_dir: &Path, verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_dir = project_dir
        .join(conductor::config::CONDUCTOR_DIR)
        .join("logs");
    let (file_layer, guard) = if log_dir.is_dir() {
        let appender = tracing_appender::rolling::never(&log_dir, "conductor.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let _log_guard = init_tracing(&project_dir, cli.verbose);

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run { request } => cmd::cmd_run(&cli, &project_dir, request).await?,
        Commands::Resume { run_id } => cmd::cmd_resume(&cli, &project_dir, run_id).await?,
        Commands::Status { run_id } => cmd::cmd_status(&project_dir, run_id.as_deref())?,
        Commands::Runs => cmd::cmd_runs(&project_dir)?,
        Commands::History { run_id } => cmd::cmd_history(&project_dir, run_id)?,
        Commands::Exec { command } => cmd::cmd_exec(&project_dir, command, cli.verbose).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
