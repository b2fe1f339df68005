//! Driving runs: `conductor run` and `conductor resume`.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::sync::Arc;

use conductor::config::Config;
use conductor::orchestrator::{Engine, RunSummary};
use conductor::stream::StreamRegistry;
use conductor::ui::RunProgress;
use conductor::user::{AutoPilot, TerminalChannel, UserChannel};

use super::super::Cli;
use super::load_initialized;

fn build_engine(cli: &Cli, config: &Config) -> Result<Engine> {
    let user: Arc<dyn UserChannel> = if cli.yes {
        Arc::new(AutoPilot)
    } else {
        Arc::new(TerminalChannel)
    };
    let engine = Engine::from_config(config, user, StreamRegistry::new())?
        .with_observer(Arc::new(RunProgress::new(cli.verbose)));
    Ok(engine)
}

fn check_config(config: &Config) -> Result<()> {
    let problems = config.toml.validate();
    if problems.is_empty() {
        return Ok(());
    }
    for problem in &problems {
        eprintln!("  - {}", problem);
    }
    anyhow::bail!(
        "Invalid configuration in {} ({} problem(s))",
        config.config_file().display(),
        problems.len()
    )
}

fn report(summary: &RunSummary) {
    if let Some(stage) = summary.last_stage {
        println!(
            "Last stage: {} ({})",
            stage.title(),
            style(stage.id()).dim()
        );
    }
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, request: &str) -> Result<()> {
    if request.trim().is_empty() {
        anyhow::bail!("The request must not be empty");
    }
    let config = load_initialized(project_dir, cli.verbose, cli.yes)?;
    check_config(&config)?;
    config.ensure_dirs()?;

    let engine = build_engine(cli, &config)?;
    let run_id = engine.start(request.trim())?;
    println!("Started run {}", style(&run_id).bold());
    let summary = engine.run(&run_id).await?;
    report(&summary);
    Ok(())
}

pub async fn cmd_resume(cli: &Cli, project_dir: &Path, run_id: &str) -> Result<()> {
    let config = load_initialized(project_dir, cli.verbose, cli.yes)?;
    check_config(&config)?;

    let engine = build_engine(cli, &config)?;
    println!("Resuming run {}", style(run_id).bold());
    let summary = engine.resume(run_id).await?;
    report(&summary);
    Ok(())
}
