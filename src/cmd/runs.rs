//! Run inspection: `conductor status`, `conductor runs`, `conductor history`.

use anyhow::Result;
use console::style;
use std::path::Path;

use conductor::orchestrator::{RunRecord, RunStatus, RunStore};
use conductor::project::TaskStatus;

use super::load_initialized;

fn store(project_dir: &Path) -> Result<RunStore> {
    let config = load_initialized(project_dir, false, false)?;
    Ok(RunStore::new(&config.runs_dir))
}

fn styled_status(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => style(status).green().to_string(),
        RunStatus::StepLimit => style(status).yellow().to_string(),
        RunStatus::Running | RunStatus::Reengaged => style(status).cyan().to_string(),
    }
}

pub fn cmd_runs(project_dir: &Path) -> Result<()> {
    let records = store(project_dir)?.list();
    if records.is_empty() {
        println!("No runs yet. Start one with `conductor run \"<request>\"`.");
        return Ok(());
    }

    println!();
    println!("{:<38} {:<12} {:>5}  {:<20} Request", "Run", "Status", "Steps", "Created");
    println!("{}", "-".repeat(100));
    for record in records {
        println!(
            "{:<38} {:<12} {:>5}  {:<20} {}",
            record.run_id,
            styled_status(record.status),
            record.steps,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            conductor::util::truncate(&record.state.initial_request, 40)
        );
    }
    println!();
    Ok(())
}

/// Show one run, or the newest one when no id is given.
pub fn cmd_status(project_dir: &Path, run_id: Option<&str>) -> Result<()> {
    let store = store(project_dir)?;
    let record = match run_id {
        Some(id) => store.load(id)?,
        None => match store.list().into_iter().next() {
            Some(record) => record,
            None => {
                println!("No runs yet.");
                return Ok(());
            }
        },
    };
    print_status(&record);
    Ok(())
}

fn print_status(record: &RunRecord) {
    let state = &record.state;
    println!();
    println!("Run {}", style(&record.run_id).bold());
    println!("  Status:     {}", styled_status(record.status));
    println!("  Steps:      {}", record.steps);
    if record.cycles > 0 {
        println!("  Cycles:     {}", record.cycles);
    }
    println!("  Request:    {}", state.working_request());
    match state.last_completed_step {
        Some(stage) => println!("  Last stage: {} ({})", stage.title(), style(stage.id()).dim()),
        None => println!("  Last stage: {}", style("none").dim()),
    }
    println!("  Updated:    {}", record.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));

    if let Some(dossier) = &state.review_dossier {
        println!();
        println!("Pending review: {}", dossier.verdict);
    }
    if state.dispute_raised {
        println!("Dispute raised, awaiting resolution.");
    } else if let Some(ruling) = state.dispute_ruling {
        println!("Last dispute ruling: {}", ruling);
    }

    let tasks = state.tasks();
    if !tasks.is_empty() {
        let done = tasks.iter().filter(|t| t.status.is_completed()).count();
        println!();
        println!("Tasks ({}/{} completed):", done, tasks.len());
        for task in tasks {
            let status = match task.status {
                TaskStatus::Completed => style(task.status).green(),
                TaskStatus::Error => style(task.status).red(),
                TaskStatus::Pending => style(task.status).dim(),
            };
            println!(
                "  {:<8} {:<10} {:<28} {}",
                task.id,
                status,
                task.group,
                conductor::util::truncate(&task.description, 60)
            );
        }
    }
    println!();
}

pub fn cmd_history(project_dir: &Path, run_id: &str) -> Result<()> {
    let store = store(project_dir)?;
    let record = store.load(run_id)?;
    let journal = store.journal(run_id)?;

    println!();
    println!("History of run {}", style(run_id).bold());
    println!();
    for entry in &journal {
        println!(
            "{:>4}  {}  {:<32} {:<10} -> {}",
            entry.step,
            entry.timestamp.format("%H:%M:%S"),
            entry.stage.id(),
            entry.outcome.label(),
            entry.next.as_deref().unwrap_or("-")
        );
    }

    let log = record.state.history_log();
    if !log.is_empty() {
        println!();
        println!("Log of the current project cycle:");
        for (i, line) in log.iter().enumerate() {
            println!("  {:>3}. {}", i + 1, line);
        }
    }
    println!();
    Ok(())
}
