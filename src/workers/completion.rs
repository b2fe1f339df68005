use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::{MAX_DOC_BYTES, RunContext, StageResult, Worker, brief_context};
use crate::project::{ProjectState, StatePatch};
use crate::stage::{Specialization, Stage};

pub const README_FILE: &str = "README.md";

/// Append a completion notice to the notifications log.
pub fn append_notification(log: &Path, run_id: &str, summary: &str) -> Result<()> {
    if let Some(parent) = log.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .with_context(|| format!("Failed to open {}", log.display()))?;
    write!(
        file,
        "--- NOTIFICATION ---\nTimestamp: {}\nRun ID: {}\nProject Status: COMPLETED\nSummary: {}\n--------------------\n\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        run_id,
        summary
    )
    .with_context(|| format!("Failed to write {}", log.display()))?;
    Ok(())
}

/// Packages the delivery: a README plus a completion notification.
pub struct CompletionWorker;

#[async_trait]
impl Worker for CompletionWorker {
    fn stage(&self) -> Stage {
        Stage::ProjectCompletion
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let mut problems = Vec::new();

        let prompt = format!(
            "{}\n## Workspace\n{}",
            brief_context(state),
            ctx.workspace.snapshot(MAX_DOC_BYTES)
        );
        let readme_status = match ctx
            .ask_leader(Specialization::Analysts, "readme", prompt)
            .await
        {
            Ok(readme) => match ctx.workspace.write_file(README_FILE, readme.trim()) {
                Ok(()) => "README.md generated".to_string(),
                Err(e) => {
                    problems.push(format!("could not write README: {}", e));
                    format!("README not written: {}", e)
                }
            },
            Err(e) => {
                warn!(error = %e, "README generation failed");
                problems.push(format!("README generation failed: {}", e));
                format!("README generation failed: {}", e)
            }
        };

        let summary = state
            .project_brief
            .as_ref()
            .map(|b| b.summary.as_str())
            .unwrap_or(&state.initial_request);
        let notification_status =
            match append_notification(&ctx.notifications_log, &ctx.run_id, summary) {
                Ok(()) => {
                    info!(run_id = %ctx.run_id, "completion notification logged");
                    "notification logged".to_string()
                }
                Err(e) => {
                    warn!(error = %e, "failed to log notification");
                    problems.push(format!("{:#}", e));
                    format!("notification failed: {:#}", e)
                }
            };

        StageResult::from_problems(
            StatePatch::new(
                self.stage(),
                format!(
                    "Project packaged. README: [{}]. Notification: [{}].",
                    readme_status, notification_status
                ),
            ),
            problems,
        )
    }
}
