use async_trait::async_trait;
use tracing::{info, warn};

use super::{ChangeSet, MAX_DOC_BYTES, RunContext, StageResult, Worker, brief_context};
use crate::locate::{ErrorLocation, ErrorLocator};
use crate::project::{ProjectState, ReviewDossier, StatePatch};
use crate::stage::{Specialization, Stage};
use crate::util::truncate;

/// Lines of source shown on each side of the failing line.
const CONTEXT_LINES: usize = 15;

/// Fixes whatever the last code review reported, then re-runs the tests.
///
/// The dossier is always cleared so the next review starts fresh.
pub struct DebugWorker;

impl DebugWorker {
    fn excerpt(ctx: &RunContext, location: &ErrorLocation) -> Option<String> {
        let content = ctx.workspace.read_file(&location.file_path).ok()?;
        let line = location.line_number as usize;
        let start = line.saturating_sub(CONTEXT_LINES + 1);
        let numbered: Vec<String> = content
            .lines()
            .enumerate()
            .skip(start)
            .take(CONTEXT_LINES * 2 + 1)
            .map(|(i, text)| {
                let marker = if i + 1 == line { ">>" } else { "  " };
                format!("{} {:>4} | {}", marker, i + 1, text)
            })
            .collect();
        Some(numbered.join("\n"))
    }

    fn prompt(state: &ProjectState, dossier: &ReviewDossier, ctx: &RunContext) -> (String, Option<ErrorLocation>) {
        let locator = ErrorLocator::new(ctx.sandbox.config().workdir.clone());
        let location = locator.locate(&dossier.feedback);

        let mut prompt = format!(
            "{}\n## Failure report\n{}\n",
            brief_context(state),
            truncate(&dossier.feedback, MAX_DOC_BYTES)
        );
        match &location {
            Some(location) => {
                prompt.push_str(&format!("\n## Error location\n{}\n", location));
                if let Some(excerpt) = Self::excerpt(ctx, location) {
                    prompt.push_str(&format!(
                        "\n## {} (around line {})\n```\n{}\n```\n",
                        location.file_path, location.line_number, excerpt
                    ));
                }
            }
            None => prompt.push_str("\n## Error location\nNot found in the report.\n"),
        }
        prompt.push_str(&format!(
            "\n## Workspace\n{}\n",
            ctx.workspace.snapshot(MAX_DOC_BYTES)
        ));
        (prompt, location)
    }
}

#[async_trait]
impl Worker for DebugWorker {
    fn stage(&self) -> Stage {
        Stage::DebugFix
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let Some(dossier) = &state.review_dossier else {
            let mut patch = StatePatch::new(self.stage(), "No review feedback to debug.");
            patch.review_dossier = Some(None);
            return StageResult::idle(patch);
        };

        let (prompt, location) = Self::prompt(state, dossier, ctx);
        let where_ = location
            .as_ref()
            .map(|l| format!(" at {}", l))
            .unwrap_or_default();
        info!(location = %where_, "debugging review failure");

        let fix = match ctx
            .ask(Specialization::DebuggingSupport, "debugger", prompt)
            .await
        {
            Ok(answer) => ChangeSet::parse(&answer)
                .ok_or_else(|| "debugger answer contained no change set".to_string()),
            Err(e) => Err(format!("debugger call failed: {}", e)),
        };

        let mut patch_entry;
        let mut problems = Vec::new();
        match fix.and_then(|fix| {
            fix.apply(&ctx.workspace)
                .map(|written| (fix, written))
                .map_err(|e| format!("could not apply fix: {}", e))
        }) {
            Ok((fix, written)) => {
                patch_entry = format!(
                    "Debugging support fixed the failure{}: {} ({}).",
                    where_,
                    if fix.summary.trim().is_empty() { "no summary" } else { fix.summary.trim() },
                    written.join(", ")
                );
                if let Some(failed) = fix.run_commands(&ctx.sandbox, &ctx.run_id).await {
                    problems.push(format!("fix command failed: {}", failed.report(400)));
                }
            }
            Err(reason) => {
                warn!(reason = %reason, "debugging produced no fix");
                patch_entry = format!("Debugging failed{}.", where_);
                problems.push(reason);
            }
        }

        let rerun = ctx.sandbox.run(&ctx.qa.test_command, &ctx.run_id).await;
        if rerun.is_success() {
            patch_entry.push_str(" Tests now pass.");
        } else {
            patch_entry.push_str(" Tests still fail.");
        }

        let mut patch = StatePatch::new(self.stage(), patch_entry);
        patch.review_dossier = Some(None);
        StageResult::from_problems(patch, problems)
    }
}
