//! Research, ideation and technical planning.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{MAX_DOC_BYTES, RunContext, StageResult, Worker, brief_context};
use crate::project::{ProjectState, StatePatch};
use crate::stage::{Specialization, Stage};
use crate::user::APPROVE;
use crate::util::truncate;

pub const CONCEPTUAL_PLAN_FILE: &str = "conceptual_plan.md";
pub const TECHNICAL_PLAN_FILE: &str = "technical_plan.md";

const RESEARCH_PLACEHOLDER: &str =
    "Market research was unavailable. Proceed from the project brief alone.";

/// Feedback from the given review when it asked for a revision.
fn revision_feedback(state: &ProjectState, review: Stage) -> Option<&str> {
    state
        .review_dossier
        .as_ref()
        .filter(|d| d.reviewed_stage == Some(review) && d.requires_revision())
        .map(|d| d.feedback.as_str())
}

/// A pending change request from the user, if the plan was not approved.
fn change_request(state: &ProjectState) -> Option<&str> {
    state
        .user_feedback
        .as_deref()
        .filter(|f| !f.trim().is_empty() && *f != APPROVE)
}

pub struct MarketAnalysisWorker;

#[async_trait]
impl Worker for MarketAnalysisWorker {
    fn stage(&self) -> Stage {
        Stage::MarketAnalysis
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let mut prompt = brief_context(state);
        if let Some(request) = change_request(state) {
            prompt.push_str(&format!(
                "\n## Change request from the user\n{}\nRevise the research to account for it.\n",
                request
            ));
        }

        match ctx
            .ask(Specialization::Analysts, "market_analysis", prompt)
            .await
        {
            Ok(research) => {
                debug!(bytes = research.len(), "research document received");
                let mut patch = StatePatch::new(
                    self.stage(),
                    "Analysts produced the research document.",
                );
                patch.research_document = Some(research.trim().to_string());
                StageResult::success(patch)
            }
            Err(e) => {
                warn!(error = %e, "market analysis failed, using placeholder");
                let mut patch = StatePatch::new(
                    self.stage(),
                    "Market analysis unavailable; continuing without research.",
                );
                patch.research_document = Some(RESEARCH_PLACEHOLDER.to_string());
                StageResult::degraded(patch, format!("market analysis failed: {}", e))
            }
        }
    }
}

pub struct IdeationWorker;

#[async_trait]
impl Worker for IdeationWorker {
    fn stage(&self) -> Stage {
        Stage::CreativeIdeation
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let mut prompt = brief_context(state);
        if let Some(research) = &state.research_document {
            prompt.push_str(&format!(
                "\n## Research\n{}\n",
                truncate(research, MAX_DOC_BYTES)
            ));
        }
        if let Some(feedback) = revision_feedback(state, Stage::ConceptReview) {
            if let Some(previous) = &state.conceptual_plan {
                prompt.push_str(&format!(
                    "\n## Previous concept\n{}\n",
                    truncate(previous, MAX_DOC_BYTES)
                ));
            }
            prompt.push_str(&format!(
                "\n## Review feedback to address\n{}\n",
                truncate(feedback, MAX_DOC_BYTES)
            ));
        }

        let plan = match ctx.ask(Specialization::Innovators, "ideation", prompt).await {
            Ok(plan) => plan.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "ideation failed");
                return StageResult::degraded(
                    StatePatch::new(self.stage(), "Ideation failed; concept unchanged."),
                    format!("ideation failed: {}", e),
                );
            }
        };

        write_plan(self.stage(), ctx, CONCEPTUAL_PLAN_FILE, plan, |patch, plan| {
            patch.conceptual_plan = Some(plan)
        })
    }
}

pub struct TechnicalPlanWorker;

#[async_trait]
impl Worker for TechnicalPlanWorker {
    fn stage(&self) -> Stage {
        Stage::TechnicalPlanning
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let mut prompt = brief_context(state);
        if let Some(concept) = &state.conceptual_plan {
            prompt.push_str(&format!(
                "\n## Approved concept\n{}\n",
                truncate(concept, MAX_DOC_BYTES)
            ));
        }
        prompt.push_str(&format!(
            "\n## Test command\nThe QA council will run `{}` from the workspace root.\n",
            ctx.qa.test_command
        ));
        if let Some(feedback) = revision_feedback(state, Stage::TechnicalReview) {
            if let Some(previous) = &state.technical_plan {
                prompt.push_str(&format!(
                    "\n## Previous technical plan\n{}\n",
                    truncate(previous, MAX_DOC_BYTES)
                ));
            }
            prompt.push_str(&format!(
                "\n## Review feedback to address\n{}\n",
                truncate(feedback, MAX_DOC_BYTES)
            ));
        }

        let plan = match ctx
            .ask(Specialization::Analysts, "technical_plan", prompt)
            .await
        {
            Ok(plan) => plan.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "technical planning failed");
                return StageResult::degraded(
                    StatePatch::new(self.stage(), "Technical planning failed; plan unchanged."),
                    format!("technical planning failed: {}", e),
                );
            }
        };

        write_plan(self.stage(), ctx, TECHNICAL_PLAN_FILE, plan, |patch, plan| {
            patch.technical_plan = Some(plan)
        })
    }
}

/// Store `plan` in the patch and mirror it into the workspace.
fn write_plan(
    stage: Stage,
    ctx: &RunContext,
    file: &str,
    plan: String,
    set: impl FnOnce(&mut StatePatch, String),
) -> StageResult {
    let written = ctx.workspace.write_file(file, &plan);
    let mut patch = StatePatch::new(stage, format!("{} written to {}.", stage.title(), file));
    set(&mut patch, plan);
    match written {
        Ok(()) => StageResult::success(patch),
        Err(e) => {
            warn!(file, error = %e, "failed to write plan to workspace");
            StageResult::degraded(patch, format!("could not write {}: {}", file, e))
        }
    }
}
