//! User engagement group: intake, confirmation, clarification, the brief,
//! and every conversation with the user.

use async_trait::async_trait;
use tracing::warn;

use super::{MAX_DOC_BYTES, RunContext, StageResult, Worker};
use crate::project::{ProjectBrief, ProjectState, StatePatch};
use crate::stage::{Specialization, Stage};
use crate::user::{APPROVE, COMPLETE};
use crate::util::truncate;

/// Records receipt of the request.
pub struct IntakeWorker;

#[async_trait]
impl Worker for IntakeWorker {
    fn stage(&self) -> Stage {
        Stage::InitialRequest
    }

    async fn execute(&self, state: &ProjectState, _ctx: &RunContext) -> StageResult {
        StageResult::success(StatePatch::new(
            self.stage(),
            format!("Request received: {}", state.initial_request),
        ))
    }
}

/// Lets the user accept or correct the refined query.
pub struct ConfirmQueryWorker;

#[async_trait]
impl Worker for ConfirmQueryWorker {
    fn stage(&self) -> Stage {
        Stage::ConfirmQuery
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        match ctx.user.confirm_query(state.working_request()).await {
            Ok(Some(correction)) if !correction.trim().is_empty() => {
                let correction = correction.trim().to_string();
                let mut patch = StatePatch::new(
                    self.stage(),
                    format!("User corrected the request: {}", correction),
                );
                patch.refined_query = Some(correction);
                StageResult::success(patch)
            }
            Ok(_) => StageResult::success(StatePatch::new(
                self.stage(),
                "User confirmed the refined request.",
            )),
            Err(e) => {
                warn!(error = %e, "confirmation prompt failed, accepting refined request");
                StageResult::degraded(
                    StatePatch::new(self.stage(), "Refined request accepted without confirmation."),
                    format!("user channel failed: {}", e),
                )
            }
        }
    }
}

/// Generates the open questions that shape the brief.
pub struct ClarificationWorker;

pub(crate) const NO_QUESTIONS: &str = "No clarification questions could be generated.";

#[async_trait]
impl Worker for ClarificationWorker {
    fn stage(&self) -> Stage {
        Stage::DeepClarification
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let prompt = format!(
            "The user's refined project query is: '{}'",
            state.working_request()
        );
        match ctx
            .ask(Specialization::UserEngagement, "clarification", prompt)
            .await
        {
            Ok(questions) => {
                let mut patch = StatePatch::new(
                    self.stage(),
                    "User engagement group generated clarifying questions.",
                );
                patch.clarification_questions = Some(questions.trim().to_string());
                StageResult::success(patch)
            }
            Err(e) => {
                warn!(error = %e, "clarification failed");
                let mut patch = StatePatch::new(
                    self.stage(),
                    "Clarifying questions could not be generated.",
                );
                patch.clarification_questions = Some(NO_QUESTIONS.to_string());
                StageResult::degraded(patch, format!("clarification failed: {}", e))
            }
        }
    }
}

/// Fixes the project brief from what has been gathered so far.
pub struct BriefWorker;

#[async_trait]
impl Worker for BriefWorker {
    fn stage(&self) -> Stage {
        Stage::ProjectBrief
    }

    async fn execute(&self, state: &ProjectState, _ctx: &RunContext) -> StageResult {
        let clarifications = state
            .clarification_questions
            .clone()
            .filter(|q| q != NO_QUESTIONS);
        let brief = ProjectBrief {
            summary: state.working_request().to_string(),
            refined_query: state.refined_query.clone(),
            clarifications,
        };
        let mut patch = StatePatch::new(self.stage(), "Final project brief assembled.");
        patch.project_brief = Some(brief);
        StageResult::success(patch)
    }
}

/// Shows both plans to the user.
pub struct PresentPlanWorker;

#[async_trait]
impl Worker for PresentPlanWorker {
    fn stage(&self) -> Stage {
        Stage::PresentPlan
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let mut problems = Vec::new();
        let plans = [
            ("Conceptual plan", state.conceptual_plan.as_deref()),
            ("Technical plan", state.technical_plan.as_deref()),
        ];
        for (title, plan) in plans {
            let body = plan.unwrap_or("(not available)");
            if let Err(e) = ctx.user.present(title, &truncate(body, MAX_DOC_BYTES)).await {
                warn!(error = %e, title, "failed to present plan");
                problems.push(format!("could not present {}: {}", title.to_lowercase(), e));
            }
        }
        StageResult::from_problems(
            StatePatch::new(
                self.stage(),
                "Plans presented to the user (conceptual_plan.md, technical_plan.md).",
            ),
            problems,
        )
    }
}

/// Collects approval or a change request for the plans.
pub struct FeedbackWorker;

#[async_trait]
impl Worker for FeedbackWorker {
    fn stage(&self) -> Stage {
        Stage::UserFeedback
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let summary = state
            .technical_plan
            .as_deref()
            .or(state.conceptual_plan.as_deref())
            .unwrap_or_default();
        let (answer, failure) = match ctx.user.plan_feedback(summary).await {
            Ok(answer) => (normalize(&answer, APPROVE), None),
            Err(e) => {
                warn!(error = %e, "feedback prompt failed, approving plan");
                (APPROVE.to_string(), Some(format!("user channel failed: {}", e)))
            }
        };

        let entry = if answer == APPROVE {
            "User approved the plan.".to_string()
        } else {
            format!("User requested changes: {}", answer)
        };
        let mut patch = StatePatch::new(self.stage(), entry);
        patch.user_feedback = Some(Some(answer));
        match failure {
            Some(reason) => StageResult::degraded(patch, reason),
            None => StageResult::success(patch),
        }
    }
}

/// Asks whether the delivery is complete or a new project should start.
pub struct PostDeliveryWorker;

#[async_trait]
impl Worker for PostDeliveryWorker {
    fn stage(&self) -> Stage {
        Stage::PostDeliveryReview
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let summary = format!(
            "{}\n\nFiles delivered:\n{}",
            state.working_request(),
            ctx.workspace
                .list_files()
                .iter()
                .map(|f| format!("- {}", f))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let (answer, failure) = match ctx.user.post_delivery(&summary).await {
            Ok(answer) => (normalize(&answer, COMPLETE), None),
            Err(e) => {
                warn!(error = %e, "post-delivery prompt failed, completing project");
                (COMPLETE.to_string(), Some(format!("user channel failed: {}", e)))
            }
        };

        let entry = if answer == COMPLETE {
            "User marked the project complete.".to_string()
        } else {
            format!("User submitted a new request: {}", answer)
        };
        let mut patch = StatePatch::new(self.stage(), entry);
        patch.user_feedback = Some(Some(answer));
        match failure {
            Some(reason) => StageResult::degraded(patch, reason),
            None => StageResult::success(patch),
        }
    }
}

/// Map case and whitespace variants of `keyword` onto the keyword itself.
fn normalize(answer: &str, keyword: &str) -> String {
    let trimmed = answer.trim();
    if trimmed.eq_ignore_ascii_case(keyword) {
        keyword.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedCompletion;
    use crate::sandbox::testing::FakeBackend;
    use crate::user::testing::ScriptedUser;
    use crate::workers::Outcome;
    use crate::workers::testing::Harness;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn with_user(user: ScriptedUser) -> Harness {
        Harness::new(ScriptedCompletion::new(), FakeBackend::exiting(0, "", ""), user)
    }

    fn state() -> ProjectState {
        let mut state = ProjectState::new("todo app");
        state.refined_query = Some("A command-line todo list manager".into());
        state
    }

    #[tokio::test]
    async fn intake_records_request() {
        let h = with_user(ScriptedUser::default());
        let result = IntakeWorker.execute(&state(), &h.ctx).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.patch.stage(), Stage::InitialRequest);
        assert!(result.patch.entry().contains("todo app"));
    }

    #[tokio::test]
    async fn confirmation_correction_replaces_refined_query() {
        let user = ScriptedUser {
            corrections: Mutex::new(VecDeque::from([Some("A web todo app".to_string())])),
            ..ScriptedUser::default()
        };
        let h = with_user(user);
        let result = ConfirmQueryWorker.execute(&state(), &h.ctx).await;
        assert_eq!(result.patch.refined_query.as_deref(), Some("A web todo app"));
    }

    #[tokio::test]
    async fn confirmation_failure_accepts_and_degrades() {
        let h = with_user(ScriptedUser::failing());
        let result = ConfirmQueryWorker.execute(&state(), &h.ctx).await;
        assert!(matches!(result.outcome, Outcome::Degraded { .. }));
        assert!(result.patch.refined_query.is_none());
    }

    #[tokio::test]
    async fn clarification_failure_uses_placeholder() {
        let h = Harness::with_llm(ScriptedCompletion::failing());
        let result = ClarificationWorker.execute(&state(), &h.ctx).await;
        assert!(matches!(result.outcome, Outcome::Degraded { .. }));
        assert_eq!(result.patch.clarification_questions.as_deref(), Some(NO_QUESTIONS));
    }

    #[tokio::test]
    async fn clarification_success_stores_questions() {
        let h = Harness::with_llm(ScriptedCompletion::new().otherwise("1. Storage? File.\n"));
        let result = ClarificationWorker.execute(&state(), &h.ctx).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(
            result.patch.clarification_questions.as_deref(),
            Some("1. Storage? File.")
        );
        assert!(h.llm.calls()[0].prompt.contains("command-line todo"));
    }

    #[tokio::test]
    async fn brief_skips_placeholder_questions() {
        let h = with_user(ScriptedUser::default());
        let mut s = state();
        s.clarification_questions = Some(NO_QUESTIONS.to_string());
        let result = BriefWorker.execute(&s, &h.ctx).await;
        let brief = result.patch.project_brief.unwrap();
        assert_eq!(brief.summary, "A command-line todo list manager");
        assert!(brief.clarifications.is_none());
    }

    #[tokio::test]
    async fn present_plan_shows_both_plans() {
        let h = with_user(ScriptedUser::default());
        let result = PresentPlanWorker.execute(&state(), &h.ctx).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(
            *h.user.presented.lock().unwrap(),
            vec!["Conceptual plan".to_string(), "Technical plan".to_string()]
        );
    }

    #[tokio::test]
    async fn feedback_normalizes_approve() {
        let h = with_user(ScriptedUser::with_feedback(&["  Approve "]));
        let result = FeedbackWorker.execute(&state(), &h.ctx).await;
        assert_eq!(result.patch.user_feedback, Some(Some("approve".to_string())));
    }

    #[tokio::test]
    async fn feedback_keeps_change_request() {
        let h = with_user(ScriptedUser::with_feedback(&["add due dates"]));
        let result = FeedbackWorker.execute(&state(), &h.ctx).await;
        assert_eq!(result.patch.user_feedback, Some(Some("add due dates".to_string())));
        assert!(result.patch.entry().contains("add due dates"));
    }

    #[tokio::test]
    async fn feedback_failure_approves() {
        let h = with_user(ScriptedUser::failing());
        let result = FeedbackWorker.execute(&state(), &h.ctx).await;
        assert_eq!(result.patch.user_feedback, Some(Some("approve".to_string())));
        assert!(matches!(result.outcome, Outcome::Degraded { .. }));
    }

    #[tokio::test]
    async fn post_delivery_records_new_request() {
        let h = with_user(ScriptedUser::with_post_delivery(&["now build a notes app"]));
        let result = PostDeliveryWorker.execute(&state(), &h.ctx).await;
        assert_eq!(
            result.patch.user_feedback,
            Some(Some("now build a notes app".to_string()))
        );
    }

    #[tokio::test]
    async fn post_delivery_failure_completes() {
        let h = with_user(ScriptedUser::failing());
        let result = PostDeliveryWorker.execute(&state(), &h.ctx).await;
        assert_eq!(result.patch.user_feedback, Some(Some("complete".to_string())));
    }
}
