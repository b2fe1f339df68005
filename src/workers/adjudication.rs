use async_trait::async_trait;
use tracing::{info, warn};

use super::{MAX_DOC_BYTES, RunContext, StageResult, Worker, brief_context};
use crate::project::{DisputeRuling, ProjectState, StatePatch};
use crate::stage::{Specialization, Stage};
use crate::util::truncate;

/// Parse an adjudicator answer. Anything but an exact `UPHOLD` or
/// `OVERRULE` (after trimming, any case) is `None`.
pub fn parse_ruling(answer: &str) -> Option<DisputeRuling> {
    match answer.trim().to_uppercase().as_str() {
        "UPHOLD" => Some(DisputeRuling::Uphold),
        "OVERRULE" => Some(DisputeRuling::Overrule),
        _ => None,
    }
}

/// Rules on a dispute raised by the council supervisor.
pub struct AdjudicationWorker;

#[async_trait]
impl Worker for AdjudicationWorker {
    fn stage(&self) -> Stage {
        Stage::DisputeResolution
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let dossier = state.review_dossier.as_ref();
        let mut prompt = brief_context(state);
        if let Some(plan) = dossier.and_then(|d| d.plan_reviewed.as_deref()) {
            prompt.push_str(&format!("\n## Reviewed plan\n{}\n", truncate(plan, MAX_DOC_BYTES)));
        }
        prompt.push_str(&format!(
            "\n## Review feedback\n{}\n\n## Supervisor's dispute\n{}\n",
            truncate(
                dossier.map(|d| d.feedback.as_str()).unwrap_or("(none)"),
                MAX_DOC_BYTES
            ),
            dossier
                .and_then(|d| d.dispute_reason.as_deref())
                .unwrap_or("(no reason given)")
        ));

        let (ruling, failure) = match ctx
            .ask_leader(Specialization::AdjudicationUnit, "adjudicator", prompt)
            .await
        {
            Ok(answer) => match parse_ruling(&answer) {
                Some(ruling) => (ruling, None),
                None => {
                    warn!(answer = %answer.trim(), "unrecognized ruling, defaulting to OVERRULE");
                    (
                        DisputeRuling::Overrule,
                        Some(format!("unrecognized ruling '{}'", answer.trim())),
                    )
                }
            },
            Err(e) => {
                warn!(error = %e, "adjudication failed");
                (DisputeRuling::Error, Some(format!("adjudication failed: {}", e)))
            }
        };
        info!(ruling = %ruling, "dispute resolved");

        let mut patch = StatePatch::new(self.stage(), format!("Dispute ruling: {}.", ruling));
        patch.dispute_raised = Some(false);
        patch.dispute_ruling = Some(Some(ruling));
        match failure {
            Some(reason) => StageResult::degraded(patch, reason),
            None => StageResult::success(patch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedCompletion;
    use crate::project::{ReviewDossier, Verdict};
    use crate::workers::Outcome;
    use crate::workers::testing::Harness;

    fn disputed() -> ProjectState {
        let mut state = ProjectState::new("todo app");
        state.dispute_raised = true;
        state.review_dossier = Some(ReviewDossier {
            reviewed_stage: Some(Stage::ConceptReview),
            plan_reviewed: Some("concept".into()),
            feedback: "Revision Required: add a web UI".into(),
            dispute_reason: Some("out of scope".into()),
            verdict: Verdict::RevisionRequired,
        });
        state
    }

    #[test]
    fn parse_ruling_is_exact_after_normalizing() {
        assert_eq!(parse_ruling("  uphold\n"), Some(DisputeRuling::Uphold));
        assert_eq!(parse_ruling("OVERRULE"), Some(DisputeRuling::Overrule));
        assert_eq!(parse_ruling("I UPHOLD the dispute"), None);
        assert_eq!(parse_ruling(""), None);
    }

    #[tokio::test]
    async fn uphold_clears_dispute_flag() {
        let h = Harness::with_llm(ScriptedCompletion::new().otherwise("Uphold"));
        let result = AdjudicationWorker.execute(&disputed(), &h.ctx).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.patch.dispute_ruling, Some(Some(DisputeRuling::Uphold)));
        assert_eq!(result.patch.dispute_raised, Some(false));
        let prompt = &h.llm.calls()[0].prompt;
        assert!(prompt.contains("out of scope"));
        assert!(prompt.contains("add a web UI"));
    }

    #[tokio::test]
    async fn unclear_answer_defaults_to_overrule() {
        let h = Harness::with_llm(ScriptedCompletion::new().otherwise("Probably uphold it"));
        let result = AdjudicationWorker.execute(&disputed(), &h.ctx).await;
        assert!(matches!(result.outcome, Outcome::Degraded { .. }));
        assert_eq!(result.patch.dispute_ruling, Some(Some(DisputeRuling::Overrule)));
    }

    #[tokio::test]
    async fn call_failure_records_error_ruling() {
        let h = Harness::with_llm(ScriptedCompletion::failing());
        let result = AdjudicationWorker.execute(&disputed(), &h.ctx).await;
        assert!(matches!(result.outcome, Outcome::Degraded { .. }));
        assert_eq!(result.patch.dispute_ruling, Some(Some(DisputeRuling::Error)));
        assert_eq!(result.patch.dispute_raised, Some(false));
    }
}
