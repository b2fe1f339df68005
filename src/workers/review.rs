//! The QA council.
//!
//! One worker serves all three review stages. For the code review the
//! project's tests run in the sandbox first; a failing run short-circuits
//! the council. Gating auditors then run in configured order until one asks
//! for a revision, the adversarial tester adds advisory findings, and the
//! council supervisor may dispute an auditor's revision request.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{MAX_DOC_BYTES, RunContext, StageResult, Worker, brief_context};
use crate::project::{ProjectState, ReviewDossier, StatePatch, Verdict};
use crate::stage::{Specialization, Stage};
use crate::util::truncate;

const REVISION_MARKER: &str = "revision required";
const DISPUTE_MARKER: &str = "DISPUTE";

pub struct ReviewWorker {
    stage: Stage,
}

impl ReviewWorker {
    /// Non-review stages fall back to the code review.
    pub fn new(stage: Stage) -> Self {
        let stage = if stage.is_review() {
            stage
        } else {
            Stage::QaLoop
        };
        Self { stage }
    }

    fn subject<'a>(&self, state: &'a ProjectState) -> Option<&'a str> {
        match self.stage {
            Stage::ConceptReview => state.conceptual_plan.as_deref(),
            Stage::TechnicalReview => state.technical_plan.as_deref(),
            _ => None,
        }
    }
}

/// Accumulates dossier sections while the council works.
#[derive(Default)]
struct Council {
    sections: Vec<String>,
    problems: Vec<String>,
    verdict: Verdict,
    flagged_by_auditor: bool,
}

impl Council {
    fn section(&mut self, title: &str, body: &str) {
        self.sections.push(format!("## {}\n{}", title, body.trim()));
    }

    fn dossier_text(&self, stage: Stage) -> String {
        format!(
            "# QA Council Review Dossier\n\n**Reviewed stage:** {}\n\n{}\n\n**FINAL VERDICT: {}**",
            stage,
            self.sections.join("\n\n"),
            self.verdict
        )
    }
}

#[async_trait]
impl Worker for ReviewWorker {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let mut council = Council::default();

        let material = match self.stage {
            Stage::QaLoop => {
                let tests_passed = self.run_tests(ctx, &mut council).await;
                if !tests_passed {
                    return self.finish(state, ctx, council).await;
                }
                format!(
                    "## Delivered code\n{}",
                    ctx.workspace.snapshot(MAX_DOC_BYTES)
                )
            }
            _ => format!(
                "## Plan under review\n{}",
                truncate(self.subject(state).unwrap_or("(missing)"), MAX_DOC_BYTES)
            ),
        };
        let prompt = format!("{}\n{}", brief_context(state), material);

        for auditor in &ctx.qa.auditors {
            match ctx.ask(Specialization::QaCouncil, auditor, prompt.as_str()).await {
                Ok(feedback) => {
                    let flagged = requests_revision(&feedback);
                    council.section(auditor, &feedback);
                    if flagged {
                        info!(auditor = %auditor, stage = %self.stage, "auditor requested revision");
                        council.verdict = Verdict::RevisionRequired;
                        council.flagged_by_auditor = true;
                        break;
                    }
                }
                Err(e) => {
                    warn!(auditor = %auditor, error = %e, "auditor call failed");
                    council.section(auditor, &format!("Auditor unavailable: {}", e));
                    council.problems.push(format!("{} failed: {}", auditor, e));
                }
            }
        }

        if ctx.qa.adversarial {
            match ctx
                .ask(Specialization::QaCouncil, "antagonistic_tester", prompt.as_str())
                .await
            {
                Ok(findings) => council.section("Adversarial findings (advisory)", &findings),
                Err(e) => {
                    warn!(error = %e, "adversarial tester failed");
                    council.problems.push(format!("antagonistic_tester failed: {}", e));
                }
            }
        }

        self.finish(state, ctx, council).await
    }
}

impl ReviewWorker {
    /// Run the project's tests. Returns false when they fail.
    async fn run_tests(&self, ctx: &RunContext, council: &mut Council) -> bool {
        let result = ctx.sandbox.run(&ctx.qa.test_command, &ctx.run_id).await;
        let report = result.report(MAX_DOC_BYTES);
        if result.is_success() {
            council.section(
                "Automated tests",
                &format!("`{}` passed.\n{}", ctx.qa.test_command, report),
            );
            return true;
        }
        if result.exit_code.is_none() {
            // No exit code: the sandbox itself failed, not the tests.
            let reason = result.error.clone().unwrap_or_else(|| "unknown error".into());
            warn!(error = %reason, "tests could not run, continuing with auditors");
            council.section(
                "Automated tests",
                &format!("Tests could not run: {}", reason),
            );
            council.problems.push(format!("tests could not run: {}", reason));
            return true;
        }
        info!(exit_code = ?result.exit_code, "automated tests failed");
        council.verdict = Verdict::RevisionRequired;
        council.section(
            "Automated tests",
            &format!("`{}` FAILED. Revision Required.\n{}", ctx.qa.test_command, report),
        );
        false
    }

    async fn finish(&self, state: &ProjectState, ctx: &RunContext, mut council: Council) -> StageResult {
        let mut dispute_reason = None;
        if council.flagged_by_auditor && ctx.qa.allow_disputes {
            dispute_reason = self.supervise(state, ctx, &mut council).await;
        }

        let feedback = council.dossier_text(self.stage);
        let dossier = ReviewDossier {
            reviewed_stage: Some(self.stage),
            plan_reviewed: self.subject(state).map(str::to_string),
            feedback,
            dispute_reason: dispute_reason.clone(),
            verdict: council.verdict,
        };

        let mut entry = format!("{} verdict: {}", self.stage.title(), council.verdict);
        if dispute_reason.is_some() {
            entry.push_str(" (disputed by the council supervisor)");
        }
        let mut patch = StatePatch::new(self.stage, entry);
        patch.review_dossier = Some(Some(dossier));
        patch.dispute_raised = Some(dispute_reason.is_some());
        patch.dispute_ruling = Some(None);
        StageResult::from_problems(patch, council.problems)
    }

    /// Ask the supervisor whether to dispute. Returns the dispute reason.
    async fn supervise(
        &self,
        state: &ProjectState,
        ctx: &RunContext,
        council: &mut Council,
    ) -> Option<String> {
        let prompt = format!(
            "{}\n## Review feedback\n{}",
            brief_context(state),
            truncate(&council.sections.join("\n\n"), MAX_DOC_BYTES)
        );
        let answer = match ctx
            .ask_leader(Specialization::QaCouncil, "qa_supervisor", prompt)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "council supervisor failed, no dispute raised");
                council.problems.push(format!("qa_supervisor failed: {}", e));
                return None;
            }
        };

        let answer = answer.trim();
        if !answer.to_uppercase().starts_with(DISPUTE_MARKER) {
            return None;
        }
        let reason = answer[DISPUTE_MARKER.len()..]
            .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
            .trim();
        info!(stage = %self.stage, "council supervisor raised a dispute");
        council.section("Supervisor dispute", answer);
        Some(if reason.is_empty() {
            answer.to_string()
        } else {
            reason.to_string()
        })
    }
}

/// Auditors open their answer with the marker when something must change.
/// Leading markdown emphasis or headings are ignored.
fn requests_revision(feedback: &str) -> bool {
    let opening = feedback
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '#' | '_' | '>'));
    opening
        .get(..REVISION_MARKER.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(REVISION_MARKER))
}
