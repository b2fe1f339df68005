//! The static transition table.
//!
//! The same table is rendered into the decision prompt and evaluated
//! directly by [`TableDecision`](super::TableDecision).

use tracing::warn;

use crate::project::{DisputeRuling, ProjectState};
use crate::scheduler::TaskScheduler;
use crate::stage::{Specialization, Stage};
use crate::user::{APPROVE, COMPLETE};

/// Where a review leads when its verdict is "approved".
pub fn approved_path(review: Stage) -> Option<Stage> {
    match review {
        Stage::ConceptReview => Some(Stage::TechnicalPlanning),
        Stage::TechnicalReview => Some(Stage::PresentPlan),
        Stage::QaLoop => Some(Stage::ProjectCompletion),
        _ => None,
    }
}

/// Where a review leads when its verdict is "revision required".
pub fn revision_path(review: Stage) -> Option<Stage> {
    match review {
        Stage::ConceptReview => Some(Stage::CreativeIdeation),
        Stage::TechnicalReview => Some(Stage::TechnicalPlanning),
        Stage::QaLoop => Some(Stage::DebugFix),
        _ => None,
    }
}

/// Human-readable table for the decision prompt.
pub fn render_transition_table() -> String {
    use Stage::*;
    let linear = [
        InitialRequest,
        PolishQuery,
        ConfirmQuery,
        DeepClarification,
        ProjectBrief,
        MarketAnalysis,
        CreativeIdeation,
        ConceptReview,
    ]
    .map(|s| s.id())
    .join(" -> ");

    let mut lines = vec![
        format!("- {}", linear),
        format!(
            "- {}: approved -> {}; revision required -> {}",
            ConceptReview, TechnicalPlanning, CreativeIdeation
        ),
        format!("- {} -> {}", TechnicalPlanning, TechnicalReview),
        format!(
            "- {}: approved -> {}; revision required -> {}",
            TechnicalReview, PresentPlan, TechnicalPlanning
        ),
        format!("- {} -> {}", PresentPlan, UserFeedback),
        format!(
            "- {}: feedback \"{}\" -> {}; any other feedback -> {}",
            UserFeedback, APPROVE, DecomposePlan, MarketAnalysis
        ),
        format!("- {} -> {}", DecomposePlan, TaskExecution),
        format!(
            "- {}: eligible development tasks remain -> {}; otherwise -> {}",
            TaskExecution, TaskExecution, QaLoop
        ),
        format!(
            "- {}: approved -> {}; revision required -> {}",
            QaLoop, ProjectCompletion, DebugFix
        ),
        format!("- {} -> {}", DebugFix, QaLoop),
        format!(
            "- {}: UPHOLD -> the disputed review's approved path; OVERRULE or ERROR -> its revision path",
            DisputeResolution
        ),
        format!("- {} -> {}", ProjectCompletion, PostDeliveryReview),
        format!(
            "- {}: feedback \"{}\" -> END; any other feedback -> {}",
            PostDeliveryReview, COMPLETE, Reengage
        ),
        format!("- {} -> {}", Reengage, InitialRequest),
    ];
    lines.push(
        "- a review with dispute_raised = true -> step_dispute_resolution".to_string(),
    );
    lines.join("\n")
}

/// Evaluate the table for `state`. `None` means the workflow is finished.
pub fn next_from_table(state: &ProjectState, scheduler: &TaskScheduler) -> Option<Stage> {
    let revision = state
        .review_dossier
        .as_ref()
        .is_some_and(|d| d.requires_revision());
    let verdict_path = |review: Stage| {
        if revision {
            revision_path(review)
        } else {
            approved_path(review)
        }
    };

    let Some(last) = state.last_completed_step else {
        return Some(Stage::ENTRY);
    };

    match last {
        Stage::InitialRequest => Some(Stage::PolishQuery),
        Stage::PolishQuery => Some(Stage::ConfirmQuery),
        Stage::ConfirmQuery => Some(Stage::DeepClarification),
        Stage::DeepClarification => Some(Stage::ProjectBrief),
        Stage::ProjectBrief => Some(Stage::MarketAnalysis),
        Stage::MarketAnalysis => Some(Stage::CreativeIdeation),
        Stage::CreativeIdeation => Some(Stage::ConceptReview),
        Stage::ConceptReview | Stage::TechnicalReview | Stage::QaLoop => {
            if state.dispute_raised {
                Some(Stage::DisputeResolution)
            } else {
                verdict_path(last)
            }
        }
        Stage::TechnicalPlanning => Some(Stage::TechnicalReview),
        Stage::PresentPlan => Some(Stage::UserFeedback),
        Stage::UserFeedback => {
            if state.user_feedback.as_deref() == Some(APPROVE) {
                Some(Stage::DecomposePlan)
            } else {
                Some(Stage::MarketAnalysis)
            }
        }
        Stage::DecomposePlan => Some(Stage::TaskExecution),
        Stage::TaskExecution => {
            if scheduler.has_work(state.tasks(), &Specialization::DEVELOPMENT) {
                Some(Stage::TaskExecution)
            } else {
                Some(Stage::QaLoop)
            }
        }
        Stage::DebugFix => Some(Stage::QaLoop),
        Stage::DisputeResolution => {
            let Some(review) = state
                .review_dossier
                .as_ref()
                .and_then(|d| d.reviewed_stage)
            else {
                warn!("dispute resolved without a reviewed stage on record");
                return None;
            };
            match state.dispute_ruling {
                Some(DisputeRuling::Uphold) => approved_path(review),
                _ => revision_path(review),
            }
        }
        Stage::ProjectCompletion => Some(Stage::PostDeliveryReview),
        Stage::PostDeliveryReview => {
            if state.user_feedback.as_deref() == Some(COMPLETE) {
                None
            } else {
                Some(Stage::Reengage)
            }
        }
        Stage::Reengage => Some(Stage::InitialRequest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ReviewDossier, Task, TaskStatus, Verdict};

    fn after(stage: Stage) -> ProjectState {
        let mut state = ProjectState::new("build a todo app");
        state.last_completed_step = Some(stage);
        state
    }

    fn dossier(review: Stage, verdict: Verdict) -> ReviewDossier {
        ReviewDossier {
            reviewed_stage: Some(review),
            plan_reviewed: None,
            feedback: "notes".into(),
            dispute_reason: None,
            verdict,
        }
    }

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(2)
    }

    #[test]
    fn linear_prefix() {
        let pairs = [
            (Stage::InitialRequest, Stage::PolishQuery),
            (Stage::PolishQuery, Stage::ConfirmQuery),
            (Stage::ConfirmQuery, Stage::DeepClarification),
            (Stage::DeepClarification, Stage::ProjectBrief),
            (Stage::ProjectBrief, Stage::MarketAnalysis),
            (Stage::MarketAnalysis, Stage::CreativeIdeation),
            (Stage::CreativeIdeation, Stage::ConceptReview),
            (Stage::TechnicalPlanning, Stage::TechnicalReview),
            (Stage::PresentPlan, Stage::UserFeedback),
            (Stage::DecomposePlan, Stage::TaskExecution),
            (Stage::DebugFix, Stage::QaLoop),
            (Stage::ProjectCompletion, Stage::PostDeliveryReview),
            (Stage::Reengage, Stage::InitialRequest),
        ];
        for (from, to) in pairs {
            assert_eq!(next_from_table(&after(from), &scheduler()), Some(to), "from {from}");
        }
    }

    #[test]
    fn empty_state_starts_at_entry() {
        let state = ProjectState::new("x");
        assert_eq!(next_from_table(&state, &scheduler()), Some(Stage::ENTRY));
    }

    #[test]
    fn reviews_follow_verdict() {
        for review in Stage::REVIEWS {
            let mut state = after(review);
            state.review_dossier = Some(dossier(review, Verdict::Approved));
            assert_eq!(next_from_table(&state, &scheduler()), approved_path(review));

            state.review_dossier = Some(dossier(review, Verdict::RevisionRequired));
            assert_eq!(next_from_table(&state, &scheduler()), revision_path(review));
        }
    }

    #[test]
    fn task_execution_loops_while_work_remains() {
        let mut state = after(Stage::TaskExecution);
        state.task_list = Some(vec![
            Task::new("A", "a", "backend_development_group").with_status(TaskStatus::Completed),
            Task::new("B", "b", "frontend_development_group").with_dependencies(["A"]),
        ]);
        assert_eq!(next_from_table(&state, &scheduler()), Some(Stage::TaskExecution));

        state.task_list.as_mut().unwrap()[1].status = TaskStatus::Completed;
        assert_eq!(next_from_table(&state, &scheduler()), Some(Stage::QaLoop));
    }

    #[test]
    fn dispute_ruling_picks_path_of_reviewed_stage() {
        let mut state = after(Stage::DisputeResolution);
        state.review_dossier = Some(dossier(Stage::TechnicalReview, Verdict::RevisionRequired));
        state.dispute_ruling = Some(DisputeRuling::Uphold);
        assert_eq!(next_from_table(&state, &scheduler()), Some(Stage::PresentPlan));

        state.dispute_ruling = Some(DisputeRuling::Overrule);
        assert_eq!(next_from_table(&state, &scheduler()), Some(Stage::TechnicalPlanning));

        state.dispute_ruling = Some(DisputeRuling::Error);
        assert_eq!(next_from_table(&state, &scheduler()), Some(Stage::TechnicalPlanning));
    }

    #[test]
    fn dispute_without_reviewed_stage_ends() {
        let state = after(Stage::DisputeResolution);
        assert_eq!(next_from_table(&state, &scheduler()), None);
    }

    #[test]
    fn post_delivery_complete_ends() {
        let mut state = after(Stage::PostDeliveryReview);
        state.user_feedback = Some("complete".into());
        assert_eq!(next_from_table(&state, &scheduler()), None);
        state.user_feedback = Some("now add dark mode".into());
        assert_eq!(next_from_table(&state, &scheduler()), Some(Stage::Reengage));
    }

    #[test]
    fn rendered_table_names_every_stage() {
        let table = render_transition_table();
        for stage in Stage::ALL {
            assert!(table.contains(stage.id()), "table is missing {stage}");
        }
    }
}
