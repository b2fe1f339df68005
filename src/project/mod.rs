//! Canonical project state and the deltas workers return.
//!
//! `ProjectState` is the single source of truth for one run. Workers only
//! ever see it by shared reference and describe their changes as a
//! [`StatePatch`], which the engine merges between stage executions.

mod patch;
mod task;

pub use patch::{StatePatch, TaskUpdate};
pub use task::{Task, TaskStatus};

use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// First entry of a freshly re-engaged project.
pub const NEW_PROJECT_MARKER: &str = "--- NEW PROJECT STARTED ---";

/// Structured summary of what the user asked for, fixed before planning starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectBrief {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarifications: Option<String>,
}

/// Outcome of a QA pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    #[default]
    Approved,
    RevisionRequired,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Approved => write!(f, "Approved"),
            Verdict::RevisionRequired => write!(f, "Revision Required"),
        }
    }
}

/// Review feedback handed from a QA pass to whichever stage consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDossier {
    /// Review stage that produced this dossier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_reviewed: Option<String>,
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_reason: Option<String>,
    #[serde(default)]
    pub verdict: Verdict,
}

impl ReviewDossier {
    pub fn requires_revision(&self) -> bool {
        self.verdict == Verdict::RevisionRequired
    }
}

/// Binding decision on a raised dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisputeRuling {
    /// The supervisor's objection stands; the reviewed artifact proceeds.
    Uphold,
    /// The review feedback stands; the artifact goes back for revision.
    Overrule,
    /// The adjudicator could not be reached.
    Error,
}

impl std::fmt::Display for DisputeRuling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisputeRuling::Uphold => write!(f, "UPHOLD"),
            DisputeRuling::Overrule => write!(f, "OVERRULE"),
            DisputeRuling::Error => write!(f, "ERROR"),
        }
    }
}

/// The full state of one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub initial_request: String,
    #[serde(default)]
    pub refined_query: Option<String>,
    #[serde(default)]
    pub clarification_questions: Option<String>,
    #[serde(default)]
    pub project_brief: Option<ProjectBrief>,
    #[serde(default)]
    pub research_document: Option<String>,
    #[serde(default)]
    pub conceptual_plan: Option<String>,
    #[serde(default)]
    pub technical_plan: Option<String>,
    #[serde(default)]
    pub task_list: Option<Vec<Task>>,
    #[serde(default)]
    pub review_dossier: Option<ReviewDossier>,
    #[serde(default)]
    pub dispute_raised: bool,
    #[serde(default)]
    pub dispute_ruling: Option<DisputeRuling>,
    #[serde(default)]
    pub user_feedback: Option<String>,
    #[serde(default)]
    pub last_completed_step: Option<Stage>,
    #[serde(default)]
    history_log: Vec<String>,
}

impl ProjectState {
    pub fn new(initial_request: impl Into<String>) -> Self {
        Self {
            initial_request: initial_request.into(),
            ..Self::default()
        }
    }

    /// A clean state for a new project started from `request`.
    ///
    /// Everything but the request and a freshly seeded history is empty;
    /// `last_completed_step` records the stage that performed the reset.
    pub fn reengaged(request: impl Into<String>, by: Stage) -> Self {
        let request = request.into();
        let history_log = vec![
            NEW_PROJECT_MARKER.to_string(),
            format!("Initial Request: {}", request),
        ];
        Self {
            initial_request: request,
            last_completed_step: Some(by),
            history_log,
            ..Self::default()
        }
    }

    /// Append-only narrative of everything that happened in this project.
    pub fn history_log(&self) -> &[String] {
        &self.history_log
    }

    /// The task list, or an empty slice before decomposition.
    pub fn tasks(&self) -> &[Task] {
        self.task_list.as_deref().unwrap_or(&[])
    }

    /// The best available description of what the user wants.
    pub fn working_request(&self) -> &str {
        self.refined_query
            .as_deref()
            .unwrap_or(&self.initial_request)
    }

    /// Serialize for prompts and the decision service.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}
