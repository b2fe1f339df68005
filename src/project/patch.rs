use tracing::warn;

use super::{DisputeRuling, ProjectBrief, ProjectState, ReviewDossier, Task, TaskStatus};
use crate::stage::Stage;

/// In-place change to one task, applied by id.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub id: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    /// Whether this update records an execution attempt.
    pub attempted: bool,
}

impl TaskUpdate {
    pub fn completed(id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Completed,
            result: Some(result.into()),
            attempted: true,
        }
    }

    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Error,
            result: Some(reason.into()),
            attempted: true,
        }
    }
}

/// A partial update returned by a worker.
///
/// The owning stage and its single history entry are fixed at construction,
/// so every merge appends exactly one entry and sets `last_completed_step`.
/// Clearable fields use `Option<Option<T>>`: `None` leaves the field alone,
/// `Some(None)` clears it.
#[derive(Debug, Clone)]
pub struct StatePatch {
    stage: Stage,
    entry: String,
    reset_request: Option<String>,
    pub refined_query: Option<String>,
    pub clarification_questions: Option<String>,
    pub project_brief: Option<ProjectBrief>,
    pub research_document: Option<String>,
    pub conceptual_plan: Option<String>,
    pub technical_plan: Option<String>,
    pub task_list: Option<Vec<Task>>,
    pub task_updates: Vec<TaskUpdate>,
    pub review_dossier: Option<Option<ReviewDossier>>,
    pub dispute_raised: Option<bool>,
    pub dispute_ruling: Option<Option<DisputeRuling>>,
    pub user_feedback: Option<Option<String>>,
}

impl StatePatch {
    pub fn new(stage: Stage, entry: impl Into<String>) -> Self {
        Self {
            stage,
            entry: entry.into(),
            reset_request: None,
            refined_query: None,
            clarification_questions: None,
            project_brief: None,
            research_document: None,
            conceptual_plan: None,
            technical_plan: None,
            task_list: None,
            task_updates: Vec::new(),
            review_dossier: None,
            dispute_raised: None,
            dispute_ruling: None,
            user_feedback: None,
        }
    }

    /// Replace the whole state with a clean project for `request`.
    pub fn reengage(request: impl Into<String>) -> Self {
        let request = request.into();
        let mut patch = Self::new(Stage::Reengage, format!("Re-engaged with new request: {}", request));
        patch.reset_request = Some(request);
        patch
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn is_reset(&self) -> bool {
        self.reset_request.is_some()
    }
}

impl ProjectState {
    /// Merge a worker's patch into the state.
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(request) = patch.reset_request {
            *self = ProjectState::reengaged(request, patch.stage);
            return;
        }

        if let Some(value) = patch.refined_query {
            self.refined_query = Some(value);
        }
        if let Some(value) = patch.clarification_questions {
            self.clarification_questions = Some(value);
        }
        if let Some(value) = patch.project_brief {
            self.project_brief = Some(value);
        }
        if let Some(value) = patch.research_document {
            self.research_document = Some(value);
        }
        if let Some(value) = patch.conceptual_plan {
            self.conceptual_plan = Some(value);
        }
        if let Some(value) = patch.technical_plan {
            self.technical_plan = Some(value);
        }
        if let Some(tasks) = patch.task_list {
            self.task_list = Some(tasks);
        }
        if !patch.task_updates.is_empty() {
            let tasks = self.task_list.get_or_insert_with(Vec::new);
            for update in patch.task_updates {
                match tasks.iter_mut().find(|t| t.id == update.id) {
                    Some(task) => {
                        task.status = update.status;
                        task.result = update.result;
                        if update.attempted {
                            task.attempts += 1;
                        }
                    }
                    None => warn!(task = %update.id, "update for unknown task ignored"),
                }
            }
        }
        if let Some(value) = patch.review_dossier {
            self.review_dossier = value;
        }
        if let Some(value) = patch.dispute_raised {
            self.dispute_raised = value;
        }
        if let Some(value) = patch.dispute_ruling {
            self.dispute_ruling = value;
        }
        if let Some(value) = patch.user_feedback {
            self.user_feedback = value;
        }

        self.history_log.push(patch.entry);
        self.last_completed_step = Some(patch.stage);
    }
}
