use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::table::{next_from_table, render_transition_table};
use crate::llm::{Completion, CompletionRequest};
use crate::project::ProjectState;
use crate::prompts::PromptLibrary;
use crate::scheduler::TaskScheduler;
use crate::stage::Stage;

/// Largest serialized state sent to the decision service.
const MAX_STATE_BYTES: usize = 24_000;

/// Keyword the table decision answers with when the workflow is finished.
pub const END: &str = "END";

/// Picks the next stage when no hard-wired routing rule applies.
///
/// The answer is raw text; the router takes its first non-empty line.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(&self, state: &ProjectState, registered: &[Stage]) -> Result<String>;
}

/// Asks the reasoning service, showing it the state and the table.
pub struct LlmDecision {
    llm: Arc<dyn Completion>,
    model: String,
    prompts: PromptLibrary,
}

impl LlmDecision {
    pub fn new(llm: Arc<dyn Completion>, model: impl Into<String>, prompts: PromptLibrary) -> Self {
        Self {
            llm,
            model: model.into(),
            prompts,
        }
    }

    fn build_prompt(state: &ProjectState, registered: &[Stage]) -> String {
        let ids: Vec<&str> = registered.iter().map(|s| s.id()).collect();
        format!(
            "## Project state\n```json\n{}\n```\n\n## Transition table\n{}\n\n## Valid answers\n{}, END\n\nAnswer with the next stage identifier only.",
            crate::util::truncate(&state.to_pretty_json(), MAX_STATE_BYTES),
            render_transition_table(),
            ids.join(", ")
        )
    }
}

#[async_trait]
impl DecisionService for LlmDecision {
    async fn decide(&self, state: &ProjectState, registered: &[Stage]) -> Result<String> {
        let request = CompletionRequest::new(Self::build_prompt(state, registered))
            .with_system(self.prompts.get("router"))
            .with_model(self.model.clone());
        let answer = self.llm.complete(request).await?;
        debug!(answer = %answer.lines().next().unwrap_or_default(), "decision service answered");
        Ok(answer)
    }
}

/// Evaluates the transition table locally.
#[derive(Debug, Clone, Copy)]
pub struct TableDecision {
    scheduler: TaskScheduler,
}

impl TableDecision {
    pub fn new(scheduler: TaskScheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl DecisionService for TableDecision {
    async fn decide(&self, state: &ProjectState, _registered: &[Stage]) -> Result<String> {
        Ok(next_from_table(state, &self.scheduler)
            .map(|stage| stage.id().to_string())
            .unwrap_or_else(|| END.to_string()))
    }
}
