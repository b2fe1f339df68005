use async_trait::async_trait;
use tracing::warn;

use super::{RunContext, StageResult, Worker};
use crate::project::{ProjectState, StatePatch};
use crate::stage::{Specialization, Stage};

/// Rewrites the raw request as a precise requirement.
///
/// When the reasoning service is unavailable the request is echoed
/// verbatim so later stages always have a refined query to work from.
pub struct LanguageWorker;

#[async_trait]
impl Worker for LanguageWorker {
    fn stage(&self) -> Stage {
        Stage::PolishQuery
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let request = state.initial_request.trim();
        let answer = ctx
            .ask(Specialization::LanguageExpert, "polish_query", request)
            .await
            .map(|a| a.trim().to_string());

        match answer {
            Ok(refined) if !refined.is_empty() => {
                let mut patch = StatePatch::new(
                    self.stage(),
                    format!("Language expert refined the request: {}", refined),
                );
                patch.refined_query = Some(refined);
                StageResult::success(patch)
            }
            Ok(_) => echo(self.stage(), request, "language expert returned nothing".into()),
            Err(e) => {
                warn!(error = %e, "query refinement failed, echoing request");
                echo(self.stage(), request, format!("query refinement failed: {}", e))
            }
        }
    }
}

fn echo(stage: Stage, request: &str, reason: String) -> StageResult {
    let mut patch = StatePatch::new(stage, "Request kept as written; refinement unavailable.");
    patch.refined_query = Some(request.to_string());
    StageResult::degraded(patch, reason)
}
