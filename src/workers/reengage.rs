use async_trait::async_trait;
use tracing::{info, warn};

use super::{RunContext, StageResult, Worker};
use crate::project::{ProjectState, StatePatch};
use crate::stage::Stage;
use crate::user::COMPLETE;

/// Starts a fresh project from the user's post-delivery request.
pub struct ReengageWorker;

#[async_trait]
impl Worker for ReengageWorker {
    fn stage(&self) -> Stage {
        Stage::Reengage
    }

    async fn execute(&self, state: &ProjectState, _ctx: &RunContext) -> StageResult {
        let request = state
            .user_feedback
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty() && *f != COMPLETE);
        match request {
            Some(request) => {
                info!(request, "re-engaging with a new request");
                StageResult::success(StatePatch::reengage(request))
            }
            None => {
                warn!("no new request recorded, restarting with the original one");
                StageResult::degraded(
                    StatePatch::reengage(state.initial_request.clone()),
                    "no new request recorded; restarted with the original request",
                )
            }
        }
    }
}
