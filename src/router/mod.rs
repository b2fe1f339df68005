//! Next-stage selection.
//!
//! Hard-wired rules are checked first, in this order:
//! 1. a review stage that raised a dispute goes to dispute resolution;
//! 2. user feedback other than "approve" goes back to market analysis;
//! 3. after post-delivery review, "complete" ends the run and anything
//!    else re-engages;
//! 4. a state with no completed stage starts at the entry stage.
//!
//! Everything else is delegated to a [`DecisionService`]. Its answer is
//! trusted only if it names a registered stage or a terminal keyword; any
//! other answer, and any failure, ends the run.

mod decision;
mod table;

pub use decision::{DecisionService, END, LlmDecision, TableDecision};
pub use table::{approved_path, next_from_table, render_transition_table, revision_path};

use std::sync::Arc;

use tracing::{info, warn};

use crate::project::ProjectState;
use crate::stage::Stage;
use crate::user::{APPROVE, COMPLETE};

/// Keywords accepted as "the workflow is finished".
pub const TERMINAL_KEYWORDS: &[&str] = &["END", "__end__", "TERMINAL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Next(Stage),
    Terminal,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Next(stage) => write!(f, "{}", stage),
            Route::Terminal => write!(f, "TERMINAL"),
        }
    }
}

pub struct Router {
    decision: Arc<dyn DecisionService>,
    registered: Vec<Stage>,
}

impl Router {
    pub fn new(decision: Arc<dyn DecisionService>, registered: impl IntoIterator<Item = Stage>) -> Self {
        let mut registered: Vec<Stage> = registered.into_iter().collect();
        registered.sort();
        registered.dedup();
        Self {
            decision,
            registered,
        }
    }

    pub fn registered(&self) -> &[Stage] {
        &self.registered
    }

    pub async fn route(&self, state: &ProjectState) -> Route {
        if let Some(route) = Self::fixed_route(state) {
            info!(next = %route, "fixed routing rule applied");
            return route;
        }

        match self.decision.decide(state, &self.registered).await {
            Ok(answer) => self.interpret(&answer),
            Err(e) => {
                warn!(error = %e, "decision service failed, ending run");
                Route::Terminal
            }
        }
    }

    /// The hard-wired rules, or `None` when the decision service must be asked.
    pub fn fixed_route(state: &ProjectState) -> Option<Route> {
        let Some(last) = state.last_completed_step else {
            return Some(Route::Next(Stage::ENTRY));
        };

        if last.is_review() && state.dispute_raised {
            return Some(Route::Next(Stage::DisputeResolution));
        }

        let feedback = state.user_feedback.as_deref();
        match last {
            Stage::UserFeedback if feedback != Some(APPROVE) => {
                Some(Route::Next(Stage::MarketAnalysis))
            }
            Stage::PostDeliveryReview if feedback == Some(COMPLETE) => Some(Route::Terminal),
            Stage::PostDeliveryReview => Some(Route::Next(Stage::Reengage)),
            _ => None,
        }
    }

    /// Interpret a decision answer: first non-empty line only.
    pub fn interpret(&self, answer: &str) -> Route {
        let Some(line) = answer.lines().map(str::trim).find(|l| !l.is_empty()) else {
            warn!("decision service returned an empty answer, ending run");
            return Route::Terminal;
        };
        let token = line.trim_matches(|c| c == '`' || c == '"' || c == '\'' || c == '.');

        if TERMINAL_KEYWORDS
            .iter()
            .any(|kw| kw.eq_ignore_ascii_case(token))
        {
            return Route::Terminal;
        }

        match token.parse::<Stage>() {
            Ok(stage) if self.registered.contains(&stage) => Route::Next(stage),
            _ => {
                warn!(answer = %line, "decision service named an unregistered stage, ending run");
                Route::Terminal
            }
        }
    }
}
