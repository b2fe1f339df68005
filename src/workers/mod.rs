//! Stage workers.
//!
//! Every stage of the workflow is implemented by one [`Worker`]. A worker
//! reads the project state, may call the reasoning service, the sandbox,
//! the workspace or the user, and returns a [`StageResult`]: a
//! [`StatePatch`] carrying exactly one history entry plus an [`Outcome`]
//! describing how well it went. Workers never return errors; failures of
//! their collaborators become `Degraded` or `TaskError` outcomes with a
//! fallback patch.

mod adjudication;
mod changeset;
mod completion;
mod debugging;
mod decompose;
mod development;
mod engagement;
mod language;
mod planning;
mod reengage;
mod registry;
mod review;

pub use adjudication::{AdjudicationWorker, parse_ruling};
pub use changeset::{ChangeSet, FileChange};
pub use completion::CompletionWorker;
pub use debugging::DebugWorker;
pub use decompose::{DecompositionWorker, parse_task_list};
pub use development::DevelopmentWorker;
pub use engagement::{
    BriefWorker, ClarificationWorker, ConfirmQueryWorker, FeedbackWorker, IntakeWorker,
    PostDeliveryWorker, PresentPlanWorker,
};
pub use language::LanguageWorker;
pub use planning::{IdeationWorker, MarketAnalysisWorker, TechnicalPlanWorker};
pub use reengage::ReengageWorker;
pub use registry::WorkerRegistry;
pub use review::ReviewWorker;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conductor_config::{QaSection, Taxonomy};
use crate::llm::{Completion, CompletionRequest, LlmError};
use crate::project::{ProjectState, StatePatch};
use crate::prompts::PromptLibrary;
use crate::sandbox::Sandbox;
use crate::scheduler::TaskScheduler;
use crate::stage::{Specialization, Stage};
use crate::user::UserChannel;
use crate::workspace::Workspace;

/// Largest single document embedded in a prompt.
pub(crate) const MAX_DOC_BYTES: usize = 16_000;

/// How a stage execution went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Nothing to do; the stage passed through.
    Idle,
    /// A collaborator failed and a fallback was used.
    Degraded { reason: String },
    /// The claimed task failed.
    TaskError { task_id: String, reason: String },
}

impl Outcome {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Outcome::Degraded {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Idle => "idle",
            Outcome::Degraded { .. } => "degraded",
            Outcome::TaskError { .. } => "task_error",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Idle => write!(f, "idle"),
            Outcome::Degraded { reason } => write!(f, "degraded: {}", reason),
            Outcome::TaskError { task_id, reason } => {
                write!(f, "task {} failed: {}", task_id, reason)
            }
        }
    }
}

/// What a worker hands back to the engine.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub patch: StatePatch,
    pub outcome: Outcome,
}

impl StageResult {
    pub fn success(patch: StatePatch) -> Self {
        Self {
            patch,
            outcome: Outcome::Success,
        }
    }

    pub fn idle(patch: StatePatch) -> Self {
        Self {
            patch,
            outcome: Outcome::Idle,
        }
    }

    pub fn degraded(patch: StatePatch, reason: impl Into<String>) -> Self {
        Self {
            patch,
            outcome: Outcome::degraded(reason),
        }
    }

    /// `Success` when `problems` is empty, otherwise `Degraded` listing them.
    pub fn from_problems(patch: StatePatch, problems: Vec<String>) -> Self {
        if problems.is_empty() {
            Self::success(patch)
        } else {
            Self::degraded(patch, problems.join("; "))
        }
    }
}

/// Collaborators shared by all workers of one run.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub llm: Arc<dyn Completion>,
    pub sandbox: Arc<Sandbox>,
    pub workspace: Workspace,
    pub user: Arc<dyn UserChannel>,
    pub prompts: PromptLibrary,
    pub taxonomy: Arc<Taxonomy>,
    pub qa: QaSection,
    pub scheduler: TaskScheduler,
    pub notifications_log: PathBuf,
}

impl RunContext {
    /// The same collaborators, bound to another run.
    pub fn for_run(&self, run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..self.clone()
        }
    }

    /// Routine call using the group's labor model.
    pub async fn ask(
        &self,
        group: Specialization,
        role: &str,
        prompt: impl Into<String>,
    ) -> Result<String, LlmError> {
        let model = self.taxonomy.labor_model(group).map(str::to_string);
        self.call(model, role, prompt.into()).await
    }

    /// Supervisory call using the group's leader model.
    pub async fn ask_leader(
        &self,
        group: Specialization,
        role: &str,
        prompt: impl Into<String>,
    ) -> Result<String, LlmError> {
        let model = self.taxonomy.leader_model(group).map(str::to_string);
        self.call(model, role, prompt.into()).await
    }

    async fn call(&self, model: Option<String>, role: &str, prompt: String) -> Result<String, LlmError> {
        let mut request = CompletionRequest::new(prompt).with_system(self.prompts.get(role));
        request.model = model;
        self.llm.complete(request).await
    }
}

/// One stage of the workflow.
#[async_trait]
pub trait Worker: Send + Sync {
    fn stage(&self) -> Stage;

    /// Execute against a read-only view of the state. Never fails.
    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult;
}

/// Brief summary used as the opening of most prompts.
pub(crate) fn brief_context(state: &ProjectState) -> String {
    let mut out = format!("## Request\n{}\n", state.working_request());
    if let Some(brief) = &state.project_brief {
        out.push_str(&format!("\n## Project brief\n{}\n", brief.summary));
        if let Some(clarifications) = &brief.clarifications {
            out.push_str(&format!("\n## Clarifications\n{}\n", clarifications));
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::conductor_config::QaSection;
    use crate::llm::testing::ScriptedCompletion;
    use crate::sandbox::SandboxConfig;
    use crate::sandbox::testing::FakeBackend;
    use crate::stream::StreamRegistry;
    use crate::user::testing::ScriptedUser;

    pub struct Harness {
        pub dir: tempfile::TempDir,
        pub ctx: RunContext,
        pub llm: Arc<ScriptedCompletion>,
        pub backend: Arc<FakeBackend>,
        pub user: Arc<ScriptedUser>,
    }

    impl Harness {
        pub fn new(llm: ScriptedCompletion, backend: FakeBackend, user: ScriptedUser) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let workspace = Workspace::open(dir.path().join("workspace")).unwrap();
            let llm = Arc::new(llm);
            let backend = Arc::new(backend);
            let user = Arc::new(user);
            let sandbox = Sandbox::new(
                backend.clone(),
                SandboxConfig {
                    timeout: 5,
                    ..SandboxConfig::default()
                },
                workspace.root().to_path_buf(),
                StreamRegistry::new(),
            );
            let ctx = RunContext {
                run_id: "run-test".to_string(),
                llm: llm.clone(),
                sandbox: Arc::new(sandbox),
                workspace,
                user: user.clone(),
                prompts: PromptLibrary::builtin(),
                taxonomy: Arc::new(Taxonomy::default()),
                qa: QaSection::default(),
                scheduler: TaskScheduler::new(2),
                notifications_log: dir.path().join("logs/notifications.log"),
            };
            Self {
                dir,
                ctx,
                llm,
                backend,
                user,
            }
        }

        pub fn with_llm(llm: ScriptedCompletion) -> Self {
            Self::new(llm, FakeBackend::exiting(0, "", ""), ScriptedUser::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;
    use crate::llm::testing::ScriptedCompletion;

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Outcome::TaskError {
            task_id: "A".into(),
            reason: "boom".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"task_error","task_id":"A","reason":"boom"}"#);
        assert_eq!(serde_json::to_string(&Outcome::Idle).unwrap(), r#"{"kind":"idle"}"#);
    }

    #[test]
    fn from_problems_degrades_only_with_problems() {
        let ok = StageResult::from_problems(StatePatch::new(Stage::QaLoop, "x"), vec![]);
        assert_eq!(ok.outcome, Outcome::Success);
        let bad = StageResult::from_problems(
            StatePatch::new(Stage::QaLoop, "x"),
            vec!["a".into(), "b".into()],
        );
        assert_eq!(bad.outcome, Outcome::degraded("a; b"));
    }

    #[tokio::test]
    async fn ask_uses_labor_model_and_leader_uses_leader() {
        let h = Harness::with_llm(ScriptedCompletion::new().otherwise("ok"));
        h.ctx.ask(Specialization::UserEngagement, "clarification", "p").await.unwrap();
        h.ctx
            .ask_leader(Specialization::UserEngagement, "clarification", "p")
            .await
            .unwrap();
        let calls = h.llm.calls();
        assert_eq!(calls[0].model.as_deref(), Some("haiku"));
        assert_eq!(calls[1].model.as_deref(), Some("sonnet"));
        assert!(calls[0].system.as_deref().unwrap().contains("requirements engineer"));
    }

    #[test]
    fn for_run_rebinds_run_id() {
        let h = Harness::with_llm(ScriptedCompletion::new());
        assert_eq!(h.ctx.for_run("other").run_id, "other");
    }
}
