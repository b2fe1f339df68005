use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};

use super::store::{JournalEntry, RunRecord, RunStatus, RunStore};
use crate::conductor_config::{RouterMode, Taxonomy};
use crate::config::Config;
use crate::errors::EngineError;
use crate::llm::{ClaudeCli, Completion};
use crate::project::ProjectState;
use crate::prompts::PromptLibrary;
use crate::router::{DecisionService, LlmDecision, Route, Router, TableDecision};
use crate::sandbox::{DockerBackend, Sandbox};
use crate::scheduler::TaskScheduler;
use crate::stage::Stage;
use crate::stream::StreamRegistry;
use crate::user::UserChannel;
use crate::workers::{Outcome, RunContext, WorkerRegistry};
use crate::workspace::Workspace;

/// Progress callbacks for whoever is rendering a run.
pub trait RunObserver: Send + Sync {
    fn stage_started(&self, _run_id: &str, _step: u32, _stage: Stage) {}

    fn stage_finished(&self, _run_id: &str, _step: u32, _stage: Stage, _outcome: &Outcome, _entry: &str) {}

    fn run_finished(&self, _run_id: &str, _status: RunStatus, _steps: u32) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Where a drive of a run ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub steps: u32,
    pub last_stage: Option<Stage>,
}

impl RunSummary {
    fn of(record: &RunRecord) -> Self {
        Self {
            run_id: record.run_id.clone(),
            status: record.status,
            steps: record.steps,
            last_stage: record.state.last_completed_step,
        }
    }
}

/// Drives runs: route, execute, merge, persist, repeat.
///
/// One run is strictly sequential. Distinct runs share nothing but the
/// stream registry and the run store, whose per-run lock keeps two
/// processes from driving the same run.
pub struct Engine {
    store: RunStore,
    registry: WorkerRegistry,
    router: Router,
    ctx: RunContext,
    max_steps: u32,
    observer: Arc<dyn RunObserver>,
}

impl Engine {
    pub fn new(
        store: RunStore,
        registry: WorkerRegistry,
        decision: Arc<dyn DecisionService>,
        ctx: RunContext,
        max_steps: u32,
    ) -> Self {
        let router = Router::new(decision, registry.stages());
        Self {
            store,
            registry,
            router,
            ctx,
            max_steps: max_steps.max(1),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Wire the production collaborators from the project configuration.
    pub fn from_config(
        config: &Config,
        user: Arc<dyn UserChannel>,
        streams: Arc<StreamRegistry>,
    ) -> anyhow::Result<Self> {
        let toml = &config.toml;
        let taxonomy = Taxonomy::from_config(&toml.taxonomy).context("Invalid taxonomy")?;
        let registry = WorkerRegistry::build(&taxonomy)?;
        let workspace = Workspace::open(&config.workspace_dir)?;
        let prompts = PromptLibrary::with_overrides(&config.prompts_dir);
        let scheduler = TaskScheduler::new(toml.tasks.max_attempts);
        let llm: Arc<dyn Completion> = Arc::new(ClaudeCli::new(&toml.effective_llm()));

        let backend = Arc::new(DockerBackend::connect(config.sandbox_build_context()));
        let sandbox = Sandbox::new(
            backend,
            toml.sandbox.clone(),
            workspace.root().to_path_buf(),
            streams,
        );

        let decision: Arc<dyn DecisionService> = match toml.router.mode {
            RouterMode::Llm => Arc::new(LlmDecision::new(
                llm.clone(),
                toml.router.model.clone(),
                prompts.clone(),
            )),
            RouterMode::Table => Arc::new(TableDecision::new(scheduler)),
        };

        let ctx = RunContext {
            run_id: String::new(),
            llm,
            sandbox: Arc::new(sandbox),
            workspace,
            user,
            prompts,
            taxonomy: Arc::new(taxonomy),
            qa: toml.qa.clone(),
            scheduler,
            notifications_log: config.notifications_log(),
        };

        Ok(Self::new(
            RunStore::new(&config.runs_dir),
            registry,
            decision,
            ctx,
            toml.router.max_steps,
        ))
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Create and persist a new run for `request`. Returns its id.
    pub fn start(&self, request: &str) -> Result<String, EngineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        self.store.create(&RunRecord::new(&run_id, request))?;
        info!(run_id = %run_id, "run started");
        Ok(run_id)
    }

    /// Drive `run_id` until the router ends it or the step limit is hit.
    pub async fn run(&self, run_id: &str) -> Result<RunSummary, EngineError> {
        let _lock = self.store.lock(run_id)?;
        let mut record = self.store.load(run_id)?;
        if record.status.is_finished() {
            info!(run_id, "run already completed");
            return Ok(RunSummary::of(&record));
        }
        record.status = if record.cycles > 0 {
            RunStatus::Reengaged
        } else {
            RunStatus::Running
        };

        let ctx = self.ctx.for_run(run_id);
        let mut pending: Option<JournalEntry> = None;
        let mut driven = 0u32;

        loop {
            if driven >= self.max_steps {
                warn!(run_id, steps = driven, "step limit reached");
                self.flush(run_id, pending.take(), None)?;
                record.status = RunStatus::StepLimit;
                break;
            }

            let route = self.router.route(&record.state).await;
            self.flush(run_id, pending.take(), Some(route.to_string()))?;
            let stage = match route {
                Route::Terminal => {
                    record.status = RunStatus::Completed;
                    break;
                }
                Route::Next(stage) => stage,
            };
            let Some(worker) = self.registry.get(stage) else {
                // Unreachable through the router, which only accepts registered stages.
                warn!(run_id, stage = %stage, "no worker registered, ending run");
                record.status = RunStatus::Completed;
                break;
            };

            let step = record.steps + 1;
            info!(run_id, step, stage = %stage, "executing stage");
            self.observer.stage_started(run_id, step, stage);

            let result = worker.execute(&record.state, &ctx).await;
            let entry = result.patch.entry().to_string();
            let reset = result.patch.is_reset();
            record.state.apply(result.patch);
            record.steps = step;
            record.updated_at = Utc::now();
            if reset {
                record.cycles += 1;
                record.status = RunStatus::Reengaged;
            }
            self.store.save(&record)?;

            match &result.outcome {
                Outcome::Success | Outcome::Idle => {}
                other => warn!(run_id, stage = %stage, outcome = %other, "stage did not fully succeed"),
            }
            self.observer
                .stage_finished(run_id, step, stage, &result.outcome, &entry);
            pending = Some(JournalEntry {
                step,
                stage,
                outcome: result.outcome,
                next: None,
                timestamp: Utc::now(),
            });
            driven += 1;
        }

        record.updated_at = Utc::now();
        self.store.save(&record)?;
        info!(run_id, status = %record.status, steps = record.steps, "run stopped");
        self.observer.run_finished(run_id, record.status, record.steps);
        Ok(RunSummary::of(&record))
    }

    /// Continue a persisted run from its saved state.
    pub async fn resume(&self, run_id: &str) -> Result<RunSummary, EngineError> {
        let record = self.store.load(run_id)?;
        info!(run_id, status = %record.status, steps = record.steps, "resuming run");
        self.run(run_id).await
    }

    pub fn state(&self, run_id: &str) -> Result<ProjectState, EngineError> {
        Ok(self.store.load(run_id)?.state)
    }

    fn flush(&self, run_id: &str, entry: Option<JournalEntry>, next: Option<String>) -> Result<(), EngineError> {
        match entry {
            Some(mut entry) => {
                entry.next = next;
                self.store.append_journal(run_id, &entry)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedCompletion;
    use crate::project::StatePatch;
    use crate::sandbox::testing::FakeBackend;
    use crate::user::testing::ScriptedUser;
    use crate::workers::testing::Harness;
    use crate::workers::{StageResult, Worker};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Always answers with the same stage.
    struct Fixed(&'static str);

    #[async_trait]
    impl DecisionService for Fixed {
        async fn decide(&self, _state: &ProjectState, _registered: &[Stage]) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RunObserver for Recorder {
        fn stage_started(&self, _run_id: &str, step: u32, stage: Stage) {
            self.events.lock().unwrap().push(format!("start {} {}", step, stage));
        }

        fn run_finished(&self, _run_id: &str, status: RunStatus, steps: u32) {
            self.events.lock().unwrap().push(format!("done {} {}", status, steps));
        }
    }

    struct Counting;

    #[async_trait]
    impl Worker for Counting {
        fn stage(&self) -> Stage {
            Stage::PolishQuery
        }

        async fn execute(&self, state: &ProjectState, _ctx: &crate::workers::RunContext) -> StageResult {
            StageResult::success(StatePatch::new(
                Stage::PolishQuery,
                format!("polished {}", state.history_log().len()),
            ))
        }
    }

    fn engine(h: &Harness, decision: Arc<dyn DecisionService>, max_steps: u32) -> Engine {
        let registry = WorkerRegistry::build(&Taxonomy::default())
            .unwrap()
            .with_worker(Arc::new(Counting));
        Engine::new(
            RunStore::new(h.dir.path().join("runs")),
            registry,
            decision,
            h.ctx.clone(),
            max_steps,
        )
    }

    fn harness() -> Harness {
        Harness::new(
            ScriptedCompletion::new().otherwise("ok"),
            FakeBackend::exiting(0, "", ""),
            ScriptedUser::default(),
        )
    }

    #[tokio::test]
    async fn step_limit_stops_and_persists() {
        let h = harness();
        let engine = engine(&h, Arc::new(Fixed("step_2_polish_query")), 3);
        let run_id = engine.start("todo app").unwrap();
        let summary = engine.run(&run_id).await.unwrap();
        assert_eq!(summary.status, RunStatus::StepLimit);
        assert_eq!(summary.steps, 3);

        let journal = engine.store().journal(&run_id).unwrap();
        assert_eq!(journal.len(), 3);
        assert_eq!(journal[0].stage, Stage::InitialRequest);
        assert_eq!(journal[0].next.as_deref(), Some("step_2_polish_query"));
        assert!(journal[2].next.is_none());
    }

    #[tokio::test]
    async fn resume_continues_from_saved_state() {
        let h = harness();
        let engine = engine(&h, Arc::new(Fixed("step_2_polish_query")), 2);
        let run_id = engine.start("todo app").unwrap();
        engine.run(&run_id).await.unwrap();
        let summary = engine.resume(&run_id).await.unwrap();
        assert_eq!(summary.steps, 4);
        assert_eq!(engine.state(&run_id).unwrap().history_log().len(), 4);
    }

    #[tokio::test]
    async fn terminal_answer_completes_run() {
        let h = harness();
        let recorder = Arc::new(Recorder::default());
        let engine = engine(&h, Arc::new(Fixed("END")), 10).with_observer(recorder.clone());
        let run_id = engine.start("todo app").unwrap();
        let summary = engine.run(&run_id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.last_stage, Some(Stage::InitialRequest));
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec![
                "start 1 step_1_initial_request".to_string(),
                "done completed 1".to_string()
            ]
        );

        // A completed run is not driven again.
        assert_eq!(engine.run(&run_id).await.unwrap().steps, 1);
    }

    #[tokio::test]
    async fn locked_run_is_refused() {
        let h = harness();
        let engine = engine(&h, Arc::new(Fixed("END")), 10);
        let run_id = engine.start("todo app").unwrap();
        let _held = engine.store().lock(&run_id).unwrap();
        assert!(matches!(
            engine.run(&run_id).await,
            Err(EngineError::RunLocked { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let h = harness();
        let engine = engine(&h, Arc::new(Fixed("END")), 10);
        assert!(matches!(
            engine.run("missing").await,
            Err(EngineError::RunNotFound { .. })
        ));
    }
}
