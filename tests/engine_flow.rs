//! End-to-end runs of the engine with scripted collaborators.
//!
//! Routing uses the local transition table, so every reasoning call below
//! is made by a stage worker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tempfile::TempDir;

use conductor::conductor_config::{QaSection, Taxonomy};
use conductor::errors::SandboxError;
use conductor::llm::{Completion, CompletionRequest, LlmError};
use conductor::orchestrator::{Engine, RunStatus, RunStore};
use conductor::project::TaskStatus;
use conductor::prompts::PromptLibrary;
use conductor::router::TableDecision;
use conductor::sandbox::{ContainerSpec, OutputChunk, OutputStream, Sandbox, SandboxBackend, SandboxConfig};
use conductor::scheduler::TaskScheduler;
use conductor::stage::Stage;
use conductor::stream::StreamRegistry;
use conductor::user::{AutoPilot, UserChannel};
use conductor::workers::{RunContext, WorkerRegistry};
use conductor::workspace::Workspace;

const TEST_COMMAND: &str = "python -m unittest";

const TASKS: &str = r#"[
  {"id": "A", "description": "storage module", "group": "backend_development_group"},
  {"id": "B", "description": "command line", "group": "backend_development_group", "dependencies": ["A"]}
]"#;

const CHANGE_SET: &str = r#"{"summary": "implemented", "files": [{"path": "todo.py", "content": "print('todo')\n"}], "commands": []}"#;

const FIX: &str = r#"{"summary": "fixed the name", "files": [{"path": "todo.py", "content": "print('fixed')\n"}], "commands": []}"#;

/// Answers by role, recognized from the system prompt.
struct RoleScript {
    calls: Mutex<Vec<CompletionRequest>>,
}

impl RoleScript {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn systems(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.system.clone().unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl Completion for RoleScript {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.calls.lock().unwrap().push(request.clone());
        let system = request.system.unwrap_or_default();
        let answer = if system.contains("technical lead") {
            TASKS
        } else if system.contains("software developer") {
            CHANGE_SET
        } else if system.contains("debugging specialist") {
            FIX
        } else if system.contains("auditor") {
            "Approved. No issues found."
        } else if system.contains("technical writer") {
            "# Todo\n\nA small todo application.\n"
        } else {
            "A short, plain answer."
        };
        Ok(answer.to_string())
    }
}

/// Succeeds for every command except the first `failing_test_runs` runs of
/// the test command.
struct ScriptedSandbox {
    failing_test_runs: usize,
    test_runs: AtomicUsize,
    exit_codes: Mutex<Vec<(String, i64)>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    fn new(failing_test_runs: usize) -> Self {
        Self {
            failing_test_runs,
            test_runs: AtomicUsize::new(0),
            exit_codes: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    fn exit_for(&self, id: &str) -> i64 {
        self.exit_codes
            .lock()
            .unwrap()
            .iter()
            .find(|(cid, _)| cid == id)
            .map(|(_, code)| *code)
            .unwrap_or(0)
    }
}

#[async_trait]
impl SandboxBackend for ScriptedSandbox {
    async fn ping(&self) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn ensure_image(&self, _image: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError> {
        let command = spec.command.last().cloned().unwrap_or_default();
        let mut commands = self.commands.lock().unwrap();
        let id = format!("c{}", commands.len());
        let code = if command == TEST_COMMAND
            && self.test_runs.fetch_add(1, Ordering::SeqCst) < self.failing_test_runs
        {
            1
        } else {
            0
        };
        self.exit_codes.lock().unwrap().push((id.clone(), code));
        commands.push(command);
        Ok(id)
    }

    async fn start(&self, _id: &str) -> Result<(), SandboxError> {
        Ok(())
    }

    fn output<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<OutputChunk, SandboxError>> {
        let chunk = if self.exit_for(id) == 0 {
            OutputChunk {
                stream: OutputStream::Stdout,
                text: "OK\n".to_string(),
            }
        } else {
            OutputChunk {
                stream: OutputStream::Stderr,
                text: "Traceback (most recent call last):\n  File \"/home/agentuser/workspace/todo.py\", line 1, in <module>\nNameError: name 'todo' is not defined\n".to_string(),
            }
        };
        stream::iter(vec![Ok(chunk)]).boxed()
    }

    async fn wait(&self, id: &str) -> Result<i64, SandboxError> {
        Ok(self.exit_for(id))
    }

    async fn teardown(&self, _id: &str) -> Result<(), SandboxError> {
        Ok(())
    }
}

/// Asks for one change to the plan, then approves; ends after delivery.
struct ChangeOnce {
    plan_reviews: AtomicUsize,
}

#[async_trait]
impl UserChannel for ChangeOnce {
    async fn present(&self, _title: &str, _body: &str) -> Result<()> {
        Ok(())
    }

    async fn confirm_query(&self, _refined_query: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn plan_feedback(&self, _plan_summary: &str) -> Result<String> {
        if self.plan_reviews.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok("please add due dates".to_string())
        } else {
            Ok("Approve".to_string())
        }
    }

    async fn post_delivery(&self, _delivery_summary: &str) -> Result<String> {
        Ok("complete".to_string())
    }
}

struct Setup {
    _dir: TempDir,
    workspace: PathBuf,
    notifications: PathBuf,
    llm: Arc<RoleScript>,
    sandbox: Arc<ScriptedSandbox>,
    store_dir: PathBuf,
    ctx: RunContext,
}

fn setup(failing_test_runs: usize, user: Arc<dyn UserChannel>) -> Setup {
    let dir = TempDir::new().unwrap();
    let workspace = Workspace::open(dir.path().join("workspace")).unwrap();
    let llm = Arc::new(RoleScript::new());
    let backend = Arc::new(ScriptedSandbox::new(failing_test_runs));
    let sandbox = Sandbox::new(
        backend.clone(),
        SandboxConfig {
            timeout: 10,
            ..SandboxConfig::default()
        },
        workspace.root().to_path_buf(),
        StreamRegistry::new(),
    );
    let notifications = dir.path().join("logs/notifications.log");
    let ctx = RunContext {
        run_id: String::new(),
        llm: llm.clone(),
        sandbox: Arc::new(sandbox),
        workspace: workspace.clone(),
        user,
        prompts: PromptLibrary::builtin(),
        taxonomy: Arc::new(Taxonomy::default()),
        qa: QaSection {
            test_command: TEST_COMMAND.to_string(),
            ..QaSection::default()
        },
        scheduler: TaskScheduler::new(2),
        notifications_log: notifications.clone(),
    };
    Setup {
        workspace: workspace.root().to_path_buf(),
        store_dir: dir.path().join("runs"),
        _dir: dir,
        notifications,
        llm,
        sandbox: backend,
        ctx,
    }
}

fn engine(setup: &Setup, max_steps: u32) -> Engine {
    Engine::new(
        RunStore::new(&setup.store_dir),
        WorkerRegistry::build(&Taxonomy::default()).unwrap(),
        Arc::new(TableDecision::new(TaskScheduler::new(2))),
        setup.ctx.clone(),
        max_steps,
    )
}

#[tokio::test]
async fn happy_path_runs_to_completion() {
    let setup = setup(0, Arc::new(AutoPilot));
    let engine = engine(&setup, 100);
    let run_id = engine.start("build a todo app").unwrap();

    let summary = engine.run(&run_id).await.unwrap();
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.last_stage, Some(Stage::PostDeliveryReview));
    assert_eq!(summary.steps, 18);

    let state = engine.state(&run_id).unwrap();
    assert_eq!(state.tasks().len(), 2);
    assert!(state.tasks().iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(state.history_log().len(), 18);
    assert_eq!(state.user_feedback.as_deref(), Some("complete"));

    assert!(setup.workspace.join("todo.py").is_file());
    assert!(setup.workspace.join("README.md").is_file());
    let notice = std::fs::read_to_string(&setup.notifications).unwrap();
    assert!(notice.contains(&format!("Run ID: {}", run_id)));
    assert!(notice.contains("Project Status: COMPLETED"));

    let journal = engine.store().journal(&run_id).unwrap();
    assert_eq!(journal.len(), 18);
    let stages: Vec<Stage> = journal.iter().map(|e| e.stage).collect();
    assert_eq!(&stages[..3], &[Stage::InitialRequest, Stage::PolishQuery, Stage::ConfirmQuery]);
    assert_eq!(
        stages.iter().filter(|s| **s == Stage::TaskExecution).count(),
        2
    );
    assert_eq!(journal.last().unwrap().next.as_deref(), Some("TERMINAL"));

    let tests_run = setup
        .sandbox
        .commands
        .lock()
        .unwrap()
        .iter()
        .filter(|c| *c == TEST_COMMAND)
        .count();
    assert_eq!(tests_run, 1);
}

#[tokio::test]
async fn step_limit_pauses_and_resume_finishes() {
    let setup = setup(0, Arc::new(AutoPilot));
    let run_id = engine(&setup, 5).start("build a todo app").unwrap();

    let paused = engine(&setup, 5).run(&run_id).await.unwrap();
    assert_eq!(paused.status, RunStatus::StepLimit);
    assert_eq!(paused.steps, 5);
    assert_eq!(paused.last_stage, Some(Stage::ProjectBrief));

    let finished = engine(&setup, 100).resume(&run_id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.steps, 18);
}

#[tokio::test]
async fn plan_change_and_failing_tests_take_the_long_way() {
    let setup = setup(
        1,
        Arc::new(ChangeOnce {
            plan_reviews: AtomicUsize::new(0),
        }),
    );
    let engine = engine(&setup, 100);
    let run_id = engine.start("build a todo app").unwrap();

    let summary = engine.run(&run_id).await.unwrap();
    assert_eq!(summary.status, RunStatus::Completed);

    let stages: Vec<Stage> = engine
        .store()
        .journal(&run_id)
        .unwrap()
        .iter()
        .map(|e| e.stage)
        .collect();
    assert_eq!(stages.iter().filter(|s| **s == Stage::MarketAnalysis).count(), 2);
    assert_eq!(stages.iter().filter(|s| **s == Stage::UserFeedback).count(), 2);
    assert_eq!(stages.iter().filter(|s| **s == Stage::QaLoop).count(), 2);
    assert_eq!(stages.iter().filter(|s| **s == Stage::DebugFix).count(), 1);

    let state = engine.state(&run_id).unwrap();
    assert_eq!(state.refined_query.as_deref(), Some("A short, plain answer."));
    assert_eq!(
        std::fs::read_to_string(setup.workspace.join("todo.py")).unwrap(),
        "print('fixed')\n"
    );
    assert!(
        setup
            .llm
            .systems()
            .iter()
            .any(|s| s.contains("debugging specialist"))
    );
}
