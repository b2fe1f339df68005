use async_trait::async_trait;
use tracing::{info, warn};

use super::{ChangeSet, MAX_DOC_BYTES, Outcome, RunContext, StageResult, Worker, brief_context};
use crate::project::{ProjectState, StatePatch, Task, TaskUpdate};
use crate::stage::{Specialization, Stage};
use crate::util::truncate;

/// Claims the next eligible development task and implements it.
pub struct DevelopmentWorker;

impl DevelopmentWorker {
    fn prompt(state: &ProjectState, task: &Task, ctx: &RunContext) -> String {
        let done: Vec<String> = state
            .tasks()
            .iter()
            .filter(|t| t.status.is_completed())
            .map(|t| format!("- {}: {}", t.id, t.description))
            .collect();
        let mut prompt = format!(
            "{}\n## Technical plan\n{}\n\n## Completed tasks\n{}\n\n## Current workspace\n{}\n\n## Your task ({})\n{}\n",
            brief_context(state),
            truncate(state.technical_plan.as_deref().unwrap_or("(missing)"), MAX_DOC_BYTES),
            if done.is_empty() { "(none)".to_string() } else { done.join("\n") },
            ctx.workspace.snapshot(MAX_DOC_BYTES),
            task.id,
            task.description
        );
        if let Some(previous) = task.result.as_deref().filter(|_| task.attempts > 0) {
            prompt.push_str(&format!(
                "\n## Previous attempt failed\n{}\n",
                truncate(previous, MAX_DOC_BYTES / 4)
            ));
        }
        prompt
    }
}

#[async_trait]
impl Worker for DevelopmentWorker {
    fn stage(&self) -> Stage {
        Stage::TaskExecution
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let Some(task) = ctx
            .scheduler
            .next_for_groups(state.tasks(), &Specialization::DEVELOPMENT)
        else {
            return StageResult::idle(StatePatch::new(
                self.stage(),
                "No eligible development task.",
            ));
        };
        let group = task
            .group
            .parse::<Specialization>()
            .unwrap_or(Specialization::BackendDevelopment);
        info!(task = %task.id, group = %group, attempt = task.attempts + 1, "executing task");

        let answer = ctx
            .ask(group, "developer", Self::prompt(state, task, ctx))
            .await;
        let changes = match answer {
            Ok(answer) => ChangeSet::parse(&answer)
                .ok_or_else(|| "developer answer contained no change set".to_string()),
            Err(e) => Err(format!("developer call failed: {}", e)),
        };
        let failure = match changes {
            Err(reason) => Err(reason),
            Ok(changes) => match changes.apply(&ctx.workspace) {
                Err(e) => Err(format!("could not apply change set: {}", e)),
                Ok(written) => match changes.run_commands(&ctx.sandbox, &ctx.run_id).await {
                    Some(result) => {
                        let mut reason = format!("command failed\n{}", result.report(MAX_DOC_BYTES / 4));
                        if let Some(location) = &result.error_details {
                            reason = format!("{} (at {})", reason, location);
                        }
                        Err(reason)
                    }
                    None => Ok((changes.summary, written)),
                },
            },
        };

        match failure {
            Ok((summary, written)) => {
                let summary = if summary.trim().is_empty() {
                    format!("wrote {}", written.join(", "))
                } else {
                    summary
                };
                let mut patch = StatePatch::new(
                    self.stage(),
                    format!("Task {} completed by {}: {}", task.id, group, summary),
                );
                patch.task_updates.push(TaskUpdate::completed(&task.id, summary));
                StageResult::success(patch)
            }
            Err(reason) => {
                warn!(task = %task.id, reason = %reason, "task failed");
                let mut patch = StatePatch::new(
                    self.stage(),
                    format!("Task {} failed.", task.id),
                );
                patch.task_updates.push(TaskUpdate::failed(&task.id, reason.clone()));
                StageResult {
                    patch,
                    outcome: Outcome::TaskError {
                        task_id: task.id.clone(),
                        reason,
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedCompletion;
    use crate::project::{Task, TaskStatus};
    use crate::sandbox::testing::FakeBackend;
    use crate::user::testing::ScriptedUser;
    use crate::workers::testing::Harness;

    const CHANGE: &str = r#"{"summary": "storage layer", "files": [{"path": "todo/store.py", "content": "ITEMS = []\n"}], "commands": ["python -c 'import todo.store'"]}"#;

    fn state_with(tasks: Vec<Task>) -> ProjectState {
        let mut state = ProjectState::new("todo app");
        state.task_list = Some(tasks);
        state
    }

    #[tokio::test]
    async fn idle_without_eligible_task() {
        let h = Harness::with_llm(ScriptedCompletion::new());
        let state = state_with(vec![
            Task::new("A", "a", "backend_development_group").with_status(TaskStatus::Completed),
        ]);
        let result = DevelopmentWorker.execute(&state, &h.ctx).await;
        assert_eq!(result.outcome, Outcome::Idle);
        assert!(result.patch.task_updates.is_empty());
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn completes_task_and_writes_files() {
        let h = Harness::new(
            ScriptedCompletion::new().otherwise(CHANGE),
            FakeBackend::exiting(0, "", ""),
            ScriptedUser::default(),
        );
        let state = state_with(vec![Task::new("A", "storage", "backend_development_group")]);
        let result = DevelopmentWorker.execute(&state, &h.ctx).await;
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(
            result.patch.task_updates,
            vec![TaskUpdate::completed("A", "storage layer")]
        );
        assert_eq!(h.ctx.workspace.read_file("todo/store.py").unwrap(), "ITEMS = []\n");
        assert_eq!(h.backend.commands(), vec!["python -c 'import todo.store'"]);
    }

    #[tokio::test]
    async fn picks_frontend_task_with_its_group_model() {
        let h = Harness::with_llm(ScriptedCompletion::new().otherwise(r#"{"files": []}"#));
        let state = state_with(vec![
            Task::new("A", "a", "backend_development_group").with_status(TaskStatus::Completed),
            Task::new("B", "ui", "frontend_development_group").with_dependencies(["A"]),
        ]);
        let result = DevelopmentWorker.execute(&state, &h.ctx).await;
        assert_eq!(result.patch.task_updates[0].id, "B");
        assert!(h.llm.calls()[0].prompt.contains("## Your task (B)"));
    }

    #[tokio::test]
    async fn failing_command_marks_task_error() {
        let h = Harness::new(
            ScriptedCompletion::new().otherwise(CHANGE),
            FakeBackend::exiting(
                1,
                "",
                "  File \"/home/agentuser/workspace/todo/store.py\", line 1, in <module>\nSyntaxError: bad\n",
            ),
            ScriptedUser::default(),
        );
        let state = state_with(vec![Task::new("A", "storage", "backend_development_group")]);
        let result = DevelopmentWorker.execute(&state, &h.ctx).await;
        match &result.outcome {
            Outcome::TaskError { task_id, reason } => {
                assert_eq!(task_id, "A");
                assert!(reason.contains("todo/store.py:1"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(result.patch.task_updates[0].status, TaskStatus::Error);
    }

    #[tokio::test]
    async fn unparseable_answer_marks_task_error() {
        let h = Harness::with_llm(ScriptedCompletion::new().otherwise("sorry"));
        let state = state_with(vec![Task::new("A", "storage", "backend_development_group")]);
        let result = DevelopmentWorker.execute(&state, &h.ctx).await;
        assert!(matches!(result.outcome, Outcome::TaskError { .. }));
    }

    #[tokio::test]
    async fn retry_prompt_includes_previous_failure() {
        let h = Harness::with_llm(ScriptedCompletion::new().otherwise(r#"{"files": []}"#));
        let mut task = Task::new("A", "storage", "backend_development_group")
            .with_status(TaskStatus::Error);
        task.attempts = 1;
        task.result = Some("ImportError: no module".into());
        DevelopmentWorker.execute(&state_with(vec![task]), &h.ctx).await;
        assert!(h.llm.calls()[0].prompt.contains("ImportError: no module"));
    }
}
