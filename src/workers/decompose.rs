use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{MAX_DOC_BYTES, RunContext, StageResult, Worker, brief_context};
use crate::project::{ProjectState, StatePatch, Task, TaskStatus};
use crate::scheduler::quarantine_invalid;
use crate::stage::{Specialization, Stage};
use crate::util::{extract_json_array, extract_json_object, truncate};

/// Id of the task recorded when the plan could not be decomposed.
pub const ERROR_TASK_ID: &str = "error";

/// Parse a task list from a free-form answer.
///
/// Accepts a bare array or an object with a `tasks` array. Ids and
/// dependency ids may be strings or numbers. Tasks without a group go to
/// the backend development group.
pub fn parse_task_list(answer: &str) -> Result<Vec<Task>, String> {
    let items = match extract_json_array(answer)
        .and_then(|json| serde_json::from_str::<Value>(&json).ok())
    {
        Some(Value::Array(items)) => items,
        _ => {
            let object = extract_json_object(answer)
                .and_then(|json| serde_json::from_str::<Value>(&json).ok())
                .ok_or_else(|| "no JSON task list found".to_string())?;
            match object.get("tasks") {
                Some(Value::Array(items)) => items.clone(),
                _ => return Err("JSON object has no \"tasks\" array".to_string()),
            }
        }
    };

    if items.is_empty() {
        return Err("task list is empty".to_string());
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_task(i, item))
        .collect()
}

fn parse_task(index: usize, item: &Value) -> Result<Task, String> {
    let id = item
        .get("id")
        .and_then(scalar)
        .ok_or_else(|| format!("task {} has no id", index + 1))?;
    let description = item
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let group = item
        .get("group")
        .and_then(Value::as_str)
        .filter(|g| !g.trim().is_empty())
        .unwrap_or(Specialization::BackendDevelopment.tag())
        .to_string();
    let dependencies: Vec<String> = match item.get("dependencies") {
        Some(Value::Array(deps)) => deps.iter().filter_map(scalar).collect(),
        _ => Vec::new(),
    };
    Ok(Task::new(id, description, group).with_dependencies(dependencies))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Splits the approved technical plan into a task graph.
pub struct DecompositionWorker;

#[async_trait]
impl Worker for DecompositionWorker {
    fn stage(&self) -> Stage {
        Stage::DecomposePlan
    }

    async fn execute(&self, state: &ProjectState, ctx: &RunContext) -> StageResult {
        let prompt = format!(
            "{}\n## Technical plan\n{}",
            brief_context(state),
            truncate(
                state.technical_plan.as_deref().unwrap_or("(missing)"),
                MAX_DOC_BYTES
            )
        );

        let parsed = match ctx
            .ask(Specialization::Analysts, "decomposition", prompt)
            .await
        {
            Ok(answer) => parse_task_list(&answer),
            Err(e) => Err(format!("decomposition call failed: {}", e)),
        };

        let mut tasks = match parsed {
            Ok(tasks) => tasks,
            Err(reason) => {
                warn!(reason = %reason, "decomposition failed, recording error task");
                let task = Task::new(
                    ERROR_TASK_ID,
                    format!("Plan decomposition failed: {}", reason),
                    Specialization::DebuggingSupport.tag(),
                )
                .with_status(TaskStatus::Error);
                let mut patch = StatePatch::new(self.stage(), "Plan decomposition failed.");
                patch.task_list = Some(vec![task]);
                return StageResult::degraded(patch, reason);
            }
        };

        let issues = quarantine_invalid(&mut tasks);
        info!(tasks = tasks.len(), issues = issues.len(), "plan decomposed");
        let mut entry = format!("Plan decomposed into {} tasks.", tasks.len());
        if !issues.is_empty() {
            entry.push_str(&format!(" {} task(s) quarantined.", issues.len()));
        }
        let mut patch = StatePatch::new(self.stage(), entry);
        patch.task_list = Some(tasks);
        StageResult::from_problems(patch, issues.iter().map(|i| i.to_string()).collect())
    }
}
