//! Dependency-aware task selection.
//!
//! Tasks are handed out one at a time per specialization, in stored order.
//! A task is eligible when it is not completed, belongs to the requested
//! group, and every dependency id names a completed task. A dependency that
//! names no task at all is never satisfied.

mod validate;

pub use validate::{GraphIssue, quarantine_invalid, validate_task_graph};

use std::collections::HashSet;

use crate::project::{Task, TaskStatus};
use crate::stage::Specialization;

/// First eligible task for `group`, or `None`.
pub fn next_eligible_task<'a>(tasks: &'a [Task], group: &str) -> Option<&'a Task> {
    let completed = completed_ids(tasks);
    tasks
        .iter()
        .find(|task| task.group == group && is_ready(task, &completed))
}

fn completed_ids(tasks: &[Task]) -> HashSet<&str> {
    tasks
        .iter()
        .filter(|t| t.status.is_completed())
        .map(|t| t.id.as_str())
        .collect()
}

fn is_ready(task: &Task, completed: &HashSet<&str>) -> bool {
    !task.status.is_completed()
        && task
            .dependencies
            .iter()
            .all(|dep| completed.contains(dep.as_str()))
}

/// Scheduler with a retry budget for failed tasks.
///
/// On top of [`next_eligible_task`], a task in `error` status is skipped
/// once it has been attempted `max_attempts` times. An `error` task that was
/// never attempted was quarantined at decomposition and is skipped as well.
#[derive(Debug, Clone, Copy)]
pub struct TaskScheduler {
    max_attempts: u32,
}

impl TaskScheduler {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn next_for_group<'a>(&self, tasks: &'a [Task], group: &str) -> Option<&'a Task> {
        self.next_for_any(tasks, |g| g == group)
    }

    /// First eligible task, in stored order, owned by any of `groups`.
    pub fn next_for_groups<'a>(
        &self,
        tasks: &'a [Task],
        groups: &[Specialization],
    ) -> Option<&'a Task> {
        self.next_for_any(tasks, |g| groups.iter().any(|s| s.tag() == g))
    }

    pub fn has_work(&self, tasks: &[Task], groups: &[Specialization]) -> bool {
        self.next_for_groups(tasks, groups).is_some()
    }

    fn next_for_any<'a>(&self, tasks: &'a [Task], owns: impl Fn(&str) -> bool) -> Option<&'a Task> {
        let completed = completed_ids(tasks);
        tasks.iter().find(|task| {
            owns(&task.group) && is_ready(task, &completed) && !self.exhausted(task)
        })
    }

    fn exhausted(&self, task: &Task) -> bool {
        task.status == TaskStatus::Error
            && (task.attempts == 0 || task.attempts >= self.max_attempts)
    }
}
