//! Structural validation of a freshly decomposed task list.
//!
//! Problems are detected once, when the list is produced, instead of being
//! discovered as tasks that silently never become eligible.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use crate::project::{Task, TaskStatus};
use crate::stage::Specialization;

/// One structural defect in a task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    DuplicateId { task: String },
    UnknownDependency { task: String, dependency: String },
    SelfDependency { task: String },
    Cycle { task: String },
    Unclaimable { task: String, group: String },
    Blocked { task: String, by: String },
}

impl GraphIssue {
    pub fn task(&self) -> &str {
        match self {
            GraphIssue::DuplicateId { task }
            | GraphIssue::UnknownDependency { task, .. }
            | GraphIssue::SelfDependency { task }
            | GraphIssue::Cycle { task }
            | GraphIssue::Unclaimable { task, .. }
            | GraphIssue::Blocked { task, .. } => task,
        }
    }
}

impl fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphIssue::DuplicateId { task } => write!(f, "duplicate task id '{}'", task),
            GraphIssue::UnknownDependency { task, dependency } => {
                write!(f, "task '{}' depends on unknown task '{}'", task, dependency)
            }
            GraphIssue::SelfDependency { task } => write!(f, "task '{}' depends on itself", task),
            GraphIssue::Cycle { task } => {
                write!(f, "task '{}' is part of a dependency cycle", task)
            }
            GraphIssue::Unclaimable { task, group } => write!(
                f,
                "task '{}' belongs to '{}', which no development worker claims",
                task, group
            ),
            GraphIssue::Blocked { task, by } => {
                write!(f, "task '{}' is blocked by invalid task '{}'", task, by)
            }
        }
    }
}

/// Report every structural issue, at most one per task, in stored order.
pub fn validate_task_graph(tasks: &[Task]) -> Vec<GraphIssue> {
    let mut issues: BTreeMap<usize, GraphIssue> = BTreeMap::new();

    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, task) in tasks.iter().enumerate() {
        if index.contains_key(task.id.as_str()) {
            issues.insert(
                i,
                GraphIssue::DuplicateId {
                    task: task.id.clone(),
                },
            );
        } else {
            index.insert(task.id.as_str(), i);
        }
    }

    // Edges only between first occurrences: dependency -> dependent.
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    let mut in_degree: Vec<usize> = vec![0; tasks.len()];

    for (i, task) in tasks.iter().enumerate() {
        if issues.contains_key(&i) {
            continue;
        }
        let claimable = task
            .group
            .parse::<Specialization>()
            .is_ok_and(|s| s.is_development());
        if !claimable {
            issues.insert(
                i,
                GraphIssue::Unclaimable {
                    task: task.id.clone(),
                    group: task.group.clone(),
                },
            );
        }
        for dep in &task.dependencies {
            if dep == &task.id {
                issues.entry(i).or_insert_with(|| GraphIssue::SelfDependency {
                    task: task.id.clone(),
                });
                continue;
            }
            match index.get(dep.as_str()) {
                Some(&from) => {
                    dependents[from].push(i);
                    in_degree[i] += 1;
                }
                None => {
                    issues.entry(i).or_insert_with(|| GraphIssue::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
    }

    for i in cycle_members(&dependents, &in_degree, &issues) {
        issues.entry(i).or_insert_with(|| GraphIssue::Cycle {
            task: tasks[i].id.clone(),
        });
    }

    // Everything downstream of an invalid task can never run.
    let roots: Vec<usize> = issues.keys().copied().collect();
    for root in roots {
        let mut queue: VecDeque<usize> = dependents[root].iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            if issues.contains_key(&node) || tasks[node].status.is_completed() {
                continue;
            }
            issues.insert(
                node,
                GraphIssue::Blocked {
                    task: tasks[node].id.clone(),
                    by: tasks[root].id.clone(),
                },
            );
            queue.extend(dependents[node].iter().copied());
        }
    }

    issues.into_values().collect()
}

/// Nodes on (or between) cycles, via Kahn's algorithm run in both
/// directions: whatever cannot be peeled from either end is cyclic.
fn cycle_members(
    dependents: &[Vec<usize>],
    in_degree: &[usize],
    duplicates: &BTreeMap<usize, GraphIssue>,
) -> Vec<usize> {
    let n = dependents.len();
    let live: Vec<bool> = (0..n)
        .map(|i| !matches!(duplicates.get(&i), Some(GraphIssue::DuplicateId { .. })))
        .collect();

    let mut removed = vec![false; n];
    let mut in_degree = in_degree.to_vec();
    let mut queue: Vec<usize> = (0..n).filter(|&i| live[i] && in_degree[i] == 0).collect();
    while let Some(node) = queue.pop() {
        removed[node] = true;
        for &next in &dependents[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push(next);
            }
        }
    }

    // Peel the remainder from the other end.
    let mut out_degree: Vec<usize> = (0..n)
        .map(|i| dependents[i].iter().filter(|&&d| !removed[d]).count())
        .collect();
    let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (from, tos) in dependents.iter().enumerate() {
        for &to in tos {
            dependencies[to].push(from);
        }
    }
    let mut queue: Vec<usize> = (0..n)
        .filter(|&i| live[i] && !removed[i] && out_degree[i] == 0)
        .collect();
    while let Some(node) = queue.pop() {
        removed[node] = true;
        for &prev in &dependencies[node] {
            if removed[prev] {
                continue;
            }
            out_degree[prev] -= 1;
            if out_degree[prev] == 0 {
                queue.push(prev);
            }
        }
    }

    (0..n).filter(|&i| live[i] && !removed[i]).collect()
}

/// Validate `tasks` and mark every offending or blocked task as `error`,
/// with the issue as its result. Returns the issues found.
pub fn quarantine_invalid(tasks: &mut [Task]) -> Vec<GraphIssue> {
    let issues = validate_task_graph(tasks);
    // Positional marking: duplicate ids share a name with a valid task.
    let mut marked = vec![false; tasks.len()];
    for issue in &issues {
        let position = tasks.iter().enumerate().position(|(i, t)| {
            !marked[i]
                && t.id == issue.task()
                && (matches!(issue, GraphIssue::DuplicateId { .. }) == is_later_duplicate(tasks, i))
        });
        if let Some(i) = position {
            marked[i] = true;
            tasks[i].status = TaskStatus::Error;
            tasks[i].result = Some(issue.to_string());
        }
    }
    issues
}

fn is_later_duplicate(tasks: &[Task], i: usize) -> bool {
    tasks[..i].iter().any(|t| t.id == tasks[i].id)
}
