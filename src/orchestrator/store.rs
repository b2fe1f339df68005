//! Persistent run records.
//!
//! Layout under the runs directory:
//!
//! ```text
//! <run_id>/state.json     latest RunRecord, rewritten after every step
//! <run_id>/journal.jsonl  one JournalEntry per executed step
//! <run_id>/.lock          held while a process drives the run
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::project::ProjectState;
use crate::stage::Stage;
use crate::workers::Outcome;

const STATE_FILE: &str = "state.json";
const JOURNAL_FILE: &str = "journal.jsonl";
const LOCK_FILE: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Started or in progress on its first project.
    Running,
    /// Reached a terminal route.
    Completed,
    /// Stopped by the step limit; can be resumed.
    StepLimit,
    /// In progress on a project started by re-engagement.
    Reengaged,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::StepLimit => write!(f, "step_limit"),
            RunStatus::Reengaged => write!(f, "reengaged"),
        }
    }
}

/// Everything persisted about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    /// Stages executed so far, across all drives of the run.
    pub steps: u32,
    /// Number of re-engagements.
    #[serde(default)]
    pub cycles: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: ProjectState,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, request: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            status: RunStatus::Running,
            steps: 0,
            cycles: 0,
            created_at: now,
            updated_at: now,
            state: ProjectState::new(request),
        }
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub step: u32,
    pub stage: Stage,
    pub outcome: Outcome,
    /// Where the router sent the run afterwards, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Exclusive hold on one run. Released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(error = %e, "failed to release run lock");
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunStore {
    runs_dir: PathBuf,
}

impl RunStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    fn persist_err(run_id: &str) -> impl FnOnce(std::io::Error) -> EngineError + '_ {
        move |source| EngineError::Persist {
            run_id: run_id.to_string(),
            source,
        }
    }

    pub fn exists(&self, run_id: &str) -> bool {
        self.run_dir(run_id).join(STATE_FILE).is_file()
    }

    /// Write a new record; its directory must not exist yet.
    pub fn create(&self, record: &RunRecord) -> Result<(), EngineError> {
        let dir = self.run_dir(&record.run_id);
        fs::create_dir_all(&self.runs_dir).map_err(Self::persist_err(&record.run_id))?;
        fs::create_dir(&dir).map_err(Self::persist_err(&record.run_id))?;
        self.save(record)
    }

    /// Replace `state.json` atomically.
    pub fn save(&self, record: &RunRecord) -> Result<(), EngineError> {
        let dir = self.run_dir(&record.run_id);
        let json = serde_json::to_string_pretty(record).map_err(|e| EngineError::Other(e.into()))?;
        let tmp = dir.join(format!("{}.tmp", STATE_FILE));
        fs::write(&tmp, json).map_err(Self::persist_err(&record.run_id))?;
        fs::rename(&tmp, dir.join(STATE_FILE)).map_err(Self::persist_err(&record.run_id))?;
        debug!(run_id = %record.run_id, steps = record.steps, "run state saved");
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<RunRecord, EngineError> {
        let path = self.run_dir(run_id).join(STATE_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(EngineError::RunNotFound {
                    run_id: run_id.to_string(),
                });
            }
            Err(e) => return Err(Self::persist_err(run_id)(e)),
        };
        serde_json::from_str(&content).map_err(|source| EngineError::CorruptState {
            run_id: run_id.to_string(),
            source,
        })
    }

    pub fn append_journal(&self, run_id: &str, entry: &JournalEntry) -> Result<(), EngineError> {
        let line = serde_json::to_string(entry).map_err(|e| EngineError::Other(e.into()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_dir(run_id).join(JOURNAL_FILE))
            .map_err(Self::persist_err(run_id))?;
        writeln!(file, "{}", line).map_err(Self::persist_err(run_id))?;
        Ok(())
    }

    /// All journal entries in order. Unparseable lines are skipped.
    pub fn journal(&self, run_id: &str) -> Result<Vec<JournalEntry>, EngineError> {
        if !self.exists(run_id) {
            return Err(EngineError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }
        let content = match fs::read_to_string(self.run_dir(run_id).join(JOURNAL_FILE)) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::persist_err(run_id)(e)),
        };
        Ok(content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(run_id, error = %e, "skipping unreadable journal line");
                    None
                }
            })
            .collect())
    }

    /// Every readable run, newest first.
    pub fn list(&self) -> Vec<RunRecord> {
        let Ok(entries) = fs::read_dir(&self.runs_dir) else {
            return Vec::new();
        };
        let mut records: Vec<RunRecord> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let run_id = e.file_name().to_string_lossy().into_owned();
                match self.load(&run_id) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        warn!(run_id, error = %err, "skipping unreadable run");
                        None
                    }
                }
            })
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Take the exclusive lock for `run_id` without waiting.
    pub fn lock(&self, run_id: &str) -> Result<RunLock, EngineError> {
        if !self.exists(run_id) {
            return Err(EngineError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.run_dir(run_id).join(LOCK_FILE))
            .map_err(Self::persist_err(run_id))?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(RunLock { file }),
            Err(e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Err(EngineError::RunLocked {
                    run_id: run_id.to_string(),
                })
            }
            Err(e) => Err(Self::persist_err(run_id)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, RunStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("runs"));
        (dir, store)
    }

    #[test]
    fn create_then_load_round_trips() {
        let (_dir, store) = store();
        let record = RunRecord::new("r1", "todo app");
        store.create(&record).unwrap();
        assert_eq!(store.load("r1").unwrap(), record);
        assert!(store.create(&record).is_err());
    }

    #[test]
    fn missing_run_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.load("nope"), Err(EngineError::RunNotFound { .. })));
        assert!(matches!(store.lock("nope"), Err(EngineError::RunNotFound { .. })));
    }

    #[test]
    fn corrupt_state_is_reported() {
        let (_dir, store) = store();
        store.create(&RunRecord::new("r1", "x")).unwrap();
        fs::write(store.runs_dir().join("r1").join(STATE_FILE), "{not json").unwrap();
        assert!(matches!(store.load("r1"), Err(EngineError::CorruptState { .. })));
    }

    #[test]
    fn journal_appends_in_order() {
        let (_dir, store) = store();
        store.create(&RunRecord::new("r1", "x")).unwrap();
        for (step, stage) in [(1, Stage::InitialRequest), (2, Stage::PolishQuery)] {
            store
                .append_journal(
                    "r1",
                    &JournalEntry {
                        step,
                        stage,
                        outcome: Outcome::Success,
                        next: None,
                        timestamp: Utc::now(),
                    },
                )
                .unwrap();
        }
        let journal = store.journal("r1").unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal[1].stage, Stage::PolishQuery);
    }

    #[test]
    fn second_lock_is_refused_until_release() {
        let (_dir, store) = store();
        store.create(&RunRecord::new("r1", "x")).unwrap();
        let held = store.lock("r1").unwrap();
        assert!(matches!(store.lock("r1"), Err(EngineError::RunLocked { .. })));
        drop(held);
        assert!(store.lock("r1").is_ok());
    }

    #[test]
    fn list_is_newest_first() {
        let (_dir, store) = store();
        let mut older = RunRecord::new("a", "x");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        store.create(&older).unwrap();
        store.create(&RunRecord::new("b", "y")).unwrap();
        let ids: Vec<String> = store.list().into_iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
