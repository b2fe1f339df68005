use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::WorkspaceError;
use crate::sandbox::{ExecutionResult, Sandbox};
use crate::util::extract_json_object;
use crate::workspace::Workspace;

/// One file written by a change set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

/// Files to write and commands to run, as proposed by a developer or debugger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files: Vec<FileChange>,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl ChangeSet {
    /// Extract the first JSON object from a free-form answer.
    pub fn parse(answer: &str) -> Option<ChangeSet> {
        let json = extract_json_object(answer)?;
        serde_json::from_str(&json).ok()
    }

    /// Write every file, checking all paths before touching the disk.
    pub fn apply(&self, workspace: &Workspace) -> Result<Vec<String>, WorkspaceError> {
        for file in &self.files {
            workspace.resolve(&file.path)?;
        }
        for file in &self.files {
            workspace.write_file(&file.path, &file.content)?;
            debug!(path = %file.path, bytes = file.content.len(), "wrote file");
        }
        Ok(self.files.iter().map(|f| f.path.clone()).collect())
    }

    /// Run the commands in order. Returns the first failure, if any.
    pub async fn run_commands(&self, sandbox: &Sandbox, run_id: &str) -> Option<ExecutionResult> {
        for command in self.commands.iter().filter(|c| !c.trim().is_empty()) {
            info!(run_id, command = %command, "running change set command");
            let result = sandbox.run(command, run_id).await;
            if !result.is_success() {
                return Some(result);
            }
        }
        None
    }
}
