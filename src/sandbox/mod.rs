//! Isolated command execution.
//!
//! ## Overview
//!
//! [`Sandbox::run`] executes one shell command in a fresh container whose
//! only writable mount is the project workspace:
//!
//! 1. ping the backend; unreachable → `{status: error, error: "sandbox unavailable"}`
//! 2. make sure the image exists (built or pulled once per process)
//! 3. create + start the container running `/bin/sh -c <command>`
//! 4. stream output lines to the run's listener while waiting for exit
//! 5. classify by exit code, locating the failure in stderr on error
//! 6. stop + remove the container, exactly once, whatever happened in 3–5
//!
//! The container runtime sits behind [`SandboxBackend`]; [`DockerBackend`]
//! talks to the Docker daemon through bollard.

mod config;
mod docker;

pub use config::SandboxConfig;
pub use docker::DockerBackend;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::errors::SandboxError;
use crate::locate::{ErrorLocation, ErrorLocator};
use crate::stream::StreamRegistry;

/// Label attached to every container, carrying the run id.
pub const RUN_LABEL: &str = "conductor.run_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Structured outcome of one sandboxed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    /// Why the command could not produce an exit code, or a short failure note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorLocation>,
}

impl ExecutionResult {
    pub fn unavailable() -> Self {
        Self::failed(SandboxError::Unavailable.to_string())
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Error,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: Some(error.into()),
            error_details: None,
        }
    }

    /// Attach whatever output was captured before the failure.
    pub fn with_output(mut self, captured: CapturedOutput) -> Self {
        self.stdout = captured.stdout;
        self.stderr = captured.stderr;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Compact report for prompts and history entries.
    pub fn report(&self, max_bytes: usize) -> String {
        let mut out = match (self.status, self.exit_code) {
            (ExecutionStatus::Success, _) => "status: success".to_string(),
            (ExecutionStatus::Error, Some(code)) => format!("status: error (exit code {})", code),
            (ExecutionStatus::Error, None) => "status: error".to_string(),
        };
        if let Some(error) = &self.error {
            out.push_str(&format!("\nerror: {}", error));
        }
        if let Some(location) = &self.error_details {
            out.push_str(&format!("\nlocation: {}", location));
        }
        if !self.stdout.trim().is_empty() {
            out.push_str("\nstdout:\n");
            out.push_str(&crate::util::truncate(self.stdout.trim_end(), max_bytes / 2));
        }
        if !self.stderr.trim().is_empty() {
            out.push_str("\nstderr:\n");
            out.push_str(&crate::util::truncate(self.stderr.trim_end(), max_bytes / 2));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A piece of container output as the backend delivers it; not line-aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// Everything the backend needs to create one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub workdir: String,
    /// `host:container:rw` bind specifications.
    pub binds: Vec<String>,
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    pub network_disabled: bool,
}

/// A container runtime.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Check that the runtime can be reached at all.
    async fn ping(&self) -> Result<(), SandboxError>;

    /// Make `image` available locally, building or pulling it if missing.
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError>;

    /// Create a container and return its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, SandboxError>;

    async fn start(&self, id: &str) -> Result<(), SandboxError>;

    /// Follow stdout and stderr until the container exits.
    fn output<'a>(&'a self, id: &'a str) -> BoxStream<'a, Result<OutputChunk, SandboxError>>;

    /// Wait for exit and return the exit code.
    async fn wait(&self, id: &str) -> Result<i64, SandboxError>;

    /// Stop and remove the container.
    async fn teardown(&self, id: &str) -> Result<(), SandboxError>;
}

/// Output gathered from one container, complete or not.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Splits arbitrary chunks into complete lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Runs commands in isolated containers bound to one workspace.
pub struct Sandbox {
    backend: Arc<dyn SandboxBackend>,
    config: SandboxConfig,
    workspace_root: PathBuf,
    streams: Arc<StreamRegistry>,
    locator: ErrorLocator,
    image_ready: OnceCell<()>,
}

impl Sandbox {
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        config: SandboxConfig,
        workspace_root: PathBuf,
        streams: Arc<StreamRegistry>,
    ) -> Self {
        let locator = ErrorLocator::new(config.workdir.clone());
        Self {
            backend,
            config,
            workspace_root,
            streams,
            locator,
            image_ready: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn streams(&self) -> &Arc<StreamRegistry> {
        &self.streams
    }

    /// Execute `command` and stream its output to the listener of `run_id`.
    ///
    /// Never fails: every problem is folded into an error result.
    pub async fn run(&self, command: &str, run_id: &str) -> ExecutionResult {
        if let Err(e) = self.backend.ping().await {
            warn!(run_id, error = %e, "sandbox backend unreachable");
            return ExecutionResult::unavailable();
        }

        if let Err(e) = self
            .image_ready
            .get_or_try_init(|| self.backend.ensure_image(&self.config.image))
            .await
        {
            warn!(run_id, error = %e, "sandbox image unavailable");
            return ExecutionResult::failed(e.to_string());
        }

        let spec = self.container_spec(command, run_id);
        let id = match self.backend.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                warn!(run_id, error = %e, "failed to create sandbox container");
                return ExecutionResult::failed(e.to_string());
            }
        };
        info!(run_id, container = %id, command, "running sandboxed command");

        let mut captured = CapturedOutput::default();
        let outcome = self.drive(&id, run_id, &mut captured).await;

        if let Err(e) = self.backend.teardown(&id).await {
            warn!(run_id, container = %id, error = %e, "failed to clean up sandbox container");
        }

        match outcome {
            Ok(exit_code) => {
                let result = self.classify(exit_code, captured);
                debug!(run_id, status = ?result.status, exit_code = ?result.exit_code, "sandboxed command finished");
                result
            }
            Err(e) => {
                warn!(run_id, error = %e, "sandboxed command failed");
                ExecutionResult::failed(e.to_string()).with_output(captured)
            }
        }
    }

    fn container_spec(&self, command: &str, run_id: &str) -> ContainerSpec {
        let memory_bytes = match self.config.memory_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "ignoring invalid sandbox memory limit");
                None
            }
        };
        ContainerSpec {
            image: self.config.image.clone(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), command.to_string()],
            workdir: self.config.workdir.clone(),
            binds: vec![format!(
                "{}:{}:rw",
                self.workspace_root.display(),
                self.config.workdir
            )],
            env: self.config.env_pairs(),
            labels: HashMap::from([(RUN_LABEL.to_string(), run_id.to_string())]),
            memory_bytes,
            nano_cpus: Some(self.config.nano_cpus()),
            network_disabled: self.config.network_disabled,
        }
    }

    /// Start the container and return its exit code. Output lands in
    /// `captured` as it arrives, so it survives a timeout or stream error.
    async fn drive(
        &self,
        id: &str,
        run_id: &str,
        captured: &mut CapturedOutput,
    ) -> Result<i64, SandboxError> {
        self.backend.start(id).await?;

        let secs = self.config.timeout;
        let joined = tokio::time::timeout(Duration::from_secs(secs), async {
            tokio::try_join!(self.collect_output(id, run_id, captured), self.backend.wait(id))
        })
        .await
        .map_err(|_| SandboxError::Timeout { secs })?;
        let ((), exit_code) = joined?;
        Ok(exit_code)
    }

    async fn collect_output(
        &self,
        id: &str,
        run_id: &str,
        captured: &mut CapturedOutput,
    ) -> Result<(), SandboxError> {
        let mut stream = self.backend.output(id);
        let mut out_lines = LineBuffer::default();
        let mut err_lines = LineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let lines = match chunk.stream {
                OutputStream::Stdout => {
                    captured.stdout.push_str(&chunk.text);
                    out_lines.push(&chunk.text)
                }
                OutputStream::Stderr => {
                    captured.stderr.push_str(&chunk.text);
                    err_lines.push(&chunk.text)
                }
            };
            for line in lines {
                self.streams.publish(run_id, &line);
            }
        }

        for rest in [out_lines.finish(), err_lines.finish()].into_iter().flatten() {
            self.streams.publish(run_id, &rest);
        }
        Ok(())
    }

    fn classify(&self, exit_code: i64, captured: CapturedOutput) -> ExecutionResult {
        let CapturedOutput { stdout, stderr } = captured;
        if exit_code == 0 {
            return ExecutionResult {
                status: ExecutionStatus::Success,
                stdout,
                stderr,
                exit_code: Some(0),
                error: None,
                error_details: None,
            };
        }
        let error_details = self.locator.locate(&stderr);
        ExecutionResult {
            status: ExecutionStatus::Error,
            stdout,
            stderr,
            exit_code: Some(exit_code),
            error: None,
            error_details,
        }
    }
}
