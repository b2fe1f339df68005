use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{Completion, CompletionRequest, LlmError};
use crate::conductor_config::LlmConfig;

/// Reasoning service backed by a `claude`-compatible command-line client.
///
/// The prompt goes to stdin and the answer is read from stdout:
/// `<command> --print [--model <m>] [--append-system-prompt <s>]`.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    command: String,
    model_flag: String,
    system_prompt_flag: String,
    timeout: Duration,
}

impl ClaudeCli {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            command: config.command.clone(),
            model_flag: config.model_flag.clone(),
            system_prompt_flag: config.system_prompt_flag.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn build_command(&self, request: &CompletionRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--print");
        if let Some(model) = &request.model {
            cmd.arg(&self.model_flag).arg(model);
        }
        if let Some(system) = &request.system {
            cmd.arg(&self.system_prompt_flag).arg(system);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn exchange(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut child = self
            .build_command(request)
            .spawn()
            .map_err(|source| LlmError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = match stdin.write_all(request.prompt.as_bytes()).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            // A client that exits without reading its input is judged by its exit status.
            if let Err(e) = written
                && e.kind() != std::io::ErrorKind::BrokenPipe
            {
                return Err(e.into());
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmError::Exit {
                code: output.status.code(),
                stderr: crate::util::truncate(stderr.trim(), 1000),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(stdout)
    }
}

#[async_trait]
impl Completion for ClaudeCli {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let start = Instant::now();
        debug!(
            prompt_bytes = request.prompt.len(),
            model = request.model.as_deref().unwrap_or("default"),
            "invoking reasoning service"
        );

        let answer = tokio::time::timeout(self.timeout, self.exchange(&request))
            .await
            .map_err(|_| LlmError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        debug!(
            answer_bytes = answer.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "reasoning service answered"
        );
        Ok(answer)
    }
}
