//! The reasoning capability: "complete this prompt".
//!
//! Workers and the router only see the [`Completion`] trait. The shipped
//! implementation, [`ClaudeCli`], shells out to a command-line client.

mod claude;

pub use claude::ClaudeCli;

use async_trait::async_trait;
use thiserror::Error;

/// One request to the reasoning service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionRequest {
    /// Model alias; `None` lets the client choose.
    pub model: Option<String>,
    /// Role instructions appended to the client's system prompt.
    pub system: Option<String>,
    pub prompt: String,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O with reasoning process failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reasoning call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Reasoning process exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    #[error("Reasoning process returned no output")]
    Empty,
}

#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Answers by the first rule whose needle occurs in the system prompt or
    /// the prompt. A rule without a reply fails the call.
    #[derive(Default)]
    pub struct ScriptedCompletion {
        rules: Vec<(String, Option<String>)>,
        fallback: Option<String>,
        calls: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedCompletion {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every call fails.
        pub fn failing() -> Self {
            Self::default()
        }

        pub fn on(mut self, needle: &str, reply: &str) -> Self {
            self.rules.push((needle.to_string(), Some(reply.to_string())));
            self
        }

        pub fn fail_on(mut self, needle: &str) -> Self {
            self.rules.push((needle.to_string(), None));
            self
        }

        pub fn otherwise(mut self, reply: &str) -> Self {
            self.fallback = Some(reply.to_string());
            self
        }

        pub fn calls(&self) -> Vec<CompletionRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Completion for ScriptedCompletion {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(request.clone());
            let haystack = format!("{}\n{}", request.system.clone().unwrap_or_default(), request.prompt);
            let reply = self
                .rules
                .iter()
                .find(|(needle, _)| haystack.contains(needle.as_str()))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_else(|| self.fallback.clone());
            reply.ok_or(LlmError::Exit {
                code: Some(1),
                stderr: "scripted failure".to_string(),
            })
        }
    }
}
