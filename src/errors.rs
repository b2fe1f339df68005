//! Typed error hierarchy for conductor.
//!
//! Each subsystem owns one enum:
//! - `EngineError`: run registry and persistence failures
//! - `SandboxError`: isolated execution backend failures
//! - `WorkspaceError`: path-sandboxed file access failures
//! - `RegistryError`: worker registry construction failures
//!
//! Reasoning-service failures live next to the trait in `crate::llm`.

use thiserror::Error;

/// Errors from the engine and its run store.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Run {run_id} is locked by another process")]
    RunLocked { run_id: String },

    #[error("Failed to persist run {run_id}: {source}")]
    Persist {
        run_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state for run {run_id}: {source}")]
    CorruptState {
        run_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the isolated execution backend.
///
/// These never escape `Sandbox::run`; they are folded into an error
/// `ExecutionResult` so workers can decide what to do.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox unavailable")]
    Unavailable,

    #[error("Failed to prepare image {image}: {message}")]
    Image { image: String, message: String },

    #[error("Container {stage} failed: {message}")]
    Container { stage: &'static str, message: String },

    #[error("Output stream failed: {0}")]
    Stream(String),

    #[error("Command timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Errors from workspace-scoped file access.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Path '{path}' escapes the workspace")]
    PathEscape { path: String },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from building the worker registry out of the taxonomy.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown specialization '{0}' in taxonomy")]
    UnknownSpecialization(String),

    #[error("Stage {stage} needs specialization {specialization}, which the taxonomy does not define")]
    MissingSpecialization {
        stage: String,
        specialization: String,
    },
}
