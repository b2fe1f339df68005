use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::conductor_config::ConductorToml;

/// Name of the per-project state directory.
pub const CONDUCTOR_DIR: &str = ".conductor";

/// Runtime configuration: `conductor.toml` plus resolved directories and
/// CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub log_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub toml: ConductorToml,
    pub verbose: bool,
    /// Answer every user prompt automatically.
    pub yes: bool,
}

impl Config {
    /// Resolve configuration for `project_dir`.
    ///
    /// Loads `<project>/.env` into the environment first, so it can supply
    /// variables such as `CONDUCTOR_LLM_CMD`.
    pub fn new(project_dir: PathBuf, verbose: bool, yes: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory: {}", project_dir.display()))?;

        let env_file = project_dir.join(".env");
        if env_file.is_file() {
            dotenvy::from_path(&env_file)
                .with_context(|| format!("Failed to load {}", env_file.display()))?;
            debug!(path = %env_file.display(), "loaded environment file");
        }

        let conductor_dir = project_dir.join(CONDUCTOR_DIR);
        let toml = ConductorToml::load_or_default(&conductor_dir)?;
        Ok(Self::from_parts(project_dir, toml, verbose, yes))
    }

    /// Assemble a config without touching the filesystem.
    pub fn from_parts(project_dir: PathBuf, toml: ConductorToml, verbose: bool, yes: bool) -> Self {
        let conductor_dir = project_dir.join(CONDUCTOR_DIR);
        let workspace_dir = project_dir.join(&toml.project.workspace);
        Self {
            runs_dir: conductor_dir.join("runs"),
            log_dir: conductor_dir.join("logs"),
            prompts_dir: conductor_dir.join("prompts"),
            conductor_dir,
            workspace_dir,
            project_dir,
            toml,
            verbose,
            yes,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.conductor_dir.join("conductor.toml")
    }

    pub fn notifications_log(&self) -> PathBuf {
        self.log_dir.join("notifications.log")
    }

    pub fn is_initialized(&self) -> bool {
        self.conductor_dir.is_dir()
    }

    /// Create the state, run, log, prompt and workspace directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.conductor_dir,
            &self.runs_dir,
            &self.log_dir,
            &self.prompts_dir,
            &self.workspace_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Sandbox build context, resolved against the project directory.
    pub fn sandbox_build_context(&self) -> Option<PathBuf> {
        self.toml
            .sandbox
            .build_context
            .as_deref()
            .map(|p| resolve_against(&self.project_dir, p))
    }

    pub fn project_name(&self) -> String {
        self.toml.project.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string())
        })
    }
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
