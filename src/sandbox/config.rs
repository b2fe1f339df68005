use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Configuration for the isolated execution container, the `[sandbox]`
/// section of `conductor.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Image every command runs in.
    #[serde(default = "default_image")]
    pub image: String,
    /// Directory holding a Dockerfile used to build `image` when it is
    /// missing. Relative paths are resolved against the project directory.
    /// Without it, a missing image is pulled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_context: Option<PathBuf>,
    /// Mount point of the workspace inside the container.
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    /// Seconds a single command may run.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub network_disabled: bool,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_workdir() -> String {
    crate::locate::DEFAULT_WORKSPACE_PREFIX
        .trim_end_matches('/')
        .to_string()
}

fn default_memory() -> String {
    "2g".to_string()
}

fn default_cpus() -> f64 {
    1.0
}

fn default_timeout() -> u64 {
    600
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            build_context: None,
            workdir: default_workdir(),
            memory: default_memory(),
            cpus: default_cpus(),
            timeout: default_timeout(),
            network_disabled: false,
            env: HashMap::new(),
        }
    }
}

impl SandboxConfig {
    /// Memory limit in bytes, parsed from values like `512m` or `4g`.
    pub fn memory_bytes(&self) -> Result<i64> {
        parse_memory(&self.memory)
    }

    /// CPU limit in the nano-CPU unit the container API expects.
    pub fn nano_cpus(&self) -> i64 {
        (self.cpus * 1_000_000_000.0) as i64
    }

    /// Environment as `KEY=value` pairs, sorted for stable container specs.
    pub fn env_pairs(&self) -> Vec<String> {
        let mut pairs: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            bail!("sandbox.image must not be empty");
        }
        if !self.workdir.starts_with('/') {
            bail!("sandbox.workdir must be an absolute container path, got '{}'", self.workdir);
        }
        if self.cpus <= 0.0 {
            bail!("sandbox.cpus must be positive, got {}", self.cpus);
        }
        if self.timeout == 0 {
            bail!("sandbox.timeout must be at least one second");
        }
        self.memory_bytes()?;
        Ok(())
    }
}

fn parse_memory(value: &str) -> Result<i64> {
    let value = value.trim().to_lowercase();
    let (digits, multiplier) = match value.chars().last() {
        Some('k') => (&value[..value.len() - 1], 1024),
        Some('m') => (&value[..value.len() - 1], 1024 * 1024),
        Some('g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        Some(c) if c.is_ascii_digit() => (value.as_str(), 1),
        _ => bail!("Invalid memory limit '{}'", value),
    };
    let amount: i64 = digits
        .parse()
        .with_context(|| format!("Invalid memory limit '{}'", value))?;
    if amount < 0 {
        bail!("Invalid memory limit '{}'", value);
    }
    amount
        .checked_mul(multiplier)
        .with_context(|| format!("Memory limit '{}' is too large", value))
}
