//! Project configuration read from `.conductor/conductor.toml`.
//!
//! Every section and field is optional; a missing file yields the built-in
//! defaults, which describe a complete taxonomy.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "todo-app"
//! workspace = "workspace"
//!
//! [llm]
//! command = "claude"
//! timeout_secs = 300
//!
//! [router]
//! mode = "llm"          # or "table" for deterministic routing
//! model = "haiku"
//! max_steps = 50
//!
//! [sandbox]
//! image = "python:3.12-slim"
//! build_context = "sandbox"
//! memory = "2g"
//! timeout = 600
//!
//! [qa]
//! test_command = "python -m unittest discover tests"
//! auditors = ["code_quality_auditor", "security_auditor"]
//! adversarial = true
//! allow_disputes = true
//!
//! [tasks]
//! max_attempts = 2
//!
//! [taxonomy.backend_development_group]
//! description = "Server-side implementation"
//! leader = "opus"
//! labor = ["sonnet"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::errors::RegistryError;
use crate::sandbox::SandboxConfig;
use crate::stage::{Specialization, Stage};

/// Environment variable overriding `llm.command`.
pub const LLM_CMD_ENV: &str = "CONDUCTOR_LLM_CMD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Directory, relative to the project, that generated code lives in.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
}

fn default_workspace() -> PathBuf {
    PathBuf::from("workspace")
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace: default_workspace(),
        }
    }
}

/// Reasoning client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_command")]
    pub command: String,
    #[serde(default = "default_model_flag")]
    pub model_flag: String,
    #[serde(default = "default_system_prompt_flag")]
    pub system_prompt_flag: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_command() -> String {
    "claude".to_string()
}

fn default_model_flag() -> String {
    "--model".to_string()
}

fn default_system_prompt_flag() -> String {
    "--append-system-prompt".to_string()
}

fn default_llm_timeout() -> u64 {
    300
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            command: default_llm_command(),
            model_flag: default_model_flag(),
            system_prompt_flag: default_system_prompt_flag(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// How the next stage is chosen when no hard-wired rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    /// Ask the reasoning service.
    #[default]
    Llm,
    /// Evaluate the transition table locally.
    Table,
}

impl std::fmt::Display for RouterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterMode::Llm => write!(f, "llm"),
            RouterMode::Table => write!(f, "table"),
        }
    }
}

impl std::str::FromStr for RouterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "llm" => Ok(RouterMode::Llm),
            "table" => Ok(RouterMode::Table),
            _ => anyhow::bail!("Invalid router mode '{}'. Valid values: llm, table", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    #[serde(default)]
    pub mode: RouterMode,
    #[serde(default = "default_router_model")]
    pub model: String,
    /// Upper bound on stages executed by one `run`/`resume` call.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_router_model() -> String {
    "haiku".to_string()
}

fn default_max_steps() -> u32 {
    50
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            mode: RouterMode::default(),
            model: default_router_model(),
            max_steps: default_max_steps(),
        }
    }
}

/// Quality-assurance council settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaSection {
    /// Command run in the sandbox before the code review auditors.
    #[serde(default = "default_test_command")]
    pub test_command: String,
    /// Gating auditors, in the order they run.
    #[serde(default = "default_auditors")]
    pub auditors: Vec<String>,
    /// Run the advisory adversarial tester after the gating auditors.
    #[serde(default = "default_true")]
    pub adversarial: bool,
    /// Let the council supervisor dispute a "revision required" verdict.
    #[serde(default = "default_true")]
    pub allow_disputes: bool,
}

fn default_test_command() -> String {
    "python -m unittest discover tests".to_string()
}

fn default_auditors() -> Vec<String> {
    [
        "code_quality_auditor",
        "security_auditor",
        "performance_auditor",
        "ux_logic_auditor",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_true() -> bool {
    true
}

impl Default for QaSection {
    fn default() -> Self {
        Self {
            test_command: default_test_command(),
            auditors: default_auditors(),
            adversarial: true,
            allow_disputes: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksSection {
    /// Executions allowed per failing task before it is skipped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    2
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// One specialization group: a leader model and its labor pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub description: String,
    /// Model alias used for supervisory calls.
    pub leader: String,
    /// Model aliases used for routine work; empty means "use the leader".
    #[serde(default)]
    pub labor: Vec<String>,
}

impl GroupConfig {
    fn new(description: &str, leader: &str, labor: &[&str]) -> Self {
        Self {
            description: description.to_string(),
            leader: leader.to_string(),
            labor: labor.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Model for routine work in this group.
    pub fn labor_model(&self) -> &str {
        self.labor.first().map(String::as_str).unwrap_or(&self.leader)
    }
}

pub(crate) fn default_taxonomy() -> BTreeMap<String, GroupConfig> {
    use Specialization::*;
    let groups = [
        (UserEngagement, GroupConfig::new("Handles user interaction, query clarification, and scope definition.", "sonnet", &["haiku"])),
        (LanguageExpert, GroupConfig::new("Refines and rephrases requests into precise technical language.", "sonnet", &["haiku"])),
        (Analysts, GroupConfig::new("Handles market research, technical planning, and task decomposition.", "opus", &["sonnet"])),
        (Innovators, GroupConfig::new("Handles creative brainstorming, feature expansion, and conceptual planning.", "opus", &["sonnet"])),
        (FrontendDevelopment, GroupConfig::new("Implements user interfaces and client-side logic.", "sonnet", &["sonnet"])),
        (BackendDevelopment, GroupConfig::new("Implements server-side logic, data storage, and APIs.", "sonnet", &["sonnet"])),
        (DebuggingSupport, GroupConfig::new("Diagnoses and fixes failures reported by testing.", "sonnet", &["sonnet"])),
        (QaCouncil, GroupConfig::new("Audits plans and code for quality, security, performance, and usability.", "opus", &["sonnet"])),
        (AdjudicationUnit, GroupConfig::new("Rules impartially on disputed review outcomes.", "opus", &[])),
    ];
    groups
        .into_iter()
        .map(|(spec, group)| (spec.tag().to_string(), group))
        .collect()
}

/// The complete `conductor.toml` structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub qa: QaSection,
    #[serde(default)]
    pub tasks: TasksSection,
    /// Keyed by specialization tag. Groups missing from the file keep their
    /// built-in definition.
    #[serde(default = "default_taxonomy")]
    pub taxonomy: BTreeMap<String, GroupConfig>,
}

impl Default for ConductorToml {
    fn default() -> Self {
        Self {
            project: ProjectSection::default(),
            llm: LlmConfig::default(),
            router: RouterSection::default(),
            sandbox: SandboxConfig::default(),
            qa: QaSection::default(),
            tasks: TasksSection::default(),
            taxonomy: default_taxonomy(),
        }
    }
}

impl ConductorToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// Taxonomy groups given in the file replace the built-in entry of the
    /// same tag; the others are filled in from the defaults.
    pub fn parse(content: &str) -> Result<Self> {
        let mut parsed: Self = toml::from_str(content).context("Failed to parse conductor.toml")?;
        for (tag, group) in default_taxonomy() {
            parsed.taxonomy.entry(tag).or_insert(group);
        }
        Ok(parsed)
    }

    /// Load `.conductor/conductor.toml`, or defaults when it does not exist.
    pub fn load_or_default(conductor_dir: &Path) -> Result<Self> {
        let config_path = conductor_dir.join("conductor.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize conductor.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// The reasoning command, with the environment taking precedence.
    pub fn llm_command(&self) -> String {
        std::env::var(LLM_CMD_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.llm.command.clone())
    }

    /// Resolved reasoning settings (file, then environment).
    pub fn effective_llm(&self) -> LlmConfig {
        LlmConfig {
            command: self.llm_command(),
            ..self.llm.clone()
        }
    }

    /// Problems that would make runs misbehave. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if let Err(e) = self.sandbox.validate() {
            problems.push(e.to_string());
        }
        if self.router.max_steps == 0 {
            problems.push("router.max_steps must be at least 1".to_string());
        }
        if self.llm.timeout_secs == 0 {
            problems.push("llm.timeout_secs must be at least 1".to_string());
        }
        if self.qa.test_command.trim().is_empty() {
            problems.push("qa.test_command must not be empty".to_string());
        }
        if self.tasks.max_attempts == 0 {
            problems.push("tasks.max_attempts must be at least 1".to_string());
        }
        if let Err(e) = Taxonomy::from_config(&self.taxonomy) {
            problems.push(e.to_string());
        }
        for (tag, group) in &self.taxonomy {
            if group.leader.trim().is_empty() {
                problems.push(format!("taxonomy.{}.leader must not be empty", tag));
            }
        }

        problems
    }
}

/// Immutable, validated view of the taxonomy keyed by specialization.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    groups: BTreeMap<Specialization, GroupConfig>,
}

impl Taxonomy {
    /// Build from the raw `[taxonomy]` table.
    ///
    /// Fails on a tag that names no specialization, and on any stage whose
    /// specialization has no entry.
    pub fn from_config(raw: &BTreeMap<String, GroupConfig>) -> Result<Self, RegistryError> {
        let mut groups = BTreeMap::new();
        for (tag, group) in raw {
            let spec: Specialization = tag
                .parse()
                .map_err(|_| RegistryError::UnknownSpecialization(tag.clone()))?;
            groups.insert(spec, group.clone());
        }

        for stage in Stage::ALL {
            if let Some(spec) = stage.specialization()
                && !groups.contains_key(&spec)
            {
                return Err(RegistryError::MissingSpecialization {
                    stage: stage.id().to_string(),
                    specialization: spec.tag().to_string(),
                });
            }
        }
        // Task execution is served by both development groups.
        for spec in Specialization::DEVELOPMENT {
            if !groups.contains_key(&spec) {
                return Err(RegistryError::MissingSpecialization {
                    stage: Stage::TaskExecution.id().to_string(),
                    specialization: spec.tag().to_string(),
                });
            }
        }

        Ok(Self { groups })
    }

    pub fn group(&self, spec: Specialization) -> Option<&GroupConfig> {
        self.groups.get(&spec)
    }

    pub fn leader_model(&self, spec: Specialization) -> Option<&str> {
        self.group(spec).map(|g| g.leader.as_str())
    }

    pub fn labor_model(&self, spec: Specialization) -> Option<&str> {
        self.group(spec).map(GroupConfig::labor_model)
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        let groups = default_taxonomy()
            .into_iter()
            .filter_map(|(tag, group)| tag.parse().ok().map(|spec| (spec, group)))
            .collect();
        Self { groups }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConductorToml::default();
        assert_eq!(config.project.workspace, PathBuf::from("workspace"));
        assert_eq!(config.llm.command, "claude");
        assert_eq!(config.llm.timeout_secs, 300);
        assert_eq!(config.router.mode, RouterMode::Llm);
        assert_eq!(config.router.max_steps, 50);
        assert_eq!(config.tasks.max_attempts, 2);
        assert_eq!(config.qa.auditors.len(), 4);
        assert!(config.qa.allow_disputes);
        assert_eq!(config.taxonomy.len(), 9);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_empty_file_gives_defaults() {
        let config = ConductorToml::parse("").unwrap();
        assert_eq!(config.router.model, "haiku");
        assert_eq!(config.taxonomy.len(), 9);
    }

    #[test]
    fn test_parse_partial_sections() {
        let config = ConductorToml::parse(
            r#"
[router]
mode = "table"
max_steps = 10

[qa]
auditors = ["security_auditor"]
allow_disputes = false

[taxonomy.backend_development_group]
leader = "opus"
labor = []
"#,
        )
        .unwrap();
        assert_eq!(config.router.mode, RouterMode::Table);
        assert_eq!(config.router.max_steps, 10);
        assert_eq!(config.router.model, "haiku");
        assert_eq!(config.qa.auditors, vec!["security_auditor".to_string()]);
        assert!(!config.qa.allow_disputes);
        assert!(config.qa.adversarial);

        let backend = &config.taxonomy["backend_development_group"];
        assert_eq!(backend.leader, "opus");
        assert_eq!(backend.labor_model(), "opus");
        assert_eq!(config.taxonomy.len(), 9);
    }

    #[test]
    fn test_invalid_router_mode_is_rejected() {
        assert!(ConductorToml::parse("[router]\nmode = \"dice\"").is_err());
        assert!("dice".parse::<RouterMode>().is_err());
        assert_eq!("TABLE".parse::<RouterMode>().unwrap(), RouterMode::Table);
    }

    #[test]
    fn test_unknown_taxonomy_group_fails_validation() {
        let config = ConductorToml::parse(
            r#"
[taxonomy.marketing_group]
leader = "sonnet"
"#,
        )
        .unwrap();
        let problems = config.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("marketing_group"));
    }

    #[test]
    fn test_taxonomy_missing_group_is_an_error() {
        let mut raw = default_taxonomy();
        raw.remove("adjudication_unit");
        let err = Taxonomy::from_config(&raw).unwrap_err();
        match err {
            RegistryError::MissingSpecialization { stage, specialization } => {
                assert_eq!(stage, "step_dispute_resolution");
                assert_eq!(specialization, "adjudication_unit");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_taxonomy_requires_both_development_groups() {
        let mut raw = default_taxonomy();
        raw.remove("frontend_development_group");
        assert!(matches!(
            Taxonomy::from_config(&raw),
            Err(RegistryError::MissingSpecialization { .. })
        ));
    }

    #[test]
    fn test_taxonomy_models() {
        let taxonomy = Taxonomy::default();
        assert_eq!(taxonomy.leader_model(Specialization::AdjudicationUnit), Some("opus"));
        assert_eq!(taxonomy.labor_model(Specialization::AdjudicationUnit), Some("opus"));
        assert_eq!(taxonomy.labor_model(Specialization::UserEngagement), Some("haiku"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        let mut config = ConductorToml::default();
        config.router.mode = RouterMode::Table;
        config.sandbox.image = "node:22-slim".to_string();
        config.save(&path).unwrap();

        let loaded = ConductorToml::load(&path).unwrap();
        assert_eq!(loaded.router.mode, RouterMode::Table);
        assert_eq!(loaded.sandbox.image, "node:22-slim");
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConductorToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.router.max_steps, 50);
    }

    #[test]
    fn test_validate_reports_bad_values() {
        let mut config = ConductorToml::default();
        config.router.max_steps = 0;
        config.sandbox.memory = "lots".to_string();
        let problems = config.validate();
        assert_eq!(problems.len(), 2);
    }
}
