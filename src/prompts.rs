//! System prompts for every role that talks to the reasoning service.
//!
//! Each role has a short built-in prompt. A file named
//! `.conductor/prompts/<role>.md` replaces it.

use std::path::PathBuf;

use tracing::{debug, warn};

const ROUTER: &str = "You are the workflow router of a software production pipeline. \
Given the project state and the transition table, answer with exactly one stage \
identifier from the table, or END when the workflow is finished. No other text.";

const POLISH_QUERY: &str = "You are a language expert. Rewrite the user's request as one \
clear, precise, unambiguous software requirement. Keep every detail the user gave and \
invent nothing. Answer with the rewritten request only.";

const CLARIFICATION: &str = "You are a requirements engineer. List the open questions \
that must be answered before this software can be designed, each with the most \
reasonable default answer. Be concise.";

const MARKET_ANALYSIS: &str = "You are a market and technical analyst. Write a short \
research document for the project brief: comparable products, expected features, \
technical constraints and risks. Use Markdown.";

const IDEATION: &str = "You are a product innovator. Write a conceptual plan for the \
project: core features, user flows, and what makes it useful. Use Markdown. \
If reviewer feedback is included, address every point.";

const TECHNICAL_PLAN: &str = "You are a software architect. Write a technical plan for \
the concept: language and libraries, file layout, data model, components, and how \
it will be tested with the project's test command. Prefer a small dependency-free \
implementation. Use Markdown. If reviewer feedback is included, address every point.";

const CODE_QUALITY_AUDITOR: &str = "You are a code quality auditor. Review the material \
for correctness, clarity, and maintainability. If anything must change before it can \
ship, start your answer with 'Revision Required' and list the changes. Otherwise start \
with 'Approved'.";

const SECURITY_AUDITOR: &str = "You are a security auditor. Review the material for \
injection, unsafe input handling, secrets, and insecure defaults. If anything must \
change, start your answer with 'Revision Required' and list the changes. Otherwise \
start with 'Approved'.";

const PERFORMANCE_AUDITOR: &str = "You are a performance auditor. Review the material for \
needless complexity, unbounded work, and scalability problems. If anything must \
change, start your answer with 'Revision Required' and list the changes. Otherwise \
start with 'Approved'.";

const UX_LOGIC_AUDITOR: &str = "You are a UX and logic auditor. Check that the material \
does what the user asked and that its behaviour is coherent from the user's point of \
view. If anything must change, start your answer with 'Revision Required' and list \
the changes. Otherwise start with 'Approved'.";

const ANTAGONISTIC_TESTER: &str = "You are an adversarial tester. Try to break the \
material: edge cases, malformed input, surprising usage. List concrete findings. \
Your findings are advisory.";

const QA_SUPERVISOR: &str = "You are the supervisor of the QA council. An auditor asked \
for revisions. If the requested revisions are wrong, out of scope, or contradict the \
approved brief, answer 'DISPUTE: <reason>'. Otherwise answer 'ACCEPT'.";

const DECOMPOSITION: &str = "You are a technical lead. Split the technical plan into \
small implementation tasks. Answer with a JSON array only. Each element has: \
\"id\" (short unique string), \"description\", \"group\" (either \
\"backend_development_group\" or \"frontend_development_group\"), and \"dependencies\" \
(ids of tasks that must be finished first).";

const DEVELOPER: &str = "You are a software developer working in a shared workspace. \
Implement the task. Answer with a JSON object only: {\"summary\": \"...\", \"files\": \
[{\"path\": \"relative/path\", \"content\": \"full file content\"}], \"commands\": \
[\"optional shell commands to verify the work\"]}. Paths are relative to the \
workspace root. Always write complete files.";

const DEBUGGER: &str = "You are a debugging specialist. Tests are failing. Using the \
failure report, the error location, and the code, fix the defect. Answer with a JSON \
object only: {\"summary\": \"...\", \"files\": [{\"path\": \"relative/path\", \
\"content\": \"full file content\"}], \"commands\": []}.";

const ADJUDICATOR: &str = "You are an impartial adjudicator. A reviewer requested \
revisions and a supervisor disputed that request. Read both. Answer UPHOLD if the \
dispute is right and the work should proceed as approved, or OVERRULE if the \
revisions must be made. Answer with the single word only.";

const README: &str = "You are a technical writer. Write a README.md for the delivered \
project: what it does, how to install and run it, and how to run its tests. Answer \
with the Markdown only.";

/// Role names with a built-in prompt.
pub const ROLES: &[&str] = &[
    "router",
    "polish_query",
    "clarification",
    "market_analysis",
    "ideation",
    "technical_plan",
    "code_quality_auditor",
    "security_auditor",
    "performance_auditor",
    "ux_logic_auditor",
    "antagonistic_tester",
    "qa_supervisor",
    "decomposition",
    "developer",
    "debugger",
    "adjudicator",
    "readme",
];

fn builtin(role: &str) -> Option<&'static str> {
    Some(match role {
        "router" => ROUTER,
        "polish_query" => POLISH_QUERY,
        "clarification" => CLARIFICATION,
        "market_analysis" => MARKET_ANALYSIS,
        "ideation" => IDEATION,
        "technical_plan" => TECHNICAL_PLAN,
        "code_quality_auditor" => CODE_QUALITY_AUDITOR,
        "security_auditor" => SECURITY_AUDITOR,
        "performance_auditor" => PERFORMANCE_AUDITOR,
        "ux_logic_auditor" => UX_LOGIC_AUDITOR,
        "antagonistic_tester" => ANTAGONISTIC_TESTER,
        "qa_supervisor" => QA_SUPERVISOR,
        "decomposition" => DECOMPOSITION,
        "developer" => DEVELOPER,
        "debugger" => DEBUGGER,
        "adjudicator" => ADJUDICATOR,
        "readme" => README,
        _ => return None,
    })
}

#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    override_dir: Option<PathBuf>,
}

impl PromptLibrary {
    /// Built-in prompts only.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Built-in prompts, overridable by `<dir>/<role>.md`.
    pub fn with_overrides(dir: impl Into<PathBuf>) -> Self {
        Self {
            override_dir: Some(dir.into()),
        }
    }

    /// The system prompt for `role`.
    ///
    /// Roles without a built-in (custom auditors) get a generic auditor
    /// prompt naming the role.
    pub fn get(&self, role: &str) -> String {
        if let Some(dir) = &self.override_dir {
            let path = dir.join(format!("{}.md", role));
            match std::fs::read_to_string(&path) {
                Ok(content) if !content.trim().is_empty() => {
                    debug!(role, path = %path.display(), "using prompt override");
                    return content;
                }
                Ok(_) => warn!(role, path = %path.display(), "ignoring empty prompt override"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(role, error = %e, "failed to read prompt override"),
            }
        }
        match builtin(role) {
            Some(prompt) => prompt.to_string(),
            None => format!(
                "You are the {}. Review the material from that perspective. If anything \
                 must change, start your answer with 'Revision Required' and list the \
                 changes. Otherwise start with 'Approved'.",
                role.replace('_', " ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_has_a_builtin() {
        for role in ROLES {
            assert!(builtin(role).is_some(), "missing prompt for {role}");
        }
    }

    #[test]
    fn override_file_replaces_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("router.md"), "custom router prompt").unwrap();
        let prompts = PromptLibrary::with_overrides(dir.path());
        assert_eq!(prompts.get("router"), "custom router prompt");
        assert_eq!(prompts.get("readme"), README);
    }

    #[test]
    fn empty_override_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), "  \n").unwrap();
        let prompts = PromptLibrary::with_overrides(dir.path());
        assert_eq!(prompts.get("readme"), README);
    }

    #[test]
    fn unknown_role_gets_generic_auditor_prompt() {
        let prompt = PromptLibrary::builtin().get("accessibility_auditor");
        assert!(prompt.contains("accessibility auditor"));
        assert!(prompt.contains("Revision Required"));
    }
}
