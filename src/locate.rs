//! Failure location extraction from raw stderr text.
//!
//! Two shapes are recognised, tried in order:
//! 1. traceback records `File "<path>", line <n>`; the last one wins, as it
//!    is the deepest frame;
//! 2. `path/to/file.<ext>:<line>[:<col>]` for common script extensions;
//!    the first one wins, as stack traces list the throwing frame first.
//!
//! Paths inside the sandbox are reported relative to the workspace root.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Mount point of the workspace inside the sandbox.
pub const DEFAULT_WORKSPACE_PREFIX: &str = "/home/agentuser/workspace/";

static TRACEBACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File "([^"]+)", line (\d+)"#).expect("traceback pattern is a valid static regex")
});

static GENERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([/\w.\-]+\.(?:jsx|js|mjs|cjs|tsx|ts|py|rb)):(\d+)(?::\d+)?")
        .expect("generic location pattern is a valid static regex")
});

/// A file and line a failure points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub file_path: String,
    pub line_number: u32,
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_path, self.line_number)
    }
}

/// Extracts failure locations, stripping a workspace-root prefix.
#[derive(Debug, Clone)]
pub struct ErrorLocator {
    workspace_prefix: String,
}

impl Default for ErrorLocator {
    fn default() -> Self {
        Self::new(DEFAULT_WORKSPACE_PREFIX)
    }
}

impl ErrorLocator {
    pub fn new(workspace_prefix: impl Into<String>) -> Self {
        let mut workspace_prefix = workspace_prefix.into();
        if !workspace_prefix.ends_with('/') {
            workspace_prefix.push('/');
        }
        Self { workspace_prefix }
    }

    pub fn locate(&self, stderr: &str) -> Option<ErrorLocation> {
        if stderr.trim().is_empty() {
            return None;
        }
        self.traceback(stderr).or_else(|| self.generic(stderr))
    }

    fn traceback(&self, stderr: &str) -> Option<ErrorLocation> {
        let caps = TRACEBACK_RE.captures_iter(stderr).last()?;
        self.build(&caps[1], &caps[2])
    }

    fn generic(&self, stderr: &str) -> Option<ErrorLocation> {
        let caps = GENERIC_RE.captures(stderr)?;
        self.build(&caps[1], &caps[2])
    }

    fn build(&self, path: &str, line: &str) -> Option<ErrorLocation> {
        let line_number = line.parse().ok()?;
        let file_path = match path.find(&self.workspace_prefix) {
            Some(idx) => path[idx + self.workspace_prefix.len()..].to_string(),
            None => path.to_string(),
        };
        Some(ErrorLocation {
            file_path,
            line_number,
        })
    }
}

/// Locate a failure using the default sandbox workspace prefix.
pub fn locate(stderr: &str) -> Option<ErrorLocation> {
    ErrorLocator::default().locate(stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_traceback() {
        let loc = locate("Traceback (most recent call last):\n  File \"x.py\", line 7, in <module>\nNameError").unwrap();
        assert_eq!(
            loc,
            ErrorLocation {
                file_path: "x.py".into(),
                line_number: 7
            }
        );
    }

    #[test]
    fn traceback_takes_deepest_frame_and_strips_prefix() {
        let stderr = r#"Traceback (most recent call last):
  File "/home/agentuser/workspace/main.py", line 3, in <module>
    run()
  File "/home/agentuser/workspace/src/app.py", line 42, in run
    boom()
ZeroDivisionError: division by zero
"#;
        let loc = locate(stderr).unwrap();
        assert_eq!(loc.file_path, "src/app.py");
        assert_eq!(loc.line_number, 42);
    }

    #[test]
    fn traceback_outside_workspace_keeps_absolute_path() {
        let stderr = r#"  File "/usr/lib/python3.12/json/decoder.py", line 355, in raw_decode"#;
        let loc = locate(stderr).unwrap();
        assert_eq!(loc.file_path, "/usr/lib/python3.12/json/decoder.py");
        assert_eq!(loc.line_number, 355);
    }

    #[test]
    fn node_stack_trace() {
        let stderr = "TypeError: x is not a function\n    at run (/home/agentuser/workspace/src/index.js:12:5)\n    at main (/home/agentuser/workspace/src/main.js:3:1)";
        let loc = locate(stderr).unwrap();
        assert_eq!(loc.file_path, "src/index.js");
        assert_eq!(loc.line_number, 12);
    }

    #[test]
    fn typescript_without_column() {
        let loc = locate("error in app/page.tsx:88").unwrap();
        assert_eq!(loc.file_path, "app/page.tsx");
        assert_eq!(loc.line_number, 88);
    }

    #[test]
    fn traceback_wins_over_generic() {
        let stderr = "see helper.js:4\n  File \"main.py\", line 9, in f";
        let loc = locate(stderr).unwrap();
        assert_eq!(loc.file_path, "main.py");
    }

    #[test]
    fn empty_and_unrecognised_input() {
        assert!(locate("").is_none());
        assert!(locate("   \n").is_none());
        assert!(locate("segmentation fault (core dumped)").is_none());
    }

    #[test]
    fn custom_prefix_without_trailing_slash() {
        let locator = ErrorLocator::new("/work");
        let loc = locator.locate("  File \"/work/pkg/mod.py\", line 2").unwrap();
        assert_eq!(loc.file_path, "pkg/mod.py");
    }
}
