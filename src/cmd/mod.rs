//! CLI command implementations.
//!
//! | Module    | Commands handled                    |
//! |-----------|-------------------------------------|
//! | `project` | `Init`                              |
//! | `run`     | `Run`, `Resume`                     |
//! | `runs`    | `Status`, `Runs`, `History`         |
//! | `exec`    | `Exec`                              |
//! | `config`  | `Config`                            |

pub mod config;
pub mod exec;
pub mod project;
pub mod run;
pub mod runs;

pub use config::cmd_config;
pub use exec::cmd_exec;
pub use project::cmd_init;
pub use run::{cmd_resume, cmd_run};
pub use runs::{cmd_history, cmd_runs, cmd_status};

use anyhow::Result;
use std::path::Path;

use conductor::config::Config;

/// Load configuration for commands that need an initialized project.
pub(crate) fn load_initialized(project_dir: &Path, verbose: bool, yes: bool) -> Result<Config> {
    let config = Config::new(project_dir.to_path_buf(), verbose, yes)?;
    if !config.is_initialized() {
        anyhow::bail!("Project not initialized. Run 'conductor init' first.");
    }
    Ok(config)
}
