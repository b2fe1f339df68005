//! Configuration view and validation: `conductor config`.

use anyhow::Result;
use std::path::Path;

use conductor::config::Config;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false, false)?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Conductor Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No conductor.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();

            println!("Effective values (with env overrides):");
            println!("  llm.command = \"{}\"", config.toml.llm_command());
            println!("  workspace = \"{}\"", config.workspace_dir.display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let problems = config.toml.validate();
            if problems.is_empty() {
                if config_path.exists() {
                    println!("Configuration is valid.");
                } else {
                    println!("No conductor.toml found. Using defaults (valid).");
                }
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                println!();
                anyhow::bail!("{} configuration problem(s) found", problems.len());
            }
            println!();
        }
    }
    Ok(())
}
