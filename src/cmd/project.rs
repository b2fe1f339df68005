//! Project initialization: `conductor init`.

use anyhow::{Context, Result};
use std::path::Path;

use conductor::conductor_config::ConductorToml;
use conductor::config::Config;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(project_dir)
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;
    let project_dir = project_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", project_dir.display()))?;

    let was_initialized = project_dir.join(conductor::config::CONDUCTOR_DIR).is_dir();
    let toml = ConductorToml::load_or_default(&project_dir.join(conductor::config::CONDUCTOR_DIR))?;
    let config = Config::from_parts(project_dir, toml, false, false);
    config.ensure_dirs()?;

    let config_file = config.config_file();
    if !config_file.exists() {
        config.toml.save(&config_file)?;
    }

    if was_initialized {
        println!(
            "Conductor project already initialized at {}",
            config.conductor_dir.display()
        );
        println!("Directory structure verified.");
        return Ok(());
    }

    println!("Initialized conductor project at {}", config.conductor_dir.display());
    println!();
    println!("Created directory structure:");
    println!("  .conductor/");
    println!("  ├── conductor.toml  # Settings (edit to taste)");
    println!("  ├── runs/           # One directory per run");
    println!("  ├── logs/           # conductor.log and notifications.log");
    println!("  └── prompts/        # Role prompt overrides (<role>.md)");
    println!("  {}/", config.toml.project.workspace.display());
    println!();
    println!("Next steps:");
    println!("  1. Review .conductor/conductor.toml");
    println!("  2. Run `conductor run \"<what you want built>\"`");
    Ok(())
}
