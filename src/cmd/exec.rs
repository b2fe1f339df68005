//! One-off sandbox execution with live output: `conductor exec`.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::sync::Arc;

use conductor::sandbox::{DockerBackend, Sandbox};
use conductor::stream::StreamRegistry;
use conductor::workspace::Workspace;

use super::load_initialized;

pub async fn cmd_exec(project_dir: &Path, command: &str, verbose: bool) -> Result<()> {
    let config = load_initialized(project_dir, verbose, true)?;
    config.toml.sandbox.validate()?;
    let workspace = Workspace::open(&config.workspace_dir)?;

    let streams = StreamRegistry::new();
    let sandbox = Sandbox::new(
        Arc::new(DockerBackend::connect(config.sandbox_build_context())),
        config.toml.sandbox.clone(),
        workspace.root().to_path_buf(),
        streams.clone(),
    );

    let run_id = format!("exec-{}", uuid::Uuid::new_v4());
    let mut subscription = streams.subscribe(&run_id)?;

    let run = sandbox.run(command, &run_id);
    tokio::pin!(run);
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            Some(line) = subscription.recv() => println!("{}", line),
        }
    };
    streams.close(&run_id);
    while let Some(line) = subscription.recv().await {
        println!("{}", line);
    }

    println!();
    if result.is_success() {
        println!("{}", style("Command succeeded").green());
        return Ok(());
    }
    if let Some(error) = &result.error {
        eprintln!("{}", style(error).red());
    }
    if let Some(details) = &result.error_details {
        eprintln!("{}", details);
    }
    match result.exit_code {
        Some(code) => anyhow::bail!("Command exited with code {}", code),
        None => anyhow::bail!("Command could not be run in the sandbox"),
    }
}
