//! Interaction with the person who requested the project.
//!
//! Workers ask through [`UserChannel`]. [`AutoPilot`] answers without
//! asking (used with `--yes` and in tests); [`TerminalChannel`] prompts on
//! the controlling terminal. A failed prompt falls back to the autopilot
//! answer in the calling worker.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::{Input, Select, theme::ColorfulTheme};
use tracing::info;

/// Feedback that accepts the presented plan.
pub const APPROVE: &str = "approve";
/// Post-delivery answer that ends the project.
pub const COMPLETE: &str = "complete";

#[async_trait]
pub trait UserChannel: Send + Sync {
    /// Show information that needs no answer.
    async fn present(&self, title: &str, body: &str) -> Result<()>;

    /// Confirm the refined query. `None` accepts it, `Some` is a correction.
    async fn confirm_query(&self, refined_query: &str) -> Result<Option<String>>;

    /// `"approve"` or a free-form change request for the presented plan.
    async fn plan_feedback(&self, plan_summary: &str) -> Result<String>;

    /// `"complete"` or a new request to start another project.
    async fn post_delivery(&self, delivery_summary: &str) -> Result<String>;
}

/// Accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoPilot;

#[async_trait]
impl UserChannel for AutoPilot {
    async fn present(&self, title: &str, body: &str) -> Result<()> {
        info!(title, bytes = body.len(), "presented to user (autopilot)");
        Ok(())
    }

    async fn confirm_query(&self, _refined_query: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn plan_feedback(&self, _plan_summary: &str) -> Result<String> {
        Ok(APPROVE.to_string())
    }

    async fn post_delivery(&self, _delivery_summary: &str) -> Result<String> {
        Ok(COMPLETE.to_string())
    }
}

/// Interactive prompts on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalChannel;

impl TerminalChannel {
    async fn blocking<T, F>(f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .context("Prompt task panicked")?
    }
}

#[async_trait]
impl UserChannel for TerminalChannel {
    async fn present(&self, title: &str, body: &str) -> Result<()> {
        println!();
        println!("{}", console::style(title).bold().cyan());
        println!("{}", console::style("─".repeat(60)).dim());
        println!("{}", body.trim_end());
        println!();
        Ok(())
    }

    async fn confirm_query(&self, refined_query: &str) -> Result<Option<String>> {
        println!();
        println!("{}", console::style("Refined request").bold());
        println!("  {}", refined_query.trim());
        Self::blocking(|| {
            let choice = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Is this what you want built?")
                .items(&["Yes, continue", "No, let me correct it"])
                .default(0)
                .interact()?;
            if choice == 0 {
                return Ok(None);
            }
            let correction: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("Corrected request")
                .interact_text()?;
            Ok(Some(correction))
        })
        .await
    }

    async fn plan_feedback(&self, _plan_summary: &str) -> Result<String> {
        Self::blocking(|| {
            let choice = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Approve the plan?")
                .items(&["Approve and start building", "Request changes"])
                .default(0)
                .interact()?;
            if choice == 0 {
                return Ok(APPROVE.to_string());
            }
            let changes: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("What should change?")
                .interact_text()?;
            Ok(changes)
        })
        .await
    }

    async fn post_delivery(&self, delivery_summary: &str) -> Result<String> {
        println!();
        println!("{}", console::style("Delivered").bold().green());
        println!("{}", delivery_summary.trim_end());
        Self::blocking(|| {
            let choice = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("What next?")
                .items(&["Done", "Start a new request"])
                .default(0)
                .interact()?;
            if choice == 0 {
                return Ok(COMPLETE.to_string());
            }
            let request: String = Input::with_theme(&ColorfulTheme::default())
                .with_prompt("New request")
                .interact_text()?;
            Ok(request)
        })
        .await
    }
}
