//! `bblkg pull`: lock sources to their last known good builds.

use super::common::LkgContext;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

/// Pull the newest build description of each source, in order.
///
/// Sources matched to a primary should be listed after it.
#[derive(Debug, Args)]
pub struct PullCommand {
    /// LKG source names
    #[arg(value_name = "SOURCE", required = true)]
    pub sources: Vec<String>,

    /// Output format (text or json)
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,
}

#[derive(Debug, Serialize)]
struct PulledView {
    name: String,
    version: String,
    contexts: Vec<String>,
    unsaved: Vec<String>,
}

impl PullCommand {
    /// Runs the command against the configuration at `config_path`.
    ///
    /// # Errors
    ///
    /// Stops at the first source that cannot be pulled.
    pub async fn execute(self, config_path: &Path) -> Result<()> {
        let ctx = LkgContext::load(config_path).await?;

        let mut pulled = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let lkg = ctx.resolver.use_last_known_good(source).await?;
            pulled.push(PulledView {
                name: lkg.name,
                version: lkg.version.to_string(),
                contexts: lkg.contexts,
                unsaved: lkg.unsaved.into_iter().map(|(file, part)| format!("{file}:{part}")).collect(),
            });
        }

        if self.format == "json" {
            println!("{}", serde_json::to_string_pretty(&pulled)?);
            return Ok(());
        }
        for view in &pulled {
            println!("{} {} {}", "Pulled".green().bold(), view.name.bold(), view.version);
            for context in &view.contexts {
                println!("  {context}");
            }
            for unsaved in &view.unsaved {
                println!("  {} {}", "unsaved".yellow(), unsaved);
            }
        }
        Ok(())
    }
}
