//! `bblkg resolve`: find where an LKG lives without fetching it.

use super::common::{LkgContext, RequestArgs, ResolvedView};
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use std::path::Path;

/// Resolve an LKG request to an address and version.
#[derive(Debug, Args)]
pub struct ResolveCommand {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Output format (text or json)
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,
}

impl ResolveCommand {
    /// Runs the command against the configuration at `config_path`.
    ///
    /// # Errors
    ///
    /// Fails when nothing satisfies the request or resolution errors.
    pub async fn execute(self, config_path: &Path) -> Result<()> {
        let ctx = LkgContext::load(config_path).await?;
        let request = self.request.to_request();

        let Some(info) = ctx.resolver.get_lkg_download_info(&request).await? else {
            bail!(
                "No LKG of {} satisfies {}:{} on {}",
                request.source,
                request.part.build_context,
                request.part.part_name,
                request.platform
            );
        };

        if self.format == "json" {
            println!("{}", serde_json::to_string_pretty(&ResolvedView::from(&info))?);
        } else {
            println!("{} {} {}", "Resolved".green().bold(), info.name.bold(), info.version);
            println!("  address: {}", info.address);
            println!("  server:  {} ({})", info.server.name, info.server_kind);
        }
        Ok(())
    }
}
