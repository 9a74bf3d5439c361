//! `bblkg fetch`: resolve an LKG and download it into a directory.

use super::common::{LkgContext, RequestArgs};
use crate::download::DownloadOutcome;
use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

/// Resolve an LKG request and fetch the artifact.
#[derive(Debug, Args)]
pub struct FetchCommand {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Destination directory
    #[arg(short, long, value_name = "DIR")]
    pub dest: PathBuf,
}

impl FetchCommand {
    /// Runs the command against the configuration at `config_path`.
    ///
    /// # Errors
    ///
    /// Fails when nothing satisfies the request or the download fails.
    pub async fn execute(self, config_path: &Path) -> Result<()> {
        let ctx = LkgContext::load(config_path).await?;
        let request = self.request.to_request();

        let Some(info) = ctx.resolver.get_lkg_download_info(&request).await? else {
            bail!("No LKG of {} satisfies {}:{}", request.source, request.part.build_context, request.part.part_name);
        };

        let outcome = ctx
            .download_executor()
            .download(&info, &self.dest)
            .await
            .with_context(|| format!("Failed to fetch {} {} into {}", info.name, info.version, self.dest.display()))?;

        match outcome {
            DownloadOutcome::UpToDate => {
                println!("{} {} {} already in {}", "Up to date".green(), info.name, info.version, self.dest.display());
            }
            DownloadOutcome::Downloaded => {
                println!("{} {} {} into {}", "Fetched".green().bold(), info.name, info.version, self.dest.display());
            }
        }
        Ok(())
    }
}
