//! `bblkg cache`: inspect and clear the BDF disk cache.

use super::common::load_settings;
use crate::bdf::BdfCache;
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::Path;

/// Manage the BDF cache.
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    command: CacheSubcommand,
}

#[derive(Debug, Subcommand)]
enum CacheSubcommand {
    /// List cached build descriptions and when they were last used
    Info,
    /// Remove every cached build description
    Clean,
}

impl CacheCommand {
    /// Runs the subcommand. The configuration file is optional here.
    ///
    /// # Errors
    ///
    /// Fails when the cache directory cannot be read or removed.
    pub async fn execute(self, config_path: &Path) -> Result<()> {
        let settings = load_settings(config_path).await?;
        let cache = BdfCache::new(&settings.cache_dir, None);

        match self.command {
            CacheSubcommand::Info => {
                let entries = cache.cached_entries()?;
                println!("{} {}", "BDF cache:".bold(), cache.dir().display());
                if entries.is_empty() {
                    println!("  (empty)");
                }
                let mut total = 0u64;
                for entry in &entries {
                    total += entry.size;
                    let last_used = entry
                        .last_used
                        .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
                    println!("  {:<48} {:>9}  {}", entry.file_name, entry.size, last_used);
                }
                println!("{} files, {} bytes", entries.len(), total);
            }
            CacheSubcommand::Clean => {
                let removed = cache.clear()?;
                println!("{} {} cached BDFs", "Removed".green(), removed);
            }
        }
        Ok(())
    }
}
