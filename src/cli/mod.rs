//! Command-line interface for BBLKG.
//!
//! # Commands
//!
//! - `resolve` - find the address and version that satisfy an LKG request
//! - `fetch` - resolve a request and download the artifact
//! - `pull` - lock sources to their newest build descriptions
//! - `cache` - inspect or clear the BDF disk cache
//!
//! Every command reads `lkg.toml` from the working directory unless `--config` names
//! another file. `cache` runs without one.
//!
//! # Logging
//!
//! Diagnostics go to stderr through `tracing`. `RUST_LOG` is honored unless
//! `--verbose` (debug) or `--quiet` (errors only) is given.

mod cache;
mod common;
mod fetch;
mod pull;
mod resolve;

#[cfg(test)]
mod tests;

pub use common::{LkgContext, RequestArgs};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Resolve and fetch last-known-good build dependencies.
#[derive(Parser)]
#[command(name = "bblkg", about, version, author)]
pub struct Cli {
    /// The subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the LKG configuration file
    #[arg(short, long, global = true, env = "BBLKG_CONFIG", default_value = "lkg.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an LKG request without downloading anything
    Resolve(resolve::ResolveCommand),

    /// Resolve an LKG request and download the artifact
    Fetch(fetch::FetchCommand),

    /// Lock sources to their last known good builds
    Pull(pull::PullCommand),

    /// Manage the BDF cache
    Cache(cache::CacheCommand),
}

/// Process-level settings derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter overriding `RUST_LOG`; `None` keeps the environment's
    pub log_level: Option<String>,
    /// Configuration file the commands read
    pub config_path: PathBuf,
}

impl CliConfig {
    /// Installs the global `tracing` subscriber.
    ///
    /// Does nothing if a subscriber is already set, so tests may call it freely.
    pub fn init_logging(&self) {
        let filter = match &self.log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

impl Cli {
    /// Runs the selected command.
    ///
    /// # Errors
    ///
    /// Returns whatever the command fails with; `main` turns it into a
    /// user-facing message.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translates the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };
        CliConfig {
            log_level,
            config_path: self.config.clone(),
        }
    }

    /// Runs the selected command with an explicit configuration.
    ///
    /// # Errors
    ///
    /// See [`Cli::execute`].
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();
        let path = config.config_path.as_path();

        match self.command {
            Commands::Resolve(cmd) => cmd.execute(path).await,
            Commands::Fetch(cmd) => cmd.execute(path).await,
            Commands::Pull(cmd) => cmd.execute(path).await,
            Commands::Cache(cmd) => cmd.execute(path).await,
        }
    }
}
