//! BBLKG CLI entry point
//!
//! Parses arguments, runs the command and renders failures through
//! [`user_friendly_error`].

use anyhow::Result;
use bblkg_cli::cli;
use bblkg_cli::core::user_friendly_error;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
