//! Configuration for the LKG resolution engine.
//!
//! Two layers feed the resolver:
//!
//! - [`LkgConfig`] - a TOML file (`lkg.toml`) declaring servers, sources, strategy
//!   tokens and the BDF server. It stands in for the build strategy loader and is
//!   turned into an [`LkgCatalog`] of ready-to-use [`LkgServer`](crate::source::LkgServer)
//!   and [`LkgSource`](crate::source::LkgSource) objects.
//! - [`Settings`] - process-wide knobs read from the environment (cache root, retry
//!   budget, authentication switches, per-source version overrides).
//!
//! # Example `lkg.toml`
//!
//! ```toml
//! bdf_server = "https://bdf.example.com/"
//!
//! [settings]
//! cache_dir = "~/.bblkg/cache"
//! retries = 5
//!
//! [servers.lkgshare]
//! kind = "fileshare"
//! address = '\\srv\lkgs\$(platform)\$(name)\$(version)'
//!
//! [sources.Foo]
//! prg_server = "lkgshare"
//! version = "1-2-3-4"
//! platforms = ["winx64"]
//! ```
//!
//! # Environment Variables
//!
//! | Variable                             | Effect                                         |
//! |--------------------------------------|------------------------------------------------|
//! | `BBLKG_CACHE_DIR`                    | cache root (default `~/.bblkg/cache`)          |
//! | `BB_LKG_RETRIES`                     | attempts per network operation (default 5)     |
//! | `BB_AZURE_PAT`                       | personal access token, first in the auth chain |
//! | `BB_USE_AZ_CLI_AUTH`                 | force Azure CLI authentication                  |
//! | `BB_NUGET_ALLOW_PRERELEASE_ANYWHERE` | do not reject pre-release packages             |
//! | `BB_LKGVERSION_<NAME>`               | version override for source `<NAME>`           |

mod lkg;
mod settings;

pub use lkg::{LkgCatalog, LkgConfig, ServerConfig, SettingsConfig, SourceConfig};
pub use settings::{Settings, version_override_key};

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "BBLKG_CACHE_DIR";

/// Returns the cache root, creating it if needed.
///
/// `BBLKG_CACHE_DIR` wins (with `~` expanded); otherwise `%LOCALAPPDATA%\bblkg\cache`
/// on Windows and `~/.bblkg/cache` elsewhere.
///
/// # Errors
///
/// Fails when no home directory can be determined or the directory cannot be created.
pub fn get_cache_dir() -> Result<PathBuf> {
    let cache_dir = if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        expand_path(&dir)
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
            .join("bblkg")
            .join("cache")
    } else {
        dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
            .join(".bblkg")
            .join("cache")
    };

    if !cache_dir.exists() {
        std::fs::create_dir_all(&cache_dir).with_context(|| {
            format!("Failed to create cache directory {}", cache_dir.display())
        })?;
    }

    Ok(cache_dir)
}

/// Expands `~` and environment references in a configured path.
pub(crate) fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}
