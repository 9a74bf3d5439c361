//! rsync daemon backend.
//!
//! Listings shell out to `rsync --list-only` and are cached per URL for the life of
//! the backend, since remote enumeration is the expensive part of a resolution.
//! Transfers use `rsync -a --delete`.

use super::template::{VersionPattern, join_address, resolve_address};
use super::{ArtifactBackend, CompletionState, ExistsProbe, completion_from_listing};
use crate::constants::STATIC_SUBDIR;
use crate::core::LkgError;
use crate::source::{LkgServer, ServerKind};
use crate::version::{Version, sort_descending};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// rsync exit code for "some files could not be transferred", which is what a
/// missing source path produces.
const RSYNC_PARTIAL_TRANSFER: i32 = 23;

/// Backend for [`ServerKind::Rsync`].
#[derive(Default)]
pub struct RsyncBackend {
    program: Option<PathBuf>,
    listings: DashMap<String, Arc<Option<Vec<String>>>>,
}

impl RsyncBackend {
    /// Uses the `rsync` found on `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: which::which("rsync").ok(),
            listings: DashMap::new(),
        }
    }

    fn program(&self) -> Result<&Path, LkgError> {
        self.program.as_deref().ok_or_else(|| LkgError::config("PATH", "rsync executable not found"))
    }

    /// Entry names under `url`, or `None` when the path does not exist.
    async fn list(&self, url: &str) -> Result<Arc<Option<Vec<String>>>, LkgError> {
        let key = url.to_lowercase();
        if let Some(cached) = self.listings.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let target = format!("{}/", url.trim_end_matches('/'));
        let output = Command::new(self.program()?)
            .arg("--list-only")
            .arg(&target)
            .output()
            .await
            .map_err(|e| LkgError::transport(format!("rsync --list-only {target}"), e))?;

        let listing = if output.status.success() {
            Some(parse_list_only(&String::from_utf8_lossy(&output.stdout)))
        } else if output.status.code() == Some(RSYNC_PARTIAL_TRANSFER) {
            None
        } else {
            return Err(LkgError::transport(
                format!("rsync --list-only {target}"),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        };

        debug!("rsync listing of {}: {:?}", target, listing.as_ref().map(Vec::len));
        let listing = Arc::new(listing);
        self.listings.insert(key, Arc::clone(&listing));
        Ok(listing)
    }

    async fn contains(&self, url: &str, entry: &str) -> Result<bool, LkgError> {
        let listing = self.list(url).await?;
        Ok(listing.as_deref().is_some_and(|names| names.iter().any(|n| n.eq_ignore_ascii_case(entry))))
    }
}

/// Extracts entry names from `rsync --list-only` output.
///
/// Each line is `<perms> <size> <date> <time> <name>`; the `.` entry is dropped.
fn parse_list_only(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut rest = line.trim_start();
            for _ in 0..4 {
                let end = rest.find(char::is_whitespace)?;
                rest = rest[end..].trim_start();
            }
            let name = rest.trim_end();
            (!name.is_empty() && name != ".").then(|| name.to_string())
        })
        .collect()
}

#[async_trait]
impl ArtifactBackend for RsyncBackend {
    fn kind(&self) -> ServerKind {
        ServerKind::Rsync
    }

    async fn list_versions(
        &self,
        server: &LkgServer,
        name: &str,
        platform: &str,
        _is_static: bool,
    ) -> Result<Vec<String>, LkgError> {
        let Some(pattern) = VersionPattern::from_template(&server.address, name, platform)? else {
            return Ok(Vec::new());
        };

        let listing = self.list(&pattern.listing_dir).await?;
        let mut versions: Vec<String> = listing
            .iter()
            .flatten()
            .filter_map(|entry| pattern.extract(entry))
            .filter(|v| Version::parse(v).is_ok())
            .map(str::to_string)
            .collect();
        sort_descending(&mut versions);
        Ok(versions)
    }

    async fn exists(&self, server: &LkgServer, probe: &ExistsProbe<'_>) -> Result<bool, LkgError> {
        let address = resolve_address(&server.address, probe.name, probe.platform, Some(probe.version))?;

        if !probe.is_static {
            return Ok(self.list(&address).await?.is_some());
        }

        // The static directory must be present before its contents are inspected.
        if !self.contains(&address, STATIC_SUBDIR).await? {
            debug!("No {} directory under {}", STATIC_SUBDIR, address);
            return Ok(false);
        }
        match probe.context_dir {
            Some(ctx) => self.contains(&join_address(&address, &[STATIC_SUBDIR]), ctx).await,
            None => Ok(true),
        }
    }

    async fn completion_state(
        &self,
        server: &LkgServer,
        name: &str,
        platform: &str,
        version: &str,
        is_product: bool,
    ) -> Result<CompletionState, LkgError> {
        let address = resolve_address(&server.address, name, platform, Some(version))?;
        let listing = self.list(&address).await?;
        Ok(completion_from_listing(listing.as_deref().unwrap_or_default(), platform, is_product))
    }

    async fn fetch(
        &self,
        _server: &LkgServer,
        address: &str,
        destination: &Path,
        _auth: Option<&str>,
    ) -> Result<(), LkgError> {
        tokio::fs::create_dir_all(destination).await?;
        let source = format!("{}/", address.trim_end_matches('/'));
        let output = Command::new(self.program()?)
            .arg("-a")
            .arg("--delete")
            .arg(&source)
            .arg(destination)
            .output()
            .await
            .map_err(|e| LkgError::transport(format!("rsync {source}"), e))?;

        if output.status.success() {
            return Ok(());
        }
        if output.status.code() == Some(RSYNC_PARTIAL_TRANSFER) {
            return Err(LkgError::NotFound {
                what: source,
            });
        }
        Err(LkgError::transport(format!("rsync {source}"), String::from_utf8_lossy(&output.stderr).trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_only() {
        let out = "\
drwxr-xr-x          4,096 2024/03/01 10:00:00 .
drwxr-xr-x          4,096 2024/03/01 10:00:00 1-0-0-1
drwxr-xr-x          4,096 2024/03/02 10:00:00 2-0-0-1
-rw-r--r--              0 2024/03/02 10:00:00 checkComplete.flag
";
        assert_eq!(parse_list_only(out), vec!["1-0-0-1", "2-0-0-1", "checkComplete.flag"]);
    }

    #[test]
    fn test_parse_list_only_names_with_spaces() {
        let out = "-rw-r--r--             12 2024/03/02 10:00:00 read me.txt\n";
        assert_eq!(parse_list_only(out), vec!["read me.txt"]);
    }

    #[test]
    fn test_parse_list_only_ignores_noise() {
        assert!(parse_list_only("\nreceiving file list\n").is_empty());
    }
}
