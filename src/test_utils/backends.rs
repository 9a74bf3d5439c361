//! Scripted backends and an in-memory file tree.

use crate::backend::template::resolve_address;
use crate::backend::{ArtifactBackend, CompletionState, ExistsProbe, FileMirror, completion_from_listing, probe_target};
use crate::core::LkgError;
use crate::source::{LkgServer, ServerKind};
use crate::version::sort_descending;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Name of the marker file [`ScriptedBackend::fetch`] writes into the destination.
pub const PAYLOAD_FILE: &str = "payload.txt";

/// An [`ArtifactBackend`] whose contents are scripted by the test.
///
/// Addresses are compared case-insensitively after template substitution, so
/// tests script the same strings the real backends would probe.
#[derive(Debug)]
pub struct ScriptedBackend {
    kind: ServerKind,
    versions: DashMap<String, Vec<String>>,
    present: DashSet<String>,
    listings: DashMap<String, Vec<String>>,
    payloads: DashMap<String, Vec<(String, String)>>,
    probes: Mutex<Vec<String>>,
    fetches: AtomicUsize,
    transient_failures: AtomicU32,
    fetch_delay: Duration,
}

impl ScriptedBackend {
    /// An empty backend serving `kind`.
    pub fn new(kind: ServerKind) -> Self {
        Self {
            kind,
            versions: DashMap::new(),
            present: DashSet::new(),
            listings: DashMap::new(),
            payloads: DashMap::new(),
            probes: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            transient_failures: AtomicU32::new(0),
            fetch_delay: Duration::ZERO,
        }
    }

    /// Makes every fetch take at least `delay`.
    #[must_use]
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    /// Lists `version` for `name`.
    pub fn add_version(&self, name: &str, version: &str) {
        self.versions.entry(name.to_lowercase()).or_default().push(version.to_string());
    }

    /// Makes `address` exist.
    pub fn add_artifact(&self, address: &str) {
        self.present.insert(address.to_lowercase());
    }

    /// Sets the entries of the version directory at `address` (completion flags).
    pub fn set_listing(&self, address: &str, entries: &[&str]) {
        self.listings.insert(address.to_lowercase(), entries.iter().map(|e| (*e).to_string()).collect());
    }

    /// Extra files [`fetch`](ArtifactBackend::fetch) writes for `address`.
    pub fn add_payload_file(&self, address: &str, file_name: &str, content: &str) {
        self.payloads
            .entry(address.to_lowercase())
            .or_default()
            .push((file_name.to_string(), content.to_string()));
    }

    /// The next `count` fetches fail with a transport error.
    pub fn fail_next_fetches(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    /// Every existence target probed so far, in order.
    pub fn probes(&self) -> Vec<String> {
        self.probes.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Number of fetch attempts, failed ones included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactBackend for ScriptedBackend {
    fn kind(&self) -> ServerKind {
        self.kind
    }

    async fn list_versions(
        &self,
        _server: &LkgServer,
        name: &str,
        _platform: &str,
        _is_static: bool,
    ) -> Result<Vec<String>, LkgError> {
        let mut versions = self.versions.get(&name.to_lowercase()).map(|v| v.clone()).unwrap_or_default();
        sort_descending(&mut versions);
        Ok(versions)
    }

    async fn exists(&self, server: &LkgServer, probe: &ExistsProbe<'_>) -> Result<bool, LkgError> {
        let address = resolve_address(&server.address, probe.name, probe.platform, Some(probe.version))?;
        let target = probe_target(&address, probe);
        if let Ok(mut probes) = self.probes.lock() {
            probes.push(target.clone());
        }
        Ok(self.present.contains(&target.to_lowercase()))
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
        Ok(self
            .listings
            .get(&address.to_lowercase())
            .map_or(CompletionState::NoConvention, |entries| completion_from_listing(&entries, platform, is_product)))
    }

    async fn fetch(
        &self,
        _server: &LkgServer,
        address: &str,
        destination: &Path,
        _auth: Option<&str>,
    ) -> Result<(), LkgError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(LkgError::transport(format!("fetch {address}"), "connection reset"));
        }
        if !self.present.contains(&address.to_lowercase()) {
            return Err(LkgError::NotFound {
                what: address.to_string(),
            });
        }

        tokio::fs::create_dir_all(destination).await?;
        tokio::fs::write(destination.join(PAYLOAD_FILE), address).await?;
        let extra = self.payloads.get(&address.to_lowercase()).map(|p| p.clone()).unwrap_or_default();
        for (file_name, content) in extra {
            tokio::fs::write(destination.join(file_name), content).await?;
        }
        Ok(())
    }
}

/// A [`FileMirror`] over an in-memory set of paths.
///
/// Paths use `/` or `\` interchangeably and compare case-insensitively; adding a
/// file implies its parent directories.
#[derive(Debug, Default)]
pub struct MemoryFileMirror {
    files: DashMap<String, (String, String)>,
    dirs: DashMap<String, String>,
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_end_matches('/').to_lowercase()
}

fn last_component(path: &str) -> &str {
    path.trim_end_matches(['/', '\\']).rsplit(['/', '\\']).next().unwrap_or(path)
}

impl MemoryFileMirror {
    /// An empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    fn add_parents(&self, path: &str) {
        let mut current = path.trim_end_matches(['/', '\\']);
        while let Some((head, _)) = current.rsplit_once(['/', '\\']) {
            if head.is_empty() || head.chars().all(|c| c == '/' || c == '\\') {
                break;
            }
            self.dirs.entry(normalize(head)).or_insert_with(|| head.to_string());
            current = head;
        }
    }

    /// Adds a file with `content` and all of its parent directories.
    pub fn add_file(&self, path: &str, content: &str) {
        self.add_parents(path);
        self.files.insert(normalize(path), (path.to_string(), content.to_string()));
    }

    /// Adds an empty directory and its parents.
    pub fn add_dir(&self, path: &str) {
        self.add_parents(path);
        self.dirs.insert(normalize(path), path.to_string());
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", normalize(dir));
        let is_direct = |key: &str| key.strip_prefix(&prefix).is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
        let mut out: Vec<String> = self
            .dirs
            .iter()
            .filter(|d| is_direct(d.key()))
            .map(|d| last_component(d.value()).to_string())
            .collect();
        out.extend(self.files.iter().filter(|f| is_direct(f.key())).map(|f| last_component(&f.value().0).to_string()));
        out.sort();
        out
    }
}

#[async_trait]
impl FileMirror for MemoryFileMirror {
    async fn list_dir(&self, path: &str) -> Result<Vec<String>, LkgError> {
        Ok(self.children(path))
    }

    async fn exists(&self, path: &str) -> Result<bool, LkgError> {
        let key = normalize(path);
        Ok(self.dirs.contains_key(&key) || self.files.contains_key(&key))
    }

    async fn mirror(&self, from: &str, to: &Path) -> Result<(), LkgError> {
        let root = normalize(from);
        if !self.dirs.contains_key(&root) {
            return Err(LkgError::NotFound {
                what: from.to_string(),
            });
        }
        if tokio::fs::try_exists(to).await? {
            tokio::fs::remove_dir_all(to).await?;
        }
        tokio::fs::create_dir_all(to).await?;

        let skip = from.trim_end_matches(['/', '\\']).len() + 1;
        let copies: Vec<(String, String)> = self
            .files
            .iter()
            .filter(|f| f.key().starts_with(&format!("{root}/")))
            .map(|f| {
                let (original, content) = f.value();
                (original[skip..].replace('\\', "/"), content.clone())
            })
            .collect();
        for (relative, content) in copies {
            let target = to.join(relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(target, content).await?;
        }
        Ok(())
    }

    async fn link(&self, from: &str, to: &Path) -> Result<(), LkgError> {
        self.mirror(from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_mirror_lists_children() {
        let mirror = MemoryFileMirror::new();
        mirror.add_file(r"\\srv\lkgs\Foo\1-0-0-2\bin\a.dll", "a");
        mirror.add_dir(r"\\srv\lkgs\Foo\1-0-0-3");

        let versions = mirror.list_dir(r"\\srv\lkgs\Foo").await.unwrap();
        assert_eq!(versions, vec!["1-0-0-2", "1-0-0-3"]);
        assert!(mirror.exists(r"\\srv\lkgs\foo\1-0-0-2\BIN").await.unwrap());
        assert!(!mirror.exists(r"\\srv\lkgs\Foo\1-0-0-4").await.unwrap());

        let temp = tempfile::tempdir().unwrap();
        mirror.mirror(r"\\srv\lkgs\Foo\1-0-0-2", &temp.path().join("out")).await.unwrap();
        assert!(temp.path().join("out/bin/a.dll").exists());
    }
}
