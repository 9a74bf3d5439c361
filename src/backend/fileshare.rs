//! File-share and local-directory backends.
//!
//! Both enumerate versions by listing the directory that holds the `$(version)`
//! component of the address. A file share is mirrored into the destination; a local
//! directory is linked into place.

use super::mirror::FileMirror;
use super::template::{VersionPattern, resolve_address};
use super::{ArtifactBackend, CompletionState, ExistsProbe, completion_from_listing, probe_target};
use crate::core::LkgError;
use crate::source::{LkgServer, ServerKind};
use crate::version::{Version, sort_descending};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Directory-listing backend for [`ServerKind::FileShare`] and [`ServerKind::Local`].
pub struct FileShareBackend {
    kind: ServerKind,
    mirror: Arc<dyn FileMirror>,
}

impl FileShareBackend {
    /// Backend that mirrors trees from a share.
    #[must_use]
    pub fn file_share(mirror: Arc<dyn FileMirror>) -> Self {
        Self {
            kind: ServerKind::FileShare,
            mirror,
        }
    }

    /// Backend that links local directories into place.
    #[must_use]
    pub fn local(mirror: Arc<dyn FileMirror>) -> Self {
        Self {
            kind: ServerKind::Local,
            mirror,
        }
    }
}

#[async_trait]
impl ArtifactBackend for FileShareBackend {
    fn kind(&self) -> ServerKind {
        self.kind
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

        let entries = self.mirror.list_dir(&pattern.listing_dir).await?;
        let mut versions: Vec<String> = entries
            .iter()
            .filter_map(|entry| pattern.extract(entry))
            .filter(|v| Version::parse(v).is_ok())
            .map(str::to_string)
            .collect();
        sort_descending(&mut versions);

        debug!("{} versions of {} under {}", versions.len(), name, pattern.listing_dir);
        Ok(versions)
    }

    async fn exists(&self, server: &LkgServer, probe: &ExistsProbe<'_>) -> Result<bool, LkgError> {
        let address = resolve_address(&server.address, probe.name, probe.platform, Some(probe.version))?;
        let target = probe_target(&address, probe);
        let found = self.mirror.exists(&target).await?;
        debug!("Exists {}: {}", target, found);
        Ok(found)
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
        let entries = self.mirror.list_dir(&address).await?;
        Ok(completion_from_listing(&entries, platform, is_product))
    }

    async fn fetch(
        &self,
        _server: &LkgServer,
        address: &str,
        destination: &Path,
        _auth: Option<&str>,
    ) -> Result<(), LkgError> {
        match self.kind {
            ServerKind::Local => self.mirror.link(address, destination).await,
            _ => self.mirror.mirror(address, destination).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalFileMirror;

    fn share_layout() -> (tempfile::TempDir, LkgServer) {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("winx64").join("Foo");
        for v in ["1-0-0-1", "1-0-0-2", "2-0-0-1", "notaversion"] {
            std::fs::create_dir_all(root.join(v)).unwrap();
        }
        std::fs::create_dir_all(root.join("1-0-0-2").join("static").join("Bar")).unwrap();
        let address = format!("{}/$(platform)/$(name)/$(version)", temp.path().display());
        (temp, LkgServer::new("share", ServerKind::FileShare, address))
    }

    #[tokio::test]
    async fn test_list_versions_newest_first() {
        let (_temp, server) = share_layout();
        let backend = FileShareBackend::file_share(Arc::new(LocalFileMirror));
        let versions = backend.list_versions(&server, "Foo", "winx64", false).await.unwrap();
        assert_eq!(versions, vec!["2-0-0-1", "1-0-0-2", "1-0-0-1"]);
    }

    #[tokio::test]
    async fn test_list_versions_skips_non_ascii_entries() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("F\u{e9}\u{e9}_old")).unwrap();
        std::fs::create_dir_all(temp.path().join("Foo_1-2-3-4")).unwrap();
        let address = format!("{}/$(name)_$(version)", temp.path().display());
        let server = LkgServer::new("share", ServerKind::FileShare, address);

        let backend = FileShareBackend::file_share(Arc::new(LocalFileMirror));
        let versions = backend.list_versions(&server, "Foo", "winx64", false).await.unwrap();
        assert_eq!(versions, vec!["1-2-3-4"]);
    }

    #[tokio::test]
    async fn test_unversioned_address_skips_listing() {
        let server = LkgServer::new("stream", ServerKind::FileShare, "/nowhere/$(name)");
        let backend = FileShareBackend::file_share(Arc::new(LocalFileMirror));
        assert!(backend.list_versions(&server, "Foo", "x", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exists_static_context() {
        let (_temp, server) = share_layout();
        let backend = FileShareBackend::file_share(Arc::new(LocalFileMirror));

        let mut probe = ExistsProbe::new("Foo", "winx64", "1-0-0-2");
        probe.is_static = true;
        probe.context_dir = Some("Bar");
        assert!(backend.exists(&server, &probe).await.unwrap());

        probe.version = "1-0-0-1";
        assert!(!backend.exists(&server, &probe).await.unwrap());
    }
}
