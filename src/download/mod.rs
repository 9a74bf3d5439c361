//! Fetching resolved artifacts into place.
//!
//! A download is skipped when the destination's provenance already names the
//! same address. Concurrent downloads of one address are serialized: the first
//! caller fetches, later callers re-check provenance once they get the gate and
//! usually find the work done. Gates are keyed by the exact address and dropped
//! once nobody waits on them.
//!
//! The old provenance record is removed before fetching and the new one is
//! written only after the backend reports success, so an interrupted fetch never
//! leaves a tree that claims to be current.

use crate::backend::BackendRegistry;
use crate::backend::nuget::{DEFAULT_TARGET_FRAMEWORK, Nuspec};
use crate::core::LkgError;
use crate::provenance::{NuGetProvenance, NuGetRecord, ProvenanceRecord, is_up_to_date, provenance_path};
use crate::resolver::LkgDownloadInfo;
use crate::source::ServerKind;
use crate::utils::RetryPolicy;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What [`DownloadExecutor::download`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The destination already held this artifact
    UpToDate,
    /// The artifact was fetched
    Downloaded,
}

/// Runs backend fetches with retries, provenance bookkeeping and per-address
/// serialization.
#[derive(Debug)]
pub struct DownloadExecutor {
    backends: BackendRegistry,
    retry: RetryPolicy,
    gates: DashMap<String, Arc<Mutex<()>>>,
}

impl DownloadExecutor {
    /// Creates an executor over `backends`.
    #[must_use]
    pub fn new(backends: BackendRegistry, retry: RetryPolicy) -> Self {
        Self {
            backends,
            retry,
            gates: DashMap::new(),
        }
    }

    fn gate(&self, address: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.entry(address.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).value())
    }

    /// Drops the gate for `address` unless another download still holds it.
    fn release_gate(&self, address: &str) {
        self.gates.remove_if(address, |_, gate| Arc::strong_count(gate) == 1);
    }

    /// Makes `destination` hold the artifact described by `info`.
    ///
    /// # Errors
    ///
    /// [`LkgError::BuildError`] when transient failures outlast the retry budget,
    /// [`LkgError::ProvenanceCorrupt`] when an existing record is damaged, and any
    /// non-retryable backend error unchanged.
    pub async fn download(&self, info: &LkgDownloadInfo, destination: &Path) -> Result<DownloadOutcome, LkgError> {
        if is_up_to_date(&info.address, destination).await? {
            debug!("{} {} already in {}", info.name, info.version_text, destination.display());
            return Ok(DownloadOutcome::UpToDate);
        }

        let gate = self.gate(&info.address);
        let result = {
            let _held = gate.lock().await;
            self.download_gated(info, destination).await
        };
        drop(gate);
        self.release_gate(&info.address);
        result
    }

    async fn download_gated(&self, info: &LkgDownloadInfo, destination: &Path) -> Result<DownloadOutcome, LkgError> {
        if is_up_to_date(&info.address, destination).await? {
            debug!("{} {} arrived in {} while waiting", info.name, info.version_text, destination.display());
            return Ok(DownloadOutcome::UpToDate);
        }

        let record_path = provenance_path(destination);
        match tokio::fs::remove_file(&record_path).await {
            Ok(()) => debug!("Removed stale provenance {}", record_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let backend = self.backends.get(info.server_kind)?;
        let auth = self.backends.auth_header(&info.server).await?;
        let what = format!("download {} {} from {}", info.name, info.version_text, info.address);
        info!("Downloading {} {} to {}", info.name, info.version_text, destination.display());

        let fetched = self
            .retry
            .run(&what, || backend.fetch(&info.server, &info.address, destination, auth.as_deref()))
            .await;
        match fetched {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                return Err(LkgError::BuildError {
                    name: info.name.clone(),
                    reason: format!("{what} failed after {} attempts: {e}", self.retry.attempts),
                });
            }
            Err(e) => return Err(e),
        }

        ProvenanceRecord {
            name: info.name.clone(),
            version: info.version.string_for_filename(),
            server_kind: info.server_kind,
            url: info.address.clone(),
        }
        .write(&record_path)
        .await?;

        if info.server_kind == ServerKind::NuGet {
            write_nuget_provenance(info, destination).await?;
        }
        Ok(DownloadOutcome::Downloaded)
    }

    /// Downloads several artifacts concurrently; fails on the first error.
    ///
    /// # Errors
    ///
    /// See [`DownloadExecutor::download`].
    pub async fn download_all(
        &self,
        jobs: &[(LkgDownloadInfo, PathBuf)],
    ) -> Result<Vec<DownloadOutcome>, LkgError> {
        futures::future::try_join_all(jobs.iter().map(|(info, dest)| self.download(info, dest))).await
    }
}

/// Records the package and its declared dependencies next to `destination`.
async fn write_nuget_provenance(info: &LkgDownloadInfo, destination: &Path) -> Result<(), LkgError> {
    let nuspec = match Nuspec::read_from_dir(destination, &info.name).await {
        Ok(nuspec) => nuspec,
        Err(e) if e.is_not_found() => {
            warn!("{} {} has no nuspec, skipping package provenance", info.name, info.version_text);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let record = |name: String, version: String, framework: String| NuGetRecord {
        name,
        version,
        server_address: info.server.address.clone(),
        target_framework: framework,
    };
    let provenance = NuGetProvenance {
        dependencies: nuspec
            .dependencies(DEFAULT_TARGET_FRAMEWORK)
            .into_iter()
            .map(|(dep, framework)| record(dep.id, dep.version, framework))
            .collect(),
        package: record(
            nuspec.metadata.id,
            nuspec.metadata.version,
            DEFAULT_TARGET_FRAMEWORK.to_string(),
        ),
    };
    provenance.write(&destination.with_file_name(NuGetProvenance::file_name(&info.name))).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::LkgServer;
    use crate::test_utils::ScriptedBackend;
    use crate::version::Version;
    use std::time::Duration;

    const ADDRESS: &str = "/lkgs/Foo/1-0-0-3";

    fn info(kind: ServerKind) -> LkgDownloadInfo {
        LkgDownloadInfo {
            name: "Foo".into(),
            platform: "winx64".into(),
            is_static: false,
            address: ADDRESS.into(),
            version: Version::new(1, 0, 0, 3),
            version_text: "1-0-0-3".into(),
            server_kind: kind,
            server_url: ADDRESS.into(),
            server: LkgServer::new("share", kind, "/lkgs/$(name)/$(version)"),
        }
    }

    fn executor(backend: Arc<ScriptedBackend>, attempts: u32) -> DownloadExecutor {
        DownloadExecutor::new(BackendRegistry::new().with_backend(backend), RetryPolicy::immediate(attempts))
    }

    #[tokio::test]
    async fn test_download_writes_provenance_then_skips() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("Foo");
        let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare));
        backend.add_artifact(ADDRESS);
        let exec = executor(backend.clone(), 1);

        assert_eq!(exec.download(&info(ServerKind::FileShare), &dest).await.unwrap(), DownloadOutcome::Downloaded);
        let record = ProvenanceRecord::read(&provenance_path(&dest)).await.unwrap().unwrap();
        assert_eq!(record.url, ADDRESS);
        assert_eq!(record.version, "1-0-0-3");

        assert_eq!(exec.download(&info(ServerKind::FileShare), &dest).await.unwrap(), DownloadOutcome::UpToDate);
        assert_eq!(backend.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_downloads_fetch_once() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("Foo");
        let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare).with_fetch_delay(Duration::from_millis(50)));
        backend.add_artifact(ADDRESS);
        let exec = executor(backend.clone(), 1);
        let info = info(ServerKind::FileShare);

        let (a, b) = tokio::join!(exec.download(&info, &dest), exec.download(&info, &dest));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o == DownloadOutcome::UpToDate);
        assert_eq!(outcomes, vec![DownloadOutcome::Downloaded, DownloadOutcome::UpToDate]);
        assert_eq!(backend.fetch_count(), 1);
        assert!(exec.gates.is_empty());
    }

    #[test]
    fn test_gates_keyed_by_exact_address() {
        let exec = executor(Arc::new(ScriptedBackend::new(ServerKind::FileShare)), 1);
        let upper = exec.gate("/lkgs/Foo/1-0-0-3");
        let lower = exec.gate("/lkgs/foo/1-0-0-3");
        assert!(!Arc::ptr_eq(&upper, &lower));
        assert!(Arc::ptr_eq(&upper, &exec.gate("/lkgs/Foo/1-0-0-3")));

        drop(lower);
        exec.release_gate("/lkgs/foo/1-0-0-3");
        exec.release_gate("/lkgs/Foo/1-0-0-3");
        assert_eq!(exec.gates.len(), 1);
        drop(upper);
        exec.release_gate("/lkgs/Foo/1-0-0-3");
        assert!(exec.gates.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let temp = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare));
        backend.add_artifact(ADDRESS);
        backend.fail_next_fetches(1);
        let exec = executor(backend.clone(), 3);

        let outcome = exec.download(&info(ServerKind::FileShare), &temp.path().join("Foo")).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded);
        assert_eq!(backend.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_no_provenance() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("Foo");
        let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare));
        backend.add_artifact(ADDRESS);
        backend.fail_next_fetches(5);
        let exec = executor(backend.clone(), 2);

        let err = exec.download(&info(ServerKind::FileShare), &dest).await.unwrap_err();
        assert!(matches!(err, LkgError::BuildError { .. }));
        assert_eq!(backend.fetch_count(), 2);
        assert!(!provenance_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_stale_provenance_removed_before_fetch() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("Foo");
        ProvenanceRecord {
            name: "Foo".into(),
            version: "1-0-0-2".into(),
            server_kind: ServerKind::FileShare,
            url: "/lkgs/Foo/1-0-0-2".into(),
        }
        .write(&provenance_path(&dest))
        .await
        .unwrap();

        // Not present on the backend: the fetch fails without retries.
        let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare));
        let err = executor(backend, 3).download(&info(ServerKind::FileShare), &dest).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!provenance_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_corrupt_provenance_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("Foo");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(provenance_path(&dest), r#"<Provenance><LKG LKGSourceName="Foo"/></Provenance>"#).unwrap();

        let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare));
        let err = executor(backend, 1).download(&info(ServerKind::FileShare), &dest).await.unwrap_err();
        assert!(matches!(err, LkgError::ProvenanceCorrupt { .. }));
    }

    #[tokio::test]
    async fn test_nuget_package_provenance() {
        let temp = tempfile::tempdir().unwrap();
        let dest = temp.path().join("Foo");
        let backend = Arc::new(ScriptedBackend::new(ServerKind::NuGet));
        backend.add_artifact(ADDRESS);
        backend.add_payload_file(
            ADDRESS,
            "Foo.nuspec",
            r#"<package><metadata><id>Foo</id><version>1.0.0.3</version>
<dependencies><group targetFramework="net6.0"><dependency id="Bar" version="[2.0,3.0)"/></group></dependencies>
</metadata></package>"#,
        );

        executor(backend, 1).download(&info(ServerKind::NuGet), &dest).await.unwrap();
        let prov = NuGetProvenance::read(&temp.path().join("Foo.provenance.txt")).await.unwrap().unwrap();
        assert_eq!(prov.package.version, "1.0.0.3");
        assert_eq!(prov.dependencies.len(), 1);
        assert_eq!(prov.dependencies[0].name, "Bar");
        assert_eq!(prov.dependencies[0].target_framework, "net6.0");
    }
}
