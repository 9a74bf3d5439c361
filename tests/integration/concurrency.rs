//! Parallel resolutions and downloads sharing one resolver.

use crate::common::LkgHarness;
use bblkg_cli::backend::BackendRegistry;
use bblkg_cli::download::{DownloadExecutor, DownloadOutcome};
use bblkg_cli::resolver::LkgRequest;
use bblkg_cli::source::{LkgServer, LkgSource, ServerKind};
use bblkg_cli::test_utils::ScriptedBackend;
use bblkg_cli::utils::RetryPolicy;
use bblkg_cli::version::Version;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

const SHARE: &str = r"\\srv\lkgs\$(platform)\$(name)\$(version)";

fn harness(backend: &Arc<ScriptedBackend>, sources: Vec<LkgSource>) -> LkgHarness {
    LkgHarness::new(
        vec![LkgServer::new("lkgshare", ServerKind::FileShare, SHARE)],
        sources,
        BackendRegistry::new().with_backend(backend.clone()),
    )
}

fn wildcard(name: &str) -> LkgSource {
    LkgSource::new(name, "lkgshare").with_version(Version::parse("*").unwrap())
}

#[tokio::test]
async fn test_parallel_requests_download_once() {
    let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare).with_fetch_delay(Duration::from_millis(100)));
    backend.add_version("Foo", "1-0-0-4");
    backend.add_artifact(r"\\srv\lkgs\winx64\Foo\1-0-0-4");
    let h = harness(&backend, vec![wildcard("Foo")]);
    let executor = DownloadExecutor::new(h.backends.clone(), RetryPolicy::immediate(1));
    let dest = h.work_dir.join("Foo");

    let fetch = |part: &'static str| {
        let request = LkgRequest::new("Foo", "winx64", "Foo.PartFile.xml", part);
        let (resolver, executor, dest) = (&h.resolver, &executor, &dest);
        async move {
            let info = resolver.get_lkg_download_info(&request).await.unwrap().unwrap();
            executor.download(&info, dest).await.unwrap()
        }
    };
    let outcomes = join_all(["A", "B", "C", "D"].map(fetch)).await;

    assert_eq!(backend.fetch_count(), 1);
    assert_eq!(outcomes.iter().filter(|o| **o == DownloadOutcome::Downloaded).count(), 1);
    assert!(dest.join(bblkg_cli::test_utils::backends::PAYLOAD_FILE).exists());
}

#[tokio::test]
async fn test_source_version_locks_on_first_resolution() {
    let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare));
    backend.add_version("Foo", "1-0-0-4");
    backend.add_artifact(r"\\srv\lkgs\winx64\Foo\1-0-0-4");
    backend.add_artifact(r"\\srv\lkgs\winx64\Foo\1-0-0-5");
    let h = harness(&backend, vec![wildcard("Foo")]);

    let requests: Vec<LkgRequest> =
        (0..8).map(|i| LkgRequest::new("Foo", "winx64", "Foo.PartFile.xml", format!("Part{i}"))).collect();
    let results = join_all(requests.iter().map(|r| h.resolver.get_lkg_download_info(r))).await;
    for result in results {
        assert_eq!(result.unwrap().unwrap().version, Version::new(1, 0, 0, 4));
    }

    backend.add_version("Foo", "1-0-0-5");
    let later = LkgRequest::new("Foo", "winx64", "Foo.PartFile.xml", "Late");
    let info = h.resolver.get_lkg_download_info(&later).await.unwrap().unwrap();
    assert_eq!(info.version, Version::new(1, 0, 0, 4));
}

#[tokio::test]
async fn test_failed_dependency_does_not_block_others() {
    let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare));
    backend.add_version("Foo", "1-0-0-4");
    backend.add_artifact(r"\\srv\lkgs\winx64\Foo\1-0-0-4");
    backend.add_version("Gone", "2-0-0-1");
    let h = harness(&backend, vec![wildcard("Foo"), wildcard("Gone")]);
    let executor = DownloadExecutor::new(h.backends.clone(), RetryPolicy::immediate(1));

    let gone = LkgRequest::new("Gone", "winx64", "Gone.PartFile.xml", "GonePart");
    let foo = LkgRequest::new("Foo", "winx64", "Foo.PartFile.xml", "FooPart");
    let (gone, foo) = tokio::join!(h.resolver.get_lkg_download_info(&gone), h.resolver.get_lkg_download_info(&foo));

    assert!(gone.unwrap().is_none());
    let info = foo.unwrap().unwrap();
    let dest = h.work_dir.join("Foo");
    assert_eq!(executor.download(&info, &dest).await.unwrap(), DownloadOutcome::Downloaded);
}
