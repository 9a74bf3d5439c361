//! The BDF disk cache shared between build processes.

use bblkg_cli::bdf::{BdfCache, BdfServer, BdfStatus};
use bblkg_cli::core::LkgError;
use bblkg_cli::test_utils::{BdfFixture, FakeBdfServer};
use bblkg_cli::utils::RetryPolicy;
use bblkg_cli::version::Version;
use std::path::Path;
use std::sync::Arc;

fn v(text: &str) -> Version {
    Version::parse(text).unwrap()
}

fn cache(root: &Path, server: &Arc<FakeBdfServer>) -> BdfCache {
    let server: Arc<dyn BdfServer> = server.clone();
    BdfCache::new(root, Some(server)).with_retry(RetryPolicy::immediate(2))
}

fn server_with_product() -> Arc<FakeBdfServer> {
    let server = Arc::new(FakeBdfServer::new());
    server.add_bdf(BdfFixture::new("P", "1-0-0-4").built("P.PartFile.xml"));
    server.add_bdf(BdfFixture::new("P", "1-0-0-6").built("P.PartFile.xml"));
    server
}

#[tokio::test]
async fn test_second_process_reads_disk_copy() {
    let temp = tempfile::tempdir().unwrap();
    let server = server_with_product();

    let first = cache(temp.path(), &server).get_or_fetch("P", &v("1.0.0.4")).await.unwrap().unwrap();
    assert_eq!(first.status, BdfStatus::Server);

    let second = cache(temp.path(), &server).get_or_fetch("p", &v("1.0.0.4")).await.unwrap().unwrap();
    assert_eq!(second.status, BdfStatus::Disk);
    assert_eq!(second.bdf.version(), Version::new(1, 0, 0, 4));
    assert_eq!(server.fetch_count(), 1);
}

#[tokio::test]
async fn test_offline_server_uses_newest_local_match() {
    let temp = tempfile::tempdir().unwrap();
    let server = server_with_product();
    let online = cache(temp.path(), &server);
    online.get_or_fetch("P", &v("1.0.0.4")).await.unwrap();
    online.get_or_fetch("P", &v("1.0.0.6")).await.unwrap();

    server.set_offline(true);
    let offline = cache(temp.path(), &server);
    let found = offline.get_or_fetch("P", &v("1.*")).await.unwrap().unwrap();
    assert_eq!(found.status, BdfStatus::LocalFallback);
    assert_eq!(found.bdf.version(), Version::new(1, 0, 0, 6));

    let err = offline.get_or_fetch("P", &v("1.0.0.7")).await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_malformed_response_is_not_cached() {
    let temp = tempfile::tempdir().unwrap();
    let server = Arc::new(FakeBdfServer::new());
    server.add_raw("P", v("2.0.0.1"), "<BuildDescription Product=\"P\"");

    let bdfs = cache(temp.path(), &server);
    let err = bdfs.get_or_fetch("P", &v("2.0.0.1")).await.unwrap_err();
    assert!(matches!(err, LkgError::BdfParseError { .. }), "unexpected error: {err}");
    assert!(bdfs.local_versions("P").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_usage_is_tracked_until_cleared() {
    let temp = tempfile::tempdir().unwrap();
    let server = server_with_product();
    let bdfs = cache(temp.path(), &server);
    bdfs.get_or_fetch("P", &v("1.*")).await.unwrap();

    let entries = bdfs.cached_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].file_name.ends_with(".xml"));
    assert!(entries[0].last_used.is_some());

    assert_eq!(bdfs.clear().unwrap(), 1);
    assert!(!bdfs.dir().exists());
    assert!(bdfs.cached_entries().unwrap().is_empty());
}
