//! Resolution walkthroughs from a source declaration to a fetched directory.

use crate::common::LkgHarness;
use bblkg_cli::backend::{BackendRegistry, FileShareBackend};
use bblkg_cli::constants::LKG_PROVENANCE_FILE;
use bblkg_cli::download::{DownloadExecutor, DownloadOutcome};
use bblkg_cli::resolver::LkgRequest;
use bblkg_cli::source::{LkgServer, LkgSource, ServerKind};
use bblkg_cli::test_utils::{BdfFixture, MemoryFileMirror, ScriptedBackend};
use bblkg_cli::utils::RetryPolicy;
use bblkg_cli::version::Version;
use std::sync::Arc;

const SHARE: &str = r"\\srv\lkgs\$(platform)\$(name)\$(version)";
const SUB_SHARE: &str = r"\\srv2\$(name)\$(version)";

fn v(text: &str) -> Version {
    Version::parse(text).unwrap()
}

fn share() -> LkgServer {
    LkgServer::new("lkgshare", ServerKind::FileShare, SHARE)
}

fn mirrored(mirror: &Arc<MemoryFileMirror>) -> BackendRegistry {
    BackendRegistry::new().with_backend(Arc::new(FileShareBackend::file_share(mirror.clone())))
}

#[tokio::test]
async fn test_pinned_static_context_resolves_and_fetches() {
    let mirror = Arc::new(MemoryFileMirror::new());
    mirror.add_file(r"\\srv\lkgs\winx64\Foo\1-2-3-4\static\Bar\Bar.dll", "bar");
    mirror.add_file(r"\\srv\lkgs\winx64\Foo\1-2-3-4\Foo.dll", "foo");
    let h = LkgHarness::new(
        vec![share()],
        vec![LkgSource::new("Foo", "lkgshare").with_version(v("1.2.3.4"))],
        mirrored(&mirror),
    );

    let request = LkgRequest::new("Foo", "winx64", "Bar.PartFile.xml", "BarPart").with_static_context("Bar");
    let info = h.resolver.get_lkg_download_info(&request).await.unwrap().unwrap();
    assert_eq!(info.address, r"\\srv\lkgs\winx64\Foo\1-2-3-4");
    assert_eq!(info.version_text, "1-2-3-4");
    assert!(info.is_static);

    let dest = h.work_dir.join("Foo");
    let executor = DownloadExecutor::new(h.backends.clone(), RetryPolicy::immediate(1));
    assert_eq!(executor.download(&info, &dest).await.unwrap(), DownloadOutcome::Downloaded);
    assert_eq!(std::fs::read_to_string(dest.join("static/Bar/Bar.dll")).unwrap(), "bar");
    assert!(dest.join(LKG_PROVENANCE_FILE).exists());

    assert_eq!(executor.download(&info, &dest).await.unwrap(), DownloadOutcome::UpToDate);
}

#[tokio::test]
async fn test_pinned_static_context_missing_on_share() {
    let mirror = Arc::new(MemoryFileMirror::new());
    mirror.add_file(r"\\srv\lkgs\winx64\Foo\1-2-3-4\Foo.dll", "foo");
    let h = LkgHarness::new(
        vec![share()],
        vec![LkgSource::new("Foo", "lkgshare").with_version(v("1.2.3.4"))],
        mirrored(&mirror),
    );

    let request = LkgRequest::new("Foo", "winx64", "Bar.PartFile.xml", "BarPart").with_static_context("Bar");
    assert!(h.resolver.get_lkg_download_info(&request).await.unwrap().is_none());
}

#[tokio::test]
async fn test_wildcard_picks_newest_listed_version() {
    let mirror = Arc::new(MemoryFileMirror::new());
    for version in ["1-0-0-1", "1-0-0-2", "2-0-0-1"] {
        mirror.add_file(&format!(r"\\srv\lkgs\winx64\Foo\{version}\Foo.dll"), version);
    }
    let h = LkgHarness::new(
        vec![share()],
        vec![LkgSource::new("Foo", "lkgshare").with_version(v("*"))],
        mirrored(&mirror),
    );

    let request = LkgRequest::new("Foo", "winx64", "Foo.PartFile.xml", "FooPart");
    let info = h.resolver.get_lkg_download_info(&request).await.unwrap().unwrap();
    assert_eq!(info.version, Version::new(2, 0, 0, 1));
    assert_eq!(info.address, r"\\srv\lkgs\winx64\Foo\2-0-0-1");

    let source = h.resolver.catalog().source("Foo").unwrap();
    assert_eq!(source.current_version().await, Version::new(2, 0, 0, 1));
}

#[tokio::test]
async fn test_wildcard_skips_version_without_platform_flag() {
    let mirror = Arc::new(MemoryFileMirror::new());
    for version in ["1-0-0-1", "1-0-0-2", "2-0-0-1"] {
        mirror.add_file(&format!(r"\\srv\lkgs\winx64\Foo\{version}\Foo.dll"), version);
    }
    mirror.add_file(r"\\srv\lkgs\winx64\Foo\2-0-0-1\checkComplete.flag", "");
    mirror.add_file(r"\\srv\lkgs\winx64\Foo\2-0-0-1\linuxx64.Product.complete.flag", "");
    let h = LkgHarness::new(
        vec![share()],
        vec![LkgSource::new("Foo", "lkgshare").with_version(v("*"))],
        mirrored(&mirror),
    );

    let request = LkgRequest::new("Foo", "winx64", "Foo.PartFile.xml", "FooPart").product(true);
    let info = h.resolver.get_lkg_download_info(&request).await.unwrap().unwrap();
    assert_eq!(info.version, Version::new(1, 0, 0, 2));
}

fn legacy_product_bdf() -> BdfFixture {
    BdfFixture::new("P", "1-0-0-5")
        .map("Bar.PartFile.xml:BarPart", "Bar", "BarOutputDir")
        .source("Bar", "1-0-0-3", ServerKind::FileShare, SUB_SHARE)
}

fn legacy_harness() -> (LkgHarness, Arc<ScriptedBackend>) {
    let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare));
    let h = LkgHarness::new(
        vec![share()],
        vec![LkgSource::new("P", "lkgshare").with_version(v("1.0.0.5"))],
        BackendRegistry::new().with_backend(backend.clone()),
    );
    h.bdf_server.add_bdf(legacy_product_bdf());
    h.bdf_server.add_bdf(BdfFixture::new("Bar", "1-0-0-3").built("Bar.PartFile.xml"));
    backend.add_artifact(r"\\srv2\Bar\1-0-0-3");
    (h, backend)
}

#[tokio::test]
async fn test_legacy_bdf_checks_product_before_lkg_map() {
    let (h, backend) = legacy_harness();
    backend.add_artifact(r"\\srv\lkgs\winx64\P\1-0-0-5");

    let request = LkgRequest::new("P", "winx64", "Bar.PartFile.xml", "BarPart");
    let info = h.resolver.get_lkg_download_info(&request).await.unwrap().unwrap();

    assert_eq!(info.name, "P");
    assert_eq!(info.address, r"\\srv\lkgs\winx64\P\1-0-0-5");
    assert_eq!(backend.probes(), vec![r"\\srv\lkgs\winx64\P\1-0-0-5".to_string()]);
}

#[tokio::test]
async fn test_legacy_bdf_falls_through_to_lkg_map() {
    let (h, backend) = legacy_harness();

    let request = LkgRequest::new("P", "winx64", "Bar.PartFile.xml", "BarPart");
    let info = h.resolver.get_lkg_download_info(&request).await.unwrap().unwrap();

    assert_eq!(info.name, "Bar");
    assert_eq!(info.version, Version::new(1, 0, 0, 3));
    assert_eq!(info.address, r"\\srv2\Bar\1-0-0-3");
    let probes = backend.probes();
    assert_eq!(probes.first().map(String::as_str), Some(r"\\srv\lkgs\winx64\P\1-0-0-5"));
    assert_eq!(probes.last().map(String::as_str), Some(r"\\srv2\Bar\1-0-0-3"));
}

#[tokio::test]
async fn test_exact_map_entry_beats_wildcard() {
    let backend = Arc::new(ScriptedBackend::new(ServerKind::FileShare));
    let h = LkgHarness::new(
        vec![share()],
        vec![LkgSource::new("P", "lkgshare").with_version(v("1.0.0.5"))],
        BackendRegistry::new().with_backend(backend.clone()),
    );
    h.bdf_server.add_bdf(
        BdfFixture::new("P", "1-0-0-5")
            .built("P.PartFile.xml")
            .map("*:BarPart", "Baz", "BazOut")
            .map("Bar.PartFile.xml:BarPart", "Bar", "BarOut")
            .source("Bar", "1-0-0-3", ServerKind::FileShare, SUB_SHARE)
            .source("Baz", "4-0-0-1", ServerKind::FileShare, SUB_SHARE),
    );
    h.bdf_server.add_bdf(BdfFixture::new("Bar", "1-0-0-3").built("Bar.PartFile.xml"));
    h.bdf_server.add_bdf(BdfFixture::new("Baz", "4-0-0-1").built("Bar.PartFile.xml"));
    backend.add_artifact(r"\\srv2\Bar\1-0-0-3");
    backend.add_artifact(r"\\srv2\Baz\4-0-0-1");

    let request = LkgRequest::new("P", "winx64", "Bar.PartFile.xml", "BarPart");
    let info = h.resolver.get_lkg_download_info(&request).await.unwrap().unwrap();
    assert_eq!(info.name, "Bar");
}

fn matched_sources() -> Vec<LkgSource> {
    let mut secondary = LkgSource::new("B", "lkgshare").with_version(v("3.*"));
    secondary.match_lkg = Some("A".to_string());
    vec![LkgSource::new("A", "lkgshare").with_version(v("*")), secondary]
}

#[tokio::test]
async fn test_matched_source_uses_version_recorded_by_primary() {
    let h = LkgHarness::new(vec![share()], matched_sources(), BackendRegistry::new());
    h.bdf_server.add_bdf(
        BdfFixture::new("A", "7-0-0-9")
            .built("A.PartFile.xml")
            .source("B", "3-1-0-2", ServerKind::FileShare, SUB_SHARE),
    );
    h.bdf_server.add_bdf(BdfFixture::new("B", "3-1-0-2").built("B.PartFile.xml"));
    h.bdf_server.add_bdf(BdfFixture::new("B", "3-1-0-5").built("B.PartFile.xml"));

    let primary = h.resolver.use_last_known_good("A").await.unwrap();
    assert_eq!(primary.version, Version::new(7, 0, 0, 9));

    let pulled = h.resolver.use_last_known_good("B").await.unwrap();
    assert_eq!(pulled.version, Version::new(3, 1, 0, 2));
    assert_eq!(h.bdf_server.consumer_query_count(), 0);
}

#[tokio::test]
async fn test_matched_source_pairing_is_persisted() {
    let h = LkgHarness::new(vec![share()], matched_sources(), BackendRegistry::new());
    h.bdf_server.add_bdf(
        BdfFixture::new("A", "7-0-0-9")
            .built("A.PartFile.xml")
            .source("Shared", "2-0-0-1", ServerKind::FileShare, SUB_SHARE),
    );
    h.bdf_server.add_bdf(
        BdfFixture::new("B", "3-1-0-2")
            .built("B.PartFile.xml")
            .source("Shared", "2-0-0-1", ServerKind::FileShare, SUB_SHARE),
    );
    h.bdf_server.add_bdf(
        BdfFixture::new("B", "3-1-0-5")
            .built("B.PartFile.xml")
            .source("Shared", "2-0-0-0", ServerKind::FileShare, SUB_SHARE),
    );
    h.bdf_server.add_consumer("Shared", v("2.0.0.1"), "B", v("3.1.0.2"));
    h.bdf_server.add_consumer("Shared", v("2.0.0.1"), "B", v("4.0.0.1"));
    h.bdf_server.add_consumer("Shared", v("2.0.0.1"), "A", v("7.0.0.9"));

    h.resolver.use_last_known_good("A").await.unwrap();
    let pulled = h.resolver.use_last_known_good("B").await.unwrap();
    assert_eq!(pulled.version, Version::new(3, 1, 0, 2));
    assert_eq!(h.bdf_server.consumer_query_count(), 1);

    let again = h.sibling(vec![share()], matched_sources());
    again.use_last_known_good("A").await.unwrap();
    let pulled = again.use_last_known_good("B").await.unwrap();
    assert_eq!(pulled.version, Version::new(3, 1, 0, 2));
    assert_eq!(h.bdf_server.consumer_query_count(), 1);
}
