//! NuGet V2 (OData) feed backend.
//!
//! Versions come from `FindPackagesById()`; the download URL of one version is the
//! `src` of the `<content>` element returned by `Packages(Id='..',Version='..')`.
//! Both queries are cached per process under lower-cased keys. Packages are `.nupkg`
//! zips, validated before extraction.

use super::auth::AuthProvider;
use super::http::HttpClient;
use super::template::resolve_address;
use super::{ArtifactBackend, ExistsProbe};
use crate::core::LkgError;
use crate::source::{LkgServer, ServerKind};
use crate::utils::{extract_zip, validate_zip};
use crate::version::{VersionWithSuffix, split_build_metadata};
use async_trait::async_trait;
use dashmap::DashMap;
use quick_xml::Reader;
use quick_xml::events::Event;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static PACKAGE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/Packages\(Id='([^']*)',Version='([^']*)'").expect("package id pattern is valid")
});

/// Target framework recorded when a package declares none.
pub const DEFAULT_TARGET_FRAMEWORK: &str = ".NETFramework4.7";

/// Backend for [`ServerKind::NuGet`].
pub struct NuGetBackend {
    http: HttpClient,
    auth: Arc<AuthProvider>,
    staging_dir: PathBuf,
    queries: DashMap<String, Arc<String>>,
    download_urls: DashMap<String, String>,
}

impl NuGetBackend {
    /// Creates a backend that stages packages under `staging_dir`.
    #[must_use]
    pub fn new(http: HttpClient, auth: Arc<AuthProvider>, staging_dir: PathBuf) -> Self {
        Self {
            http,
            auth,
            staging_dir,
            queries: DashMap::new(),
            download_urls: DashMap::new(),
        }
    }

    fn registry(server: &LkgServer, name: &str, platform: &str) -> Result<String, LkgError> {
        Ok(resolve_address(&server.address, name, platform, None)?.trim_end_matches('/').to_string())
    }

    /// Download URL for one package version, or `None` when the feed has no such version.
    async fn download_url(
        &self,
        server: &LkgServer,
        registry: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<String>, LkgError> {
        let key = cache_key(registry, id, version);
        if let Some(url) = self.download_urls.get(&key) {
            debug!("Download URL for {} {} found in cache", id, version);
            return Ok(Some(url.clone()));
        }

        let metadata_url = format!("{registry}/Packages(Id='{id}',Version='{version}')");
        let auth = self.auth.header_for(server).await?;
        let body = match self.http.get_text(&metadata_url, auth.as_deref()).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => {
                debug!("No package {} {} on {}", id, version, registry);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let src = content_src(&body)?;
        match &src {
            Some(url) => {
                self.download_urls.insert(key, url.clone());
            }
            None => debug!("No download URL for package {} version {} in {}", id, version, registry),
        }
        Ok(src)
    }

    fn staging_path(&self, address: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(address.as_bytes()));
        self.staging_dir.join(format!("{}.nupkg", &digest[..16]))
    }

    async fn download_package(&self, address: &str, path: &Path, auth: Option<&str>) -> Result<(), LkgError> {
        match self.http.download(address, path, auth).await {
            Ok(bytes) => {
                debug!("Downloaded {} bytes from {}", bytes, address);
                Ok(())
            }
            Err(e) if !matches!(e, LkgError::Authentication { .. }) => {
                let Some(stripped) = without_build_metadata(address) else {
                    return Err(e);
                };
                info!("Retrying {} without semver build metadata", address);
                self.http.download(&stripped, path, auth).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }
}

fn cache_key(registry: &str, id: &str, version: &str) -> String {
    [registry, id, version].join("/").to_lowercase()
}

/// The download URL with build metadata removed from its final segment, if it had any.
fn without_build_metadata(url: &str) -> Option<String> {
    let (base, last) = url.rsplit_once('/')?;
    let (version, metadata) = split_build_metadata(last);
    metadata.map(|_| format!("{base}/{version}"))
}

/// Versions of `id` listed in a `FindPackagesById()` Atom feed.
///
/// The feed also returns other ids; only exact (case-insensitive) matches count.
///
/// # Errors
///
/// Returns [`LkgError::XmlError`] for malformed feeds.
pub fn parse_package_feed(feed: &str, id: &str) -> Result<Vec<String>, LkgError> {
    let mut reader = Reader::from_str(feed);
    reader.config_mut().trim_text(true);

    let mut versions = Vec::new();
    let mut in_id = false;
    loop {
        match reader.read_event().map_err(|e| LkgError::XmlError(e.to_string()))? {
            Event::Start(e) if e.local_name().as_ref() == b"id" => in_id = true,
            Event::End(e) if e.local_name().as_ref() == b"id" => in_id = false,
            Event::Text(t) if in_id => {
                let text = t.unescape().map_err(|e| LkgError::XmlError(e.to_string()))?;
                if let Some(caps) = PACKAGE_ID_RE.captures(&text) {
                    if caps[1].eq_ignore_ascii_case(id) {
                        versions.push(caps[2].to_string());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(versions)
}

/// The `src` attribute of the first `<content>` element of a package entry.
///
/// # Errors
///
/// Returns [`LkgError::XmlError`] for malformed documents.
pub fn content_src(entry: &str) -> Result<Option<String>, LkgError> {
    let mut reader = Reader::from_str(entry);
    loop {
        match reader.read_event().map_err(|e| LkgError::XmlError(e.to_string()))? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"content" => {
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| LkgError::XmlError(e.to_string()))?;
                    if attr.key.local_name().as_ref().eq_ignore_ascii_case(b"src") {
                        let value = attr.unescape_value().map_err(|e| LkgError::XmlError(e.to_string()))?;
                        return Ok(Some(value.trim().to_string()));
                    }
                }
                return Ok(None);
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Orders feed versions newest first by suffix-aware precedence, dropping any that
/// cannot be parsed.
fn sort_feed_versions(versions: Vec<String>) -> Vec<String> {
    let mut parsed: Vec<VersionWithSuffix> = versions
        .iter()
        .filter_map(|v| match VersionWithSuffix::parse(v) {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("Ignoring unparseable package version '{}'", v);
                None
            }
        })
        .collect();
    parsed.sort_by(|a, b| b.cmp_precedence(a));
    parsed.into_iter().map(|v| v.raw().to_string()).collect()
}

#[async_trait]
impl ArtifactBackend for NuGetBackend {
    fn kind(&self) -> ServerKind {
        ServerKind::NuGet
    }

    async fn list_versions(
        &self,
        server: &LkgServer,
        name: &str,
        platform: &str,
        _is_static: bool,
    ) -> Result<Vec<String>, LkgError> {
        let registry = Self::registry(server, name, platform)?;
        let url = format!("{registry}/FindPackagesById()?id='{name}'&semVerLevel=2.0.0");
        let key = url.to_lowercase();

        let body = if let Some(cached) = self.queries.get(&key) {
            debug!("Versions of {} found in cache", name);
            Arc::clone(cached.value())
        } else {
            let auth = self.auth.header_for(server).await?;
            let body = Arc::new(self.http.get_text(&url, auth.as_deref()).await?);
            self.queries.insert(key, Arc::clone(&body));
            body
        };

        let versions = sort_feed_versions(parse_package_feed(&body, name)?);
        debug!("Found {} versions of package {}", versions.len(), name);
        Ok(versions)
    }

    async fn exists(&self, server: &LkgServer, probe: &ExistsProbe<'_>) -> Result<bool, LkgError> {
        Ok(self.locate(server, probe).await?.is_some())
    }

    async fn locate(&self, server: &LkgServer, probe: &ExistsProbe<'_>) -> Result<Option<String>, LkgError> {
        let registry = Self::registry(server, probe.name, probe.platform)?;
        self.download_url(server, &registry, probe.name, probe.version).await
    }

    async fn fetch(
        &self,
        _server: &LkgServer,
        address: &str,
        destination: &Path,
        auth: Option<&str>,
    ) -> Result<(), LkgError> {
        let package = self.staging_path(address);
        self.download_package(address, &package, auth).await?;

        let dest = destination.to_path_buf();
        let staged = package.clone();
        let result = tokio::task::spawn_blocking(move || {
            validate_zip(&staged)?;
            extract_zip(&staged, &dest, false)
        })
        .await
        .map_err(LkgError::other)?;

        if let Err(e) = tokio::fs::remove_file(&package).await {
            debug!("Could not remove staged package {}: {}", package.display(), e);
        }
        let files = result?;
        info!("Extracted {} files from {} into {}", files, address, destination.display());
        Ok(())
    }
}

/// The subset of a `.nuspec` needed for provenance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "package")]
pub struct Nuspec {
    /// Package metadata
    pub metadata: NuspecMetadata,
}

/// `<metadata>` of a `.nuspec`.
#[derive(Debug, Clone, Deserialize)]
pub struct NuspecMetadata {
    /// Package id
    pub id: String,
    /// Package version
    pub version: String,
    /// Declared dependencies
    #[serde(default)]
    pub dependencies: Option<NuspecDependencies>,
}

/// `<dependencies>`: flat `<dependency>` items and framework `<group>`s.
#[derive(Debug, Clone, Deserialize)]
pub struct NuspecDependencies {
    #[serde(rename = "$value", default)]
    items: Vec<DependencyItem>,
}

#[derive(Debug, Clone, Deserialize)]
enum DependencyItem {
    #[serde(rename = "dependency")]
    Dependency(NuspecDependency),
    #[serde(rename = "group")]
    Group(DependencyGroup),
}

#[derive(Debug, Clone, Deserialize)]
struct DependencyGroup {
    #[serde(rename = "@targetFramework", default)]
    target_framework: Option<String>,
    #[serde(rename = "dependency", default)]
    dependencies: Vec<NuspecDependency>,
}

/// One `<dependency id version/>`.
#[derive(Debug, Clone, Deserialize)]
pub struct NuspecDependency {
    /// Dependency id
    #[serde(rename = "@id")]
    pub id: String,
    /// Version requirement as declared
    #[serde(rename = "@version", default)]
    pub version: String,
}

impl Nuspec {
    /// Parses `.nuspec` XML.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::XmlError`] when the document does not deserialize.
    pub fn parse(xml: &str) -> Result<Self, LkgError> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    /// Reads `<dir>/<name>.nuspec`, falling back to any `.nuspec` in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::NotFound`] when the directory holds no `.nuspec`.
    pub async fn read_from_dir(dir: &Path, name: &str) -> Result<Self, LkgError> {
        let preferred = dir.join(format!("{name}.nuspec"));
        let path = if tokio::fs::try_exists(&preferred).await? {
            preferred
        } else {
            let mut found = None;
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let is_nuspec = entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("nuspec"));
                if is_nuspec {
                    found = Some(entry.path());
                    break;
                }
            }
            found.ok_or_else(|| LkgError::NotFound {
                what: format!("nuspec in {}", dir.display()),
            })?
        };
        Self::parse(&tokio::fs::read_to_string(&path).await?)
    }

    /// Dependencies paired with their target framework; ungrouped ones get
    /// `default_framework`.
    #[must_use]
    pub fn dependencies(&self, default_framework: &str) -> Vec<(NuspecDependency, String)> {
        let Some(deps) = &self.metadata.dependencies else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for item in &deps.items {
            match item {
                DependencyItem::Dependency(dep) => out.push((dep.clone(), default_framework.to_string())),
                DependencyItem::Group(group) => {
                    let framework = group.target_framework.as_deref().unwrap_or(default_framework);
                    out.extend(group.dependencies.iter().map(|d| (d.clone(), framework.to_string())));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xml:base="https://feed/nuget/v2" xmlns="http://www.w3.org/2005/Atom">
  <id>https://feed/nuget/v2/FindPackagesById</id>
  <entry><id>https://feed/nuget/v2/Packages(Id='Foo',Version='1.0.0')</id></entry>
  <entry><id>https://feed/nuget/v2/Packages(Id='foo',Version='1.2.0-beta.1')</id></entry>
  <entry><id>https://feed/nuget/v2/Packages(Id='Foo',Version='1.2.0+sha.abc')</id></entry>
  <entry><id>https://feed/nuget/v2/Packages(Id='Foo.Extras',Version='9.0.0')</id></entry>
</feed>"#;

    #[test]
    fn test_parse_package_feed_filters_ids() {
        let versions = parse_package_feed(FEED, "Foo").unwrap();
        assert_eq!(versions, vec!["1.0.0", "1.2.0-beta.1", "1.2.0+sha.abc"]);
    }

    #[test]
    fn test_sort_feed_versions() {
        let sorted = sort_feed_versions(parse_package_feed(FEED, "Foo").unwrap());
        assert_eq!(sorted, vec!["1.2.0+sha.abc", "1.2.0-beta.1", "1.0.0"]);
    }

    #[test]
    fn test_content_src() {
        let entry = r#"<entry xmlns="http://www.w3.org/2005/Atom">
  <content type="application/zip" src="https://feed/api/v2/package/Foo/1.0.0"/>
</entry>"#;
        assert_eq!(content_src(entry).unwrap().as_deref(), Some("https://feed/api/v2/package/Foo/1.0.0"));
        assert_eq!(content_src("<entry/>").unwrap(), None);
    }

    #[test]
    fn test_without_build_metadata() {
        assert_eq!(
            without_build_metadata("https://feed/package/Foo/1.2.0+sha.abc").as_deref(),
            Some("https://feed/package/Foo/1.2.0")
        );
        assert_eq!(without_build_metadata("https://feed/package/Foo/1.2.0"), None);
    }

    #[test]
    fn test_cache_key_is_lowercase() {
        assert_eq!(cache_key("https://Feed", "Foo", "1.0.0-Beta"), "https://feed/foo/1.0.0-beta");
    }

    #[test]
    fn test_nuspec_dependencies() {
        let xml = r#"<?xml version="1.0"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>Foo</id>
    <version>1.2.0</version>
    <dependencies>
      <dependency id="Plain" version="1.0"/>
      <group targetFramework="net6.0">
        <dependency id="Bar" version="[2.0,3.0)"/>
      </group>
    </dependencies>
  </metadata>
</package>"#;
        let nuspec = Nuspec::parse(xml).unwrap();
        assert_eq!(nuspec.metadata.id, "Foo");
        let deps = nuspec.dependencies(DEFAULT_TARGET_FRAMEWORK);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].0.id, "Plain");
        assert_eq!(deps[0].1, DEFAULT_TARGET_FRAMEWORK);
        assert_eq!(deps[1].0.version, "[2.0,3.0)");
        assert_eq!(deps[1].1, "net6.0");
    }
}
