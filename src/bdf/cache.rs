//! Disk and in-memory cache of build descriptions.
//!
//! BDFs are keyed by `(product, version)` with case-insensitive product names and
//! live in `{cache_dir}/bdfs/<product>_<dash-version>.xml`. Lookups behave
//! differently for fixed and wildcard versions:
//!
//! - **Fixed** versions are immutable once published, so memory and disk are
//!   consulted first and the server only on a miss.
//! - **Wildcard** versions ask the server first so a newer build is picked up. The
//!   newest matching local copy is used only when the server cannot be reached.
//!
//! Every successful lookup stamps `BdfCacheUsage.xml` with a last-used time for
//! external eviction tooling. Nothing here evicts.
//!
//! The cache also owns the persisted match index (`LkgMatchIndex.json`) used by
//! [`BdfCache::find_matching_lkg`] to keep a secondary LKG consistent with the
//! primary it was paired with.

use super::{BuildDescription, cache_key};
use crate::backend::HttpClient;
use crate::cache::CacheLock;
use crate::constants::{BDF_CACHE_DIR, BDF_USAGE_FILE, LKG_MATCH_INDEX_FILE};
use crate::core::LkgError;
use crate::utils::{RetryPolicy, atomic_write, remove_dir_all};
use crate::version::{Version, version_satisfies};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// A product build that consumed some sub-part version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    /// Consuming product
    pub name: String,
    /// Version of the consuming product
    pub version: Version,
}

/// Remote source of BDFs and of the consumers index.
#[async_trait]
pub trait BdfServer: Send + Sync {
    /// BDF XML for `product` at `version`; wildcards resolve to the newest match.
    /// `Ok(None)` when no such build was published.
    async fn fetch_bdf(&self, product: &str, version: &Version) -> Result<Option<String>, LkgError>;

    /// Every product build that consumed `sub_part` at `version`.
    async fn consumers(&self, sub_part: &str, version: &Version) -> Result<Vec<Consumer>, LkgError>;
}

#[derive(Debug, Deserialize)]
struct ConsumersResponse {
    #[serde(rename = "LKG Consumers", default)]
    consumers: Vec<ConsumerJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsumerJson {
    name: String,
    release_version: u32,
    major_version: u32,
    minor_version: u32,
    build_number: u32,
}

/// [`BdfServer`] over the BDF web service.
#[derive(Debug, Clone)]
pub struct HttpBdfServer {
    base: String,
    http: HttpClient,
}

impl HttpBdfServer {
    /// `base` is the service root, e.g. `https://bdf.example.com/`.
    #[must_use]
    pub fn new(base: &str, http: HttpClient) -> Self {
        let mut base = base.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self {
            base,
            http,
        }
    }
}

#[async_trait]
impl BdfServer for HttpBdfServer {
    async fn fetch_bdf(&self, product: &str, version: &Version) -> Result<Option<String>, LkgError> {
        let url = format!("{}api/bdf?Product={}&Version={}", self.base, product, version.string_for_filename());
        match self.http.get_text(&url, None).await {
            Ok(xml) if xml.trim().is_empty() => Ok(None),
            Ok(xml) => Ok(Some(xml)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn consumers(&self, sub_part: &str, version: &Version) -> Result<Vec<Consumer>, LkgError> {
        let [release, major, minor, build] = version.padded();
        let url = format!(
            "{}api/products?Product={sub_part}&Flags=Consumers&Release={release}&Major={major}&Minor={minor}&Build={build}",
            self.base
        );
        let response: ConsumersResponse = match self.http.get_json(&url, None).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(response
            .consumers
            .into_iter()
            .map(|c| Consumer {
                name: c.name,
                version: Version::new(c.release_version, c.major_version, c.minor_version, c.build_number),
            })
            .collect())
    }
}

/// Where a BDF returned by [`BdfCache::get_or_fetch`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BdfStatus {
    /// Already loaded in this process
    Memory,
    /// Read from the disk cache
    Disk,
    /// Downloaded from the BDF server
    Server,
    /// Server unreachable; newest matching disk copy used instead
    LocalFallback,
}

/// A BDF together with its origin.
#[derive(Debug, Clone)]
pub struct CachedBdf {
    /// The build description
    pub bdf: Arc<BuildDescription>,
    /// Where it came from
    pub status: BdfStatus,
}

/// One `<Usage>` row of the usage sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    /// Cached file name
    #[serde(rename = "@Name")]
    pub name: String,
    /// RFC 3339 timestamp
    #[serde(rename = "@LastUsed")]
    pub last_used: String,
}

impl UsageEntry {
    /// Parsed timestamp, if valid.
    #[must_use]
    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.last_used).ok().map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "BdfCache")]
struct UsageDocument {
    #[serde(rename = "Usage", default)]
    entries: Vec<UsageEntry>,
}

/// A BDF file on disk, as reported by [`BdfCache::cached_entries`].
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// File name
    pub file_name: String,
    /// Size in bytes
    pub size: u64,
    /// Last use recorded in the usage sidecar
    pub last_used: Option<DateTime<Utc>>,
}

/// Process-wide BDF cache. Share it behind an [`Arc`].
pub struct BdfCache {
    cache_root: PathBuf,
    dir: PathBuf,
    server: Option<Arc<dyn BdfServer>>,
    retry: RetryPolicy,
    loaded: DashMap<String, Arc<BuildDescription>>,
    stamped: DashSet<String>,
    index_guard: Mutex<()>,
}

impl std::fmt::Debug for BdfCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BdfCache")
            .field("dir", &self.dir)
            .field("has_server", &self.server.is_some())
            .field("loaded", &self.loaded.len())
            .finish_non_exhaustive()
    }
}

impl BdfCache {
    /// A cache under `{cache_root}/bdfs` backed by `server`.
    #[must_use]
    pub fn new(cache_root: &Path, server: Option<Arc<dyn BdfServer>>) -> Self {
        Self {
            cache_root: cache_root.to_path_buf(),
            dir: cache_root.join(BDF_CACHE_DIR),
            server,
            retry: RetryPolicy::with_attempts(crate::constants::DEFAULT_RETRY_ATTEMPTS),
            loaded: DashMap::new(),
            stamped: DashSet::new(),
            index_guard: Mutex::new(()),
        }
    }

    /// Replaces the retry policy used for server calls.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Directory holding the cached files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, product: &str, version: &Version) -> PathBuf {
        self.dir.join(format!("{}.xml", cache_key(product, version)))
    }

    /// Returns the BDF for `product` at `version`, `Ok(None)` when none exists.
    ///
    /// A BDF that fails to parse is never cached.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::BdfParseError`] for a malformed server response, and
    /// transport errors from a fixed-version server lookup once retries are spent.
    pub async fn get_or_fetch(&self, product: &str, version: &Version) -> Result<Option<CachedBdf>, LkgError> {
        let found = if version.is_concrete() {
            self.get_fixed(product, version).await?
        } else {
            self.get_wildcard(product, version).await?
        };

        if let Some(cached) = &found {
            debug!("BDF {} {} from {:?}", product, cached.bdf.version(), cached.status);
            self.record_usage(&format!("{}.xml", cached.bdf.cache_key())).await;
        }
        Ok(found)
    }

    async fn get_fixed(&self, product: &str, version: &Version) -> Result<Option<CachedBdf>, LkgError> {
        let key = cache_key(product, version);
        if let Some(bdf) = self.loaded.get(&key) {
            return Ok(Some(CachedBdf {
                bdf: Arc::clone(&bdf),
                status: BdfStatus::Memory,
            }));
        }

        if let Some(bdf) = self.read_disk(&self.file_for(product, version)).await? {
            let bdf = Arc::new(bdf);
            self.loaded.insert(key, Arc::clone(&bdf));
            return Ok(Some(CachedBdf {
                bdf,
                status: BdfStatus::Disk,
            }));
        }

        match self.fetch_from_server(product, version).await? {
            Some(bdf) => Ok(Some(CachedBdf {
                bdf,
                status: BdfStatus::Server,
            })),
            None => Ok(None),
        }
    }

    async fn get_wildcard(&self, product: &str, version: &Version) -> Result<Option<CachedBdf>, LkgError> {
        match self.fetch_from_server(product, version).await {
            Ok(Some(bdf)) => {
                return Ok(Some(CachedBdf {
                    bdf,
                    status: BdfStatus::Server,
                }));
            }
            Ok(None) if self.server.is_some() => return Ok(None),
            Ok(None) => debug!("No BDF server configured; looking for {} {} locally", product, version),
            Err(e) if e.is_configuration() || matches!(e, LkgError::BdfParseError { .. }) => return Err(e),
            Err(e) => warn!("BDF server unreachable for {} {}: {}; trying local cache", product, version, e),
        }

        let Some(newest) = self.local_versions(product).await?.into_iter().rev().find(|v| version.matches(v)) else {
            return Ok(None);
        };
        let Some(found) = self.get_fixed(product, &newest).await? else {
            return Ok(None);
        };
        Ok(Some(CachedBdf {
            status: BdfStatus::LocalFallback,
            ..found
        }))
    }

    async fn fetch_from_server(&self, product: &str, version: &Version) -> Result<Option<Arc<BuildDescription>>, LkgError> {
        let Some(server) = &self.server else {
            return Ok(None);
        };
        let what = format!("fetch BDF {product} {version}");
        let Some(xml) = self.retry.run(&what, || server.fetch_bdf(product, version)).await? else {
            debug!("BDF server has no {} {}", product, version);
            return Ok(None);
        };

        let bdf = BuildDescription::load(&xml, &format!("{product} {version}"))?;
        if !version.matches(&bdf.version()) {
            return Err(LkgError::BdfParseError {
                source_name: format!("{product} {version}"),
                reason: format!("server returned version {}", bdf.version()),
            });
        }

        let path = self.file_for(bdf.product(), &bdf.version());
        let content = xml.into_bytes();
        let written = tokio::task::spawn_blocking(move || atomic_write(&path, &content))
            .await
            .map_err(LkgError::other)?;
        if let Err(e) = written {
            warn!("Could not cache BDF {} {}: {:#}", product, bdf.version(), e);
        }

        info!("Downloaded BDF {} {}", bdf.product(), bdf.version());
        let bdf = Arc::new(bdf);
        self.loaded.insert(bdf.cache_key(), Arc::clone(&bdf));
        Ok(Some(bdf))
    }

    async fn read_disk(&self, path: &Path) -> Result<Option<BuildDescription>, LkgError> {
        let xml = match tokio::fs::read_to_string(path).await {
            Ok(xml) => xml,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match BuildDescription::load(&xml, &path.display().to_string()) {
            Ok(bdf) => Ok(Some(bdf)),
            Err(e) => {
                warn!("Discarding unreadable cached BDF: {}", e);
                if let Err(e) = tokio::fs::remove_file(path).await {
                    debug!("Could not remove {}: {}", path.display(), e);
                }
                Ok(None)
            }
        }
    }

    /// Versions of `product` on disk, oldest first.
    ///
    /// # Errors
    ///
    /// Fails when the cache directory exists but cannot be read.
    pub async fn local_versions(&self, product: &str) -> Result<Vec<Version>, LkgError> {
        let prefix = format!("{}_", product.to_lowercase());
        let mut versions = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(versions),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            let parsed = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".xml"))
                .and_then(|v| Version::parse(v).ok())
                .filter(Version::is_concrete);
            if let Some(version) = parsed {
                versions.push(version);
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Stamps `file_name` in the usage sidecar once per process.
    async fn record_usage(&self, file_name: &str) {
        if !self.stamped.insert(file_name.to_lowercase()) {
            return;
        }
        let lock = match CacheLock::acquire(&self.cache_root, "bdf-usage").await {
            Ok(lock) => lock,
            Err(e) => {
                warn!("Skipping BDF usage update: {:#}", e);
                return;
            }
        };

        let path = self.dir.join(BDF_USAGE_FILE);
        let name = file_name.to_string();
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut doc = read_usage(&path)?;
            let now = Utc::now().to_rfc3339();
            match doc.entries.iter_mut().find(|e| e.name.eq_ignore_ascii_case(&name)) {
                Some(entry) => entry.last_used = now,
                None => doc.entries.push(UsageEntry {
                    name,
                    last_used: now,
                }),
            }
            let mut body = String::new();
            let mut serializer = quick_xml::se::Serializer::new(&mut body);
            serializer.indent(' ', 2);
            doc.serialize(serializer)?;
            atomic_write(&path, body.as_bytes())
        })
        .await;
        drop(lock);

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to update BDF usage: {:#}", e),
            Err(e) => warn!("BDF usage task failed: {}", e),
        }
    }

    /// Rows of the usage sidecar.
    ///
    /// # Errors
    ///
    /// Fails when the sidecar exists but cannot be parsed.
    pub fn usage(&self) -> anyhow::Result<Vec<UsageEntry>> {
        Ok(read_usage(&self.dir.join(BDF_USAGE_FILE))?.entries)
    }

    /// Cached BDF files with their last-used stamp, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails when the cache directory cannot be read.
    pub fn cached_entries(&self) -> anyhow::Result<Vec<CacheEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let usage = self.usage().unwrap_or_else(|e| {
            warn!("Ignoring unreadable usage file: {:#}", e);
            Vec::new()
        });

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let is_bdf = file_name.ends_with(".xml") && file_name != BDF_USAGE_FILE;
            if !is_bdf || !entry.file_type()?.is_file() {
                continue;
            }
            let last_used = usage
                .iter()
                .find(|u| u.name.eq_ignore_ascii_case(&file_name))
                .and_then(UsageEntry::last_used_at);
            entries.push(CacheEntry {
                size: entry.metadata()?.len(),
                file_name,
                last_used,
            });
        }
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    /// Forgets every loaded BDF and removes the disk cache. Returns the number of
    /// BDF files removed.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be removed.
    pub fn clear(&self) -> anyhow::Result<usize> {
        let removed = self.cached_entries()?.len();
        self.loaded.clear();
        self.stamped.clear();
        remove_dir_all(&self.dir)?;
        info!("Removed {} cached BDFs from {}", removed, self.dir.display());
        Ok(removed)
    }

    fn index_key(lkg_name: &str, primary: &BuildDescription) -> String {
        format!("{}|{}|{}", lkg_name, primary.product(), primary.version().string_for_filename()).to_lowercase()
    }

    async fn with_match_index<T, F>(&self, update: F) -> Result<T, LkgError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> (T, bool) + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.index_guard.lock().await;
        let _lock = CacheLock::acquire(&self.cache_root, "lkg-match-index")
            .await
            .map_err(|e| LkgError::other(format!("{e:#}")))?;

        let path = self.dir.join(LKG_MATCH_INDEX_FILE);
        tokio::task::spawn_blocking(move || -> anyhow::Result<T> {
            let mut index: BTreeMap<String, String> = match std::fs::read_to_string(&path) {
                Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                    warn!("Resetting unreadable match index {}: {}", path.display(), e);
                    BTreeMap::new()
                }),
                Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
                Err(e) => return Err(e.into()),
            };
            let (value, changed) = update(&mut index);
            if changed {
                atomic_write(&path, serde_json::to_string_pretty(&index)?.as_bytes())?;
            }
            Ok(value)
        })
        .await
        .map_err(LkgError::other)?
        .map_err(|e| LkgError::other(format!("{e:#}")))
    }

    /// Version of `lkg_name` previously matched against `primary`.
    ///
    /// # Errors
    ///
    /// Fails when the index cannot be locked or read.
    pub async fn matched_version(&self, lkg_name: &str, primary: &BuildDescription) -> Result<Option<Version>, LkgError> {
        let key = Self::index_key(lkg_name, primary);
        let found = self.with_match_index(move |index| (index.get(&key).cloned(), false)).await?;
        Ok(found.and_then(|v| Version::parse(&v).ok()))
    }

    /// Records that `lkg_name` at `version` pairs with `primary`.
    ///
    /// # Errors
    ///
    /// Fails when the index cannot be locked or written.
    pub async fn set_matched_version(
        &self,
        lkg_name: &str,
        version: &Version,
        primary: &BuildDescription,
    ) -> Result<(), LkgError> {
        let key = Self::index_key(lkg_name, primary);
        let value = version.string_for_filename();
        self.with_match_index(move |index| {
            let changed = index.get(&key) != Some(&value);
            index.insert(key, value);
            ((), changed)
        })
        .await
    }

    /// Finds the version of `lkg_name` that was used together with `primary`.
    ///
    /// In order: the persisted match index, the version `primary` itself recorded
    /// for `lkg_name`, and finally the consumers of every sub-part the two products
    /// share, intersected. Candidates must match `requirement` and, if given,
    /// `range`. Successful matches are persisted.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::NoMatch`] naming the sub-part that left no candidate, and
    /// propagates server and index failures.
    pub async fn find_matching_lkg(
        &self,
        lkg_name: &str,
        primary: &BuildDescription,
        requirement: &Version,
        range: Option<&str>,
    ) -> Result<Version, LkgError> {
        let satisfies = |v: &Version| -> Result<bool, LkgError> {
            Ok(requirement.matches(v) && range.map(|r| version_satisfies(r, v)).transpose()?.unwrap_or(true))
        };
        let no_match = |reason: String| LkgError::NoMatch {
            lkg_name: lkg_name.to_string(),
            matched_against: primary.product().to_string(),
            reason,
        };

        if let Some(known) = self.matched_version(lkg_name, primary).await? {
            if satisfies(&known)? {
                info!("Match index pairs {} {} with {} {}", lkg_name, known, primary.product(), primary.version());
                return Ok(known);
            }
        }

        if let Some(recorded) = primary.lkg_version(lkg_name) {
            if satisfies(&recorded)? {
                info!("{} {} used {} {}", primary.product(), primary.version(), lkg_name, recorded);
                self.set_matched_version(lkg_name, &recorded, primary).await?;
                return Ok(recorded);
            }
            debug!("{} {} recorded by {} does not meet {}", lkg_name, recorded, primary.product(), requirement);
        }

        let secondary = self
            .get_or_fetch(lkg_name, requirement)
            .await?
            .ok_or_else(|| no_match(format!("no build description of {lkg_name} matches {requirement}")))?;
        let secondary = secondary.bdf;

        let shared: Vec<&str> = primary
            .sub_part_lkg_source_names()
            .into_iter()
            .filter(|name| secondary.lkg_source(name).is_some())
            .collect();
        if shared.iter().all(|name| primary.lkg_version(name) == secondary.lkg_version(name)) {
            debug!("{} {} already agrees with {} on every shared part", lkg_name, secondary.version(), primary.product());
            return Ok(secondary.version());
        }

        let server = self
            .server
            .as_ref()
            .ok_or_else(|| no_match("no BDF server is configured to list consumers".into()))?;

        let mut candidates: Option<BTreeSet<Version>> = None;
        for part in shared {
            let Some(part_version) = primary.lkg_version(part) else {
                continue;
            };
            let what = format!("list consumers of {part} {part_version}");
            let consumers = self.retry.run(&what, || server.consumers(part, &part_version)).await?;
            let versions: BTreeSet<Version> = consumers
                .into_iter()
                .filter(|c| c.name.eq_ignore_ascii_case(lkg_name))
                .map(|c| c.version)
                .collect();
            debug!("{} {} is consumed by {} versions {:?}", part, part_version, lkg_name, versions);

            if versions.is_empty() {
                return Err(no_match(format!(
                    "could not find match for part {part} version {}",
                    part_version.string_for_filename()
                )));
            }
            let next = match candidates {
                None => versions,
                Some(previous) => previous.intersection(&versions).copied().collect(),
            };
            if next.is_empty() {
                return Err(no_match(format!("could not find match for combination of parts at {part}")));
            }
            candidates = Some(next);
        }

        let mut newest = None;
        for version in candidates.unwrap_or_default().into_iter().rev() {
            if satisfies(&version)? {
                newest = Some(version);
                break;
            }
        }
        let newest = newest.ok_or_else(|| no_match(format!("no consistent version meets {requirement}")))?;

        info!("Matched {} {} to {} {}", lkg_name, newest, primary.product(), primary.version());
        self.set_matched_version(lkg_name, &newest, primary).await?;
        Ok(newest)
    }
}

fn read_usage(path: &Path) -> anyhow::Result<UsageDocument> {
    match std::fs::read_to_string(path) {
        Ok(xml) => Ok(quick_xml::de::from_str(&xml)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(UsageDocument::default()),
        Err(e) => Err(e.into()),
    }
}
