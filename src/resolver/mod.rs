//! LKG resolution: from a `(source, platform, context, part)` request to the
//! address and version of the artifact that satisfies it.
//!
//! # Search order
//!
//! For one [`LkgRequest`] the resolver:
//!
//! 1. skips sources that do not apply to the platform,
//! 2. searches the locked BDFs in the request's revision list,
//! 3. picks a root version: a concrete pin as-is, otherwise the newest complete
//!    listed version (listing servers) or the newest BDF (everything else),
//! 4. walks the root BDF: a context it built is checked directly, a context it
//!    pulled is followed through its `LkgMap` into the sub-part's own BDF,
//!    and a context it does not know is retried via the consuming parent,
//! 5. falls back to a blind existence check when no BDF exists at all.
//!
//! The walk keeps the chain of BDFs it has descended through and stops (with a
//! warning) when a product/version pair repeats.
//!
//! # Locking
//!
//! The source's lock is held for a whole resolution, so concurrent requests
//! for the same source serialize and the first one to find a version locks it in
//! for the rest. Requests for different sources run in parallel.

mod types;

pub use types::{LkgDownloadInfo, LkgRequest, PartRef, PulledLkg};

use crate::backend::template::partially_resolve;
use crate::backend::{BackendRegistry, CompletionState, ExistsProbe};
use crate::bdf::{BdfCache, BdfLkgSource, BuildDescription, LkgMapEntry, context_short_name};
use crate::config::{LkgCatalog, Settings};
use crate::core::LkgError;
use crate::source::{LkgServer, LkgSource, ServerKind};
use crate::utils::RetryPolicy;
use crate::version::{Version, VersionWithSuffix, rank_candidates};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

type SearchResult<'a> = BoxFuture<'a, Result<Option<LkgDownloadInfo>, LkgError>>;

/// Per-request values that stay fixed while walking BDFs.
#[derive(Debug, Clone)]
struct SearchContext {
    platform: String,
    is_static: bool,
    context_dir: Option<String>,
}

impl SearchContext {
    fn from_request(request: &LkgRequest) -> Self {
        Self {
            platform: request.platform.clone(),
            is_static: request.is_static,
            context_dir: request.context_dir.clone(),
        }
    }

    /// Context for searching a consuming part, which uses its own dynamic layout.
    fn for_parent(&self) -> Self {
        Self {
            platform: self.platform.clone(),
            is_static: false,
            context_dir: None,
        }
    }

    /// Context for a sub-part whose files live under `output_dir` in its own tree.
    fn in_output_dir(&self, output_dir: &str) -> Self {
        if output_dir.is_empty() {
            return self.clone();
        }
        Self {
            context_dir: Some(output_dir.to_string()),
            ..self.clone()
        }
    }
}

/// Version text in the spelling a backend stores it under.
fn version_text(kind: ServerKind, version: &Version) -> String {
    match kind {
        ServerKind::NuGet => version.to_string(),
        _ => version.string_for_filename(),
    }
}

/// Resolves LKG requests against a catalog of sources and servers.
#[derive(Debug)]
pub struct LkgResolver {
    catalog: Arc<LkgCatalog>,
    settings: Arc<Settings>,
    backends: BackendRegistry,
    bdfs: Arc<BdfCache>,
    retry: RetryPolicy,
    pulled: DashMap<String, Arc<BuildDescription>>,
}

impl LkgResolver {
    /// Creates a resolver. Retries follow `settings.retry_attempts`.
    pub fn new(
        catalog: Arc<LkgCatalog>,
        settings: Arc<Settings>,
        backends: BackendRegistry,
        bdfs: Arc<BdfCache>,
    ) -> Self {
        let retry = RetryPolicy::with_attempts(settings.retry_attempts);
        Self {
            catalog,
            settings,
            backends,
            bdfs,
            retry,
            pulled: DashMap::new(),
        }
    }

    /// Replaces the retry policy used for backend calls.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The catalog requests are resolved against.
    #[must_use]
    pub fn catalog(&self) -> &LkgCatalog {
        &self.catalog
    }

    /// The backend registry, shared with the download executor.
    #[must_use]
    pub const fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    /// The BDF cache.
    #[must_use]
    pub fn bdf_cache(&self) -> &Arc<BdfCache> {
        &self.bdfs
    }

    /// The root BDF recorded by [`LkgResolver::use_last_known_good`] for `source`.
    #[must_use]
    pub fn pulled_bdf(&self, source: &str) -> Option<Arc<BuildDescription>> {
        self.pulled.get(&source.to_lowercase()).map(|b| Arc::clone(b.value()))
    }

    /// Finds where the artifact satisfying `request` lives.
    ///
    /// `Ok(None)` means nothing matched: the source does not apply to the
    /// platform, no version satisfies the requirement, or no searched location
    /// holds the requested context. On success the source is locked to the
    /// version found.
    ///
    /// # Errors
    ///
    /// Configuration errors for unknown sources or servers,
    /// [`LkgError::GraphInconsistency`] when a BDF points at a sub-part it has no
    /// record of, and transport errors once retries are spent.
    pub async fn get_lkg_download_info(&self, request: &LkgRequest) -> Result<Option<LkgDownloadInfo>, LkgError> {
        let source = self.catalog.source(&request.source)?;
        if !source.applies_to_platform(&request.platform) {
            debug!("{} does not apply to {}", source.name, request.platform);
            return Ok(None);
        }
        let server = self.catalog.server_for(&source)?.clone();

        let mut state = source.lock().await;
        let requirement = LkgSource::resolve_version_locked(&source.name, &mut state, &self.settings)?;
        let ctx = SearchContext::from_request(request);

        for locked in &request.revision_list {
            debug!("Searching locked {} {} for {}", locked.product(), locked.version(), request.part.build_context);
            let is_root = locked.product().eq_ignore_ascii_case(&source.name);
            let name = if is_root { source.name.as_str() } else { locked.product() };
            let found = self
                .search_via_bdf(&server, name, Arc::clone(locked), &request.part, request.parent.as_ref(), &ctx, &[])
                .await?;
            if let Some(info) = found {
                if is_root {
                    state.update_version(locked.version());
                }
                return Ok(Some(info));
            }
        }

        let root = if requirement.is_concrete() {
            Some((requirement, version_text(server.kind, &requirement)))
        } else {
            self.select_root_version(&server, &source.name, &requirement, request).await?
        };
        let Some((version, text)) = root else {
            info!("No version of {} matching {} on {}", source.name, requirement, server.name);
            return Ok(None);
        };

        let found = match self.bdfs.get_or_fetch(&source.name, &version).await? {
            Some(cached) => {
                self.search_via_bdf(&server, &source.name, cached.bdf, &request.part, request.parent.as_ref(), &ctx, &[])
                    .await?
            }
            None => {
                debug!("No BDF for {} {}, checking {} directly", source.name, version, server.name);
                self.direct_search(&server, &source.name, version, &text, &ctx).await?
            }
        };

        match &found {
            Some(info) => {
                info!("Resolved {} for {} to {} {} at {}", request.part.build_context, source.name, info.name, info.version, info.address);
                state.update_version(version);
            }
            None => info!("{} {} has no artifact for {}", source.name, version, request.part.build_context),
        }
        Ok(found)
    }

    /// Picks the newest listed, complete version satisfying `requirement`.
    async fn select_root_version(
        &self,
        server: &LkgServer,
        name: &str,
        requirement: &Version,
        request: &LkgRequest,
    ) -> Result<Option<(Version, String)>, LkgError> {
        if !server.lists_versions() {
            let Some(cached) = self.bdfs.get_or_fetch(name, requirement).await? else {
                return Ok(None);
            };
            let version = cached.bdf.version();
            debug!("Newest BDF for {} {} is {}", name, requirement, version);
            return Ok(Some((version, version_text(server.kind, &version))));
        }

        let backend = self.backends.get(server.kind)?;
        let listing = self
            .retry
            .run(&format!("list versions of {name} on {}", server.name), || {
                backend.list_versions(server, name, &request.platform, request.is_static)
            })
            .await?;

        for candidate in rank_candidates(&listing, requirement, self.settings.allow_prerelease_anywhere) {
            let completion = self
                .retry
                .run(&format!("check completion of {name} {candidate}"), || {
                    backend.completion_state(server, name, &request.platform, candidate, request.is_product)
                })
                .await?;
            if completion == CompletionState::Incomplete {
                debug!("Skipping {} {}: upload for {} is not complete", name, candidate, request.platform);
                continue;
            }
            let parsed = VersionWithSuffix::parse(candidate)?;
            let version = Version::from_prefix(&parsed.version().padded());
            return Ok(Some((version, candidate.to_string())));
        }
        Ok(None)
    }

    /// Walks `bdf` (and whatever it leads to) looking for `part`.
    ///
    /// `name` is the source name `bdf` was found under; `path` holds the cache
    /// keys of the BDFs already on the current chain.
    #[allow(clippy::too_many_arguments)]
    fn search_via_bdf<'a>(
        &'a self,
        server: &'a LkgServer,
        name: &'a str,
        bdf: Arc<BuildDescription>,
        part: &'a PartRef,
        parent: Option<&'a PartRef>,
        ctx: &'a SearchContext,
        path: &'a [String],
    ) -> SearchResult<'a> {
        async move {
            let key = bdf.cache_key();
            if path.contains(&key) {
                warn!("Build descriptions form a cycle: {} -> {}", path.join(" -> "), key);
                return Ok(None);
            }
            let mut chain = path.to_vec();
            chain.push(key);

            let version = bdf.version();
            let text = version_text(server.kind, &version);
            let built = bdf.built_contexts();
            if bdf.has_built_context(&part.build_context) {
                debug!("{} {} built {}", bdf.product(), version, part.build_context);
                if let Some(hit) = self.direct_search(server, name, version, &text, ctx).await? {
                    return Ok(Some(hit));
                }
            } else if built.is_empty() {
                debug!("{} {} records no built contexts, checking it directly", bdf.product(), version);
                if let Some(hit) = self.direct_search(server, name, version, &text, ctx).await? {
                    return Ok(Some(hit));
                }
            }

            let short_name = context_short_name(&part.build_context, &part.part_name);
            if let Some(entry) = bdf.get_lkg_map_entry(&short_name) {
                debug!("{} {} pulled {} from {}", bdf.product(), version, short_name, entry.lkg_source);
                let (sub_server, sub_name, sub_bdf) = self.load_sub_part(&bdf, entry).await?;
                let sub_ctx = ctx.in_output_dir(&entry.output_dir);
                return self.search_via_bdf(&sub_server, &sub_name, sub_bdf, part, parent, &sub_ctx, &chain).await;
            }

            let Some(parent) = parent else {
                return Ok(None);
            };
            debug!("{} {} does not know {}, trying parent {}", bdf.product(), version, short_name, parent.build_context);
            let parent_ctx = ctx.for_parent();
            let Some(parent_hit) =
                self.search_via_bdf(server, name, Arc::clone(&bdf), parent, None, &parent_ctx, path).await?
            else {
                return Ok(None);
            };
            let Some(parent_bdf) = self.bdfs.get_or_fetch(&parent_hit.name, &parent_hit.version).await? else {
                debug!("No BDF for {} {}, giving up on {}", parent_hit.name, parent_hit.version, short_name);
                return Ok(None);
            };
            self.search_via_bdf(&parent_hit.server, &parent_hit.name, parent_bdf.bdf, part, None, ctx, &chain).await
        }
        .boxed()
    }

    /// Server, source name and BDF of the sub-part `entry` points at.
    async fn load_sub_part(
        &self,
        bdf: &BuildDescription,
        entry: &LkgMapEntry,
    ) -> Result<(LkgServer, String, Arc<BuildDescription>), LkgError> {
        let inconsistent = |reason: String| LkgError::GraphInconsistency {
            product: bdf.product().to_string(),
            version: bdf.version().string_for_filename(),
            sub_part: entry.lkg_source.clone(),
            reason,
        };

        let record: &BdfLkgSource =
            bdf.lkg_source(&entry.lkg_source).ok_or_else(|| inconsistent("no LkgSources record".to_string()))?;
        let version = record
            .parsed_version()
            .filter(Version::is_concrete)
            .ok_or_else(|| inconsistent(format!("recorded version '{}' is not a concrete version", record.version)))?;
        let server = record.server()?;
        let cached = self
            .bdfs
            .get_or_fetch(&record.name, &version)
            .await?
            .ok_or_else(|| inconsistent(format!("no build description for {} {}", record.name, record.version)))?;
        Ok((server, record.name.clone(), cached.bdf))
    }

    /// Checks one `(name, version)` on `server`.
    async fn direct_search(
        &self,
        server: &LkgServer,
        name: &str,
        version: Version,
        text: &str,
        ctx: &SearchContext,
    ) -> Result<Option<LkgDownloadInfo>, LkgError> {
        let backend = self.backends.get(server.kind)?;
        let probe = ExistsProbe {
            name,
            platform: &ctx.platform,
            version: text,
            context_dir: ctx.context_dir.as_deref(),
            is_static: ctx.is_static,
        };

        let located = self
            .retry
            .run(&format!("check {name} {text} on {}", server.name), || backend.locate(server, &probe))
            .await?;
        let Some(address) = located else {
            debug!("{} {} not on {}", name, text, server.name);
            return Ok(None);
        };

        Ok(Some(LkgDownloadInfo {
            name: name.to_string(),
            platform: ctx.platform.clone(),
            is_static: ctx.is_static,
            address,
            version,
            version_text: text.to_string(),
            server_kind: server.kind,
            server_url: partially_resolve(&server.address, name, text),
            server: server.clone(),
        }))
    }

    /// Pulls the root BDF of `source_name` and locks the source to its version.
    ///
    /// A source with `match_lkg` set is first aligned with the BDF already pulled
    /// for its primary; when the primary has not been pulled yet the source is
    /// used unmatched.
    ///
    /// # Errors
    ///
    /// [`LkgError::NoMatch`] when no version is consistent with the primary,
    /// [`LkgError::NotFound`] when no BDF exists for the chosen version, and
    /// configuration and transport errors.
    pub async fn use_last_known_good(&self, source_name: &str) -> Result<PulledLkg, LkgError> {
        let source = self.catalog.source(source_name)?;
        let mut state = source.lock().await;
        let requirement = LkgSource::resolve_version_locked(&source.name, &mut state, &self.settings)?;

        let version = match &source.match_lkg {
            Some(primary) => {
                let primary_bdf = self.pulled_bdf(primary);
                match primary_bdf {
                    Some(primary_bdf) => {
                        self.bdfs
                            .find_matching_lkg(&source.name, &primary_bdf, &requirement, source.version_range.as_deref())
                            .await?
                    }
                    None => {
                        warn!("{} matches {} but {} has not been pulled, using it unmatched", source.name, primary, primary);
                        requirement
                    }
                }
            }
            None => requirement,
        };

        let cached = self.bdfs.get_or_fetch(&source.name, &version).await?.ok_or_else(|| LkgError::NotFound {
            what: format!("build description for {} {}", source.name, version),
        })?;
        let bdf = cached.bdf;
        let pulled_version = bdf.version();

        if let Some(configured) = source.configured_version() {
            if configured.is_concrete() && configured != pulled_version {
                info!("Using {} {} instead of configured {}", source.name, pulled_version, configured);
            }
        }
        state.update_version(pulled_version);
        self.pulled.insert(source.name.to_lowercase(), Arc::clone(&bdf));
        info!("Pulled {} {}", source.name, pulled_version);

        Ok(PulledLkg {
            name: source.name.clone(),
            version: pulled_version,
            contexts: bdf.lkg_contexts(),
            unsaved: bdf.unsaved_lkg_parts(),
            bdf,
        })
    }
}
