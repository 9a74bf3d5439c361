//! Artifact backends: one capability implementation per [`ServerKind`].
//!
//! Every backing store exposes the same small interface ([`ArtifactBackend`]):
//! list the versions available for a logical name, check whether a version exists,
//! and fetch a resolved address into a destination directory. Dispatch is a flat
//! lookup from [`ServerKind`] to an `Arc<dyn ArtifactBackend>` held by a
//! [`BackendRegistry`]; tests swap in scripted backends with
//! [`BackendRegistry::with_backend`].
//!
//! | Kind                 | Implementation           | Listing                        |
//! |----------------------|--------------------------|--------------------------------|
//! | `fileshare`          | [`FileShareBackend`]     | directory enumeration          |
//! | `local`              | [`FileShareBackend`]     | directory enumeration, symlink |
//! | `rsync`              | [`RsyncBackend`]         | `rsync --list-only`            |
//! | `nuget`              | [`NuGetBackend`]         | OData `FindPackagesById()`     |
//! | `azurebuildartifact` | [`AzureArtifactBackend`] | build listing per definition   |

pub mod auth;
pub mod azure;
pub mod fileshare;
pub mod http;
pub mod mirror;
pub mod nuget;
pub mod rsync;
pub mod template;

pub use auth::{AuthProvider, repair_token_cache};
pub use azure::AzureArtifactBackend;
pub use fileshare::FileShareBackend;
pub use http::HttpClient;
pub use mirror::{FileMirror, LocalFileMirror};
pub use nuget::NuGetBackend;
pub use rsync::RsyncBackend;
pub use template::{join_address, resolve_address};

use crate::config::Settings;
use crate::constants::{CHECK_COMPLETE_FLAG, STATIC_SUBDIR};
use crate::core::LkgError;
use crate::source::{LkgServer, ServerKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Everything a backend needs to decide whether a version exists.
#[derive(Debug, Clone, Copy)]
pub struct ExistsProbe<'a> {
    /// Logical artifact name
    pub name: &'a str,
    /// Target platform
    pub platform: &'a str,
    /// Version directory text (`1-2-3-4`)
    pub version: &'a str,
    /// Build context directory for static lookups
    pub context_dir: Option<&'a str>,
    /// Static build context
    pub is_static: bool,
}

impl<'a> ExistsProbe<'a> {
    /// A dynamic probe without context.
    #[must_use]
    pub const fn new(name: &'a str, platform: &'a str, version: &'a str) -> Self {
        Self {
            name,
            platform,
            version,
            context_dir: None,
            is_static: false,
        }
    }
}

/// Result of checking the completion-flag convention for one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// The version does not use completion flags
    NoConvention,
    /// The flag for the requested platform and kind is present
    Complete,
    /// The version uses flags but the requested one is missing (still uploading)
    Incomplete,
}

/// Name of the completion flag for a platform and product kind.
#[must_use]
pub fn completion_flag_name(platform: &str, is_product: bool) -> String {
    let kind = if is_product { "Product" } else { "NonProduct" };
    format!("{platform}.{kind}.complete.flag")
}

/// Evaluates the completion convention over the entries of a version directory.
#[must_use]
pub fn completion_from_listing(entries: &[String], platform: &str, is_product: bool) -> CompletionState {
    let has = |wanted: &str| entries.iter().any(|e| e.eq_ignore_ascii_case(wanted));
    if !has(CHECK_COMPLETE_FLAG) {
        CompletionState::NoConvention
    } else if has(&completion_flag_name(platform, is_product)) {
        CompletionState::Complete
    } else {
        CompletionState::Incomplete
    }
}

/// Address the existence check inspects for a probe rooted at `address`.
#[must_use]
pub fn probe_target(address: &str, probe: &ExistsProbe<'_>) -> String {
    if probe.is_static {
        let mut segments = vec![STATIC_SUBDIR];
        if let Some(ctx) = probe.context_dir {
            segments.push(ctx);
        }
        join_address(address, &segments)
    } else {
        address.to_string()
    }
}

/// Capability interface implemented once per backing-store kind.
#[async_trait]
pub trait ArtifactBackend: Send + Sync {
    /// The kind this backend serves.
    fn kind(&self) -> ServerKind;

    /// Versions available for `name`, newest first.
    ///
    /// Path-addressed servers whose address has no `$(version)` token return an empty
    /// list without touching the network; callers check [`LkgServer::lists_versions`]
    /// first.
    async fn list_versions(
        &self,
        server: &LkgServer,
        name: &str,
        platform: &str,
        is_static: bool,
    ) -> Result<Vec<String>, LkgError>;

    /// Whether the version described by `probe` is present.
    async fn exists(&self, server: &LkgServer, probe: &ExistsProbe<'_>) -> Result<bool, LkgError>;

    /// Resolved address for `probe` when it exists.
    ///
    /// The default substitutes the template after a successful [`exists`](Self::exists).
    /// Backends that address artifacts by identifiers rather than paths override it.
    async fn locate(
        &self,
        server: &LkgServer,
        probe: &ExistsProbe<'_>,
    ) -> Result<Option<String>, LkgError> {
        if !self.exists(server, probe).await? {
            return Ok(None);
        }
        resolve_address(&server.address, probe.name, probe.platform, Some(probe.version)).map(Some)
    }

    /// Completion-flag state of one version.
    async fn completion_state(
        &self,
        _server: &LkgServer,
        _name: &str,
        _platform: &str,
        _version: &str,
        _is_product: bool,
    ) -> Result<CompletionState, LkgError> {
        Ok(CompletionState::NoConvention)
    }

    /// Transfers the artifact at `address` into `destination`.
    async fn fetch(
        &self,
        server: &LkgServer,
        address: &str,
        destination: &Path,
        auth: Option<&str>,
    ) -> Result<(), LkgError>;
}

/// Maps server kinds to backend implementations.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<ServerKind, Arc<dyn ArtifactBackend>>,
    auth: Option<Arc<AuthProvider>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.backends.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("BackendRegistry").field("kinds", &kinds).finish()
    }
}

impl BackendRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The production backends for every kind.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn standard(settings: &Settings) -> Result<Self, LkgError> {
        let http = HttpClient::new()?;
        let auth = Arc::new(AuthProvider::new(settings.clone()));
        let mirror: Arc<dyn FileMirror> = Arc::new(LocalFileMirror);
        let staging = settings.cache_dir.join("downloads");

        Ok(Self::new()
            .with_auth(Arc::clone(&auth))
            .with_backend(Arc::new(FileShareBackend::file_share(Arc::clone(&mirror))))
            .with_backend(Arc::new(FileShareBackend::local(mirror)))
            .with_backend(Arc::new(RsyncBackend::new()))
            .with_backend(Arc::new(NuGetBackend::new(http.clone(), Arc::clone(&auth), staging.clone())))
            .with_backend(Arc::new(AzureArtifactBackend::new(http, auth, staging))))
    }

    /// Registers (or replaces) the backend for its kind.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn ArtifactBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    /// Sets the authentication provider used by [`BackendRegistry::auth_header`].
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Backend for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::UnknownServerKind`] when nothing is registered for it.
    pub fn get(&self, kind: ServerKind) -> Result<Arc<dyn ArtifactBackend>, LkgError> {
        self.backends.get(&kind).cloned().ok_or_else(|| LkgError::UnknownServerKind {
            kind: kind.to_string(),
        })
    }

    /// Authorization header for `server`, if the registry has a provider and the
    /// server needs one.
    ///
    /// # Errors
    ///
    /// Propagates [`LkgError::Authentication`] from the provider chain.
    pub async fn auth_header(&self, server: &LkgServer) -> Result<Option<String>, LkgError> {
        match &self.auth {
            Some(auth) => auth.header_for(server).await,
            None => Ok(None),
        }
    }
}
