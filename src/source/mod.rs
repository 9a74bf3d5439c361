//! LKG sources and the servers that host them.
//!
//! An [`LkgSource`] is a named dependency request ("give me `Foo` for `winx64`"). It
//! points at one [`LkgServer`] per [`SourceKind`], optionally pins a version, and may
//! be restricted to a set of platforms.
//!
//! # Locking
//!
//! Each source carries a [`tokio::sync::Mutex`] around its mutable [`SourceState`].
//! The resolver holds that lock for the whole of one resolution, which is what makes
//! a wildcard version lock in to a concrete one exactly once. Distinct sources
//! resolve fully in parallel.
//!
//! # Servers Discovered From BDFs
//!
//! While recursing through build descriptions the resolver meets upstream sources
//! that only exist as a recorded `(ServerType, ServerAddress)` pair.
//! [`LkgServer::from_bdf`] turns such a pair into a synthetic server that is never
//! persisted.

use crate::config::Settings;
use crate::core::LkgError;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::{Mutex, MutexGuard};

/// Substitution token for the logical artifact name.
pub const NAME_TOKEN: &str = "$(name)";
/// Substitution token for the target platform.
pub const PLATFORM_TOKEN: &str = "$(platform)";
/// Substitution token for the version directory.
pub const VERSION_TOKEN: &str = "$(version)";

/// Kind of backing store behind a server.
///
/// The discriminant is the integer written to provenance records and BDFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// UNC or mounted file share
    #[serde(alias = "share")]
    FileShare = 0,
    /// rsync daemon tree
    Rsync = 1,
    /// Local directory linked into place
    Local = 2,
    /// NuGet V2 feed
    NuGet = 3,
    /// Azure DevOps pipeline build artifact
    AzureBuildArtifact = 4,
}

impl ServerKind {
    /// All kinds in index order.
    pub const ALL: [Self; 5] =
        [Self::FileShare, Self::Rsync, Self::Local, Self::NuGet, Self::AzureBuildArtifact];

    /// Integer index used on disk.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// Inverse of [`ServerKind::index`].
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::UnknownServerKind`] for out-of-range values.
    pub fn from_index(index: u8) -> Result<Self, LkgError> {
        Self::ALL.get(usize::from(index)).copied().ok_or_else(|| LkgError::UnknownServerKind {
            kind: index.to_string(),
        })
    }

    /// Lower-case name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileShare => "fileshare",
            Self::Rsync => "rsync",
            Self::Local => "local",
            Self::NuGet => "nuget",
            Self::AzureBuildArtifact => "azurebuildartifact",
        }
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerKind {
    type Err = LkgError;

    /// Accepts either the kind name (case-insensitive) or its integer index.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            return Self::from_index(index);
        }
        Self::ALL.into_iter().find(|k| k.as_str().eq_ignore_ascii_case(trimmed)).ok_or_else(|| {
            LkgError::UnknownServerKind {
                kind: s.to_string(),
            }
        })
    }
}

/// Which server of a source is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Developer builds
    Dev,
    /// Product (PRG) builds
    #[default]
    Prg,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dev => f.write_str("dev"),
            Self::Prg => f.write_str("prg"),
        }
    }
}

/// How a server obtains credentials when no PAT or forced CLI auth applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialProvider {
    /// No authentication header
    #[default]
    Basic,
    /// Strategy-supplied secret from `[tokens]`
    Token,
    /// Access token from the Azure CLI
    Az,
    /// Same as `az`; kept as a separate spelling for feed configurations
    Auto,
    /// Platform credential helper
    Mcp,
}

/// A named backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LkgServer {
    /// Server name (configuration key, or the source name for synthetic servers)
    pub name: String,
    /// Backend kind
    pub kind: ServerKind,
    /// Address template with `$(name)`, `$(platform)` and `$(version)` tokens
    pub address: String,
    /// Whether the address encodes a specific build per request
    pub versioned: bool,
    /// Credential selection for authenticated backends
    pub credential_provider: CredentialProvider,
    /// `true` when synthesized from a BDF rather than loaded from configuration
    pub synthetic: bool,
}

impl LkgServer {
    /// Creates a configured server. `versioned` is derived from the template.
    pub fn new(name: impl Into<String>, kind: ServerKind, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: name.into(),
            kind,
            versioned: address.contains(VERSION_TOKEN),
            address,
            credential_provider: CredentialProvider::default(),
            synthetic: false,
        }
    }

    /// Overrides the credential provider.
    #[must_use]
    pub const fn with_credential_provider(mut self, provider: CredentialProvider) -> Self {
        self.credential_provider = provider;
        self
    }

    /// Synthesizes a server from the `ServerType`/`ServerAddress` recorded in a BDF.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::UnknownServerKind`] for an unrecognized type and
    /// [`LkgError::ConfigError`] for an empty address.
    pub fn from_bdf(lkg_name: &str, server_type: &str, address: &str) -> Result<Self, LkgError> {
        let kind: ServerKind = server_type.parse()?;
        if address.trim().is_empty() {
            return Err(LkgError::config(
                format!("build description entry for {lkg_name}"),
                "ServerAddress is empty",
            ));
        }
        let mut server = Self::new(lkg_name, kind, address.trim());
        server.synthetic = true;
        Ok(server)
    }

    /// `true` when the address has a `$(version)` substitution point.
    #[must_use]
    pub fn has_version_token(&self) -> bool {
        self.address.contains(VERSION_TOKEN)
    }

    /// Whether enumerating versions is meaningful for this server.
    ///
    /// Package feeds and build pipelines are queried by identifier, so they always
    /// list; path-addressed servers only list when the address has a version token.
    #[must_use]
    pub fn lists_versions(&self) -> bool {
        matches!(self.kind, ServerKind::NuGet | ServerKind::AzureBuildArtifact) || self.has_version_token()
    }
}

/// Mutable per-source state guarded by the source lock.
#[derive(Debug, Default)]
pub struct SourceState {
    version: Option<Version>,
    resolved: bool,
}

impl SourceState {
    /// The current version requirement, `*` when none was configured.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version.unwrap_or_else(Version::unbound)
    }

    /// `true` once a concrete version has been locked in.
    #[must_use]
    pub fn is_locked_in(&self) -> bool {
        self.version.is_some_and(|v| v.is_concrete())
    }

    /// Locks in a version found while resolving.
    pub fn update_version(&mut self, version: Version) {
        if self.version != Some(version) {
            tracing::debug!("Locking version {} (was {:?})", version, self.version);
        }
        self.version = Some(version);
    }
}

/// A named dependency request.
#[derive(Debug)]
pub struct LkgSource {
    /// Logical name
    pub name: String,
    /// Which of the two servers is used
    pub kind: SourceKind,
    /// Server used for `prg` sources
    pub prg_server: Option<String>,
    /// Server used for `dev` sources
    pub dev_server: Option<String>,
    /// Platform restriction; empty means every platform
    pub platforms: Vec<String>,
    /// Name of a primary source this one must stay consistent with
    pub match_lkg: Option<String>,
    /// Version requirement checked when matching against `match_lkg`
    pub version_range: Option<String>,
    configured_version: Option<Version>,
    state: Mutex<SourceState>,
}

impl LkgSource {
    /// Creates a `prg` source served by `server`.
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Prg,
            prg_server: Some(server.into()),
            dev_server: None,
            platforms: Vec::new(),
            match_lkg: None,
            version_range: None,
            configured_version: None,
            state: Mutex::new(SourceState::default()),
        }
    }

    /// Pins or wildcards the configured version.
    #[must_use]
    pub fn with_version(mut self, version: Version) -> Self {
        self.configured_version = Some(version);
        self.state = Mutex::new(SourceState {
            version: Some(version),
            resolved: false,
        });
        self
    }

    /// Restricts the source to the given platforms.
    #[must_use]
    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    /// Version as configured, before overrides or lock-in.
    #[must_use]
    pub const fn configured_version(&self) -> Option<Version> {
        self.configured_version
    }

    /// Acquires the per-source lock for the duration of one resolution.
    pub async fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().await
    }

    /// Name of the server used for this source's kind.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ConfigError`] when no server is configured for the kind.
    pub fn server_name(&self) -> Result<&str, LkgError> {
        let server = match self.kind {
            SourceKind::Prg => self.prg_server.as_deref(),
            SourceKind::Dev => self.dev_server.as_deref(),
        };
        server.ok_or_else(|| {
            LkgError::config(
                format!("sources.{}", self.name),
                format!("no {}_server configured", self.kind),
            )
        })
    }

    /// Case-insensitive platform check. An empty restriction list allows everything.
    #[must_use]
    pub fn applies_to_platform(&self, platform: &str) -> bool {
        self.platforms.is_empty() || self.platforms.iter().any(|p| p.eq_ignore_ascii_case(platform))
    }

    /// Applies the `BB_LKGVERSION_<NAME>` override once and returns the current version.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::InvalidVersionFormat`] when the override cannot be parsed.
    pub async fn resolve_version(&self, settings: &Settings) -> Result<Version, LkgError> {
        let mut state = self.lock().await;
        Self::resolve_version_locked(&self.name, &mut state, settings)
    }

    /// Like [`LkgSource::resolve_version`] for callers already holding the lock.
    pub(crate) fn resolve_version_locked(
        name: &str,
        state: &mut SourceState,
        settings: &Settings,
    ) -> Result<Version, LkgError> {
        if !state.resolved {
            if let Some(text) = settings.version_override(name) {
                let version = Version::parse(text)?;
                tracing::info!("Using version {} for {} from environment override", version, name);
                state.version = Some(version);
            }
            state.resolved = true;
        }
        Ok(state.version())
    }

    /// Locks in `version` (takes the source lock).
    pub async fn update_version(&self, version: Version) {
        self.lock().await.update_version(version);
    }

    /// Snapshot of the current version requirement.
    pub async fn current_version(&self) -> Version {
        self.lock().await.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_server_kind_index_round_trip() {
        for kind in ServerKind::ALL {
            assert_eq!(ServerKind::from_index(kind.index()).unwrap(), kind);
            assert_eq!(kind.as_str().parse::<ServerKind>().unwrap(), kind);
        }
        assert_eq!("4".parse::<ServerKind>().unwrap(), ServerKind::AzureBuildArtifact);
        assert_eq!("FileShare".parse::<ServerKind>().unwrap(), ServerKind::FileShare);
        assert!(matches!(ServerKind::from_index(9), Err(LkgError::UnknownServerKind { .. })));
        assert!("ftp".parse::<ServerKind>().is_err());
    }

    #[test]
    fn test_server_from_bdf() {
        let server = LkgServer::from_bdf("Bar", "1", "rsync://host/lkgs/$(name)/$(version)").unwrap();
        assert_eq!(server.kind, ServerKind::Rsync);
        assert!(server.synthetic);
        assert!(server.versioned);
        assert!(LkgServer::from_bdf("Bar", "0", "  ").is_err());
        assert!(LkgServer::from_bdf("Bar", "17", "x").is_err());
    }

    #[test]
    fn test_server_name_per_kind() {
        let mut source = LkgSource::new("Foo", "main");
        assert_eq!(source.server_name().unwrap(), "main");
        source.kind = SourceKind::Dev;
        assert!(matches!(source.server_name(), Err(LkgError::ConfigError { .. })));
    }

    #[test]
    fn test_applies_to_platform() {
        let any = LkgSource::new("Foo", "main");
        assert!(any.applies_to_platform("linuxx64"));
        let restricted = LkgSource::new("Foo", "main").with_platforms(["WinX64"]);
        assert!(restricted.applies_to_platform("winx64"));
        assert!(!restricted.applies_to_platform("linuxx64"));
    }

    #[tokio::test]
    async fn test_resolve_version_applies_override_once() {
        let source = LkgSource::new("My.Lib", "main").with_version(Version::unbound());
        let settings = Settings {
            version_overrides: HashMap::from([("MY_LIB".to_string(), "2-0-0-1".to_string())]),
            ..Settings::default()
        };
        let resolved = source.resolve_version(&settings).await.unwrap();
        assert_eq!(resolved, Version::new(2, 0, 0, 1));

        source.update_version(Version::new(2, 0, 0, 7)).await;
        let again = source.resolve_version(&settings).await.unwrap();
        assert_eq!(again, Version::new(2, 0, 0, 7));
    }

    #[tokio::test]
    async fn test_update_version_locks_in() {
        let source = LkgSource::new("Foo", "main");
        assert!(source.current_version().await.is_wildcard());
        source.update_version(Version::new(1, 2, 3, 4)).await;
        assert!(source.lock().await.is_locked_in());
    }
}
