//! The `lkg.toml` strategy file and the catalog built from it.

use super::{Settings, expand_path};
use crate::core::LkgError;
use crate::source::{CredentialProvider, LkgServer, LkgSource, ServerKind, SourceKind};
use crate::version::Version;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One `[servers.<name>]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Backend kind name or index
    pub kind: String,
    /// Address template
    pub address: String,
    /// Overrides the `$(version)`-token detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versioned: Option<bool>,
    /// Credential provider for authenticated backends
    #[serde(default)]
    pub credential_provider: CredentialProvider,
}

/// One `[sources.<name>]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// `dev` or `prg`
    #[serde(default)]
    pub kind: SourceKind,
    /// Server for `prg` sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prg_server: Option<String>,
    /// Server for `dev` sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_server: Option<String>,
    /// Pinned version or wildcard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Platform restriction
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
    /// Primary source this one is matched against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_lkg: Option<String>,
    /// Requirement applied when matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_range: Option<String>,
}

/// The `[settings]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Cache root; `~` is expanded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
    /// Retry budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// Parsed `lkg.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LkgConfig {
    /// Base URL of the BDF server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bdf_server: Option<String>,
    /// Servers by name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Sources by name
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
    /// Secrets for the `token` credential provider, keyed by server name
    #[serde(default, skip_serializing)]
    pub tokens: BTreeMap<String, String>,
    /// Settings that the environment may override
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(skip)]
    path: PathBuf,
}

impl LkgConfig {
    /// Parses TOML text. `origin` is used in error locations.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::TomlError`] for invalid TOML and [`LkgError::ConfigError`]
    /// for a file that parses but fails [`LkgConfig::validate`].
    pub fn parse(content: &str, origin: &Path) -> Result<Self, LkgError> {
        let mut config: Self = toml::from_str(content)?;
        config.path = origin.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML or fails validation.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read LKG configuration from {}", path.display()))?;

        Self::parse(&content, path)
            .with_context(|| format!("Failed to load LKG configuration from {}", path.display()))
    }

    fn location(&self, field: &str) -> String {
        if self.path.as_os_str().is_empty() {
            field.to_string()
        } else {
            format!("{}: {}", self.path.display(), field)
        }
    }

    /// Checks cross references and required fields.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ConfigError`] naming the file and field at fault, or
    /// [`LkgError::UnknownServerKind`] for an unrecognized server kind.
    pub fn validate(&self) -> Result<(), LkgError> {
        for (name, server) in &self.servers {
            server.kind.parse::<ServerKind>()?;
            if server.address.trim().is_empty() {
                return Err(LkgError::config(
                    self.location(&format!("servers.{name}.address")),
                    "address must not be empty",
                ));
            }
            if server.credential_provider == CredentialProvider::Token
                && !self.tokens.keys().any(|k| k.eq_ignore_ascii_case(name))
            {
                return Err(LkgError::config(
                    self.location(&format!("servers.{name}.credential_provider")),
                    format!("provider 'token' requires tokens.{name}"),
                ));
            }
        }

        for (name, source) in &self.sources {
            let (field, server) = match source.kind {
                SourceKind::Prg => ("prg_server", source.prg_server.as_deref()),
                SourceKind::Dev => ("dev_server", source.dev_server.as_deref()),
            };
            if server.is_none() {
                return Err(LkgError::config(
                    self.location(&format!("sources.{name}.{field}")),
                    format!("a {} source needs {field}", source.kind),
                ));
            }
            for referenced in [source.prg_server.as_deref(), source.dev_server.as_deref()]
                .into_iter()
                .flatten()
            {
                if !self.servers.contains_key(referenced) {
                    return Err(LkgError::config(
                        self.location(&format!("sources.{name}")),
                        format!("unknown server '{referenced}'"),
                    ));
                }
            }
            if let Some(version) = &source.version {
                Version::parse(version).map_err(|_| {
                    LkgError::config(
                        self.location(&format!("sources.{name}.version")),
                        format!("invalid version '{version}'"),
                    )
                })?;
            }
            if let Some(primary) = &source.match_lkg {
                if !self.sources.contains_key(primary) {
                    return Err(LkgError::config(
                        self.location(&format!("sources.{name}.match_lkg")),
                        format!("unknown source '{primary}'"),
                    ));
                }
            }
            if let Some(range) = &source.version_range {
                crate::version::VersionRange::parse(range).map_err(|_| {
                    LkgError::config(
                        self.location(&format!("sources.{name}.version_range")),
                        format!("invalid version range '{range}'"),
                    )
                })?;
            }
        }

        Ok(())
    }

    /// Layers file settings and tokens under the environment-derived `settings`.
    ///
    /// Environment values win: the file only fills in what the environment left at
    /// its default.
    #[must_use]
    pub fn apply_settings(&self, mut settings: Settings, cache_dir_from_env: bool) -> Settings {
        if !cache_dir_from_env {
            if let Some(dir) = &self.settings.cache_dir {
                settings.cache_dir = expand_path(dir);
            }
        }
        if settings.retry_attempts == crate::constants::DEFAULT_RETRY_ATTEMPTS {
            if let Some(retries) = self.settings.retries.filter(|n| *n > 0) {
                settings.retry_attempts = retries;
            }
        }
        for (server, token) in &self.tokens {
            settings.tokens.entry(server.clone()).or_insert_with(|| token.clone());
        }
        settings
    }

    /// Builds the catalog of servers and sources.
    ///
    /// # Errors
    ///
    /// Propagates validation failures.
    pub fn build_catalog(&self) -> Result<LkgCatalog, LkgError> {
        self.validate()?;
        let mut catalog = LkgCatalog::new(self.bdf_server.clone());

        for (name, cfg) in &self.servers {
            let kind: ServerKind = cfg.kind.parse()?;
            let mut server = LkgServer::new(name, kind, cfg.address.trim())
                .with_credential_provider(cfg.credential_provider);
            if let Some(versioned) = cfg.versioned {
                server.versioned = versioned;
            }
            catalog.insert_server(server);
        }

        for (name, cfg) in &self.sources {
            let mut source = LkgSource::new(name, cfg.prg_server.clone().unwrap_or_default());
            source.kind = cfg.kind;
            source.prg_server = cfg.prg_server.clone();
            source.dev_server = cfg.dev_server.clone();
            source.platforms = cfg.platforms.clone();
            source.match_lkg = cfg.match_lkg.clone();
            source.version_range = cfg.version_range.clone();
            if let Some(version) = &cfg.version {
                source = source.with_version(Version::parse(version)?);
            }
            catalog.insert_source(source);
        }

        Ok(catalog)
    }
}

/// Servers and sources ready for resolution, looked up case-insensitively.
#[derive(Debug, Default)]
pub struct LkgCatalog {
    /// Base URL of the BDF server
    pub bdf_server: Option<String>,
    servers: HashMap<String, LkgServer>,
    sources: HashMap<String, Arc<LkgSource>>,
}

impl LkgCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new(bdf_server: Option<String>) -> Self {
        Self {
            bdf_server,
            servers: HashMap::new(),
            sources: HashMap::new(),
        }
    }

    /// Adds or replaces a server.
    pub fn insert_server(&mut self, server: LkgServer) {
        self.servers.insert(server.name.to_lowercase(), server);
    }

    /// Adds or replaces a source.
    pub fn insert_source(&mut self, source: LkgSource) -> Arc<LkgSource> {
        let source = Arc::new(source);
        self.sources.insert(source.name.to_lowercase(), Arc::clone(&source));
        source
    }

    /// Looks up a server.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ConfigError`] for an unknown name.
    pub fn server(&self, name: &str) -> Result<&LkgServer, LkgError> {
        self.servers
            .get(&name.to_lowercase())
            .ok_or_else(|| LkgError::config(format!("servers.{name}"), "no such server"))
    }

    /// Looks up a source.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ConfigError`] for an unknown name.
    pub fn source(&self, name: &str) -> Result<Arc<LkgSource>, LkgError> {
        self.sources
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| LkgError::config(format!("sources.{name}"), "no such LKG source"))
    }

    /// The server a source uses for its kind.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ConfigError`] when the source has no server for its kind or
    /// the server is unknown.
    pub fn server_for(&self, source: &LkgSource) -> Result<&LkgServer, LkgError> {
        self.server(source.server_name()?)
    }

    /// Source names in no particular order.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.values().map(|s| s.name.as_str())
    }
}
