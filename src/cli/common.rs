//! Shared plumbing for commands that resolve LKGs.

use crate::backend::{BackendRegistry, HttpClient};
use crate::bdf::{BdfCache, BdfServer, HttpBdfServer};
use crate::config::{CACHE_DIR_ENV, LkgConfig, Settings};
use crate::download::DownloadExecutor;
use crate::resolver::{LkgDownloadInfo, LkgRequest, LkgResolver, PartRef};
use crate::utils::RetryPolicy;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Arguments naming the part that consumes an LKG.
#[derive(Debug, Clone, Args)]
pub struct RequestArgs {
    /// LKG source name
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Target platform
    #[arg(short, long)]
    pub platform: String,

    /// Build context (part file) that needs the dependency
    #[arg(long, value_name = "PART_FILE")]
    pub context: String,

    /// Part name inside the build context
    #[arg(long)]
    pub part: String,

    /// Build context of the consuming part, for sub-parts pulled transitively
    #[arg(long, value_name = "PART_FILE", requires = "parent_part")]
    pub parent_context: Option<String>,

    /// Part name of the consuming part
    #[arg(long, requires = "parent_context")]
    pub parent_part: Option<String>,

    /// Look the context up in the static tree under this directory
    #[arg(long, value_name = "DIR")]
    pub static_dir: Option<String>,

    /// Request product (rather than non-product) output
    #[arg(long)]
    pub product: bool,
}

impl RequestArgs {
    /// The resolver request these arguments describe.
    #[must_use]
    pub fn to_request(&self) -> LkgRequest {
        let mut request = LkgRequest::new(&self.source, &self.platform, &self.context, &self.part).product(self.product);
        if let Some(dir) = &self.static_dir {
            request = request.with_static_context(dir);
        }
        if let (Some(context), Some(part)) = (&self.parent_context, &self.parent_part) {
            request = request.with_parent(PartRef::new(context, part));
        }
        request
    }
}

/// Serializable view of a resolution for `--format json`.
#[derive(Debug, Serialize)]
pub struct ResolvedView<'a> {
    /// Name the artifact is published under
    pub name: &'a str,
    /// Resolved version
    pub version: String,
    /// Concrete address
    pub address: &'a str,
    /// Backend kind
    pub server_kind: &'static str,
    /// Server the artifact was found on
    pub server: &'a str,
    /// Address template with name and version filled in
    pub server_url: &'a str,
}

impl<'a> From<&'a LkgDownloadInfo> for ResolvedView<'a> {
    fn from(info: &'a LkgDownloadInfo) -> Self {
        Self {
            name: &info.name,
            version: info.version.to_string(),
            address: &info.address,
            server_kind: info.server_kind.as_str(),
            server: &info.server.name,
            server_url: &info.server_url,
        }
    }
}

/// Environment settings layered with the configuration file, when one exists.
///
/// # Errors
///
/// Fails when the cache directory cannot be determined or an existing file does
/// not load.
pub async fn load_settings(config_path: &Path) -> Result<Settings> {
    let settings = Settings::from_env()?;
    if !config_path.exists() {
        debug!("No configuration at {}, using environment settings", config_path.display());
        return Ok(settings);
    }
    let config = LkgConfig::load_from(config_path).await?;
    Ok(config.apply_settings(settings, std::env::var_os(CACHE_DIR_ENV).is_some()))
}

/// A resolver wired to the production backends and BDF server.
pub struct LkgContext {
    /// Effective settings
    pub settings: Arc<Settings>,
    /// The resolver
    pub resolver: LkgResolver,
}

impl LkgContext {
    /// Loads `config_path` and builds the resolver.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is missing or invalid, or the HTTP client
    /// cannot be built.
    pub async fn load(config_path: &Path) -> Result<Self> {
        let config = LkgConfig::load_from(config_path).await?;
        let settings = Arc::new(
            config.apply_settings(Settings::from_env()?, std::env::var_os(CACHE_DIR_ENV).is_some()),
        );
        let catalog = Arc::new(config.build_catalog()?);
        let backends = BackendRegistry::standard(&settings).context("Failed to set up LKG backends")?;

        let bdf_server: Option<Arc<dyn BdfServer>> = match &catalog.bdf_server {
            Some(base) => Some(Arc::new(HttpBdfServer::new(base, HttpClient::new()?))),
            None => None,
        };
        let bdfs = Arc::new(
            BdfCache::new(&settings.cache_dir, bdf_server)
                .with_retry(RetryPolicy::with_attempts(settings.retry_attempts)),
        );

        let resolver = LkgResolver::new(catalog, Arc::clone(&settings), backends, bdfs);
        Ok(Self {
            settings,
            resolver,
        })
    }

    /// A download executor sharing the resolver's backends.
    #[must_use]
    pub fn download_executor(&self) -> DownloadExecutor {
        DownloadExecutor::new(
            self.resolver.backends().clone(),
            RetryPolicy::with_attempts(self.settings.retry_attempts),
        )
    }
}
