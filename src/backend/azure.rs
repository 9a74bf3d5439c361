//! Azure DevOps pipeline build-artifact backend.
//!
//! Server addresses look like
//! `https://dev.azure.com/<org>/<project>?definition=<id or name>&artifact=<artifact>`,
//! where the artifact may use `$(name)` and `$(platform)`. A version is a build
//! number, so existence is a chain of REST lookups rather than a path check:
//!
//! ```text
//! definition name -> definition id          _apis/build/definitions       5.1
//! build number    -> build id               _apis/build/builds            5.1
//! artifact name   -> container + zip URL    _apis/build/builds/{id}/...   5.1
//! static context  -> container item         _apis/resources/Containers    6.1-preview.1
//! ```
//!
//! The zip payload wraps the tree in one folder named after the artifact; it is
//! stripped on extraction.

use super::auth::AuthProvider;
use super::http::HttpClient;
use super::template::resolve_address;
use super::{ArtifactBackend, ExistsProbe};
use crate::constants::{ADO_API_ARTIFACTS, ADO_API_BUILDS, ADO_API_CONTAINERS, ADO_API_DEFINITIONS, STATIC_SUBDIR};
use crate::core::LkgError;
use crate::provenance::AdoProvenance;
use crate::source::{LkgServer, ServerKind};
use crate::utils::{extract_zip, remove_dir_all, validate_zip};
use crate::version::{Version, sort_descending};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Url;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// The parts of an Azure build-artifact server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdoAddress {
    /// Organization
    pub organization: String,
    /// Project
    pub project: String,
    /// Definition id or name
    pub definition: String,
    /// Artifact name (after token substitution)
    pub artifact: String,
}

impl AdoAddress {
    /// Parses a server address for one logical name and platform.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ConfigError`] when the URL lacks the organization,
    /// project, `definition` or `artifact` parts, and
    /// [`LkgError::UnresolvedTemplate`] when the artifact keeps unknown tokens.
    pub fn parse(server: &LkgServer, name: &str, platform: &str) -> Result<Self, LkgError> {
        let invalid = |message: &str| LkgError::config(format!("servers.{}.address", server.name), message);

        let url = Url::parse(&server.address).map_err(|e| invalid(&e.to_string()))?;
        let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());
        let organization = segments.next().ok_or_else(|| invalid("missing organization"))?.to_string();
        let project = segments.next().ok_or_else(|| invalid("missing project"))?.to_string();

        let query = |key: &str| url.query_pairs().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.into_owned());
        let definition = query("definition").ok_or_else(|| invalid("missing definition= parameter"))?;
        let artifact_template = query("artifact").ok_or_else(|| invalid("missing artifact= parameter"))?;
        let artifact = resolve_address(&artifact_template, name, platform, None)?;

        Ok(Self {
            organization,
            project,
            definition,
            artifact,
        })
    }

    fn api(&self, path: &str) -> String {
        format!("https://dev.azure.com/{}/{}/_apis/{}", self.organization, self.project, path)
    }

    fn key(&self, extra: &str) -> String {
        format!("{}/{}/{}/{}", self.organization, self.project, self.definition, extra).to_lowercase()
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DefinitionRef {
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildRef {
    id: u64,
    build_number: String,
}

#[derive(Debug, Deserialize)]
struct ArtifactResponse {
    resource: ArtifactResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactResource {
    #[serde(default)]
    data: String,
    download_url: String,
}

#[derive(Debug, Deserialize)]
struct ContainerItem {
    path: String,
}

/// A build artifact located for one version.
#[derive(Debug, Clone)]
struct LocatedArtifact {
    download_url: String,
    container: Option<(u64, String)>,
    provenance: AdoProvenance,
}

/// Parses `#/<containerId>/<path>` from an artifact resource.
fn parse_container_data(data: &str) -> Option<(u64, String)> {
    let rest = data.strip_prefix("#/")?;
    let (id, path) = rest.split_once('/')?;
    Some((id.parse().ok()?, path.to_string()))
}

/// Backend for [`ServerKind::AzureBuildArtifact`].
pub struct AzureArtifactBackend {
    http: HttpClient,
    auth: Arc<AuthProvider>,
    staging_dir: PathBuf,
    definitions: DashMap<String, u64>,
    builds: DashMap<String, Option<BuildRef>>,
    artifacts: DashMap<String, Option<LocatedArtifact>>,
    by_download_url: DashMap<String, AdoProvenance>,
}

impl AzureArtifactBackend {
    /// Creates a backend that stages zips under `staging_dir`.
    #[must_use]
    pub fn new(http: HttpClient, auth: Arc<AuthProvider>, staging_dir: PathBuf) -> Self {
        Self {
            http,
            auth,
            staging_dir,
            definitions: DashMap::new(),
            builds: DashMap::new(),
            artifacts: DashMap::new(),
            by_download_url: DashMap::new(),
        }
    }

    async fn definition_id(&self, server: &LkgServer, address: &AdoAddress) -> Result<u64, LkgError> {
        if let Ok(id) = address.definition.parse::<u64>() {
            return Ok(id);
        }
        let key = address.key("");
        if let Some(id) = self.definitions.get(&key) {
            return Ok(*id);
        }

        let url = address.api(&format!(
            "build/definitions?name={}&api-version={ADO_API_DEFINITIONS}",
            address.definition
        ));
        let auth = self.auth.header_for(server).await?;
        let response: ListResponse<DefinitionRef> = self.http.get_json(&url, auth.as_deref()).await?;
        let id = response.value.first().map(|d| d.id).ok_or_else(|| {
            LkgError::config(
                format!("servers.{}.address", server.name),
                format!("no build definition named '{}'", address.definition),
            )
        })?;
        self.definitions.insert(key, id);
        Ok(id)
    }

    async fn build_for(&self, server: &LkgServer, address: &AdoAddress, version: &str) -> Result<Option<BuildRef>, LkgError> {
        let key = address.key(version);
        if let Some(found) = self.builds.get(&key) {
            return Ok(found.clone());
        }

        let definition = self.definition_id(server, address).await?;
        let auth = self.auth.header_for(server).await?;
        let mut candidates = vec![version.to_string()];
        if version.contains('-') {
            candidates.push(version.replace('-', "."));
        }

        let mut found = None;
        for build_number in candidates {
            let url = address.api(&format!(
                "build/builds?definitions={definition}&buildNumber={build_number}&api-version={ADO_API_BUILDS}"
            ));
            let response: ListResponse<BuildRef> = self.http.get_json(&url, auth.as_deref()).await?;
            if let Some(build) = response.value.into_iter().next() {
                found = Some(build);
                break;
            }
        }

        debug!("Build {} of definition {}: {:?}", version, definition, found.as_ref().map(|b| b.id));
        self.builds.insert(key, found.clone());
        Ok(found)
    }

    async fn artifact_for(
        &self,
        server: &LkgServer,
        address: &AdoAddress,
        version: &str,
    ) -> Result<Option<LocatedArtifact>, LkgError> {
        let key = address.key(&format!("{version}/{}", address.artifact));
        if let Some(found) = self.artifacts.get(&key) {
            return Ok(found.clone());
        }

        let Some(build) = self.build_for(server, address, version).await? else {
            return Ok(None);
        };
        let definition_id = self.definition_id(server, address).await?;
        let url = address.api(&format!(
            "build/builds/{}/artifacts?artifactName={}&api-version={ADO_API_ARTIFACTS}",
            build.id, address.artifact
        ));
        let auth = self.auth.header_for(server).await?;
        let located = match self.http.get_json::<ArtifactResponse>(&url, auth.as_deref()).await {
            Ok(response) => Some(LocatedArtifact {
                container: parse_container_data(&response.resource.data),
                download_url: response.resource.download_url,
                provenance: AdoProvenance {
                    artifact: address.artifact.clone(),
                    build_id: build.id,
                    definition_id,
                    project: address.project.clone(),
                    organization: address.organization.clone(),
                },
            }),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(artifact) = &located {
            self.by_download_url.insert(artifact.download_url.clone(), artifact.provenance.clone());
        }
        self.artifacts.insert(key, located.clone());
        Ok(located)
    }

    async fn container_has(
        &self,
        server: &LkgServer,
        address: &AdoAddress,
        container: &(u64, String),
        item_path: &str,
    ) -> Result<bool, LkgError> {
        let (id, root) = container;
        let wanted = format!("{root}/{item_path}");
        let url = format!(
            "https://dev.azure.com/{}/_apis/resources/Containers/{id}?itemPath={wanted}&api-version={ADO_API_CONTAINERS}",
            address.organization
        );
        let auth = self.auth.header_for(server).await?;
        let items: ListResponse<ContainerItem> = match self.http.get_json(&url, auth.as_deref()).await {
            Ok(items) => items,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(items.value.iter().any(|item| item.path.eq_ignore_ascii_case(&wanted)))
    }

    fn staging_path(&self, address: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(address.as_bytes()));
        self.staging_dir.join(format!("{}.zip", &digest[..16]))
    }
}

#[async_trait]
impl ArtifactBackend for AzureArtifactBackend {
    fn kind(&self) -> ServerKind {
        ServerKind::AzureBuildArtifact
    }

    async fn list_versions(
        &self,
        server: &LkgServer,
        name: &str,
        platform: &str,
        _is_static: bool,
    ) -> Result<Vec<String>, LkgError> {
        let address = AdoAddress::parse(server, name, platform)?;
        let definition = self.definition_id(server, &address).await?;
        let url = address.api(&format!(
            "build/builds?definitions={definition}&resultFilter=succeeded&statusFilter=completed&api-version={ADO_API_BUILDS}"
        ));
        let auth = self.auth.header_for(server).await?;
        let response: ListResponse<BuildRef> = self.http.get_json(&url, auth.as_deref()).await?;

        let mut versions: Vec<String> = response
            .value
            .into_iter()
            .map(|b| b.build_number)
            .filter(|n| Version::parse(n).is_ok())
            .collect();
        sort_descending(&mut versions);
        Ok(versions)
    }

    async fn exists(&self, server: &LkgServer, probe: &ExistsProbe<'_>) -> Result<bool, LkgError> {
        let address = AdoAddress::parse(server, probe.name, probe.platform)?;
        let Some(artifact) = self.artifact_for(server, &address, probe.version).await? else {
            return Ok(false);
        };
        if !probe.is_static {
            return Ok(true);
        }

        let Some(container) = &artifact.container else {
            return Ok(false);
        };
        let item = match probe.context_dir {
            Some(ctx) => format!("{STATIC_SUBDIR}/{ctx}"),
            None => STATIC_SUBDIR.to_string(),
        };
        self.container_has(server, &address, container, &item).await
    }

    async fn locate(&self, server: &LkgServer, probe: &ExistsProbe<'_>) -> Result<Option<String>, LkgError> {
        if !self.exists(server, probe).await? {
            return Ok(None);
        }
        let address = AdoAddress::parse(server, probe.name, probe.platform)?;
        Ok(self.artifact_for(server, &address, probe.version).await?.map(|a| a.download_url))
    }

    async fn fetch(
        &self,
        _server: &LkgServer,
        address: &str,
        destination: &Path,
        auth: Option<&str>,
    ) -> Result<(), LkgError> {
        let provenance = self.by_download_url.get(address).map(|p| p.clone());
        let sidecar = AdoProvenance::path_for(destination);
        if let Some(wanted) = &provenance {
            let on_disk = AdoProvenance::read(&sidecar).await?;
            if on_disk.as_ref() == Some(wanted) && tokio::fs::try_exists(destination).await? {
                info!("Build artifact {} is up to date in {}", wanted.artifact, destination.display());
                return Ok(());
            }
        }

        let archive = self.staging_path(address);
        self.http.download(address, &archive, auth).await?;

        let dest = destination.to_path_buf();
        let staged = archive.clone();
        let result = tokio::task::spawn_blocking(move || {
            validate_zip(&staged)?;
            remove_dir_all(&dest).map_err(|e| LkgError::other(format!("{e:#}")))?;
            extract_zip(&staged, &dest, true)
        })
        .await
        .map_err(LkgError::other)?;

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            debug!("Could not remove staged archive {}: {}", archive.display(), e);
        }
        let files = result?;
        info!("Extracted {} files into {}", files, destination.display());

        if let Some(record) = provenance {
            record.write(&sidecar).await?;
        }
        Ok(())
    }
}
