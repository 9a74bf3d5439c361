//! Authentication header selection for authenticated backends.
//!
//! The chain is evaluated once per server and cached:
//!
//! 1. `BB_AZURE_PAT`, sent as basic auth
//! 2. `BB_USE_AZ_CLI_AUTH`, which forces an Azure CLI access token
//! 3. the server's [`CredentialProvider`]:
//!    - `basic`: no header
//!    - `token`: the secret from `[tokens]`, sent as basic auth
//!    - `az` / `auto`: Azure CLI access token
//!    - `mcp`: the platform credential helper (`git credential fill`)
//!
//! The order matters: CI agents set a PAT precisely so that nothing further down the
//! chain can prompt.

use crate::cache::CacheLock;
use crate::config::Settings;
use crate::constants::{AZURE_DEVOPS_RESOURCE_ID, token_cache_lock_timeout};
use crate::core::LkgError;
use crate::source::{CredentialProvider, LkgServer};
use crate::utils::atomic_write;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Lock name guarding the Azure CLI token cache across processes.
const TOKEN_CACHE_LOCK: &str = "az-token-cache";

/// Resolves and caches `Authorization` header values per server.
#[derive(Debug)]
pub struct AuthProvider {
    settings: Settings,
    headers: DashMap<String, Option<String>>,
}

impl AuthProvider {
    /// Creates a provider over the given settings.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            headers: DashMap::new(),
        }
    }

    /// `Authorization` header value for `server`, or `None` when it needs none.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::Authentication`] when the selected mechanism cannot
    /// produce a credential.
    pub async fn header_for(&self, server: &LkgServer) -> Result<Option<String>, LkgError> {
        let key = server.name.to_lowercase();
        if let Some(cached) = self.headers.get(&key) {
            return Ok(cached.value().clone());
        }

        let header = self.select(server).await?;
        self.headers.insert(key, header.clone());
        Ok(header)
    }

    async fn select(&self, server: &LkgServer) -> Result<Option<String>, LkgError> {
        if let Some(pat) = &self.settings.azure_pat {
            debug!("Using personal access token for {}", server.name);
            return Ok(Some(basic_header(pat)));
        }
        if self.settings.force_az_cli_auth {
            debug!("Azure CLI authentication forced for {}", server.name);
            return self.az_cli_header(server).await.map(Some);
        }

        match server.credential_provider {
            CredentialProvider::Basic => Ok(None),
            CredentialProvider::Token => {
                let token = self.settings.token_for(&server.name).ok_or_else(|| LkgError::Authentication {
                    url: server.address.clone(),
                    reason: format!("no token supplied for server {}", server.name),
                })?;
                Ok(Some(basic_header(token)))
            }
            CredentialProvider::Az | CredentialProvider::Auto => self.az_cli_header(server).await.map(Some),
            CredentialProvider::Mcp => credential_helper_header(server).await.map(Some),
        }
    }

    async fn az_cli_header(&self, server: &LkgServer) -> Result<String, LkgError> {
        match az_access_token(&server.address).await {
            Ok(token) => Ok(format!("Bearer {token}")),
            Err(AzFailure::CorruptCache(reason)) => {
                warn!("Azure CLI token cache looks corrupt: {}", reason);
                let repaired = match azure_token_cache_path() {
                    Some(path) => repair_token_cache(&path, &self.settings.cache_dir).await?,
                    None => false,
                };
                if !repaired {
                    return Err(LkgError::Authentication {
                        url: server.address.clone(),
                        reason,
                    });
                }
                info!("Repaired Azure CLI token cache, retrying");
                az_access_token(&server.address).await.map(|t| format!("Bearer {t}")).map_err(|e| e.into_error(server))
            }
            Err(other) => Err(other.into_error(server)),
        }
    }
}

/// `Basic` header for a PAT-style secret with an empty user name.
#[must_use]
pub fn basic_header(secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!(":{secret}")))
}

enum AzFailure {
    CorruptCache(String),
    Failed(String),
}

impl AzFailure {
    fn into_error(self, server: &LkgServer) -> LkgError {
        let (Self::CorruptCache(reason) | Self::Failed(reason)) = self;
        LkgError::Authentication {
            url: server.address.clone(),
            reason,
        }
    }
}

async fn az_access_token(address: &str) -> Result<String, AzFailure> {
    let az = which::which("az").map_err(|_| AzFailure::Failed("Azure CLI (az) not found on PATH".into()))?;
    debug!("Requesting Azure DevOps token from {} for {}", az.display(), address);

    let output = Command::new(az)
        .args(["account", "get-access-token", "--resource", AZURE_DEVOPS_RESOURCE_ID])
        .args(["--query", "accessToken", "--output", "tsv"])
        .output()
        .await
        .map_err(|e| AzFailure::Failed(e.to_string()))?;

    if output.status.success() {
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(AzFailure::Failed("az returned an empty access token".into()));
        }
        return Ok(token);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if looks_like_corrupt_cache(&stderr) {
        Err(AzFailure::CorruptCache(stderr))
    } else {
        Err(AzFailure::Failed(stderr))
    }
}

fn looks_like_corrupt_cache(stderr: &str) -> bool {
    ["JSONDecodeError", "Extra data", "Expecting value", "Unterminated string"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

fn azure_token_cache_path() -> Option<PathBuf> {
    let config_dir = std::env::var_os("AZURE_CONFIG_DIR")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".azure")))?;
    Some(config_dir.join("accessTokens.json"))
}

/// Repairs a token cache that a crashed writer left with trailing garbage.
///
/// The cache is a JSON array; the content is cut after the last `]` and kept only
/// if that yields valid JSON. Runs under a cross-process lock with a bounded wait.
/// Returns `true` when the file was rewritten.
///
/// # Errors
///
/// Returns [`LkgError::Authentication`] when the lock cannot be taken in time and
/// I/O errors when the file cannot be read or rewritten.
pub async fn repair_token_cache(path: &Path, cache_dir: &Path) -> Result<bool, LkgError> {
    let _lock = CacheLock::acquire_with_timeout(cache_dir, TOKEN_CACHE_LOCK, token_cache_lock_timeout())
        .await
        .map_err(|e| LkgError::Authentication {
            url: path.display().to_string(),
            reason: format!("{e:#}"),
        })?;

    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if serde_json::from_str::<serde_json::Value>(&content).is_ok() {
        debug!("Token cache {} is valid, nothing to repair", path.display());
        return Ok(false);
    }

    let Some(end) = content.rfind(']') else {
        return Ok(false);
    };
    let candidate = &content[..=end];
    if serde_json::from_str::<serde_json::Value>(candidate).is_err() {
        warn!("Token cache {} cannot be repaired by truncation", path.display());
        return Ok(false);
    }

    atomic_write(path, candidate.as_bytes()).map_err(|e| LkgError::other(format!("{e:#}")))?;
    info!("Truncated token cache {} to {} bytes", path.display(), candidate.len());
    Ok(true)
}

async fn credential_helper_header(server: &LkgServer) -> Result<String, LkgError> {
    let auth_error = |reason: String| LkgError::Authentication {
        url: server.address.clone(),
        reason,
    };
    let url = reqwest::Url::parse(&server.address).map_err(|e| auth_error(e.to_string()))?;
    let host = url.host_str().ok_or_else(|| auth_error("address has no host".into()))?;

    let mut child = Command::new("git")
        .args(["credential", "fill"])
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| auth_error(format!("cannot start credential helper: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        let request = format!("protocol={}\nhost={}\n\n", url.scheme(), host);
        stdin.write_all(request.as_bytes()).await?;
    }
    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(auth_error(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    let (user, password) = parse_credential_output(&String::from_utf8_lossy(&output.stdout));
    let password = password.ok_or_else(|| auth_error("credential helper returned no password".into()))?;
    let pair = format!("{}:{}", user.unwrap_or_default(), password);
    Ok(format!("Basic {}", STANDARD.encode(pair)))
}

fn parse_credential_output(stdout: &str) -> (Option<String>, Option<String>) {
    let mut user = None;
    let mut password = None;
    for line in stdout.lines() {
        if let Some(v) = line.strip_prefix("username=") {
            user = Some(v.to_string());
        } else if let Some(v) = line.strip_prefix("password=") {
            password = Some(v.to_string());
        }
    }
    (user, password)
}
