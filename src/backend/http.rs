//! Thin HTTP client shared by the NuGet, Azure DevOps and BDF-server clients.

use crate::constants::HTTP_REQUEST_TIMEOUT;
use crate::core::LkgError;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

/// Cloneable handle around a configured [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client with the standard request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::Transport`] when the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, LkgError> {
        let client = Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .user_agent(concat!("bblkg/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LkgError::transport("create HTTP client", e))?;
        Ok(Self {
            client,
        })
    }

    fn get(&self, url: &str, auth: Option<&str>) -> RequestBuilder {
        let request = self.client.get(url);
        match auth {
            Some(value) => request.header(header::AUTHORIZATION, value),
            None => request,
        }
    }

    async fn send(&self, url: &str, auth: Option<&str>) -> Result<Response, LkgError> {
        debug!("GET {}", url);
        let response = self.get(url, auth).send().await.map_err(|e| LkgError::transport(format!("GET {url}"), e))?;
        check_status(url, response.status())?;
        Ok(response)
    }

    /// Fetches `url` as text.
    ///
    /// # Errors
    ///
    /// See [`check_status`] for status mapping; network failures are
    /// [`LkgError::Transport`].
    pub async fn get_text(&self, url: &str, auth: Option<&str>) -> Result<String, LkgError> {
        self.send(url, auth).await?.text().await.map_err(|e| LkgError::transport(format!("read {url}"), e))
    }

    /// Fetches `url` and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// As [`HttpClient::get_text`], plus [`LkgError::JsonError`] for bad bodies.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, auth: Option<&str>) -> Result<T, LkgError> {
        let body = self.get_text(url, auth).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Downloads `url` into the file at `path`, replacing it.
    ///
    /// # Errors
    ///
    /// As [`HttpClient::get_text`], plus I/O errors writing `path`.
    pub async fn download(&self, url: &str, path: &Path, auth: Option<&str>) -> Result<u64, LkgError> {
        let bytes = self
            .send(url, auth)
            .await?
            .bytes()
            .await
            .map_err(|e| LkgError::transport(format!("download {url}"), e))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &bytes).await?;
        Ok(bytes.len() as u64)
    }
}

/// Maps a non-success status to the error taxonomy.
///
/// 401 and 403 become [`LkgError::Authentication`] so they are never retried; every
/// other failure is [`LkgError::HttpStatus`], whose retryability depends on the code.
///
/// # Errors
///
/// Returns an error for any status outside 2xx.
pub fn check_status(url: &str, status: StatusCode) -> Result<(), LkgError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(LkgError::Authentication {
            url: url.to_string(),
            reason: format!("server returned {status}"),
        }),
        _ => Err(LkgError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status_mapping() {
        assert!(check_status("u", StatusCode::OK).is_ok());

        let unauthorized = check_status("u", StatusCode::UNAUTHORIZED).unwrap_err();
        assert!(matches!(unauthorized, LkgError::Authentication { .. }));
        assert!(!unauthorized.is_retryable());

        let missing = check_status("u", StatusCode::NOT_FOUND).unwrap_err();
        assert!(missing.is_not_found());
        assert!(!missing.is_retryable());

        assert!(check_status("u", StatusCode::BAD_GATEWAY).unwrap_err().is_retryable());
    }
}
