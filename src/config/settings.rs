//! Process-wide settings read from the environment.

use crate::constants::DEFAULT_RETRY_ATTEMPTS;
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;

const RETRIES_ENV: &str = "BB_LKG_RETRIES";
const AZURE_PAT_ENV: &str = "BB_AZURE_PAT";
const FORCE_AZ_CLI_ENV: &str = "BB_USE_AZ_CLI_AUTH";
const ALLOW_PRERELEASE_ENV: &str = "BB_NUGET_ALLOW_PRERELEASE_ANYWHERE";
const VERSION_OVERRIDE_PREFIX: &str = "BB_LKGVERSION_";

/// Runtime knobs shared by the resolver, backends and download executor.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Cache root holding BDFs, indexes and lock files
    pub cache_dir: PathBuf,
    /// Attempts per retryable network operation
    pub retry_attempts: u32,
    /// Personal access token (first in the authentication chain)
    pub azure_pat: Option<String>,
    /// Forces Azure CLI authentication regardless of the server's provider
    pub force_az_cli_auth: bool,
    /// Accept pre-release packages for any requirement
    pub allow_prerelease_anywhere: bool,
    /// Per-source version overrides keyed by [`version_override_key`]
    pub version_overrides: HashMap<String, String>,
    /// Strategy-supplied secrets for the `token` credential provider, keyed by server
    pub tokens: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".bblkg").join("cache"),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            azure_pat: None,
            force_az_cli_auth: false,
            allow_prerelease_anywhere: false,
            version_overrides: HashMap::new(),
            tokens: HashMap::new(),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Fails when the cache directory cannot be determined or created.
    pub fn from_env() -> Result<Self> {
        let cache_dir = super::get_cache_dir()?;
        Ok(Self::from_vars(cache_dir, std::env::vars()))
    }

    /// Builds settings from an explicit variable list.
    pub fn from_vars<I>(cache_dir: PathBuf, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Self {
            cache_dir,
            ..Self::default()
        };

        for (key, value) in vars {
            match key.as_str() {
                RETRIES_ENV => match value.trim().parse::<u32>() {
                    Ok(n) if n > 0 => settings.retry_attempts = n,
                    _ => tracing::warn!("Ignoring invalid {}={}", RETRIES_ENV, value),
                },
                AZURE_PAT_ENV if !value.trim().is_empty() => {
                    settings.azure_pat = Some(value.trim().to_string());
                }
                FORCE_AZ_CLI_ENV => settings.force_az_cli_auth = is_truthy(&value),
                ALLOW_PRERELEASE_ENV => settings.allow_prerelease_anywhere = is_truthy(&value),
                _ => {
                    if let Some(name) = key.strip_prefix(VERSION_OVERRIDE_PREFIX) {
                        if !value.trim().is_empty() {
                            settings
                                .version_overrides
                                .insert(name.to_ascii_uppercase(), value.trim().to_string());
                        }
                    }
                }
            }
        }

        settings
    }

    /// Version override for a source, if one was set.
    #[must_use]
    pub fn version_override(&self, source_name: &str) -> Option<&str> {
        self.version_overrides.get(&version_override_key(source_name)).map(String::as_str)
    }

    /// Strategy-supplied token for a server.
    #[must_use]
    pub fn token_for(&self, server_name: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(server_name))
            .map(|(_, v)| v.as_str())
    }
}

/// Key under which a source's version override is stored: upper-cased, with every
/// character that cannot appear in an environment variable name replaced by `_`.
#[must_use]
pub fn version_override_key(source_name: &str) -> String {
    source_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn is_truthy(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn test_from_vars() {
        let settings = Settings::from_vars(
            PathBuf::from("/c"),
            vars(&[
                ("BB_LKG_RETRIES", "3"),
                ("BB_AZURE_PAT", "pat"),
                ("BB_USE_AZ_CLI_AUTH", "1"),
                ("BB_NUGET_ALLOW_PRERELEASE_ANYWHERE", "0"),
                ("BB_LKGVERSION_FOO", "1-2-3-4"),
                ("UNRELATED", "x"),
            ]),
        );
        assert_eq!(settings.retry_attempts, 3);
        assert_eq!(settings.azure_pat.as_deref(), Some("pat"));
        assert!(settings.force_az_cli_auth);
        assert!(!settings.allow_prerelease_anywhere);
        assert_eq!(settings.version_override("foo"), Some("1-2-3-4"));
    }

    #[test]
    fn test_invalid_retries_keep_default() {
        let settings = Settings::from_vars(PathBuf::from("/c"), vars(&[("BB_LKG_RETRIES", "lots")]));
        assert_eq!(settings.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_version_override_key() {
        assert_eq!(version_override_key("Bentley.Core-SDK"), "BENTLEY_CORE_SDK");
    }
}
