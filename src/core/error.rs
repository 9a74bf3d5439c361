//! Error handling for BBLKG
//!
//! This module provides the error taxonomy of the LKG resolution engine and the
//! user-friendly reporting used by the CLI. The error system is designed around
//! two principles:
//! 1. **Strongly-typed errors** so callers can tell configuration faults from
//!    transport faults from corrupt on-disk state
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Error Categories
//!
//! - **Configuration**: [`LkgError::ConfigError`], [`LkgError::UnresolvedTemplate`],
//!   [`LkgError::UnknownServerKind`]. Always fatal, never retried.
//! - **Not found**: [`LkgError::NotFound`]. Only raised by `fetch` for a single missing
//!   artifact; the search itself reports "not found" as `Ok(None)`.
//! - **Transport**: [`LkgError::Transport`], [`LkgError::HttpStatus`],
//!   [`LkgError::ArchiveCorrupt`]. Retried per the retry policy, then escalated to
//!   [`LkgError::BuildError`].
//! - **Authentication**: [`LkgError::Authentication`]. Never retried.
//! - **Corrupt local state**: [`LkgError::ProvenanceCorrupt`], [`LkgError::BdfParseError`].
//! - **Graph**: [`LkgError::GraphInconsistency`], [`LkgError::NoMatch`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use bblkg_cli::core::{LkgError, user_friendly_error};
//!
//! let error = LkgError::UnresolvedTemplate {
//!     template: "\\\\srv\\$(name)\\$(flavor)".to_string(),
//!     resolved: "\\\\srv\\Foo\\$(flavor)".to_string(),
//! };
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for BBLKG operations
///
/// Each variant names the specific object (server, source, file, sub-part) that
/// broke so the message can be acted on without a debugger.
#[derive(Error, Debug)]
pub enum LkgError {
    /// Strategy/configuration problem
    ///
    /// Raised for missing required fields, dangling server references and other
    /// misconfigurations. `location` names the file or field at fault.
    #[error("Configuration error in {location}: {message}")]
    ConfigError {
        /// File or field that holds the bad value
        location: String,
        /// Description of the problem
        message: String,
    },

    /// An address template still contains `$`, `(` or `)` after substitution
    #[error("Unresolved address template '{template}' (resolved to '{resolved}')")]
    UnresolvedTemplate {
        /// The server address template as configured
        template: String,
        /// The address after all known tokens were substituted
        resolved: String,
    },

    /// Server kind string or index that does not name a known backend
    #[error("Unknown LKG server kind: {kind}")]
    UnknownServerKind {
        /// The offending kind
        kind: String,
    },

    /// Version text that cannot be parsed
    #[error("Invalid version format: '{version}'")]
    InvalidVersionFormat {
        /// The text that failed to parse
        version: String,
    },

    /// Version range text that cannot be parsed
    #[error("Invalid version range: '{range}'")]
    InvalidVersionRange {
        /// The range text that failed to parse
        range: String,
    },

    /// A single artifact is absent at the given address
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing artifact
        what: String,
    },

    /// Network or process failure talking to a backend
    #[error("Transport error during {operation}: {reason}")]
    Transport {
        /// The operation that failed (e.g. "list versions", "download")
        operation: String,
        /// Underlying reason
        reason: String,
    },

    /// Non-success HTTP status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// Status code returned by the server
        status: u16,
    },

    /// Credentials were rejected or could not be obtained
    #[error("Authentication failed for {url}: {reason}")]
    Authentication {
        /// The address that required authentication
        url: String,
        /// Why authentication failed
        reason: String,
    },

    /// Downloaded archive is truncated or not a valid zip
    #[error("Corrupt archive {path}: {reason}")]
    ArchiveCorrupt {
        /// Path of the archive that was rejected
        path: String,
        /// Validation failure
        reason: String,
    },

    /// On-disk provenance record is malformed
    #[error("Corrupt provenance record {path}: {reason}")]
    ProvenanceCorrupt {
        /// Path of the provenance file
        path: String,
        /// What is wrong with it
        reason: String,
    },

    /// A build description could not be parsed
    #[error("Invalid build description {source_name}: {reason}")]
    BdfParseError {
        /// Where the BDF came from (file path or product/version)
        source_name: String,
        /// Parser message
        reason: String,
    },

    /// The BDF graph references something that cannot be loaded
    #[error("Build description graph is inconsistent: {product} {version} references {sub_part}: {reason}")]
    GraphInconsistency {
        /// Product whose BDF holds the reference
        product: String,
        /// Version of that product
        version: String,
        /// The sub-part or sub-LKG that broke the chain
        sub_part: String,
        /// What went wrong
        reason: String,
    },

    /// Two LKG sources cannot be made mutually consistent
    #[error("No way to match LastKnownGoodSource {lkg_name} to {matched_against}; {reason}")]
    NoMatch {
        /// The secondary LKG being matched
        lkg_name: String,
        /// The primary it is being matched against
        matched_against: String,
        /// Which sub-part caused the failure
        reason: String,
    },

    /// Resolution of a single artifact failed after exhausting retries
    #[error("Failed to obtain {name}: {reason}")]
    BuildError {
        /// Logical artifact name
        name: String,
        /// The last underlying error
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// XML (de)serialization error
    #[error("XML error: {0}")]
    XmlError(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Other error
    #[error("{message}")]
    Other {
        /// Generic error message
        message: String,
    },
}

impl From<quick_xml::DeError> for LkgError {
    fn from(e: quick_xml::DeError) -> Self {
        Self::XmlError(e.to_string())
    }
}

impl From<quick_xml::SeError> for LkgError {
    fn from(e: quick_xml::SeError) -> Self {
        Self::XmlError(e.to_string())
    }
}

impl LkgError {
    /// Returns `true` when waiting and trying again could succeed.
    ///
    /// 5xx responses, connection resets/timeouts and corrupt downloads are
    /// retryable. 401/403 are not: credentials will not fix themselves by waiting.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport {
                ..
            }
            | Self::ArchiveCorrupt {
                ..
            } => true,
            Self::HttpStatus {
                status,
                ..
            } => *status >= 500 || *status == 408 || *status == 429,
            Self::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// Returns `true` for a missing single artifact (HTTP 404 or [`LkgError::NotFound`]).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::HttpStatus {
                    status: 404,
                    ..
                }
        )
    }

    /// Returns `true` for configuration faults that must surface to the top-level caller.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigError { .. } | Self::UnresolvedTemplate { .. } | Self::UnknownServerKind { .. }
        )
    }

    /// Shorthand for [`LkgError::ConfigError`].
    pub fn config(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigError {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`LkgError::Transport`].
    pub fn transport(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Wraps a foreign error (typically an `anyhow` chain) as [`LkgError::Other`].
    pub fn other(message: impl fmt::Display) -> Self {
        Self::Other {
            message: message.to_string(),
        }
    }
}

impl Clone for LkgError {
    fn clone(&self) -> Self {
        match self {
            Self::ConfigError {
                location,
                message,
            } => Self::ConfigError {
                location: location.clone(),
                message: message.clone(),
            },
            Self::UnresolvedTemplate {
                template,
                resolved,
            } => Self::UnresolvedTemplate {
                template: template.clone(),
                resolved: resolved.clone(),
            },
            Self::UnknownServerKind {
                kind,
            } => Self::UnknownServerKind {
                kind: kind.clone(),
            },
            Self::InvalidVersionFormat {
                version,
            } => Self::InvalidVersionFormat {
                version: version.clone(),
            },
            Self::InvalidVersionRange {
                range,
            } => Self::InvalidVersionRange {
                range: range.clone(),
            },
            Self::NotFound {
                what,
            } => Self::NotFound {
                what: what.clone(),
            },
            Self::Transport {
                operation,
                reason,
            } => Self::Transport {
                operation: operation.clone(),
                reason: reason.clone(),
            },
            Self::HttpStatus {
                url,
                status,
            } => Self::HttpStatus {
                url: url.clone(),
                status: *status,
            },
            Self::Authentication {
                url,
                reason,
            } => Self::Authentication {
                url: url.clone(),
                reason: reason.clone(),
            },
            Self::ArchiveCorrupt {
                path,
                reason,
            } => Self::ArchiveCorrupt {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::ProvenanceCorrupt {
                path,
                reason,
            } => Self::ProvenanceCorrupt {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::BdfParseError {
                source_name,
                reason,
            } => Self::BdfParseError {
                source_name: source_name.clone(),
                reason: reason.clone(),
            },
            Self::GraphInconsistency {
                product,
                version,
                sub_part,
                reason,
            } => Self::GraphInconsistency {
                product: product.clone(),
                version: version.clone(),
                sub_part: sub_part.clone(),
                reason: reason.clone(),
            },
            Self::NoMatch {
                lkg_name,
                matched_against,
                reason,
            } => Self::NoMatch {
                lkg_name: lkg_name.clone(),
                matched_against: matched_against.clone(),
                reason: reason.clone(),
            },
            Self::BuildError {
                name,
                reason,
            } => Self::BuildError {
                name: name.clone(),
                reason: reason.clone(),
            },
            Self::XmlError(message) => Self::XmlError(message.clone()),
            // For errors that don't implement Clone, convert to Other
            Self::IoError(e) => Self::Other {
                message: format!("IO error: {e}"),
            },
            Self::JsonError(e) => Self::Other {
                message: format!("JSON error: {e}"),
            },
            Self::TomlError(e) => Self::Other {
                message: format!("TOML parsing error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// Error context wrapper that provides user-friendly error information
///
/// When displayed, errors show:
/// 1. **Error**: The main error message in red
/// 2. **Details**: Additional context about the error in yellow (optional)
/// 3. **Suggestion**: Actionable steps to resolve the issue in green (optional)
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying BBLKG error
    pub error: LkgError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context from a [`LkgError`]
    #[must_use]
    pub const fn new(error: LkgError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error context to stderr with terminal colors
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error to a user-friendly [`ErrorContext`] with actionable suggestions
///
/// Recognizes [`LkgError`] anywhere in the `anyhow` chain, then plain
/// [`std::io::Error`]s, and falls back to a generic message carrying the full
/// error chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(lkg_error) = error.chain().find_map(|e| e.downcast_ref::<LkgError>()) {
        return create_error_context(lkg_error.clone());
    }

    let permission_denied = error
        .downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::PermissionDenied);
    if permission_denied {
        return ErrorContext::new(LkgError::Other {
            message: error.to_string(),
        })
        .with_suggestion("Check ownership and permissions of the cache and destination directories")
        .with_details("BBLKG could not read or write a file it needs");
    }

    // Generic error - include the full error chain for better diagnostics
    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(LkgError::Other {
        message,
    })
}

fn create_error_context(error: LkgError) -> ErrorContext {
    match &error {
        LkgError::ConfigError { location, .. } => {
            let suggestion = format!("Fix the value at {location} in the LKG configuration");
            ErrorContext::new(error)
                .with_suggestion(suggestion)
                .with_details("Configuration errors are never retried")
        }
        LkgError::UnresolvedTemplate { .. } => ErrorContext::new(error)
            .with_suggestion("Only $(name), $(platform) and $(version) may appear in a server address")
            .with_details("The server address would have produced a broken path"),
        LkgError::UnknownServerKind { .. } => ErrorContext::new(error).with_suggestion(
            "Use one of: fileshare, rsync, local, nuget, azurebuildartifact",
        ),
        LkgError::Authentication { .. } => ErrorContext::new(error)
            .with_suggestion("Set BB_AZURE_PAT, or run 'az login' and retry")
            .with_details("Authentication failures are surfaced immediately and not retried"),
        LkgError::ProvenanceCorrupt { path, .. } => {
            let suggestion = format!("Delete the directory containing {path} and pull again");
            ErrorContext::new(error)
                .with_suggestion(suggestion)
                .with_details("The directory may contain partially-written files from an earlier crash")
        }
        LkgError::NoMatch { .. } => ErrorContext::new(error)
            .with_suggestion("Pin an explicit version for the LKG source or remove the MatchLkgs pairing"),
        LkgError::GraphInconsistency { .. } => ErrorContext::new(error)
            .with_suggestion("Check that the referenced build was published to the BDF server"),
        LkgError::BuildError { .. } | LkgError::Transport { .. } | LkgError::HttpStatus { .. } => {
            ErrorContext::new(error)
                .with_suggestion("Check network connectivity; raise BB_LKG_RETRIES for flaky servers")
        }
        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LkgError::transport("download", "connection reset").is_retryable());
        assert!(
            LkgError::HttpStatus {
                url: "https://x".into(),
                status: 503
            }
            .is_retryable()
        );
        assert!(
            !LkgError::HttpStatus {
                url: "https://x".into(),
                status: 401
            }
            .is_retryable()
        );
        assert!(
            !LkgError::HttpStatus {
                url: "https://x".into(),
                status: 404
            }
            .is_retryable()
        );
        assert!(!LkgError::config("lkg.toml", "bad").is_retryable());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(
            LkgError::HttpStatus {
                url: "https://x".into(),
                status: 404
            }
            .is_not_found()
        );
        assert!(
            LkgError::NotFound {
                what: "a".into()
            }
            .is_not_found()
        );
        assert!(!LkgError::transport("x", "y").is_not_found());
    }

    #[test]
    fn test_user_friendly_error_finds_lkg_error_in_chain() {
        let err = anyhow::Error::from(LkgError::config("servers.main.address", "empty"))
            .context("loading configuration");
        let ctx = user_friendly_error(err);
        assert!(matches!(ctx.error, LkgError::ConfigError { .. }));
        assert!(ctx.suggestion.unwrap().contains("servers.main.address"));
    }

    #[test]
    fn test_clone_converts_io_error() {
        let err = LkgError::IoError(std::io::Error::other("disk"));
        assert!(matches!(err.clone(), LkgError::Other { .. }));
    }

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext::new(LkgError::NotFound {
            what: "Foo".into(),
        })
        .with_details("d")
        .with_suggestion("s");
        let text = ctx.to_string();
        assert!(text.contains("Not found: Foo"));
        assert!(text.contains("Details: d"));
        assert!(text.contains("Suggestion: s"));
    }
}
