//! Global constants used throughout the BBLKG codebase.
//!
//! This module contains retry parameters, lock timeouts, file names and the
//! pinned Azure DevOps REST API versions that are used across multiple
//! modules. Defining them centrally keeps magic numbers discoverable.

use std::time::Duration;

/// Default number of attempts for a retryable network operation.
///
/// Overridable through the `BB_LKG_RETRIES` environment variable
/// (see [`crate::config::Settings`]).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Delay before the first retry (500ms).
pub const RETRY_START_DELAY_MS: u64 = 500;

/// Linear increment added to the delay for every further retry (1s).
pub const RETRY_DELAY_INCREMENT_MS: u64 = 1_000;

/// Upper bound for a single retry delay (7s).
pub const RETRY_MAX_DELAY_MS: u64 = 7_000;

/// Maximum time spent waiting for the cross-process token cache lock.
pub fn token_cache_lock_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Poll interval while waiting on a contended lock file.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timeout for a single HTTP request against a backend.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Name of the provenance record written next to every downloaded LKG.
pub const LKG_PROVENANCE_FILE: &str = "LkgProvenance.xml";

/// Subdirectory of the cache root holding downloaded BDFs.
pub const BDF_CACHE_DIR: &str = "bdfs";

/// Usage sidecar consumed by external cache-eviction tooling.
pub const BDF_USAGE_FILE: &str = "BdfCacheUsage.xml";

/// Persisted index of secondary-to-primary LKG pairings.
pub const LKG_MATCH_INDEX_FILE: &str = "LkgMatchIndex.json";

/// Marker that opts a version directory into the completion-flag convention.
pub const CHECK_COMPLETE_FLAG: &str = "checkComplete.flag";

/// Subdirectory used for static build contexts.
pub const STATIC_SUBDIR: &str = "static";

/// Azure DevOps REST API version for `_apis/build/definitions`.
pub const ADO_API_DEFINITIONS: &str = "5.1";

/// Azure DevOps REST API version for `_apis/build/builds`.
pub const ADO_API_BUILDS: &str = "5.1";

/// Azure DevOps REST API version for `_apis/build/builds/{id}/artifacts`.
pub const ADO_API_ARTIFACTS: &str = "5.1";

/// Azure DevOps REST API version for `_apis/resources/Containers`.
pub const ADO_API_CONTAINERS: &str = "6.1-preview.1";

/// Resource id requested from the Azure CLI when asking for a DevOps token.
pub const AZURE_DEVOPS_RESOURCE_ID: &str = "499b84ac-1321-427f-aa17-267ca6975798";
