//! NuGet-style version ranges.
//!
//! | Text            | Meaning                        |
//! |-----------------|--------------------------------|
//! | `1.0`           | `>= 1.0`                       |
//! | `[1.0]`         | exactly `1.0`                  |
//! | `[1.0,2.0)`     | `>= 1.0` and `< 2.0`           |
//! | `(1.0,2.0]`     | `> 1.0` and `<= 2.0`           |
//! | `[1.0,)`        | `>= 1.0`                       |
//! | `[*]`, empty    | anything                       |
//!
//! Pre-release candidates are rejected unless the requirement itself names a
//! pre-release, is the `[*]` wildcard, or the prerelease safety valve is enabled.

use super::VersionWithSuffix;
use crate::core::LkgError;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

static EXACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([^,]*)\]$").expect("valid exact regex"));
static INTERVAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\[\(]([^,]*),([^\]\)]*)[\]\)]$").expect("valid interval regex"));

/// One end of a [`VersionRange`].
#[derive(Debug, Clone)]
pub struct Bound {
    /// The bounding version
    pub version: VersionWithSuffix,
    /// Whether the bound itself satisfies the range
    pub inclusive: bool,
}

/// A parsed version requirement.
#[derive(Debug, Clone)]
pub struct VersionRange {
    original: String,
    min: Option<Bound>,
    max: Option<Bound>,
}

impl VersionRange {
    /// Parses range text.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::InvalidVersionRange`] for unbalanced brackets, a `(x)` form,
    /// or bounds that are not valid versions.
    pub fn parse(text: &str) -> Result<Self, LkgError> {
        let trimmed = text.trim();
        let invalid = || LkgError::InvalidVersionRange {
            range: text.to_string(),
        };
        let bound = |raw: &str, inclusive: bool| -> Result<Option<Bound>, LkgError> {
            let raw = raw.trim();
            if raw.is_empty() || raw == "*" {
                return Ok(None);
            }
            let version = VersionWithSuffix::parse(raw).map_err(|_| invalid())?;
            Ok(Some(Bound {
                version,
                inclusive,
            }))
        };

        if trimmed.is_empty() || trimmed == "*" || trimmed == "[*]" {
            return Ok(Self {
                original: trimmed.to_string(),
                min: None,
                max: None,
            });
        }

        if let Some(caps) = EXACT_RE.captures(trimmed) {
            let exact = bound(&caps[1], true)?;
            return Ok(Self {
                original: trimmed.to_string(),
                min: exact.clone(),
                max: exact,
            });
        }

        if let Some(caps) = INTERVAL_RE.captures(trimmed) {
            return Ok(Self {
                original: trimmed.to_string(),
                min: bound(&caps[1], trimmed.starts_with('['))?,
                max: bound(&caps[2], trimmed.ends_with(']'))?,
            });
        }

        if trimmed.starts_with(['[', '(']) || trimmed.ends_with([']', ')']) {
            return Err(invalid());
        }

        Ok(Self {
            original: trimmed.to_string(),
            min: bound(trimmed, true)?,
            max: None,
        })
    }

    /// Lower bound, if any.
    #[must_use]
    pub const fn min(&self) -> Option<&Bound> {
        self.min.as_ref()
    }

    /// Upper bound, if any.
    #[must_use]
    pub const fn max(&self) -> Option<&Bound> {
        self.max.as_ref()
    }

    /// `true` for `[*]`, `*` and the empty requirement.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// `true` when either bound names a pre-release.
    #[must_use]
    pub fn names_prerelease(&self) -> bool {
        [&self.min, &self.max]
            .into_iter()
            .flatten()
            .any(|b| b.version.prerelease().is_some())
    }

    /// Checks only the numeric/pre-release bounds, ignoring the pre-release policy.
    #[must_use]
    pub fn contains(&self, found: &VersionWithSuffix) -> bool {
        let min_ok = self.min.as_ref().is_none_or(|b| {
            let ord = found.cmp_precedence(&b.version);
            if b.inclusive {
                ord != Ordering::Less || b.version.version().match_version_padded(found.version())
            } else {
                ord == Ordering::Greater
            }
        });
        let max_ok = self.max.as_ref().is_none_or(|b| {
            let ord = found.cmp_precedence(&b.version);
            if b.inclusive {
                ord != Ordering::Greater || b.version.version().match_version_padded(found.version())
            } else {
                ord == Ordering::Less
            }
        });
        min_ok && max_ok
    }
}

impl std::fmt::Display for VersionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}

/// Whether `found` satisfies `required`.
///
/// Pre-release candidates only pass when `required` names a pre-release, is the
/// any-version wildcard, or `allow_prerelease_anywhere` is set.
#[must_use]
pub fn meets_requirement(
    found: &VersionWithSuffix,
    required: &VersionRange,
    allow_prerelease_anywhere: bool,
) -> bool {
    if !required.contains(found) {
        return false;
    }
    if allow_prerelease_anywhere || found.prerelease().is_none() {
        return true;
    }
    if required.is_any() || required.names_prerelease() {
        return true;
    }
    tracing::debug!("Rejecting pre-release {} for requirement {}", found, required);
    false
}

/// Whether an LKG version satisfies a requirement written either as a wildcard
/// version (`3.*`, `1-2-3`) or as a bracketed range (`[3.0,4.0)`).
///
/// # Errors
///
/// Returns [`LkgError::InvalidVersionRange`] when the requirement is neither.
pub fn version_satisfies(requirement: &str, candidate: &super::Version) -> Result<bool, LkgError> {
    let trimmed = requirement.trim();
    if !trimmed.starts_with(['[', '(']) {
        if let Ok(wildcard) = super::Version::parse(trimmed) {
            return Ok(wildcard.matches(candidate));
        }
    }
    let range = VersionRange::parse(trimmed)?;
    let found = VersionWithSuffix::parse(&candidate.to_string())?;
    Ok(range.contains(&found))
}
