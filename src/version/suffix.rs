//! Versions with semver-style pre-release and build metadata suffixes.
//!
//! Package feeds publish versions such as `1.2.3-beta.4+sha.abc`. The numeric part
//! is an ordinary [`Version`]; the pre-release participates in ordering per semver
//! precedence rules and the build metadata is informational only.

use super::Version;
use crate::core::LkgError;
use std::cmp::Ordering;
use std::fmt;

/// Splits `text` at the first `+` into `(version, build_metadata)`.
#[must_use]
pub fn split_build_metadata(text: &str) -> (&str, Option<&str>) {
    match text.split_once('+') {
        Some((head, meta)) => (head, Some(meta)),
        None => (text, None),
    }
}

/// Splits `text` into `(numeric_version, prerelease)`.
///
/// Dashes double as component separators in the on-disk encoding (`1-2-3-4`), so a
/// dash only starts a pre-release when the string uses dots for its components or
/// when the text after the dash does not begin with a digit.
#[must_use]
pub fn split_prerelease_suffix(text: &str) -> (&str, Option<&str>) {
    let dotted = text.contains('.');
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find('-') {
        let idx = search_from + rel;
        let rest = &text[idx + 1..];
        let numeric_next = rest.chars().next().is_some_and(|c| c.is_ascii_digit())
            && rest.split(['-', '.']).next().is_some_and(|seg| seg.bytes().all(|b| b.is_ascii_digit()));
        if dotted || !numeric_next {
            return (&text[..idx], Some(rest));
        }
        search_from = idx + 1;
    }
    (text, None)
}

/// A [`Version`] plus optional pre-release and build metadata.
#[derive(Debug, Clone)]
pub struct VersionWithSuffix {
    raw: String,
    version: Version,
    prerelease: Option<String>,
    build_metadata: Option<String>,
}

impl VersionWithSuffix {
    /// Parses `1.2.3`, `1.2.3-beta.1`, `1.2.3+meta` or `1.2.3-rc.1+meta`.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::InvalidVersionFormat`] when the numeric part is invalid or a
    /// suffix is present but empty.
    pub fn parse(text: &str) -> Result<Self, LkgError> {
        let trimmed = text.trim();
        let (head, meta) = split_build_metadata(trimmed);
        let (numeric, pre) = split_prerelease_suffix(head);

        if pre.is_some_and(str::is_empty) || meta.is_some_and(str::is_empty) {
            return Err(LkgError::InvalidVersionFormat {
                version: text.to_string(),
            });
        }

        let version = Version::parse(numeric).map_err(|_| LkgError::InvalidVersionFormat {
            version: text.to_string(),
        })?;

        Ok(Self {
            raw: trimmed.to_string(),
            version,
            prerelease: pre.map(str::to_string),
            build_metadata: meta.map(str::to_string),
        })
    }

    /// The numeric part.
    #[must_use]
    pub const fn version(&self) -> &Version {
        &self.version
    }

    /// Pre-release identifier, if any.
    #[must_use]
    pub fn prerelease(&self) -> Option<&str> {
        self.prerelease.as_deref()
    }

    /// Build metadata, if any.
    #[must_use]
    pub fn build_metadata(&self) -> Option<&str> {
        self.build_metadata.as_deref()
    }

    /// The text this was parsed from.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The raw text with build metadata removed.
    #[must_use]
    pub fn without_build_metadata(&self) -> &str {
        split_build_metadata(&self.raw).0
    }

    /// Semver precedence: numeric part first, then pre-release. Build metadata is ignored.
    ///
    /// Missing numeric components count as `0`, so `1.0` and `1.0.0.0` compare equal.
    #[must_use]
    pub fn cmp_precedence(&self, other: &Self) -> Ordering {
        self.version
            .padded()
            .cmp(&other.version.padded())
            .then_with(|| compare_prerelease(self.prerelease(), other.prerelease()))
    }
}

fn compare_prerelease(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        // A release outranks any pre-release of the same version
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            match (semver::Prerelease::new(a), semver::Prerelease::new(b)) {
                (Ok(pa), Ok(pb)) => pa.cmp(&pb),
                _ => a.cmp(b),
            }
        }
    }
}

impl PartialEq for VersionWithSuffix {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for VersionWithSuffix {}

impl fmt::Display for VersionWithSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vs(text: &str) -> VersionWithSuffix {
        VersionWithSuffix::parse(text).unwrap()
    }

    #[test]
    fn test_split_build_metadata() {
        assert_eq!(split_build_metadata("1.2.3+abc"), ("1.2.3", Some("abc")));
        assert_eq!(split_build_metadata("1.2.3"), ("1.2.3", None));
    }

    #[test]
    fn test_split_prerelease_suffix() {
        assert_eq!(split_prerelease_suffix("1.2.3-beta.1"), ("1.2.3", Some("beta.1")));
        assert_eq!(split_prerelease_suffix("1.2.3-4"), ("1.2.3", Some("4")));
        assert_eq!(split_prerelease_suffix("1-2-3-4"), ("1-2-3-4", None));
        assert_eq!(split_prerelease_suffix("1-2-3-rc1"), ("1-2-3", Some("rc1")));
    }

    #[test]
    fn test_prerelease_precedence() {
        // numeric identifiers sort before alphanumeric ones
        assert_eq!(vs("1.0.0-1").cmp_precedence(&vs("1.0.0-alpha")), Ordering::Less);
        assert_eq!(vs("1.0.0-alpha").cmp_precedence(&vs("1.0.0-alpha.1")), Ordering::Less);
        assert_eq!(vs("1.0.0-alpha.2").cmp_precedence(&vs("1.0.0-alpha.10")), Ordering::Less);
        assert_eq!(vs("1.0.0-rc.1").cmp_precedence(&vs("1.0.0")), Ordering::Less);
        assert_eq!(vs("1.0.1-rc.1").cmp_precedence(&vs("1.0.0")), Ordering::Greater);
    }

    #[test]
    fn test_build_metadata_only_affects_raw_equality() {
        let a = vs("1.2.3+one");
        let b = vs("1.2.3+two");
        assert_eq!(a.cmp_precedence(&b), Ordering::Equal);
        assert_ne!(a, b);
        assert_eq!(a.without_build_metadata(), "1.2.3");
    }

    #[test]
    fn test_rejects_empty_suffixes() {
        assert!(VersionWithSuffix::parse("1.2.3-").is_err());
        assert!(VersionWithSuffix::parse("1.2.3+").is_err());
    }
}
