//! Version parsing, comparison, and best-match selection for LKG artifacts.
//!
//! LKG versions are four-component tuples `(release, major, minor, build)` where every
//! component is either a number or *unbound*. Unbound components act as wildcards: a
//! version with fewer bound components matches any longer concrete version that shares
//! its prefix.
//!
//! # Module Organization
//!
//! - [`Version`] - the 4-tuple, its parser and its matching rules
//! - [`suffix`] - versions carrying a semver-style pre-release and build metadata
//! - [`range`] - NuGet-style version ranges (`[1.0,2.0)`) and requirement checks
//!
//! # Accepted Formats
//!
//! | Input             | Parsed as      | Notes                                        |
//! |-------------------|----------------|----------------------------------------------|
//! | `1.2.3.4`         | `1.2.3.4`      | dot separated                                |
//! | `1-2-3-4`         | `1.2.3.4`      | dash separated (on-disk directory encoding)  |
//! | `1.2.*`           | `1.2.*`        | release and major bound, rest unbound        |
//! | `*`               | `*`            | fully unbound                                |
//! | `01020304`        | `1.2.3.4`      | compact fixed-width form                     |
//! | `010203040`       | `1.2.3.40`     | compact form with a three digit build        |
//! | `01020304en1`     | `1.2.3.4`      | language token stripped                      |
//! | `010203*`         | `1.2.3.*`      | wildcard propagates to remaining components  |
//!
//! # Examples
//!
//! ```rust
//! use bblkg_cli::version::Version;
//!
//! let wildcard: Version = "1.2.3".parse().unwrap();
//! assert!(wildcard.match_tuple(&[1, 2, 3, 4]));
//!
//! let concrete: Version = "1-2-3-4".parse().unwrap();
//! assert_eq!(concrete.to_string(), "1.2.3.4");
//! assert_eq!(concrete.string_for_filename(), "1-2-3-4");
//! ```

pub mod range;
pub mod suffix;

pub use range::{VersionRange, meets_requirement, version_satisfies};
pub use suffix::{VersionWithSuffix, split_build_metadata, split_prerelease_suffix};

use crate::core::LkgError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Number of components in an LKG version.
pub const COMPONENT_COUNT: usize = 4;

static COMPACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)(\*|en\d+)?$").expect("valid compact regex"));

/// A four component LKG version whose trailing components may be unbound.
///
/// Ordering is derived component-wise with an unbound component sorting lowest,
/// which gives a total order suitable for sorting listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Version {
    components: [Option<u32>; COMPONENT_COUNT],
}

impl Version {
    /// A fully unbound version (`*`).
    #[must_use]
    pub const fn unbound() -> Self {
        Self {
            components: [None; COMPONENT_COUNT],
        }
    }

    /// A fully bound version.
    #[must_use]
    pub const fn new(release: u32, major: u32, minor: u32, build: u32) -> Self {
        Self {
            components: [Some(release), Some(major), Some(minor), Some(build)],
        }
    }

    /// Builds a version from a prefix of bound components; the rest stay unbound.
    ///
    /// Components past the fourth are ignored.
    #[must_use]
    pub fn from_prefix(prefix: &[u32]) -> Self {
        let mut components = [None; COMPONENT_COUNT];
        for (slot, value) in components.iter_mut().zip(prefix) {
            *slot = Some(*value);
        }
        Self {
            components,
        }
    }

    /// Parses version text.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::InvalidVersionFormat`] for empty input, non-numeric
    /// components, more than four components, a number following a wildcard, or a
    /// compact form of unsupported length.
    pub fn parse(text: &str) -> Result<Self, LkgError> {
        let invalid = || LkgError::InvalidVersionFormat {
            version: text.to_string(),
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }
        if trimmed == "*" {
            return Ok(Self::unbound());
        }

        if let Some(caps) = COMPACT_RE.captures(trimmed) {
            let digits = &caps[1];
            if digits.len() == 1 {
                let value = digits.parse().map_err(|_| invalid())?;
                return Ok(Self::from_prefix(&[value]));
            }
            return parse_compact(digits).ok_or_else(invalid);
        }

        let parts: Vec<&str> = trimmed.split(['.', '-']).collect();
        if parts.len() > COMPONENT_COUNT {
            return Err(invalid());
        }

        let mut components = [None; COMPONENT_COUNT];
        let mut seen_wildcard = false;
        for (slot, part) in components.iter_mut().zip(&parts) {
            if *part == "*" {
                seen_wildcard = true;
                continue;
            }
            if seen_wildcard || part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = Some(part.parse().map_err(|_| invalid())?);
        }

        Ok(Self {
            components,
        })
    }

    /// Raw components, `None` meaning unbound.
    #[must_use]
    pub const fn components(&self) -> [Option<u32>; COMPONENT_COUNT] {
        self.components
    }

    /// The leading bound components.
    #[must_use]
    pub fn bound(&self) -> Vec<u32> {
        self.components.iter().map_while(|c| *c).collect()
    }

    /// Number of leading bound components.
    #[must_use]
    pub fn bound_len(&self) -> usize {
        self.components.iter().take_while(|c| c.is_some()).count()
    }

    /// `true` when all four components are bound.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.bound_len() == COMPONENT_COUNT
    }

    /// `true` when at least one component is unbound.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        !self.is_concrete()
    }

    /// Dash separated rendering used for directory names and URLs.
    #[must_use]
    pub fn string_for_filename(&self) -> String {
        self.render('-')
    }

    /// `true` iff every bound component equals the corresponding entry of `candidate`.
    ///
    /// A candidate with fewer entries than this version has bound components never
    /// matches.
    #[must_use]
    pub fn match_tuple(&self, candidate: &[u32]) -> bool {
        let bound = self.bound();
        if candidate.len() < bound.len() {
            return false;
        }
        bound.iter().zip(candidate).all(|(a, b)| a == b)
    }

    /// Wildcard-aware match of another parsed version.
    #[must_use]
    pub fn matches(&self, candidate: &Self) -> bool {
        self.match_tuple(&candidate.bound())
    }

    /// Compares with missing trailing components treated as `0` on both sides.
    #[must_use]
    pub fn match_version_padded(&self, other: &Self) -> bool {
        self.padded() == other.padded()
    }

    pub(crate) fn padded(&self) -> [u32; COMPONENT_COUNT] {
        let mut out = [0; COMPONENT_COUNT];
        for (slot, value) in out.iter_mut().zip(self.components.iter().map_while(|c| *c)) {
            *slot = value;
        }
        out
    }

    fn render(&self, separator: char) -> String {
        let bound = self.bound();
        let mut parts: Vec<String> = bound.iter().map(u32::to_string).collect();
        if bound.len() < COMPONENT_COUNT {
            parts.push("*".to_string());
        }
        parts.join(&separator.to_string())
    }
}

fn parse_compact(digits: &str) -> Option<Version> {
    let widths: &[usize] = match digits.len() {
        2 => &[2],
        4 => &[2, 2],
        6 => &[2, 2, 2],
        8 => &[2, 2, 2, 2],
        9 => &[2, 2, 2, 3],
        _ => return None,
    };

    let mut prefix = Vec::with_capacity(COMPONENT_COUNT);
    let mut offset = 0;
    for width in widths {
        prefix.push(digits[offset..offset + width].parse().ok()?);
        offset += width;
    }
    Some(Version::from_prefix(&prefix))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render('.'))
    }
}

impl FromStr for Version {
    type Err = LkgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Picks the newest candidate matching `requirement`.
///
/// Candidates that fail to parse are skipped. Among equal parsed versions the first
/// one listed wins. Returns the candidate string as it was supplied.
#[must_use]
pub fn select_best_version<'a, S: AsRef<str>>(
    requirement: &Version,
    candidates: &'a [S],
) -> Option<&'a str> {
    let mut best: Option<(Version, &'a str)> = None;
    for candidate in candidates {
        let text = candidate.as_ref();
        let Ok(parsed) = Version::parse(text) else {
            tracing::debug!("Skipping unparseable version candidate '{}'", text);
            continue;
        };
        if !requirement.matches(&parsed) {
            continue;
        }
        if best.as_ref().is_none_or(|(current, _)| parsed > *current) {
            best = Some((parsed, text));
        }
    }
    best.map(|(_, text)| text)
}

/// Candidates matching `requirement`, newest first.
///
/// Unlike [`select_best_version`] this keeps every match so the caller can walk down
/// the list (skipping incomplete uploads, say). Candidates may carry semver suffixes;
/// pre-releases are dropped unless `allow_prerelease` is set. Equal precedence keeps
/// listing order.
#[must_use]
pub fn rank_candidates<'a, S: AsRef<str>>(
    candidates: &'a [S],
    requirement: &Version,
    allow_prerelease: bool,
) -> Vec<&'a str> {
    let mut ranked: Vec<(VersionWithSuffix, &'a str)> = candidates
        .iter()
        .map(AsRef::as_ref)
        .filter_map(|text| VersionWithSuffix::parse(text).ok().map(|v| (v, text)))
        .filter(|(v, _)| requirement.matches(v.version()))
        .filter(|(v, _)| allow_prerelease || v.prerelease().is_none())
        .collect();
    ranked.sort_by(|(a, _), (b, _)| b.cmp_precedence(a));
    ranked.into_iter().map(|(_, text)| text).collect()
}

/// Sorts version strings newest first. Unparseable entries sink to the end.
pub fn sort_descending(versions: &mut [String]) {
    versions.sort_by(|a, b| {
        let pa = Version::parse(a).ok();
        let pb = Version::parse(b).ok();
        pb.cmp(&pa)
    });
}
