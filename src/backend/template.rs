//! Address templates: token substitution, path joining and version discovery.

use crate::core::LkgError;
use crate::source::{NAME_TOKEN, PLATFORM_TOKEN, VERSION_TOKEN};

/// Substitutes `$(name)`, `$(platform)` and `$(version)` into `template`.
///
/// Passing `None` for `version` leaves the version token in place, which is only
/// valid for templates that do not contain one.
///
/// # Errors
///
/// Returns [`LkgError::UnresolvedTemplate`] when any `$`, `(` or `)` survives
/// substitution.
pub fn resolve_address(
    template: &str,
    name: &str,
    platform: &str,
    version: Option<&str>,
) -> Result<String, LkgError> {
    let mut resolved = template.replace(NAME_TOKEN, name).replace(PLATFORM_TOKEN, platform);
    if let Some(version) = version {
        resolved = resolved.replace(VERSION_TOKEN, version);
    }

    if resolved.contains(['$', '(', ')']) {
        return Err(LkgError::UnresolvedTemplate {
            template: template.to_string(),
            resolved,
        });
    }
    Ok(resolved)
}

/// Fills `$(name)` and `$(version)` but keeps `$(platform)`, as recorded in
/// download info and provenance.
#[must_use]
pub fn partially_resolve(template: &str, name: &str, version: &str) -> String {
    template.replace(NAME_TOKEN, name).replace(VERSION_TOKEN, version)
}

/// The separator a template uses: `\` for UNC/Windows style, `/` otherwise.
#[must_use]
pub fn separator_of(address: &str) -> char {
    if address.contains('\\') && !address.contains('/') { '\\' } else { '/' }
}

/// Appends path segments using the address's own separator.
#[must_use]
pub fn join_address(base: &str, segments: &[&str]) -> String {
    let sep = separator_of(base);
    let mut out = base.trim_end_matches(['/', '\\']).to_string();
    for segment in segments {
        let segment = segment.trim_matches(['/', '\\']);
        if segment.is_empty() {
            continue;
        }
        out.push(sep);
        out.push_str(segment);
    }
    out
}

/// Where the versions of a versioned address live.
///
/// For `\\srv\lkgs\winx64\Foo\Foo_$(version)\bin` the listing directory is
/// `\\srv\lkgs\winx64\Foo`, entries must start with `Foo_`, and the version is the
/// rest of the entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPattern {
    /// Directory to enumerate
    pub listing_dir: String,
    /// Required entry name prefix
    pub prefix: String,
    /// Required entry name suffix
    pub suffix: String,
}

impl VersionPattern {
    /// Splits a template at its version token.
    ///
    /// Returns `Ok(None)` for templates without a version token.
    ///
    /// # Errors
    ///
    /// Propagates [`LkgError::UnresolvedTemplate`] from the non-version tokens.
    pub fn from_template(template: &str, name: &str, platform: &str) -> Result<Option<Self>, LkgError> {
        let Some(idx) = template.find(VERSION_TOKEN) else {
            return Ok(None);
        };
        let before = resolve_address(&template[..idx], name, platform, None)?;
        let after = resolve_address(&template[idx + VERSION_TOKEN.len()..], name, platform, None)?;

        let (listing_dir, prefix) = match before.rfind(['/', '\\']) {
            Some(pos) => (before[..pos].to_string(), before[pos + 1..].to_string()),
            None => (String::new(), before),
        };
        let suffix = match after.find(['/', '\\']) {
            Some(pos) => after[..pos].to_string(),
            None => after,
        };

        Ok(Some(Self {
            listing_dir,
            prefix,
            suffix,
        }))
    }

    /// Extracts the version text from a directory entry name, if it fits the pattern.
    #[must_use]
    pub fn extract<'a>(&self, entry: &'a str) -> Option<&'a str> {
        let head = entry.get(..self.prefix.len())?;
        if !head.eq_ignore_ascii_case(&self.prefix) {
            return None;
        }
        let rest = entry.get(self.prefix.len()..)?;
        if rest.len() <= self.suffix.len() {
            return None;
        }
        let split = rest.len() - self.suffix.len();
        let tail = rest.get(split..)?;
        if !tail.eq_ignore_ascii_case(&self.suffix) {
            return None;
        }
        rest.get(..split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_address_scenario() {
        let address = resolve_address(
            r"\\srv\lkgs\$(platform)\$(name)\$(version)",
            "Foo",
            "winx64",
            Some("1-2-3-4"),
        )
        .unwrap();
        assert_eq!(address, r"\\srv\lkgs\winx64\Foo\1-2-3-4");
    }

    #[test]
    fn test_resolve_address_rejects_leftovers() {
        let err = resolve_address(r"\\srv\$(name)\$(flavor)", "Foo", "x", Some("1")).unwrap_err();
        assert!(matches!(err, LkgError::UnresolvedTemplate { .. }));
        assert!(resolve_address("https://x/$(name)/$(version)", "Foo", "x", None).is_err());
    }

    #[test]
    fn test_join_address_keeps_separator() {
        assert_eq!(join_address(r"\\srv\a", &["static", "Bar"]), r"\\srv\a\static\Bar");
        assert_eq!(join_address("rsync://h/a/", &["static"]), "rsync://h/a/static");
    }

    #[test]
    fn test_version_pattern() {
        let pattern =
            VersionPattern::from_template(r"\\srv\$(platform)\$(name)_$(version)\bin", "Foo", "x64")
                .unwrap()
                .unwrap();
        assert_eq!(pattern.listing_dir, r"\\srv\x64");
        assert_eq!(pattern.extract("Foo_1-2-3-4"), Some("1-2-3-4"));
        assert_eq!(pattern.extract("Bar_1-2-3-4"), None);
        assert_eq!(pattern.extract("Foo_"), None);

        assert!(VersionPattern::from_template("/a/$(name)", "Foo", "x").unwrap().is_none());
    }

    #[test]
    fn test_version_pattern_non_ascii_entries() {
        let pattern = VersionPattern::from_template("/srv/$(name)_$(version).zip", "Foo", "x64")
            .unwrap()
            .unwrap();
        assert_eq!(pattern.extract("F\u{e9}\u{e9}_1-2-3-4"), None);
        assert_eq!(pattern.extract("Foo_1-2-3-4.zi\u{e9}"), None);
        assert_eq!(pattern.extract("Foo_1-2-3-\u{e9}zip"), None);
        assert_eq!(pattern.extract("\u{e9}"), None);
        assert_eq!(pattern.extract("Foo_1-2-3-4.zip"), Some("1-2-3-4"));
    }
}
