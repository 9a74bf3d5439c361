//! Pipe-delimited provenance for package-style artifacts.
//!
//! NuGet packages record themselves and their declared dependencies:
//!
//! ```text
//! PKG|<name>|<version>|<serverAddress>|<targetFramework>
//! DEP|<depName>|<depVersion>|<serverAddress>|<depTargetFramework>
//! ```
//!
//! Azure DevOps build artifacts record the build they came from on a single line:
//!
//! ```text
//! ADOBUILDARTIFACT|<artifact>|<buildId>|<definitionId>|<project>|<organization>
//! ```

use crate::core::LkgError;
use crate::utils::atomic_write;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const PKG_TAG: &str = "PKG";
const DEP_TAG: &str = "DEP";
const ADO_TAG: &str = "ADOBUILDARTIFACT";

fn corrupt(path: &Path, reason: impl Into<String>) -> LkgError {
    LkgError::ProvenanceCorrupt {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, LkgError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(path: &Path, content: String) -> Result<(), LkgError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || atomic_write(&path, content.as_bytes()))
        .await
        .map_err(LkgError::other)?
        .map_err(|e| LkgError::other(format!("{e:#}")))
}

/// One `PKG` or `DEP` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NuGetRecord {
    /// Package id
    pub name: String,
    /// Version (or declared requirement, for dependencies)
    pub version: String,
    /// Feed address it came from
    pub server_address: String,
    /// Target framework
    pub target_framework: String,
}

impl NuGetRecord {
    fn to_line(&self, tag: &str) -> String {
        [tag, self.name.as_str(), self.version.as_str(), self.server_address.as_str(), self.target_framework.as_str()]
            .join("|")
    }
}

/// Provenance of one NuGet package and its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NuGetProvenance {
    /// The package itself
    pub package: NuGetRecord,
    /// Declared dependencies
    pub dependencies: Vec<NuGetRecord>,
}

impl NuGetProvenance {
    /// Conventional file name: `<alias>.provenance.txt`.
    #[must_use]
    pub fn file_name(alias: &str) -> String {
        format!("{alias}.provenance.txt")
    }

    /// Parses the record text.
    ///
    /// Lines missing the target framework inherit the package's framework.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ProvenanceCorrupt`] when there is no `PKG` line or a
    /// `PKG`/`DEP` line has fewer than four fields.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, LkgError> {
        let mut package: Option<(NuGetRecord, bool)> = None;
        let mut dependencies = Vec::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let fields: Vec<&str> = line.split('|').collect();
            let tag = fields[0];
            if tag != PKG_TAG && tag != DEP_TAG {
                continue;
            }
            if fields.len() < 4 {
                return Err(corrupt(origin, format!("expected at least 4 fields in '{line}'")));
            }
            let framework = fields.get(4).map(|f| (*f).to_string());
            let record = NuGetRecord {
                name: fields[1].to_string(),
                version: fields[2].to_string(),
                server_address: fields[3].to_string(),
                target_framework: framework.clone().unwrap_or_default(),
            };
            if tag == PKG_TAG {
                if package.is_none() {
                    package = Some((record, framework.is_some()));
                }
            } else {
                dependencies.push((record, framework.is_some()));
            }
        }

        let (package, _) = package.ok_or_else(|| corrupt(origin, "no PKG record"))?;
        let dependencies = dependencies
            .into_iter()
            .map(|(mut dep, has_framework)| {
                if !has_framework {
                    dep.target_framework.clone_from(&package.target_framework);
                }
                dep
            })
            .collect();

        Ok(Self {
            package,
            dependencies,
        })
    }

    /// Renders the record text, `PKG` first.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = self.package.to_line(PKG_TAG);
        out.push('\n');
        for dep in &self.dependencies {
            out.push_str(&dep.to_line(DEP_TAG));
            out.push('\n');
        }
        out
    }

    /// Reads the record at `path`; a missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// See [`NuGetProvenance::parse`].
    pub async fn read(path: &Path) -> Result<Option<Self>, LkgError> {
        match read_optional(path).await? {
            Some(text) => Self::parse(&text, path).map(Some),
            None => Ok(None),
        }
    }

    /// Atomically writes the record to `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub async fn write(&self, path: &Path) -> Result<(), LkgError> {
        write_atomic(path, self.render()).await
    }
}

/// Provenance of one Azure DevOps build artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdoProvenance {
    /// Artifact name within the build
    pub artifact: String,
    /// Build id
    pub build_id: u64,
    /// Pipeline definition id
    pub definition_id: u64,
    /// Azure DevOps project
    pub project: String,
    /// Azure DevOps organization
    pub organization: String,
}

impl AdoProvenance {
    /// Sidecar path for an artifact extracted to `destination`:
    /// `<parent>/<dirname>.provenance.txt`.
    #[must_use]
    pub fn path_for(destination: &Path) -> PathBuf {
        let name = destination.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        destination.with_file_name(format!("{name}.provenance.txt"))
    }

    /// Parses the single-line record.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ProvenanceCorrupt`] unless the text is exactly one
    /// `ADOBUILDARTIFACT` line with six fields and numeric ids.
    pub fn parse(text: &str, origin: &Path) -> Result<Self, LkgError> {
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let [line] = lines.as_slice() else {
            return Err(corrupt(origin, format!("expected 1 line, found {}", lines.len())));
        };

        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() < 6 || fields[0] != ADO_TAG {
            return Err(corrupt(origin, format!("expected 6 {ADO_TAG} fields, found '{line}'")));
        }
        let id = |text: &str, what: &str| {
            text.parse::<u64>().map_err(|_| corrupt(origin, format!("{what} '{text}' is not numeric")))
        };

        Ok(Self {
            artifact: fields[1].to_string(),
            build_id: id(fields[2], "build id")?,
            definition_id: id(fields[3], "definition id")?,
            project: fields[4].to_string(),
            organization: fields[5].to_string(),
        })
    }

    /// Renders the single-line record.
    #[must_use]
    pub fn render(&self) -> String {
        format!(
            "{ADO_TAG}|{}|{}|{}|{}|{}\n",
            self.artifact, self.build_id, self.definition_id, self.project, self.organization
        )
    }

    /// Reads the record at `path`; a missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// See [`AdoProvenance::parse`].
    pub async fn read(path: &Path) -> Result<Option<Self>, LkgError> {
        match read_optional(path).await? {
            Some(text) => Self::parse(&text, path).map(Some),
            None => Ok(None),
        }
    }

    /// Atomically writes the record to `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub async fn write(&self, path: &Path) -> Result<(), LkgError> {
        write_atomic(path, self.render()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nuget_provenance_parse() {
        let text = "PKG|Foo|1.2.0|https://feed/v2|net6.0\nDEP|Bar|[2.0,3.0)|https://feed/v2\nDEP|Baz|1.0|https://feed/v2|net48\n";
        let prov = NuGetProvenance::parse(text, Path::new("Foo.provenance.txt")).unwrap();
        assert_eq!(prov.package.name, "Foo");
        assert_eq!(prov.dependencies.len(), 2);
        assert_eq!(prov.dependencies[0].target_framework, "net6.0");
        assert_eq!(prov.dependencies[1].target_framework, "net48");
    }

    #[test]
    fn test_nuget_provenance_requires_pkg() {
        let err = NuGetProvenance::parse("DEP|Bar|1|u|f\n", Path::new("p")).unwrap_err();
        assert!(matches!(err, LkgError::ProvenanceCorrupt { .. }));
        assert!(NuGetProvenance::parse("PKG|Foo|1\n", Path::new("p")).is_err());
    }

    #[tokio::test]
    async fn test_nuget_provenance_write_then_read() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(NuGetProvenance::file_name("Foo"));
        assert!(NuGetProvenance::read(&path).await.unwrap().is_none());

        let prov = NuGetProvenance {
            package: NuGetRecord {
                name: "Foo".into(),
                version: "1.2.0".into(),
                server_address: "https://feed/v2".into(),
                target_framework: "net6.0".into(),
            },
            dependencies: Vec::new(),
        };
        prov.write(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "PKG|Foo|1.2.0|https://feed/v2|net6.0\n");
        assert_eq!(NuGetProvenance::read(&path).await.unwrap(), Some(prov));
    }

    #[test]
    fn test_ado_provenance_line() {
        let prov = AdoProvenance {
            artifact: "drop".into(),
            build_id: 4321,
            definition_id: 77,
            project: "Proj".into(),
            organization: "org".into(),
        };
        assert_eq!(prov.render(), "ADOBUILDARTIFACT|drop|4321|77|Proj|org\n");
        assert_eq!(AdoProvenance::parse(&prov.render(), Path::new("p")).unwrap(), prov);
    }

    #[test]
    fn test_ado_provenance_rejects_bad_shapes() {
        assert!(AdoProvenance::parse("", Path::new("p")).is_err());
        assert!(AdoProvenance::parse("ADOBUILDARTIFACT|drop|1|2|p\n", Path::new("p")).is_err());
        assert!(AdoProvenance::parse("ADOBUILDARTIFACT|drop|x|2|p|o\n", Path::new("p")).is_err());
        assert!(AdoProvenance::parse("ADOBUILDARTIFACT|a|1|2|p|o\nADOBUILDARTIFACT|a|1|2|p|o\n", Path::new("p")).is_err());
    }

    #[test]
    fn test_ado_path_for() {
        assert_eq!(
            AdoProvenance::path_for(Path::new("/out/adobuildartifact/drop")),
            PathBuf::from("/out/adobuildartifact/drop.provenance.txt")
        );
    }
}
