//! Provenance records pinning what produced the artifact currently on disk.
//!
//! Every successful LKG fetch leaves `<destination>/LkgProvenance.xml`:
//!
//! ```xml
//! <?xml version="1.0" encoding="utf-8"?>
//! <Provenance>
//!     <LKG LKGSourceName="Foo" Version="1-2-3-4" Type="1" Url="rsync://host/lkgs/Foo/1-2-3-4"/>
//! </Provenance>
//! ```
//!
//! All four attributes are mandatory. A record that is present but incomplete is
//! [`LkgError::ProvenanceCorrupt`], never "missing": the directory it describes may
//! hold a half-written tree from a crashed fetch.
//!
//! Package-style artifacts additionally carry pipe-delimited records, see
//! [`package`].

pub mod package;

pub use package::{AdoProvenance, NuGetProvenance, NuGetRecord};

use crate::constants::LKG_PROVENANCE_FILE;
use crate::core::LkgError;
use crate::source::ServerKind;
use crate::utils::atomic_write;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "Provenance")]
struct ProvenanceDocument {
    #[serde(rename = "LKG", default, skip_serializing_if = "Option::is_none")]
    lkg: Option<LkgElement>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LkgElement {
    #[serde(rename = "@LKGSourceName", default)]
    source_name: Option<String>,
    #[serde(rename = "@Version", default)]
    version: Option<String>,
    #[serde(rename = "@Type", default)]
    kind: Option<String>,
    #[serde(rename = "@Url", default)]
    url: Option<String>,
}

/// One LKG provenance record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRecord {
    /// Logical LKG source name
    pub name: String,
    /// Resolved version (dash form)
    pub version: String,
    /// Kind of server it came from
    pub server_kind: ServerKind,
    /// Resolved download address
    pub url: String,
}

/// Location of the provenance file for an artifact directory.
#[must_use]
pub fn provenance_path(destination: &Path) -> PathBuf {
    destination.join(LKG_PROVENANCE_FILE)
}

impl ProvenanceRecord {
    /// Parses the XML form.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ProvenanceCorrupt`] naming `origin` when the document is
    /// malformed or a mandatory attribute is missing.
    pub fn parse(xml: &str, origin: &Path) -> Result<Self, LkgError> {
        let corrupt = |reason: String| LkgError::ProvenanceCorrupt {
            path: origin.display().to_string(),
            reason,
        };

        let doc: ProvenanceDocument = quick_xml::de::from_str(xml).map_err(|e| corrupt(e.to_string()))?;
        let lkg = doc.lkg.ok_or_else(|| corrupt("missing LKG element".into()))?;
        let require = |value: Option<String>, attr: &str| {
            value
                .filter(|v| !v.is_empty())
                .ok_or_else(|| corrupt(format!("missing {attr} attribute")))
        };

        let name = require(lkg.source_name, "LKGSourceName")?;
        let version = require(lkg.version, "Version")?;
        let kind_text = require(lkg.kind, "Type")?;
        let url = require(lkg.url, "Url")?;

        let server_kind = kind_text
            .trim()
            .parse::<u8>()
            .map_err(|_| corrupt(format!("Type '{kind_text}' is not a server kind index")))
            .and_then(|i| ServerKind::from_index(i).map_err(|e| corrupt(e.to_string())))?;

        Ok(Self {
            name,
            version,
            server_kind,
            url,
        })
    }

    /// Renders the XML form.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::XmlError`] if serialization fails.
    pub fn to_xml(&self) -> Result<String, LkgError> {
        let doc = ProvenanceDocument {
            lkg: Some(LkgElement {
                source_name: Some(self.name.clone()),
                version: Some(self.version.clone()),
                kind: Some(self.server_kind.index().to_string()),
                url: Some(self.url.clone()),
            }),
        };

        let mut body = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut body);
        serializer.indent(' ', 4);
        doc.serialize(serializer)?;
        Ok(format!("{XML_DECLARATION}\n{body}\n"))
    }

    /// Reads the record at `path`. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::ProvenanceCorrupt`] for malformed records and I/O errors
    /// other than "not found".
    pub async fn read(path: &Path) -> Result<Option<Self>, LkgError> {
        match tokio::fs::read_to_string(path).await {
            Ok(xml) => Self::parse(&xml, path).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replaces the record at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub async fn write(&self, path: &Path) -> Result<(), LkgError> {
        let xml = self.to_xml()?;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || atomic_write(&path, xml.as_bytes()))
            .await
            .map_err(LkgError::other)?
            .map_err(|e| LkgError::other(format!("{e:#}")))
    }
}

/// `true` iff `destination` holds a provenance record whose URL equals
/// `download_url` exactly. No normalization is applied.
///
/// # Errors
///
/// Propagates [`LkgError::ProvenanceCorrupt`]: a damaged record must not be
/// mistaken for "stale".
pub async fn is_up_to_date(download_url: &str, destination: &Path) -> Result<bool, LkgError> {
    let Some(record) = ProvenanceRecord::read(&provenance_path(destination)).await? else {
        debug!("No provenance in {}", destination.display());
        return Ok(false);
    };
    let current = record.url == download_url;
    if !current {
        debug!("Provenance in {} is for {}, wanted {}", destination.display(), record.url, download_url);
    }
    Ok(current)
}
