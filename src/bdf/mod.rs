//! Build description files (BDFs).
//!
//! A BDF is the manifest of one build: which contexts it produced, where each of
//! its own dependencies came from, and which of them were built from source rather
//! than pulled as an LKG.
//!
//! ```xml
//! <BuildDescription Product="P" Version="1-0-0-5">
//!   <BuiltContexts><Context Name="Foo.PartFile.xml"/></BuiltContexts>
//!   <LkgMap><Entry Name="Bar.PartFile.xml:BarPart" LkgSource="Bar" OutputDir="BarOutputDir"/></LkgMap>
//!   <LkgSources><LkgSource Name="Bar" Version="1-0-0-3" ServerType="0" ServerAddress="..."/></LkgSources>
//!   <UnsavedLkgs><Unsaved Context="Baz.PartFile.xml" Value="Baz.PartFile.xml:BazPart"/></UnsavedLkgs>
//! </BuildDescription>
//! ```
//!
//! A loaded [`BuildDescription`] is immutable. The resolver only reads from it to
//! build a server or BDF reference one level further down.
//!
//! # LKG map lookup
//!
//! Entry names may contain glob wildcards (`*`, `?`). [`BuildDescription::get_lkg_map_entry`]
//! prefers a case-insensitive exact match over any wildcard match. Among several
//! wildcard matches the first one in document order wins.

pub mod cache;

pub use cache::{BdfCache, BdfServer, BdfStatus, CacheEntry, CachedBdf, Consumer, HttpBdfServer, UsageEntry};

use crate::core::LkgError;
use crate::source::LkgServer;
use crate::version::Version;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// One `LkgMap/Entry`: where a context's dependency was sourced from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LkgMapEntry {
    /// Context short name (`partFile:partName`), possibly with wildcards
    #[serde(rename = "@Name")]
    pub name: String,
    /// LKG source the dependency came from
    #[serde(rename = "@LkgSource")]
    pub lkg_source: String,
    /// Output directory inside that source
    #[serde(rename = "@OutputDir", default)]
    pub output_dir: String,
}

impl LkgMapEntry {
    fn is_wildcard(&self) -> bool {
        self.name.contains(['*', '?', '['])
    }
}

/// One `LkgSources/LkgSource`: a sub-part pulled as an LKG during the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BdfLkgSource {
    /// LKG source name
    #[serde(rename = "@Name")]
    pub name: String,
    /// Version that was used (dash form)
    #[serde(rename = "@Version")]
    pub version: String,
    /// Server kind index or name
    #[serde(rename = "@ServerType")]
    pub server_type: String,
    /// Server address template
    #[serde(rename = "@ServerAddress")]
    pub server_address: String,
}

impl BdfLkgSource {
    /// A synthetic server for this upstream source.
    ///
    /// # Errors
    ///
    /// See [`LkgServer::from_bdf`].
    pub fn server(&self) -> Result<LkgServer, LkgError> {
        LkgServer::from_bdf(&self.name, &self.server_type, &self.server_address)
    }

    /// The recorded version, if it parses.
    #[must_use]
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }
}

/// A name/version pair (`SdkSources/SdkSource`, `NugetPackages/Package`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedVersion {
    /// Name
    #[serde(rename = "@Name")]
    pub name: String,
    /// Version
    #[serde(rename = "@Version")]
    pub version: String,
}

/// A universal package resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpackRecord {
    #[serde(rename = "@Name")]
    pub name: String,
    #[serde(rename = "@Alias", default)]
    pub alias: String,
    #[serde(rename = "@Version")]
    pub version: String,
    #[serde(rename = "@Url", default)]
    pub url: String,
    #[serde(rename = "@Feed", default)]
    pub feed: String,
}

/// An Azure DevOps build artifact resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoArtifactRecord {
    #[serde(rename = "@Alias", default)]
    pub alias: String,
    #[serde(rename = "@Name")]
    pub name: String,
    #[serde(rename = "@BuildId")]
    pub build_id: u64,
    #[serde(rename = "@DefinitionId")]
    pub definition_id: u64,
    #[serde(rename = "@Project")]
    pub project: String,
    #[serde(rename = "@Organization")]
    pub organization: String,
}

/// A context whose dependency was built from source during this build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsavedLkg {
    #[serde(rename = "@Context", default)]
    pub context: String,
    /// `partFile:partName`
    #[serde(rename = "@Value")]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ContextElement {
    #[serde(rename = "@Name")]
    name: String,
}

macro_rules! xml_list {
    ($wrapper:ident, $item:literal, $ty:ty) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        struct $wrapper {
            #[serde(rename = $item, default)]
            items: Vec<$ty>,
        }
    };
}

xml_list!(ContextList, "Context", ContextElement);
xml_list!(EntryList, "Entry", LkgMapEntry);
xml_list!(LkgSourceList, "LkgSource", BdfLkgSource);
xml_list!(SdkList, "SdkSource", NamedVersion);
xml_list!(PackageList, "Package", NamedVersion);
xml_list!(UpackList, "Upack", UpackRecord);
xml_list!(ArtifactList, "Artifact", AdoArtifactRecord);
xml_list!(UnsavedList, "Unsaved", UnsavedLkg);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "BuildDescription")]
struct BdfDocument {
    #[serde(rename = "@Product")]
    product: String,
    #[serde(rename = "@Version")]
    version: String,
    #[serde(rename = "BuiltContexts", default)]
    built_contexts: ContextList,
    #[serde(rename = "LkgMap", default)]
    lkg_map: EntryList,
    #[serde(rename = "LkgSources", default)]
    lkg_sources: LkgSourceList,
    #[serde(rename = "SdkSources", default)]
    sdk_sources: SdkList,
    #[serde(rename = "NugetPackages", default)]
    nuget_packages: PackageList,
    #[serde(rename = "Upacks", default)]
    upacks: UpackList,
    #[serde(rename = "AdoBuildArtifacts", default)]
    ado_artifacts: ArtifactList,
    #[serde(rename = "UnsavedLkgs", default)]
    unsaved_lkgs: UnsavedList,
}

/// One loaded build description.
#[derive(Debug, Clone)]
pub struct BuildDescription {
    product: String,
    version: Version,
    doc: BdfDocument,
}

impl BuildDescription {
    /// Parses BDF XML. `origin` names the file or request in errors.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::BdfParseError`] for malformed XML, a missing `Product`
    /// or a `Version` that is not a concrete version.
    pub fn load(xml: &str, origin: &str) -> Result<Self, LkgError> {
        let invalid = |reason: String| LkgError::BdfParseError {
            source_name: origin.to_string(),
            reason,
        };

        let doc: BdfDocument = quick_xml::de::from_str(xml).map_err(|e| invalid(e.to_string()))?;
        if doc.product.trim().is_empty() {
            return Err(invalid("empty Product attribute".into()));
        }
        let version = Version::parse(&doc.version).map_err(|e| invalid(e.to_string()))?;
        if !version.is_concrete() {
            return Err(invalid(format!("Version '{}' is not concrete", doc.version)));
        }

        Ok(Self {
            product: doc.product.trim().to_string(),
            version,
            doc,
        })
    }

    /// Renders the document back to XML.
    ///
    /// # Errors
    ///
    /// Returns [`LkgError::XmlError`] if serialization fails.
    pub fn to_xml(&self) -> Result<String, LkgError> {
        let mut doc = self.doc.clone();
        doc.product.clone_from(&self.product);
        doc.version = self.version.string_for_filename();
        let mut body = String::new();
        let mut serializer = quick_xml::se::Serializer::new(&mut body);
        serializer.indent(' ', 2);
        doc.serialize(serializer)?;
        Ok(body)
    }

    /// Product name.
    #[must_use]
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Concrete product version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Contexts this build produced. Empty for builds that predate the list.
    #[must_use]
    pub fn built_contexts(&self) -> Vec<&str> {
        self.doc.built_contexts.items.iter().map(|c| c.name.as_str()).collect()
    }

    /// Case-insensitive membership in [`built_contexts`](Self::built_contexts).
    #[must_use]
    pub fn has_built_context(&self, context: &str) -> bool {
        self.doc.built_contexts.items.iter().any(|c| c.name.eq_ignore_ascii_case(context))
    }

    /// All LKG map entries in document order.
    #[must_use]
    pub fn lkg_map(&self) -> &[LkgMapEntry] {
        &self.doc.lkg_map.items
    }

    /// The LKG map entry for a context short name.
    ///
    /// An exact (case-insensitive) name match wins over any wildcard match; among
    /// wildcard matches the first in document order is kept.
    #[must_use]
    pub fn get_lkg_map_entry(&self, short_name: &str) -> Option<&LkgMapEntry> {
        let mut first_wildcard = None;
        for entry in &self.doc.lkg_map.items {
            if entry.name.eq_ignore_ascii_case(short_name) {
                return Some(entry);
            }
            if first_wildcard.is_some() || !entry.is_wildcard() {
                continue;
            }
            match Pattern::new(&entry.name) {
                Ok(pattern) if pattern.matches_with(short_name, MATCH_OPTIONS) => {
                    first_wildcard = Some(entry);
                }
                Ok(_) => {}
                Err(e) => debug!("Ignoring LKG map entry with bad pattern '{}': {}", entry.name, e),
            }
        }
        first_wildcard
    }

    /// Names of the sub-part LKG sources this build pulled.
    #[must_use]
    pub fn sub_part_lkg_source_names(&self) -> Vec<&str> {
        self.doc.lkg_sources.items.iter().map(|s| s.name.as_str()).collect()
    }

    /// Recorded sub-part LKG source by name (case-insensitive).
    #[must_use]
    pub fn lkg_source(&self, name: &str) -> Option<&BdfLkgSource> {
        self.doc.lkg_sources.items.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Version of a sub-part LKG source used by this build.
    #[must_use]
    pub fn lkg_version(&self, name: &str) -> Option<Version> {
        self.lkg_source(name).and_then(BdfLkgSource::parsed_version)
    }

    /// SDK resolutions recorded by this build.
    #[must_use]
    pub fn sdk_sources(&self) -> &[NamedVersion] {
        &self.doc.sdk_sources.items
    }

    /// NuGet package resolutions recorded by this build.
    #[must_use]
    pub fn nuget_packages(&self) -> &[NamedVersion] {
        &self.doc.nuget_packages.items
    }

    /// Universal package resolutions.
    #[must_use]
    pub fn upacks(&self) -> &[UpackRecord] {
        &self.doc.upacks.items
    }

    /// Azure DevOps build artifact resolutions.
    #[must_use]
    pub fn ado_artifacts(&self) -> &[AdoArtifactRecord] {
        &self.doc.ado_artifacts.items
    }

    /// `partFile:partName` strings of every unsaved LKG.
    #[must_use]
    pub fn unsaved_lkgs(&self) -> Vec<&str> {
        self.doc.unsaved_lkgs.items.iter().map(|u| u.value.as_str()).collect()
    }

    /// Unsaved LKGs split into `(partFile, partName)`. Malformed values are skipped.
    #[must_use]
    pub fn unsaved_lkg_parts(&self) -> Vec<(String, String)> {
        self.doc
            .unsaved_lkgs
            .items
            .iter()
            .filter_map(|u| match u.value.split_once(':') {
                Some((file, part)) if !file.is_empty() && !part.is_empty() && !part.contains(':') => {
                    Some((file.to_string(), part.to_string()))
                }
                _ => {
                    warn!("Skipping malformed unsaved LKG '{}' in {} {}", u.value, self.product, self.version);
                    None
                }
            })
            .collect()
    }

    /// Contexts this BDF can satisfy: built contexts plus the part files of every LKG
    /// map entry, deduplicated case-insensitively in document order.
    #[must_use]
    pub fn lkg_contexts(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let map_files = self.doc.lkg_map.items.iter().map(|e| e.name.split(':').next().unwrap_or_default());
        for context in self.built_contexts().into_iter().chain(map_files) {
            if !context.is_empty() && !out.iter().any(|c| c.eq_ignore_ascii_case(context)) {
                out.push(context.to_string());
            }
        }
        out
    }

    /// Cache key: `<product>_<dash-version>`, lower-cased.
    #[must_use]
    pub fn cache_key(&self) -> String {
        cache_key(&self.product, &self.version)
    }
}

/// Cache key for a product and version.
#[must_use]
pub fn cache_key(product: &str, version: &Version) -> String {
    format!("{}_{}", product, version.string_for_filename()).to_lowercase()
}

/// Short name used for LKG map lookups.
#[must_use]
pub fn context_short_name(build_context: &str, part_name: &str) -> String {
    format!("{build_context}:{part_name}")
}
