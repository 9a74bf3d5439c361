//! Inputs and outputs of one LKG resolution.

use crate::bdf::BuildDescription;
use crate::source::{LkgServer, ServerKind};
use crate::version::Version;
use std::sync::Arc;

/// A `(buildContext, partName)` pair naming the part that consumes a dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRef {
    /// Part file / build context
    pub build_context: String,
    /// Part name inside it
    pub part_name: String,
}

impl PartRef {
    /// Creates a part reference.
    pub fn new(build_context: impl Into<String>, part_name: impl Into<String>) -> Self {
        Self {
            build_context: build_context.into(),
            part_name: part_name.into(),
        }
    }
}

/// One resolution request.
#[derive(Debug, Clone)]
pub struct LkgRequest {
    /// LKG source name
    pub source: String,
    /// Target platform
    pub platform: String,
    /// Requested build context and part
    pub part: PartRef,
    /// Consuming part, when the request is for a transitively consumed sub-part
    pub parent: Option<PartRef>,
    /// Directory of the context inside a static tree
    pub context_dir: Option<String>,
    /// Product (as opposed to non-product) request; selects the completion flag
    pub is_product: bool,
    /// Static build context
    pub is_static: bool,
    /// Locked BDFs searched before anything else
    pub revision_list: Vec<Arc<BuildDescription>>,
}

impl LkgRequest {
    /// A dynamic, non-product request.
    pub fn new(
        source: impl Into<String>,
        platform: impl Into<String>,
        build_context: impl Into<String>,
        part_name: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            platform: platform.into(),
            part: PartRef::new(build_context, part_name),
            parent: None,
            context_dir: None,
            is_product: false,
            is_static: false,
            revision_list: Vec::new(),
        }
    }

    /// Marks the request static, with `context_dir` under the `static` folder.
    #[must_use]
    pub fn with_static_context(mut self, context_dir: impl Into<String>) -> Self {
        self.is_static = true;
        self.context_dir = Some(context_dir.into());
        self
    }

    /// Records the consuming part for the parent fallback.
    #[must_use]
    pub fn with_parent(mut self, parent: PartRef) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the product flag.
    #[must_use]
    pub const fn product(mut self, is_product: bool) -> Self {
        self.is_product = is_product;
        self
    }

    /// Adds locked BDFs to search first.
    #[must_use]
    pub fn with_revision_list(mut self, bdfs: Vec<Arc<BuildDescription>>) -> Self {
        self.revision_list = bdfs;
        self
    }
}

/// Where an artifact was found. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LkgDownloadInfo {
    /// Logical name the artifact is published under
    pub name: String,
    /// Target platform
    pub platform: String,
    /// Static build context
    pub is_static: bool,
    /// Fully substituted, backend-specific address
    pub address: String,
    /// Resolved version
    pub version: Version,
    /// Version text as the backend spells it
    pub version_text: String,
    /// Backend kind
    pub server_kind: ServerKind,
    /// Server address template with `$(name)` and `$(version)` filled in
    pub server_url: String,
    /// The server it was found on (possibly synthesized from a BDF)
    pub server: LkgServer,
}

/// Result of [`LkgResolver::use_last_known_good`](super::LkgResolver::use_last_known_good).
#[derive(Debug, Clone)]
pub struct PulledLkg {
    /// Source name
    pub name: String,
    /// Version the source is now locked to
    pub version: Version,
    /// The root BDF
    pub bdf: Arc<BuildDescription>,
    /// Contexts the BDF covers
    pub contexts: Vec<String>,
    /// `(partFile, partName)` of every unsaved LKG
    pub unsaved: Vec<(String, String)>,
}
