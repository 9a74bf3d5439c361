//! Builders for sample build descriptions.

use crate::bdf::BuildDescription;
use crate::source::ServerKind;
use quick_xml::escape::escape;
use std::fmt::Write as _;
use std::sync::Arc;

/// Builds BDF XML one element at a time.
#[derive(Clone, Debug, Default)]
pub struct BdfFixture {
    product: String,
    version: String,
    built: Vec<String>,
    map: Vec<(String, String, String)>,
    sources: Vec<(String, String, ServerKind, String)>,
    unsaved: Vec<(String, String)>,
}

impl BdfFixture {
    /// A BDF for `product` at `version` with no content.
    pub fn new(product: &str, version: &str) -> Self {
        Self {
            product: product.to_string(),
            version: version.to_string(),
            ..Self::default()
        }
    }

    /// Adds a built context.
    #[must_use]
    pub fn built(mut self, context: &str) -> Self {
        self.built.push(context.to_string());
        self
    }

    /// Adds an LKG map entry.
    #[must_use]
    pub fn map(mut self, name: &str, lkg_source: &str, output_dir: &str) -> Self {
        self.map.push((name.to_string(), lkg_source.to_string(), output_dir.to_string()));
        self
    }

    /// Adds an LKG source record.
    #[must_use]
    pub fn source(mut self, name: &str, version: &str, kind: ServerKind, address: &str) -> Self {
        self.sources.push((name.to_string(), version.to_string(), kind, address.to_string()));
        self
    }

    /// Adds an unsaved-LKG record.
    #[must_use]
    pub fn unsaved(mut self, context: &str, value: &str) -> Self {
        self.unsaved.push((context.to_string(), value.to_string()));
        self
    }

    /// Product name.
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Version text as written.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Renders the document.
    pub fn to_xml(&self) -> String {
        let mut xml = format!(
            r#"<BuildDescription Product="{}" Version="{}">"#,
            escape(self.product.as_str()),
            escape(self.version.as_str())
        );

        if !self.built.is_empty() {
            xml.push_str("<BuiltContexts>");
            for ctx in &self.built {
                let _ = write!(xml, r#"<Context Name="{}"/>"#, escape(ctx.as_str()));
            }
            xml.push_str("</BuiltContexts>");
        }

        xml.push_str("<LkgMap>");
        for (name, source, dir) in &self.map {
            let _ = write!(
                xml,
                r#"<Entry Name="{}" LkgSource="{}" OutputDir="{}"/>"#,
                escape(name.as_str()),
                escape(source.as_str()),
                escape(dir.as_str())
            );
        }
        xml.push_str("</LkgMap><LkgSources>");
        for (name, version, kind, address) in &self.sources {
            let _ = write!(
                xml,
                r#"<LkgSource Name="{}" Version="{}" ServerType="{}" ServerAddress="{}"/>"#,
                escape(name.as_str()),
                escape(version.as_str()),
                kind.index(),
                escape(address.as_str())
            );
        }
        xml.push_str("</LkgSources><UnsavedLkgs>");
        for (ctx, value) in &self.unsaved {
            let _ = write!(xml, r#"<Unsaved Context="{}" Value="{}"/>"#, escape(ctx.as_str()), escape(value.as_str()));
        }
        xml.push_str("</UnsavedLkgs></BuildDescription>");
        xml
    }

    /// Parses the rendered document.
    ///
    /// # Panics
    ///
    /// When the fixture does not describe a loadable BDF.
    pub fn load(&self) -> Arc<BuildDescription> {
        Arc::new(BuildDescription::load(&self.to_xml(), "fixture").expect("fixture BDF loads"))
    }
}
