//! Namespace registry — §4.1.
//!
//! Maintains the bidirectional prefix↔IRI mapping and the reserved
//! prefixes a template may use (`tmpl`, `prov`, `var`, `vargen`, and a
//! configurable UUID namespace).

use std::collections::HashMap;

use crate::error::ExpandError;
use crate::model::QualifiedName;

pub const TMPL_IRI: &str = "http://openprovenance.org/tmpl#";
pub const PROV_IRI: &str = "http://www.w3.org/ns/prov#";
pub const DEFAULT_UUID_PREFIX: &str = "uuid";
pub const DEFAULT_UUID_IRI: &str = "urn:uuid:";

/// Bidirectional prefix↔IRI registry, seeded with the reserved prefixes
/// and overridable by a template's own namespace declarations.
#[derive(Clone, Debug)]
pub struct NamespaceRegistry {
    prefix_to_iri: HashMap<String, String>,
    uuid_prefix: String,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        let mut prefix_to_iri = HashMap::new();
        prefix_to_iri.insert("tmpl".to_string(), TMPL_IRI.to_string());
        prefix_to_iri.insert("prov".to_string(), PROV_IRI.to_string());
        prefix_to_iri.insert(DEFAULT_UUID_PREFIX.to_string(), DEFAULT_UUID_IRI.to_string());
        NamespaceRegistry {
            prefix_to_iri,
            uuid_prefix: DEFAULT_UUID_PREFIX.to_string(),
        }
    }
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a document's namespace declarations, plus an
    /// optional override for the UUID-generator prefix (spec.md §6
    /// `ExpandOptions::uuid_namespace`).
    ///
    /// If the template declares a namespace whose prefix equals the
    /// configured UUID prefix, that declaration overrides the default IRI
    /// for the scope of the expansion (§4.1).
    pub fn from_declarations<'a>(
        declarations: impl IntoIterator<Item = (&'a str, &'a str)>,
        uuid_override: Option<&QualifiedName>,
    ) -> Self {
        let mut reg = Self::default();
        if let Some(qn) = uuid_override {
            reg.uuid_prefix = qn.prefix.clone();
            reg.prefix_to_iri
                .insert(qn.prefix.clone(), qn.namespace_iri.clone());
        }
        for (prefix, iri) in declarations {
            reg.prefix_to_iri.insert(prefix.to_string(), iri.to_string());
        }
        reg
    }

    pub fn register(&mut self, prefix: impl Into<String>, iri: impl Into<String>) {
        self.prefix_to_iri.insert(prefix.into(), iri.into());
    }

    pub fn iri_for(&self, prefix: &str) -> Option<&str> {
        self.prefix_to_iri.get(prefix).map(String::as_str)
    }

    pub fn uuid_namespace(&self) -> QualifiedName {
        let iri = self
            .iri_for(&self.uuid_prefix)
            .unwrap_or(DEFAULT_UUID_IRI)
            .to_string();
        // Only prefix/namespace matter for a namespace marker; local_part is unused.
        QualifiedName::new(self.uuid_prefix.clone(), String::new(), iri)
    }

    /// Parse a `prefix:localPart` string into a `QualifiedName`, resolving
    /// the prefix against this registry. Splits on the first `:`; more
    /// than one `:` is an error (§4.1). An unregistered prefix is not an
    /// error — the IRI is taken to be the bare prefix followed by `:`, so
    /// that ad hoc prefixes (e.g. `ex:`) still round-trip through
    /// canonical-form equality.
    pub fn parse_qname(&self, s: &str) -> Result<QualifiedName, ExpandError> {
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        if parts.len() < 2 {
            return Err(ExpandError::BindingsStructureError {
                detail: format!("'{}' is not a qualified name (missing ':')", s),
            });
        }
        if parts.len() > 2 {
            return Err(ExpandError::BindingsStructureError {
                detail: format!("'{}' has more than one ':' — not a valid qualified name", s),
            });
        }
        let prefix = parts[0];
        let local = parts[1];
        let iri = self
            .iri_for(prefix)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:", prefix));
        Ok(QualifiedName::new(prefix, local, iri))
    }
}
