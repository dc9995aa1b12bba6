//! The typed PROV template data model: qualified names, literals, values,
//! attributes, records, bundles and documents.
//!
//! Mirrors the shape of `compiler::ir::IRNode` (a tagged enum with an
//! `id()`/`identifier()` accessor) but generalized from "one BPMN element
//! kind" to "one PROV element or relation kind," since a template record
//! can be any of the fourteen relation types in the arity table (see
//! [`RelationType`]) as well as an entity/activity/agent.

use serde::{Deserialize, Serialize};

/// A canonical `prefix:localPart` pair resolved against a namespace IRI.
///
/// Equality is defined by `(namespace_iri, local_part)`, not by prefix —
/// two qualified names sharing an IRI under different prefixes compare
/// equal, matching the PROV data model's canonical-name semantics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualifiedName {
    pub prefix: String,
    pub local_part: String,
    pub namespace_iri: String,
}

impl QualifiedName {
    pub fn new(
        prefix: impl Into<String>,
        local_part: impl Into<String>,
        namespace_iri: impl Into<String>,
    ) -> Self {
        QualifiedName {
            prefix: prefix.into(),
            local_part: local_part.into(),
            namespace_iri: namespace_iri.into(),
        }
    }

    /// Canonical `prefix:local` string form, used as a binding-store key.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.prefix, self.local_part)
    }

    pub fn is_prefix(&self, prefix: &str) -> bool {
        self.prefix == prefix
    }
}

impl PartialEq for QualifiedName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace_iri == other.namespace_iri && self.local_part == other.local_part
    }
}

impl Eq for QualifiedName {}

impl std::hash::Hash for QualifiedName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.namespace_iri.hash(state);
        self.local_part.hash(state);
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// A literal value with an optional datatype (itself a qualified name).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub lexical_value: String,
    pub datatype: Option<QualifiedName>,
}

impl Literal {
    pub fn new(lexical_value: impl Into<String>) -> Self {
        Literal {
            lexical_value: lexical_value.into(),
            datatype: None,
        }
    }

    pub fn typed(lexical_value: impl Into<String>, datatype: QualifiedName) -> Self {
        Literal {
            lexical_value: lexical_value.into(),
            datatype: Some(datatype),
        }
    }
}

/// Raw primitive scalars that may appear without a surrounding `Literal`,
/// per spec.md §3 ("Value is the sum of... raw primitive").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Primitive {
    String(String),
    Number(f64),
    Bool(bool),
}

/// The sum type every attribute value, formal argument, and identifier is
/// drawn from. Variables are represented as `QualifiedName`s whose prefix
/// is `var` or `vargen` — there is no separate `Variable` variant, matching
/// spec.md §3's "Variables in templates are always represented as
/// QualifiedName."
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    QName(QualifiedName),
    Literal(Literal),
    Primitive(Primitive),
}

impl Value {
    pub fn as_qname(&self) -> Option<&QualifiedName> {
        match self {
            Value::QName(q) => Some(q),
            _ => None,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.as_qname(), Some(q) if q.is_prefix("var") || q.is_prefix("vargen"))
    }
}

impl From<QualifiedName> for Value {
    fn from(q: QualifiedName) -> Self {
        Value::QName(q)
    }
}

impl From<Literal> for Value {
    fn from(l: Literal) -> Self {
        Value::Literal(l)
    }
}

/// One `(key, value)` pair in a record's attribute list. Attribute lists
/// are ordered `Vec`s, not maps — spec.md §9 warns implementations must
/// not deduplicate multi-valued attributes via a key-unique map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: QualifiedName,
    pub value: Value,
}

impl Attribute {
    pub fn new(key: QualifiedName, value: Value) -> Self {
        Attribute { key, value }
    }
}

/// The closed set of PROV element and relation kinds a template record can
/// carry. Relation variants correspond one-to-one with the arity table in
/// spec.md §4.5; element variants cover the three PROV core element types.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    Entity,
    Activity,
    Agent,
    WasGeneratedBy,
    Used,
    WasInformedBy,
    WasStartedBy,
    WasEndedBy,
    WasInvalidatedBy,
    WasDerivedFrom,
    WasAttributedTo,
    WasAssociatedWith,
    ActedOnBehalfOf,
    WasInfluencedBy,
    AlternateOf,
    SpecializationOf,
    HadMember,
    /// A relation type outside the closed set above — only ever produced
    /// by an upstream collaborator (a parser) feeding in a PROV type this
    /// crate doesn't recognize. Always fails expansion with
    /// [`crate::error::ExpandError::UnknownRelation`] (§4.5's relation
    /// arity table, "Unknown relation type").
    Other(String),
}

impl RecordType {
    pub fn is_element(&self) -> bool {
        matches!(self, RecordType::Entity | RecordType::Activity | RecordType::Agent)
    }

    pub fn is_relation(&self) -> bool {
        !self.is_element()
    }
}

/// One record in a template bundle: an element (entity/activity/agent) or
/// a relation. Relations carry their formal arguments as an explicit
/// ordered vector keyed by formal name, separate from `extra_attributes`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub identifier: Option<QualifiedName>,
    pub record_type: RecordType,
    /// Ordered `(formal key, value)` pairs. Empty for element records.
    /// `value` is `None` when the template leaves an optional formal
    /// position unbound (e.g. `prov:time` with no `tmpl:time` override).
    pub formal_arguments: Vec<(String, Option<Value>)>,
    pub extra_attributes: Vec<Attribute>,
}

impl Record {
    pub fn element(identifier: QualifiedName, record_type: RecordType) -> Self {
        debug_assert!(record_type.is_element());
        Record {
            identifier: Some(identifier),
            record_type,
            formal_arguments: Vec::new(),
            extra_attributes: Vec::new(),
        }
    }

    pub fn relation(record_type: RecordType) -> Self {
        debug_assert!(record_type.is_relation());
        Record {
            identifier: None,
            record_type,
            formal_arguments: Vec::new(),
            extra_attributes: Vec::new(),
        }
    }

    /// `tmpl:linked` target, if this record's `extra_attributes` declare one.
    pub fn linked_target(&self) -> Option<&QualifiedName> {
        self.extra_attributes.iter().find_map(|a| {
            if a.key.is_prefix("tmpl") && a.key.local_part == "linked" {
                a.value.as_qname()
            } else {
                None
            }
        })
    }
}

/// A named group of records — one PROV bundle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bundle {
    pub identifier: QualifiedName,
    pub records: Vec<Record>,
}

impl Bundle {
    pub fn elements(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.record_type.is_element())
    }

    pub fn relations(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.record_type.is_relation())
    }
}

/// A full PROV document: namespace declarations, top-level records, and
/// bundles. Used both for templates and for expansion output.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Document {
    pub namespaces: Vec<(String, String)>,
    pub default_namespace: Option<String>,
    pub records: Vec<Record>,
    pub bundles: Vec<Bundle>,
}

impl Document {
    pub fn new() -> Self {
        Document::default()
    }
}
