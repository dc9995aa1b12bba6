//! Expansion error taxonomy — §7 of the specification.
//!
//! One variant per error kind; all fatal to the current `expand` call (no
//! recovery inside the core). Mirrors
//! `rust/crates/esper_compiler/src/error.rs`'s enum-of-named-errors shape.

use thiserror::Error;

/// Structured failure from [`crate::expand`]. The first error encountered
/// aborts the call — there is no partial-result recovery.
#[derive(Debug, Clone, Error)]
pub enum ExpandError {
    /// Malformed bindings: unknown attribute keys, non-contiguous index
    /// sequences, non-`var`/`vargen` identifiers, malformed qualified names.
    #[error("bindings structure error: {detail}")]
    BindingsStructureError { detail: String },

    /// A `var:`-prefixed identifier occupies a mandatory position and has
    /// no binding.
    #[error("unbound mandatory variable: {variable}")]
    UnboundMandatoryVariable { variable: String },

    /// Members of a `tmpl:linked` group have differing non-zero
    /// cardinalities.
    #[error("incorrect number of bindings for group variable(s) {group:?}: {detail}")]
    IncorrectNumberOfBindingsForGroupVariable { group: Vec<String>, detail: String },

    /// An attribute or relation-instance index exceeds the available
    /// bindings for that variable.
    #[error(
        "incorrect number of bindings for statement variable {variable}: index {index} but only {available} available"
    )]
    IncorrectNumberOfBindingsForStatementVariable {
        variable: String,
        index: usize,
        available: usize,
    },

    /// The template contains a relation whose PROV type is not in the
    /// arity table.
    #[error("unknown relation type: {relation_type}")]
    UnknownRelation { relation_type: String },

    /// The cartesian-product size for a relation's expansion exceeded the
    /// configured cap (`ExpandOptions::max_expansions`).
    #[error("expansion limit exceeded: attempted {attempted} instances, limit is {limit}")]
    ExpansionLimitExceeded { limit: usize, attempted: usize },
}
