//! Expansion engine for W3C PROV templates.
//!
//! A template is a PROV document whose records may reference variables
//! (`var:`/`vargen:` qualified names) instead of concrete identifiers and
//! attribute values. Given a template and a set of variable bindings,
//! [`expand`] produces a fully concrete PROV document: every bound
//! variable is substituted, `tmpl:linked` groups are expanded together
//! in lock step, and `vargen:` identifiers are minted fresh.
//!
//! The crate is synchronous and does no I/O; callers own parsing the
//! template/bindings into [`model::Document`]/[`bindings::BindingStore`]
//! (from JSON, RDF, or any other serialization) and own serializing the
//! result back out.
//!
//! ```no_run
//! use prov_template_expand::{expand, bindings::BindingStore, model::Document, ExpandOptions};
//!
//! # fn run(template: Document, bindings: BindingStore) -> Result<(), Box<dyn std::error::Error>> {
//! let expanded = expand(&template, &bindings, &ExpandOptions::default())?;
//! # let _ = expanded;
//! # Ok(())
//! # }
//! ```

pub mod bindings;
pub mod error;
pub mod expander;
pub mod linker;
pub mod model;
pub mod namespace;
pub mod resolver;

pub use error::ExpandError;
pub use expander::{expand, ExpandOptions};
