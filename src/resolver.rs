//! Value resolver — §4.4.
//!
//! Resolves a template `Value` (which may be a `var:`/`vargen:` variable)
//! to its concrete bound value(s), minting fresh `vargen:` identifiers on
//! first use and memoizing them for the lifetime of one bundle's
//! expansion so repeated occurrences resolve consistently.
//!
//! Grounded on `original_source/provtemplates/provconv.py`'s `match()`
//! function for the mint-on-first-use semantics.

use std::collections::HashMap;

use uuid::Uuid;

use crate::bindings::BindingStore;
use crate::error::ExpandError;
use crate::model::{QualifiedName, Value};

/// What `resolve` returns for one variable occurrence: either the
/// original value unchanged (not a variable, or an unbound `var:` name
/// left for the caller to judge), or the bound/minted list of values.
#[derive(Clone, Debug)]
pub enum Resolved {
    Unchanged(Value),
    List(Vec<Value>),
}

impl Resolved {
    /// The value at expansion index `index`, broadcasting a length-1 list
    /// (or an unchanged scalar) across every index. Out-of-range access
    /// against a longer list is the caller's `IncorrectNumberOfBindings...`
    /// condition (§4.4 `resolveAt`), surfaced via [`Resolver::resolve_at`]
    /// rather than here.
    fn get(&self, index: usize) -> Option<&Value> {
        match self {
            Resolved::Unchanged(v) => Some(v),
            Resolved::List(vs) => {
                if vs.len() == 1 {
                    vs.first()
                } else {
                    vs.get(index)
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Resolved::Unchanged(_) => 1,
            Resolved::List(vs) => vs.len().max(1),
        }
    }
}

/// Stateful per-bundle resolver: bindings plus a mint table keyed by
/// variable, grown lazily to the cardinality the link analyzer computed.
pub struct Resolver<'a> {
    bindings: &'a BindingStore,
    cardinality: &'a HashMap<QualifiedName, usize>,
    uuid_namespace: QualifiedName,
    mint_table: HashMap<String, Vec<QualifiedName>>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        bindings: &'a BindingStore,
        cardinality: &'a HashMap<QualifiedName, usize>,
        uuid_namespace: QualifiedName,
    ) -> Self {
        Resolver {
            bindings,
            cardinality,
            uuid_namespace,
            mint_table: HashMap::new(),
        }
    }

    /// `resolve(name, isElementPosition, neededCount)` — §4.4.
    pub fn resolve(&mut self, value: &Value, is_element_position: bool) -> Resolved {
        let qn = match value.as_qname() {
            None => return Resolved::Unchanged(value.clone()),
            Some(qn) => qn,
        };

        if qn.is_prefix("vargen") && is_element_position {
            let needed = self.cardinality.get(qn).copied().unwrap_or(1).max(1);
            let minted = self.mint(qn, needed);
            return Resolved::List(minted.iter().cloned().map(Value::QName).collect());
        }

        let key = qn.canonical();
        if let Some(binding) = self.bindings.get(&key) {
            if let Some(list) = binding.as_list() {
                return Resolved::List(list.to_vec());
            }
            // Grid bindings are only meaningful for attribute values and
            // are handled directly by the expander via `BindingStore`.
        }

        // vargen used at a non-element (e.g. relation identifier) position
        // with no explicit binding: still mint, per §4.4's mint-on-use rule
        // applying to any vargen occurrence, not only element identifiers.
        if qn.is_prefix("vargen") {
            let needed = self.cardinality.get(qn).copied().unwrap_or(1).max(1);
            let minted = self.mint(qn, needed);
            return Resolved::List(minted.iter().cloned().map(Value::QName).collect());
        }

        Resolved::Unchanged(value.clone())
    }

    /// `resolveAt(name, index)` — resolves then projects to one index,
    /// broadcasting scalars. Errors if `index` is out of range for a
    /// genuinely multi-valued binding.
    pub fn resolve_at(
        &mut self,
        value: &Value,
        is_element_position: bool,
        index: usize,
    ) -> Result<Value, ExpandError> {
        let resolved = self.resolve(value, is_element_position);
        resolved.get(index).cloned().ok_or_else(|| {
            let variable = value
                .as_qname()
                .map(QualifiedName::canonical)
                .unwrap_or_else(|| "<non-variable>".to_string());
            ExpandError::IncorrectNumberOfBindingsForStatementVariable {
                variable,
                index,
                available: resolved.len(),
            }
        })
    }

    fn mint(&mut self, var: &QualifiedName, needed: usize) -> &[QualifiedName] {
        let key = var.canonical();
        let ns = self.uuid_namespace.clone();
        let entry = self.mint_table.entry(key).or_default();
        while entry.len() < needed {
            let fresh = Uuid::new_v4().to_string();
            entry.push(QualifiedName::new(ns.prefix.clone(), fresh, ns.namespace_iri.clone()));
        }
        entry.as_slice()
    }

    /// Mint exactly `needed` fresh ids for `var`, independent of the
    /// per-bundle `cardinality` map — for a `vargen:` relation identifier
    /// with no binding and no corresponding element record, whose instance
    /// count is only known to the caller (the relation's own product size,
    /// §4.5 step 6), not to this resolver's element-scoped cardinality
    /// table (§4.3 only scans element records). Shares the same mint table
    /// as [`Resolver::resolve`], so a `vargen:` variable minted here first
    /// and referenced on an element later (or vice versa) still resolves
    /// consistently.
    pub(crate) fn mint_n(&mut self, var: &QualifiedName, needed: usize) -> Vec<QualifiedName> {
        let minted = self.mint(var, needed);
        minted[..needed.min(minted.len())].to_vec()
    }
}
