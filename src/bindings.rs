//! Binding store — §4.2.
//!
//! A mapping from variable qualified names to either a single PROV value
//! (represented as a one-element list) or an ordered list of values,
//! ingested either from record-attribute form (`tmpl:value_i`,
//! `tmpl:2dvalue_i_j`) or from the structured bindings schema (§6).
//!
//! Grounded on `authoring/dto.rs` + `authoring/dto_to_ir.rs`'s DTO↔IR
//! conversion shape and on `original_source/provtemplates/provconv.py`'s
//! `read_binding`/`read_binding_v3`/`setEntry` for the exact ingestion
//! semantics (index-range validation, `@id`/`@value` disambiguation).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ExpandError;
use crate::model::{Literal, QualifiedName, Record, Value};
use crate::namespace::NamespaceRegistry;

/// One variable's bound values. `List` covers both the scalar case (a
/// single-element list, per spec.md §3) and the group-variable case.
/// `Grid` covers 2-D attribute-position bindings: outer index is the
/// element's expansion index, inner vector is the repeated attribute
/// values for that instance.
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    List(Vec<Value>),
    Grid(Vec<Vec<Value>>),
}

impl Binding {
    /// Cardinality as seen by the link analyzer: outer length in both cases.
    pub fn len(&self) -> usize {
        match self {
            Binding::List(v) => v.len(),
            Binding::Grid(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Binding::List(v) => Some(v),
            Binding::Grid(_) => None,
        }
    }

    pub fn grid_row(&self, index: usize) -> Option<&[Value]> {
        match self {
            Binding::Grid(rows) => rows.get(index).map(Vec::as_slice),
            Binding::List(_) => None,
        }
    }
}

/// `variableKey → Binding`, keyed by canonical `prefix:local` string.
#[derive(Clone, Debug, Default)]
pub struct BindingStore {
    bindings: HashMap<String, Binding>,
}

impl BindingStore {
    pub fn new() -> Self {
        BindingStore {
            bindings: HashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Binding> {
        self.bindings.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }

    /// Binding-list length for `key`, or 0 if unbound — the convention the
    /// link analyzer uses when computing group cardinality (§4.3 step 6).
    pub fn len_of(&self, key: &str) -> usize {
        self.bindings.get(key).map(Binding::len).unwrap_or(0)
    }

    pub fn insert(&mut self, key: String, binding: Binding) {
        self.bindings.insert(key, binding);
    }

    /// Ingest record-attribute-mode bindings: for each record whose
    /// identifier is in `var:`/`vargen:`, scan its attributes for
    /// `tmpl:value`/`tmpl:value_i`/`tmpl:2dvalue_i_j` keys (§4.2).
    pub fn from_record_attributes(
        records: &[Record],
        registry: &NamespaceRegistry,
    ) -> Result<BindingStore, ExpandError> {
        // Per-variable raw rows: index -> either a single value (1-D) or a
        // sub-index -> value map (2-D). A variable must use one form
        // consistently.
        enum Raw {
            Scalar(BTreeMap<usize, Value>),
            Grid(BTreeMap<usize, BTreeMap<usize, Value>>),
        }

        let mut raw: HashMap<String, Raw> = HashMap::new();

        for rec in records {
            let id = rec.identifier.as_ref().ok_or_else(|| {
                ExpandError::BindingsStructureError {
                    detail: "bindings record has no identifier".to_string(),
                }
            })?;
            if !(id.is_prefix("var") || id.is_prefix("vargen")) {
                return Err(ExpandError::BindingsStructureError {
                    detail: format!(
                        "bindings record identifier '{}' is not in the var:/vargen: namespace",
                        id.canonical()
                    ),
                });
            }
            let key = id.canonical();

            for attr in &rec.extra_attributes {
                if !attr.key.is_prefix("tmpl") {
                    return Err(ExpandError::BindingsStructureError {
                        detail: format!(
                            "unknown attribute key '{}' on bindings record '{}' — expected a tmpl: key",
                            attr.key.canonical(),
                            key
                        ),
                    });
                }
                let local = attr.key.local_part.as_str();

                if local == "value" {
                    entry_as_scalar(&mut raw, &key)?.insert(0, attr.value.clone());
                } else if let Some(rest) = local.strip_prefix("value_") {
                    let idx: usize = rest.parse().map_err(|_| ExpandError::BindingsStructureError {
                        detail: format!("malformed index in attribute key 'tmpl:{}'", local),
                    })?;
                    entry_as_scalar(&mut raw, &key)?.insert(idx, attr.value.clone());
                } else if let Some(rest) = local.strip_prefix("2dvalue_") {
                    let mut toks = rest.splitn(2, '_');
                    let i: usize = toks
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| ExpandError::BindingsStructureError {
                            detail: format!("malformed index in attribute key 'tmpl:{}'", local),
                        })?;
                    let j: usize = toks
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| ExpandError::BindingsStructureError {
                            detail: format!("malformed index in attribute key 'tmpl:{}'", local),
                        })?;
                    entry_as_grid(&mut raw, &key)?
                        .entry(i)
                        .or_default()
                        .insert(j, attr.value.clone());
                } else {
                    return Err(ExpandError::BindingsStructureError {
                        detail: format!("unrecognized tmpl: attribute key 'tmpl:{}'", local),
                    });
                }
            }
        }

        let mut store = BindingStore::new();
        for (key, entry) in raw {
            match entry {
                Raw::Scalar(map) => {
                    let idx = contiguous_indices(map.keys().copied(), &key)?;
                    let values = idx.into_iter().map(|i| map[&i].clone()).collect();
                    store.insert(key, Binding::List(values));
                }
                Raw::Grid(map) => {
                    let idx = contiguous_indices(map.keys().copied(), &key)?;
                    let mut rows = Vec::with_capacity(idx.len());
                    for i in idx {
                        let row_map = &map[&i];
                        let jidx = contiguous_indices(row_map.keys().copied(), &key)?;
                        rows.push(jidx.into_iter().map(|j| row_map[&j].clone()).collect());
                    }
                    store.insert(key, Binding::Grid(rows));
                }
            }
        }
        return Ok(store);

        fn entry_as_scalar<'a>(
            raw: &'a mut HashMap<String, Raw>,
            key: &str,
        ) -> Result<&'a mut BTreeMap<usize, Value>, ExpandError> {
            match raw
                .entry(key.to_string())
                .or_insert_with(|| Raw::Scalar(BTreeMap::new()))
            {
                Raw::Scalar(m) => Ok(m),
                Raw::Grid(_) => Err(ExpandError::BindingsStructureError {
                    detail: format!("variable '{}' mixes tmpl:value and tmpl:2dvalue forms", key),
                }),
            }
        }

        fn entry_as_grid<'a>(
            raw: &'a mut HashMap<String, Raw>,
            key: &str,
        ) -> Result<&'a mut BTreeMap<usize, BTreeMap<usize, Value>>, ExpandError> {
            match raw
                .entry(key.to_string())
                .or_insert_with(|| Raw::Grid(BTreeMap::new()))
            {
                Raw::Grid(m) => Ok(m),
                Raw::Scalar(_) => Err(ExpandError::BindingsStructureError {
                    detail: format!("variable '{}' mixes tmpl:value and tmpl:2dvalue forms", key),
                }),
            }
        }
    }

    /// Ingest the structured bindings schema (§6): `{context, var, vargen}`.
    pub fn from_dto(dto: &BindingsDto) -> Result<BindingStore, ExpandError> {
        let registry = NamespaceRegistry::from_declarations(
            dto.context.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            None,
        );

        let mut store = BindingStore::new();
        for (name, values) in dto.var.iter() {
            store.insert(format!("var:{}", name), dto_values_to_binding(values, &registry)?);
        }
        for (name, values) in dto.vargen.iter() {
            store.insert(
                format!("vargen:{}", name),
                dto_values_to_binding(values, &registry)?,
            );
        }
        Ok(store)
    }
}

fn contiguous_indices(
    indices: impl Iterator<Item = usize>,
    key: &str,
) -> Result<Vec<usize>, ExpandError> {
    let mut idx: Vec<usize> = indices.collect();
    idx.sort_unstable();
    let ok = !idx.is_empty() && idx[0] == 0 && idx.iter().enumerate().all(|(i, v)| i == *v);
    if !ok {
        return Err(ExpandError::BindingsStructureError {
            detail: format!(
                "variable '{}' has non-contiguous binding indices {:?}, expected [0, {})",
                key,
                idx,
                idx.len()
            ),
        });
    }
    Ok(idx)
}

fn dto_values_to_binding(
    values: &[BindingValueDto],
    registry: &NamespaceRegistry,
) -> Result<Binding, ExpandError> {
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        out.push(dto_value_to_value(v, registry)?);
    }
    Ok(Binding::List(out))
}

fn dto_value_to_value(
    v: &BindingValueDto,
    registry: &NamespaceRegistry,
) -> Result<Value, ExpandError> {
    match v {
        BindingValueDto::Ref { id } => Ok(Value::QName(registry.parse_qname(id)?)),
        BindingValueDto::Typed { value, r#type } => {
            let datatype = r#type
                .as_deref()
                .map(|t| registry.parse_qname(t))
                .transpose()?;
            Ok(Value::Literal(match datatype {
                Some(dt) => Literal::typed(value.clone(), dt),
                None => Literal::new(value.clone()),
            }))
        }
    }
}

// ── Structured bindings DTO (§6) ──

/// `{ context: {prefix: iri}, var: {name: [value]}, vargen: {name: [value]} }`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BindingsDto {
    #[serde(default)]
    pub context: HashMap<String, String>,
    #[serde(default)]
    pub var: HashMap<String, Vec<BindingValueDto>>,
    #[serde(default)]
    pub vargen: HashMap<String, Vec<BindingValueDto>>,
}

/// A single bound value in the structured schema: either a qualified-name
/// reference or a typed literal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindingValueDto {
    Ref {
        id: String,
    },
    Typed {
        value: String,
        #[serde(default, rename = "type")]
        r#type: Option<String>,
    },
}

/// Convenience constructor, useful when building bindings programmatically
/// rather than from parsed JSON (callers outside the serde boundary).
pub fn qname_binding(key: impl Into<String>, qnames: Vec<QualifiedName>) -> (String, Binding) {
    (key.into(), Binding::List(qnames.into_iter().map(Value::QName).collect()))
}
