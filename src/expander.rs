//! Expander — §4.5, the expansion driver.
//!
//! Per bundle: walks elements in link-ordered sequence instantiating one
//! or more records per template record, then walks relations computing
//! the linked-group cartesian/zip product over formal arguments.
//!
//! Grounded on `compiler::lowering.rs`'s driver-over-IR shape and on
//! `original_source/provtemplates/provconv.py`'s `add_records`/`set_rel`/
//! `make_rel` for the exact zip/cartesian semantics, including the two
//! verbatim-preserved quirks flagged in spec.md §9.

use std::collections::HashMap;

use crate::bindings::{Binding, BindingStore};
use crate::error::ExpandError;
use crate::linker::LinkAnalyzer;
use crate::model::{Attribute, Bundle, Document, QualifiedName, Record, RecordType, Value};
use crate::namespace::NamespaceRegistry;
use crate::resolver::{Resolved, Resolver};

/// Options accepted by [`expand`] (spec.md §6).
#[derive(Clone, Debug, Default)]
pub struct ExpandOptions {
    /// Overrides the default `uuid:` → `urn:uuid:` namespace used to mint
    /// `vargen:` identifiers.
    pub uuid_namespace: Option<QualifiedName>,
    /// Caps the number of relation instances a single relation's
    /// cartesian/zip expansion may produce. `None` is unbounded.
    pub max_expansions: Option<usize>,
}

/// Ordered formal-argument keys for each relation type — the arity table
/// in spec.md §4.5.
fn formal_keys(record_type: &RecordType) -> Result<&'static [&'static str], ExpandError> {
    use RecordType::*;
    Ok(match record_type {
        WasGeneratedBy => &["entity", "activity", "time"],
        Used => &["activity", "entity", "time"],
        WasInformedBy => &["informed", "informant"],
        WasStartedBy => &["activity", "trigger", "starter", "time"],
        WasEndedBy => &["activity", "trigger", "ender", "time"],
        WasInvalidatedBy => &["entity", "activity", "time"],
        WasDerivedFrom => &["generatedEntity", "usedEntity", "activity", "generation", "usage"],
        WasAttributedTo => &["entity", "agent"],
        WasAssociatedWith => &["activity", "agent", "plan"],
        ActedOnBehalfOf => &["delegate", "responsible", "activity"],
        WasInfluencedBy => &["influencee", "influencer"],
        AlternateOf => &["alternate1", "alternate2"],
        SpecializationOf => &["specific", "general"],
        HadMember => &["collection", "entity"],
        Other(name) => {
            return Err(ExpandError::UnknownRelation {
                relation_type: name.clone(),
            })
        }
        Entity | Activity | Agent => {
            return Err(ExpandError::UnknownRelation {
                relation_type: "<element, not a relation>".to_string(),
            })
        }
    })
}

/// The `tmpl:` local names allowed to override a relation's `time` formal
/// when the formal position itself is unbound (spec.md §6, §4.5 step 2).
/// `tmpl:time` is the generic override, valid for any relation's `time`
/// formal; `tmpl:startTime`/`tmpl:endTime` are specific to the relation
/// types whose `time` formal *is* a start or end time —
/// `wasStartedBy`/`wasEndedBy` respectively — per SPEC_FULL.md/spec.md §6
/// naming them as supplying "the corresponding prov: formal," not a
/// generic time override for every relation type.
fn time_override_locals(record_type: &RecordType) -> &'static [&'static str] {
    match record_type {
        RecordType::WasStartedBy => &["time", "startTime"],
        RecordType::WasEndedBy => &["time", "endTime"],
        _ => &["time"],
    }
}

/// The crate's single public entry point: `expand(template, bindings,
/// options) -> Document` (spec.md §6).
pub fn expand(
    template: &Document,
    bindings: &BindingStore,
    options: &ExpandOptions,
) -> Result<Document, ExpandError> {
    let registry = NamespaceRegistry::from_declarations(
        template
            .namespaces
            .iter()
            .map(|(p, i)| (p.as_str(), i.as_str())),
        options.uuid_namespace.as_ref(),
    );
    let uuid_namespace = registry.uuid_namespace();

    let mut out = Document {
        namespaces: template.namespaces.clone(),
        default_namespace: template.default_namespace.clone(),
        records: Vec::new(),
        bundles: Vec::new(),
    };

    out.records = expand_records(&template.records, bindings, &uuid_namespace, options.max_expansions)?;

    for bundle in &template.bundles {
        let mut scratch_cardinality = HashMap::new();
        scratch_cardinality.insert(bundle.identifier.clone(), 1);
        let mut bundle_resolver = Resolver::new(bindings, &scratch_cardinality, uuid_namespace.clone());
        let identifier = match bundle_resolver.resolve(&Value::QName(bundle.identifier.clone()), true) {
            Resolved::List(vs) => vs
                .first()
                .and_then(Value::as_qname)
                .cloned()
                .unwrap_or_else(|| bundle.identifier.clone()),
            Resolved::Unchanged(Value::QName(q)) => q,
            Resolved::Unchanged(_) => bundle.identifier.clone(),
        };

        let records = expand_records(&bundle.records, bindings, &uuid_namespace, options.max_expansions)?;
        out.bundles.push(Bundle { identifier, records });

        tracing::debug!(bundle = %identifier, records = out.bundles.last().unwrap().records.len(), "bundle expanded");
    }

    Ok(out)
}

/// Expand one flat record list (a bundle's records, or the document's
/// top-level records) into its instantiated form.
fn expand_records(
    records: &[Record],
    bindings: &BindingStore,
    uuid_namespace: &QualifiedName,
    max_expansions: Option<usize>,
) -> Result<Vec<Record>, ExpandError> {
    let element_records: Vec<Record> = records
        .iter()
        .filter(|r| r.record_type.is_element())
        .cloned()
        .collect();
    let relation_records: Vec<&Record> = records.iter().filter(|r| r.record_type.is_relation()).collect();

    let analysis = LinkAnalyzer::analyze(&element_records, bindings)?;

    let by_id: HashMap<String, &Record> = element_records
        .iter()
        .map(|r| (r.identifier.as_ref().unwrap().canonical(), r))
        .collect();

    let mut resolver = Resolver::new(bindings, &analysis.cardinality, uuid_namespace.clone());
    let mut out = Vec::new();

    for node in &analysis.ordered_nodes {
        let rec = by_id
            .get(&node.canonical())
            .expect("link analyzer only emits nodes present in element_records");
        let cardinality = *analysis.cardinality.get(node).unwrap_or(&1);

        out.extend(expand_element(rec, node, cardinality, bindings, &mut resolver)?);
    }

    for rel in relation_records {
        out.extend(expand_relation(rel, &analysis.groups, bindings, &mut resolver, max_expansions)?);
    }

    Ok(out)
}

/// Step-by-step element expansion (§4.5 "Elements").
fn expand_element(
    rec: &Record,
    var: &QualifiedName,
    cardinality: usize,
    bindings: &BindingStore,
    resolver: &mut Resolver,
) -> Result<Vec<Record>, ExpandError> {
    let identifier_value = Value::QName(var.clone());
    let resolved_identifier = resolver.resolve(&identifier_value, true);

    if var.is_prefix("var") {
        if let Resolved::Unchanged(Value::QName(ref q)) = resolved_identifier {
            if q == var {
                return Err(ExpandError::UnboundMandatoryVariable {
                    variable: var.canonical(),
                });
            }
        }
    }

    let attrs: Vec<&Attribute> = rec
        .extra_attributes
        .iter()
        .filter(|a| !(a.key.is_prefix("tmpl") && a.key.local_part == "linked"))
        .collect();

    let mut instances = Vec::with_capacity(cardinality);
    for i in 0..cardinality {
        let id_i = resolver.resolve_at(&identifier_value, true, i)?;
        let id_qn = id_i
            .as_qname()
            .cloned()
            .unwrap_or_else(|| var.clone());

        let mut out_attrs = Vec::new();
        for attr in &attrs {
            out_attrs.extend(resolve_attribute_for_index(attr, bindings, resolver, i)?);
        }

        tracing::trace!(variable = %var, index = i, identifier = %id_qn, "emitted element instance");

        instances.push(Record {
            identifier: Some(id_qn),
            record_type: rec.record_type.clone(),
            formal_arguments: Vec::new(),
            extra_attributes: out_attrs,
        });
    }

    Ok(instances)
}

/// Resolve one attribute at expansion index `i`. Returns potentially more
/// than one `Attribute` when the value is a 2-D ("grid") binding — the
/// inner dimension repeats under the same key (spec.md §4.5 step 4).
///
/// Reproduces the key-resolution quirk flagged in spec.md §9(a): if the
/// attribute *key* itself resolves to a list of qualified names, only the
/// first element is used.
fn resolve_attribute_for_index(
    attr: &Attribute,
    bindings: &BindingStore,
    resolver: &mut Resolver,
    i: usize,
) -> Result<Vec<Attribute>, ExpandError> {
    let key_qn = match resolver.resolve(&Value::QName(attr.key.clone()), false) {
        Resolved::Unchanged(Value::QName(q)) => q,
        Resolved::Unchanged(_) => attr.key.clone(),
        Resolved::List(vs) => vs
            .first()
            .and_then(Value::as_qname)
            .cloned()
            .unwrap_or_else(|| attr.key.clone()),
    };

    if let Some(var_qn) = attr.value.as_qname() {
        if let Some(Binding::Grid(_)) = bindings.get(&var_qn.canonical()) {
            let binding = bindings.get(&var_qn.canonical()).unwrap();
            let row = binding.grid_row(i).ok_or_else(|| {
                ExpandError::IncorrectNumberOfBindingsForStatementVariable {
                    variable: var_qn.canonical(),
                    index: i,
                    available: binding.len(),
                }
            })?;
            return Ok(row.iter().map(|v| Attribute::new(key_qn.clone(), v.clone())).collect());
        }
    }

    let value = resolver.resolve_at(&attr.value, false, i)?;
    Ok(vec![Attribute::new(key_qn, value)])
}

/// One formal argument's resolved, per-index values, tagged with its
/// link group (if any) so the expander can zip within a group and take
/// the cartesian product across groups.
struct FormalSlot {
    key: &'static str,
    values: Vec<Value>,
    group_id: Option<usize>,
}

/// Relation expansion (§4.5 "Relations"). State machine: collectFormals →
/// resolveValues → groupByLinks → productEnumerate → emit.
fn expand_relation(
    rel: &Record,
    groups: &[std::collections::HashSet<QualifiedName>],
    bindings: &BindingStore,
    resolver: &mut Resolver,
    max_expansions: Option<usize>,
) -> Result<Vec<Record>, ExpandError> {
    let keys = formal_keys(&rel.record_type)?;

    // collectFormals + resolveValues
    let mut slots: Vec<FormalSlot> = Vec::with_capacity(keys.len());
    for &key in keys {
        let template_value = rel
            .formal_arguments
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.clone());

        let values = match template_value {
            Some(v) => match resolver.resolve(&v, false) {
                Resolved::List(vs) => vs,
                Resolved::Unchanged(u) => vec![u],
            },
            None => {
                // §4.5 step 2: prov:time may be satisfied by tmpl:time (any
                // relation) or tmpl:startTime/endTime (only the relation
                // type whose `time` formal that attribute actually names).
                if key == "time" {
                    let allowed = time_override_locals(&rel.record_type);
                    let time_attr = rel
                        .extra_attributes
                        .iter()
                        .find(|a| a.key.is_prefix("tmpl") && allowed.contains(&a.key.local_part.as_str()));
                    match time_attr {
                        Some(a) => match resolver.resolve(&a.value, false) {
                            Resolved::List(vs) => vs,
                            Resolved::Unchanged(u) => vec![u],
                        },
                        None => vec![],
                    }
                } else {
                    vec![]
                }
            }
        };

        let group_id = template_value
            .as_ref()
            .and_then(Value::as_qname)
            .and_then(|qn| groups.iter().position(|g| g.contains(qn)));

        slots.push(FormalSlot { key, values, group_id });
    }

    // groupByLinks: slots sharing a non-`None` group_id zip together;
    // everything else (including formals whose value isn't a variable)
    // forms its own singleton group.
    let mut zip_groups: Vec<Vec<usize>> = Vec::new();
    let mut seen_group: HashMap<usize, usize> = HashMap::new();
    for (slot_idx, slot) in slots.iter().enumerate() {
        match slot.group_id {
            Some(gid) => {
                let zg = *seen_group.entry(gid).or_insert_with(|| {
                    zip_groups.push(Vec::new());
                    zip_groups.len() - 1
                });
                zip_groups[zg].push(slot_idx);
            }
            None => zip_groups.push(vec![slot_idx]),
        }
    }

    // productEnumerate: within a zip group, every slot must agree on
    // length (or be length-1, which broadcasts); across groups, cartesian.
    let mut zip_lengths = Vec::with_capacity(zip_groups.len());
    for zg in &zip_groups {
        let lens: Vec<usize> = zg
            .iter()
            .map(|&idx| slots[idx].values.len())
            .filter(|&l| l > 0)
            .collect();
        let common = match lens.first() {
            None => 1,
            Some(&first) => {
                if lens.iter().any(|&l| l != first) {
                    return Err(ExpandError::IncorrectNumberOfBindingsForGroupVariable {
                        group: zg.iter().map(|&idx| slots[idx].key.to_string()).collect(),
                        detail: format!("zipped formal arguments disagree on length: {:?}", lens),
                    });
                }
                first
            }
        };
        zip_lengths.push(common.max(1));
    }

    let total: usize = zip_lengths.iter().product();
    if let Some(limit) = max_expansions {
        if total > limit {
            tracing::warn!(attempted = total, limit, "relation expansion would exceed cap");
            return Err(ExpandError::ExpansionLimitExceeded {
                limit,
                attempted: total,
            });
        }
    }

    // Cartesian product over zip groups, lexicographic in group order.
    let mut combos: Vec<Vec<usize>> = vec![vec![]];
    for &len in &zip_lengths {
        let mut next = Vec::with_capacity(combos.len() * len);
        for combo in &combos {
            for i in 0..len {
                let mut c = combo.clone();
                c.push(i);
                next.push(c);
            }
        }
        combos = next;
    }

    // Resolve the relation identifier (§4.5 step 6).
    let ident_values: Option<Vec<QualifiedName>> = match &rel.identifier {
        None => None,
        Some(id) if id.is_prefix("vargen") && !bindings.contains(&id.canonical()) => {
            // Not bound, and this relation is its only occurrence: the
            // per-bundle `cardinality` map is built from element records
            // alone (§4.3), so it has no entry (or the wrong one) for an
            // identifier-only vargen variable. Mint exactly one fresh id
            // per relation instance, per spec.md §4.5 step 6's "If
            // vargen:, mint one fresh id per instance" — the instance
            // count (`combos.len()`) is already known here.
            Some(resolver.mint_n(id, combos.len()))
        }
        Some(id) => match resolver.resolve(&Value::QName(id.clone()), id.is_prefix("vargen")) {
            Resolved::List(vs) => {
                let qnames: Vec<QualifiedName> = vs.iter().filter_map(Value::as_qname).cloned().collect();
                Some(qnames)
            }
            Resolved::Unchanged(Value::QName(q)) => {
                if q.is_prefix("var") {
                    // §9(b): unbound var: relation identifier — emitted
                    // without an identifier, reproduced verbatim.
                    None
                } else {
                    Some(vec![q])
                }
            }
            Resolved::Unchanged(_) => None,
        },
    };

    if let Some(idents) = &ident_values {
        if !idents.is_empty() && idents.len() != combos.len() {
            return Err(ExpandError::IncorrectNumberOfBindingsForStatementVariable {
                variable: rel
                    .identifier
                    .as_ref()
                    .map(QualifiedName::canonical)
                    .unwrap_or_default(),
                index: combos.len(),
                available: idents.len(),
            });
        }
    }

    // Extra (non-formal) attributes, minus the time overrides already
    // consumed into formal slots, resolved per product element.
    let extra_attrs_tmpl: Vec<&Attribute> = rel
        .extra_attributes
        .iter()
        .filter(|a| {
            !(a.key.is_prefix("tmpl")
                && matches!(a.key.local_part.as_str(), "time" | "startTime" | "endTime" | "linked"))
        })
        .collect();

    // Map each slot to its zip group's index once, outside the per-combo loop.
    let mut group_of_slot: HashMap<usize, usize> = HashMap::new();
    for (gi, zg) in zip_groups.iter().enumerate() {
        for &slot_idx in zg {
            group_of_slot.insert(slot_idx, gi);
        }
    }

    let mut instances = Vec::with_capacity(combos.len());
    for (n, combo) in combos.iter().enumerate() {
        let mut formal_arguments = Vec::with_capacity(keys.len());
        for (slot_idx, slot) in slots.iter().enumerate() {
            let gi = group_of_slot[&slot_idx];
            let pick = combo[gi];
            let value = if slot.values.is_empty() {
                None
            } else if slot.values.len() == 1 {
                Some(slot.values[0].clone())
            } else {
                Some(slot.values[pick].clone())
            };
            formal_arguments.push((slot.key.to_string(), value));
        }

        let identifier = match &ident_values {
            None => None,
            Some(idents) if idents.is_empty() => None,
            Some(idents) if idents.len() == 1 => Some(idents[0].clone()),
            Some(idents) => Some(idents[n].clone()),
        };

        let mut extra_attributes = Vec::new();
        for attr in &extra_attrs_tmpl {
            // Extra attributes are not expanded by link-group zipping —
            // only by their own list-valued resolution, per formal
            // argument k position n (best-effort: broadcast by combo sum).
            let idx = combo.first().copied().unwrap_or(0);
            if let Some(var_qn) = attr.value.as_qname() {
                if let Some(Binding::Grid(_)) = bindings.get(&var_qn.canonical()) {
                    let binding = bindings.get(&var_qn.canonical()).unwrap();
                    if let Some(row) = binding.grid_row(idx) {
                        extra_attributes
                            .extend(row.iter().map(|v| Attribute::new(attr.key.clone(), v.clone())));
                        continue;
                    }
                }
            }
            match resolver.resolve(&attr.value, false) {
                Resolved::List(vs) => {
                    extra_attributes.extend(vs.into_iter().map(|v| Attribute::new(attr.key.clone(), v)));
                }
                Resolved::Unchanged(v) => extra_attributes.push(Attribute::new(attr.key.clone(), v)),
            }
        }

        tracing::trace!(relation = ?rel.record_type, index = n, "emitted relation instance");

        instances.push(Record {
            identifier,
            record_type: rel.record_type.clone(),
            formal_arguments,
            extra_attributes,
        });
    }

    Ok(instances)
}
