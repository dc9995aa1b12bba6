//! Integration tests: build a template `Document` + `BindingStore` by hand
//! and drive the whole pipeline through [`prov_template_expand::expand`].
//!
//! Each test below corresponds to one of the worked scenarios: scalar
//! substitution, multi-instance elements, `tmpl:linked` expansion,
//! cartesian relation products, `vargen:` minting, and the unbound
//! mandatory variable error.

use std::sync::Once;

use prov_template_expand::bindings::{qname_binding, BindingStore};
use prov_template_expand::model::{Attribute, Document, QualifiedName, Record, RecordType, Value};
use prov_template_expand::namespace::NamespaceRegistry;
use prov_template_expand::{expand, ExpandError, ExpandOptions};

const EX_IRI: &str = "http://example.org/";
const TMPL_IRI: &str = "http://openprovenance.org/tmpl#";

static INIT_TRACING: Once = Once::new();

/// Surfaces the expander's `tracing` events under `RUST_LOG=trace` without
/// every test racing to install its own global subscriber.
fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn qn(prefix: &str, local: &str, iri: &str) -> QualifiedName {
    QualifiedName::new(prefix, local, iri)
}

fn ex(local: &str) -> QualifiedName {
    qn("ex", local, EX_IRI)
}

fn var(local: &str) -> QualifiedName {
    qn("var", local, "urn:var:")
}

fn vargen(local: &str) -> QualifiedName {
    qn("vargen", local, "urn:vargen:")
}

fn linked(target: QualifiedName) -> Attribute {
    Attribute::new(qn("tmpl", "linked", TMPL_IRI), Value::QName(target))
}

fn document_of(records: Vec<Record>) -> Document {
    let mut doc = Document::new();
    doc.records = records;
    doc
}

/// One bound template variable substitutes cleanly into an entity's
/// identifier.
#[test]
fn scalar_identifier_substitution() {
    init_tracing();
    let template = document_of(vec![Record::element(var("quote"), RecordType::Entity)]);

    let mut bindings = BindingStore::new();
    let (k, v) = qname_binding("var:quote", vec![ex("q1")]);
    bindings.insert(k, v);

    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].identifier.as_ref().unwrap().local_part, "q1");
}

/// A variable bound to N values produces N element instances.
#[test]
fn multi_instance_element_expansion() {
    init_tracing();
    let template = document_of(vec![Record::element(var("quote"), RecordType::Entity)]);

    let mut bindings = BindingStore::new();
    let (k, v) = qname_binding("var:quote", vec![ex("q1"), ex("q2"), ex("q3")]);
    bindings.insert(k, v);

    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();
    assert_eq!(result.records.len(), 3);
    let locals: Vec<&str> = result
        .records
        .iter()
        .map(|r| r.identifier.as_ref().unwrap().local_part.as_str())
        .collect();
    assert_eq!(locals, vec!["q1", "q2", "q3"]);
}

/// Two `tmpl:linked` elements with matching cardinality expand in lock
/// step: quote[i] always pairs with author[i].
#[test]
fn linked_elements_expand_in_lock_step() {
    init_tracing();
    let mut quote = Record::element(var("quote"), RecordType::Entity);
    quote.extra_attributes.push(linked(var("author")));
    let author = Record::element(var("author"), RecordType::Entity);

    let template = document_of(vec![quote, author]);

    let mut bindings = BindingStore::new();
    let (k, v) = qname_binding("var:quote", vec![ex("q1"), ex("q2")]);
    bindings.insert(k, v);
    let (k, v) = qname_binding("var:author", vec![ex("a1"), ex("a2")]);
    bindings.insert(k, v);

    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();
    assert_eq!(result.records.len(), 4);

    let quotes: Vec<&str> = result
        .records
        .iter()
        .filter(|r| r.identifier.as_ref().unwrap().local_part.starts_with('q'))
        .map(|r| r.identifier.as_ref().unwrap().local_part.as_str())
        .collect();
    let authors: Vec<&str> = result
        .records
        .iter()
        .filter(|r| r.identifier.as_ref().unwrap().local_part.starts_with('a'))
        .map(|r| r.identifier.as_ref().unwrap().local_part.as_str())
        .collect();
    assert_eq!(quotes, vec!["q1", "q2"]);
    assert_eq!(authors, vec!["a1", "a2"]);
}

/// A relation whose two formal arguments come from unrelated (ungrouped)
/// variables takes their cartesian product.
#[test]
fn relation_over_unrelated_variables_takes_cartesian_product() {
    init_tracing();
    let mut rel = Record::relation(RecordType::WasAttributedTo);
    rel.formal_arguments
        .push(("entity".to_string(), Some(Value::QName(var("e")))));
    rel.formal_arguments
        .push(("agent".to_string(), Some(Value::QName(var("a")))));

    let template = document_of(vec![rel]);

    let mut bindings = BindingStore::new();
    let (k, v) = qname_binding("var:e", vec![ex("e1"), ex("e2")]);
    bindings.insert(k, v);
    let (k, v) = qname_binding("var:a", vec![ex("a1"), ex("a2")]);
    bindings.insert(k, v);

    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();
    assert_eq!(result.records.len(), 4);

    let pairs: Vec<(String, String)> = result
        .records
        .iter()
        .map(|r| {
            let e = r
                .formal_arguments
                .iter()
                .find(|(k, _)| k == "entity")
                .and_then(|(_, v)| v.clone())
                .and_then(|v| v.as_qname().cloned())
                .unwrap()
                .local_part;
            let a = r
                .formal_arguments
                .iter()
                .find(|(k, _)| k == "agent")
                .and_then(|(_, v)| v.clone())
                .and_then(|v| v.as_qname().cloned())
                .unwrap()
                .local_part;
            (e, a)
        })
        .collect();
    assert_eq!(pairs.len(), 4);
    assert!(pairs.contains(&("e1".to_string(), "a1".to_string())));
    assert!(pairs.contains(&("e2".to_string(), "a2".to_string())));
}

/// `vargen:` identifiers mint fresh UUIDv4-backed names and are
/// memoized per occurrence, so the same vargen variable used twice in one
/// expansion resolves to the same minted value at the same index.
#[test]
fn vargen_identifiers_are_minted_and_consistent() {
    init_tracing();
    let mut rel = Record::relation(RecordType::WasGeneratedBy);
    rel.formal_arguments
        .push(("entity".to_string(), Some(Value::QName(ex("e1")))));
    rel.formal_arguments
        .push(("activity".to_string(), Some(Value::QName(ex("a1")))));

    let element = Record::element(vargen("id"), RecordType::Entity);

    let template = document_of(vec![element, rel]);
    let bindings = BindingStore::new();

    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();
    let minted = &result.records[0].identifier;
    assert!(minted.is_some());
    assert_eq!(minted.as_ref().unwrap().prefix, "uuid");
    assert!(uuid::Uuid::parse_str(&minted.as_ref().unwrap().local_part).is_ok());
}

/// A mandatory `var:` identifier left unbound is a hard error, not a
/// silent no-op.
#[test]
fn unbound_mandatory_variable_is_an_error() {
    init_tracing();
    let template = document_of(vec![Record::element(var("missing"), RecordType::Entity)]);
    let bindings = BindingStore::new();

    let err = expand(&template, &bindings, &ExpandOptions::default()).unwrap_err();
    assert!(matches!(err, ExpandError::UnboundMandatoryVariable { .. }));
}

/// An element record with no `tmpl:linked` attribute and no binding at
/// all for its identifier is its own singleton link group — cardinality
/// 1 — so a fully ground template (everything already a concrete qname,
/// nothing left to bind) round-trips unchanged.
#[test]
fn fully_ground_template_is_idempotent() {
    init_tracing();
    let template = document_of(vec![Record::element(ex("fixed"), RecordType::Entity)]);
    let bindings = BindingStore::new();

    let first = expand(&template, &bindings, &ExpandOptions::default()).unwrap();
    let second = expand(&first, &bindings, &ExpandOptions::default()).unwrap();
    assert_eq!(first.records.len(), second.records.len());
    assert_eq!(
        first.records[0].identifier.as_ref().unwrap().local_part,
        second.records[0].identifier.as_ref().unwrap().local_part
    );
}

/// Link groups whose members disagree on bound cardinality are rejected
/// before any expansion happens.
#[test]
fn mismatched_link_group_cardinality_errors_before_expansion() {
    init_tracing();
    let mut quote = Record::element(var("quote"), RecordType::Entity);
    quote.extra_attributes.push(linked(var("author")));
    let author = Record::element(var("author"), RecordType::Entity);

    let template = document_of(vec![quote, author]);

    let mut bindings = BindingStore::new();
    let (k, v) = qname_binding("var:quote", vec![ex("q1"), ex("q2")]);
    bindings.insert(k, v);
    let (k, v) = qname_binding("var:author", vec![ex("a1")]);
    bindings.insert(k, v);

    let err = expand(&template, &bindings, &ExpandOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        ExpandError::IncorrectNumberOfBindingsForGroupVariable { .. }
    ));
}

/// `max_expansions` caps the size of a single relation's product.
#[test]
fn max_expansions_caps_relation_product_size() {
    init_tracing();
    let mut rel = Record::relation(RecordType::WasAttributedTo);
    rel.formal_arguments
        .push(("entity".to_string(), Some(Value::QName(var("e")))));
    rel.formal_arguments
        .push(("agent".to_string(), Some(Value::QName(var("a")))));

    let template = document_of(vec![rel]);

    let mut bindings = BindingStore::new();
    let (k, v) = qname_binding("var:e", vec![ex("e1"), ex("e2"), ex("e3")]);
    bindings.insert(k, v);
    let (k, v) = qname_binding("var:a", vec![ex("a1"), ex("a2"), ex("a3")]);
    bindings.insert(k, v);

    let options = ExpandOptions {
        uuid_namespace: None,
        max_expansions: Some(5),
    };
    let err = expand(&template, &bindings, &options).unwrap_err();
    assert!(matches!(err, ExpandError::ExpansionLimitExceeded { .. }));
}

/// Bundles expand independently of top-level records and of each other.
#[test]
fn bundles_expand_independently() {
    init_tracing();
    use prov_template_expand::model::Bundle;

    let mut template = Document::new();
    template.bundles.push(Bundle {
        identifier: ex("bundle1"),
        records: vec![Record::element(var("quote"), RecordType::Entity)],
    });

    let mut bindings = BindingStore::new();
    let (k, v) = qname_binding("var:quote", vec![ex("q1"), ex("q2")]);
    bindings.insert(k, v);

    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();
    assert_eq!(result.bundles.len(), 1);
    assert_eq!(result.bundles[0].records.len(), 2);
    assert!(result.records.is_empty());
}

/// Record-attribute-mode bindings (`tmpl:value_i`) feed the same pipeline
/// as bindings built programmatically.
#[test]
fn record_attribute_mode_bindings_feed_expansion() {
    init_tracing();
    let registry = NamespaceRegistry::new();
    let mut binding_record = Record::element(var("quote"), RecordType::Entity);
    binding_record.extra_attributes.push(Attribute::new(
        qn("tmpl", "value_0", TMPL_IRI),
        Value::QName(ex("q1")),
    ));
    binding_record.extra_attributes.push(Attribute::new(
        qn("tmpl", "value_1", TMPL_IRI),
        Value::QName(ex("q2")),
    ));

    let bindings = BindingStore::from_record_attributes(&[binding_record], &registry).unwrap();

    let template = document_of(vec![Record::element(var("quote"), RecordType::Entity)]);
    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();
    assert_eq!(result.records.len(), 2);
}

/// End-to-end link-group coherence (spec.md §8 scenario 3): two elements
/// `tmpl:linked` at cardinality 2 each, plus a `wasAttributedTo` relation
/// naming both, pair positionally — exactly 2 attributions, never 4.
#[test]
fn linked_elements_and_relation_pair_positionally() {
    init_tracing();
    let mut quote = Record::element(var("quote"), RecordType::Entity);
    quote.extra_attributes.push(linked(var("author")));
    let author = Record::element(var("author"), RecordType::Entity);

    let mut rel = Record::relation(RecordType::WasAttributedTo);
    rel.formal_arguments
        .push(("entity".to_string(), Some(Value::QName(var("quote")))));
    rel.formal_arguments
        .push(("agent".to_string(), Some(Value::QName(var("author")))));

    let template = document_of(vec![quote, author, rel]);

    let mut bindings = BindingStore::new();
    let (k, v) = qname_binding("var:quote", vec![ex("q1"), ex("q2")]);
    bindings.insert(k, v);
    let (k, v) = qname_binding("var:author", vec![ex("a1"), ex("a2")]);
    bindings.insert(k, v);

    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();

    let attributions: Vec<&Record> = result
        .records
        .iter()
        .filter(|r| r.record_type == RecordType::WasAttributedTo)
        .collect();
    assert_eq!(attributions.len(), 2);

    let pairs: Vec<(String, String)> = attributions
        .iter()
        .map(|r| {
            let entity = r
                .formal_arguments
                .iter()
                .find(|(k, _)| k == "entity")
                .and_then(|(_, v)| v.clone())
                .and_then(|v| v.as_qname().cloned())
                .unwrap()
                .local_part;
            let agent = r
                .formal_arguments
                .iter()
                .find(|(k, _)| k == "agent")
                .and_then(|(_, v)| v.clone())
                .and_then(|v| v.as_qname().cloned())
                .unwrap()
                .local_part;
            (entity, agent)
        })
        .collect();
    assert_eq!(
        pairs,
        vec![("q1".to_string(), "a1".to_string()), ("q2".to_string(), "a2".to_string())]
    );
}

/// Vargen consistency (spec.md §8 invariant): a `vargen:id` minted for an
/// element resolves to the same identifier when the same variable is
/// referenced as a relation's formal argument.
#[test]
fn vargen_minted_on_element_matches_reference_on_relation() {
    init_tracing();
    let element = Record::element(vargen("id"), RecordType::Entity);

    let mut rel = Record::relation(RecordType::WasAttributedTo);
    rel.formal_arguments
        .push(("entity".to_string(), Some(Value::QName(vargen("id")))));
    rel.formal_arguments
        .push(("agent".to_string(), Some(Value::QName(ex("a1")))));

    let template = document_of(vec![element, rel]);
    let bindings = BindingStore::new();

    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();

    let minted_element_id = result.records[0].identifier.as_ref().unwrap().clone();
    let attribution = result
        .records
        .iter()
        .find(|r| r.record_type == RecordType::WasAttributedTo)
        .unwrap();
    let referenced_entity = attribution
        .formal_arguments
        .iter()
        .find(|(k, _)| k == "entity")
        .and_then(|(_, v)| v.clone())
        .and_then(|v| v.as_qname().cloned())
        .unwrap();

    assert_eq!(minted_element_id, referenced_entity);
}

/// An unbound `vargen:` relation identifier with no corresponding element
/// record must still mint one fresh id per relation instance, even when
/// the relation's own cartesian product (over unrelated formal variables)
/// is larger than 1 — the per-bundle cardinality map only tracks element
/// records, so this identifier can't borrow cardinality from one.
#[test]
fn vargen_relation_identifier_mints_one_id_per_cartesian_instance() {
    init_tracing();
    let mut rel = Record::relation(RecordType::WasAttributedTo);
    rel.identifier = Some(vargen("relId"));
    rel.formal_arguments
        .push(("entity".to_string(), Some(Value::QName(var("e")))));
    rel.formal_arguments
        .push(("agent".to_string(), Some(Value::QName(var("a")))));

    let template = document_of(vec![rel]);

    let mut bindings = BindingStore::new();
    let (k, v) = qname_binding("var:e", vec![ex("e1"), ex("e2")]);
    bindings.insert(k, v);
    let (k, v) = qname_binding("var:a", vec![ex("a1"), ex("a2")]);
    bindings.insert(k, v);

    let result = expand(&template, &bindings, &ExpandOptions::default()).unwrap();
    assert_eq!(result.records.len(), 4);

    let ids: std::collections::HashSet<String> = result
        .records
        .iter()
        .map(|r| r.identifier.as_ref().unwrap().canonical())
        .collect();
    assert_eq!(ids.len(), 4, "each relation instance must get a distinct minted id");
}
