//! Link analyzer — §4.3.
//!
//! Reads `tmpl:linked` attributes off a bundle's element records, builds
//! the forest of link groups, computes per-group cardinality, and emits a
//! link-ordered node list.
//!
//! Grounded on `compiler::ir.rs`'s use of `petgraph::DiGraph` for a
//! template-shaped control graph, and on
//! `original_source/provtemplates/provconv.py`'s `checkLinked`/`dfs_levels`
//! for the exact root/rank/cardinality algorithm.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::bindings::BindingStore;
use crate::error::ExpandError;
use crate::model::{QualifiedName, Record};

/// Result of analyzing one bundle's `tmpl:linked` structure.
pub struct LinkAnalysis {
    /// Element records in link-group order: group by group (root order),
    /// within a group by DFS rank (§4.3 step 6).
    pub ordered_nodes: Vec<QualifiedName>,
    pub cardinality: HashMap<QualifiedName, usize>,
    pub groups: Vec<HashSet<QualifiedName>>,
}

impl LinkAnalysis {
    /// The link group containing `var`, if any was touched by `tmpl:linked`
    /// or formed as a singleton.
    pub fn group_of(&self, var: &QualifiedName) -> Option<&HashSet<QualifiedName>> {
        self.groups.iter().find(|g| g.contains(var))
    }
}

pub struct LinkAnalyzer;

impl LinkAnalyzer {
    /// Analyze `elements` (a bundle's element records) against `bindings`.
    pub fn analyze(
        elements: &[Record],
        bindings: &BindingStore,
    ) -> Result<LinkAnalysis, ExpandError> {
        // Step 1: build the `tmpl:linked` edge graph: dependent -> ancestor.
        let mut graph: DiGraph<QualifiedName, ()> = DiGraph::new();
        let mut node_of: HashMap<QualifiedName, NodeIndex> = HashMap::new();

        for rec in elements {
            let id = rec.identifier.as_ref().ok_or_else(|| {
                ExpandError::BindingsStructureError {
                    detail: "element record missing identifier".to_string(),
                }
            })?;
            get_or_add_node(&mut graph, &mut node_of, id);
            if let Some(target) = rec.linked_target() {
                let from = get_or_add_node(&mut graph, &mut node_of, id);
                let to = get_or_add_node(&mut graph, &mut node_of, target);
                graph.add_edge(from, to, ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(ExpandError::BindingsStructureError {
                detail: "tmpl:linked graph contains a cycle; it must be a forest".to_string(),
            });
        }

        // Step 2: roots = linked-to by some edge, but don't themselves link-to.
        let has_outgoing: HashSet<NodeIndex> = graph
            .node_indices()
            .filter(|&n| graph.edges(n).next().is_some())
            .collect();
        let roots: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&n| {
                !has_outgoing.contains(&n)
                    && graph
                        .neighbors_directed(n, petgraph::Direction::Incoming)
                        .next()
                        .is_some()
            })
            .collect();

        // Step 3: for each root, DFS over reverse edges (root -> descendants),
        // assigning rank, forming one link group per root.
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut groups: Vec<HashSet<QualifiedName>> = Vec::new();
        let mut ordered: Vec<QualifiedName> = Vec::new();

        for &root in &roots {
            let mut group = HashSet::new();
            let mut rank_order = Vec::new();
            dfs_reverse(&graph, root, &mut visited, &mut group, &mut rank_order);
            for idx in &rank_order {
                ordered.push(graph[*idx].clone());
            }
            groups.push(group);
        }

        // Step 4: untouched variables form singleton groups, in original order.
        for rec in elements {
            let id = rec.identifier.as_ref().unwrap();
            let idx = node_of[id];
            if !visited.contains(&idx) {
                visited.insert(idx);
                ordered.push(id.clone());
                let mut singleton = HashSet::new();
                singleton.insert(id.clone());
                groups.push(singleton);
            }
        }

        // Step 5/6: per-group cardinality.
        let mut cardinality: HashMap<QualifiedName, usize> = HashMap::new();
        for group in &groups {
            let mut lengths: Vec<usize> = Vec::new();
            for var in group {
                let key = var.canonical();
                let len = bindings.len_of(&key);
                if len > 0 {
                    lengths.push(len);
                }
            }
            let common = match lengths.first() {
                None => 1,
                Some(&first) => {
                    if lengths.iter().any(|&l| l != first) {
                        return Err(ExpandError::IncorrectNumberOfBindingsForGroupVariable {
                            group: group.iter().map(QualifiedName::canonical).collect(),
                            detail: format!(
                                "members of this link group have differing binding cardinalities: {:?}",
                                lengths
                            ),
                        });
                    }
                    first
                }
            };
            for var in group {
                cardinality.insert(var.clone(), common);
            }
        }

        tracing::debug!(
            groups = groups.len(),
            nodes = ordered.len(),
            "link analysis complete"
        );

        Ok(LinkAnalysis {
            ordered_nodes: ordered,
            cardinality,
            groups,
        })
    }
}

fn get_or_add_node(
    graph: &mut DiGraph<QualifiedName, ()>,
    node_of: &mut HashMap<QualifiedName, NodeIndex>,
    qn: &QualifiedName,
) -> NodeIndex {
    if let Some(&idx) = node_of.get(qn) {
        idx
    } else {
        let idx = graph.add_node(qn.clone());
        node_of.insert(qn.clone(), idx);
        idx
    }
}

/// DFS from `root` over reverse `tmpl:linked` edges (root -> dependents),
/// recording every visited node into `group` and appending to `rank_order`
/// in visitation order.
fn dfs_reverse(
    graph: &DiGraph<QualifiedName, ()>,
    root: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    group: &mut HashSet<QualifiedName>,
    rank_order: &mut Vec<NodeIndex>,
) {
    if visited.contains(&root) {
        return;
    }
    visited.insert(root);
    group.insert(graph[root].clone());
    rank_order.push(root);
    for dependent in graph.neighbors_directed(root, petgraph::Direction::Incoming) {
        dfs_reverse(graph, dependent, visited, group, rank_order);
    }
}
