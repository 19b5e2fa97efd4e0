//! Folding of repeated subgraphs into template nodes.
//!
//! Subgraphs are compared by a sum of their node type hashes only, with no
//! structural isomorphism check, so unrelated subgraphs with the same
//! multiset of op types and the same size are folded together.
use super::edges::{SpecialEdgeClass, classify_edge};
use super::{ProfileNode, ProfileNodeMap};
use crate::config::GraphConfig;
use crate::graph::{EdgeListView, connected_components, sort_ids};
use crate::hash::SumHash;
use crate::node::{NodeId, sorted_ids};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

pub const AGGREGATE_SUFFIX: &str = "_aggre";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ProfileEdge {
    pub source: NodeId,
    pub target: NodeId,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedGraph {
    pub special_edges: BTreeMap<SpecialEdgeClass, Vec<ProfileEdge>>,
    pub normal_edges: Vec<ProfileEdge>,
    pub op_nodes: Vec<ProfileNode>,
}

impl ExtractedGraph {
    /// The op nodes keyed by id, ready to be fed back in.
    pub fn node_map(&self) -> ProfileNodeMap {
        self.op_nodes
            .iter()
            .map(|node| (node.id.clone(), node.clone()))
            .collect()
    }
}

fn aggregate_id(id: &str) -> NodeId {
    format!("{id}{AGGREGATE_SUFFIX}")
}

/// Groups of same-size components sharing a type hash, each large enough to fold.
fn repeated_components(
    components: Vec<Vec<NodeId>>,
    nodes: &ProfileNodeMap,
    threshold: usize,
) -> Vec<Vec<Vec<NodeId>>> {
    let mut groups: Vec<Vec<Vec<NodeId>>> = vec![];
    let mut group_of: HashMap<(u64, usize), usize> = HashMap::new();
    for component in components {
        let hash: SumHash = component
            .iter()
            .map(|id| nodes[id].node_type.as_str())
            .collect();
        let at = *group_of
            .entry((hash.value(), component.len()))
            .or_insert_with(|| {
                groups.push(vec![]);
                groups.len() - 1
            });
        groups[at].push(component);
    }
    groups.retain(|group| group.len() >= threshold);
    groups
}

/// Classifies every edge of `nodes`, then folds each set of at least
/// `isomorphic_repeat_threshold` equal-hash subgraphs of normal edges into
/// one template whose nodes are `<id>_aggre`. Template nodes are added to
/// `nodes`. Returns the `source-target` keys of the normal edges as
/// classified, before folding, and the folded graph.
pub fn extract_vis_node_and_edge(
    nodes: &mut ProfileNodeMap,
    config: &GraphConfig,
) -> (Vec<String>, ExtractedGraph) {
    let order: Vec<NodeId> = sorted_ids(nodes).into_iter().cloned().collect();

    let mut special_edges: BTreeMap<SpecialEdgeClass, Vec<ProfileEdge>> = BTreeMap::new();
    let mut normal_edges = vec![];
    let mut normal_keys = vec![];
    for target_id in &order {
        let target = &nodes[target_id];
        for source_id in &target.input {
            let Some(source) = nodes.get(source_id) else {
                continue;
            };
            let edge = ProfileEdge {
                source: source_id.clone(),
                target: target_id.clone(),
            };
            match classify_edge(source, target, nodes, config) {
                Some(class) => special_edges.entry(class).or_default().push(edge),
                None => {
                    normal_keys.push(format!("{source_id}-{target_id}"));
                    normal_edges.push(edge);
                }
            }
        }
    }

    let mut view = EdgeListView::new(order.iter().cloned());
    for edge in &normal_edges {
        view.add_edge(&edge.source, &edge.target);
    }
    let components: Vec<Vec<NodeId>> = connected_components(&view, |_| true, |_, _| true)
        .into_iter()
        .filter(|component| component.len() > 1)
        .filter(|component| component.iter().all(|id| !nodes[id].is_aggre_node))
        .map(|mut component| {
            sort_ids(&mut component);
            component
        })
        .collect();
    let groups = repeated_components(components, nodes, config.isomorphic_repeat_threshold);

    let mut folded_into: HashMap<NodeId, NodeId> = HashMap::new();
    let mut templates: HashSet<NodeId> = HashSet::new();
    let mut created = vec![];
    for group in &groups {
        let template = &group[0];
        for (position, id) in template.iter().enumerate() {
            let mut aggregate = nodes[id].clone();
            aggregate.id = aggregate_id(id);
            aggregate.is_aggre_node = true;
            aggregate.contain = group.iter().map(|member| member[position].clone()).collect();
            for member in group {
                folded_into.insert(member[position].clone(), aggregate.id.clone());
            }
            templates.insert(id.clone());
            created.push(aggregate);
        }
        log::debug!(
            "Folded {} repeats of a {}-node subgraph",
            group.len(),
            template.len()
        );
    }
    for aggregate in &mut created {
        let internal = |ids: &[NodeId]| {
            let mut mapped: Vec<NodeId> = ids
                .iter()
                .filter(|id| templates.contains(*id))
                .filter_map(|id| folded_into.get(id).cloned())
                .collect();
            crate::node::dedup_ids(&mut mapped);
            mapped
        };
        aggregate.input = internal(&aggregate.input);
        aggregate.output = internal(&aggregate.output);
    }

    let mut seen = HashSet::new();
    let normal_edges: Vec<ProfileEdge> = normal_edges
        .into_iter()
        .filter_map(|edge| {
            if templates.contains(&edge.source) {
                Some(ProfileEdge {
                    source: folded_into.get(&edge.source)?.clone(),
                    target: folded_into.get(&edge.target)?.clone(),
                })
            } else if folded_into.contains_key(&edge.source) || folded_into.contains_key(&edge.target) {
                None
            } else {
                Some(edge)
            }
        })
        .filter(|edge| seen.insert(edge.clone()))
        .collect();
    for edges in special_edges.values_mut() {
        edges.retain(|edge| {
            !folded_into.contains_key(&edge.source) && !folded_into.contains_key(&edge.target)
        });
    }

    let created: HashMap<NodeId, ProfileNode> =
        created.into_iter().map(|node| (node.id.clone(), node)).collect();
    let mut op_nodes = vec![];
    for id in &order {
        if templates.contains(id) {
            if let Some(aggregate) = created.get(&aggregate_id(id)) {
                op_nodes.push(aggregate.clone());
            }
        } else if !folded_into.contains_key(id) {
            op_nodes.push(nodes[id].clone());
        }
    }
    nodes.extend(created);

    (
        normal_keys,
        ExtractedGraph {
            special_edges,
            normal_edges,
            op_nodes,
        },
    )
}
