//! Separates computation islands that meet only through communication nodes.
use crate::graph::{Direction, GraphView, connected_components, reachable};
use crate::min_cut::CutEdgeSet;
use crate::node::{GraphNode, NodeId, NodeMap, is_numeric_id};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct BipartiteResult {
    /// Numeric non-communication nodes grouped into islands, each node exactly once.
    pub components: Vec<Vec<NodeId>>,
    pub cut_edges: CutEdgeSet,
}

/// Extends `cut_edges` with every edge that would let the upstream side of a
/// communication node reach its downstream side without passing through it,
/// then splits the remaining graph into connected components.
pub fn process_bipartite(
    nodes: &NodeMap,
    mut cut_edges: CutEdgeSet,
    is_comm: impl Fn(&GraphNode) -> bool,
) -> BipartiteResult {
    let comm_ids: Vec<&NodeId> = nodes
        .node_ids()
        .into_iter()
        .filter(|id| is_comm(&nodes[*id]))
        .collect();

    for comm_id in comm_ids {
        let upstream: Vec<NodeId> =
            reachable(nodes, comm_id, Direction::Upstream, None, |s, t| !cut_edges.contains(s, t))
                .into_iter()
                .map(|(id, _)| id)
                .collect();
        let downstream: HashSet<NodeId> =
            reachable(nodes, comm_id, Direction::Downstream, None, |s, t| !cut_edges.contains(s, t))
                .into_iter()
                .map(|(id, _)| id)
                .collect();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for id in &upstream {
            if nodes.get(id).is_some_and(|node| !is_comm(node)) {
                visited.insert(id.as_str());
                queue.push_back(id.as_str());
            }
        }
        let mut added = 0;
        while let Some(current) = queue.pop_front() {
            let outputs = nodes.outputs(current).iter().map(|next| (current, next.as_str(), next));
            let inputs = nodes.inputs(current).iter().map(|next| (next.as_str(), current, next));
            let edges: Vec<(&str, &str, &NodeId)> = outputs.chain(inputs).collect();
            for (source, target, next) in edges {
                if cut_edges.contains(source, target) {
                    continue;
                }
                let Some(next_node) = nodes.get(next) else {
                    continue;
                };
                if is_comm(next_node) || visited.contains(next.as_str()) {
                    continue;
                }
                if downstream.contains(next) {
                    cut_edges.insert(source, target);
                    added += 1;
                } else {
                    visited.insert(next.as_str());
                    queue.push_back(next.as_str());
                }
            }
        }
        if added > 0 {
            log::debug!("Communication node {comm_id}: {added} cross edges cut");
        }
    }

    let components = connected_components(
        nodes,
        |id| is_numeric_id(id) && nodes.get(id).is_some_and(|node| !is_comm(node)),
        |source, target| !cut_edges.contains(source, target),
    );
    BipartiteResult {
        components,
        cut_edges,
    }
}
