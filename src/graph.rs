//! Adjacency abstraction shared by the partitioning and aggregation passes.
//!
//! Passes only ever need to walk inputs and outputs by id, so anything that
//! can answer those questions (the display node map, an edge list, a block
//! DAG) implements [`GraphView`] and gets the traversals below for free.
use crate::node::{GraphNode, NodeId, NodeMap, compare_node_ids};
use std::collections::{HashMap, HashSet, VecDeque};

pub trait GraphView {
    /// Deterministic iteration over node ids.
    fn node_ids(&self) -> Vec<&NodeId>;
    fn contains(&self, id: &str) -> bool;
    /// Upstream neighbours. Ids may dangle; traversals check `contains`.
    fn inputs(&self, id: &str) -> &[NodeId];
    fn outputs(&self, id: &str) -> &[NodeId];
}

impl GraphView for NodeMap {
    fn node_ids(&self) -> Vec<&NodeId> {
        crate::node::sorted_ids(self)
    }

    fn contains(&self, id: &str) -> bool {
        self.contains_key(id)
    }

    fn inputs(&self, id: &str) -> &[NodeId] {
        self.get(id).map(|node: &GraphNode| node.input.as_slice()).unwrap_or(&[])
    }

    fn outputs(&self, id: &str) -> &[NodeId] {
        self.get(id).map(|node: &GraphNode| node.output.as_slice()).unwrap_or(&[])
    }
}

/// Undirected adjacency built from an edge list, keeping the first-seen order of nodes.
#[derive(Debug, Clone, Default)]
pub struct EdgeListView {
    order: Vec<NodeId>,
    neighbours: HashMap<NodeId, Vec<NodeId>>,
}

impl EdgeListView {
    pub fn new(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut view = Self::default();
        for node in nodes {
            if !view.neighbours.contains_key(&node) {
                view.neighbours.insert(node.clone(), vec![]);
                view.order.push(node);
            }
        }
        view
    }

    pub fn add_edge(&mut self, a: &str, b: &str) {
        for (from, to) in [(a, b), (b, a)] {
            if !self.neighbours.contains_key(from) {
                self.order.push(from.to_string());
            }
            self.neighbours
                .entry(from.to_string())
                .or_default()
                .push(to.to_string());
        }
    }
}

impl GraphView for EdgeListView {
    fn node_ids(&self) -> Vec<&NodeId> {
        self.order.iter().collect()
    }

    fn contains(&self, id: &str) -> bool {
        self.neighbours.contains_key(id)
    }

    fn inputs(&self, _id: &str) -> &[NodeId] {
        &[]
    }

    fn outputs(&self, id: &str) -> &[NodeId] {
        self.neighbours.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
}

/// Breadth-first walk from `start` in one direction. Returns every visited
/// node except `start`, paired with its depth, in visiting order.
///
/// `keep_edge` sees edges in their real orientation `(source, target)`.
pub fn reachable<G: GraphView>(
    graph: &G,
    start: &str,
    direction: Direction,
    max_depth: Option<usize>,
    mut keep_edge: impl FnMut(&str, &str) -> bool,
) -> Vec<(NodeId, usize)> {
    let mut visited: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(start, 0)]);
    let mut found = vec![];
    while let Some((current, depth)) = queue.pop_front() {
        if max_depth.is_some_and(|max| depth >= max) {
            continue;
        }
        let neighbours = match direction {
            Direction::Upstream => graph.inputs(current),
            Direction::Downstream => graph.outputs(current),
        };
        for next in neighbours {
            if visited.contains(next.as_str()) || !graph.contains(next) {
                continue;
            }
            let kept = match direction {
                Direction::Upstream => keep_edge(next.as_str(), current),
                Direction::Downstream => keep_edge(current, next.as_str()),
            };
            if !kept {
                continue;
            }
            visited.insert(next.as_str());
            found.push((next.clone(), depth + 1));
            queue.push_back((next.as_str(), depth + 1));
        }
    }
    found
}

/// Connected components over inputs and outputs, ignoring direction.
///
/// Nodes rejected by `keep_node` are neither members nor bridges; edges
/// rejected by `keep_edge` are treated as absent. Components come out in
/// the order of their first node in [`GraphView::node_ids`].
pub fn connected_components<G: GraphView>(
    graph: &G,
    mut keep_node: impl FnMut(&str) -> bool,
    mut keep_edge: impl FnMut(&str, &str) -> bool,
) -> Vec<Vec<NodeId>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut components = vec![];
    for start in graph.node_ids() {
        if visited.contains(start.as_str()) || !keep_node(start.as_str()) {
            continue;
        }
        visited.insert(start.as_str());
        let mut component = vec![start.clone()];
        let mut queue = VecDeque::from([start.as_str()]);
        while let Some(current) = queue.pop_front() {
            let downstream = graph.outputs(current).iter().map(|next| (next, true));
            let upstream = graph.inputs(current).iter().map(|next| (next, false));
            for (next, is_output) in downstream.chain(upstream) {
                if visited.contains(next.as_str()) || !graph.contains(next) || !keep_node(next.as_str())
                {
                    continue;
                }
                let kept = if is_output {
                    keep_edge(current, next.as_str())
                } else {
                    keep_edge(next.as_str(), current)
                };
                if !kept {
                    continue;
                }
                visited.insert(next.as_str());
                component.push(next.clone());
                queue.push_back(next.as_str());
            }
        }
        components.push(component);
    }
    components
}

pub fn sort_ids(ids: &mut [NodeId]) {
    ids.sort_by(|a, b| compare_node_ids(a, b));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_view() -> EdgeListView {
        let mut view = EdgeListView::new(["a", "b", "c", "d"].map(String::from));
        view.add_edge("a", "b");
        view.add_edge("c", "d");
        view
    }

    #[test]
    fn test_components_of_edge_list() {
        let components = connected_components(&chain_view(), |_| true, |_, _| true);
        assert_eq!(components, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn test_removed_edges_split_components() {
        let components = connected_components(&chain_view(), |_| true, |a, b| {
            !(a == "a" && b == "b") && !(a == "b" && b == "a")
        });
        assert_eq!(components.len(), 3);
    }

    #[test]
    fn test_reachable_respects_depth() {
        let mut view = EdgeListView::default();
        view.add_edge("a", "b");
        view.add_edge("b", "c");
        view.add_edge("c", "d");
        let found = reachable(&view, "a", Direction::Downstream, Some(2), |_, _| true);
        let ids: Vec<&str> = found.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(found[1].1, 2);
    }
}
