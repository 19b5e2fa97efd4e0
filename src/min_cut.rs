//! Minimum edge cuts separating the upstream and downstream neighbourhoods
//! of communication nodes.
//!
//! Each communication node gets its own flow network: the numeric
//! non-communication nodes of the graph with unit-capacity edges, plus a
//! virtual source feeding the nodes upstream of the communication node and a
//! virtual sink draining the nodes downstream of it. Communication nodes
//! that look alike (same bounded-depth neighbourhood type counts) reuse the
//! cut of the first one, re-mapped through their own sorted neighbourhood.
use crate::config::GraphConfig;
use crate::graph::{Direction, GraphView, reachable};
use crate::node::{GraphNode, NodeId, NodeMap, compare_node_ids, edge_key, is_numeric_id};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Directed edges removed from the display graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutEdgeSet {
    by_source: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl CutEdgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: &str, target: &str) -> bool {
        self.by_source
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string())
    }

    pub fn contains(&self, source: &str, target: &str) -> bool {
        self.by_source
            .get(source)
            .is_some_and(|targets| targets.contains(target))
    }

    pub fn len(&self) -> usize {
        self.by_source.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &NodeId)> {
        self.by_source
            .iter()
            .flat_map(|(source, targets)| targets.iter().map(move |target| (source, target)))
    }

    /// `source->target` keys.
    pub fn keys(&self) -> Vec<String> {
        self.iter().map(|(s, t)| edge_key(s, t)).collect()
    }
}

/// Residual-capacity network over dense node indices.
#[derive(Debug, Clone, Default)]
pub struct FlowNetwork {
    capacity: Vec<BTreeMap<usize, i64>>,
    residual: Vec<BTreeMap<usize, i64>>,
}

impl FlowNetwork {
    pub fn new(node_count: usize) -> Self {
        Self {
            capacity: vec![BTreeMap::new(); node_count],
            residual: vec![BTreeMap::new(); node_count],
        }
    }

    pub fn add_node(&mut self) -> usize {
        self.capacity.push(BTreeMap::new());
        self.residual.push(BTreeMap::new());
        self.capacity.len() - 1
    }

    pub fn node_count(&self) -> usize {
        self.capacity.len()
    }

    pub fn set_edge(&mut self, from: usize, to: usize, capacity: i64) {
        self.capacity[from].insert(to, capacity);
        self.residual[from].insert(to, capacity);
    }

    /// Shortest augmenting path by BFS over positive residual edges. The
    /// search gives up (reports no path) when `sink` is still unseen after
    /// `max_dequeues + 1` nodes have been expanded.
    fn augmenting_path(&self, source: usize, sink: usize, max_dequeues: usize) -> Option<Vec<usize>> {
        let mut parent = vec![usize::MAX; self.node_count()];
        let mut visited = vec![false; self.node_count()];
        let mut queue = VecDeque::from([source]);
        visited[source] = true;
        let mut expanded = 0;
        while let Some(top) = queue.pop_front() {
            if expanded > max_dequeues && !visited[sink] {
                return None;
            }
            for (&next, &capacity) in &self.residual[top] {
                if !visited[next] && capacity > 0 {
                    parent[next] = top;
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
            expanded += 1;
        }
        if !visited[sink] {
            return None;
        }
        let mut path = vec![sink];
        let mut current = sink;
        while current != source {
            current = parent[current];
            path.push(current);
        }
        path.reverse();
        Some(path)
    }

    /// Ford–Fulkerson. Returns the total flow pushed.
    pub fn max_flow(&mut self, source: usize, sink: usize, max_dequeues: usize) -> i64 {
        let mut total = 0;
        while let Some(path) = self.augmenting_path(source, sink, max_dequeues) {
            let flow = path
                .windows(2)
                .map(|pair| self.residual[pair[0]].get(&pair[1]).copied().unwrap_or(0))
                .min()
                .unwrap_or(0);
            if flow <= 0 {
                break;
            }
            for pair in path.windows(2) {
                let (from, to) = (pair[0], pair[1]);
                let forward = self.residual[from].entry(to).or_insert(0);
                *forward -= flow;
                if *forward == 0 {
                    self.residual[from].remove(&to);
                }
                *self.residual[to].entry(from).or_insert(0) += flow;
            }
            total += flow;
        }
        total
    }

    /// Nodes reachable from `source` over positive residual edges.
    pub fn source_side(&self, source: usize) -> Vec<bool> {
        let mut reached = vec![false; self.node_count()];
        reached[source] = true;
        let mut queue = VecDeque::from([source]);
        while let Some(top) = queue.pop_front() {
            for (&next, &capacity) in &self.residual[top] {
                if capacity > 0 && !reached[next] {
                    reached[next] = true;
                    queue.push_back(next);
                }
            }
        }
        reached
    }

    /// Original edges leaving the source side.
    pub fn cut_edges(&self, source: usize) -> Vec<(usize, usize)> {
        let reached = self.source_side(source);
        let mut cut = vec![];
        for (from, targets) in self.capacity.iter().enumerate() {
            if !reached[from] {
                continue;
            }
            for &to in targets.keys() {
                if !reached[to] {
                    cut.push((from, to));
                }
            }
        }
        cut
    }
}

/// Canonical encoding of a communication node's surroundings: type counts
/// upstream and downstream within the signature depth.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopologySignature {
    upstream: BTreeMap<String, usize>,
    downstream: BTreeMap<String, usize>,
}

pub struct MinCutPartitioner<'a> {
    config: &'a GraphConfig,
    cache: HashMap<TopologySignature, Vec<(usize, usize)>>,
}

impl<'a> MinCutPartitioner<'a> {
    pub fn new(config: &'a GraphConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    pub fn cached_signatures(&self) -> usize {
        self.cache.len()
    }

    /// Signature plus the sorted ids it was computed over, the node itself included.
    pub fn signature(&self, nodes: &NodeMap, id: &str) -> (TopologySignature, Vec<NodeId>) {
        let mut neighbourhood = vec![id.to_string()];
        let mut count = |direction: Direction| {
            let mut types = BTreeMap::new();
            for (visited, _) in reachable(
                nodes,
                id,
                direction,
                Some(self.config.signature_depth),
                |source, target| {
                    let next = if direction == Direction::Upstream { source } else { target };
                    is_numeric_id(next)
                },
            ) {
                if let Some(node) = nodes.get(&visited) {
                    *types.entry(node.node_type.as_str().to_string()).or_insert(0) += 1;
                }
                neighbourhood.push(visited);
            }
            types
        };
        let upstream = count(Direction::Upstream);
        let downstream = count(Direction::Downstream);
        neighbourhood.sort_by(|a, b| compare_node_ids(a, b));
        (TopologySignature { upstream, downstream }, neighbourhood)
    }

    /// Non-communication nodes near `id`, upstream and downstream. Each
    /// search expands at most `related_search_iterations + 1` nodes.
    fn related_nodes(
        &self,
        nodes: &NodeMap,
        id: &str,
        is_comm: &impl Fn(&GraphNode) -> bool,
    ) -> (Vec<NodeId>, Vec<NodeId>) {
        let search = |direction: Direction| {
            let mut found: Vec<NodeId> = vec![];
            let mut visited: BTreeSet<&str> = BTreeSet::from([id]);
            let mut queue = VecDeque::from([id]);
            let mut dequeued = 0;
            while dequeued <= self.config.related_search_iterations {
                let Some(top) = queue.pop_front() else {
                    break;
                };
                dequeued += 1;
                let neighbours = match direction {
                    Direction::Upstream => nodes.inputs(top),
                    Direction::Downstream => nodes.outputs(top),
                };
                for next in neighbours {
                    let Some(node) = nodes.get(next) else {
                        continue;
                    };
                    if !is_numeric_id(next) || visited.contains(next.as_str()) || is_comm(node) {
                        continue;
                    }
                    visited.insert(next.as_str());
                    found.push(next.clone());
                    queue.push_back(next.as_str());
                }
            }
            found
        };
        (search(Direction::Upstream), search(Direction::Downstream))
    }

    /// Cut edges for every node accepted by `is_comm`.
    pub fn compute_min_cut(&mut self, nodes: &NodeMap, is_comm: impl Fn(&GraphNode) -> bool) -> CutEdgeSet {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut ids: Vec<&NodeId> = vec![];
        let mut comm_nodes: Vec<&NodeId> = vec![];
        for id in nodes.node_ids() {
            if !is_numeric_id(id) {
                continue;
            }
            if is_comm(&nodes[id]) {
                comm_nodes.push(id);
            } else {
                index.insert(id.as_str(), ids.len());
                ids.push(id);
            }
        }

        let mut base = FlowNetwork::new(ids.len());
        for (from, id) in ids.iter().enumerate() {
            for output in nodes.outputs(id) {
                if let Some(&to) = index.get(output.as_str()) {
                    base.set_edge(from, to, 1);
                }
            }
            for input in nodes.inputs(id) {
                if let Some(&to) = index.get(input.as_str()) {
                    base.set_edge(to, from, 1);
                }
            }
        }

        let mut cut = CutEdgeSet::new();
        for comm_id in comm_nodes {
            let (signature, neighbourhood) = self.signature(nodes, comm_id);
            if let Some(pairs) = self.cache.get(&signature) {
                for &(a, b) in pairs {
                    if let (Some(a), Some(b)) = (neighbourhood.get(a), neighbourhood.get(b)) {
                        cut.insert(a, b);
                    }
                }
                continue;
            }

            let (upstream, downstream) = self.related_nodes(nodes, comm_id, &is_comm);
            let mut network = base.clone();
            let source = network.add_node();
            let sink = network.add_node();
            for id in &upstream {
                if let Some(&node) = index.get(id.as_str()) {
                    network.set_edge(source, node, self.config.terminal_capacity);
                }
            }
            for id in &downstream {
                if let Some(&node) = index.get(id.as_str()) {
                    network.set_edge(node, sink, self.config.terminal_capacity);
                }
            }
            let flow = network.max_flow(source, sink, self.config.flow_bfs_iterations);

            let mut pairs = vec![];
            for (from, to) in network.cut_edges(source) {
                if from == source || from == sink || to == source || to == sink {
                    continue;
                }
                let (from, to) = (ids[from], ids[to]);
                cut.insert(from, to);
                let position = |id: &str| neighbourhood.iter().position(|n| n == id);
                if let (Some(a), Some(b)) = (position(from), position(to)) {
                    pairs.push((a, b));
                }
            }
            log::debug!(
                "Communication node {comm_id}: flow {flow}, {} cut edges",
                pairs.len()
            );
            self.cache.insert(signature, pairs);
        }
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;

    fn op(id: &str, op_type: &str, input: &[&str]) -> GraphNode {
        let mut node = GraphNode::name_scope("s");
        node.id = id.to_string();
        node.node_type = NodeType::Operator(op_type.to_string());
        node.input = input.iter().map(|s| s.to_string()).collect();
        node
    }

    fn node_map(nodes: Vec<GraphNode>) -> NodeMap {
        let mut map: NodeMap = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        let edges: Vec<(String, String)> = map
            .values()
            .flat_map(|n| n.input.iter().map(|i| (i.clone(), n.id.clone())))
            .collect();
        for (source, target) in edges {
            if let Some(node) = map.get_mut(&source) {
                node.output.push(target);
            }
        }
        map
    }

    #[test]
    fn test_diamond_max_flow() {
        // s -> a -> t, s -> b -> t
        let mut network = FlowNetwork::new(4);
        let (s, a, b, t) = (0, 1, 2, 3);
        network.set_edge(s, a, 1);
        network.set_edge(s, b, 1);
        network.set_edge(a, t, 1);
        network.set_edge(b, t, 1);
        assert_eq!(network.max_flow(s, t, 100), 2);
        let cut = network.cut_edges(s);
        assert_eq!(cut.len(), 2);
        assert!(!network.source_side(s)[t]);
    }

    #[test]
    fn test_bottleneck_cut() {
        // Two wide layers joined by a single edge 2 -> 3.
        let mut network = FlowNetwork::new(6);
        network.set_edge(0, 1, 5);
        network.set_edge(0, 2, 5);
        network.set_edge(1, 2, 5);
        network.set_edge(2, 3, 1);
        network.set_edge(3, 4, 5);
        network.set_edge(4, 5, 5);
        assert_eq!(network.max_flow(0, 5, 100), 1);
        assert_eq!(network.cut_edges(0), vec![(2, 3)]);
    }

    #[test]
    fn test_bfs_cap_gives_up() {
        let mut network = FlowNetwork::new(6);
        for i in 0..5 {
            network.set_edge(i, i + 1, 1);
        }
        assert_eq!(network.max_flow(0, 5, 2), 0);
        assert_eq!(network.max_flow(0, 5, 10), 1);
    }

    #[test]
    fn test_bfs_cap_counts_expanded_nodes() {
        // reaching 5 takes five expansions: 0 through 4
        let mut network = FlowNetwork::new(6);
        for i in 0..5 {
            network.set_edge(i, i + 1, 1);
        }
        assert_eq!(network.max_flow(0, 5, 3), 0);
        assert_eq!(network.max_flow(0, 5, 4), 1);
    }

    #[test]
    fn test_related_search_depth() {
        // chain 1 -> 2 -> ... -> 8 with the AllReduce at 4
        let mut chain = vec![op("1", "Conv2D", &[])];
        for id in 2..=8 {
            let op_type = if id == 4 { "AllReduce" } else { "ReLU" };
            chain.push(op(&id.to_string(), op_type, &[&(id - 1).to_string()]));
        }
        let nodes = node_map(chain);
        let is_comm = |n: &GraphNode| n.node_type.is_comm();

        let config = GraphConfig::default().with_related_search_iterations(1);
        let partitioner = MinCutPartitioner::new(&config);
        let (upstream, downstream) = partitioner.related_nodes(&nodes, "4", &is_comm);
        assert_eq!(upstream, vec!["3", "2"]);
        assert_eq!(downstream, vec!["5", "6"]);

        let config = GraphConfig::default().with_related_search_iterations(0);
        let partitioner = MinCutPartitioner::new(&config);
        let (upstream, downstream) = partitioner.related_nodes(&nodes, "4", &is_comm);
        assert_eq!(upstream, vec!["3"]);
        assert_eq!(downstream, vec!["5"]);
    }

    #[test]
    fn test_cut_separates_communication_neighbourhood() {
        // 1 -> 2 -> 3(AllReduce) -> 4 -> 5, plus a bypass 2 -> 4.
        let nodes = node_map(vec![
            op("1", "Conv2D", &[]),
            op("2", "ReLU", &["1"]),
            op("3", "AllReduce", &["2"]),
            op("4", "Add", &["3", "2"]),
            op("5", "MatMul", &["4"]),
        ]);
        let config = GraphConfig::default();
        let mut partitioner = MinCutPartitioner::new(&config);
        let cut = partitioner.compute_min_cut(&nodes, |n| n.node_type.is_comm());
        assert!(cut.contains("2", "4"));
        assert_eq!(cut.len(), 1);
        assert_eq!(partitioner.cached_signatures(), 1);
    }

    #[test]
    fn test_equal_signatures_reuse_cut() {
        // Two identical chains, each with a bypass around its AllReduce.
        let mut chain = vec![];
        for base in [0, 10] {
            let id = |offset: u32| (base + offset).to_string();
            chain.push(op(&id(1), "Conv2D", &[]));
            chain.push(op(&id(2), "ReLU", &[&id(1)]));
            chain.push(op(&id(3), "AllReduce", &[&id(2)]));
            chain.push(op(&id(4), "Add", &[&id(3), &id(2)]));
        }
        let nodes = node_map(chain);
        let config = GraphConfig::default();
        let mut partitioner = MinCutPartitioner::new(&config);
        let cut = partitioner.compute_min_cut(&nodes, |n| n.node_type.is_comm());
        assert_eq!(partitioner.cached_signatures(), 1);
        assert!(cut.contains("2", "4"));
        assert!(cut.contains("12", "14"));
    }
}
