//! Flat operator graph used by the execution profile view.
//!
//! Unlike [`crate::scope_graph::ScopeGraph`] there is no scope hierarchy to
//! expand; repeated structure is instead folded by
//! [`isomorphic::extract_vis_node_and_edge`], and long or bookkeeping edges
//! are split out by [`edges::classify_edge`].
use crate::config::GraphConfig;
use crate::node::{NodeId, compare_node_ids, dedup_ids, numeric_id, sorted_ids};
use crate::scope_graph::HAS_STRATEGY_KEY;
use crate::scope_trie::{ScopeTrie, TrieNodeId};
use graph_insight_import::{RankedGraphs, RawGraph, RawOpNode, ShardStrategy};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};

pub mod edges;
pub mod isomorphic;

pub use edges::{SpecialEdgeClass, classify_edge};
pub use isomorphic::{AGGREGATE_SUFFIX, ExtractedGraph, ProfileEdge, extract_vis_node_and_edge};

pub const TUPLE_GET_ITEM: &str = "TupleGetItem";
pub const STACKED_OPTIMIZER: &str = "StackedOptimizer";
const OPTIMIZER_SCOPE_MARKER: &str = "optimizer";

pub type ProfileNodeMap = HashMap<NodeId, ProfileNode>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileNode {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub scope: String,
    pub input: Vec<NodeId>,
    pub output: Vec<NodeId>,
    pub attribute: BTreeMap<String, Value>,
    pub output_shape: Option<Value>,
    pub instance_type: Option<String>,
    pub parallel_shard: ShardStrategy,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stacked_ids: Vec<NodeId>,
    pub is_aggre_node: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contain: Vec<NodeId>,
}

impl ProfileNode {
    pub fn from_raw(raw: &RawOpNode) -> Self {
        Self {
            id: raw.node_id.clone(),
            name: raw.name.clone(),
            node_type: raw.op_type.clone(),
            scope: raw.scope.clone(),
            input: raw.input.clone(),
            output: vec![],
            attribute: raw.attr.clone(),
            output_shape: raw.output_shape.clone(),
            instance_type: raw.instance_type.clone(),
            parallel_shard: raw.parallel_shard.clone(),
            stacked_ids: vec![],
            is_aggre_node: false,
            contain: vec![],
        }
    }

    /// Last segment of the scope, which names the layer the op belongs to.
    pub fn scope_tail(&self) -> &str {
        crate::node::last_segment(&self.scope)
    }
}

/// Entry of the per-stage name tree. `key` is the path segment until
/// [`TreeEntry::level_order`] moves it to `title` and assigns positional keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub id: Option<NodeId>,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub children: Vec<TreeEntry>,
}

impl TreeEntry {
    /// Breadth-first relabelling: the root becomes `0`, its children `0-0`,
    /// `0-1`, and so on down the tree.
    pub fn level_order(&mut self) {
        self.title = Some(std::mem::replace(&mut self.key, "0".to_string()));
        let mut queue: VecDeque<&mut TreeEntry> = VecDeque::from([self]);
        while let Some(front) = queue.pop_front() {
            let prefix = front.key.clone();
            for (i, child) in front.children.iter_mut().enumerate() {
                child.title = Some(std::mem::replace(&mut child.key, format!("{prefix}-{i}")));
                queue.push_back(child);
            }
        }
    }
}

fn tree_from_trie(trie: &ScopeTrie, nodes: &[RawOpNode], key: String) -> TreeEntry {
    let to_entry = |id: TrieNodeId| TreeEntry {
        id: trie.first_ref(id).and_then(|at| nodes.get(at)).map(|n| n.node_id.clone()),
        key: trie.get(id).key.clone(),
        title: None,
        children: vec![],
    };
    let mut root = TreeEntry {
        id: None,
        key,
        title: None,
        children: vec![],
    };
    // Children are built depth-first from explicit (trie node, path) pairs.
    let mut stack: Vec<(TrieNodeId, Vec<usize>)> = trie
        .get(trie.root())
        .children
        .iter()
        .enumerate()
        .map(|(i, child)| (*child, vec![i]))
        .collect();
    stack.reverse();
    while let Some((id, path)) = stack.pop() {
        let mut parent = &mut root;
        for index in &path[..path.len() - 1] {
            parent = &mut parent.children[*index];
        }
        parent.children.push(to_entry(id));
        for (i, child) in trie.get(id).children.iter().enumerate().rev() {
            let mut child_path = path.clone();
            child_path.push(i);
            stack.push((*child, child_path));
        }
    }
    root
}

#[derive(Debug, Clone, Default)]
pub struct ProfileGraph {
    config: GraphConfig,
    nodes: ProfileNodeMap,
    special_nodes_map: BTreeMap<String, usize>,
    tree: Vec<TreeEntry>,
}

impl ProfileGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn nodes(&self) -> &ProfileNodeMap {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut ProfileNodeMap {
        &mut self.nodes
    }

    /// Per-stage name trees, one per [`ProfileGraph::build`] since the last reset.
    pub fn tree_data(&self) -> &[TreeEntry] {
        &self.tree
    }

    pub fn reset_tree_data(&mut self) {
        self.tree.clear();
    }

    /// Strategy and instance type counts accumulated over every build since
    /// the last reset.
    pub fn special_nodes_map(&self) -> &BTreeMap<String, usize> {
        &self.special_nodes_map
    }

    pub fn reset_special_nodes_map(&mut self) {
        self.special_nodes_map.clear();
    }

    /// Replaces the node map with the op nodes of one stage.
    pub fn build(&mut self, raw: &RawGraph) {
        self.nodes.clear();
        for raw_node in &raw.op_nodes {
            self.nodes.insert(raw_node.node_id.clone(), ProfileNode::from_raw(raw_node));
        }

        let mut links = vec![];
        for node in self.nodes.values() {
            for input in node.input.iter().filter(|input| self.nodes.contains_key(*input)) {
                links.push((input.clone(), node.id.clone()));
            }
        }
        links.sort_by(|a, b| compare_node_ids(&a.1, &b.1));
        for (source, target) in links {
            if let Some(node) = self.nodes.get_mut(&source) {
                node.output.push(target);
            }
        }

        let pruned = self.prune_tuple_get_item();
        self.count_special_nodes();

        let mut trie = ScopeTrie::new();
        for (index, raw_node) in raw.op_nodes.iter().enumerate() {
            trie.insert(index, &raw_node.name);
        }
        let key = format!("stage{}", self.tree.len());
        self.tree.push(tree_from_trie(&trie, &raw.op_nodes, key));
        log::debug!(
            "Profile graph: {} nodes, {pruned} TupleGetItem nodes spliced out",
            self.nodes.len()
        );
    }

    /// Splices every TupleGetItem out: its producer takes over its consumers.
    fn prune_tuple_get_item(&mut self) -> usize {
        let ids: Vec<NodeId> = sorted_ids(&self.nodes)
            .into_iter()
            .filter(|id| self.nodes[*id].node_type == TUPLE_GET_ITEM)
            .cloned()
            .collect();
        let mut pruned = 0;
        for id in ids {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let Some(producer_id) = node.input.first().cloned() else {
                continue;
            };
            if !self.nodes.contains_key(&producer_id) || producer_id == id {
                continue;
            }
            let consumers = node.output.clone();
            if let Some(producer) = self.nodes.get_mut(&producer_id) {
                if let Some(at) = producer.output.iter().position(|o| *o == id) {
                    producer.output.remove(at);
                }
                producer.output.extend(consumers.iter().cloned());
                dedup_ids(&mut producer.output);
            }
            for consumer_id in &consumers {
                if let Some(consumer) = self.nodes.get_mut(consumer_id) {
                    for input in consumer.input.iter_mut().filter(|input| **input == id) {
                        *input = producer_id.clone();
                    }
                }
            }
            self.nodes.remove(&id);
            pruned += 1;
        }
        pruned
    }

    fn count_special_nodes(&mut self) {
        for node in self.nodes.values().filter(|node| numeric_id(&node.id).is_some()) {
            if !node.parallel_shard.is_empty() {
                *self
                    .special_nodes_map
                    .entry(HAS_STRATEGY_KEY.to_string())
                    .or_default() += 1;
            }
            if let Some(instance_type) = &node.instance_type {
                *self.special_nodes_map.entry(instance_type.clone()).or_default() += 1;
            }
        }
    }

    /// Folds each run of consecutive ids in an optimizer scope into one
    /// `StackedOptimizer` node keyed by the first id of the run.
    pub fn stack_optimizer_nodes(&mut self) -> usize {
        let Some(max_id) = self.nodes.keys().filter_map(|id| numeric_id(id)).max() else {
            return 0;
        };
        let in_optimizer = |nodes: &ProfileNodeMap, id: u64| {
            nodes
                .get(&id.to_string())
                .is_some_and(|node| node.scope.contains(OPTIMIZER_SCOPE_MARKER))
        };
        let mut stacks = 0;
        let mut current = 1;
        while current <= max_id {
            if !in_optimizer(&self.nodes, current) {
                current += 1;
                continue;
            }
            let first_id = current.to_string();
            let Some(first) = self.nodes.remove(&first_id) else {
                current += 1;
                continue;
            };
            let mut stacked = ProfileNode {
                id: first_id.clone(),
                name: first_id.clone(),
                node_type: STACKED_OPTIMIZER.to_string(),
                scope: first.scope.clone(),
                input: first.input,
                output: first.output,
                attribute: BTreeMap::new(),
                output_shape: None,
                instance_type: None,
                parallel_shard: ShardStrategy::default(),
                stacked_ids: vec![first_id.clone()],
                is_aggre_node: false,
                contain: vec![],
            };
            current += 1;
            while current <= max_id && in_optimizer(&self.nodes, current) {
                if let Some(node) = self.nodes.remove(&current.to_string()) {
                    stacked.input.extend(node.input);
                    stacked.output.extend(node.output);
                    stacked.stacked_ids.push(node.id);
                }
                current += 1;
            }
            log::debug!(
                "Stacked {} optimizer nodes into {first_id}",
                stacked.stacked_ids.len()
            );
            self.nodes.insert(first_id, stacked);
            stacks += 1;
        }
        stacks
    }

    /// `rank-inputId-nodeId` to the strategy row that splits that input.
    pub fn strategy_info(ranked: &RankedGraphs) -> BTreeMap<String, Vec<i64>> {
        let mut info = BTreeMap::new();
        for (rank, graph) in ranked.iter() {
            for node in &graph.op_nodes {
                for (row, input) in node.parallel_shard.rows().iter().zip(&node.input) {
                    info.insert(format!("{rank}-{input}-{}", node.node_id), row.clone());
                }
            }
        }
        info
    }
}
