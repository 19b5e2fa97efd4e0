//! Hierarchical display graph built from a raw operator graph.
//!
//! A [`ScopeGraph`] owns everything one displayed graph needs between user
//! interactions: the node map, parameter and const nodes, the root's child
//! list, per-scope statistics and the display attributes of the visible
//! operators. [`ScopeGraph::build_graph`] rebuilds it wholesale;
//! [`ScopeGraph::toggle_expanded`] and [`ScopeGraph::query_single_node`]
//! mutate it incrementally and return the new visible graph.
use crate::config::GraphConfig;
use crate::extra_attr::ExtraAttrTable;
use crate::min_cut::CutEdgeSet;
use crate::node::{AuxNode, GraphNode, NodeId, NodeMap, NodeType, SCOPE_SEPARATOR};
use graph_insight_import::RawGraph;
use std::collections::{BTreeMap, HashMap};

mod hierarchy;
mod ingest;
mod prune;
mod search;
mod stack;
mod visible;

pub use search::{SearchNode, SingleNode};
pub use visible::{VisEdge, VisGraph};

pub const HAS_STRATEGY_KEY: &str = "hasStrategy";

/// The synthetic root; never stored in the node map.
#[derive(Debug, Clone, Default)]
pub struct RootNode {
    pub children: Vec<NodeId>,
    pub stacked: bool,
}

#[derive(Debug, Clone)]
pub struct ScopeGraph {
    config: GraphConfig,
    nodes: NodeMap,
    parameters: HashMap<NodeId, AuxNode>,
    consts: HashMap<NodeId, AuxNode>,
    root: RootNode,
    name_scope_ids: Vec<NodeId>,
    selected_top_scope: Option<String>,
    active_top_scope: String,
    show_rank_id: Option<String>,
    instance_type_filter: bool,
    special_nodes_map: BTreeMap<String, usize>,
    first_cnt_flag: bool,
    extra_attrs: ExtraAttrTable,
    edge_id_map: HashMap<String, String>,
    cut_edges: CutEdgeSet,
}

impl Default for ScopeGraph {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

impl ScopeGraph {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            nodes: NodeMap::new(),
            parameters: HashMap::new(),
            consts: HashMap::new(),
            root: RootNode::default(),
            name_scope_ids: vec![],
            selected_top_scope: None,
            active_top_scope: String::new(),
            show_rank_id: None,
            instance_type_filter: false,
            special_nodes_map: BTreeMap::new(),
            first_cnt_flag: true,
            extra_attrs: ExtraAttrTable::new(),
            edge_id_map: HashMap::new(),
            cut_edges: CutEdgeSet::new(),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// First scope segment of every op node, in first-seen order.
    pub fn top_scope_set(raw: &RawGraph) -> Vec<String> {
        let mut scopes: Vec<String> = vec![];
        for node in &raw.op_nodes {
            let top = node.scope.split(SCOPE_SEPARATOR).next().unwrap_or_default();
            if !scopes.iter().any(|s| s == top) {
                scopes.push(top.to_string());
            }
        }
        scopes
    }

    /// Rebuilds the whole display graph from `raw` and returns what is visible
    /// with every scope collapsed.
    pub fn build_graph(&mut self, raw: &RawGraph) -> VisGraph {
        self.clear_graph();
        self.active_top_scope = match &self.selected_top_scope {
            Some(scope) => scope.clone(),
            None => Self::top_scope_set(raw).into_iter().next().unwrap_or_default(),
        };
        self.ingest(raw);
        self.process_name_scopes();
        self.count_special_nodes();
        self.process_hierarchy();
        self.optimize_nodes(None);
        log::info!(
            "Built graph: {} op nodes in, {} nodes, {} name scopes, {} cut edges",
            raw.op_nodes.len(),
            self.nodes.len(),
            self.name_scope_ids.len(),
            self.cut_edges.len()
        );
        self.produce_vis_graph()
    }

    /// Flips the expansion of a scope. Expanding also opens any chain of
    /// lone name-scope children below it; the deepest opened scope is stacked.
    pub fn toggle_expanded(&mut self, id: &str) -> Option<VisGraph> {
        let node = self.nodes.get_mut(id)?;
        node.expanded = !node.expanded;
        let expanded = node.expanded;
        let mut optimize_id = id.to_string();
        let mut children = node.children.clone();
        while expanded && children.len() == 1 {
            let Some(child) = self.nodes.get_mut(&children[0]) else {
                break;
            };
            if child.node_type != NodeType::NameScope {
                break;
            }
            child.expanded = true;
            optimize_id = child.id.clone();
            children = child.children.clone();
        }
        self.optimize_nodes(Some(&optimize_id));
        Some(self.produce_vis_graph())
    }

    /// Outermost ancestor of `id`, or `id` itself at the top level.
    pub fn find_top_scope(&self, id: &str) -> Option<NodeId> {
        let mut current = self.nodes.get(id)?;
        while let Some(parent) = self.nodes.get(&current.parent) {
            current = parent;
        }
        Some(current.id.clone())
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    pub fn root(&self) -> &RootNode {
        &self.root
    }

    pub fn parameters(&self) -> &HashMap<NodeId, AuxNode> {
        &self.parameters
    }

    pub fn consts(&self) -> &HashMap<NodeId, AuxNode> {
        &self.consts
    }

    pub fn name_scope_ids(&self) -> &[NodeId] {
        &self.name_scope_ids
    }

    pub fn cut_edges(&self) -> &CutEdgeSet {
        &self.cut_edges
    }

    pub fn extra_attrs(&self) -> &ExtraAttrTable {
        &self.extra_attrs
    }

    /// Raw `input->node` edge to the visible `source->target` edge it was drawn as.
    pub fn edge_id_map(&self) -> &HashMap<String, String> {
        &self.edge_id_map
    }

    /// Graph-wide counts of nodes with a strategy and per instance type.
    pub fn special_nodes_map(&self) -> &BTreeMap<String, usize> {
        &self.special_nodes_map
    }

    pub fn instance_type_filter(&self) -> bool {
        self.instance_type_filter
    }

    pub fn show_node_type(&self) -> &str {
        &self.active_top_scope
    }

    /// Selects the top scope whose communication nodes drive partitioning on
    /// the next build.
    pub fn change_show_node_type(&mut self, top_scope: impl Into<String>) {
        self.selected_top_scope = Some(top_scope.into());
    }

    pub fn change_show_rank_id(&mut self, rank: impl Into<String>) {
        self.show_rank_id = Some(rank.into());
    }

    pub fn show_rank_id(&self) -> Option<&str> {
        self.show_rank_id.as_deref()
    }

    /// Makes the next build recompute the graph-wide special node counts.
    pub fn reset_first_cnt_flag(&mut self) {
        self.first_cnt_flag = true;
    }

    /// Drops the graph and the graph-wide counts, keeping configuration.
    pub fn reset_data(&mut self) {
        self.clear_graph();
        self.special_nodes_map.clear();
        self.selected_top_scope = None;
        self.show_rank_id = None;
        self.first_cnt_flag = true;
    }

    fn clear_graph(&mut self) {
        self.nodes.clear();
        self.parameters.clear();
        self.consts.clear();
        self.root = RootNode::default();
        self.name_scope_ids.clear();
        self.instance_type_filter = false;
        self.extra_attrs.clear();
        self.edge_id_map.clear();
        self.cut_edges = CutEdgeSet::new();
    }

    pub(crate) fn children_of(&self, id: Option<&str>) -> &[NodeId] {
        match id.and_then(|id| self.nodes.get(id)) {
            Some(node) => &node.children,
            None => &self.root.children,
        }
    }
}
