//! Nested port and edge tree for a layered layout engine.
//!
//! The visible graph is flat; the layout engine wants every node nested in
//! its expanded parent, every node to own a west input port and an east
//! output port, and every edge to live in the container that holds both of
//! its endpoints. Edges between different scopes are therefore routed
//! through the ports of each intermediate scope.
use crate::node::{EDGE_SEPARATOR, NodeId, NodeType, SCOPE_SEPARATOR};
use crate::scope_graph::{VisEdge, VisGraph};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const IN_PORT_SUFFIX: &str = "_in";
pub const OUT_PORT_SUFFIX: &str = "_out";
pub const BASIC_SCOPE: &str = "basic_scope";

const SCOPE_SIZE: (u32, u32) = (120, 80);
const OPERATOR_WIDTH: u32 = 40;
const OPERATOR_HEIGHT: u32 = 16;
const STRATEGY_ROW_HEIGHT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortSide {
    West,
    East,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutPort {
    pub id: String,
    pub owner: NodeId,
    pub is_input: bool,
    pub is_hidden: bool,
    pub properties: BTreeMap<String, PortSide>,
}

impl LayoutPort {
    fn new(owner: &str, is_input: bool, is_hidden: bool) -> Self {
        let (suffix, side) = if is_input {
            (IN_PORT_SUFFIX, PortSide::West)
        } else {
            (OUT_PORT_SUFFIX, PortSide::East)
        };
        Self {
            id: format!("{owner}{suffix}"),
            owner: owner.to_string(),
            is_input,
            is_hidden,
            properties: BTreeMap::from([("port.side".to_string(), side)]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutEdge {
    pub id: String,
    pub sources: Vec<String>,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub label: String,
    pub name: String,
    pub special_nodes_cnt: BTreeMap<String, usize>,
    pub expanded: bool,
    pub width: u32,
    pub height: u32,
    pub ports: Vec<LayoutPort>,
    pub children: Vec<LayoutNode>,
    pub edges: Vec<LayoutEdge>,
    pub layout_options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutRoot {
    pub id: String,
    pub children: Vec<LayoutNode>,
    pub edges: Vec<LayoutEdge>,
}

impl LayoutRoot {
    /// Depth-first lookup of a nested node.
    pub fn find(&self, id: &str) -> Option<&LayoutNode> {
        let mut stack: Vec<&LayoutNode> = self.children.iter().collect();
        while let Some(node) = stack.pop() {
            if node.id == id {
                return Some(node);
            }
            stack.extend(node.children.iter());
        }
        None
    }
}

/// Per-call working record for one visible node.
#[derive(Debug, Clone)]
struct LayoutDataNode {
    id: NodeId,
    label: String,
    name: String,
    node_type: String,
    parent: NodeId,
    children: Vec<NodeId>,
    expanded: bool,
    has_input: bool,
    has_output: bool,
    special_nodes_cnt: BTreeMap<String, usize>,
    strategy_rows: usize,
    edges: Vec<LayoutEdge>,
    hidden_inputs: BTreeSet<NodeId>,
    hidden_outputs: BTreeSet<NodeId>,
}

impl LayoutDataNode {
    fn set_edge(&mut self, id: String, source: String, target: String) {
        let edge = LayoutEdge {
            id,
            sources: vec![source],
            targets: vec![target],
        };
        match self.edges.iter_mut().find(|existing| existing.id == edge.id) {
            Some(existing) => *existing = edge,
            None => self.edges.push(edge),
        }
    }

    fn is_scope(&self) -> bool {
        self.node_type == BASIC_SCOPE || self.node_type == NodeType::NameScope.as_str()
    }
}

#[derive(Debug, Default)]
pub struct LayoutEmitter {
    root_set: Vec<NodeId>,
    module_edges: Vec<VisEdge>,
    data: HashMap<NodeId, LayoutDataNode>,
    order: Vec<NodeId>,
    routes: HashMap<(NodeId, NodeId), BTreeSet<String>>,
}

impl LayoutEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of the nodes visible on the first emission.
    pub fn root_set(&self) -> &[NodeId] {
        &self.root_set
    }

    /// Layout edge ids a visible edge was routed through on the last emission.
    pub fn route(&self, source: &str, target: &str) -> Option<&BTreeSet<String>> {
        self.routes.get(&(source.to_string(), target.to_string()))
    }

    /// Builds the nested layout tree. The first call remembers its edges as
    /// the module-level edge set, which later calls add back.
    pub fn emit(&mut self, vis: &VisGraph, is_first: bool) -> LayoutRoot {
        self.data.clear();
        self.order.clear();
        self.routes.clear();
        if is_first {
            self.root_set.clear();
        }
        for node in &vis.vis_nodes {
            if is_first {
                self.root_set.push(node.id.clone());
            }
            let strategy_rows = vis
                .node_attr_map
                .get(&node.id)
                .map_or(0, |attr| attr.strategy.len());
            self.order.push(node.id.clone());
            self.data.insert(
                node.id.clone(),
                LayoutDataNode {
                    id: node.id.clone(),
                    label: node.label.clone(),
                    name: node.name.clone(),
                    node_type: node.node_type.to_string(),
                    parent: node.parent.clone(),
                    children: node.children.clone(),
                    expanded: node.expanded,
                    has_input: !node.input.is_empty(),
                    has_output: !node.output.is_empty(),
                    special_nodes_cnt: node.special_nodes_cnt.clone(),
                    strategy_rows,
                    edges: vec![],
                    hidden_inputs: BTreeSet::new(),
                    hidden_outputs: BTreeSet::new(),
                },
            );
        }

        let mut edges = vis.edges.clone();
        if is_first {
            self.module_edges = vis.edges.clone();
        } else {
            edges.extend(self.module_edges.iter().cloned());
        }
        for edge in &edges {
            self.add_node_edges(&edge.source, &edge.target);
        }

        let mut root = LayoutRoot {
            id: "root".to_string(),
            ..Default::default()
        };
        let top_level: Vec<NodeId> = self
            .order
            .iter()
            .filter(|id| self.data[*id].parent.is_empty())
            .cloned()
            .collect();
        for id in top_level {
            if let Some(node) = self.data.get_mut(&id) {
                if node.node_type == NodeType::NameScope.as_str() {
                    node.node_type = BASIC_SCOPE.to_string();
                }
            }
            if let Some((node, node_edges)) = self.build_node(&id) {
                root.children.push(node);
                root.edges.extend(node_edges);
            }
        }
        log::debug!(
            "Layout tree: {} top-level nodes, {} routed edges",
            root.children.len(),
            self.routes.len()
        );
        root
    }

    /// The node with its expanded subtree, plus the edges it owns, which
    /// belong to the enclosing container.
    fn build_node(&self, id: &str) -> Option<(LayoutNode, Vec<LayoutEdge>)> {
        let data = self.data.get(id)?;
        let is_scope = data.is_scope();
        let is_basic = data.node_type == BASIC_SCOPE;
        let (width, height) = if is_scope {
            SCOPE_SIZE
        } else {
            (
                OPERATOR_WIDTH,
                OPERATOR_HEIGHT + STRATEGY_ROW_HEIGHT * data.strategy_rows as u32,
            )
        };
        let (input_hidden, output_hidden) = if is_basic {
            (!data.has_input, !data.has_output)
        } else {
            (data.hidden_inputs.is_empty(), data.hidden_outputs.is_empty())
        };

        let mut node = LayoutNode {
            id: data.id.clone(),
            node_type: data.node_type.clone(),
            label: data.label.clone(),
            name: data.name.clone(),
            special_nodes_cnt: data.special_nodes_cnt.clone(),
            expanded: data.expanded,
            width,
            height,
            ports: vec![
                LayoutPort::new(&data.id, true, input_hidden),
                LayoutPort::new(&data.id, false, output_hidden),
            ],
            children: vec![],
            edges: vec![],
            layout_options: BTreeMap::from([(
                "nodeSize.minimum".to_string(),
                format!("[{width}, {height}]"),
            )]),
        };
        if data.expanded {
            for child in &data.children {
                if let Some((child_node, child_edges)) = self.build_node(child) {
                    node.children.push(child_node);
                    node.edges.extend(child_edges);
                }
            }
        }
        Some((node, data.edges.clone()))
    }

    fn add_node_edges(&mut self, source: &str, target: &str) {
        let (Some(source_node), Some(target_node)) = (self.data.get(source), self.data.get(target))
        else {
            return;
        };
        let source_parent = source_node.parent.clone();
        let target_parent = target_node.parent.clone();

        let ids = if source_parent == target_parent {
            vec![self.normal_edge(source, target)]
        } else {
            let source_list: Vec<&str> = source_parent.split(SCOPE_SEPARATOR).collect();
            let target_list: Vec<&str> = target_parent.split(SCOPE_SEPARATOR).collect();
            if source_list[0] != target_list[0] {
                if let Some(node) = self.data.get_mut(source) {
                    node.hidden_outputs.insert(target.to_string());
                }
                if let Some(node) = self.data.get_mut(target) {
                    node.hidden_inputs.insert(source.to_string());
                }
                return;
            }
            self.through_scope_edges(source, target, &source_list, &target_list)
        };
        self.routes
            .entry((source.to_string(), target.to_string()))
            .or_default()
            .extend(ids);
    }

    fn normal_edge(&mut self, start: &str, end: &str) -> String {
        let id = format!("{start}{EDGE_SEPARATOR}{end}");
        if let Some(node) = self.data.get_mut(start) {
            node.set_edge(
                id.clone(),
                format!("{start}{OUT_PORT_SUFFIX}"),
                format!("{end}{IN_PORT_SUFFIX}"),
            );
        }
        id
    }

    fn through_scope_edges(
        &mut self,
        source: &str,
        target: &str,
        source_list: &[&str],
        target_list: &[&str],
    ) -> Vec<String> {
        let common = source_list
            .iter()
            .zip(target_list)
            .take_while(|(a, b)| a == b)
            .count();
        let level = common + 1;
        let mut ids = vec![];
        if source_list.len() == common {
            let target_start = target_list[..level].join("/");
            ids.push(self.normal_edge(source, &target_start));
            ids.extend(self.input_chain(&target_start, target));
        } else if target_list.len() == common {
            let source_end = source_list[..level].join("/");
            ids.push(self.normal_edge(&source_end, target));
            ids.extend(self.output_chain(source, &source_end));
        } else {
            let target_start = target_list[..level].join("/");
            let source_end = source_list[..level].join("/");
            ids.push(self.normal_edge(&source_end, &target_start));
            ids.extend(self.output_chain(source, &source_end));
            ids.extend(self.input_chain(&target_start, target));
        }
        ids
    }

    /// Edges from each enclosing scope's input port down to `end`, stopping
    /// at `start`.
    fn input_chain(&mut self, start: &str, end: &str) -> Vec<String> {
        let mut ids = vec![];
        let mut current = end.to_string();
        while current != start {
            let Some(node) = self.data.get_mut(&current) else {
                break;
            };
            let parent = node.parent.clone();
            if parent.is_empty() {
                break;
            }
            let id = format!("{parent}{EDGE_SEPARATOR}{current}");
            node.set_edge(
                id.clone(),
                format!("{parent}{IN_PORT_SUFFIX}"),
                format!("{current}{IN_PORT_SUFFIX}"),
            );
            ids.push(id);
            current = parent;
        }
        ids
    }

    /// Edges from `start`'s output port up through each enclosing scope,
    /// stopping at `end`.
    fn output_chain(&mut self, start: &str, end: &str) -> Vec<String> {
        let mut ids = vec![];
        let mut current = start.to_string();
        while current != end {
            let Some(node) = self.data.get_mut(&current) else {
                break;
            };
            let parent = node.parent.clone();
            if parent.is_empty() {
                break;
            }
            let id = format!("{current}{EDGE_SEPARATOR}{parent}");
            node.set_edge(
                id.clone(),
                format!("{current}{OUT_PORT_SUFFIX}"),
                format!("{parent}{OUT_PORT_SUFFIX}"),
            );
            ids.push(id);
            current = parent;
        }
        ids
    }
}
