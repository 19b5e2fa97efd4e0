use super::ScopeGraph;
use crate::extra_attr::ExtraAttr;
use crate::node::{GraphNode, NodeId, SCOPE_SEPARATOR, edge_key, is_numeric_id};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub count: usize,
}

/// What is on screen: the nodes reachable through expanded scopes, the
/// collapsed edges between them and their display attributes.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisGraph {
    pub vis_nodes: Vec<GraphNode>,
    pub edges: Vec<VisEdge>,
    pub node_attr_map: HashMap<NodeId, ExtraAttr>,
}

impl VisGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.vis_nodes.iter().find(|node| node.id == id)
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&VisEdge> {
        self.edges
            .iter()
            .find(|edge| edge.source == source && edge.target == target)
    }
}

fn copy_suffix(id: &str) -> &str {
    id.rsplit('_').next().unwrap_or(id)
}

impl ScopeGraph {
    /// Outermost collapsed ancestor of `id`, or `id` itself when every
    /// ancestor is expanded.
    pub fn find_exist_name_scope(&self, id: &str) -> NodeId {
        let mut target = id;
        let mut current = self.nodes.get(id);
        while let Some(parent) = current.and_then(|node| self.nodes.get(&node.parent)) {
            if !parent.expanded {
                target = &parent.id;
            }
            current = Some(parent);
        }
        target.to_string()
    }

    // Two top-level islands only talk through communication nodes; direct
    // edges between them come from cut edges and are not drawn.
    fn crosses_islands(&self, source: &GraphNode, target: &GraphNode) -> bool {
        source.is_scope()
            && target.is_scope()
            && !source.id.contains(SCOPE_SEPARATOR)
            && !target.id.contains(SCOPE_SEPARATOR)
            && copy_suffix(&source.id) != copy_suffix(&target.id)
    }

    pub(super) fn produce_vis_graph(&mut self) -> VisGraph {
        let mut vis_nodes = vec![];
        let mut counts: HashMap<(NodeId, NodeId), usize> = HashMap::new();
        let mut edge_order = vec![];
        let mut frontier: VecDeque<NodeId> = self.root.children.iter().cloned().collect();

        while let Some(id) = frontier.pop_front() {
            let Some(node) = self.nodes.get(&id) else {
                log::warn!("Visible child {id} is missing from the node map");
                continue;
            };
            vis_nodes.push(node.clone());
            if node.expanded {
                frontier.extend(node.children.iter().cloned());
                continue;
            }
            for input in node.input.iter().filter(|input| is_numeric_id(input)) {
                if !self.nodes.contains_key(input) {
                    continue;
                }
                let source_id = self.find_exist_name_scope(input);
                if source_id == node.id {
                    continue;
                }
                let Some(source) = self.nodes.get(&source_id) else {
                    continue;
                };
                if self.crosses_islands(source, node) {
                    continue;
                }
                let key = (source_id.clone(), node.id.clone());
                let count = counts.entry(key.clone()).or_insert_with(|| {
                    edge_order.push(key);
                    0
                });
                *count += 1;
                self.edge_id_map
                    .insert(edge_key(input, &node.id), edge_key(&source_id, &node.id));
            }
        }

        let edges = edge_order
            .into_iter()
            .map(|(source, target)| {
                let count = counts[&(source.clone(), target.clone())];
                VisEdge {
                    source,
                    target,
                    count,
                }
            })
            .collect();
        VisGraph {
            vis_nodes,
            edges,
            node_attr_map: self.extra_attrs.as_map().clone(),
        }
    }
}
