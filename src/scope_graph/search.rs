use super::{ScopeGraph, VisGraph};
use crate::node::{AuxNode, GraphNode, NodeId, NodeType, sorted_ids};
use serde::Serialize;
use std::collections::BTreeMap;

/// One entry of the search result tree. Matched operators carry no children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchNode {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub parent: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NodeId>>,
}

impl SearchNode {
    fn new(node: &GraphNode, with_children: bool) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            node_type: node.node_type.to_string(),
            parent: node.parent.clone(),
            children: with_children.then(Vec::new),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum SingleNode<'a> {
    Op(&'a GraphNode),
    Aux(&'a AuxNode),
}

impl ScopeGraph {
    /// Nodes whose id or name contains `text`, plus every ancestor scope,
    /// linked into a tree. `None` for an empty query.
    pub fn search_node(&self, text: &str) -> Option<BTreeMap<NodeId, SearchNode>> {
        if text.is_empty() {
            return None;
        }
        let mut found: BTreeMap<NodeId, SearchNode> = BTreeMap::new();
        for id in sorted_ids(&self.nodes) {
            let node = &self.nodes[id];
            if !node.id.contains(text) && !node.name.contains(text) {
                continue;
            }
            let (mut current, mut scope_id) = if node.is_scope() {
                (node.id.clone(), node.id.clone())
            } else {
                found.insert(node.id.clone(), SearchNode::new(node, false));
                (node.id.clone(), node.parent.clone())
            };

            while !scope_id.is_empty() {
                if let Some(existing) = found.get_mut(&scope_id) {
                    if current != scope_id {
                        existing.children.get_or_insert_with(Vec::new).push(current);
                    }
                    break;
                }
                let Some(scope) = self.nodes.get(&scope_id) else {
                    break;
                };
                let mut entry = SearchNode::new(scope, true);
                if current != scope_id {
                    entry.children.get_or_insert_with(Vec::new).push(current);
                }
                found.insert(scope_id.clone(), entry);
                current = scope_id;
                scope_id = scope.parent.clone();
            }
        }
        log::debug!("Search for {text:?} touched {} nodes", found.len());
        Some(found)
    }

    /// Expands and stacks every ancestor of `id` so that it becomes visible.
    /// Aggregate scopes are passed through without being expanded.
    pub fn query_single_node(&mut self, id: &str) -> Option<VisGraph> {
        let mut current = self.nodes.get(id)?.parent.clone();
        while let Some(parent) = self.nodes.get_mut(&current) {
            let parent_id = parent.id.clone();
            let next = parent.parent.clone();
            if parent.node_type != NodeType::AggregateScope {
                parent.expanded = true;
                if !parent.stacked {
                    self.optimize_nodes(Some(&parent_id));
                }
            }
            current = next;
        }
        Some(self.produce_vis_graph())
    }

    pub fn get_single_node(&self, id: &str) -> Option<SingleNode<'_>> {
        if let Some(node) = self.nodes.get(id) {
            return Some(SingleNode::Op(node));
        }
        self.consts
            .get(id)
            .or_else(|| self.parameters.get(id))
            .map(SingleNode::Aux)
    }
}
