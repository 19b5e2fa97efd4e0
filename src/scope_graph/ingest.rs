use super::ScopeGraph;
use crate::bipartite::process_bipartite;
use crate::min_cut::{CutEdgeSet, MinCutPartitioner};
use crate::node::{
    AuxKind, AuxNode, CommOp, GraphNode, NodeId, SCOPE_SEPARATOR, scope_prefixes,
};
use crate::scope_trie::{ScopeTrie, Scoped};
use graph_insight_import::RawGraph;
use std::collections::{BTreeSet, HashMap};

/// Scope bookkeeping for one op node while islands are renamed and the trie
/// is compressed.
#[derive(Debug, Clone)]
struct ScopeEntry {
    id: NodeId,
    label: String,
    scope: String,
    parent: String,
}

impl Scoped for ScopeEntry {
    fn scope_mut(&mut self) -> &mut String {
        &mut self.scope
    }

    fn parent_mut(&mut self) -> &mut String {
        &mut self.parent
    }
}

/// Communication node that splits computation islands: a collective in the
/// active top scope, restricted to ones carrying an instance type when the
/// graph is large enough for filtering.
pub(crate) fn is_partition_comm(node: &GraphNode, active_top_scope: &str, instance_filter: bool) -> bool {
    node.node_type.is_comm()
        && node.scope.starts_with(active_top_scope)
        && (!instance_filter || node.has_instance_type())
}

/// `Computation_<n>/<seg>_<n>/...` for island `index` of `count`.
fn island_scope(scope: &str, index: usize, count: usize) -> String {
    let width = count.to_string().len();
    let mut renamed = format!("Computation_{index:0width$}");
    for segment in scope.split(SCOPE_SEPARATOR).filter(|s| !s.is_empty()) {
        renamed.push(SCOPE_SEPARATOR);
        renamed.push_str(&format!("{segment}_{index}"));
    }
    renamed
}

impl ScopeGraph {
    pub(super) fn ingest(&mut self, raw: &RawGraph) {
        for param in &raw.parameter_nodes {
            self.parameters
                .insert(param.node_id.clone(), AuxNode::from_raw(param, AuxKind::Parameter));
        }
        for constant in &raw.const_nodes {
            self.consts
                .insert(constant.node_id.clone(), AuxNode::from_raw(constant, AuxKind::Const));
        }

        let active = self.active_top_scope.clone();
        let comm_count = raw
            .op_nodes
            .iter()
            .filter(|node| CommOp::is_comm_type(&node.op_type) && node.scope.starts_with(&active))
            .count();
        self.instance_type_filter = raw.op_nodes.len()
            > self.config.instance_filter_node_threshold
            && comm_count > self.config.instance_filter_comm_threshold;
        let filter = self.instance_type_filter;

        let mut entries: Vec<ScopeEntry> = vec![];
        for raw_node in &raw.op_nodes {
            let node = GraphNode::from_raw(raw_node);
            let lifted = is_partition_comm(&node, &active, filter);
            let scope = if lifted { String::new() } else { raw_node.scope.clone() };
            let entry = ScopeEntry {
                id: node.id.clone(),
                label: node.label.clone(),
                parent: scope.clone(),
                scope,
            };
            if self.nodes.insert(node.id.clone(), node).is_some() {
                log::warn!("Duplicate op node id {}, keeping the last one", entry.id);
                entries.retain(|e| e.id != entry.id);
            }
            entries.push(entry);
        }

        let mut links = vec![];
        for node in self.nodes.values() {
            for input in &node.input {
                if self.nodes.contains_key(input) {
                    links.push((input.clone(), node.id.clone()));
                }
            }
        }
        links.sort_by(|a, b| {
            crate::node::compare_node_ids(&a.1, &b.1).then_with(|| a.0.cmp(&b.0))
        });
        for (source, target) in links {
            if let Some(node) = self.nodes.get_mut(&source) {
                node.output.push(target);
            }
        }

        let is_comm = |node: &GraphNode| is_partition_comm(node, &active, filter);
        let cut = if self.config.min_cut_enabled {
            MinCutPartitioner::new(&self.config).compute_min_cut(&self.nodes, is_comm)
        } else {
            CutEdgeSet::new()
        };
        let bipartite = process_bipartite(&self.nodes, cut, is_comm);
        log::debug!(
            "{} computation islands, {} cut edges",
            bipartite.components.len(),
            bipartite.cut_edges.len()
        );

        let position: HashMap<&str, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.as_str(), i))
            .collect();
        let mut renamed = vec![];
        for (index, component) in bipartite.components.iter().enumerate() {
            for id in component {
                if let Some(&at) = position.get(id.as_str()) {
                    renamed.push((at, island_scope(&entries[at].scope, index, bipartite.components.len())));
                }
            }
        }
        for (at, scope) in renamed {
            entries[at].parent = scope.clone();
            entries[at].scope = scope;
        }
        self.cut_edges = bipartite.cut_edges;

        let mut trie = ScopeTrie::new();
        for (index, entry) in entries.iter().enumerate() {
            trie.insert(index, &format!("{}{SCOPE_SEPARATOR}{}", entry.scope, entry.label));
        }
        let merges = trie.compress(&mut entries);
        log::debug!("Scope trie compressed with {merges} merges");

        self.prune_trivial_nodes();

        let mut name_scopes = BTreeSet::new();
        for entry in &entries {
            let Some(node) = self.nodes.get_mut(&entry.id) else {
                continue;
            };
            node.scope = entry.scope.clone();
            node.parent = entry.scope.clone();
            for prefix in scope_prefixes(&entry.scope) {
                if !name_scopes.contains(prefix) {
                    name_scopes.insert(prefix.to_string());
                }
            }
        }
        self.name_scope_ids = name_scopes.into_iter().collect();

        let shapes: HashMap<NodeId, serde_json::Value> = self
            .nodes
            .values()
            .filter_map(|node| Some((node.id.clone(), node.output_shape.clone()?)))
            .collect();
        for node in self.nodes.values_mut() {
            for input in &node.input {
                if let Some(shape) = shapes.get(input) {
                    node.input_shape.insert(input.clone(), shape.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_island_scope_padding() {
        assert_eq!(island_scope("Default/net", 3, 12), "Computation_03/Default_3/net_3");
        assert_eq!(island_scope("", 0, 1), "Computation_0");
        assert_eq!(island_scope("a", 7, 9), "Computation_7/a_7");
    }
}
