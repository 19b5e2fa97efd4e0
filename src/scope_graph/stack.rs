use super::ScopeGraph;
use crate::hash::SumHash;
use crate::node::{GraphNode, NodeId, SCOPE_SEPARATOR, dedup_ids, is_numeric_id};
use std::collections::HashMap;

/// Siblings sharing one structural hash.
#[derive(Debug)]
struct StackGroup {
    op_type: String,
    members: Vec<NodeId>,
}

impl ScopeGraph {
    fn resolve_type(&self, id: &str) -> Option<String> {
        if let Some(node) = self.nodes.get(id) {
            return Some(node.node_type.to_string());
        }
        self.parameters
            .get(id)
            .or_else(|| self.consts.get(id))
            .map(|aux| aux.kind.to_string())
    }

    fn stack_hash(&self, node: &GraphNode) -> u64 {
        let mut parts = vec![node.parent.clone(), node.node_type.to_string()];
        for (direction, ids) in [("input", &node.input), ("output", &node.output)] {
            for id in ids.iter().filter(|id| is_numeric_id(id)) {
                if let Some(node_type) = self.resolve_type(id) {
                    parts.push(format!("{direction}-{node_type}"));
                }
            }
            parts.push(format!("{direction}-{}", ids.len()));
        }
        parts.iter().map(String::as_str).collect::<SumHash>().value()
    }

    /// Refreshes display attributes under the scope (`None` for the root) and
    /// folds structurally equal operator children into aggregate scopes.
    /// Each scope is stacked at most once.
    pub(super) fn optimize_nodes(&mut self, id: Option<&str>) {
        let id = id.filter(|id| self.nodes.contains_key(*id));
        let children = self.children_of(id).to_vec();
        self.extra_attrs.collect_displayed(&self.nodes, &children);

        let stacked = match id {
            Some(id) => self.nodes[id].stacked,
            None => self.root.stacked,
        };
        if stacked || children.len() < self.config.stack_threshold {
            self.mark_stacked(id);
            return;
        }

        let mut groups: Vec<StackGroup> = vec![];
        let mut group_of_hash: HashMap<u64, usize> = HashMap::new();
        for child_id in &children {
            let Some(child) = self.nodes.get(child_id) else {
                continue;
            };
            if child.is_scope() || child.node_type.is_comm() {
                continue;
            }
            let hash = self.stack_hash(child);
            let at = *group_of_hash.entry(hash).or_insert_with(|| {
                groups.push(StackGroup {
                    op_type: child.node_type.to_string(),
                    members: vec![],
                });
                groups.len() - 1
            });
            groups[at].members.push(child_id.clone());
        }

        let mut remaining = children;
        let mut count = 1;
        for group in groups {
            let size = group.members.len();
            if size < self.config.stack_threshold {
                continue;
            }
            let name = match id {
                Some(id) => format!("{id}{SCOPE_SEPARATOR}{}[{size}]_{count}", group.op_type),
                None => format!("{}[{size}]_{count}", group.op_type),
            };
            count += 1;

            let mut aggregate = GraphNode::aggregate_scope(&name);
            for member in &group.members {
                if let Some(node) = self.nodes.get_mut(member) {
                    node.parent = name.clone();
                    aggregate.input.extend(node.input.iter().cloned());
                    aggregate.output.extend(node.output.iter().cloned());
                }
            }
            dedup_ids(&mut aggregate.input);
            dedup_ids(&mut aggregate.output);
            remaining.retain(|child| !group.members.contains(child));
            remaining.push(name.clone());
            aggregate.children = group.members;
            log::debug!("Stacked {size} {} nodes into {name}", aggregate.label);
            self.nodes.insert(name, aggregate);
        }

        match id.and_then(|id| self.nodes.get_mut(id)) {
            Some(scope) => scope.children = remaining,
            None => self.root.children = remaining,
        }
        self.mark_stacked(id);
    }

    fn mark_stacked(&mut self, id: Option<&str>) {
        match id.and_then(|id| self.nodes.get_mut(id)) {
            Some(scope) => scope.stacked = true,
            None => self.root.stacked = true,
        }
    }
}
