use super::{HAS_STRATEGY_KEY, ScopeGraph};
use crate::node::{
    GraphNode, NodeId, ROOT_ID, dedup_ids, is_numeric_id, is_within_scope, scope_prefixes,
    sorted_ids,
};
use std::collections::{BTreeMap, HashSet};

fn count_node(counts: &mut BTreeMap<String, usize>, node: &GraphNode) {
    if node.has_strategy() {
        *counts.entry(HAS_STRATEGY_KEY.to_string()).or_default() += 1;
    }
    if let Some(instance_type) = &node.instance_type {
        *counts.entry(instance_type.clone()).or_default() += 1;
    }
}

impl ScopeGraph {
    /// Creates one name scope node per scope path and links it under its parent.
    pub(super) fn process_name_scopes(&mut self) {
        for id in &self.name_scope_ids {
            let scope = GraphNode::name_scope(id);
            match self.nodes.get_mut(&scope.parent) {
                Some(parent) if !scope.parent.is_empty() => parent.children.push(id.clone()),
                _ => self.root.children.push(id.clone()),
            }
            self.nodes.insert(id.clone(), scope);
        }
    }

    /// Counts strategy-carrying nodes and instance types per scope, and once
    /// per data set for the whole graph.
    pub(super) fn count_special_nodes(&mut self) {
        if self.first_cnt_flag {
            self.special_nodes_map.clear();
            for node in self.nodes.values().filter(|node| is_numeric_id(&node.id)) {
                count_node(&mut self.special_nodes_map, node);
            }
            self.first_cnt_flag = false;
        }

        let counted: Vec<NodeId> = sorted_ids(&self.nodes)
            .into_iter()
            .filter(|id| is_numeric_id(id) && !self.nodes[*id].parent.is_empty())
            .cloned()
            .collect();
        for id in counted {
            let node = self.nodes[&id].clone();
            for prefix in scope_prefixes(&node.scope) {
                if let Some(scope) = self.nodes.get_mut(prefix) {
                    count_node(&mut scope.special_nodes_cnt, &node);
                }
            }
        }
    }

    /// Hangs operators under their scopes, attaches parameter and const
    /// inputs, and lifts cross-scope edges onto the scopes' own input and
    /// output lists, innermost scopes first.
    pub(super) fn process_hierarchy(&mut self) {
        let op_ids: Vec<NodeId> = sorted_ids(&self.nodes)
            .into_iter()
            .filter(|id| !self.nodes[*id].is_scope())
            .cloned()
            .collect();
        let mut used_parameters = HashSet::new();
        let mut used_consts = HashSet::new();

        for id in &op_ids {
            let node = &self.nodes[id];
            let parent = node.parent.clone();
            let scope = node.scope.clone();
            let mut scope_inputs = vec![];
            let mut scope_outputs = vec![];
            let mut parameters = vec![];
            let mut consts = vec![];
            let aux_parent = if parent.is_empty() { ROOT_ID } else { parent.as_str() };

            for input in &node.input {
                if let Some(source) = self.nodes.get(input) {
                    if !parent.is_empty() && !is_within_scope(&source.scope, &parent) {
                        scope_inputs.push(input.clone());
                    }
                    if !source.parent.is_empty() && !is_within_scope(&scope, &source.parent) {
                        scope_outputs.push(source.parent.clone());
                    }
                } else if let Some(param) = self.parameters.get_mut(input) {
                    param.parent = aux_parent.to_string();
                    used_parameters.insert(input.clone());
                    parameters.push(input.clone());
                } else if let Some(constant) = self.consts.get_mut(input) {
                    constant.parent = aux_parent.to_string();
                    used_consts.insert(input.clone());
                    consts.push(input.clone());
                }
            }

            match self.nodes.get_mut(&parent) {
                Some(scope_node) if !parent.is_empty() => {
                    scope_node.children.push(id.clone());
                    scope_node.input.extend(scope_inputs);
                }
                _ => self.root.children.push(id.clone()),
            }
            for source_parent in scope_outputs {
                if let Some(scope_node) = self.nodes.get_mut(&source_parent) {
                    scope_node.output.push(id.clone());
                }
            }
            if let Some(node) = self.nodes.get_mut(id) {
                node.parameters.extend(parameters);
                dedup_ids(&mut node.parameters);
                node.consts.extend(consts);
                dedup_ids(&mut node.consts);
            }
        }
        self.parameters.retain(|id, _| used_parameters.contains(id));
        self.consts.retain(|id, _| used_consts.contains(id));

        for id in self.name_scope_ids.iter().rev() {
            let Some(scope) = self.nodes.get_mut(id) else {
                continue;
            };
            dedup_ids(&mut scope.children);
            dedup_ids(&mut scope.input);
            dedup_ids(&mut scope.output);
            if scope.parent.is_empty() {
                continue;
            }
            let parent_id = scope.parent.clone();
            let (input, output) = (scope.input.clone(), scope.output.clone());
            let external = |other: &NodeId| {
                self.nodes
                    .get(other)
                    .is_none_or(|node| !is_within_scope(&node.scope, &parent_id))
            };
            let input: Vec<NodeId> = input.into_iter().filter(|i| external(i)).collect();
            let output: Vec<NodeId> = output.into_iter().filter(|o| external(o)).collect();
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.input.extend(input);
                parent.output.extend(output);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use graph_insight_import::load_graph_from_str;

    const GRAPH: &str = r#"{
        "op_nodes": [
            {"node_id": "1", "name": "Default/a/Conv2D-op1", "type": "Conv2D", "scope": "Default/a",
             "input": ["conv.weight"], "parallel_shard": "[[1, 2]]", "instance_type": "compute"},
            {"node_id": "2", "name": "Default/a/ReLU-op2", "type": "ReLU", "scope": "Default/a", "input": ["1"]},
            {"node_id": "3", "name": "Default/b/MatMul-op3", "type": "MatMul", "scope": "Default/b",
             "input": ["2", "fc.weight"], "instance_type": "compute"}
        ],
        "parameter_nodes": [
            {"node_id": "conv.weight", "name": "conv.weight"},
            {"node_id": "unused", "name": "unused"}
        ],
        "const_nodes": [{"node_id": "fc.weight", "name": "fc.weight"}]
    }"#;

    fn built() -> ScopeGraph {
        let raw = load_graph_from_str(GRAPH).unwrap();
        let mut graph = ScopeGraph::new(GraphConfig::default().with_min_cut(false));
        graph.build_graph(&raw);
        graph
    }

    #[test]
    fn test_scopes_link_parents_and_children() {
        let graph = built();
        // The single-child chain Computation_0/Default_0 is compressed.
        assert_eq!(
            graph.name_scope_ids(),
            &[
                "Computation_0+Default_0",
                "Computation_0+Default_0/a_0",
                "Computation_0+Default_0/b_0"
            ]
        );
        assert_eq!(graph.root().children, vec!["Computation_0+Default_0"]);
        assert_eq!(graph.node("Computation_0+Default_0").unwrap().label, "Computation_0/Default");
        let a = graph.node("Computation_0+Default_0/a_0").unwrap();
        assert_eq!(a.children, vec!["1", "2"]);
        assert_eq!(a.output, vec!["3"]);
        let b = graph.node("Computation_0+Default_0/b_0").unwrap();
        assert_eq!(b.input, vec!["2"]);
        let default = graph.node("Computation_0+Default_0").unwrap();
        assert!(default.input.is_empty());
        assert!(default.output.is_empty());
    }

    #[test]
    fn test_special_counts_reach_every_ancestor() {
        let graph = built();
        let top = graph.node("Computation_0+Default_0").unwrap();
        assert_eq!(top.special_nodes_cnt.get(HAS_STRATEGY_KEY), Some(&1));
        assert_eq!(top.special_nodes_cnt.get("compute"), Some(&2));
        assert_eq!(graph.special_nodes_map().get("compute"), Some(&2));
    }

    #[test]
    fn test_unused_aux_nodes_dropped() {
        let graph = built();
        assert!(graph.parameters().contains_key("conv.weight"));
        assert!(!graph.parameters().contains_key("unused"));
        assert_eq!(graph.parameters()["conv.weight"].parent, "Computation_0+Default_0/a_0");
        assert_eq!(graph.node("1").unwrap().parameters, vec!["conv.weight"]);
        assert_eq!(graph.node("3").unwrap().consts, vec!["fc.weight"]);
    }
}
