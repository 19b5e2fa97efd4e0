use super::ScopeGraph;
use crate::node::{NodeId, NodeMap, TrivialOp, is_numeric_id, sorted_ids};

fn replace_first(list: &mut Vec<NodeId>, old: &str, new: &[NodeId]) {
    if let Some(at) = list.iter().position(|id| id == old) {
        list.splice(at..at + 1, new.iter().cloned());
    }
}

fn remove_first(list: &mut Vec<NodeId>, old: &str) {
    replace_first(list, old, &[]);
}

/// Splices one bookkeeping node out of the graph, reconnecting its
/// neighbours. Returns false when the node has to stay.
fn prune_node(nodes: &mut NodeMap, id: &str) -> bool {
    let Some(node) = nodes.get(id) else {
        return false;
    };
    let valid = |other: &NodeId| other != id && is_numeric_id(other) && nodes.contains_key(other);
    let inputs: Vec<NodeId> = node.input.iter().filter(|i| valid(i)).cloned().collect();
    let outputs: Vec<NodeId> = node.output.iter().filter(|o| valid(o)).cloned().collect();
    if inputs
        .iter()
        .chain(outputs.iter())
        .any(|neighbour| nodes[neighbour].has_strategy())
    {
        return false;
    }

    if inputs.is_empty() {
        for output in &outputs {
            if let Some(next) = nodes.get_mut(output) {
                remove_first(&mut next.input, id);
            }
        }
    } else if outputs.is_empty() {
        for input in &inputs {
            if let Some(prev) = nodes.get_mut(input) {
                remove_first(&mut prev.output, id);
            }
        }
    } else if outputs.len() == 1 {
        let next_id = &outputs[0];
        for input in &inputs {
            if let Some(prev) = nodes.get_mut(input) {
                replace_first(&mut prev.output, id, std::slice::from_ref(next_id));
            }
        }
        if let Some(next) = nodes.get_mut(next_id) {
            remove_first(&mut next.input, id);
            next.input.extend(inputs);
        }
    } else if inputs.len() == 1 {
        let prev_id = &inputs[0];
        for output in &outputs {
            if let Some(next) = nodes.get_mut(output) {
                replace_first(&mut next.input, id, std::slice::from_ref(prev_id));
            }
        }
        if let Some(prev) = nodes.get_mut(prev_id) {
            remove_first(&mut prev.output, id);
            prev.output.extend(outputs);
        }
    } else {
        return false;
    }
    nodes.remove(id);
    true
}

impl ScopeGraph {
    /// Removes UpdateState, MakeTuple, TupleGetItem, Load and Depend nodes
    /// that have at most one input or output, unless a neighbour carries a
    /// sharding strategy.
    pub(super) fn prune_trivial_nodes(&mut self) -> usize {
        let candidates: Vec<NodeId> = sorted_ids(&self.nodes)
            .into_iter()
            .filter(|id| {
                self.nodes[*id]
                    .op_type()
                    .is_some_and(TrivialOp::is_trivial_type)
            })
            .cloned()
            .collect();
        let pruned = candidates
            .iter()
            .filter(|id| prune_node(&mut self.nodes, id))
            .count();
        log::debug!("Pruned {pruned} of {} trivial nodes", candidates.len());
        pruned
    }
}
