//! Display attributes attached to visible operator nodes.
use crate::node::{GraphNode, NodeId, NodeMap};
use graph_insight_import::ShardStrategy;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumIter)]
pub enum AttrKind {
    InstanceType,
    ShardStrategy,
}

/// One non-trivial row of a node's sharding strategy, paired with the op input it splits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyEntry {
    pub strategy: Vec<i64>,
    pub name: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtraAttr {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub strategy: Vec<StrategyEntry>,
}

impl ExtraAttr {
    /// Strategy rows rendered as `a,b,c`.
    pub fn strategy_labels(&self) -> Vec<String> {
        self.strategy
            .iter()
            .map(|entry| {
                entry
                    .strategy
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect()
    }

    fn merge(&mut self, other: ExtraAttr) {
        if other.instance_type.is_some() {
            self.instance_type = other.instance_type;
        }
        if !other.strategy.is_empty() {
            self.strategy = other.strategy;
        }
    }
}

pub type AttrBuilder = fn(&GraphNode, &NodeMap) -> ExtraAttr;

impl AttrKind {
    pub fn builder(self) -> AttrBuilder {
        match self {
            AttrKind::InstanceType => instance_type_attr,
            AttrKind::ShardStrategy => shard_strategy_attr,
        }
    }
}

fn instance_type_attr(node: &GraphNode, _nodes: &NodeMap) -> ExtraAttr {
    ExtraAttr {
        instance_type: node.instance_type.clone(),
        strategy: vec![],
    }
}

// Rows that split nothing, and rows for inputs that are not ops (params, consts), are skipped.
fn shard_strategy_attr(node: &GraphNode, nodes: &NodeMap) -> ExtraAttr {
    let strategy = node
        .parallel_shard
        .rows()
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let input = node.input.get(i)?;
            if ShardStrategy::is_trivial_row(row) || !nodes.contains_key(input) {
                return None;
            }
            Some(StrategyEntry {
                strategy: row.clone(),
                name: input.clone(),
            })
        })
        .collect();
    ExtraAttr {
        instance_type: None,
        strategy,
    }
}

/// Display attributes keyed by node id, rebuilt for whatever part of the
/// graph is currently visible.
#[derive(Debug, Clone, Default)]
pub struct ExtraAttrTable {
    attrs: HashMap<NodeId, ExtraAttr>,
}

impl ExtraAttrTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ExtraAttr> {
        self.attrs.get(id)
    }

    pub fn as_map(&self) -> &HashMap<NodeId, ExtraAttr> {
        &self.attrs
    }

    pub fn clear(&mut self) {
        self.attrs.clear();
    }

    pub fn apply(&mut self, kind: AttrKind, node: &GraphNode, nodes: &NodeMap) {
        let attr = kind.builder()(node, nodes);
        self.attrs.entry(node.id.clone()).or_default().merge(attr);
    }

    /// Walks the expanded part of the subtree under `children` and records
    /// instance types and shard strategies of the operators left visible.
    pub fn collect_displayed(&mut self, nodes: &NodeMap, children: &[NodeId]) {
        let mut strategy_nodes = vec![];
        let mut stack: Vec<&[NodeId]> = vec![children];
        while let Some(children) = stack.pop() {
            for child_id in children {
                let Some(child) = nodes.get(child_id) else {
                    continue;
                };
                if child.expanded {
                    stack.push(&child.children);
                } else if !child.is_scope() && child.has_strategy() {
                    strategy_nodes.push(child);
                }
                if child.has_instance_type() {
                    self.apply(AttrKind::InstanceType, child, nodes);
                }
            }
        }
        for node in strategy_nodes {
            self.apply(AttrKind::ShardStrategy, node, nodes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;
    use strum::IntoEnumIterator;

    fn op(id: &str, input: &[&str], shard: Vec<Vec<i64>>) -> GraphNode {
        let mut node = GraphNode::name_scope(id);
        node.node_type = NodeType::Operator("MatMul".to_string());
        node.input = input.iter().map(|s| s.to_string()).collect();
        node.parallel_shard = ShardStrategy(shard);
        node
    }

    #[test]
    fn test_every_kind_has_a_builder() {
        let nodes = NodeMap::new();
        let node = op("1", &[], vec![]);
        for kind in AttrKind::iter() {
            assert!(kind.builder()(&node, &nodes).strategy.is_empty());
        }
    }

    #[test]
    fn test_shard_rows_filtered() {
        let mut nodes = NodeMap::new();
        nodes.insert("1".into(), op("1", &[], vec![]));
        nodes.insert("2".into(), op("2", &[], vec![]));
        let node = op("3", &["1", "weight", "2"], vec![vec![2, 4], vec![8, 1], vec![1, 1]]);
        let attr = AttrKind::ShardStrategy.builder()(&node, &nodes);
        assert_eq!(
            attr.strategy,
            vec![StrategyEntry {
                strategy: vec![2, 4],
                name: "1".into()
            }]
        );
        assert_eq!(attr.strategy_labels(), vec!["2,4"]);
    }

    #[test]
    fn test_collect_skips_collapsed_scopes() {
        let mut nodes = NodeMap::new();
        let mut scope = GraphNode::name_scope("a");
        scope.children = vec!["2".into()];
        let mut visible = op("1", &["2"], vec![vec![2]]);
        visible.instance_type = Some("comm".into());
        let hidden = op("2", &[], vec![vec![4]]);
        nodes.insert("a".into(), scope);
        nodes.insert("1".into(), visible);
        nodes.insert("2".into(), hidden);

        let mut table = ExtraAttrTable::new();
        table.collect_displayed(&nodes, &["a".into(), "1".into()]);
        let attr = table.get("1").unwrap();
        assert_eq!(attr.instance_type.as_deref(), Some("comm"));
        assert_eq!(attr.strategy.len(), 1);
        assert!(table.get("2").is_none());

        nodes.get_mut("a").unwrap().expanded = true;
        table.collect_displayed(&nodes, &["a".into(), "1".into()]);
        assert!(table.get("2").is_some());
    }
}
