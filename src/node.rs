use graph_insight_import::{RawAuxNode, RawOpNode, ShardStrategy};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

pub type NodeId = String;
pub type NodeMap = HashMap<NodeId, GraphNode>;

pub const ROOT_ID: &str = "root";
pub const SCOPE_SEPARATOR: char = '/';
pub const SCOPE_AGGREGATOR: char = '+';
pub const EDGE_SEPARATOR: &str = "->";

/// Collective communication operators.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::EnumString,
    strum_macros::Display,
    strum_macros::IntoStaticStr,
)]
pub enum CommOp {
    AllReduce,
    AllGather,
    AllToAll,
    ReduceScatter,
}

impl CommOp {
    pub fn is_comm_type(op_type: &str) -> bool {
        op_type.parse::<CommOp>().is_ok()
    }
}

/// Bookkeeping operators removed from the display graph.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::EnumString, strum_macros::Display,
)]
pub enum TrivialOp {
    UpdateState,
    MakeTuple,
    TupleGetItem,
    Load,
    Depend,
}

impl TrivialOp {
    pub fn is_trivial_type(op_type: &str) -> bool {
        op_type.parse::<TrivialOp>().is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    Operator(String),
    NameScope,
    AggregateScope,
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Operator(op_type) => op_type,
            NodeType::NameScope => "name_scope",
            NodeType::AggregateScope => "aggregate_scope",
        }
    }

    pub fn is_scope(&self) -> bool {
        !matches!(self, NodeType::Operator(_))
    }

    pub fn op_type(&self) -> Option<&str> {
        match self {
            NodeType::Operator(op_type) => Some(op_type),
            _ => None,
        }
    }

    pub fn is_comm(&self) -> bool {
        self.op_type().is_some_and(CommOp::is_comm_type)
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A node of the hierarchical display graph: an operator, a name scope or an
/// aggregate of stacked siblings.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Empty for nodes hanging directly off the root.
    pub parent: NodeId,
    pub scope: String,
    pub children: Vec<NodeId>,
    pub input: Vec<NodeId>,
    pub output: Vec<NodeId>,
    pub expanded: bool,
    pub stacked: bool,
    pub special_nodes_cnt: BTreeMap<String, usize>,
    pub attribute: BTreeMap<String, Value>,
    pub output_shape: Option<Value>,
    pub input_shape: BTreeMap<NodeId, Value>,
    pub instance_type: Option<String>,
    pub parallel_shard: ShardStrategy,
    pub parameters: Vec<NodeId>,
    pub consts: Vec<NodeId>,
}

impl GraphNode {
    fn empty(id: NodeId, node_type: NodeType) -> Self {
        Self {
            id,
            name: String::new(),
            label: String::new(),
            node_type,
            parent: String::new(),
            scope: String::new(),
            children: vec![],
            input: vec![],
            output: vec![],
            expanded: false,
            stacked: false,
            special_nodes_cnt: BTreeMap::new(),
            attribute: BTreeMap::new(),
            output_shape: None,
            input_shape: BTreeMap::new(),
            instance_type: None,
            parallel_shard: ShardStrategy::default(),
            parameters: vec![],
            consts: vec![],
        }
    }

    pub fn from_raw(raw: &RawOpNode) -> Self {
        let mut node = Self::empty(raw.node_id.clone(), NodeType::Operator(raw.op_type.clone()));
        node.name = raw.name.clone();
        node.label = raw.short_name().to_string();
        node.parent = raw.scope.clone();
        node.scope = raw.scope.clone();
        node.input = raw.input.clone();
        node.attribute = raw.attr.clone();
        node.output_shape = raw.output_shape.clone();
        node.instance_type = raw.instance_type.clone();
        node.parallel_shard = raw.parallel_shard.clone();
        node
    }

    /// Name scope node for a (possibly compressed) scope path such as
    /// `Computation_0/Default_0+network_0`.
    pub fn name_scope(id: &str) -> Self {
        let mut node = Self::empty(id.to_string(), NodeType::NameScope);
        node.parent = parent_scope(id).to_string();
        node.scope = node.parent.clone();
        node.label = last_segment(id)
            .split(SCOPE_AGGREGATOR)
            .map(|part| if is_island_segment(part) { part } else { strip_copy_suffix(part) })
            .collect::<Vec<_>>()
            .join("/");
        node.name = id
            .split([SCOPE_SEPARATOR, SCOPE_AGGREGATOR])
            .skip(1)
            .map(strip_copy_suffix)
            .collect::<Vec<_>>()
            .join("/");
        node
    }

    pub fn aggregate_scope(id: &str) -> Self {
        let mut node = Self::empty(id.to_string(), NodeType::AggregateScope);
        node.parent = parent_scope(id).to_string();
        node.scope = node.parent.clone();
        node.label = last_segment(id).to_string();
        node.name = id.to_string();
        node.stacked = true;
        node
    }

    pub fn op_type(&self) -> Option<&str> {
        self.node_type.op_type()
    }

    pub fn is_scope(&self) -> bool {
        self.node_type.is_scope()
    }

    pub fn has_strategy(&self) -> bool {
        !self.parallel_shard.is_empty()
    }

    pub fn has_instance_type(&self) -> bool {
        self.instance_type.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuxKind {
    Parameter,
    Const,
}

/// Parameter or const input; lives beside the op graph and is attached to
/// the scope that consumes it.
#[derive(Debug, Clone, Serialize)]
pub struct AuxNode {
    pub id: NodeId,
    pub name: String,
    pub kind: AuxKind,
    pub parent: NodeId,
    pub attribute: BTreeMap<String, Value>,
    pub output_shape: Option<Value>,
    pub parallel_shard: ShardStrategy,
}

impl AuxNode {
    pub fn from_raw(raw: &RawAuxNode, kind: AuxKind) -> Self {
        Self {
            id: raw.node_id.clone(),
            name: raw.name.clone(),
            kind,
            parent: String::new(),
            attribute: raw.attr.clone(),
            output_shape: raw.output_shape.clone(),
            parallel_shard: raw.parallel_shard.clone(),
        }
    }
}

/// `Computation_<digits>`, the top segment of a computation island.
pub fn is_island_segment(segment: &str) -> bool {
    segment
        .strip_prefix("Computation_")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Drops the `_<n>` copy suffix added when a scope is split into computation
/// islands.
pub fn strip_copy_suffix(segment: &str) -> &str {
    match segment.rfind('_') {
        Some(idx) => &segment[..idx],
        None => segment,
    }
}

pub fn parent_scope(id: &str) -> &str {
    match id.rfind(SCOPE_SEPARATOR) {
        Some(idx) => &id[..idx],
        None => "",
    }
}

pub fn last_segment(path: &str) -> &str {
    path.rsplit(SCOPE_SEPARATOR).next().unwrap_or(path)
}

/// `scope` is `parent` or lies below it; `a/bc` is not inside `a/b`.
pub fn is_within_scope(scope: &str, parent: &str) -> bool {
    match scope.strip_prefix(parent) {
        Some(rest) => rest.is_empty() || rest.starts_with(SCOPE_SEPARATOR),
        None => false,
    }
}

/// Every ancestor path of a scope including itself: `a/b/c` yields `a`, `a/b`, `a/b/c`.
pub fn scope_prefixes(scope: &str) -> impl Iterator<Item = &str> {
    scope
        .match_indices(SCOPE_SEPARATOR)
        .map(move |(idx, _)| &scope[..idx])
        .chain((!scope.is_empty()).then_some(scope))
        .filter(|prefix| !prefix.is_empty())
}

/// Op node ids are decimal integers; anything else (parameter names, scope
/// paths) is not an op reference.
pub fn numeric_id(id: &str) -> Option<u64> {
    id.parse::<u64>().ok()
}

pub fn is_numeric_id(id: &str) -> bool {
    numeric_id(id).is_some()
}

/// Numeric ids ascending, then everything else lexically.
pub fn compare_node_ids(a: &str, b: &str) -> Ordering {
    match (numeric_id(a), numeric_id(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

pub fn sorted_ids<'a, V>(map: &'a HashMap<NodeId, V>) -> Vec<&'a NodeId> {
    let mut ids: Vec<&NodeId> = map.keys().collect();
    ids.sort_by(|a, b| compare_node_ids(a, b));
    ids
}

pub fn edge_key(source: &str, target: &str) -> String {
    format!("{source}{EDGE_SEPARATOR}{target}")
}

/// Removes duplicates keeping the first occurrence.
pub fn dedup_ids(ids: &mut Vec<NodeId>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_and_trivial_types() {
        assert!(CommOp::is_comm_type("AllReduce"));
        assert!(CommOp::is_comm_type("ReduceScatter"));
        assert!(!CommOp::is_comm_type("Send"));
        assert!(TrivialOp::is_trivial_type("TupleGetItem"));
        assert!(!TrivialOp::is_trivial_type("Conv2D"));
        assert_eq!(CommOp::AllToAll.to_string(), "AllToAll");
    }

    #[test]
    fn test_name_scope_labels() {
        let node = GraphNode::name_scope("Computation_01/Default_1+network_1/conv1_1");
        assert_eq!(node.parent, "Computation_01/Default_1+network_1");
        assert_eq!(node.label, "conv1");
        assert_eq!(node.name, "Default/network/conv1");

        let node = GraphNode::name_scope("Computation_01/Default_1+network_1");
        assert_eq!(node.label, "Default/network");

        let node = GraphNode::name_scope("Computation_3");
        assert_eq!(node.parent, "");
        assert_eq!(node.label, "Computation_3");
        assert_eq!(node.name, "");
    }

    #[test]
    fn test_name_scope_strips_segments_starting_with_c() {
        let node = GraphNode::name_scope("Computation_0+Default_0/Conv2d_0");
        assert_eq!(node.label, "Conv2d");
        assert_eq!(node.name, "Default/Conv2d");

        let node = GraphNode::name_scope("Computation_2+Cell_2");
        assert_eq!(node.label, "Computation_2/Cell");
        assert_eq!(node.name, "Cell");
        assert!(is_island_segment("Computation_12"));
        assert!(!is_island_segment("Computation_x"));
        assert!(!is_island_segment("Cell_0"));
    }

    #[test]
    fn test_scope_prefixes() {
        let prefixes: Vec<&str> = scope_prefixes("a/b/c").collect();
        assert_eq!(prefixes, vec!["a", "a/b", "a/b/c"]);
        assert_eq!(scope_prefixes("").count(), 0);
        assert_eq!(scope_prefixes("a").collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_scope_containment_respects_segments() {
        assert!(is_within_scope("a/b", "a/b"));
        assert!(is_within_scope("a/b/c", "a/b"));
        assert!(!is_within_scope("a/bc", "a/b"));
        assert!(!is_within_scope("a", "a/b"));
    }

    #[test]
    fn test_id_ordering() {
        let mut ids = vec!["10", "x", "2", "1"];
        ids.sort_by(|a, b| compare_node_ids(a, b));
        assert_eq!(ids, vec!["1", "2", "10", "x"]);
        assert!(!is_numeric_id("conv.weight"));
    }
}
