//! Raw graph data as exported by a training job, before any processing.
//!
//! Everything here is lenient: missing arrays become empty, ids may be
//! numbers or strings, and an unparsable sharding strategy reads as "no
//! strategy". Only text that is not JSON at all is rejected.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

mod shard;

pub use shard::ShardStrategy;

pub type RawNodeId = String;
pub type RankId = String;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Reader(#[from] std::io::Error),
}

/// Operator node of the raw graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOpNode {
    #[serde(deserialize_with = "deserialize_id")]
    pub node_id: RawNodeId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub op_type: String,
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub scope: String,
    #[serde(default, deserialize_with = "deserialize_attr")]
    pub attr: BTreeMap<String, Value>,
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub input: Vec<RawNodeId>,
    #[serde(default)]
    pub output_shape: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub parallel_shard: ShardStrategy,
}

impl RawOpNode {
    pub fn attr_string(&self, key: &str) -> Option<String> {
        self.attr.get(key).and_then(value_to_string)
    }

    /// Trailing segment of the node name, the part after the last `/`.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Parameter or const node. These never take part in partitioning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAuxNode {
    #[serde(deserialize_with = "deserialize_id")]
    pub node_id: RawNodeId,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_attr")]
    pub attr: BTreeMap<String, Value>,
    #[serde(default)]
    pub output_shape: Option<Value>,
    #[serde(default)]
    pub parallel_shard: ShardStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGraph {
    #[serde(default, deserialize_with = "deserialize_lenient_vec")]
    pub op_nodes: Vec<RawOpNode>,
    #[serde(default, deserialize_with = "deserialize_lenient_vec")]
    pub parameter_nodes: Vec<RawAuxNode>,
    #[serde(default, deserialize_with = "deserialize_lenient_vec")]
    pub const_nodes: Vec<RawAuxNode>,
}

impl RawGraph {
    pub fn is_empty(&self) -> bool {
        self.op_nodes.is_empty() && self.parameter_nodes.is_empty() && self.const_nodes.is_empty()
    }
}

/// Per-rank graphs of a distributed job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankedGraphs {
    ranks: BTreeMap<RankId, RawGraph>,
}

impl RankedGraphs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rank: impl Into<RankId>, graph: RawGraph) {
        self.ranks.insert(rank.into(), graph);
    }

    pub fn get(&self, rank: &str) -> Option<&RawGraph> {
        self.ranks.get(rank)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Ranks in numeric order; non-numeric rank ids sort after numeric ones.
    pub fn iter(&self) -> impl Iterator<Item = (&RankId, &RawGraph)> {
        let mut ranks: Vec<_> = self.ranks.iter().collect();
        ranks.sort_by(|a, b| compare_rank_ids(a.0, b.0));
        ranks.into_iter()
    }
}

impl FromIterator<(RankId, RawGraph)> for RankedGraphs {
    fn from_iter<T: IntoIterator<Item = (RankId, RawGraph)>>(iter: T) -> Self {
        Self {
            ranks: iter.into_iter().collect(),
        }
    }
}

pub fn compare_rank_ids(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

pub fn load_graph_from_str(text: &str) -> Result<RawGraph, ImportError> {
    Ok(serde_json::from_str(text)?)
}

pub fn load_graph_from_reader<R: Read>(reader: R) -> Result<RawGraph, ImportError> {
    Ok(serde_json::from_reader(reader)?)
}

pub fn load_graph_from_path(path: impl AsRef<Path>) -> Result<RawGraph, ImportError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_graph_from_reader(std::io::BufReader::new(file))
}

pub fn load_ranked_graphs_from_str(text: &str) -> Result<RankedGraphs, ImportError> {
    Ok(serde_json::from_str(text)?)
}

/// Renders scalar attribute values as plain text, strings without quotes.
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn id_from_value(value: &Value) -> Option<RawNodeId> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RawNodeId, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(id_from_value(&value).unwrap_or_default())
}

fn deserialize_id_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<RawNodeId>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items.iter().filter_map(id_from_value).collect(),
        _ => vec![],
    })
}

fn deserialize_lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_string(&value).unwrap_or_default())
}

fn deserialize_optional_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_string(&value))
}

fn deserialize_attr<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, Value>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    })
}

// Entries that do not deserialize are dropped rather than failing the whole graph.
fn deserialize_lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => vec![],
    })
}
