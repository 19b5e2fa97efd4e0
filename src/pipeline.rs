//! Cross-rank views of a pipeline-parallel job, built from its Send/Receive pairs.
use crate::graph::GraphView;
use crate::node::{NodeId, numeric_id};
use graph_insight_import::{RankId, RankedGraphs, RawOpNode};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::str::FromStr;

pub type BlockId = String;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Pipeline build failed: {0}")]
    BuildFailed(String),
    #[error("No pipeline data")]
    NoPipelineData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display)]
enum TransferOp {
    Send,
    Receive,
}

/// A Send or Receive op with the stage key and tag that pair it up.
struct Transfer<'a> {
    kind: TransferOp,
    node: &'a RawOpNode,
    stage_key: String,
    tag: String,
}

impl<'a> Transfer<'a> {
    fn parse(rank: &str, node: &'a RawOpNode) -> Option<Self> {
        let kind = TransferOp::from_str(&node.op_type).ok()?;
        let stage_key = match kind {
            TransferOp::Send => format!("{rank}-{}", node.attr_string("dest_rank")?),
            TransferOp::Receive => format!("{}-{rank}", node.attr_string("src_rank")?),
        };
        Some(Self {
            kind,
            node,
            stage_key,
            tag: node.attr_string("sr_tag").unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferPair {
    pub send: Option<NodeId>,
    pub receive: Option<NodeId>,
}

/// `sender-receiver` stage key to the pairs of that stage, keyed by `sr_tag`.
pub type StagePairs = BTreeMap<String, BTreeMap<String, TransferPair>>;

fn collect_pairs(ranked: &RankedGraphs) -> StagePairs {
    let mut pairs = StagePairs::new();
    for (rank, graph) in ranked.iter() {
        for transfer in graph.op_nodes.iter().filter_map(|node| Transfer::parse(rank, node)) {
            let pair = pairs
                .entry(transfer.stage_key)
                .or_default()
                .entry(transfer.tag)
                .or_default();
            let slot = match transfer.kind {
                TransferOp::Send => &mut pair.send,
                TransferOp::Receive => &mut pair.receive,
            };
            *slot = Some(transfer.node.node_id.clone());
        }
    }
    pairs
}

/// Position of an op in the stage panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub lane: usize,
    pub column: usize,
    pub row: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
    pub stage_pairs: StagePairs,
    /// Lane 0 holds forward transfers, lane 1 backward ones; each lane is a
    /// list of columns of op ids.
    pub node_info: [Vec<Vec<NodeId>>; 2],
    pub edge_info: Vec<(Slot, Slot)>,
}

impl StageInfo {
    fn place(&mut self, lane: usize, column: usize, id: NodeId) -> Slot {
        let columns = &mut self.node_info[lane];
        if columns.len() <= column {
            columns.resize_with(column + 1, Vec::new);
        }
        columns[column].push(id);
        Slot {
            lane,
            column,
            row: columns[column].len() - 1,
        }
    }
}

/// Lane and the two panel columns of the stage `start -> end`.
fn stage_columns(start: usize, end: usize) -> Option<(usize, usize, usize)> {
    if start < end {
        Some((0, start * 2, (end * 2).checked_sub(1)?))
    } else {
        Some((1, (start * 2).checked_sub(1)?, end * 2))
    }
}

/// Lays every Send/Receive pair out on the two-lane stage panel.
pub fn build_pipelined_stage_info(ranked: &RankedGraphs) -> Result<StageInfo, PipelineError> {
    let mut info = StageInfo {
        stage_pairs: collect_pairs(ranked),
        ..Default::default()
    };
    let stages: Vec<(String, Vec<TransferPair>)> = info
        .stage_pairs
        .iter()
        .map(|(key, pairs)| (key.clone(), pairs.values().cloned().collect()))
        .collect();
    for (key, pairs) in stages {
        let (lane, start_column, end_column) = key
            .split_once('-')
            .and_then(|(start, end)| Some((start.parse::<usize>().ok()?, end.parse::<usize>().ok()?)))
            .and_then(|(start, end)| stage_columns(start, end))
            .ok_or_else(|| PipelineError::BuildFailed(format!("bad stage {key}")))?;
        for pair in pairs {
            let (Some(send), Some(receive)) = (pair.send, pair.receive) else {
                return Err(PipelineError::BuildFailed(format!("unpaired transfer in stage {key}")));
            };
            let from = info.place(lane, start_column, send);
            let to = info.place(lane, end_column, receive);
            info.edge_info.push((from, to));
        }
    }
    if info.edge_info.is_empty() {
        return Err(PipelineError::NoPipelineData);
    }
    Ok(info)
}

/// Blocks of every rank and the DAG between them.
#[derive(Debug, Clone, Default)]
pub struct PipelineBlockInfo {
    pub node_blocks: Vec<Vec<BlockId>>,
    pub node_order: Vec<BlockId>,
    blocks: Vec<BlockId>,
    successors: HashMap<BlockId, Vec<BlockId>>,
    predecessors: HashMap<BlockId, Vec<BlockId>>,
    depend_nodes: HashMap<BlockId, Vec<BlockId>>,
    depend_sets: HashMap<BlockId, HashSet<BlockId>>,
}

impl GraphView for PipelineBlockInfo {
    fn node_ids(&self) -> Vec<&NodeId> {
        self.blocks.iter().collect()
    }

    fn contains(&self, id: &str) -> bool {
        self.successors.contains_key(id)
    }

    fn inputs(&self, id: &str) -> &[NodeId] {
        self.predecessors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn outputs(&self, id: &str) -> &[NodeId] {
        self.successors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl PipelineBlockInfo {
    fn add_block(&mut self, block: &str) {
        if !self.successors.contains_key(block) {
            self.blocks.push(block.to_string());
            self.successors.insert(block.to_string(), vec![]);
            self.predecessors.insert(block.to_string(), vec![]);
        }
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.add_block(from);
        self.add_block(to);
        if let Some(next) = self.successors.get_mut(from) {
            next.push(to.to_string());
        }
        if let Some(previous) = self.predecessors.get_mut(to) {
            previous.push(from.to_string());
        }
    }

    /// Blocks in insertion order, each with its successors.
    pub fn pipeline_graph(&self) -> impl Iterator<Item = (&BlockId, &[BlockId])> {
        self.blocks.iter().map(|block| (block, self.outputs(block)))
    }

    /// Every block `block` transitively waits on, in discovery order.
    pub fn depend_nodes(&self, block: &str) -> &[BlockId] {
        self.depend_nodes.get(block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `block` transitively waits on `other`.
    pub fn depends_on(&self, block: &str, other: &str) -> bool {
        self.depend_sets
            .get(block)
            .is_some_and(|set| set.contains(other))
    }

    fn topological_order(&self) -> Vec<BlockId> {
        let mut indegrees: HashMap<&str, usize> = self
            .blocks
            .iter()
            .map(|block| (block.as_str(), self.inputs(block).len()))
            .collect();
        let mut queue: VecDeque<&str> = self
            .blocks
            .iter()
            .filter(|block| indegrees[block.as_str()] == 0)
            .map(String::as_str)
            .collect();
        let mut order = vec![];
        while let Some(block) = queue.pop_front() {
            order.push(block.to_string());
            for next in self.outputs(block) {
                if let Some(degree) = indegrees.get_mut(next.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next.as_str());
                    }
                }
            }
        }
        if order.len() < self.blocks.len() {
            log::warn!(
                "Pipeline block graph has a cycle, ordered {} of {} blocks",
                order.len(),
                self.blocks.len()
            );
        }
        order
    }

    /// Pre-order depth-first walk over predecessors.
    fn collect_depends(&self, block: &str) -> Vec<BlockId> {
        let mut visited: HashSet<&str> = HashSet::from([block]);
        let mut found = vec![];
        let mut stack: Vec<&str> = self.inputs(block).iter().rev().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            found.push(current.to_string());
            stack.extend(self.inputs(current).iter().rev().map(String::as_str));
        }
        found
    }
}

/// Cuts each rank's op sequence into blocks ending at every Send/Receive,
/// links consecutive blocks and each Send block to its Receive block, and
/// orders the result.
pub fn build_pipeline_blocks(ranked: &RankedGraphs) -> PipelineBlockInfo {
    let mut info = PipelineBlockInfo::default();
    let mut block_of: HashMap<(RankId, NodeId), BlockId> = HashMap::new();
    for (rank, graph) in ranked.iter() {
        let Some(last) = graph.op_nodes.last() else {
            continue;
        };
        let mut blocks = vec![];
        let mut start = 1;
        for node in &graph.op_nodes {
            if TransferOp::from_str(&node.op_type).is_err() {
                continue;
            }
            let block = format!("{rank}-{start}-{}", node.node_id);
            block_of.insert((rank.clone(), node.node_id.clone()), block.clone());
            blocks.push(block);
            if let Some(id) = numeric_id(&node.node_id) {
                start = id + 1;
            }
        }
        if numeric_id(&last.node_id).is_none_or(|last_id| start <= last_id) {
            let block = format!("{rank}-{start}-{}", last.node_id);
            block_of.insert((rank.clone(), last.node_id.clone()), block.clone());
            blocks.push(block);
        }
        info.node_blocks.push(blocks);
    }

    let node_blocks = info.node_blocks.clone();
    for blocks in &node_blocks {
        for block in blocks {
            info.add_block(block);
        }
        for window in blocks.windows(2) {
            info.add_edge(&window[0], &window[1]);
        }
    }

    for (key, pairs) in collect_pairs(ranked) {
        let Some((send_rank, receive_rank)) = key.split_once('-') else {
            continue;
        };
        for (tag, pair) in pairs {
            let (Some(send), Some(receive)) = (pair.send, pair.receive) else {
                log::warn!("Transfer {tag} of stage {key} has no partner");
                continue;
            };
            let from = block_of.get(&(send_rank.to_string(), send));
            let to = block_of.get(&(receive_rank.to_string(), receive));
            if let (Some(from), Some(to)) = (from, to) {
                let (from, to) = (from.clone(), to.clone());
                info.add_edge(&from, &to);
            }
        }
    }

    info.node_order = info.topological_order();
    let depend_nodes: HashMap<BlockId, Vec<BlockId>> = info
        .blocks
        .iter()
        .map(|block| (block.clone(), info.collect_depends(block)))
        .collect();
    info.depend_sets = depend_nodes
        .iter()
        .map(|(block, depends)| (block.clone(), depends.iter().cloned().collect()))
        .collect();
    info.depend_nodes = depend_nodes;
    log::debug!(
        "Pipeline: {} blocks over {} ranks",
        info.blocks.len(),
        info.node_blocks.len()
    );
    info
}

/// The part of a Send/Receive op's name after its last `op`, such as the
/// tag in `Default/Send-op12`.
pub fn real_node_name<'a>(ranked: &'a RankedGraphs, node_id: &str, rank: &str) -> Option<&'a str> {
    let node = ranked
        .get(rank)?
        .op_nodes
        .iter()
        .find(|node| node.node_id == node_id)?;
    let name = node.name.as_str();
    Some(name.rfind("op").map_or(name, |at| &name[at + 2..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_insight_import::load_ranked_graphs_from_str;

    /// rank 0 sends to rank 1, which sends on to rank 2.
    const THREE_RANKS: &str = r#"{
        "0": {"op_nodes": [
            {"node_id": "1", "name": "Conv2D-op1", "type": "Conv2D"},
            {"node_id": "2", "name": "Default/Send-op2", "type": "Send", "attr": {"dest_rank": 1, "sr_tag": 0}},
            {"node_id": "3", "name": "Add-op3", "type": "Add"}
        ]},
        "1": {"op_nodes": [
            {"node_id": "1", "name": "Receive-op1", "type": "Receive", "attr": {"src_rank": 0, "sr_tag": 0}},
            {"node_id": "2", "name": "MatMul-op2", "type": "MatMul"},
            {"node_id": "3", "name": "Send-op3", "type": "Send", "attr": {"dest_rank": 2, "sr_tag": 1}},
            {"node_id": "4", "name": "ReLU-op4", "type": "ReLU"}
        ]},
        "2": {"op_nodes": [
            {"node_id": "1", "name": "Receive-op1", "type": "Receive", "attr": {"src_rank": 1, "sr_tag": 1}},
            {"node_id": "2", "name": "Add-op2", "type": "Add"}
        ]}
    }"#;

    fn ranked(text: &str) -> RankedGraphs {
        load_ranked_graphs_from_str(text).unwrap()
    }

    #[test]
    fn test_blocks_per_rank() {
        let info = build_pipeline_blocks(&ranked(THREE_RANKS));
        assert_eq!(
            info.node_blocks,
            vec![
                vec!["0-1-2", "0-3-3"],
                vec!["1-1-1", "1-2-3", "1-4-4"],
                vec!["2-1-1", "2-2-2"],
            ]
        );
        let (_, next) = info.pipeline_graph().next().unwrap();
        assert_eq!(next, ["0-3-3", "1-1-1"]);
    }

    #[test]
    fn test_order_follows_ranks() {
        let info = build_pipeline_blocks(&ranked(THREE_RANKS));
        assert_eq!(info.node_order.len(), 7);
        let rank_of = |block: &str| block.split('-').next().unwrap().parse::<usize>().unwrap();
        let position = |block: &str| info.node_order.iter().position(|b| b == block).unwrap();
        assert!(position("0-1-2") < position("1-1-1"));
        assert!(position("1-2-3") < position("2-1-1"));
        let first_of_rank = |rank: usize| {
            info.node_order
                .iter()
                .position(|block| rank_of(block) == rank)
                .unwrap()
        };
        assert!(first_of_rank(0) < first_of_rank(1));
        assert!(first_of_rank(1) < first_of_rank(2));
    }

    #[test]
    fn test_depend_nodes() {
        let info = build_pipeline_blocks(&ranked(THREE_RANKS));
        assert_eq!(info.depend_nodes("2-2-2"), ["2-1-1", "1-2-3", "1-1-1", "0-1-2"]);
        assert!(info.depends_on("2-2-2", "0-1-2"));
        assert!(!info.depends_on("0-3-3", "1-1-1"));
        assert!(info.depend_nodes("0-1-2").is_empty());
    }

    #[test]
    fn test_trailing_transfer_makes_no_empty_block() {
        let info = build_pipeline_blocks(&ranked(
            r#"{"0": {"op_nodes": [
                {"node_id": "1", "type": "Add"},
                {"node_id": "2", "type": "Send", "attr": {"dest_rank": 1, "sr_tag": 0}}
            ]}}"#,
        ));
        assert_eq!(info.node_blocks, vec![vec!["0-1-2"]]);
    }

    #[test]
    fn test_cycle_leaves_partial_order() {
        // each rank waits on the other's send before sending its own
        let info = build_pipeline_blocks(&ranked(
            r#"{
                "0": {"op_nodes": [
                    {"node_id": "1", "type": "Receive", "attr": {"src_rank": 1, "sr_tag": 0}},
                    {"node_id": "2", "type": "Send", "attr": {"dest_rank": 1, "sr_tag": 1}}
                ]},
                "1": {"op_nodes": [
                    {"node_id": "1", "type": "Receive", "attr": {"src_rank": 0, "sr_tag": 1}},
                    {"node_id": "2", "type": "Send", "attr": {"dest_rank": 0, "sr_tag": 0}}
                ]},
                "2": {"op_nodes": [{"node_id": "1", "type": "Add"}]}
            }"#,
        ));
        assert_eq!(
            info.node_blocks,
            vec![vec!["0-1-1", "0-2-2"], vec!["1-1-1", "1-2-2"], vec!["2-1-1"]]
        );
        assert_eq!(info.node_order, vec!["2-1-1"]);
        assert!(info.depends_on("0-1-1", "1-2-2"));
        assert!(info.depends_on("0-1-1", "0-2-2"));
    }

    #[test]
    fn test_stage_panel() {
        let info = build_pipelined_stage_info(&ranked(THREE_RANKS)).unwrap();
        assert_eq!(info.node_info[0], vec![vec!["2"], vec!["1"], vec!["3"], vec!["1"]]);
        assert!(info.node_info[1].is_empty());
        assert_eq!(
            info.edge_info[1],
            (
                Slot { lane: 0, column: 2, row: 0 },
                Slot { lane: 0, column: 3, row: 0 }
            )
        );
    }

    #[test]
    fn test_backward_stage_uses_second_lane() {
        let info = build_pipelined_stage_info(&ranked(
            r#"{
                "0": {"op_nodes": [{"node_id": "5", "type": "Receive", "attr": {"src_rank": 1, "sr_tag": 7}}]},
                "1": {"op_nodes": [{"node_id": "9", "type": "Send", "attr": {"dest_rank": 0, "sr_tag": 7}}]}
            }"#,
        ))
        .unwrap();
        assert_eq!(info.node_info[1], vec![vec!["5"], vec!["9"]]);
        assert_eq!(info.edge_info[0].0, Slot { lane: 1, column: 1, row: 0 });
    }

    #[test]
    fn test_stage_sentinels() {
        let no_transfers = ranked(r#"{"0": {"op_nodes": [{"node_id": "1", "type": "Add"}]}}"#);
        assert_eq!(
            build_pipelined_stage_info(&no_transfers),
            Err(PipelineError::NoPipelineData)
        );
        let unpaired = ranked(
            r#"{"0": {"op_nodes": [{"node_id": "1", "type": "Send", "attr": {"dest_rank": 1, "sr_tag": 0}}]}}"#,
        );
        assert!(matches!(
            build_pipelined_stage_info(&unpaired),
            Err(PipelineError::BuildFailed(_))
        ));
    }

    #[test]
    fn test_real_node_name() {
        let graphs = ranked(THREE_RANKS);
        assert_eq!(real_node_name(&graphs, "2", "0"), Some("2"));
        assert_eq!(real_node_name(&graphs, "9", "0"), None);
    }
}
