//! Hierarchical display graphs for distributed training jobs.
//!
//! Raw per-rank operator graphs come in through [`graph_insight_import`];
//! [`ScopeGraph`] turns one of them into a scope tree partitioned into
//! computation islands, [`LayoutEmitter`] nests its visible part for a layout
//! engine, [`ProfileGraph`] prepares the flat profiling view and
//! [`pipeline`] relates the ranks of a pipeline-parallel job.

pub mod bipartite;
pub mod config;
pub mod extra_attr;
pub mod graph;
pub mod hash;
pub mod layout;
pub mod min_cut;
pub mod node;
pub mod pipeline;
pub mod profile;
pub mod scope_graph;
pub mod scope_trie;

pub use config::GraphConfig;
pub use layout::{LayoutEmitter, LayoutRoot};
pub use node::{GraphNode, NodeId, NodeType};
pub use pipeline::{PipelineBlockInfo, PipelineError, build_pipeline_blocks, build_pipelined_stage_info};
pub use profile::ProfileGraph;
pub use scope_graph::{ScopeGraph, VisGraph};

pub use graph_insight_import::{RankedGraphs, RawGraph};
