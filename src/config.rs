//! Tunable thresholds of the graph pipeline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Graphs with more op nodes than this may switch on instance-type filtering
    pub instance_filter_node_threshold: usize,
    /// ...provided they also hold more communication nodes than this
    pub instance_filter_comm_threshold: usize,
    /// Run the min-cut partitioner before component separation
    pub min_cut_enabled: bool,
    /// BFS depth of the topology signature used to cache cut sets
    pub signature_depth: usize,
    /// Dequeues allowed per augmenting-path search before giving up
    pub flow_bfs_iterations: usize,
    /// Dequeues allowed when collecting the nodes related to a communication node
    pub related_search_iterations: usize,
    /// Capacity of the edges leaving the virtual source and entering the virtual sink
    pub terminal_capacity: i64,
    /// Minimum number of identical siblings folded into one aggregate scope
    pub stack_threshold: usize,
    /// Minimum number of equal-hash subgraphs folded into one template
    pub isomorphic_repeat_threshold: usize,
    /// Id distance above which an edge counts as long range
    pub long_range_distance: u64,
    /// Id distance above which an edge into or out of UpdateState counts as long range
    pub update_state_distance: u64,
    /// Fan-out or fan-in above which a long-range edge touches a hub
    pub hub_degree: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            instance_filter_node_threshold: 5000,
            instance_filter_comm_threshold: 30,
            min_cut_enabled: true,
            signature_depth: 5,
            flow_bfs_iterations: 10,
            related_search_iterations: 5,
            terminal_capacity: 10000,
            stack_threshold: 10,
            isomorphic_repeat_threshold: 5,
            long_range_distance: 7,
            update_state_distance: 20,
            hub_degree: 10,
        }
    }
}

impl GraphConfig {
    pub fn with_instance_filter(mut self, node_threshold: usize, comm_threshold: usize) -> Self {
        self.instance_filter_node_threshold = node_threshold;
        self.instance_filter_comm_threshold = comm_threshold;
        self
    }

    pub fn with_min_cut(mut self, enabled: bool) -> Self {
        self.min_cut_enabled = enabled;
        self
    }

    pub fn with_signature_depth(mut self, depth: usize) -> Self {
        self.signature_depth = depth;
        self
    }

    pub fn with_flow_bfs_iterations(mut self, iterations: usize) -> Self {
        self.flow_bfs_iterations = iterations;
        self
    }

    pub fn with_related_search_iterations(mut self, iterations: usize) -> Self {
        self.related_search_iterations = iterations;
        self
    }

    pub fn with_stack_threshold(mut self, threshold: usize) -> Self {
        self.stack_threshold = threshold;
        self
    }

    pub fn with_isomorphic_repeat_threshold(mut self, threshold: usize) -> Self {
        self.isomorphic_repeat_threshold = threshold;
        self
    }

    pub fn with_long_range_distance(mut self, distance: u64) -> Self {
        self.long_range_distance = distance;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: GraphConfig =
            serde_json::from_str(r#"{"stack_threshold": 4, "min_cut_enabled": false}"#).unwrap();
        assert_eq!(config.stack_threshold, 4);
        assert!(!config.min_cut_enabled);
        assert_eq!(config.signature_depth, 5);
        assert_eq!(config.terminal_capacity, 10000);
    }

    #[test]
    fn test_builder() {
        let config = GraphConfig::default()
            .with_instance_filter(10, 1)
            .with_flow_bfs_iterations(100);
        assert_eq!(config.instance_filter_node_threshold, 10);
        assert_eq!(config.instance_filter_comm_threshold, 1);
        assert_eq!(config.flow_bfs_iterations, 100);
    }
}
