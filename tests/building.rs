use graph_insight::layout::{BASIC_SCOPE, IN_PORT_SUFFIX, OUT_PORT_SUFFIX};
use graph_insight::node::{CommOp, is_numeric_id};
use graph_insight::{GraphConfig, LayoutEmitter, ScopeGraph};
use graph_insight_import::{RawGraph, load_graph_from_str};
use std::sync::Once;

static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        env_logger::init();
    });
}

/// Two islands joined only through an AllReduce.
const TWO_ISLANDS: &str = r#"{
    "op_nodes": [
        {"node_id": "1", "name": "Default/a/Conv2D-op1", "type": "Conv2D", "scope": "Default/a", "input": ["w"]},
        {"node_id": "2", "name": "Default/a/ReLU-op2", "type": "ReLU", "scope": "Default/a", "input": ["1"]},
        {"node_id": "3", "name": "Default/AllReduce-op3", "type": "AllReduce", "scope": "Default", "input": ["2"]},
        {"node_id": "4", "name": "Default/b/MatMul-op4", "type": "MatMul", "scope": "Default/b", "input": ["3"],
         "parallel_shard": "[[2, 1], [1, 4]]"},
        {"node_id": "5", "name": "Default/b/Add-op5", "type": "Add", "scope": "Default/b", "input": ["4"],
         "instance_type": "model"}
    ],
    "parameter_nodes": [{"node_id": "w", "name": "conv.weight"}]
}"#;

fn load() -> anyhow::Result<RawGraph> {
    Ok(load_graph_from_str(TWO_ISLANDS)?)
}

fn top_scope(graph: &ScopeGraph, id: &str) -> String {
    graph.find_top_scope(id).unwrap()
}

#[test]
fn islands_partition_every_computation_node() -> anyhow::Result<()> {
    init_logging();
    let raw = load()?;
    let mut graph = ScopeGraph::new(GraphConfig::default());
    graph.build_graph(&raw);

    for node in &raw.op_nodes {
        if !is_numeric_id(&node.node_id) || CommOp::is_comm_type(&node.op_type) {
            continue;
        }
        assert!(
            top_scope(&graph, &node.node_id).starts_with("Computation_"),
            "node {} escaped the islands",
            node.node_id
        );
    }
    assert_eq!(top_scope(&graph, "1"), top_scope(&graph, "2"));
    assert_eq!(top_scope(&graph, "4"), top_scope(&graph, "5"));
    assert_ne!(top_scope(&graph, "1"), top_scope(&graph, "4"));
    assert_eq!(top_scope(&graph, "3"), "3");
    Ok(())
}

#[test]
fn collapsed_graph_shows_islands_and_comm() -> anyhow::Result<()> {
    init_logging();
    let raw = load()?;
    let mut graph = ScopeGraph::new(GraphConfig::default());
    let vis = graph.build_graph(&raw);

    let first = top_scope(&graph, "1");
    let second = top_scope(&graph, "4");
    let mut visible: Vec<&str> = vis.vis_nodes.iter().map(|n| n.id.as_str()).collect();
    visible.sort();
    let mut expected = vec![first.as_str(), second.as_str(), "3"];
    expected.sort();
    assert_eq!(visible, expected);
    assert!(vis.edge(&first, "3").is_some());
    assert!(vis.edge("3", &second).is_some());
    assert_eq!(graph.special_nodes_map().get("model"), Some(&1));
    Ok(())
}

#[test]
fn expanding_an_island_reveals_its_ops() -> anyhow::Result<()> {
    init_logging();
    let raw = load()?;
    let mut graph = ScopeGraph::new(GraphConfig::default());
    graph.build_graph(&raw);
    let first = top_scope(&graph, "1");

    let vis = graph.toggle_expanded(&first).unwrap();
    assert!(vis.node("1").is_some());
    assert!(vis.node("2").is_some());
    assert!(vis.edge("2", "3").is_some());

    let vis = graph.toggle_expanded(&first).unwrap();
    assert!(vis.node("1").is_none());
    assert!(graph.toggle_expanded("missing").is_none());
    Ok(())
}

#[test]
fn search_walks_up_to_the_island() -> anyhow::Result<()> {
    init_logging();
    let raw = load()?;
    let mut graph = ScopeGraph::new(GraphConfig::default());
    graph.build_graph(&raw);

    let found = graph.search_node("MatMul").unwrap();
    assert!(found.contains_key("4"));
    assert!(found.contains_key(&top_scope(&graph, "4")));
    assert!(!found.contains_key("1"));
    Ok(())
}

#[test]
fn disabled_min_cut_still_partitions() -> anyhow::Result<()> {
    init_logging();
    let raw = load()?;
    let mut graph = ScopeGraph::new(GraphConfig::default().with_min_cut(false));
    graph.build_graph(&raw);
    assert!(graph.cut_edges().is_empty());
    assert_ne!(top_scope(&graph, "2"), top_scope(&graph, "4"));
    Ok(())
}

#[test]
fn layout_nests_expanded_islands() -> anyhow::Result<()> {
    init_logging();
    let raw = load()?;
    let mut graph = ScopeGraph::new(GraphConfig::default());
    let vis = graph.build_graph(&raw);
    let first = top_scope(&graph, "1");

    let mut emitter = LayoutEmitter::new();
    let root = emitter.emit(&vis, true);
    assert_eq!(emitter.root_set().len(), 3);
    let island = root.find(&first).unwrap();
    assert_eq!(island.node_type, BASIC_SCOPE);
    assert_eq!((island.width, island.height), (120, 80));
    assert_eq!(island.ports[0].id, format!("{first}{IN_PORT_SUFFIX}"));
    assert_eq!(island.ports[1].id, format!("{first}{OUT_PORT_SUFFIX}"));
    assert!(root.edges.iter().any(|edge| edge.id == format!("{first}->3")));

    let json = serde_json::to_value(&root)?;
    assert!(json["children"][0]["layoutOptions"]["nodeSize.minimum"].is_string());

    let vis = graph.toggle_expanded(&first).unwrap();
    let root = emitter.emit(&vis, false);
    let island = root.find(&first).unwrap();
    assert!(island.expanded);
    assert!(island.children.iter().any(|child| child.id == "1"));
    Ok(())
}

#[test]
fn instance_filter_keeps_untyped_comm_inside_islands() -> anyhow::Result<()> {
    init_logging();
    let raw = load()?;
    let mut graph = ScopeGraph::new(GraphConfig::default());
    graph.build_graph(&raw);
    assert!(!graph.instance_type_filter());
    assert_ne!(top_scope(&graph, "1"), top_scope(&graph, "4"));

    let mut graph = ScopeGraph::new(GraphConfig::default().with_instance_filter(1, 0));
    graph.build_graph(&raw);
    assert!(graph.instance_type_filter());
    assert_eq!(top_scope(&graph, "1"), top_scope(&graph, "4"));
    assert_eq!(top_scope(&graph, "1"), top_scope(&graph, "3"));
    assert!(top_scope(&graph, "3").starts_with("Computation_"));
    Ok(())
}
