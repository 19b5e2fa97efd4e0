//! Classes of edges drawn apart from the main data flow in the profile view.
use super::{ProfileNode, ProfileNodeMap};
use crate::config::GraphConfig;
use crate::node::numeric_id;
use serde::Serialize;

/// Special edge classes in priority order; an edge takes the first class
/// whose condition holds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SpecialEdgeClass {
    UpdateStateEdge,
    ActivationGradientEdges,
    LoadEdge,
    BigDependEdge,
    GetNextEdge,
    BigFromSyncbatchnormEdge,
    BigHubNodeEdge,
    OtherBigEdge,
}

/// Gradient op (by type or by its layer name) and the forward op it differentiates.
const GRADIENT_PAIRS: &[(&str, &str)] = &[
    ("Conv2DBackpropFilter", "Conv2D"),
    ("Conv2DBackpropInput", "Conv2D"),
    ("SyncBatchNormGrad", "SyncBatchNorm"),
    ("MaxPoolGrad", "MaxPool"),
    ("ReluGrad", "ReLU"),
    ("gradGather", "Gather"),
    ("LayerNormGrad", "LayerNorm"),
    ("DropoutGrad", "Dropout"),
    ("gradMatMul", "MatMul"),
    ("gradBatchMatMul", "BatchMatMul"),
    ("gradSoftmax", "Softmax"),
    ("GeLUGrad", "GeLU"),
    ("TanhGrad", "Tanh"),
];

fn forward_of(gradient: &str) -> Option<&'static str> {
    GRADIENT_PAIRS
        .iter()
        .find(|(grad, _)| *grad == gradient)
        .map(|(_, forward)| *forward)
}

fn id_distance(source: &ProfileNode, target: &ProfileNode) -> Option<u64> {
    Some(numeric_id(&source.id)?.abs_diff(numeric_id(&target.id)?))
}

/// Context shared by the class conditions of one classification run.
struct EdgeContext<'a> {
    nodes: &'a ProfileNodeMap,
    config: &'a GraphConfig,
}

impl EdgeContext<'_> {
    fn is_long(&self, source: &ProfileNode, target: &ProfileNode) -> bool {
        id_distance(source, target).is_some_and(|d| d > self.config.long_range_distance)
    }

    fn is_update_state(&self, source: &ProfileNode, target: &ProfileNode) -> bool {
        let source_update = source.node_type == "UpdateState";
        let target_update = target.node_type == "UpdateState";
        match (source_update, target_update) {
            (true, true) => true,
            (false, false) => false,
            _ => id_distance(source, target).is_some_and(|d| d > self.config.update_state_distance),
        }
    }

    fn is_activation_gradient(&self, source: &ProfileNode, target: &ProfileNode) -> bool {
        if !self.is_long(source, target) {
            return false;
        }
        [target.node_type.as_str(), target.scope_tail()]
            .into_iter()
            .filter_map(forward_of)
            .any(|forward| {
                source.node_type == forward
                    || source
                        .output
                        .iter()
                        .filter_map(|id| self.nodes.get(id))
                        .any(|next| next.node_type == forward)
            })
    }

    fn is_hub(&self, source: &ProfileNode, target: &ProfileNode) -> bool {
        self.is_long(source, target)
            && (source.output.len() > self.config.hub_degree
                || target.input.len() > self.config.hub_degree)
    }

    fn holds(&self, class: SpecialEdgeClass, source: &ProfileNode, target: &ProfileNode) -> bool {
        let either = |op_type: &str| source.node_type == op_type || target.node_type == op_type;
        match class {
            SpecialEdgeClass::UpdateStateEdge => self.is_update_state(source, target),
            SpecialEdgeClass::ActivationGradientEdges => self.is_activation_gradient(source, target),
            SpecialEdgeClass::LoadEdge => either("Load"),
            SpecialEdgeClass::BigDependEdge => either("Depend") && self.is_long(source, target),
            SpecialEdgeClass::GetNextEdge => source.node_type == "GetNext",
            SpecialEdgeClass::BigFromSyncbatchnormEdge => {
                source.node_type == "SyncBatchNormGrad"
                    && matches!(target.node_type.as_str(), "AssignAdd" | "Conv2DBackpropFilter")
            }
            SpecialEdgeClass::BigHubNodeEdge => self.is_hub(source, target),
            SpecialEdgeClass::OtherBigEdge => self.is_long(source, target),
        }
    }
}

/// First special class the edge `source -> target` falls into, or `None`
/// for a normal data-flow edge.
pub fn classify_edge(
    source: &ProfileNode,
    target: &ProfileNode,
    nodes: &ProfileNodeMap,
    config: &GraphConfig,
) -> Option<SpecialEdgeClass> {
    use strum::IntoEnumIterator;
    let context = EdgeContext { nodes, config };
    SpecialEdgeClass::iter().find(|class| context.holds(*class, source, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn node(id: &str, node_type: &str) -> ProfileNode {
        ProfileNode {
            id: id.to_string(),
            name: id.to_string(),
            node_type: node_type.to_string(),
            scope: String::new(),
            input: vec![],
            output: vec![],
            attribute: Default::default(),
            output_shape: None,
            instance_type: None,
            parallel_shard: Default::default(),
            stacked_ids: vec![],
            is_aggre_node: false,
            contain: vec![],
        }
    }

    fn classify(source: &ProfileNode, target: &ProfileNode) -> Option<SpecialEdgeClass> {
        classify_edge(source, target, &ProfileNodeMap::new(), &GraphConfig::default())
    }

    #[test]
    fn test_class_names_in_priority_order() {
        let names: Vec<String> = SpecialEdgeClass::iter().map(|c| c.to_string()).collect();
        assert_eq!(names[0], "update-state-edge");
        assert_eq!(names[1], "activation-gradient-edges");
        assert_eq!(names[5], "big-from-syncbatchnorm-edge");
        assert_eq!(names[7], "other-big-edge");
    }

    #[test]
    fn test_short_edges_stay_normal() {
        assert_eq!(classify(&node("1", "Conv2D"), &node("2", "ReLU")), None);
        assert_eq!(classify(&node("1", "Conv2D"), &node("8", "ReLU")), None);
        assert_eq!(
            classify(&node("1", "Conv2D"), &node("9", "ReLU")),
            Some(SpecialEdgeClass::OtherBigEdge)
        );
    }

    #[test]
    fn test_update_state_distance() {
        assert_eq!(
            classify(&node("1", "UpdateState"), &node("2", "UpdateState")),
            Some(SpecialEdgeClass::UpdateStateEdge)
        );
        assert_eq!(
            classify(&node("1", "UpdateState"), &node("30", "ReLU")),
            Some(SpecialEdgeClass::UpdateStateEdge)
        );
        assert_eq!(classify(&node("1", "UpdateState"), &node("3", "ReLU")), None);
    }

    #[test]
    fn test_gradient_pairs() {
        assert_eq!(
            classify(&node("1", "Conv2D"), &node("50", "Conv2DBackpropFilter")),
            Some(SpecialEdgeClass::ActivationGradientEdges)
        );
        let mut grad = node("50", "Mul");
        grad.scope = "Gradients/ReluGrad".to_string();
        let mut source = node("1", "Cast");
        source.output = vec!["2".to_string()];
        let mut nodes = ProfileNodeMap::new();
        nodes.insert("2".to_string(), node("2", "ReLU"));
        assert_eq!(
            classify_edge(&source, &grad, &nodes, &GraphConfig::default()),
            Some(SpecialEdgeClass::ActivationGradientEdges)
        );
    }

    #[test]
    fn test_type_based_classes() {
        assert_eq!(classify(&node("1", "Load"), &node("2", "Add")), Some(SpecialEdgeClass::LoadEdge));
        assert_eq!(classify(&node("1", "Depend"), &node("2", "Add")), None);
        assert_eq!(
            classify(&node("1", "Add"), &node("20", "Depend")),
            Some(SpecialEdgeClass::BigDependEdge)
        );
        assert_eq!(
            classify(&node("1", "GetNext"), &node("2", "Add")),
            Some(SpecialEdgeClass::GetNextEdge)
        );
        assert_eq!(
            classify(&node("1", "SyncBatchNormGrad"), &node("2", "AssignAdd")),
            Some(SpecialEdgeClass::BigFromSyncbatchnormEdge)
        );
    }

    #[test]
    fn test_hub_edges() {
        let mut hub = node("1", "Add");
        hub.output = (2..14).map(|i| i.to_string()).collect();
        assert_eq!(
            classify(&hub, &node("12", "Mul")),
            Some(SpecialEdgeClass::BigHubNodeEdge)
        );
    }
}
