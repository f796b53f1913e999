//! Structured intent handed over by the reasoning layer, and the base graph
//! built from it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::graph::{Edge, Graph};
use super::node::{Node, NodeKind, OperationSpec};
use crate::errors::{UeirError, UeirResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDecl {
    pub id: String,
    #[serde(flatten)]
    pub spec: OperationSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDecl {
    pub id: String,
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// `before` must execute before `after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDecl {
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFlowDecl {
    pub from: String,
    pub to: String,
    pub name: String,
    pub type_tag: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredIntent {
    pub operations: Vec<OperationDecl>,
    /// Source/sink values the operations read or write.
    #[serde(default)]
    pub data: Vec<DataDecl>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,
    #[serde(default)]
    pub data_flow: Vec<DataFlowDecl>,
}

impl StructuredIntent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(mut self, id: impl Into<String>, spec: OperationSpec) -> Self {
        self.operations.push(OperationDecl { id: id.into(), spec });
        self
    }

    pub fn data(mut self, id: impl Into<String>, type_tag: impl Into<String>, value: Option<serde_json::Value>) -> Self {
        self.data.push(DataDecl {
            id: id.into(),
            type_tag: type_tag.into(),
            value,
        });
        self
    }

    pub fn depends(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.dependencies.push(DependencyDecl {
            before: before.into(),
            after: after.into(),
        });
        self
    }

    pub fn flow(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        name: impl Into<String>,
        type_tag: impl Into<String>,
    ) -> Self {
        self.data_flow.push(DataFlowDecl {
            from: from.into(),
            to: to.into(),
            name: name.into(),
            type_tag: type_tag.into(),
        });
        self
    }
}

/// Build the base graph of Operation/Data nodes from a structured intent.
///
/// Fails with `MalformedGraph` on duplicate ids, dependencies naming unknown
/// operations, flows naming unknown nodes, declared type mismatches along a
/// flow, or any cycle.
pub fn build_base_graph(intent: &StructuredIntent) -> UeirResult<Graph> {
    let mut graph = Graph::new();

    for decl in &intent.operations {
        graph.insert_node(Node::operation(decl.id.clone(), decl.spec.clone()))?;
    }
    for decl in &intent.data {
        graph.insert_node(Node::data(decl.id.clone(), decl.type_tag.clone(), decl.value.clone()))?;
    }

    let is_operation = |g: &Graph, id: &str| matches!(g.node(id).map(Node::kind), Some(NodeKind::Operation));

    for dep in &intent.dependencies {
        for id in [&dep.before, &dep.after] {
            if !is_operation(&graph, id) {
                return Err(UeirError::malformed(format!(
                    "dependency {} -> {} references unknown operation '{}'",
                    dep.before, dep.after, id
                )));
            }
        }
        graph.insert_edge(Edge::dependency(dep.before.clone(), dep.after.clone()))?;
    }

    for flow in &intent.data_flow {
        graph.insert_edge(Edge::data_flow(
            flow.from.clone(),
            flow.to.clone(),
            flow.name.clone(),
            flow.type_tag.clone(),
        ))?;
    }

    graph.validate()?;
    debug!(
        "Built base graph: {} nodes, {} edges",
        graph.node_count(),
        graph.edge_count()
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> StructuredIntent {
        StructuredIntent::new()
            .data("dataset", "csv", Some(serde_json::json!("sales_data_2024.csv")))
            .operation(
                "load",
                OperationSpec::new("load_csv")
                    .with_input("source", "csv")
                    .with_output("rows", "table"),
            )
            .operation(
                "detect",
                OperationSpec::new("anomaly_detect").with_input("rows", "table"),
            )
            .depends("load", "detect")
            .flow("dataset", "load", "source", "csv")
            .flow("load", "detect", "rows", "table")
    }

    #[test]
    fn test_build_sequence() {
        let graph = build_base_graph(&pipeline()).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["load".to_string(), "detect".to_string()]
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let intent = pipeline().depends("load", "report");
        let err = build_base_graph(&intent).unwrap_err();
        assert!(err.to_string().contains("report"));
    }

    #[test]
    fn test_dependency_on_data_node_rejected() {
        let intent = pipeline().depends("dataset", "detect");
        assert!(matches!(
            build_base_graph(&intent),
            Err(UeirError::MalformedGraph { .. })
        ));
    }

    #[test]
    fn test_cycle() {
        let intent = pipeline().depends("detect", "load");
        let err = build_base_graph(&intent).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_type_mismatch() {
        let intent = pipeline().flow("load", "detect", "rows", "json");
        assert!(matches!(
            build_base_graph(&intent),
            Err(UeirError::MalformedGraph { .. })
        ));
    }

    #[test]
    fn test_intent_deserializes_flattened_operations() {
        let json = serde_json::json!({
            "operations": [
                {"id": "a", "op": "load", "params": {"work": 2.0}},
                {"id": "b", "op": "train", "requires": ["gpu"], "fallback": "train_cpu"}
            ],
            "dependencies": [{"before": "a", "after": "b"}],
            "data_flow": []
        });
        let intent: StructuredIntent = serde_json::from_value(json).unwrap();
        let graph = build_base_graph(&intent).unwrap();
        let b = graph.node("b").and_then(Node::as_operation).unwrap();
        assert!(b.requires.contains("gpu"));
        assert_eq!(b.fallback.as_deref(), Some("train_cpu"));
    }
}
