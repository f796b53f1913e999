//! UEIR graph
//!
//! A `Graph` is a value: `add_node`/`add_edge` return a new graph and leave
//! the receiver untouched. Ordering edges between Operation/Data nodes must
//! stay acyclic; annotation edges tie Constraint/Objective nodes to what they
//! govern and never participate in ordering.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::fingerprint::Fingerprint;
use super::node::{Node, NodeId, NodeKind, NodePayload};
use crate::errors::{UeirError, UeirResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Execution ordering only.
    Dependency,
    /// Carries a named value from producer to consumer.
    DataFlow,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowValue {
    pub name: String,
    pub type_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FlowValue>,
    /// Non-ordering reference from a Constraint/Objective to a governed node.
    #[serde(default)]
    pub annotation: bool,
}

impl Edge {
    pub fn dependency(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::Dependency,
            value: None,
            annotation: false,
        }
    }

    pub fn data_flow(
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        name: impl Into<String>,
        type_tag: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::DataFlow,
            value: Some(FlowValue {
                name: name.into(),
                type_tag: type_tag.into(),
            }),
            annotation: false,
        }
    }

    pub fn annotation(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: EdgeKind::Dependency,
            value: None,
            annotation: true,
        }
    }

    pub fn is_ordering(&self) -> bool {
        !self.annotation
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeSet<Edge>,
}

/// Canonical rendering used for fingerprinting: extensions are metadata and
/// are left out.
#[derive(Serialize)]
struct CanonicalGraph<'a> {
    nodes: Vec<(&'a NodeId, &'a NodePayload)>,
    edges: &'a BTreeSet<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.kind() == kind)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Node> {
        self.nodes_of(NodeKind::Operation)
    }

    /// Ordering successors of `id`.
    pub fn successors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.is_ordering() && e.from == id)
    }

    /// Ordering predecessors of `id`.
    pub fn predecessors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.is_ordering() && e.to == id)
    }

    /// Nodes governed by the Constraint/Objective `id` through annotation edges.
    pub fn annotation_targets(&self, id: &str) -> BTreeSet<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.annotation && e.from == id)
            .map(|e| e.to.clone())
            .collect()
    }

    /// Return a new graph containing `node`.
    pub fn add_node(&self, node: Node) -> UeirResult<Graph> {
        let mut next = self.clone();
        next.insert_node(node)?;
        Ok(next)
    }

    /// Return a new graph containing `edge`. The edge is validated against
    /// the receiver and the result is checked for cycles.
    pub fn add_edge(&self, edge: Edge) -> UeirResult<Graph> {
        let mut next = self.clone();
        next.insert_edge(edge)?;
        next.computational_order()?;
        Ok(next)
    }

    pub(crate) fn insert_node(&mut self, node: Node) -> UeirResult<()> {
        if node.id.is_empty() {
            return Err(UeirError::malformed("node id must not be empty"));
        }
        if self.nodes.contains_key(&node.id) {
            return Err(UeirError::malformed(format!("duplicate node id '{}'", node.id)));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub(crate) fn insert_edge(&mut self, edge: Edge) -> UeirResult<()> {
        self.check_edge(&edge)?;
        self.edges.insert(edge);
        Ok(())
    }

    pub(crate) fn replace_node(&mut self, node: Node) -> UeirResult<()> {
        match self.nodes.get_mut(&node.id) {
            Some(slot) => {
                *slot = node;
                Ok(())
            }
            None => Err(UeirError::malformed(format!("unknown node '{}'", node.id))),
        }
    }

    pub(crate) fn remove_node(&mut self, id: &str) -> Option<Node> {
        self.edges.retain(|e| e.from != id && e.to != id);
        self.nodes.remove(id)
    }

    fn check_edge(&self, edge: &Edge) -> UeirResult<()> {
        let from = self
            .nodes
            .get(&edge.from)
            .ok_or_else(|| UeirError::malformed(format!("edge references unknown node '{}'", edge.from)))?;
        let to = self
            .nodes
            .get(&edge.to)
            .ok_or_else(|| UeirError::malformed(format!("edge references unknown node '{}'", edge.to)))?;

        if edge.from == edge.to {
            return Err(UeirError::malformed(format!("self-loop on '{}'", edge.from)));
        }

        if edge.annotation {
            if edge.kind != EdgeKind::Dependency {
                return Err(UeirError::malformed("annotation edges must be dependency-kind"));
            }
            if from.is_computational() || !to.is_computational() {
                return Err(UeirError::malformed(format!(
                    "annotation '{}' -> '{}' must run from a constraint/objective to an operation/data node",
                    edge.from, edge.to
                )));
            }
            return Ok(());
        }

        if !from.is_computational() || !to.is_computational() {
            return Err(UeirError::malformed(format!(
                "ordering edge '{}' -> '{}' must connect operation/data nodes",
                edge.from, edge.to
            )));
        }

        match (&edge.kind, &edge.value) {
            (EdgeKind::Dependency, None) => Ok(()),
            (EdgeKind::Dependency, Some(_)) => Err(UeirError::malformed(format!(
                "dependency '{}' -> '{}' must not carry a value",
                edge.from, edge.to
            ))),
            (EdgeKind::DataFlow, None) => Err(UeirError::malformed(format!(
                "data flow '{}' -> '{}' carries no value",
                edge.from, edge.to
            ))),
            (EdgeKind::DataFlow, Some(value)) => {
                if let Some(produced) = from.output_type(&value.name) {
                    if produced != value.type_tag {
                        return Err(UeirError::malformed(format!(
                            "'{}' produces '{}' as {} but the flow declares {}",
                            edge.from, value.name, produced, value.type_tag
                        )));
                    }
                }
                if let Some(expected) = to.input_type(&value.name) {
                    if expected != value.type_tag {
                        return Err(UeirError::malformed(format!(
                            "'{}' expects '{}' as {} but the flow declares {}",
                            edge.to, value.name, expected, value.type_tag
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Re-check every edge and acyclicity.
    pub fn validate(&self) -> UeirResult<()> {
        for edge in &self.edges {
            self.check_edge(edge)?;
        }
        self.computational_order()?;
        Ok(())
    }

    /// Execution order of Operation/Data nodes (Kahn's algorithm). Ready
    /// nodes are taken in id order so the result is deterministic.
    pub fn computational_order(&self) -> UeirResult<Vec<NodeId>> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .values()
            .filter(|n| n.is_computational())
            .map(|n| (n.id.as_str(), 0))
            .collect();

        let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for edge in self.edges.iter().filter(|e| e.is_ordering()) {
            // Parallel edges (dependency + data flow) count once.
            if adjacency.entry(edge.from.as_str()).or_default().insert(edge.to.as_str()) {
                if let Some(d) = in_degree.get_mut(edge.to.as_str()) {
                    *d += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(in_degree.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            if let Some(next) = adjacency.get(id) {
                for &succ in next {
                    if let Some(d) = in_degree.get_mut(succ) {
                        *d -= 1;
                        if *d == 0 {
                            ready.insert(succ);
                        }
                    }
                }
            }
        }

        if order.len() != in_degree.len() {
            let visited: BTreeSet<&str> = order.iter().map(String::as_str).collect();
            let stuck: Vec<&str> = in_degree
                .keys()
                .copied()
                .filter(|id| !visited.contains(id))
                .collect();
            return Err(UeirError::malformed(format!(
                "cycle among operation/data nodes: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Topological order over Operation nodes.
    pub fn topological_order(&self) -> UeirResult<Vec<NodeId>> {
        Ok(self
            .computational_order()?
            .into_iter()
            .filter(|id| matches!(self.nodes.get(id).map(Node::kind), Some(NodeKind::Operation)))
            .collect())
    }

    /// Deterministic hash of nodes, edges, constraints and objectives.
    pub fn fingerprint(&self) -> UeirResult<Fingerprint> {
        let canonical = CanonicalGraph {
            nodes: self.nodes.iter().map(|(id, n)| (id, &n.payload)).collect(),
            edges: &self.edges,
        };
        Fingerprint::of(&canonical)
    }
}
