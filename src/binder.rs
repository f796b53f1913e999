//! Constraint & Objective Binder
//!
//! Attaches constraints and objectives to a graph as annotation nodes. The
//! computational nodes and ordering edges are never touched, so binding does
//! not change execution semantics.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::errors::{UeirError, UeirResult};
use crate::ueir::{Edge, Graph, Metric, Node, NodeId, NodeKind, Objective, Predicate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDecl {
    #[serde(flatten)]
    pub predicate: Predicate,
    /// Governed operations/data. Empty means the whole graph.
    #[serde(default)]
    pub targets: Vec<NodeId>,
}

impl ConstraintDecl {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            targets: Vec::new(),
        }
    }

    pub fn on(mut self, target: impl Into<NodeId>) -> Self {
        self.targets.push(target.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveDecl {
    #[serde(flatten)]
    pub objective: Objective,
    #[serde(default)]
    pub targets: Vec<NodeId>,
}

impl ObjectiveDecl {
    pub fn new(objective: Objective) -> Self {
        Self {
            objective,
            targets: Vec::new(),
        }
    }

    pub fn on(mut self, target: impl Into<NodeId>) -> Self {
        self.targets.push(target.into());
        self
    }
}

impl From<Objective> for ObjectiveDecl {
    fn from(objective: Objective) -> Self {
        Self::new(objective)
    }
}

/// Per-metric selection weights. Metrics left out fall back to the weight on
/// the objective itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Preferences {
    pub weights: BTreeMap<Metric, f64>,
}

impl Preferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weight(mut self, metric: Metric, weight: f64) -> Self {
        self.weights.insert(metric, weight);
        self
    }

    pub fn weight_for(&self, objective: &Objective) -> f64 {
        self.weights.get(&objective.metric).copied().unwrap_or(objective.weight)
    }
}

/// Constraint bundle produced by the reasoning layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    #[serde(default)]
    pub explicit: Vec<ConstraintDecl>,
    #[serde(default)]
    pub inferred: Vec<ConstraintDecl>,
    #[serde(default)]
    pub optimization_objectives: Vec<ObjectiveDecl>,
    #[serde(default)]
    pub preferences: Preferences,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn explicit(mut self, decl: ConstraintDecl) -> Self {
        self.explicit.push(decl);
        self
    }

    pub fn inferred(mut self, decl: ConstraintDecl) -> Self {
        self.inferred.push(decl);
        self
    }

    pub fn objective(mut self, decl: impl Into<ObjectiveDecl>) -> Self {
        self.optimization_objectives.push(decl.into());
        self
    }

    pub fn preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Explicit constraints first, then inferred ones.
    pub fn constraints(&self) -> Vec<ConstraintDecl> {
        self.explicit.iter().chain(self.inferred.iter()).cloned().collect()
    }

    pub fn constraint_count(&self) -> usize {
        self.explicit.len() + self.inferred.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundConstraint {
    pub id: NodeId,
    pub predicate: Predicate,
    /// `None` when the constraint governs the whole graph.
    pub scope: Option<BTreeSet<NodeId>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundObjective {
    pub id: NodeId,
    pub objective: Objective,
    pub scope: Option<BTreeSet<NodeId>>,
}

/// Read-only view of the constraints and objectives bound into a graph, in
/// node-id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Binding {
    pub constraints: Vec<BoundConstraint>,
    pub objectives: Vec<BoundObjective>,
}

impl Binding {
    pub fn of(graph: &Graph) -> Self {
        let scope_of = |id: &str| {
            let targets = graph.annotation_targets(id);
            if targets.is_empty() {
                None
            } else {
                Some(targets)
            }
        };

        let constraints = graph
            .nodes_of(NodeKind::Constraint)
            .filter_map(|n| {
                n.as_constraint().map(|p| BoundConstraint {
                    id: n.id.clone(),
                    predicate: p.clone(),
                    scope: scope_of(&n.id),
                })
            })
            .collect();

        let objectives = graph
            .nodes_of(NodeKind::Objective)
            .filter_map(|n| {
                n.as_objective().map(|o| BoundObjective {
                    id: n.id.clone(),
                    objective: o.clone(),
                    scope: scope_of(&n.id),
                })
            })
            .collect();

        Self {
            constraints,
            objectives,
        }
    }
}

fn resolve_targets(graph: &Graph, targets: &[NodeId]) -> UeirResult<BTreeSet<NodeId>> {
    let mut resolved = BTreeSet::new();
    for target in targets {
        match graph.node(target) {
            Some(node) if node.is_computational() => {
                resolved.insert(target.clone());
            }
            _ => return Err(UeirError::unresolvable(target.clone())),
        }
    }
    Ok(resolved)
}

// Ids are derived from content so the bound graph fingerprints the same
// whatever order the constraints arrive in.
fn scoped_id(prefix: &str, body: String, targets: &BTreeSet<NodeId>) -> NodeId {
    if targets.is_empty() {
        format!("{}:{}", prefix, body)
    } else {
        format!(
            "{}:{}@{}",
            prefix,
            body,
            targets.iter().cloned().collect::<Vec<_>>().join(",")
        )
    }
}

fn attach(graph: &mut Graph, node: Node, targets: &BTreeSet<NodeId>) -> UeirResult<()> {
    let id = node.id.clone();
    graph.insert_node(node)?;
    for target in targets {
        graph.insert_edge(Edge::annotation(id.clone(), target.clone()))?;
    }
    Ok(())
}

/// Attach constraints and objectives to `graph`, returning the bound graph.
///
/// Fails with `UnresolvableReference` when a target is not an operation or
/// data node of the graph. Repeating an identical constraint is a no-op; two
/// different objectives on the same metric and scope are malformed.
pub fn bind(graph: &Graph, constraints: &[ConstraintDecl], objectives: &[ObjectiveDecl]) -> UeirResult<Graph> {
    let mut bound = graph.clone();

    for decl in constraints {
        let targets = resolve_targets(graph, &decl.targets)?;
        let id = scoped_id("constraint", decl.predicate.to_string().replace(' ', ""), &targets);
        if let Some(existing) = bound.node(&id) {
            if existing.as_constraint() == Some(&decl.predicate) {
                debug!("Constraint {} already bound", id);
                continue;
            }
            return Err(UeirError::malformed(format!(
                "constraint id '{}' is already taken by another node",
                id
            )));
        }
        attach(&mut bound, Node::constraint(id, decl.predicate.clone()), &targets)?;
    }

    for decl in objectives {
        let targets = resolve_targets(graph, &decl.targets)?;
        let id = scoped_id("objective", decl.objective.metric.to_string(), &targets);
        if let Some(existing) = bound.node(&id) {
            if existing.as_objective() == Some(&decl.objective) {
                continue;
            }
            return Err(UeirError::malformed(format!(
                "conflicting objectives bound as '{}'",
                id
            )));
        }
        attach(&mut bound, Node::objective(id, decl.objective.clone()), &targets)?;
    }

    debug!(
        "Bound {} constraints and {} objectives",
        constraints.len(),
        objectives.len()
    );
    Ok(bound)
}
