//! Candidate evaluation
//!
//! An `Evaluator` scores one metric of a (graph, profile) pair, optionally
//! restricted to the nodes a constraint/objective governs. Evaluation is a
//! pure function of its inputs so candidates can be scored in parallel.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::binder::Binding;
use crate::errors::UeirResult;
use crate::hardware::passes::PRECISION_FP16;
use crate::hardware::HardwareProfile;
use crate::ueir::{Graph, Metric, NodeId};

pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        graph: &Graph,
        profile: &HardwareProfile,
        metric: Metric,
        scope: Option<&BTreeSet<NodeId>>,
    ) -> UeirResult<f64>;
}

/// Fixed per-operation dispatch overhead, in work units.
const OP_OVERHEAD: f64 = 0.2;
/// Work multiplier for operations running at half precision.
const FP16_FACTOR: f64 = 0.6;

/// Analytic cost model driven by the profile coefficients:
///
/// - energy / cost: total effective work times the profile coefficient
/// - latency: longest weighted path through the execution order divided by
///   the profile's performance coefficient
/// - performance: effective work per unit latency
/// - safety: the profile's safety score
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileCostModel;

impl ProfileCostModel {
    fn effective_work(graph: &Graph, scope: Option<&BTreeSet<NodeId>>) -> BTreeMap<NodeId, f64> {
        graph
            .operations()
            .filter(|n| scope.map_or(true, |s| s.contains(&n.id)))
            .filter_map(|n| {
                n.as_operation().map(|spec| {
                    let factor = if spec.precision() == Some(PRECISION_FP16) {
                        FP16_FACTOR
                    } else {
                        1.0
                    };
                    (n.id.clone(), spec.work() * factor + OP_OVERHEAD)
                })
            })
            .collect()
    }

    fn critical_path(graph: &Graph, work: &BTreeMap<NodeId, f64>) -> UeirResult<f64> {
        let mut finish: BTreeMap<NodeId, f64> = BTreeMap::new();
        let mut longest: f64 = 0.0;
        for id in graph.computational_order()? {
            let start = graph
                .predecessors(&id)
                .filter_map(|e| finish.get(&e.from))
                .fold(0.0_f64, |acc, &t| acc.max(t));
            let end = start + work.get(&id).copied().unwrap_or(0.0);
            longest = longest.max(end);
            finish.insert(id, end);
        }
        Ok(longest)
    }
}

impl Evaluator for ProfileCostModel {
    fn evaluate(
        &self,
        graph: &Graph,
        profile: &HardwareProfile,
        metric: Metric,
        scope: Option<&BTreeSet<NodeId>>,
    ) -> UeirResult<f64> {
        let work = Self::effective_work(graph, scope);
        let total: f64 = work.values().sum();
        let value = match metric {
            Metric::Energy => total * profile.energy_coefficient,
            Metric::Cost => total * profile.cost_coefficient,
            Metric::Latency => Self::critical_path(graph, &work)? / profile.performance_coefficient.max(f64::EPSILON),
            Metric::Performance => {
                let latency = Self::critical_path(graph, &work)? / profile.performance_coefficient.max(f64::EPSILON);
                if latency > 0.0 {
                    total / latency
                } else {
                    0.0
                }
            }
            Metric::Safety => profile.safety_score,
        };
        Ok(value)
    }
}

/// Objective values and constraint verdicts for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Raw objective values in binding order.
    pub objectives: Vec<f64>,
    /// Ids of the constraints the candidate violates.
    pub violated: Vec<NodeId>,
}

impl Evaluation {
    pub fn is_feasible(&self) -> bool {
        self.violated.is_empty()
    }
}

/// Score `graph` on `profile` against every bound constraint and objective.
pub fn evaluate_binding(
    evaluator: &dyn Evaluator,
    graph: &Graph,
    profile: &HardwareProfile,
    binding: &Binding,
) -> UeirResult<Evaluation> {
    let mut violated = Vec::new();
    for constraint in &binding.constraints {
        let value = evaluator.evaluate(graph, profile, constraint.predicate.metric, constraint.scope.as_ref())?;
        if !constraint.predicate.holds(value) {
            violated.push(constraint.id.clone());
        }
    }

    let objectives = binding
        .objectives
        .iter()
        .map(|o| evaluator.evaluate(graph, profile, o.objective.metric, o.scope.as_ref()))
        .collect::<UeirResult<Vec<_>>>()?;

    Ok(Evaluation { objectives, violated })
}
