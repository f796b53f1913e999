//! Hardware-Aware Post-Optimizer
//!
//! Specializes the selected graph for its target profile. Capability
//! resolution is mandatory; fusion and precision lowering are only kept when
//! they leave feasibility untouched and do not worsen the weighted
//! energy/cost score.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::passes::{CapabilityResolution, GraphRewrite, OperatorFusion, PrecisionReduction};
use super::HardwareProfile;
use crate::binder::Binding;
use crate::config::PostOptimizerConfig;
use crate::errors::UeirResult;
use crate::solver::evaluate::{evaluate_binding, Evaluator};
use crate::ueir::{Graph, Metric};

/// Outcome of specializing one graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialization {
    pub graph: Graph,
    /// Passes whose rewrite was kept, in application order.
    pub applied: Vec<String>,
    /// Passes that produced a rewrite which was then discarded.
    pub rejected: Vec<String>,
}

pub struct PostOptimizer {
    evaluator: Arc<dyn Evaluator>,
    config: PostOptimizerConfig,
}

impl PostOptimizer {
    pub fn new(evaluator: Arc<dyn Evaluator>, config: PostOptimizerConfig) -> Self {
        Self { evaluator, config }
    }

    fn optional_passes(&self) -> Vec<Box<dyn GraphRewrite>> {
        let mut passes: Vec<Box<dyn GraphRewrite>> = Vec::new();
        if self.config.enable_fusion {
            passes.push(Box::new(OperatorFusion));
        }
        if self.config.enable_precision {
            passes.push(Box::new(PrecisionReduction));
        }
        passes
    }

    /// Specialize `graph` for `profile` with the default energy/cost weights.
    pub fn specialize(&self, graph: &Graph, profile: &HardwareProfile) -> UeirResult<Graph> {
        Ok(self.specialize_with(graph, profile, &BTreeMap::new())?.graph)
    }

    pub fn specialize_with(
        &self,
        graph: &Graph,
        profile: &HardwareProfile,
        preferences: &BTreeMap<Metric, f64>,
    ) -> UeirResult<Specialization> {
        let mut applied = Vec::new();
        let mut rejected = Vec::new();

        let resolution = CapabilityResolution;
        let mut current = match resolution.rewrite(graph, profile)? {
            Some(resolved) => {
                applied.push(resolution.name().to_string());
                resolved
            }
            None => graph.clone(),
        };
        current.validate()?;

        let binding = Binding::of(&current);
        let mut feasible = evaluate_binding(self.evaluator.as_ref(), &current, profile, &binding)?.is_feasible();
        let mut score = self.weighted_score(&current, profile, preferences)?;

        for pass in self.optional_passes() {
            if !pass.can_rewrite(profile) {
                continue;
            }
            let Some(candidate) = pass.rewrite(&current, profile)? else {
                continue;
            };
            if candidate.validate().is_err() {
                rejected.push(pass.name().to_string());
                continue;
            }

            let candidate_feasible =
                evaluate_binding(self.evaluator.as_ref(), &candidate, profile, &Binding::of(&candidate))?
                    .is_feasible();
            let candidate_score = self.weighted_score(&candidate, profile, preferences)?;

            if candidate_feasible == feasible && candidate_score <= score {
                debug!("{} kept on {} ({:.4} -> {:.4})", pass.name(), profile.id, score, candidate_score);
                applied.push(pass.name().to_string());
                current = candidate;
                feasible = candidate_feasible;
                score = candidate_score;
            } else {
                debug!("{} rejected on {}", pass.name(), profile.id);
                rejected.push(pass.name().to_string());
            }
        }

        info!(
            "Specialized graph for {}: applied {:?}, rejected {:?}",
            profile.id, applied, rejected
        );
        Ok(Specialization {
            graph: current,
            applied,
            rejected,
        })
    }

    fn weighted_score(
        &self,
        graph: &Graph,
        profile: &HardwareProfile,
        preferences: &BTreeMap<Metric, f64>,
    ) -> UeirResult<f64> {
        let weights: Vec<(Metric, f64)> = if preferences.is_empty() {
            vec![(Metric::Energy, 1.0), (Metric::Cost, 1.0)]
        } else {
            preferences.iter().map(|(m, w)| (*m, *w)).collect()
        };

        let mut score = 0.0;
        for (metric, weight) in weights {
            let value = self.evaluator.evaluate(graph, profile, metric, None)?;
            // performance and safety are better when higher
            score += match metric {
                Metric::Performance | Metric::Safety => -weight * value,
                _ => weight * value,
            };
        }
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{bind, ConstraintDecl};
    use crate::errors::UeirError;
    use crate::hardware::{CAP_FP16, CAP_FUSION};
    use crate::solver::evaluate::ProfileCostModel;
    use crate::ueir::node::{PARAM_ALLOW_REDUCED_PRECISION, PARAM_WORK};
    use crate::ueir::{build_base_graph, Comparator, OperationSpec, Predicate, StructuredIntent};

    fn optimizer() -> PostOptimizer {
        PostOptimizer::new(Arc::new(ProfileCostModel), PostOptimizerConfig::default())
    }

    fn pipeline() -> Graph {
        let intent = StructuredIntent::new()
            .operation(
                "embed",
                OperationSpec::new("embed")
                    .with_param(PARAM_WORK, 4.0)
                    .with_param(PARAM_ALLOW_REDUCED_PRECISION, true),
            )
            .operation(
                "score",
                OperationSpec::new("score")
                    .with_param(PARAM_WORK, 2.0)
                    .with_param(PARAM_ALLOW_REDUCED_PRECISION, true),
            )
            .depends("embed", "score");
        let graph = build_base_graph(&intent).unwrap();
        bind(
            &graph,
            &[ConstraintDecl::new(Predicate::new(Metric::Latency, Comparator::Lt, 100.0))],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_specialize_applies_profitable_passes() {
        let profile = HardwareProfile::new("accel", 1.0, 1.0, 2.0)
            .with_capability(CAP_FUSION)
            .with_capability(CAP_FP16);
        let result = optimizer().specialize_with(&pipeline(), &profile, &BTreeMap::new()).unwrap();
        assert_eq!(result.applied, vec!["operator_fusion", "precision_reduction"]);
        assert!(result.rejected.is_empty());
        assert_eq!(result.graph.topological_order().unwrap().len(), 1);
    }

    #[test]
    fn test_specialize_preserves_feasibility() {
        let profile = HardwareProfile::new("accel", 1.0, 1.0, 2.0).with_capability(CAP_FUSION);
        let graph = pipeline();
        let specialized = optimizer().specialize(&graph, &profile).unwrap();
        let before = evaluate_binding(&ProfileCostModel, &graph, &profile, &Binding::of(&graph)).unwrap();
        let after = evaluate_binding(&ProfileCostModel, &specialized, &profile, &Binding::of(&specialized)).unwrap();
        assert_eq!(before.is_feasible(), after.is_feasible());
    }

    #[test]
    fn test_specialize_is_noop_on_plain_profile() {
        let profile = HardwareProfile::new("cpu", 1.0, 1.0, 1.0);
        let graph = pipeline();
        let result = optimizer().specialize_with(&graph, &profile, &BTreeMap::new()).unwrap();
        assert_eq!(result.graph, graph);
        assert!(result.applied.is_empty());
    }

    #[test]
    fn test_specialize_unsupported_hardware() {
        let intent = StructuredIntent::new().operation("t", OperationSpec::new("tensor_core").requires("gpu"));
        let graph = build_base_graph(&intent).unwrap();
        let err = optimizer()
            .specialize(&graph, &HardwareProfile::new("cpu", 1.0, 1.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, UeirError::UnsupportedHardware { ref capability, .. } if capability == "gpu"));
    }

    #[test]
    fn test_disabled_passes_are_skipped() {
        let profile = HardwareProfile::new("accel", 1.0, 1.0, 2.0)
            .with_capability(CAP_FUSION)
            .with_capability(CAP_FP16);
        let config = PostOptimizerConfig {
            enable_fusion: false,
            enable_precision: false,
        };
        let optimizer = PostOptimizer::new(Arc::new(ProfileCostModel), config);
        let graph = pipeline();
        assert_eq!(optimizer.specialize(&graph, &profile).unwrap(), graph);
    }
}
