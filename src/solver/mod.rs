//! Multi-Objective Solver
//!
//! Generates candidate bindings of a bound graph onto hardware profiles,
//! evaluates them against the bound constraints and objectives, and keeps
//! the feasible non-dominated ones.

pub mod evaluate;
pub mod generator;
pub mod pareto;
pub mod selection;

pub use evaluate::{evaluate_binding, Evaluation, Evaluator, ProfileCostModel};
pub use generator::{CandidateGenerator, HardwareSubstitution, Variant};
pub use pareto::{dominates, Candidate, ParetoFront};
pub use selection::Normalization;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::binder::{Binding, Preferences};
use crate::config::SolverConfig;
use crate::errors::{UeirError, UeirResult};
use crate::hardware::passes::{CapabilityResolution, GraphRewrite};
use crate::hardware::HardwareProfile;
use crate::ueir::Graph;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverStats {
    pub generated: usize,
    pub evaluated: usize,
    pub infeasible: usize,
    /// Candidates dropped because their profile cannot run the graph.
    #[serde(default)]
    pub unsupported: usize,
    pub front_size: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub front: ParetoFront,
    pub stats: SolverStats,
}

pub struct MultiObjectiveSolver {
    generator: Arc<dyn CandidateGenerator>,
    evaluator: Arc<dyn Evaluator>,
    config: SolverConfig,
}

enum Scored {
    Runnable(Variant, Evaluation),
    /// The profile lacks a capability the variant needs and has no fallback.
    Unsupported(UeirError),
}

// Variants are scored as they would run: operations the profile cannot
// execute natively are swapped for their fallback first.
fn score_variant(evaluator: &dyn Evaluator, binding: &Binding, variant: Variant) -> UeirResult<Scored> {
    let variant = match CapabilityResolution.rewrite(&variant.graph, &variant.profile) {
        Ok(Some(resolved)) => Variant {
            graph: resolved,
            ..variant
        },
        Ok(None) => variant,
        Err(e @ UeirError::UnsupportedHardware { .. }) => {
            debug!("{} cannot run: {}", variant.label, e);
            return Ok(Scored::Unsupported(e));
        }
        Err(e) => return Err(e),
    };
    let evaluation = evaluate_binding(evaluator, &variant.graph, &variant.profile, binding)?;
    Ok(Scored::Runnable(variant, evaluation))
}

impl MultiObjectiveSolver {
    pub fn new(generator: Arc<dyn CandidateGenerator>, evaluator: Arc<dyn Evaluator>, config: SolverConfig) -> Self {
        Self {
            generator,
            evaluator,
            config,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    async fn evaluate_all(&self, binding: &Binding, variants: Vec<Variant>) -> UeirResult<Vec<Scored>> {
        if !self.config.parallel_evaluation {
            return variants
                .into_iter()
                .map(|v| score_variant(self.evaluator.as_ref(), binding, v))
                .collect();
        }

        let binding = Arc::new(binding.clone());
        let tasks = variants.into_iter().map(|variant| {
            let evaluator = self.evaluator.clone();
            let binding = binding.clone();
            tokio::task::spawn_blocking(move || score_variant(evaluator.as_ref(), &binding, variant))
        });
        // join_all keeps generation order regardless of completion order
        join_all(tasks).await.into_iter().map(|joined| joined?).collect()
    }

    /// Compute the Pareto front of feasible candidates for `graph`.
    pub async fn solve(&self, graph: &Graph, profiles: &[HardwareProfile]) -> UeirResult<SolveOutcome> {
        let started = Instant::now();
        let binding = Binding::of(graph);

        let mut variants = self.generator.generate(graph, profiles)?;
        let generated = variants.len();
        if generated > self.config.max_candidates {
            warn!(
                "{} produced {} candidates, keeping the first {}",
                self.generator.name(),
                generated,
                self.config.max_candidates
            );
            variants.truncate(self.config.max_candidates);
        }

        let scored = self.evaluate_all(&binding, variants).await?;
        let evaluated = scored.len();

        let mut front = ParetoFront::new();
        let mut infeasible = 0;
        let mut unsupported = Vec::new();
        for (index, scored) in scored.into_iter().enumerate() {
            let (variant, evaluation) = match scored {
                Scored::Runnable(variant, evaluation) => (variant, evaluation),
                Scored::Unsupported(e) => {
                    unsupported.push(e);
                    continue;
                }
            };
            if !evaluation.is_feasible() {
                debug!("{} violates {:?}", variant.label, evaluation.violated);
                infeasible += 1;
                continue;
            }
            let normalized = binding
                .objectives
                .iter()
                .zip(&evaluation.objectives)
                .map(|(o, v)| o.objective.normalize(*v))
                .collect();
            front.insert(Candidate {
                index,
                label: variant.label,
                graph: variant.graph,
                profile: variant.profile,
                objectives: evaluation.objectives,
                normalized,
            });
        }

        // no profile can run the graph at all
        if evaluated > 0 && unsupported.len() == evaluated {
            let first = unsupported.swap_remove(0);
            warn!("No candidate profile can run the graph: {}", first);
            return Err(first);
        }

        let stats = SolverStats {
            generated,
            evaluated,
            infeasible,
            unsupported: unsupported.len(),
            front_size: front.len(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Solved: {} generated, {} infeasible, {} unsupported, front of {}",
            stats.generated, stats.infeasible, stats.unsupported, stats.front_size
        );
        Ok(SolveOutcome { front, stats })
    }

    /// Weights aligned with the objective vector of `graph`'s binding.
    pub fn weights(graph: &Graph, preferences: &Preferences) -> Vec<f64> {
        Binding::of(graph)
            .objectives
            .iter()
            .map(|o| preferences.weight_for(&o.objective))
            .collect()
    }

    /// Pick one candidate from a solved front.
    pub fn select<'a>(&self, outcome: &'a SolveOutcome, weights: &[f64]) -> UeirResult<&'a Candidate> {
        if outcome.front.is_empty() {
            return Err(UeirError::Infeasible {
                evaluated: outcome.stats.evaluated,
            });
        }
        selection::select(&outcome.front, weights, self.config.normalization)
    }
}

impl Default for MultiObjectiveSolver {
    fn default() -> Self {
        Self::new(
            Arc::new(HardwareSubstitution::default()),
            Arc::new(ProfileCostModel),
            SolverConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{bind, ConstraintDecl};
    use crate::hardware::CAP_FP16;
    use crate::ueir::node::{PARAM_ALLOW_REDUCED_PRECISION, PARAM_WORK};
    use crate::ueir::{build_base_graph, Comparator, Metric, Objective, OperationSpec, Predicate, StructuredIntent};

    fn bound(latency_limit: f64) -> Graph {
        let intent = StructuredIntent::new()
            .operation(
                "extract",
                OperationSpec::new("extract")
                    .with_param(PARAM_WORK, 4.0)
                    .with_param(PARAM_ALLOW_REDUCED_PRECISION, true),
            )
            .operation("load", OperationSpec::new("load").with_param(PARAM_WORK, 2.0))
            .depends("extract", "load");
        bind(
            &build_base_graph(&intent).unwrap(),
            &[ConstraintDecl::new(Predicate::new(Metric::Latency, Comparator::Lt, latency_limit))],
            &[
                Objective::minimize(Metric::Energy).into(),
                Objective::minimize(Metric::Cost).into(),
            ],
        )
        .unwrap()
    }

    fn profiles() -> Vec<HardwareProfile> {
        vec![
            HardwareProfile::new("cpu", 1.0, 0.5, 1.0),
            HardwareProfile::new("gpu", 3.0, 2.0, 8.0).with_capability(CAP_FP16),
            HardwareProfile::new("edge", 0.5, 0.2, 0.25),
        ]
    }

    #[tokio::test]
    async fn test_solve_filters_infeasible() {
        // edge latency = 6.4 / 0.25 = 25.6 breaks the limit
        let outcome = MultiObjectiveSolver::default().solve(&bound(10.0), &profiles()).await.unwrap();
        assert_eq!(outcome.stats.generated, 4);
        assert_eq!(outcome.stats.infeasible, 1);
        assert!(outcome.front.members().iter().all(|c| c.profile.id != "edge"));
    }

    #[tokio::test]
    async fn test_parallel_and_sequential_agree() {
        let graph = bound(100.0);
        let parallel = MultiObjectiveSolver::default().solve(&graph, &profiles()).await.unwrap();
        let sequential = MultiObjectiveSolver::new(
            Arc::new(HardwareSubstitution::default()),
            Arc::new(ProfileCostModel),
            SolverConfig {
                parallel_evaluation: false,
                ..SolverConfig::default()
            },
        )
        .solve(&graph, &profiles())
        .await
        .unwrap();
        assert_eq!(parallel.front, sequential.front);
    }

    #[tokio::test]
    async fn test_candidate_bound_truncates() {
        let solver = MultiObjectiveSolver::new(
            Arc::new(HardwareSubstitution::default()),
            Arc::new(ProfileCostModel),
            SolverConfig {
                max_candidates: 2,
                ..SolverConfig::default()
            },
        );
        let outcome = solver.solve(&bound(100.0), &profiles()).await.unwrap();
        assert_eq!(outcome.stats.generated, 4);
        assert_eq!(outcome.stats.evaluated, 2);
    }

    fn gpu_only() -> Graph {
        let intent = StructuredIntent::new().operation(
            "train",
            OperationSpec::new("tensor_core_gemm").with_param(PARAM_WORK, 2.0).requires("gpu"),
        );
        bind(
            &build_base_graph(&intent).unwrap(),
            &[],
            &[Objective::minimize(Metric::Energy).into()],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_profiles_without_capability_never_enter_front() {
        let profiles = vec![
            HardwareProfile::new("cpu", 1.0, 1.0, 1.0),
            HardwareProfile::new("gpu", 3.0, 3.0, 8.0).with_capability("gpu"),
        ];
        let outcome = MultiObjectiveSolver::default().solve(&gpu_only(), &profiles).await.unwrap();
        assert_eq!(outcome.stats.unsupported, 1);
        assert_eq!(outcome.front.len(), 1);
        assert_eq!(outcome.front.members()[0].profile.id, "gpu");
    }

    #[tokio::test]
    async fn test_all_profiles_unsupported_names_missing_capability() {
        let profiles = vec![HardwareProfile::new("cpu", 1.0, 1.0, 1.0)];
        let err = MultiObjectiveSolver::default().solve(&gpu_only(), &profiles).await.unwrap_err();
        assert!(matches!(
            err,
            UeirError::UnsupportedHardware { ref capability, ref profile, .. } if capability == "gpu" && profile == "cpu"
        ));
    }

    #[tokio::test]
    async fn test_select_on_empty_front_is_infeasible() {
        let solver = MultiObjectiveSolver::default();
        let graph = bound(0.001);
        let outcome = solver.solve(&graph, &profiles()).await.unwrap();
        assert!(outcome.front.is_empty());
        let weights = MultiObjectiveSolver::weights(&graph, &Preferences::default());
        let err = solver.select(&outcome, &weights).unwrap_err();
        assert_eq!(err, UeirError::Infeasible { evaluated: 4 });
    }
}
