//! Pipeline Coordinator
//!
//! `optimize` runs build → bind → hardware selection → solve → select →
//! specialize, with the last three deduplicated through the graph store.
//! The first failing stage ends the call; nothing is retried here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::binder::{bind, ConstraintSet, ObjectiveDecl, Preferences};
use crate::config::{PostOptimizerConfig, SolverConfig, UeirConfig};
use crate::errors::{UeirError, UeirResult};
use crate::hardware::{HardwareContext, HardwareSelector, PostOptimizer};
use crate::solver::{CandidateGenerator, Evaluator, HardwareSubstitution, MultiObjectiveSolver, ProfileCostModel};
use crate::store::{GraphStore, ResultMetadata, StoredResult};
use crate::ueir::{build_base_graph, Fingerprint, Graph, StructuredIntent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub created_at: DateTime<Utc>,
    /// Fingerprint of the structured intent alone.
    pub intent_hash: Fingerprint,
    pub constraint_count: usize,
}

/// A bound graph that has not been optimized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    pub graph_id: Fingerprint,
    pub graph: Graph,
    pub metadata: GraphMetadata,
}

/// Everything besides the bound graph that changes the optimization result.
#[derive(Serialize)]
struct OptimizationKey<'a> {
    preferences: &'a Preferences,
    hardware: &'a HardwareContext,
    solver: &'a SolverConfig,
    post_optimizer: &'a PostOptimizerConfig,
}

pub struct UeirSystem {
    config: UeirConfig,
    solver: Arc<MultiObjectiveSolver>,
    post_optimizer: Arc<PostOptimizer>,
    hardware: Arc<dyn HardwareSelector>,
    store: Arc<GraphStore>,
}

impl UeirSystem {
    /// System with the default candidate generator and cost model.
    pub fn new(config: UeirConfig, hardware: Arc<dyn HardwareSelector>, store: Arc<GraphStore>) -> Self {
        Self::with_parts(
            config,
            Arc::new(HardwareSubstitution::default()),
            Arc::new(ProfileCostModel),
            hardware,
            store,
        )
    }

    pub fn with_parts(
        config: UeirConfig,
        generator: Arc<dyn CandidateGenerator>,
        evaluator: Arc<dyn Evaluator>,
        hardware: Arc<dyn HardwareSelector>,
        store: Arc<GraphStore>,
    ) -> Self {
        let solver = MultiObjectiveSolver::new(generator, evaluator.clone(), config.solver.clone());
        let post_optimizer = PostOptimizer::new(evaluator, config.post_optimizer.clone());
        Self {
            config,
            solver: Arc::new(solver),
            post_optimizer: Arc::new(post_optimizer),
            hardware,
            store,
        }
    }

    pub fn config(&self) -> &UeirConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Build and bind the graph for `intent` without optimizing it.
    ///
    /// The configured default objectives are bound when `constraints` names
    /// none.
    pub fn create_graph(&self, intent: &StructuredIntent, constraints: &ConstraintSet) -> UeirResult<GraphRecord> {
        let base = build_base_graph(intent)?;

        let objectives: Vec<ObjectiveDecl> = if constraints.optimization_objectives.is_empty() {
            debug!("No objectives requested, binding defaults");
            self.config
                .default_objectives
                .iter()
                .cloned()
                .map(ObjectiveDecl::from)
                .collect()
        } else {
            constraints.optimization_objectives.clone()
        };

        let graph = bind(&base, &constraints.constraints(), &objectives)?;
        let graph_id = graph.fingerprint()?;
        Ok(GraphRecord {
            graph_id,
            graph,
            metadata: GraphMetadata {
                created_at: Utc::now(),
                intent_hash: Fingerprint::of(intent)?,
                constraint_count: constraints.constraint_count(),
            },
        })
    }

    /// Optimize `intent` under `constraints`, reusing a stored result when
    /// the same inputs were optimized before.
    pub async fn optimize(&self, intent: &StructuredIntent, constraints: &ConstraintSet) -> UeirResult<StoredResult> {
        let record = self.create_graph(intent, constraints)?;

        let hardware = self
            .hardware
            .candidates(&record.graph)
            .await
            .map_err(|e| UeirError::collaborator("hardware_selection", e))?;

        let key = record.graph_id.extend(&OptimizationKey {
            preferences: &constraints.preferences,
            hardware: &hardware,
            solver: &self.config.solver,
            post_optimizer: &self.config.post_optimizer,
        })?;
        info!(
            "Optimizing graph {} ({} profiles) as {}",
            record.graph_id.short(),
            hardware.profiles.len(),
            key.short()
        );

        let solver = self.solver.clone();
        let post_optimizer = self.post_optimizer.clone();
        let preferences = constraints.preferences.clone();
        let graph = record.graph;

        self.store
            .get_or_compute(key, move || async move {
                let outcome = solver.solve(&graph, &hardware.profiles).await?;
                let weights = MultiObjectiveSolver::weights(&graph, &preferences);
                let chosen = solver.select(&outcome, &weights)?;
                info!("Selected {} with objectives {:?}", chosen.label, chosen.objectives);

                let specialization =
                    post_optimizer.specialize_with(&chosen.graph, &chosen.profile, &hardware.cost_energy_preferences)?;

                Ok(StoredResult {
                    graph_id: key,
                    selected_graph: specialization.graph,
                    metadata: ResultMetadata {
                        created_at: Utc::now(),
                        pareto_front_size: outcome.front.len(),
                        optimization_stats: outcome.stats.clone(),
                        profile_id: chosen.profile.id.clone(),
                        applied_passes: specialization.applied,
                    },
                })
            })
            .await
    }
}
