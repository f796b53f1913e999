//! UEIR complete workflow
//!
//! Runs a data-processing intent through the full hierarchy: reasoning,
//! optimization against a small hardware catalogue, simulated execution and
//! learning.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use ueir_engine::binder::{ConstraintDecl, ConstraintSet, Preferences};
use ueir_engine::config::ConfigManager;
use ueir_engine::hardware::{HardwareProfile, StaticHardwareCatalog, CAP_FP16, CAP_FUSION};
use ueir_engine::orchestrator::{
    FixedReasoner, HierarchyOrchestrator, InMemoryLearningRecorder, IntentContext, SimulatedExecution, UeirSystem,
};
use ueir_engine::solver::ProfileCostModel;
use ueir_engine::store::GraphStore;
use ueir_engine::ueir::node::{PARAM_ALLOW_REDUCED_PRECISION, PARAM_WORK};
use ueir_engine::ueir::{Comparator, Metric, Objective, OperationSpec, Predicate, StructuredIntent};
use ueir_engine::utils::init_logging;

// ──────────────────────────────────────────────────────────────────────────────
// WORKFLOW INPUTS
// ──────────────────────────────────────────────────────────────────────────────

fn anomaly_intent() -> StructuredIntent {
    StructuredIntent::new()
        .data("dataset", "csv", Some(serde_json::json!("sales_data_2024.csv")))
        .operation(
            "load",
            OperationSpec::new("load_csv")
                .with_param(PARAM_WORK, 2.0)
                .with_input("source", "csv")
                .with_output("rows", "table"),
        )
        .operation(
            "detect",
            OperationSpec::new("isolation_forest")
                .with_param(PARAM_WORK, 8.0)
                .with_param(PARAM_ALLOW_REDUCED_PRECISION, true)
                .with_input("rows", "table")
                .with_output("anomalies", "table")
                .requires("gpu")
                .with_fallback("isolation_forest_cpu"),
        )
        .flow("dataset", "load", "source", "csv")
        .flow("load", "detect", "rows", "table")
}

fn anomaly_constraints() -> ConstraintSet {
    ConstraintSet::new()
        .explicit(ConstraintDecl::new(Predicate::new(Metric::Latency, Comparator::Lt, 300.0)))
        .explicit(ConstraintDecl::new(Predicate::new(Metric::Cost, Comparator::Lt, 10.0)))
        .objective(Objective::minimize(Metric::Energy))
        .objective(Objective::minimize(Metric::Cost))
        .objective(Objective::minimize(Metric::Latency))
        .preferences(Preferences::new().with_weight(Metric::Energy, 2.0))
}

fn hardware_catalogue() -> Vec<HardwareProfile> {
    vec![
        HardwareProfile::new("aws", 1.5, 0.8, 4.0)
            .with_capability("gpu")
            .with_capability(CAP_FP16),
        HardwareProfile::new("gcp", 1.2, 0.6, 2.0).with_capability(CAP_FUSION),
        HardwareProfile::new("hybrid", 0.9, 0.4, 1.0)
            .with_capability(CAP_FUSION)
            .with_capability(CAP_FP16)
            .with_safety(0.9),
    ]
}

// ──────────────────────────────────────────────────────────────────────────────
// MAIN ENTRY POINT
// ──────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging("ueir_engine=info,ueir=info")?;

    let config_path = std::env::var("UEIR_CONFIG").unwrap_or_else(|_| "ueir.json".to_string());
    let config = ConfigManager::new(&config_path).load().await?;
    info!("Loaded config from {}", config_path);

    let catalogue = hardware_catalogue();
    let store = Arc::new(GraphStore::from_config(&config.store).await?);
    let system = Arc::new(UeirSystem::new(
        config,
        Arc::new(StaticHardwareCatalog::new(catalogue.clone()).with_preference(Metric::Energy, 1.0)),
        store,
    ));

    let learning = Arc::new(InMemoryLearningRecorder::new());
    let orchestrator = HierarchyOrchestrator::new(
        Arc::new(FixedReasoner::new(anomaly_intent(), anomaly_constraints())),
        system.clone(),
        Arc::new(SimulatedExecution::new(Arc::new(ProfileCostModel), catalogue)),
        learning.clone(),
    );

    println!("\n{}", "═".repeat(60));
    println!("UEIR complete workflow");
    println!("{}\n", "═".repeat(60));

    let context = IntentContext::session("example_session")
        .with_attribute("dataset", serde_json::json!("sales_data_2024.csv"));
    let outcome = orchestrator
        .process_intent("Process this dataset and find anomalies", &context)
        .await?;

    let meta = &outcome.stored.metadata;
    println!("Request:        {}", outcome.request_id);
    println!("Graph ID:       {}", outcome.stored.graph_id);
    println!("Hardware:       {}", meta.profile_id);
    println!("Pareto front:   {} of {} candidates", meta.pareto_front_size, meta.optimization_stats.generated);
    println!("Passes applied: {:?}", meta.applied_passes);
    for (metric, value) in &outcome.execution.metrics {
        println!("  → {:<12} {:.3}", metric, value);
    }
    println!("Constraints satisfied: {}", outcome.execution.constraints_satisfied);

    // same request again is served from the store
    orchestrator
        .process_intent("Process this dataset and find anomalies", &context)
        .await?;
    println!(
        "\nRepeat request: {} computation(s), {} learning record(s)",
        system.store().computations(),
        learning.records().await.len()
    );

    Ok(())
}
