//! UEIR Engine
//!
//! Optimization core for the Universal Execution Intermediate Representation:
//! - Content-addressed execution graphs (operations, data, constraints, objectives)
//! - Constraint & objective binding
//! - Multi-objective solving with Pareto selection
//! - Hardware-aware specialization
//! - Single-flight result store

pub mod binder;
pub mod config;
pub mod errors;
pub mod hardware;
pub mod orchestrator;
pub mod solver;
pub mod store;
pub mod ueir;
pub mod utils;

// Re-exports for convenience
pub use binder::{bind, ConstraintDecl, ConstraintSet, ObjectiveDecl, Preferences};
pub use config::{ConfigManager, UeirConfig};
pub use errors::{UeirError, UeirResult};
pub use hardware::{HardwareProfile, HardwareSelector, PostOptimizer, StaticHardwareCatalog};
pub use orchestrator::{HierarchyOrchestrator, UeirSystem};
pub use solver::{MultiObjectiveSolver, Normalization, ParetoFront};
pub use store::{GraphStore, StoredResult};
pub use ueir::{build_base_graph, Fingerprint, Graph, StructuredIntent};
