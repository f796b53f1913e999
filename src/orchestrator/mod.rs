//! Orchestrator Module
//!
//! The pipeline coordinator and the hierarchy that feeds it.

pub mod collaborators;
pub mod hierarchy;
pub mod system;

pub use collaborators::{
    ExecutionBackend, ExecutionReport, FixedReasoner, InMemoryLearningRecorder, IntentContext, LearningRecord,
    LearningRecorder, ReasonedIntent, ReasoningLayer, SimulatedExecution,
};
pub use hierarchy::{HierarchyOrchestrator, IntentOutcome};
pub use system::{GraphMetadata, GraphRecord, UeirSystem};
