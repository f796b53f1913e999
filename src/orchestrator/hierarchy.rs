//! Hierarchy Orchestrator
//!
//! One request end to end: the reasoning layer structures the message, the
//! system optimizes it, the execution backend runs the selected graph and the
//! learning recorder keeps the outcome.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::collaborators::{ExecutionBackend, ExecutionReport, IntentContext, LearningRecorder, ReasoningLayer};
use super::system::UeirSystem;
use crate::errors::{UeirError, UeirResult};
use crate::store::StoredResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentOutcome {
    pub request_id: Uuid,
    pub stored: StoredResult,
    pub execution: ExecutionReport,
}

/// Runs a message through reasoning, optimization, execution and learning.
///
/// Errors from any layer propagate unchanged; there is no fallback path.
pub struct HierarchyOrchestrator {
    reasoning: Arc<dyn ReasoningLayer>,
    system: Arc<UeirSystem>,
    execution: Arc<dyn ExecutionBackend>,
    learning: Arc<dyn LearningRecorder>,
}

impl HierarchyOrchestrator {
    pub fn new(
        reasoning: Arc<dyn ReasoningLayer>,
        system: Arc<UeirSystem>,
        execution: Arc<dyn ExecutionBackend>,
        learning: Arc<dyn LearningRecorder>,
    ) -> Self {
        Self {
            reasoning,
            system,
            execution,
            learning,
        }
    }

    pub fn system(&self) -> &Arc<UeirSystem> {
        &self.system
    }

    #[instrument(skip(self, context), fields(session = context.session_id.as_deref().unwrap_or("-")))]
    pub async fn process_intent(&self, message: &str, context: &IntentContext) -> UeirResult<IntentOutcome> {
        let request_id = Uuid::new_v4();
        info!("Processing intent {}", request_id);

        let reasoned = self
            .reasoning
            .reason(message, context)
            .await
            .map_err(|e| UeirError::collaborator("reasoning", e))?;

        let stored = self
            .system
            .optimize(&reasoned.structured_intent, &reasoned.constraints)
            .await?;

        let execution = self
            .execution
            .execute(&stored)
            .await
            .map_err(|e| UeirError::collaborator("execution", e))?;

        self.learning
            .record(message, &stored, &execution)
            .await
            .map_err(|e| UeirError::collaborator("learning", e))?;

        info!(
            "Intent {} ran on {} (constraints satisfied: {})",
            request_id, execution.profile_id, execution.constraints_satisfied
        );
        Ok(IntentOutcome {
            request_id,
            stored,
            execution,
        })
    }
}
