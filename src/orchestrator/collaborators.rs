//! Collaborator interfaces around the optimization core.
//!
//! The reasoning layer turns a message into a structured intent, the
//! execution backend runs the stored graph and the learning recorder keeps
//! the outcome. Each is an async trait with an `anyhow` boundary; the
//! orchestrator converts failures into `UeirError::Collaborator`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::binder::{Binding, ConstraintSet};
use crate::hardware::HardwareProfile;
use crate::solver::{evaluate_binding, Evaluator};
use crate::store::StoredResult;
use crate::ueir::{Metric, StructuredIntent};

/// Caller-supplied context for one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl IntentContext {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// What the reasoning layer extracts from a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasonedIntent {
    pub structured_intent: StructuredIntent,
    #[serde(default)]
    pub constraints: ConstraintSet,
}

#[async_trait]
pub trait ReasoningLayer: Send + Sync {
    async fn reason(&self, message: &str, context: &IntentContext) -> Result<ReasonedIntent>;
}

/// Measured outcome of running a stored graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub profile_id: String,
    pub metrics: BTreeMap<Metric, f64>,
    pub constraints_satisfied: bool,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, stored: &StoredResult) -> Result<ExecutionReport>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub message: String,
    pub graph_id: String,
    pub report: ExecutionReport,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
pub trait LearningRecorder: Send + Sync {
    async fn record(&self, message: &str, stored: &StoredResult, report: &ExecutionReport) -> Result<()>;
}

/// Reasoning layer that answers every message with the same intent.
pub struct FixedReasoner {
    intent: ReasonedIntent,
}

impl FixedReasoner {
    pub fn new(structured_intent: StructuredIntent, constraints: ConstraintSet) -> Self {
        Self {
            intent: ReasonedIntent {
                structured_intent,
                constraints,
            },
        }
    }
}

#[async_trait]
impl ReasoningLayer for FixedReasoner {
    async fn reason(&self, message: &str, _context: &IntentContext) -> Result<ReasonedIntent> {
        debug!("FixedReasoner handling '{}'", message);
        Ok(self.intent.clone())
    }
}

/// Execution backend that reports the cost model's predictions instead of
/// running anything.
pub struct SimulatedExecution {
    evaluator: Arc<dyn Evaluator>,
    profiles: Vec<HardwareProfile>,
}

impl SimulatedExecution {
    pub fn new(evaluator: Arc<dyn Evaluator>, profiles: Vec<HardwareProfile>) -> Self {
        Self { evaluator, profiles }
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedExecution {
    async fn execute(&self, stored: &StoredResult) -> Result<ExecutionReport> {
        let profile_id = &stored.metadata.profile_id;
        let profile = self
            .profiles
            .iter()
            .find(|p| &p.id == profile_id)
            .ok_or_else(|| anyhow!("no hardware profile named '{}'", profile_id))?;

        let graph = &stored.selected_graph;
        let mut metrics = BTreeMap::new();
        for metric in [
            Metric::Energy,
            Metric::Cost,
            Metric::Latency,
            Metric::Performance,
            Metric::Safety,
        ] {
            metrics.insert(metric, self.evaluator.evaluate(graph, profile, metric, None)?);
        }
        let evaluation = evaluate_binding(self.evaluator.as_ref(), graph, profile, &Binding::of(graph))?;

        Ok(ExecutionReport {
            profile_id: profile.id.clone(),
            metrics,
            constraints_satisfied: evaluation.is_feasible(),
        })
    }
}

/// Keeps every record in memory.
#[derive(Default)]
pub struct InMemoryLearningRecorder {
    records: RwLock<Vec<LearningRecord>>,
}

impl InMemoryLearningRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<LearningRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl LearningRecorder for InMemoryLearningRecorder {
    async fn record(&self, message: &str, stored: &StoredResult, report: &ExecutionReport) -> Result<()> {
        let mut records = self.records.write().await;
        records.push(LearningRecord {
            message: message.to_string(),
            graph_id: stored.graph_id.to_hex(),
            report: report.clone(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}
