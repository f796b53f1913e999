//! Hardware Module
//!
//! Hardware profiles supplied by the hardware-selection collaborator, the
//! binding-specific rewrite passes and the post-optimizer that applies them.

pub mod passes;
pub mod post_optimizer;

pub use passes::{CapabilityResolution, GraphRewrite, OperatorFusion, PrecisionReduction};
pub use post_optimizer::{PostOptimizer, Specialization};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::ueir::{Graph, Metric};

/// Profile capability enabling operator fusion.
pub const CAP_FUSION: &str = "fusion";
/// Profile capability enabling half-precision execution.
pub const CAP_FP16: &str = "fp16";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub id: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Energy per unit of work.
    pub energy_coefficient: f64,
    /// Cost per unit of work.
    pub cost_coefficient: f64,
    /// Units of work per unit of time.
    pub performance_coefficient: f64,
    #[serde(default = "default_safety")]
    pub safety_score: f64,
}

fn default_safety() -> f64 {
    1.0
}

impl HardwareProfile {
    pub fn new(id: impl Into<String>, energy: f64, cost: f64, performance: f64) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::new(),
            energy_coefficient: energy,
            cost_coefficient: cost,
            performance_coefficient: performance,
            safety_score: 1.0,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_safety(mut self, score: f64) -> Self {
        self.safety_score = score;
        self
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// What the hardware-selection collaborator hands over for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareContext {
    pub profiles: Vec<HardwareProfile>,
    /// Weights the post-optimizer uses when deciding whether a rewrite pays off.
    #[serde(default)]
    pub cost_energy_preferences: BTreeMap<Metric, f64>,
}

/// Hardware-selection collaborator.
#[async_trait]
pub trait HardwareSelector: Send + Sync {
    /// Offer hardware candidates for binding `graph`.
    async fn candidates(&self, graph: &Graph) -> Result<HardwareContext>;
}

/// Fixed catalogue of hardware, returned for every graph.
#[derive(Debug, Clone, Default)]
pub struct StaticHardwareCatalog {
    context: HardwareContext,
}

impl StaticHardwareCatalog {
    pub fn new(profiles: Vec<HardwareProfile>) -> Self {
        Self {
            context: HardwareContext {
                profiles,
                cost_energy_preferences: BTreeMap::new(),
            },
        }
    }

    pub fn with_preference(mut self, metric: Metric, weight: f64) -> Self {
        self.context.cost_energy_preferences.insert(metric, weight);
        self
    }
}

#[async_trait]
impl HardwareSelector for StaticHardwareCatalog {
    async fn candidates(&self, _graph: &Graph) -> Result<HardwareContext> {
        Ok(self.context.clone())
    }
}
