//! Candidate generation
//!
//! Produces semantically equivalent variants of a bound graph, one batch per
//! hardware profile. Generators must be pure: the same graph and profiles
//! always yield the same variants in the same order.

use std::sync::Arc;
use tracing::debug;

use crate::errors::UeirResult;
use crate::hardware::passes::{GraphRewrite, PrecisionReduction};
use crate::hardware::HardwareProfile;
use crate::ueir::Graph;

/// One candidate binding before evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub label: String,
    pub graph: Graph,
    pub profile: HardwareProfile,
}

pub trait CandidateGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, graph: &Graph, profiles: &[HardwareProfile]) -> UeirResult<Vec<Variant>>;
}

/// Pairs the graph with every profile, plus one variant per rewrite that
/// changes the graph on that profile.
pub struct HardwareSubstitution {
    rewrites: Vec<Arc<dyn GraphRewrite>>,
}

impl HardwareSubstitution {
    pub fn new(rewrites: Vec<Arc<dyn GraphRewrite>>) -> Self {
        Self { rewrites }
    }

    /// Substitution only, no rewrites.
    pub fn identity() -> Self {
        Self { rewrites: Vec::new() }
    }
}

impl Default for HardwareSubstitution {
    fn default() -> Self {
        Self::new(vec![Arc::new(PrecisionReduction)])
    }
}

impl CandidateGenerator for HardwareSubstitution {
    fn name(&self) -> &str {
        "hardware_substitution"
    }

    fn generate(&self, graph: &Graph, profiles: &[HardwareProfile]) -> UeirResult<Vec<Variant>> {
        let mut variants = Vec::new();
        for profile in profiles {
            variants.push(Variant {
                label: profile.id.clone(),
                graph: graph.clone(),
                profile: profile.clone(),
            });

            for rewrite in &self.rewrites {
                if !rewrite.can_rewrite(profile) {
                    continue;
                }
                if let Some(rewritten) = rewrite.rewrite(graph, profile)? {
                    variants.push(Variant {
                        label: format!("{}/{}", profile.id, rewrite.name()),
                        graph: rewritten,
                        profile: profile.clone(),
                    });
                }
            }
        }
        debug!("{} generated {} variants", self.name(), variants.len());
        Ok(variants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::CAP_FP16;
    use crate::ueir::node::PARAM_ALLOW_REDUCED_PRECISION;
    use crate::ueir::{build_base_graph, OperationSpec, StructuredIntent};

    fn graph() -> Graph {
        let intent = StructuredIntent::new().operation(
            "embed",
            OperationSpec::new("embed").with_param(PARAM_ALLOW_REDUCED_PRECISION, true),
        );
        build_base_graph(&intent).unwrap()
    }

    #[test]
    fn test_one_variant_per_profile_plus_rewrites() {
        let profiles = vec![
            HardwareProfile::new("cpu", 1.0, 1.0, 1.0),
            HardwareProfile::new("gpu", 2.0, 2.0, 8.0).with_capability(CAP_FP16),
        ];
        let variants = HardwareSubstitution::default().generate(&graph(), &profiles).unwrap();
        let labels: Vec<_> = variants.iter().map(|v| v.label.as_str()).collect();
        assert_eq!(labels, vec!["cpu", "gpu", "gpu/precision_reduction"]);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let profiles = vec![HardwareProfile::new("gpu", 2.0, 2.0, 8.0).with_capability(CAP_FP16)];
        let generator = HardwareSubstitution::default();
        assert_eq!(
            generator.generate(&graph(), &profiles).unwrap(),
            generator.generate(&graph(), &profiles).unwrap()
        );
    }

    #[test]
    fn test_identity_generator() {
        let profiles = vec![HardwareProfile::new("gpu", 2.0, 2.0, 8.0).with_capability(CAP_FP16)];
        assert_eq!(HardwareSubstitution::identity().generate(&graph(), &profiles).unwrap().len(), 1);
    }
}
