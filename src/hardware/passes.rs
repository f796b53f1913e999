//! Binding-specific graph rewrites
//!
//! Each pass maps a graph to a new graph with the same dependency and
//! data-flow relation between the surviving computational nodes. Passes are
//! pure functions of `(graph, profile)`; the solver also uses them to
//! generate candidate variants.

use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::{HardwareProfile, CAP_FP16, CAP_FUSION};
use crate::errors::{UeirError, UeirResult};
use crate::ueir::node::{PARAM_ALLOW_REDUCED_PRECISION, PARAM_PRECISION, PARAM_WORK};
use crate::ueir::{Edge, Graph, Node, NodeId, OperationSpec, ParamValue};

pub const PRECISION_FP32: &str = "fp32";
pub const PRECISION_FP16: &str = "fp16";

pub trait GraphRewrite: Send + Sync {
    /// Unique name of the pass
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// Whether the pass has anything to offer on `profile`
    fn can_rewrite(&self, profile: &HardwareProfile) -> bool;
    /// Rewrite `graph` for `profile`. `Ok(None)` means nothing changed.
    fn rewrite(&self, graph: &Graph, profile: &HardwareProfile) -> UeirResult<Option<Graph>>;
}

/// Swap operations whose required capabilities the profile lacks for their
/// fallback encoding.
pub struct CapabilityResolution;

impl GraphRewrite for CapabilityResolution {
    fn name(&self) -> &str {
        "capability_resolution"
    }

    fn description(&self) -> &str {
        "Replace operations needing missing capabilities with their fallback encoding"
    }

    fn can_rewrite(&self, _profile: &HardwareProfile) -> bool {
        true
    }

    fn rewrite(&self, graph: &Graph, profile: &HardwareProfile) -> UeirResult<Option<Graph>> {
        let mut next = graph.clone();
        let mut changed = false;

        for node in graph.operations() {
            let Some(spec) = node.as_operation() else { continue };
            let missing = spec.requires.iter().find(|cap| !profile.supports(cap));
            let Some(capability) = missing else { continue };

            let Some(fallback) = &spec.fallback else {
                return Err(UeirError::UnsupportedHardware {
                    operation: node.id.clone(),
                    capability: capability.clone(),
                    profile: profile.id.clone(),
                });
            };

            let resolved = OperationSpec {
                op: fallback.clone(),
                params: spec.params.clone(),
                inputs: spec.inputs.clone(),
                outputs: spec.outputs.clone(),
                requires: BTreeSet::new(),
                fallback: None,
            };
            let mut replacement = Node::operation(node.id.clone(), resolved);
            replacement.extensions = node.extensions.clone();
            replacement
                .extensions
                .insert("fallback_from".to_string(), json!(spec.op));
            next.replace_node(replacement)?;
            debug!("{}: '{}' falls back to '{}' on {}", self.name(), node.id, fallback, profile.id);
            changed = true;
        }

        Ok(changed.then_some(next))
    }
}

/// Run tolerant fp32 operations at fp16 on profiles that support it.
pub struct PrecisionReduction;

impl GraphRewrite for PrecisionReduction {
    fn name(&self) -> &str {
        "precision_reduction"
    }

    fn description(&self) -> &str {
        "Lower precision-tolerant operations to fp16"
    }

    fn can_rewrite(&self, profile: &HardwareProfile) -> bool {
        profile.supports(CAP_FP16)
    }

    fn rewrite(&self, graph: &Graph, profile: &HardwareProfile) -> UeirResult<Option<Graph>> {
        if !self.can_rewrite(profile) {
            return Ok(None);
        }

        let mut next = graph.clone();
        let mut changed = false;
        for node in graph.operations() {
            let Some(spec) = node.as_operation() else { continue };
            if !spec.allows_reduced_precision() || spec.precision() == Some(PRECISION_FP16) {
                continue;
            }
            let mut lowered = node.clone();
            if let crate::ueir::NodePayload::Operation(op) = &mut lowered.payload {
                op.params
                    .insert(PARAM_PRECISION.to_string(), ParamValue::from(PRECISION_FP16));
            }
            next.replace_node(lowered)?;
            changed = true;
        }
        Ok(changed.then_some(next))
    }
}

/// Fuse chains of two operations where the first feeds only the second and
/// the second is fed only by the first.
pub struct OperatorFusion;

impl OperatorFusion {
    fn ordering_targets(graph: &Graph, id: &str) -> BTreeSet<NodeId> {
        graph.successors(id).map(|e| e.to.clone()).collect()
    }

    fn ordering_sources(graph: &Graph, id: &str) -> BTreeSet<NodeId> {
        graph.predecessors(id).map(|e| e.from.clone()).collect()
    }

    /// Fused operation for `a` followed by `b`, or `None` when the two cannot be
    /// merged without changing their interface.
    fn merge_specs(graph: &Graph, a_id: &str, a: &OperationSpec, b_id: &str, b: &OperationSpec) -> Option<OperationSpec> {
        if a.requires != b.requires
            || a.fallback.is_some()
            || b.fallback.is_some()
            || a.precision() != b.precision()
            || a.allows_reduced_precision() != b.allows_reduced_precision()
        {
            return None;
        }

        let internal: BTreeSet<&str> = graph
            .successors(a_id)
            .filter(|e| e.to == b_id)
            .filter_map(|e| e.value.as_ref().map(|v| v.name.as_str()))
            .collect();

        let mut inputs = a.inputs.clone();
        for (name, type_tag) in &b.inputs {
            if internal.contains(name.as_str()) {
                continue;
            }
            match inputs.get(name) {
                Some(existing) if existing != type_tag => return None,
                _ => {
                    inputs.insert(name.clone(), type_tag.clone());
                }
            }
        }

        let mut outputs = b.outputs.clone();
        for (name, type_tag) in &a.outputs {
            if internal.contains(name.as_str()) {
                continue;
            }
            match outputs.get(name) {
                Some(existing) if existing != type_tag => return None,
                _ => {
                    outputs.insert(name.clone(), type_tag.clone());
                }
            }
        }

        let reserved = [PARAM_WORK, PARAM_PRECISION, PARAM_ALLOW_REDUCED_PRECISION];
        let mut params = BTreeMap::new();
        for (owner, spec) in [(a_id, a), (b_id, b)] {
            for (key, value) in &spec.params {
                if !reserved.contains(&key.as_str()) {
                    params.insert(format!("{}.{}", owner, key), value.clone());
                }
            }
        }
        params.insert(PARAM_WORK.to_string(), ParamValue::from(a.work() + b.work()));
        if let Some(precision) = a.precision() {
            params.insert(PARAM_PRECISION.to_string(), ParamValue::from(precision));
        }
        if a.allows_reduced_precision() {
            params.insert(PARAM_ALLOW_REDUCED_PRECISION.to_string(), ParamValue::from(true));
        }

        Some(OperationSpec {
            op: format!("fused({},{})", a.op, b.op),
            params,
            inputs,
            outputs,
            requires: a.requires.clone(),
            fallback: None,
        })
    }

    fn fuse_pair(graph: &Graph, a_id: &str, b_id: &str) -> UeirResult<Option<Graph>> {
        let (Some(a), Some(b)) = (
            graph.node(a_id).and_then(Node::as_operation),
            graph.node(b_id).and_then(Node::as_operation),
        ) else {
            return Ok(None);
        };

        let fused_id = format!("{}+{}", a_id, b_id);
        if graph.contains(&fused_id) {
            return Ok(None);
        }
        let Some(spec) = Self::merge_specs(graph, a_id, a, b_id, b) else {
            return Ok(None);
        };

        let touching: Vec<Edge> = graph
            .edges()
            .filter(|e| e.from == a_id || e.from == b_id || e.to == a_id || e.to == b_id)
            .cloned()
            .collect();

        let mut next = graph.clone();
        next.remove_node(a_id);
        next.remove_node(b_id);
        next.insert_node(
            Node::operation(fused_id.clone(), spec).with_extension("fused_from", json!([a_id, b_id])),
        )?;

        let rename = |id: &str| -> NodeId {
            if id == a_id || id == b_id {
                fused_id.clone()
            } else {
                id.to_string()
            }
        };
        for edge in touching {
            let from = rename(&edge.from);
            let to = rename(&edge.to);
            if from == to {
                continue;
            }
            let rewired = Edge { from, to, ..edge };
            if next.insert_edge(rewired).is_err() {
                return Ok(None);
            }
        }

        if next.validate().is_err() {
            return Ok(None);
        }
        Ok(Some(next))
    }
}

impl GraphRewrite for OperatorFusion {
    fn name(&self) -> &str {
        "operator_fusion"
    }

    fn description(&self) -> &str {
        "Fuse single-producer/single-consumer operation chains"
    }

    fn can_rewrite(&self, profile: &HardwareProfile) -> bool {
        profile.supports(CAP_FUSION)
    }

    fn rewrite(&self, graph: &Graph, profile: &HardwareProfile) -> UeirResult<Option<Graph>> {
        if !self.can_rewrite(profile) {
            return Ok(None);
        }

        let mut current = graph.clone();
        let mut changed = false;
        loop {
            let mut fused = None;
            for a_id in current.topological_order()? {
                let targets = Self::ordering_targets(&current, &a_id);
                let Some(b_id) = targets.iter().next().filter(|_| targets.len() == 1) else {
                    continue;
                };
                if Self::ordering_sources(&current, b_id).len() != 1 {
                    continue;
                }
                if let Some(next) = Self::fuse_pair(&current, &a_id, b_id)? {
                    debug!("{}: fused '{}' and '{}'", self.name(), a_id, b_id);
                    fused = Some(next);
                    break;
                }
            }
            match fused {
                Some(next) => {
                    current = next;
                    changed = true;
                }
                None => break,
            }
        }
        Ok(changed.then_some(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::binder::ConstraintDecl;
    use crate::ueir::{build_base_graph, Comparator, Metric, Predicate, StructuredIntent};

    fn chain() -> Graph {
        let intent = StructuredIntent::new()
            .data("input", "csv", None)
            .operation(
                "load",
                OperationSpec::new("load_csv")
                    .with_param(PARAM_WORK, 2.0)
                    .with_input("source", "csv")
                    .with_output("rows", "table"),
            )
            .operation(
                "clean",
                OperationSpec::new("dedupe")
                    .with_input("rows", "table")
                    .with_output("clean_rows", "table"),
            )
            .operation("report", OperationSpec::new("summarize").with_input("clean_rows", "table"))
            .flow("input", "load", "source", "csv")
            .flow("load", "clean", "rows", "table")
            .flow("clean", "report", "clean_rows", "table");
        build_base_graph(&intent).unwrap()
    }

    #[test]
    fn test_fusion_collapses_chain() {
        let profile = HardwareProfile::new("accel", 1.0, 1.0, 1.0).with_capability(CAP_FUSION);
        let fused = OperatorFusion.rewrite(&chain(), &profile).unwrap().unwrap();

        let ops: Vec<_> = fused.operations().map(|n| n.id.clone()).collect();
        assert_eq!(ops, vec!["load+clean+report".to_string()]);
        let spec = fused.node("load+clean+report").and_then(Node::as_operation).unwrap();
        assert_eq!(spec.work(), 4.0);
        assert_eq!(spec.inputs.get("source").map(String::as_str), Some("csv"));
        // the data source still feeds the fused operation
        assert!(fused.edges().any(|e| e.from == "input" && e.to == "load+clean+report"));
    }

    #[test]
    fn test_fusion_skipped_without_capability() {
        let profile = HardwareProfile::new("cpu", 1.0, 1.0, 1.0);
        assert!(OperatorFusion.rewrite(&chain(), &profile).unwrap().is_none());
    }

    #[test]
    fn test_fusion_rewires_annotations() {
        let bound = bind(
            &chain(),
            &[ConstraintDecl::new(Predicate::new(Metric::Latency, Comparator::Lt, 10.0)).on("clean")],
            &[],
        )
        .unwrap();
        let profile = HardwareProfile::new("accel", 1.0, 1.0, 1.0).with_capability(CAP_FUSION);
        let fused = OperatorFusion.rewrite(&bound, &profile).unwrap().unwrap();
        let constraint = fused.nodes_of(crate::ueir::NodeKind::Constraint).next().unwrap();
        assert_eq!(
            fused.annotation_targets(&constraint.id),
            BTreeSet::from(["load+clean+report".to_string()])
        );
    }

    #[test]
    fn test_fusion_respects_fan_out() {
        let intent = StructuredIntent::new()
            .operation("a", OperationSpec::new("split"))
            .operation("b", OperationSpec::new("left"))
            .operation("c", OperationSpec::new("right"))
            .depends("a", "b")
            .depends("a", "c");
        let graph = build_base_graph(&intent).unwrap();
        let profile = HardwareProfile::new("accel", 1.0, 1.0, 1.0).with_capability(CAP_FUSION);
        assert!(OperatorFusion.rewrite(&graph, &profile).unwrap().is_none());
    }

    #[test]
    fn test_capability_resolution() {
        let intent = StructuredIntent::new()
            .operation("train", OperationSpec::new("train_gpu").requires("gpu").with_fallback("train_cpu"))
            .operation("infer", OperationSpec::new("infer"))
            .depends("train", "infer");
        let graph = build_base_graph(&intent).unwrap();

        let gpu = HardwareProfile::new("gpu", 1.0, 1.0, 1.0).with_capability("gpu");
        assert!(CapabilityResolution.rewrite(&graph, &gpu).unwrap().is_none());

        let cpu = HardwareProfile::new("cpu", 1.0, 1.0, 1.0);
        let resolved = CapabilityResolution.rewrite(&graph, &cpu).unwrap().unwrap();
        let train = resolved.node("train").unwrap();
        assert_eq!(train.as_operation().unwrap().op, "train_cpu");
        assert_eq!(train.extensions.get("fallback_from"), Some(&json!("train_gpu")));
        assert_eq!(resolved.topological_order().unwrap(), graph.topological_order().unwrap());
    }

    #[test]
    fn test_capability_without_fallback_fails() {
        let intent = StructuredIntent::new().operation("train", OperationSpec::new("train_gpu").requires("gpu"));
        let graph = build_base_graph(&intent).unwrap();
        let err = CapabilityResolution
            .rewrite(&graph, &HardwareProfile::new("cpu", 1.0, 1.0, 1.0))
            .unwrap_err();
        assert_eq!(
            err,
            UeirError::UnsupportedHardware {
                operation: "train".into(),
                capability: "gpu".into(),
                profile: "cpu".into(),
            }
        );
    }

    #[test]
    fn test_precision_reduction_only_tolerant_ops() {
        let intent = StructuredIntent::new()
            .operation(
                "embed",
                OperationSpec::new("embed")
                    .with_param(PARAM_PRECISION, PRECISION_FP32)
                    .with_param(PARAM_ALLOW_REDUCED_PRECISION, true),
            )
            .operation("audit", OperationSpec::new("audit").with_param(PARAM_PRECISION, PRECISION_FP32));
        let graph = build_base_graph(&intent).unwrap();
        let profile = HardwareProfile::new("gpu", 1.0, 1.0, 1.0).with_capability(CAP_FP16);

        let lowered = PrecisionReduction.rewrite(&graph, &profile).unwrap().unwrap();
        let precision = |g: &Graph, id: &str| g.node(id).and_then(Node::as_operation).and_then(|s| s.precision().map(str::to_string));
        assert_eq!(precision(&lowered, "embed").as_deref(), Some(PRECISION_FP16));
        assert_eq!(precision(&lowered, "audit").as_deref(), Some(PRECISION_FP32));

        // idempotent
        assert!(PrecisionReduction.rewrite(&lowered, &profile).unwrap().is_none());
    }
}
