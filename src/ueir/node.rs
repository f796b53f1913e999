use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type NodeId = String;

/// Parameter key carrying the abstract amount of work an operation performs.
pub const PARAM_WORK: &str = "work";
/// Parameter key carrying the numeric precision an operation runs at.
pub const PARAM_PRECISION: &str = "precision";
/// Parameter key marking an operation as tolerant to reduced precision.
pub const PARAM_ALLOW_REDUCED_PRECISION: &str = "allow_reduced_precision";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Operation,
    Data,
    Constraint,
    Objective,
}

/// Measurable quantity a constraint bounds or an objective scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Energy,
    Cost,
    Latency,
    Performance,
    Safety,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Energy => write!(f, "energy"),
            Metric::Cost => write!(f, "cost"),
            Metric::Latency => write!(f, "latency"),
            Metric::Performance => write!(f, "performance"),
            Metric::Safety => write!(f, "safety"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => value < threshold,
            Comparator::Le => value <= threshold,
            Comparator::Gt => value > threshold,
            Comparator::Ge => value >= threshold,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Scalar operation parameter.
///
/// Whole finite floats are stored as `Int`, so `2` and `2.0` compare and
/// fingerprint alike.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

// i64 range where every integer is exactly representable as f64
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

fn whole(v: f64) -> Option<i64> {
    (v.is_finite() && v.fract() == 0.0 && v.abs() <= MAX_EXACT_INT).then(|| v as i64)
}

impl ParamValue {
    pub fn canonical(self) -> Self {
        match self {
            ParamValue::Float(v) => whole(v).map_or(ParamValue::Float(v), ParamValue::Int),
            other => other,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamValue::Bool(a), ParamValue::Bool(b)) => a == b,
            (ParamValue::Text(a), ParamValue::Text(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Serialize for ParamValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParamValue::Bool(v) => serializer.serialize_bool(*v),
            ParamValue::Int(v) => serializer.serialize_i64(*v),
            ParamValue::Float(v) => match whole(*v) {
                Some(i) => serializer.serialize_i64(i),
                None => serializer.serialize_f64(*v),
            },
            ParamValue::Text(v) => serializer.serialize_str(v),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParam {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for ParamValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = match RawParam::deserialize(deserializer)? {
            RawParam::Bool(v) => ParamValue::Bool(v),
            RawParam::Int(v) => ParamValue::Int(v),
            RawParam::Float(v) => ParamValue::Float(v),
            RawParam::Text(v) => ParamValue::Text(v),
        };
        Ok(value.canonical())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v).canonical()
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Payload of an Operation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Operation identifier, e.g. `"load_csv"` or `"anomaly_detect"`.
    pub op: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    /// Declared input values: name -> type tag.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Declared output values: name -> type tag.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Hardware capabilities the operation needs.
    #[serde(default)]
    pub requires: BTreeSet<String>,
    /// Capability-free encoding used when a profile lacks `requires`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl OperationSpec {
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            params: BTreeMap::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            requires: BTreeSet::new(),
            fallback: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), type_tag.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), type_tag.into());
        self
    }

    pub fn requires(mut self, capability: impl Into<String>) -> Self {
        self.requires.insert(capability.into());
        self
    }

    pub fn with_fallback(mut self, op: impl Into<String>) -> Self {
        self.fallback = Some(op.into());
        self
    }

    pub fn work(&self) -> f64 {
        self.params
            .get(PARAM_WORK)
            .and_then(ParamValue::as_f64)
            .unwrap_or(1.0)
    }

    pub fn precision(&self) -> Option<&str> {
        self.params.get(PARAM_PRECISION).and_then(ParamValue::as_str)
    }

    pub fn allows_reduced_precision(&self) -> bool {
        self.params
            .get(PARAM_ALLOW_REDUCED_PRECISION)
            .and_then(ParamValue::as_bool)
            .unwrap_or(false)
    }
}

/// Payload of a Data node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSpec {
    pub type_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Hard requirement on a metric: `metric comparator threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub metric: Metric,
    pub comparator: Comparator,
    pub threshold: f64,
}

impl Predicate {
    pub fn new(metric: Metric, comparator: Comparator, threshold: f64) -> Self {
        Self {
            metric,
            comparator,
            threshold,
        }
    }

    pub fn holds(&self, value: f64) -> bool {
        self.comparator.holds(value, self.threshold)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.comparator, self.threshold)
    }
}

/// Soft criterion contributing one coordinate to a candidate's objective vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub metric: Metric,
    pub direction: Direction,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Objective {
    pub fn minimize(metric: Metric) -> Self {
        Self {
            metric,
            direction: Direction::Minimize,
            weight: 1.0,
        }
    }

    pub fn maximize(metric: Metric) -> Self {
        Self {
            metric,
            direction: Direction::Maximize,
            weight: 1.0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Map a raw metric value into the "lower is better" sense.
    pub fn normalize(&self, value: f64) -> f64 {
        match self.direction {
            Direction::Minimize => value,
            Direction::Maximize => -value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodePayload {
    Operation(OperationSpec),
    Data(DataSpec),
    Constraint(Predicate),
    Objective(Objective),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub payload: NodePayload,
    /// Forward-compatible metadata. Never part of the fingerprint.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, payload: NodePayload) -> Self {
        Self {
            id: id.into(),
            payload,
            extensions: BTreeMap::new(),
        }
    }

    pub fn operation(id: impl Into<NodeId>, spec: OperationSpec) -> Self {
        Self::new(id, NodePayload::Operation(spec))
    }

    pub fn data(id: impl Into<NodeId>, type_tag: impl Into<String>, value: Option<serde_json::Value>) -> Self {
        Self::new(
            id,
            NodePayload::Data(DataSpec {
                type_tag: type_tag.into(),
                value,
            }),
        )
    }

    pub fn constraint(id: impl Into<NodeId>, predicate: Predicate) -> Self {
        Self::new(id, NodePayload::Constraint(predicate))
    }

    pub fn objective(id: impl Into<NodeId>, objective: Objective) -> Self {
        Self::new(id, NodePayload::Objective(objective))
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> NodeKind {
        match self.payload {
            NodePayload::Operation(_) => NodeKind::Operation,
            NodePayload::Data(_) => NodeKind::Data,
            NodePayload::Constraint(_) => NodeKind::Constraint,
            NodePayload::Objective(_) => NodeKind::Objective,
        }
    }

    /// Operation and Data nodes take part in ordering; the rest only annotate.
    pub fn is_computational(&self) -> bool {
        matches!(self.kind(), NodeKind::Operation | NodeKind::Data)
    }

    pub fn as_operation(&self) -> Option<&OperationSpec> {
        match &self.payload {
            NodePayload::Operation(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataSpec> {
        match &self.payload {
            NodePayload::Data(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_constraint(&self) -> Option<&Predicate> {
        match &self.payload {
            NodePayload::Constraint(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_objective(&self) -> Option<&Objective> {
        match &self.payload {
            NodePayload::Objective(o) => Some(o),
            _ => None,
        }
    }

    /// Type tag of the value this node produces under `name`, if declared.
    pub fn output_type(&self, name: &str) -> Option<&str> {
        match &self.payload {
            NodePayload::Data(d) => Some(d.type_tag.as_str()),
            NodePayload::Operation(op) => op.outputs.get(name).map(String::as_str),
            _ => None,
        }
    }

    /// Type tag this node expects for the incoming value `name`, if declared.
    pub fn input_type(&self, name: &str) -> Option<&str> {
        match &self.payload {
            NodePayload::Data(d) => Some(d.type_tag.as_str()),
            NodePayload::Operation(op) => op.inputs.get(name).map(String::as_str),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparator_holds() {
        assert!(Comparator::Lt.holds(49.0, 50.0));
        assert!(!Comparator::Lt.holds(50.0, 50.0));
        assert!(Comparator::Le.holds(50.0, 50.0));
        assert!(Comparator::Ge.holds(0.95, 0.95));
        assert!(!Comparator::Gt.holds(0.9, 0.95));
    }

    #[test]
    fn test_objective_normalize_direction() {
        assert_eq!(Objective::minimize(Metric::Energy).normalize(3.0), 3.0);
        assert_eq!(Objective::maximize(Metric::Safety).normalize(3.0), -3.0);
    }

    #[test]
    fn test_operation_spec_defaults() {
        let spec = OperationSpec::new("scan");
        assert_eq!(spec.work(), 1.0);
        assert!(spec.precision().is_none());
        assert!(!spec.allows_reduced_precision());

        let spec = spec
            .with_param(PARAM_WORK, 4.5)
            .with_param(PARAM_PRECISION, "fp32")
            .with_param(PARAM_ALLOW_REDUCED_PRECISION, true);
        assert_eq!(spec.work(), 4.5);
        assert_eq!(spec.precision(), Some("fp32"));
        assert!(spec.allows_reduced_precision());
    }

    #[test]
    fn test_whole_numeric_params_are_canonical() {
        let from_float = OperationSpec::new("scan").with_param(PARAM_WORK, 2.0);
        let from_int = OperationSpec::new("scan").with_param(PARAM_WORK, 2i64);
        assert_eq!(from_float, from_int);
        assert_eq!(
            serde_json::to_string(&from_float).unwrap(),
            serde_json::to_string(&from_int).unwrap()
        );

        let parsed: ParamValue = serde_json::from_str("2.0").unwrap();
        assert!(matches!(parsed, ParamValue::Int(2)));
        let parsed: ParamValue = serde_json::from_str("2.5").unwrap();
        assert!(matches!(parsed, ParamValue::Float(v) if v == 2.5));
        assert_eq!(ParamValue::Float(3.0), ParamValue::Int(3));
    }

    #[test]
    fn test_payload_serde_tagging() {
        let node = Node::constraint("c", Predicate::new(Metric::Latency, Comparator::Lt, 50.0));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["payload"]["kind"], "constraint");
        assert_eq!(json["payload"]["metric"], "latency");
        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
