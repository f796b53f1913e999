//! Universal Execution Intermediate Representation
//!
//! Node/edge model, construction rules and content fingerprinting.

pub mod fingerprint;
pub mod graph;
pub mod intent;
pub mod node;

pub use fingerprint::Fingerprint;
pub use graph::{Edge, EdgeKind, FlowValue, Graph};
pub use intent::{build_base_graph, DataDecl, DataFlowDecl, DependencyDecl, OperationDecl, StructuredIntent};
pub use node::{
    Comparator, DataSpec, Direction, Metric, Node, NodeId, NodeKind, NodePayload, Objective, OperationSpec,
    ParamValue, Predicate,
};
