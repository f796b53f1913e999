//! Error taxonomy for the UEIR core.
//!
//! Every stage returns `UeirResult`; nothing is caught and retried inside the
//! core. The orchestration caller decides on relaxation or fallback.

use thiserror::Error;

pub type UeirResult<T> = Result<T, UeirError>;

/// Errors surfaced by the UEIR pipeline.
///
/// `Clone` so that one failed in-flight computation can be handed to every
/// caller waiting on the same fingerprint.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UeirError {
    /// Structural violation: unknown reference, cycle, duplicate id or a
    /// data-flow type mismatch.
    #[error("malformed graph: {reason}")]
    MalformedGraph { reason: String },

    /// A constraint or objective targets an operation/data node that is not
    /// part of the graph.
    #[error("unresolvable reference: '{name}'")]
    UnresolvableReference { name: String },

    /// No generated candidate satisfies every constraint.
    #[error("infeasible: none of {evaluated} candidates satisfied all constraints")]
    Infeasible { evaluated: usize },

    /// The hardware profile lacks a capability an operation needs and the
    /// operation has no fallback encoding.
    #[error("operation '{operation}' requires capability '{capability}' which profile '{profile}' lacks")]
    UnsupportedHardware {
        operation: String,
        capability: String,
        profile: String,
    },

    #[error("graph store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A spawned evaluation or computation task panicked or was aborted.
    #[error("background task failed: {0}")]
    Task(String),

    /// Failure reported by an external collaborator (reasoning layer,
    /// hardware selection, execution backend, learning recorder).
    #[error("collaborator '{collaborator}' failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },
}

impl UeirError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedGraph {
            reason: reason.into(),
        }
    }

    pub fn unresolvable(name: impl Into<String>) -> Self {
        Self::UnresolvableReference { name: name.into() }
    }

    pub fn collaborator(collaborator: &str, err: anyhow::Error) -> Self {
        Self::Collaborator {
            collaborator: collaborator.to_string(),
            message: format!("{:#}", err),
        }
    }
}

impl From<serde_json::Error> for UeirError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<tokio::task::JoinError> for UeirError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

impl From<std::io::Error> for UeirError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}
