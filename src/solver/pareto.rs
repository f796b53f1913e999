//! Pareto front over evaluated candidates
//!
//! All comparisons work on direction-normalized vectors (lower is better).

use serde::{Deserialize, Serialize};

use crate::hardware::HardwareProfile;
use crate::ueir::Graph;

/// A feasible binding of the graph to one hardware profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Position in generation order.
    pub index: usize,
    pub label: String,
    pub graph: Graph,
    pub profile: HardwareProfile,
    /// Raw objective values, in binding order.
    pub objectives: Vec<f64>,
    /// Objective values with maximized metrics negated.
    pub normalized: Vec<f64>,
}

/// `a` dominates `b` when it is no worse on every objective and strictly
/// better on at least one.
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut strictly_better = false;
    for (x, y) in a.iter().zip(b) {
        if x > y {
            return false;
        }
        if x < y {
            strictly_better = true;
        }
    }
    strictly_better
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParetoFront {
    members: Vec<Candidate>,
}

impl ParetoFront {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `candidate`, evicting members it dominates.
    ///
    /// Returns `false` when the candidate is dominated or duplicates the
    /// objective vector of an existing member; the earlier member is kept.
    pub fn insert(&mut self, candidate: Candidate) -> bool {
        let rejected = self
            .members
            .iter()
            .any(|m| m.normalized == candidate.normalized || dominates(&m.normalized, &candidate.normalized));
        if rejected {
            return false;
        }
        self.members.retain(|m| !dominates(&candidate.normalized, &m.normalized));
        self.members.push(candidate);
        true
    }

    pub fn members(&self) -> &[Candidate] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn into_members(self) -> Vec<Candidate> {
        self.members
    }
}

impl FromIterator<Candidate> for ParetoFront {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        let mut front = Self::new();
        for candidate in iter {
            front.insert(candidate);
        }
        front
    }
}
