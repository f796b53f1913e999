//! Selection of a single candidate from the Pareto front.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pareto::{Candidate, ParetoFront};
use crate::errors::{UeirError, UeirResult};

/// How objective values are scaled before weighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Min-max across the front, per objective.
    #[default]
    MinMax,
    /// Direction-normalized values, unscaled.
    Raw,
}

fn scaled(front: &ParetoFront, normalization: Normalization) -> Vec<Vec<f64>> {
    let members = front.members();
    match normalization {
        Normalization::Raw => members.iter().map(|c| c.normalized.clone()).collect(),
        Normalization::MinMax => {
            let dims = members.first().map_or(0, |c| c.normalized.len());
            let bounds: Vec<(f64, f64)> = (0..dims)
                .map(|j| {
                    members.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
                        (lo.min(c.normalized[j]), hi.max(c.normalized[j]))
                    })
                })
                .collect();
            members
                .iter()
                .map(|c| {
                    c.normalized
                        .iter()
                        .zip(&bounds)
                        .map(|(v, (lo, hi))| if hi > lo { (v - lo) / (hi - lo) } else { 0.0 })
                        .collect()
                })
                .collect()
        }
    }
}

/// Pick the member minimizing the weighted sum of scaled objective values.
///
/// `weights` is aligned with the objective vector; missing entries weigh
/// 1.0. Ties go to the member inserted first.
pub fn select<'a>(front: &'a ParetoFront, weights: &[f64], normalization: Normalization) -> UeirResult<&'a Candidate> {
    let members = front.members();
    if members.len() == 1 {
        return Ok(&members[0]);
    }

    let mut best: Option<(usize, f64)> = None;
    for (i, values) in scaled(front, normalization).iter().enumerate() {
        let score: f64 = values
            .iter()
            .enumerate()
            .map(|(j, v)| weights.get(j).copied().unwrap_or(1.0) * v)
            .sum();
        debug!("candidate {} scores {:.4}", members[i].label, score);
        if best.map_or(true, |(_, s)| score < s) {
            best = Some((i, score));
        }
    }

    best.map(|(i, _)| &members[i])
        .ok_or(UeirError::Infeasible { evaluated: 0 })
}
