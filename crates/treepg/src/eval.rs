//! Per-session recommendation metrics.

use crate::training::RatingScale;
use crate::{Result, TreePgError};
use serde::{Deserialize, Serialize};

/// Ratings strictly above this count as relevant.
pub const RELEVANCE_THRESHOLD: f32 = 3.5;

/// Metrics of one replayed session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Mean normalized rating of hits over the session length
    pub reward: f32,
    /// Relevant hits over hits
    pub precision: f32,
    /// Relevant hits over relevant steps
    pub recall: f32,
    /// Mean reciprocal rank of the consumed item
    pub mrr: f32,
}

/// Score `recommendations[t]` against the item consumed at step `t`.
///
/// A step is a hit when `items[t]` is among the first `top_n`
/// recommendations of that step.
pub fn evaluate_session(
    recommendations: &[Vec<u64>],
    items: &[u64],
    ratings: &[f32],
    top_n: usize,
    scale: &RatingScale,
) -> Result<SessionMetrics> {
    if recommendations.len() != items.len() || items.len() != ratings.len() {
        return Err(TreePgError::InvalidInput(format!(
            "session has {} recommendation lists, {} items and {} ratings",
            recommendations.len(),
            items.len(),
            ratings.len()
        )));
    }
    if top_n == 0 {
        return Err(TreePgError::InvalidInput("top_n must be >= 1".into()));
    }
    if items.is_empty() {
        return Ok(SessionMetrics::default());
    }

    let mut reward = 0.0f32;
    let mut reciprocal_ranks = 0.0f32;
    let mut hits = 0usize;
    let mut relevant_hits = 0usize;
    let mut relevant = 0usize;

    for ((recommended, &item), &rating) in recommendations.iter().zip(items).zip(ratings) {
        let is_relevant = rating > RELEVANCE_THRESHOLD;
        if is_relevant {
            relevant += 1;
        }
        let rank = recommended.iter().take(top_n).position(|&r| r == item);
        if let Some(rank) = rank {
            hits += 1;
            reward += scale.normalize(rating);
            reciprocal_ranks += 1.0 / (rank + 1) as f32;
            if is_relevant {
                relevant_hits += 1;
            }
        }
    }

    let steps = items.len() as f32;
    Ok(SessionMetrics {
        reward: reward / steps,
        precision: ratio(relevant_hits, hits),
        recall: ratio(relevant_hits, relevant),
        mrr: reciprocal_ranks / steps,
    })
}

fn ratio(numerator: usize, denominator: usize) -> f32 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f32 / denominator as f32
    }
}
