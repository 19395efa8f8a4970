//! Composite re-ranking of similarity results
//!
//! Combines vector similarity with recency, confidence and decay into a
//! single rank in [0,1] and re-sorts descending. Pinned memories rank as
//! if fully fresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ScoredMemory;

/// Weights for the rank composite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankerConfig {
    pub similarity_weight: f64,
    pub recency_weight: f64,
    pub confidence_weight: f64,
    pub decay_weight: f64,
    /// Half-life for the recency component in days
    pub recency_half_life_days: f64,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            similarity_weight: 0.5,
            recency_weight: 0.2,
            confidence_weight: 0.15,
            decay_weight: 0.15,
            recency_half_life_days: 30.0,
        }
    }
}

/// Re-ranks retrieval results
#[derive(Debug, Clone, Default)]
pub struct Ranker {
    config: RankerConfig,
}

impl Ranker {
    pub fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    /// Annotate each result with a rank and sort descending
    pub fn rank(&self, mut results: Vec<ScoredMemory>, now: DateTime<Utc>) -> Vec<ScoredMemory> {
        let weight_sum = self.config.similarity_weight
            + self.config.recency_weight
            + self.config.confidence_weight
            + self.config.decay_weight;
        if weight_sum <= 0.0 {
            return results;
        }

        for result in &mut results {
            let similarity = result.similarity_score.clamp(0.0, 1.0);
            let recency = self.recency_score(result.memory.last_accessed_at, now);
            let confidence = result.memory.confidence.clamp(0.0, 1.0);
            let decay = if result.memory.pinned {
                1.0
            } else {
                result.memory.decay_score.clamp(0.0, 1.0)
            };

            result.rank = ((self.config.similarity_weight * similarity
                + self.config.recency_weight * recency
                + self.config.confidence_weight * confidence
                + self.config.decay_weight * decay)
                / weight_sum)
                .clamp(0.0, 1.0);
        }

        results.sort_by(|a, b| b.rank.partial_cmp(&a.rank).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    /// Exponential half-life recency from last access
    fn recency_score(&self, last_accessed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_days = (now - last_accessed_at).num_milliseconds().max(0) as f64
            / (24.0 * 60.0 * 60.0 * 1000.0);
        0.5f64.powf(age_days / self.config.recency_half_life_days)
    }
}
