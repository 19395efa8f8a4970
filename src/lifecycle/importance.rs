//! Composite importance scoring
//!
//! Combines access frequency, confidence and relationship count into a
//! single usage-based value in [0,1]. Each feature is normalized through
//! a sigmoid before the weighted sum.

use chrono::{DateTime, Utc};

use crate::config::ImportanceConfig;
use crate::error::{MemoriaError, Result};

/// Guards the frequency denominator for just-created memories
const MIN_AGE_DAYS: f64 = 1e-6;

/// Sigmoid midpoint for access frequency: one access per day scores 0.5
const FREQUENCY_MIDPOINT: f64 = 1.0;
const FREQUENCY_STEEPNESS: f64 = 2.0;

/// Sigmoid midpoint for relationship count: five edges score 0.5
const RELATIONSHIP_MIDPOINT: f64 = 5.0;
const RELATIONSHIP_STEEPNESS: f64 = 0.5;

/// Weights for the three importance features
#[derive(Debug, Clone, Copy)]
pub struct ImportanceWeights {
    pub frequency: f64,
    pub confidence: f64,
    pub relationships: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            frequency: 0.4,
            confidence: 0.3,
            relationships: 0.3,
        }
    }
}

/// Inputs to a single importance computation
#[derive(Debug, Clone, Copy)]
pub struct ImportanceInputs {
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub relationship_count: usize,
    pub confidence: f64,
}

/// Validated importance scorer
#[derive(Debug, Clone)]
pub struct ImportanceScorer {
    weights: ImportanceWeights,
}

fn sigmoid(x: f64, midpoint: f64, steepness: f64) -> f64 {
    1.0 / (1.0 + (-steepness * (x - midpoint)).exp())
}

impl ImportanceScorer {
    /// Validate weights and build a scorer
    ///
    /// Each weight must be in [0,1] and the sum in [0.5, 1.5].
    pub fn new(weights: ImportanceWeights) -> Result<Self> {
        for (name, value) in [
            ("frequency_weight", weights.frequency),
            ("confidence_weight", weights.confidence),
            ("relationship_weight", weights.relationships),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(MemoriaError::validation(name, "must be in [0,1]"));
            }
        }

        let sum = weights.frequency + weights.confidence + weights.relationships;
        if !(0.5..=1.5).contains(&sum) {
            return Err(MemoriaError::validation(
                "weights",
                format!("sum {} must be in [0.5, 1.5]", sum),
            ));
        }

        Ok(Self { weights })
    }

    pub fn from_config(config: &ImportanceConfig) -> Result<Self> {
        Self::new(ImportanceWeights {
            frequency: config.frequency_weight,
            confidence: config.confidence_weight,
            relationships: config.relationship_weight,
        })
    }

    /// Compute the composite importance score, clamped to [0,1]
    pub fn score(&self, inputs: &ImportanceInputs, now: DateTime<Utc>) -> f64 {
        let age_days = ((now - inputs.created_at).num_milliseconds() as f64
            / (24.0 * 60.0 * 60.0 * 1000.0))
            .max(MIN_AGE_DAYS);

        let accesses_per_day = inputs.access_count.max(0) as f64 / age_days;
        let frequency = sigmoid(accesses_per_day, FREQUENCY_MIDPOINT, FREQUENCY_STEEPNESS);

        let confidence = inputs.confidence.clamp(0.0, 1.0);

        let relationships = sigmoid(
            inputs.relationship_count as f64,
            RELATIONSHIP_MIDPOINT,
            RELATIONSHIP_STEEPNESS,
        );

        (self.weights.frequency * frequency
            + self.weights.confidence * confidence
            + self.weights.relationships * relationships)
            .clamp(0.0, 1.0)
    }
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self {
            weights: ImportanceWeights::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn inputs(access_count: i64, age_days: i64, relationships: usize, confidence: f64) -> (ImportanceInputs, DateTime<Utc>) {
        let now = Utc::now();
        (
            ImportanceInputs {
                access_count,
                created_at: now - Duration::days(age_days),
                relationship_count: relationships,
                confidence,
            },
            now,
        )
    }

    #[test]
    fn test_score_in_range() {
        let scorer = ImportanceScorer::default();
        for (count, age, rels, conf) in
            [(0, 1, 0, 0.0), (1000, 1, 50, 1.0), (3, 365, 2, 0.5)]
        {
            let (i, now) = inputs(count, age, rels, conf);
            let score = scorer.score(&i, now);
            assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn test_frequent_access_scores_higher() {
        let scorer = ImportanceScorer::default();
        let (rare, now) = inputs(1, 100, 0, 0.5);
        let (frequent, _) = inputs(500, 100, 0, 0.5);
        assert!(scorer.score(&frequent, now) > scorer.score(&rare, now));
    }

    #[test]
    fn test_relationships_raise_score() {
        let scorer = ImportanceScorer::default();
        let (isolated, now) = inputs(1, 10, 0, 0.5);
        let (connected, _) = inputs(1, 10, 20, 0.5);
        assert!(scorer.score(&connected, now) > scorer.score(&isolated, now));
    }

    #[test]
    fn test_midpoints() {
        let scorer = ImportanceScorer::new(ImportanceWeights {
            frequency: 0.0,
            confidence: 0.0,
            relationships: 1.0,
        })
        .unwrap();
        // Five relationships sit at the sigmoid midpoint
        let (i, now) = inputs(0, 10, 5, 0.0);
        assert!((scorer.score(&i, now) - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_zero_age_does_not_blow_up() {
        let scorer = ImportanceScorer::default();
        let now = Utc::now();
        let i = ImportanceInputs {
            access_count: 1,
            created_at: now,
            relationship_count: 0,
            confidence: 0.5,
        };
        let score = scorer.score(&i, now);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_weight_validation() {
        assert!(ImportanceScorer::new(ImportanceWeights {
            frequency: 1.2,
            confidence: 0.1,
            relationships: 0.1,
        })
        .is_err());

        assert!(ImportanceScorer::new(ImportanceWeights {
            frequency: 0.1,
            confidence: 0.1,
            relationships: 0.1,
        })
        .is_err());

        assert!(ImportanceScorer::new(ImportanceWeights {
            frequency: 0.6,
            confidence: 0.6,
            relationships: 0.6,
        })
        .is_err());

        assert!(ImportanceScorer::new(ImportanceWeights::default()).is_ok());
    }
}
