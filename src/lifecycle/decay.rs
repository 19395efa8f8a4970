//! Time-decay scoring
//!
//! Pure computation from elapsed time since last access to a freshness
//! score in [0,1]. The decay function is validated at construction
//! against a standard probe set so a misconfigured function can never
//! produce out-of-range scores at runtime.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::DecayConfig;
use crate::error::{MemoriaError, Result};

const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Probe set used to validate decay functions at construction:
/// zero, one minute, one hour, one day, one week, one month, one year.
const PROBE_SET_MS: [i64; 7] = [
    0,
    60 * 1000,
    60 * 60 * 1000,
    24 * 60 * 60 * 1000,
    7 * 24 * 60 * 60 * 1000,
    30 * 24 * 60 * 60 * 1000,
    365 * 24 * 60 * 60 * 1000,
];

/// Decay function variants
#[derive(Clone)]
pub enum DecayFunction {
    /// `score = exp(-lambda * elapsed_days)`
    Exponential { lambda: f64 },
    /// `score = max(0, 1 - elapsed / period)`
    Linear { period_ms: i64 },
    /// First interval the elapsed time falls under selects the score;
    /// past the last boundary the final score applies
    Step {
        intervals_ms: Vec<i64>,
        scores: Vec<f64>,
    },
    /// Caller-supplied function of elapsed milliseconds
    Custom(Arc<dyn Fn(i64) -> f64 + Send + Sync>),
}

impl std::fmt::Debug for DecayFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecayFunction::Exponential { lambda } => {
                f.debug_struct("Exponential").field("lambda", lambda).finish()
            }
            DecayFunction::Linear { period_ms } => {
                f.debug_struct("Linear").field("period_ms", period_ms).finish()
            }
            DecayFunction::Step { intervals_ms, scores } => f
                .debug_struct("Step")
                .field("intervals_ms", intervals_ms)
                .field("scores", scores)
                .finish(),
            DecayFunction::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Validated decay score calculator
#[derive(Debug, Clone)]
pub struct DecayCalculator {
    function: DecayFunction,
}

impl DecayCalculator {
    /// Validate and wrap a decay function
    ///
    /// Fails when structural constraints are violated (non-positive
    /// lambda/period, unsorted step intervals, out-of-range step scores)
    /// or the function leaves [0,1] on the probe set.
    pub fn new(function: DecayFunction) -> Result<Self> {
        match &function {
            DecayFunction::Exponential { lambda } => {
                if !lambda.is_finite() || *lambda <= 0.0 {
                    return Err(MemoriaError::validation("lambda", "must be positive"));
                }
            }
            DecayFunction::Linear { period_ms } => {
                if *period_ms <= 0 {
                    return Err(MemoriaError::validation("period_ms", "must be positive"));
                }
            }
            DecayFunction::Step { intervals_ms, scores } => {
                if scores.is_empty() {
                    return Err(MemoriaError::validation("scores", "must be non-empty"));
                }
                if scores.len() < intervals_ms.len() {
                    return Err(MemoriaError::validation(
                        "scores",
                        "must provide a score for every interval",
                    ));
                }
                if intervals_ms.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(MemoriaError::validation(
                        "intervals_ms",
                        "must be strictly ascending",
                    ));
                }
                if scores.iter().any(|s| !(0.0..=1.0).contains(s)) {
                    return Err(MemoriaError::validation("scores", "must be in [0,1]"));
                }
            }
            DecayFunction::Custom(_) => {}
        }

        let calculator = Self { function };
        for elapsed in PROBE_SET_MS {
            let score = calculator.compute_raw(elapsed);
            if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                return Err(MemoriaError::validation(
                    "decay_function",
                    format!("returned {} for elapsed {}ms", score, elapsed),
                ));
            }
        }

        Ok(calculator)
    }

    /// Build a calculator from environment-level configuration
    pub fn from_config(config: &DecayConfig) -> Result<Self> {
        let function = match config.function.as_str() {
            "exponential" => DecayFunction::Exponential { lambda: config.lambda },
            "linear" => DecayFunction::Linear {
                period_ms: config.period_ms,
            },
            "step" => DecayFunction::Step {
                intervals_ms: config.step_intervals_ms.clone(),
                scores: config.step_scores.clone(),
            },
            other => {
                return Err(MemoriaError::Config(format!(
                    "unknown decay function: {}",
                    other
                )))
            }
        };
        Self::new(function)
    }

    fn compute_raw(&self, elapsed_ms: i64) -> f64 {
        let elapsed_ms = elapsed_ms.max(0);
        match &self.function {
            DecayFunction::Exponential { lambda } => {
                let elapsed_days = elapsed_ms as f64 / MS_PER_DAY;
                (-lambda * elapsed_days).exp()
            }
            DecayFunction::Linear { period_ms } => {
                (1.0 - elapsed_ms as f64 / *period_ms as f64).max(0.0)
            }
            DecayFunction::Step { intervals_ms, scores } => {
                for (i, boundary) in intervals_ms.iter().enumerate() {
                    if elapsed_ms < *boundary {
                        return scores[i];
                    }
                }
                *scores.last().expect("validated non-empty")
            }
            DecayFunction::Custom(f) => f(elapsed_ms),
        }
    }

    /// Score for an elapsed duration, clamped to [0,1]
    pub fn compute(&self, elapsed_ms: i64) -> f64 {
        let score = self.compute_raw(elapsed_ms);
        if score.is_nan() {
            return 1.0;
        }
        score.clamp(0.0, 1.0)
    }

    /// Decay score for a memory given its last access time
    ///
    /// Future-dated access times score 1.0.
    pub fn calculate_decay_score(&self, last_accessed_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        if now < last_accessed_at {
            return 1.0;
        }
        let elapsed_ms = (now - last_accessed_at).num_milliseconds();
        self.compute(elapsed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_exponential_decay() {
        let calc = DecayCalculator::new(DecayFunction::Exponential { lambda: 0.1 }).unwrap();

        assert!((calc.compute(0) - 1.0).abs() < 1e-9);

        // After 10 days at lambda 0.1: e^-1
        let ten_days = 10 * 24 * 60 * 60 * 1000;
        assert!((calc.compute(ten_days) - (-1.0f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_linear_decay_floors_at_zero() {
        let period = 10 * 24 * 60 * 60 * 1000;
        let calc = DecayCalculator::new(DecayFunction::Linear { period_ms: period }).unwrap();

        assert!((calc.compute(period / 2) - 0.5).abs() < 1e-9);
        assert_eq!(calc.compute(period * 2), 0.0);
    }

    #[test]
    fn test_step_decay() {
        let day = 24 * 60 * 60 * 1000;
        let calc = DecayCalculator::new(DecayFunction::Step {
            intervals_ms: vec![day, 7 * day],
            scores: vec![1.0, 0.6, 0.2],
        })
        .unwrap();

        assert_eq!(calc.compute(0), 1.0);
        assert_eq!(calc.compute(3 * day), 0.6);
        assert_eq!(calc.compute(30 * day), 0.2);
    }

    #[test]
    fn test_future_dated_access_scores_one() {
        let calc = DecayCalculator::new(DecayFunction::Exponential { lambda: 0.1 }).unwrap();
        let now = Utc::now();
        let future = now + Duration::days(3);
        assert_eq!(calc.calculate_decay_score(future, now), 1.0);
    }

    #[test]
    fn test_nan_custom_scores_one_at_runtime() {
        // Passes validation on the probe set, then returns NaN elsewhere
        let calc = DecayCalculator::new(DecayFunction::Custom(Arc::new(|elapsed| {
            if elapsed == 12345 {
                f64::NAN
            } else {
                0.5
            }
        })))
        .unwrap();
        assert_eq!(calc.compute(12345), 1.0);
    }

    #[test]
    fn test_construction_rejects_out_of_range_custom() {
        let result = DecayCalculator::new(DecayFunction::Custom(Arc::new(|_| 2.0)));
        assert!(result.is_err());
    }

    #[test]
    fn test_construction_rejects_bad_parameters() {
        assert!(DecayCalculator::new(DecayFunction::Exponential { lambda: 0.0 }).is_err());
        assert!(DecayCalculator::new(DecayFunction::Exponential { lambda: -1.0 }).is_err());
        assert!(DecayCalculator::new(DecayFunction::Linear { period_ms: 0 }).is_err());
        assert!(DecayCalculator::new(DecayFunction::Step {
            intervals_ms: vec![100, 50],
            scores: vec![1.0, 0.5, 0.1],
        })
        .is_err());
        assert!(DecayCalculator::new(DecayFunction::Step {
            intervals_ms: vec![],
            scores: vec![],
        })
        .is_err());
        assert!(DecayCalculator::new(DecayFunction::Step {
            intervals_ms: vec![100],
            scores: vec![1.5],
        })
        .is_err());
    }

    #[test]
    fn test_from_config() {
        let config = DecayConfig::default();
        let calc = DecayCalculator::from_config(&config).unwrap();
        let score = calc.compute(24 * 60 * 60 * 1000);
        assert!(score > 0.0 && score < 1.0);

        let bad = DecayConfig {
            function: "sawtooth".to_string(),
            ..Default::default()
        };
        assert!(DecayCalculator::from_config(&bad).is_err());
    }
}
