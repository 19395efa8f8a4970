//! Environment-driven configuration
//!
//! All knobs the core recognizes, with serde defaults matching the
//! documented defaults. `MemoriaConfig::from_env` reads the `MEMORIA_*`
//! environment and falls back to defaults for anything unset.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MemoriaError, Result};
use crate::types::RetentionPolicy;

/// Storage endpoint selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the embedded database file (":memory:" for tests)
    pub database_path: Option<String>,
    /// URL of a networked database (libsql://...)
    pub database_url: Option<String>,
    /// Auth token for the networked database
    pub database_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: Some("memoria.db".to_string()),
            database_url: None,
            database_key: None,
        }
    }
}

/// Decay function selection and parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayConfig {
    /// "exponential", "linear" or "step"
    #[serde(default = "default_decay_function")]
    pub function: String,
    /// Lambda for exponential decay (per day)
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// Period for linear decay, in milliseconds
    #[serde(default = "default_linear_period")]
    pub period_ms: i64,
    /// Interval boundaries for step decay, in milliseconds
    #[serde(default)]
    pub step_intervals_ms: Vec<i64>,
    /// Scores per step interval (one more entry than boundaries is not
    /// required; the last score applies beyond the final boundary)
    #[serde(default)]
    pub step_scores: Vec<f64>,
}

fn default_decay_function() -> String {
    "exponential".to_string()
}

fn default_lambda() -> f64 {
    0.05
}

fn default_linear_period() -> i64 {
    90 * 24 * 60 * 60 * 1000 // 90 days
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            function: default_decay_function(),
            lambda: default_lambda(),
            period_ms: default_linear_period(),
            step_intervals_ms: Vec::new(),
            step_scores: Vec::new(),
        }
    }
}

/// Importance scorer weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportanceConfig {
    #[serde(default = "default_frequency_weight")]
    pub frequency_weight: f64,
    #[serde(default = "default_confidence_weight")]
    pub confidence_weight: f64,
    #[serde(default = "default_relationship_weight")]
    pub relationship_weight: f64,
}

fn default_frequency_weight() -> f64 {
    0.4
}

fn default_confidence_weight() -> f64 {
    0.3
}

fn default_relationship_weight() -> f64 {
    0.3
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            frequency_weight: default_frequency_weight(),
            confidence_weight: default_confidence_weight(),
            relationship_weight: default_relationship_weight(),
        }
    }
}

/// Lifecycle engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Decay score below which an active memory starts decaying
    #[serde(default = "default_decay_threshold")]
    pub decay_threshold: f64,
    /// How often the background evaluation runs, in milliseconds
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_ms: u64,
    /// Page size for batch evaluation and cleanup (1..=1000)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// How long archived memories are kept before permanent deletion
    #[serde(default = "default_archive_retention")]
    pub archive_retention_ms: i64,
    /// How long lifecycle events are kept
    #[serde(default = "default_audit_retention")]
    pub audit_retention_ms: i64,
    /// Retention policy per memory type; "*" is the fallback
    #[serde(default)]
    pub retention_policies: HashMap<String, RetentionPolicy>,
}

fn default_decay_threshold() -> f64 {
    0.3
}

fn default_evaluation_interval() -> u64 {
    60 * 60 * 1000 // 1 hour
}

fn default_batch_size() -> usize {
    1000
}

fn default_archive_retention() -> i64 {
    365 * 24 * 60 * 60 * 1000 // 1 year
}

fn default_audit_retention() -> i64 {
    90 * 24 * 60 * 60 * 1000 // 90 days
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            decay_threshold: default_decay_threshold(),
            evaluation_interval_ms: default_evaluation_interval(),
            batch_size: default_batch_size(),
            archive_retention_ms: default_archive_retention(),
            audit_retention_ms: default_audit_retention(),
            retention_policies: HashMap::new(),
        }
    }
}

impl LifecycleConfig {
    /// Resolve the retention policy for a memory type
    pub fn retention_for(&self, memory_type: &str) -> RetentionPolicy {
        self.retention_policies
            .get(memory_type)
            .or_else(|| self.retention_policies.get("*"))
            .cloned()
            .unwrap_or_default()
    }
}

/// Embedding cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCacheConfig {
    /// Maximum number of cached embeddings
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    /// Entry time-to-live in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

fn default_cache_max_size() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    3600
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

/// MAKER reliability layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerConfig {
    /// Number of independent microagent calls
    #[serde(default = "default_maker_runs")]
    pub runs: usize,
    /// Sampling temperature for microagent calls
    #[serde(default = "default_maker_temperature")]
    pub temperature: f64,
    /// Per-call timeout in milliseconds
    #[serde(default = "default_maker_timeout")]
    pub call_timeout_ms: u64,
}

fn default_maker_runs() -> usize {
    3
}

fn default_maker_temperature() -> f64 {
    0.4
}

fn default_maker_timeout() -> u64 {
    30_000
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            runs: default_maker_runs(),
            temperature: default_maker_temperature(),
            call_timeout_ms: default_maker_timeout(),
        }
    }
}

/// Top-level configuration bundle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoriaConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub decay: DecayConfig,
    #[serde(default)]
    pub importance: ImportanceConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub embedding_cache: EmbeddingCacheConfig,
    #[serde(default)]
    pub maker: MakerConfig,
}

impl MemoriaConfig {
    /// Build a configuration from the process environment
    ///
    /// Recognized variables: `DATABASE_PATH`, `DATABASE_URL`, `DATABASE_KEY`,
    /// `MEMORIA_DECAY_FUNCTION`, `MEMORIA_DECAY_LAMBDA`,
    /// `MEMORIA_DECAY_PERIOD_MS`, `MEMORIA_DECAY_THRESHOLD`,
    /// `MEMORIA_EVALUATION_INTERVAL_MS`, `MEMORIA_BATCH_SIZE`,
    /// `MEMORIA_ARCHIVE_RETENTION_MS`, `MEMORIA_AUDIT_RETENTION_MS`,
    /// `MEMORIA_CACHE_MAX_SIZE`, `MEMORIA_CACHE_TTL_SECONDS`,
    /// `MEMORIA_MAKER_RUNS`, `MEMORIA_MAKER_TEMPERATURE`,
    /// `MEMORIA_MAKER_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.storage.database_path = Some(path);
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.storage.database_url = Some(url);
            config.storage.database_path = None;
        }
        if let Ok(key) = std::env::var("DATABASE_KEY") {
            config.storage.database_key = Some(key);
        }

        if let Ok(f) = std::env::var("MEMORIA_DECAY_FUNCTION") {
            config.decay.function = f;
        }
        parse_env("MEMORIA_DECAY_LAMBDA", &mut config.decay.lambda)?;
        parse_env("MEMORIA_DECAY_PERIOD_MS", &mut config.decay.period_ms)?;
        parse_env("MEMORIA_DECAY_THRESHOLD", &mut config.lifecycle.decay_threshold)?;
        parse_env(
            "MEMORIA_EVALUATION_INTERVAL_MS",
            &mut config.lifecycle.evaluation_interval_ms,
        )?;
        parse_env("MEMORIA_BATCH_SIZE", &mut config.lifecycle.batch_size)?;
        parse_env(
            "MEMORIA_ARCHIVE_RETENTION_MS",
            &mut config.lifecycle.archive_retention_ms,
        )?;
        parse_env(
            "MEMORIA_AUDIT_RETENTION_MS",
            &mut config.lifecycle.audit_retention_ms,
        )?;
        parse_env("MEMORIA_CACHE_MAX_SIZE", &mut config.embedding_cache.max_size)?;
        parse_env("MEMORIA_CACHE_TTL_SECONDS", &mut config.embedding_cache.ttl_seconds)?;
        parse_env("MEMORIA_MAKER_RUNS", &mut config.maker.runs)?;
        parse_env("MEMORIA_MAKER_TEMPERATURE", &mut config.maker.temperature)?;
        parse_env("MEMORIA_MAKER_TIMEOUT_MS", &mut config.maker.call_timeout_ms)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.storage.database_path.is_none() && self.storage.database_url.is_none() {
            return Err(MemoriaError::Config(
                "either DATABASE_PATH or DATABASE_URL must be set".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.lifecycle.decay_threshold) {
            return Err(MemoriaError::Config(
                "decay threshold must be in [0,1]".to_string(),
            ));
        }
        if self.lifecycle.batch_size == 0 || self.lifecycle.batch_size > 1000 {
            return Err(MemoriaError::Config(
                "batch size must be in [1,1000]".to_string(),
            ));
        }
        if self.maker.runs == 0 {
            return Err(MemoriaError::Config("MAKER runs must be >= 1".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, target: &mut T) -> Result<()> {
    if let Ok(raw) = std::env::var(name) {
        *target = raw
            .parse()
            .map_err(|_| MemoriaError::Config(format!("invalid value for {}: {}", name, raw)))?;
    }
    Ok(())
}
