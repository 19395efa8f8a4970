//! Embedding providers
//!
//! The `Embedder` trait is the capability interface the retrieval side
//! depends on. Two providers ship here: an OpenAI-compatible HTTP
//! embedder (feature `openai`) and a deterministic hashing embedder for
//! offline and test use.

pub mod cache;

pub use cache::{EmbeddingCache, EmbeddingCacheStats};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MemoriaError, Result};

/// Text-to-vector capability
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Output dimensionality
    fn dimensions(&self) -> usize;

    /// Model identifier, used in cache keys
    fn model_name(&self) -> &str;
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    /// Provider to use: "openai" or "hash"
    pub provider: String,
    /// API key (for openai)
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL override
    pub base_url: Option<String>,
    /// Model name override
    pub model: Option<String>,
    /// Embedding dimensions (must match model output)
    pub dimensions: usize,
}

impl Default for EmbeddingProviderConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            api_key: None,
            base_url: None,
            model: None,
            dimensions: 384,
        }
    }
}

/// Create an embedder from configuration
pub fn create_embedder(config: &EmbeddingProviderConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        #[cfg(feature = "openai")]
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| MemoriaError::Config("OpenAI API key required".to_string()))?;
            Ok(Arc::new(OpenAiEmbedder::with_config(api_key, config)))
        }
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimensions))),
        other => Err(MemoriaError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Deterministic hashing embedder
///
/// Buckets word hashes into a fixed-dimension vector and L2-normalizes.
/// No semantic quality; stable output for the same input, which is all
/// tests and offline mode need.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoriaError::Embedding("empty text".to_string()));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[0..8].try_into().expect("8 bytes"))
                as usize
                % self.dimensions;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash"
    }
}

/// OpenAI-compatible HTTP embedder
#[cfg(feature = "openai")]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[cfg(feature = "openai")]
impl OpenAiEmbedder {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }

    fn with_config(api_key: String, config: &EmbeddingProviderConfig) -> Self {
        let mut embedder = Self::new(api_key);
        if let Some(url) = &config.base_url {
            embedder.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = &config.model {
            embedder.model = model.clone();
        }
        embedder.dimensions = config.dimensions;
        embedder
    }

    pub async fn embed_async(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoriaError::Embedding("empty text".to_string()));
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoriaError::Embedding(format!(
                "embedding API returned {}: {}",
                status, body
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        let embedding = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| MemoriaError::Embedding("malformed embedding response".to_string()))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect::<Vec<f32>>();

        if embedding.len() != self.dimensions {
            return Err(MemoriaError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }

        Ok(embedding)
    }
}

#[cfg(feature = "openai")]
impl Embedder for OpenAiEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Blocking call for sync interface
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.embed_async(text))
        })
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[test]
    fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("the quick brown fox").unwrap();
        let b = embedder.embed("the quick brown fox").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_embedder_normalized() {
        let embedder = HashEmbedder::new(64);
        let v = embedder.embed("some content here").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_similar_text_scores_higher() {
        let embedder = HashEmbedder::new(256);
        let base = embedder.embed("acme corp ships rockets to orbit").unwrap();
        let near = embedder.embed("acme corp ships rockets").unwrap();
        let far = embedder.embed("completely unrelated words only").unwrap();

        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
    }

    #[test]
    fn test_hash_embedder_rejects_empty() {
        let embedder = HashEmbedder::new(64);
        assert!(embedder.embed("   ").is_err());
    }

    #[test]
    fn test_create_embedder() {
        let config = EmbeddingProviderConfig::default();
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dimensions(), 384);
        assert_eq!(embedder.model_name(), "hash");

        let bad = EmbeddingProviderConfig {
            provider: "quantum".to_string(),
            ..Default::default()
        };
        assert!(create_embedder(&bad).is_err());
    }
}
