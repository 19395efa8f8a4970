//! Vector index adapter
//!
//! Upsert/search/delete over embeddings, keyed by memory id and filtered
//! by workspace plus memory-type set membership. Dimensionality is fixed
//! when an index is created.

mod memory;
mod sqlite;

pub use memory::InMemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

use crate::error::{MemoriaError, Result};

/// Metadata attached to every stored vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorMetadata {
    pub workspace_id: String,
    pub memory_type: String,
}

/// Search filter: workspace equality plus optional type set membership
#[derive(Debug, Clone)]
pub struct VectorFilter {
    pub workspace_id: String,
    pub types: Option<Vec<String>>,
}

impl VectorFilter {
    pub fn workspace(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            types: None,
        }
    }

    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        if metadata.workspace_id != self.workspace_id {
            return false;
        }
        match &self.types {
            Some(types) => types.iter().any(|t| t == &metadata.memory_type),
            None => true,
        }
    }
}

/// A similarity match from the index
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
}

/// The vector index contract
pub trait VectorIndex: Send + Sync {
    /// Idempotent insert-or-replace
    fn upsert(&self, id: &str, vector: &[f32], metadata: VectorMetadata) -> Result<()>;

    /// Top-k matches sorted by descending similarity
    fn search(&self, vector: &[f32], top_k: usize, filter: &VectorFilter) -> Result<Vec<VectorMatch>>;

    /// Idempotent delete; a missing id is success
    fn delete(&self, id: &str) -> Result<()>;

    /// All stored ids, for the reconciler's orphan sweep
    fn ids(&self) -> Result<Vec<String>>;

    /// Fixed dimensionality of this index
    fn dimensions(&self) -> usize;
}

/// Reject vectors that do not match the index dimensionality
pub(crate) fn check_dimensions(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(MemoriaError::validation(
            "vector",
            format!("expected {} dimensions, got {}", expected, vector.len()),
        ));
    }
    Ok(())
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Encode a vector as little-endian f32 bytes
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes back into a vector
pub(crate) fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(MemoriaError::VectorStore(format!(
            "embedding blob has invalid length {}",
            bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk.try_into().expect("chunks_exact(4)");
        out.push(f32::from_le_bytes(arr));
    }
    Ok(out)
}
