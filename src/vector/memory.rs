//! In-memory vector index for tests and ephemeral workspaces

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Result;

use super::{check_dimensions, cosine_similarity, VectorFilter, VectorIndex, VectorMatch, VectorMetadata};

/// Brute-force in-memory index
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, (Vec<f32>, VectorMetadata)>>,
    dimensions: usize,
}

impl InMemoryVectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            dimensions,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn upsert(&self, id: &str, vector: &[f32], metadata: VectorMetadata) -> Result<()> {
        check_dimensions(self.dimensions, vector)?;
        self.entries
            .write()
            .insert(id.to_string(), (vector.to_vec(), metadata));
        Ok(())
    }

    fn search(&self, vector: &[f32], top_k: usize, filter: &VectorFilter) -> Result<Vec<VectorMatch>> {
        check_dimensions(self.dimensions, vector)?;

        let entries = self.entries.read();
        let mut matches: Vec<VectorMatch> = entries
            .iter()
            .filter(|(_, (_, metadata))| filter.matches(metadata))
            .map(|(id, (stored, _))| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.entries.write().remove(id);
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
