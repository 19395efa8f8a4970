//! Embedding cache with zero-copy sharing via Arc<[f32]>
//!
//! LRU + TTL cache keyed by a content hash of `(model, text)`. Entries
//! expire after the configured TTL; reads of expired entries delete them
//! and count as misses. At capacity, inserting a new key evicts the least
//! recently used entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingCacheConfig;

/// Statistics for the embedding cache
#[derive(Debug, Clone)]
pub struct EmbeddingCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub evictions: u64,
    pub expirations: u64,
    pub max_size: usize,
    /// Hit rate as percentage (0.0 - 100.0)
    pub hit_rate: f64,
}

struct CacheEntry {
    vector: Arc<[f32]>,
    inserted_at: Instant,
    /// Monotonic recency stamp; smallest = least recently used
    last_used: u64,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    clock: u64,
}

/// Thread-safe LRU+TTL embedding cache
pub struct EmbeddingCache {
    state: Mutex<CacheState>,
    max_size: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Cache key: sha256 over model and text, separated so neither can
/// masquerade as the other
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0x1f]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

impl EmbeddingCache {
    /// Create a cache with explicit capacity and TTL
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                clock: 0,
            }),
            max_size: max_size.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &EmbeddingCacheConfig) -> Self {
        Self::new(config.max_size, Duration::from_secs(config.ttl_seconds))
    }

    /// Look up an embedding
    ///
    /// Expired entries are removed and reported as misses. Invalid inputs
    /// return None without counting.
    pub fn get(&self, model: &str, text: &str) -> Option<Arc<[f32]>> {
        if model.is_empty() || text.is_empty() {
            return None;
        }

        let key = cache_key(model, text);
        let mut state = self.state.lock();

        match state.entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() >= self.ttl => {
                state.entries.remove(&key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(_) => {
                state.clock += 1;
                let stamp = state.clock;
                let entry = state.entries.get_mut(&key).expect("checked above");
                entry.last_used = stamp;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.vector.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an embedding
    ///
    /// Invalid inputs (empty model/text, empty vector) are silently
    /// ignored. Inserting a new key at capacity evicts the LRU entry.
    pub fn set(&self, model: &str, text: &str, vector: Vec<f32>) {
        if model.is_empty() || text.is_empty() || vector.is_empty() {
            return;
        }

        let key = cache_key(model, text);
        let mut state = self.state.lock();
        state.clock += 1;
        let stamp = state.clock;

        let is_new = !state.entries.contains_key(&key);
        if is_new && state.entries.len() >= self.max_size {
            if let Some(lru_key) = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone())
            {
                state.entries.remove(&lru_key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                vector: vector.into(),
                inserted_at: Instant::now(),
                last_used: stamp,
            },
        );
    }

    pub fn stats(&self) -> EmbeddingCacheStats {
        let state = self.state.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        EmbeddingCacheStats {
            hits,
            misses,
            entries: state.entries.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            max_size: self.max_size,
            hit_rate: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::from_config(&EmbeddingCacheConfig::default())
    }
}
