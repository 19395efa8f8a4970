//! Token counting
//!
//! One abstract method, two providers: a fast character approximation and
//! a precise model-aware tokenizer. The formatter depends only on the
//! trait.

use crate::error::{MemoriaError, Result};

/// Token counting capability
pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Fast approximation: one token per four characters, rounded up
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl TokenCounter for ApproxTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

/// Precise tokenizer backed by the cl100k BPE vocabulary
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| MemoriaError::Config(format!("tokenizer init failed: {}", e)))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}
