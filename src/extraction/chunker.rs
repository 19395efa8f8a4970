//! Conversation chunking
//!
//! Splits a normalized conversation into token-bounded chunks ahead of
//! extraction. Three strategies: a fixed sliding window with overlap,
//! boundary splitting at role turns and long pauses, and a semantic
//! splitter keyed on topic-change cues. A conversation that fits in one
//! chunk is passed through without chunking metadata.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::tokenizer::TokenCounter;
use crate::error::{MemoriaError, Result};

/// Topic-change cues for the semantic strategy
static TOPIC_SHIFT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(let's move on|moving on|next topic|changing topics|on another note|switching gears|next item|new topic|one more thing|separately)",
    )
    .expect("valid regex")
});

/// Pause length that forces a boundary split
const BOUNDARY_GAP_SECONDS: i64 = 5 * 60;

/// Pause length that counts as a topic shift
const SEMANTIC_GAP_SECONDS: i64 = 30 * 60;

/// Default overlap for the boundary strategy, in tokens
const BOUNDARY_OVERLAP_TOKENS: usize = 300;

/// A message in a normalized conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    /// "user", "assistant", "system"
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A normalized conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<ConversationMessage>,
}

/// Chunking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Fixed token windows with percentage/token overlap
    #[default]
    SlidingWindow,
    /// Split at role turns and long pauses
    ConversationBoundary,
    /// Split at topic-shift cues and very long gaps
    Semantic,
}

impl std::str::FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sliding_window" | "sliding-window" => Ok(ChunkStrategy::SlidingWindow),
            "conversation_boundary" | "boundary" => Ok(ChunkStrategy::ConversationBoundary),
            "semantic" => Ok(ChunkStrategy::Semantic),
            _ => Err(format!("Unknown chunk strategy: {}", s)),
        }
    }
}

/// What to do when a chunk fails downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Abort on the first failed chunk
    FailFast,
    /// Accumulate per-chunk errors and keep going
    #[default]
    ContinueOnError,
}

/// Chunker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub enabled: bool,
    pub max_tokens_per_chunk: usize,
    pub strategy: ChunkStrategy,
    /// Overlap as a fraction of the chunk budget (used when
    /// `overlap_tokens` is unset)
    pub overlap_percentage: f64,
    /// Explicit overlap in tokens; wins over the percentage
    pub overlap_tokens: Option<usize>,
    /// Minimum chunk size in tokens for the boundary strategy
    pub min_chunk_size: Option<usize>,
    pub failure_mode: FailureMode,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens_per_chunk: 2000,
            strategy: ChunkStrategy::SlidingWindow,
            overlap_percentage: 0.1,
            overlap_tokens: None,
            min_chunk_size: None,
            failure_mode: FailureMode::ContinueOnError,
        }
    }
}

/// A contiguous message range under the token budget
#[derive(Debug, Clone)]
pub struct ConversationChunk {
    pub chunk_index: usize,
    /// First message index (inclusive)
    pub start_index: usize,
    /// Last message index (exclusive)
    pub end_index: usize,
    pub messages: Vec<ConversationMessage>,
    pub token_count: usize,
    /// Tokens shared with the previous chunk
    pub overlap_tokens: usize,
}

impl ConversationChunk {
    /// Combined content for extraction prompts
    pub fn text(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of a chunking pass
#[derive(Debug, Clone)]
pub struct ChunkingOutcome {
    pub chunks: Vec<ConversationChunk>,
    /// False when the conversation fit in a single chunk and no chunking
    /// metadata should be recorded
    pub chunked: bool,
}

/// Splits conversations per the configured strategy
pub struct ConversationChunker {
    config: ChunkerConfig,
    tokenizer: Arc<dyn TokenCounter>,
}

impl ConversationChunker {
    pub fn new(config: ChunkerConfig, tokenizer: Arc<dyn TokenCounter>) -> Result<Self> {
        // Below 16 tokens even a clipped message cannot fit its budget
        if config.max_tokens_per_chunk < 16 {
            return Err(MemoriaError::validation(
                "max_tokens_per_chunk",
                "must be at least 16",
            ));
        }
        if !(0.0..1.0).contains(&config.overlap_percentage) {
            return Err(MemoriaError::validation(
                "overlap_percentage",
                "must be in [0,1)",
            ));
        }
        Ok(Self { config, tokenizer })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    fn message_tokens(&self, message: &ConversationMessage) -> usize {
        // Role prefix counts toward the budget the same way text() emits it
        self.tokenizer
            .count_tokens(&format!("{}: {}", message.role, message.content))
    }

    /// Chunk a conversation
    ///
    /// Post-conditions: every chunk is under the token budget, ranges are
    /// contiguous, and their union covers all messages.
    pub fn chunk(&self, conversation: &Conversation) -> Result<ChunkingOutcome> {
        if conversation.messages.is_empty() {
            return Ok(ChunkingOutcome {
                chunks: Vec::new(),
                chunked: false,
            });
        }

        let messages = self.clip_oversized(&conversation.messages);
        let token_counts: Vec<usize> = messages.iter().map(|m| self.message_tokens(m)).collect();
        let total: usize = token_counts.iter().sum();

        if !self.config.enabled || total <= self.config.max_tokens_per_chunk {
            let chunk = self.build_chunk(0, 0, messages.len(), &messages, &token_counts, 0);
            return Ok(ChunkingOutcome {
                chunks: vec![chunk],
                chunked: false,
            });
        }

        let ranges = match self.config.strategy {
            // Sliding windows carry their overlap inside the range
            ChunkStrategy::SlidingWindow => self.sliding_window(&token_counts),
            ChunkStrategy::ConversationBoundary => {
                self.extend_with_overlap(self.boundary(&messages, &token_counts), &token_counts)
            }
            ChunkStrategy::Semantic => {
                self.extend_with_overlap(self.semantic(&messages, &token_counts), &token_counts)
            }
        };

        let mut chunks = Vec::with_capacity(ranges.len());
        let mut prev_end = 0;
        for (i, (start, end)) in ranges.iter().enumerate() {
            let overlap_end = prev_end.min(*end);
            let overlap_tokens = if i > 0 && *start < overlap_end {
                token_counts[*start..overlap_end].iter().sum()
            } else {
                0
            };
            chunks.push(self.build_chunk(i, *start, *end, &messages, &token_counts, overlap_tokens));
            prev_end = *end;
        }

        Ok(ChunkingOutcome {
            chunks,
            chunked: true,
        })
    }

    fn overlap_budget(&self) -> usize {
        match self.config.strategy {
            ChunkStrategy::SlidingWindow => self.config.overlap_tokens.unwrap_or(
                (self.config.max_tokens_per_chunk as f64 * self.config.overlap_percentage) as usize,
            ),
            _ => self
                .config
                .overlap_tokens
                .unwrap_or(BOUNDARY_OVERLAP_TOKENS),
        }
    }

    /// Reach each chunk's start back into its predecessor for overlap,
    /// without exceeding either the overlap budget or the chunk budget
    fn extend_with_overlap(
        &self,
        boundaries: Vec<(usize, usize)>,
        token_counts: &[usize],
    ) -> Vec<(usize, usize)> {
        let overlap_budget = self.overlap_budget();
        let mut ranges = Vec::with_capacity(boundaries.len());

        for (i, (start, end)) in boundaries.iter().enumerate() {
            let mut new_start = *start;
            let mut overlap = 0;
            if i > 0 && overlap_budget > 0 {
                let base: usize = token_counts[*start..*end].iter().sum();
                while new_start > boundaries[i - 1].0 {
                    let candidate = token_counts[new_start - 1];
                    if overlap + candidate > overlap_budget
                        || base + overlap + candidate > self.config.max_tokens_per_chunk
                    {
                        break;
                    }
                    new_start -= 1;
                    overlap += candidate;
                }
            }
            ranges.push((new_start, *end));
        }

        ranges
    }

    /// Truncate any single message that alone exceeds the budget
    fn clip_oversized(&self, messages: &[ConversationMessage]) -> Vec<ConversationMessage> {
        messages
            .iter()
            .map(|m| {
                if self.message_tokens(m) <= self.config.max_tokens_per_chunk {
                    return m.clone();
                }
                let mut clipped = m.clone();
                // Approximate: four characters per token, minus marker room
                let budget_chars = self.config.max_tokens_per_chunk.saturating_mul(4).saturating_sub(40);
                let cut = clipped
                    .content
                    .char_indices()
                    .nth(budget_chars)
                    .map(|(i, _)| i)
                    .unwrap_or(clipped.content.len());
                clipped.content.truncate(cut);
                clipped.content.push_str(" [truncated]");
                clipped
            })
            .collect()
    }

    fn build_chunk(
        &self,
        index: usize,
        start: usize,
        end: usize,
        messages: &[ConversationMessage],
        token_counts: &[usize],
        overlap_tokens: usize,
    ) -> ConversationChunk {
        ConversationChunk {
            chunk_index: index,
            start_index: start,
            end_index: end,
            messages: messages[start..end].to_vec(),
            token_count: token_counts[start..end].iter().sum(),
            overlap_tokens,
        }
    }

    /// Greedy fixed windows; the next window starts back inside the
    /// previous one by up to the overlap budget
    fn sliding_window(&self, token_counts: &[usize]) -> Vec<(usize, usize)> {
        let overlap_budget = self.overlap_budget();
        let mut ranges = Vec::new();
        let mut start = 0;

        loop {
            let mut end = start;
            let mut tokens = 0;
            while end < token_counts.len()
                && tokens + token_counts[end] <= self.config.max_tokens_per_chunk
            {
                tokens += token_counts[end];
                end += 1;
            }
            // A single message never exceeds the budget after clipping, so
            // end always advances
            let end = end.max(start + 1);
            ranges.push((start, end));

            if end >= token_counts.len() {
                break;
            }

            // Back up over the tail of this window for overlap, keeping
            // strict forward progress
            let mut next = end;
            let mut overlap = 0;
            while next > start + 1 && overlap + token_counts[next - 1] <= overlap_budget {
                overlap += token_counts[next - 1];
                next -= 1;
            }
            start = next;
        }

        ranges
    }

    /// Split at role turns to "user" and long pauses
    fn boundary(
        &self,
        messages: &[ConversationMessage],
        token_counts: &[usize],
    ) -> Vec<(usize, usize)> {
        let min_tokens = self.config.min_chunk_size.unwrap_or(0);
        let mut boundaries = Vec::new();
        let mut start = 0;
        let mut tokens = 0;

        for i in 0..messages.len() {
            let over_budget = tokens + token_counts[i] > self.config.max_tokens_per_chunk && i > start;

            let natural = i > start
                && tokens >= min_tokens
                && (is_turn_start(messages, i)
                    || gap_seconds(messages, i) >= BOUNDARY_GAP_SECONDS);

            if over_budget || natural {
                boundaries.push((start, i));
                start = i;
                tokens = 0;
            }
            tokens += token_counts[i];
        }
        boundaries.push((start, messages.len()));
        boundaries
    }

    /// Split at topic-shift cues and very long gaps
    fn semantic(
        &self,
        messages: &[ConversationMessage],
        token_counts: &[usize],
    ) -> Vec<(usize, usize)> {
        let mut boundaries = Vec::new();
        let mut start = 0;
        let mut tokens = 0;

        for i in 0..messages.len() {
            let over_budget = tokens + token_counts[i] > self.config.max_tokens_per_chunk && i > start;

            let shift = i > start
                && (TOPIC_SHIFT.is_match(&messages[i].content)
                    || gap_seconds(messages, i) >= SEMANTIC_GAP_SECONDS);

            if over_budget || shift {
                boundaries.push((start, i));
                start = i;
                tokens = 0;
            }
            tokens += token_counts[i];
        }
        boundaries.push((start, messages.len()));
        boundaries
    }
}

fn is_turn_start(messages: &[ConversationMessage], i: usize) -> bool {
    i > 0 && messages[i].role == "user" && messages[i - 1].role != "user"
}

fn gap_seconds(messages: &[ConversationMessage], i: usize) -> i64 {
    if i == 0 {
        return 0;
    }
    (messages[i].timestamp - messages[i - 1].timestamp).num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tokenizer::ApproxTokenizer;
    use chrono::Duration;

    fn conversation(contents: &[(&str, &str, i64)]) -> Conversation {
        let base = Utc::now() - Duration::hours(5);
        Conversation {
            id: "conv-1".to_string(),
            messages: contents
                .iter()
                .enumerate()
                .map(|(i, (role, content, offset_secs))| ConversationMessage {
                    id: format!("msg-{}", i),
                    role: role.to_string(),
                    content: content.to_string(),
                    timestamp: base + Duration::seconds(*offset_secs),
                })
                .collect(),
        }
    }

    fn chunker(config: ChunkerConfig) -> ConversationChunker {
        ConversationChunker::new(config, Arc::new(ApproxTokenizer)).unwrap()
    }

    fn assert_coverage(outcome: &ChunkingOutcome, message_count: usize, max_tokens: usize) {
        let mut covered = vec![false; message_count];
        for chunk in &outcome.chunks {
            assert!(chunk.token_count <= max_tokens, "chunk over budget");
            assert!(chunk.start_index < chunk.end_index);
            for i in chunk.start_index..chunk.end_index {
                covered[i] = true;
            }
        }
        assert!(covered.iter().all(|c| *c), "not all messages covered");
    }

    #[test]
    fn test_single_chunk_skips_chunking() {
        let chunker = chunker(ChunkerConfig::default());
        let convo = conversation(&[("user", "short question", 0), ("assistant", "short answer", 10)]);

        let outcome = chunker.chunk(&convo).unwrap();
        assert!(!outcome.chunked);
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(outcome.chunks[0].messages.len(), 2);
    }

    #[test]
    fn test_empty_conversation() {
        let chunker = chunker(ChunkerConfig::default());
        let outcome = chunker
            .chunk(&Conversation {
                id: "empty".to_string(),
                messages: Vec::new(),
            })
            .unwrap();
        assert!(!outcome.chunked);
        assert!(outcome.chunks.is_empty());
    }

    #[test]
    fn test_sliding_window_covers_all_messages() {
        let config = ChunkerConfig {
            max_tokens_per_chunk: 30,
            ..Default::default()
        };
        let chunker = chunker(config);
        // 12 messages x ~10 tokens each
        let messages: Vec<(&str, &str, i64)> = (0..12)
            .map(|i| {
                (
                    if i % 2 == 0 { "user" } else { "assistant" },
                    "this message is about forty characters..",
                    i * 10,
                )
            })
            .collect();
        let convo = conversation(&messages);

        let outcome = chunker.chunk(&convo).unwrap();
        assert!(outcome.chunked);
        assert!(outcome.chunks.len() > 1);
        assert_coverage(&outcome, 12, 30);

        // Stable indices
        for (i, chunk) in outcome.chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    #[test]
    fn test_sliding_window_overlap_reported() {
        let config = ChunkerConfig {
            max_tokens_per_chunk: 30,
            overlap_tokens: Some(12),
            ..Default::default()
        };
        let chunker = chunker(config);
        let messages: Vec<(&str, &str, i64)> = (0..8)
            .map(|i| ("user", "this message is about forty characters..", i * 10))
            .collect();
        let convo = conversation(&messages);

        let outcome = chunker.chunk(&convo).unwrap();
        assert!(outcome.chunks.len() > 1);
        for chunk in &outcome.chunks[1..] {
            assert!(chunk.overlap_tokens > 0, "later chunks carry overlap");
            assert!(chunk.overlap_tokens <= 12);
            assert!(chunk.token_count <= 30);
        }
    }

    #[test]
    fn test_oversized_message_is_clipped() {
        let config = ChunkerConfig {
            max_tokens_per_chunk: 20,
            ..Default::default()
        };
        let chunker = chunker(config);
        let big = "x".repeat(500);
        let convo = conversation(&[("user", &big, 0)]);

        let outcome = chunker.chunk(&convo).unwrap();
        assert_eq!(outcome.chunks.len(), 1);
        assert!(outcome.chunks[0].token_count <= 20);
        assert!(outcome.chunks[0].messages[0].content.ends_with("[truncated]"));
    }

    #[test]
    fn test_boundary_splits_on_long_gap() {
        let config = ChunkerConfig {
            max_tokens_per_chunk: 50,
            strategy: ChunkStrategy::ConversationBoundary,
            overlap_tokens: Some(0),
            ..Default::default()
        };
        let chunker = chunker(config);
        // Force multi-chunk via total tokens, with a 10-minute pause
        let convo = conversation(&[
            ("user", "first topic message with plenty of characters here", 0),
            ("assistant", "an answer with plenty of characters in it too..", 30),
            ("user", "resuming after a long break with more characters..", 30 + 600),
            ("assistant", "another answer with plenty of characters here..", 30 + 630),
            ("user", "and one more message with plenty of characters...", 30 + 660),
        ]);

        let outcome = chunker.chunk(&convo).unwrap();
        assert!(outcome.chunked);
        // The 10-minute pause before message 2 starts a new chunk
        assert!(outcome.chunks.iter().any(|c| c.start_index == 2));
        assert_coverage(&outcome, 5, 50);
    }

    #[test]
    fn test_semantic_splits_on_cue_phrase() {
        let config = ChunkerConfig {
            max_tokens_per_chunk: 40,
            strategy: ChunkStrategy::Semantic,
            overlap_tokens: Some(0),
            ..Default::default()
        };
        let chunker = chunker(config);
        let convo = conversation(&[
            ("user", "we should discuss the database schema in detail", 0),
            ("assistant", "the schema needs a composite index on state", 10),
            ("user", "Moving on, let's talk about the deploy pipeline", 20),
            ("assistant", "the pipeline should gate on integration tests", 30),
        ]);

        let outcome = chunker.chunk(&convo).unwrap();
        assert!(outcome.chunked);
        assert!(outcome.chunks.iter().any(|c| c.start_index == 2));
        assert_coverage(&outcome, 4, 40);
    }

    #[test]
    fn test_config_validation() {
        assert!(ConversationChunker::new(
            ChunkerConfig {
                max_tokens_per_chunk: 0,
                ..Default::default()
            },
            Arc::new(ApproxTokenizer),
        )
        .is_err());

        assert!(ConversationChunker::new(
            ChunkerConfig {
                overlap_percentage: 1.0,
                ..Default::default()
            },
            Arc::new(ApproxTokenizer),
        )
        .is_err());
    }
}
