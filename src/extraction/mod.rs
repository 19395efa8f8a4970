//! Conversation ingestion
//!
//! Chunking, LLM-backed extraction with the MAKER reliability layer, and
//! cross-chunk deduplication feeding the memory store.

pub mod chunker;
pub mod extractor;
pub mod llm;
pub mod maker;

pub use chunker::{
    ChunkStrategy, ChunkerConfig, ChunkingOutcome, Conversation, ConversationChunk,
    ConversationChunker, ConversationMessage, FailureMode,
};
pub use extractor::{
    persist_extraction, ExtractedMemory, ExtractedRelationship, ExtractionOptions,
    ExtractionProfile, ExtractionResult, ExtractionStatus, ExtractionStrategyKind, MemoryExtractor,
};
pub use llm::{LlmClient, LlmRequest, ScriptedLlm};
#[cfg(feature = "openai")]
pub use llm::OpenAiChatClient;
pub use maker::{validate_candidate, MakerLayer, MakerNotes, MakerOutcome};
