//! Memory extraction pipeline
//!
//! Chunks a conversation, runs the configured extraction strategy per
//! chunk, deduplicates entities across chunks, and rewrites relationship
//! temp ids to the surviving memories. Profiles bundle strategy and
//! filter settings; call-time options override the profile.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::Embedder;
use crate::error::{MemoriaError, Result};
use crate::store::MemoryStore;
use crate::types::{CreateMemoryInput, Memory};

use super::chunker::{ChunkingOutcome, Conversation, ConversationChunker, FailureMode};
use super::llm::{LlmClient, LlmRequest};
use super::maker::{strip_code_fences, MakerLayer};

/// Default similarity threshold for cross-chunk dedup
const DEFAULT_DEDUP_THRESHOLD: f64 = 0.85;

/// Extraction strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategyKind {
    /// One structured-JSON call per chunk
    #[default]
    Structured,
    /// MAKER-voted notes (summary/decisions/todos)
    MakerNotes,
}

/// Named bundle of extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionProfile {
    pub name: String,
    pub strategy: ExtractionStrategyKind,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    /// Memory types the strategy is asked to produce
    pub memory_types: Vec<String>,
    /// Extracted memories below this confidence are dropped
    pub min_confidence: f64,
}

impl Default for ExtractionProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            strategy: ExtractionStrategyKind::Structured,
            temperature: 0.2,
            max_tokens: None,
            memory_types: vec![
                "entity".to_string(),
                "fact".to_string(),
                "decision".to_string(),
                "preference".to_string(),
            ],
            min_confidence: 0.3,
        }
    }
}

/// Call-time overrides; unset fields fall through to the profile
#[derive(Debug, Clone, Default)]
pub struct ExtractionOptions {
    pub profile: Option<String>,
    pub strategy: Option<ExtractionStrategyKind>,
    pub memory_types: Option<Vec<String>>,
    pub min_confidence: Option<f64>,
    pub failure_mode: Option<FailureMode>,
    pub dedup_threshold: Option<f64>,
}

/// A memory proposed by extraction, keyed by a temp id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMemory {
    pub temp_id: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Chunk indices this memory was observed in (grows during dedup)
    pub source_chunks: Vec<usize>,
}

/// A relationship proposed by extraction, in temp-id space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub from_temp_id: String,
    pub to_temp_id: String,
    pub relationship_type: String,
    pub confidence: f64,
}

/// Overall result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    /// Every chunk extracted
    Success,
    /// At least one chunk failed, at least one succeeded
    Partial,
    /// Every chunk failed
    Failed,
}

/// Result of extracting one conversation
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub conversation_id: String,
    pub memories: Vec<ExtractedMemory>,
    pub relationships: Vec<ExtractedRelationship>,
    pub status: ExtractionStatus,
    pub chunk_count: usize,
    /// False when the conversation fit in one chunk
    pub chunked: bool,
    pub chunk_errors: Vec<(usize, String)>,
    /// Edges dropped because an endpoint did not survive dedup
    pub dropped_relationships: usize,
    /// Memories merged away by cross-chunk dedup
    pub duplicates_merged: usize,
}

struct ChunkExtraction {
    memories: Vec<ExtractedMemory>,
    relationships: Vec<ExtractedRelationship>,
}

/// Runs the extraction pipeline
pub struct MemoryExtractor {
    llm: Arc<dyn LlmClient>,
    chunker: ConversationChunker,
    maker: MakerLayer,
    profiles: HashMap<String, ExtractionProfile>,
    call_timeout: Duration,
}

impl MemoryExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, chunker: ConversationChunker, maker: MakerLayer) -> Self {
        let mut profiles = HashMap::new();
        let default = ExtractionProfile::default();
        profiles.insert(default.name.clone(), default);
        Self {
            llm,
            chunker,
            maker,
            profiles,
            call_timeout: Duration::from_secs(60),
        }
    }

    /// Register a named profile; replaces any previous one with the name
    pub fn add_profile(&mut self, profile: ExtractionProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    fn resolve_profile(&self, options: &ExtractionOptions) -> Result<ExtractionProfile> {
        let mut profile = match &options.profile {
            Some(name) => self
                .profiles
                .get(name)
                .cloned()
                .ok_or_else(|| MemoriaError::not_found("extraction profile", name.clone()))?,
            None => self.profiles.get("default").cloned().unwrap_or_default(),
        };

        if let Some(strategy) = options.strategy {
            profile.strategy = strategy;
        }
        if let Some(types) = &options.memory_types {
            profile.memory_types = types.clone();
        }
        if let Some(min) = options.min_confidence {
            profile.min_confidence = min;
        }
        Ok(profile)
    }

    /// Extract memories from a conversation
    pub async fn extract(
        &self,
        conversation: &Conversation,
        options: &ExtractionOptions,
    ) -> Result<ExtractionResult> {
        let profile = self.resolve_profile(options)?;
        let failure_mode = options
            .failure_mode
            .unwrap_or(self.chunker.config().failure_mode);
        let dedup_threshold = options.dedup_threshold.unwrap_or(DEFAULT_DEDUP_THRESHOLD);

        let ChunkingOutcome { chunks, chunked } = self.chunker.chunk(conversation)?;

        let mut memories: Vec<ExtractedMemory> = Vec::new();
        let mut relationships: Vec<ExtractedRelationship> = Vec::new();
        let mut chunk_errors: Vec<(usize, String)> = Vec::new();

        for chunk in &chunks {
            let outcome = match profile.strategy {
                ExtractionStrategyKind::Structured => {
                    self.extract_structured(chunk.chunk_index, &chunk.text(), &profile).await
                }
                ExtractionStrategyKind::MakerNotes => {
                    self.extract_maker(chunk.chunk_index, &chunk.text()).await
                }
            };

            match outcome {
                Ok(extraction) => {
                    memories.extend(extraction.memories);
                    relationships.extend(extraction.relationships);
                }
                Err(e) => match failure_mode {
                    FailureMode::FailFast => return Err(e),
                    FailureMode::ContinueOnError => {
                        tracing::warn!(chunk = chunk.chunk_index, "chunk extraction failed: {}", e);
                        chunk_errors.push((chunk.chunk_index, e.to_string()));
                    }
                },
            }
        }

        // Confidence floor from the profile
        let before_filter = memories.len();
        memories.retain(|m| m.confidence >= profile.min_confidence);
        if memories.len() < before_filter {
            tracing::debug!(
                dropped = before_filter - memories.len(),
                "extracted memories below confidence floor"
            );
        }

        let (memories, relationships, duplicates_merged, dropped_relationships) =
            dedup_across_chunks(memories, relationships, dedup_threshold);

        let status = if chunk_errors.is_empty() {
            ExtractionStatus::Success
        } else if chunk_errors.len() == chunks.len() {
            ExtractionStatus::Failed
        } else {
            ExtractionStatus::Partial
        };

        Ok(ExtractionResult {
            conversation_id: conversation.id.clone(),
            memories,
            relationships,
            status,
            chunk_count: chunks.len(),
            chunked,
            chunk_errors,
            dropped_relationships,
            duplicates_merged,
        })
    }

    async fn extract_structured(
        &self,
        chunk_index: usize,
        text: &str,
        profile: &ExtractionProfile,
    ) -> Result<ChunkExtraction> {
        let prompt = format!(
            "Extract memories from this conversation excerpt. Allowed types: {}.\n\
             Respond with JSON only:\n\
             {{\"memories\": [{{\"id\": \"m1\", \"type\": \"...\", \"content\": \"...\", \"confidence\": 0.0}}],\n \
             \"relationships\": [{{\"from\": \"m1\", \"to\": \"m2\", \"type\": \"relates_to\", \"confidence\": 0.0}}]}}\n\n\
             Excerpt:\n{}",
            profile.memory_types.join(", "),
            text
        );

        let raw = self
            .llm
            .complete(&LlmRequest {
                system: Some("You extract structured memories from conversations.".to_string()),
                prompt,
                temperature: profile.temperature,
                max_tokens: profile.max_tokens,
                timeout: self.call_timeout,
            })
            .await?;

        parse_structured(chunk_index, &raw)
    }

    async fn extract_maker(&self, chunk_index: usize, text: &str) -> Result<ChunkExtraction> {
        let outcome = self.maker.reliable_extract(text).await?;
        let Some(notes) = outcome.notes else {
            return Err(MemoriaError::Llm(format!(
                "no microagent consensus ({} rejected)",
                outcome.rejected
            )));
        };

        let mut memories = Vec::new();
        let mut push = |kind: &str, content: String, confidence: f64, ordinal: usize| {
            memories.push(ExtractedMemory {
                temp_id: format!("c{}:{}{}", chunk_index, kind, ordinal),
                memory_type: kind.to_string(),
                content,
                confidence,
                metadata: HashMap::new(),
                source_chunks: vec![chunk_index],
            });
        };

        push("summary", notes.summary, 0.9, 0);
        for (i, decision) in notes.decisions.into_iter().enumerate() {
            push("decision", decision, 0.85, i);
        }
        for (i, todo) in notes.todos.into_iter().enumerate() {
            push("todo", todo, 0.8, i);
        }

        Ok(ChunkExtraction {
            memories,
            relationships: Vec::new(),
        })
    }
}

/// Parse the structured-JSON extraction response, namespacing temp ids by
/// chunk
fn parse_structured(chunk_index: usize, raw: &str) -> Result<ChunkExtraction> {
    let cleaned = strip_code_fences(raw);
    let value: serde_json::Value = serde_json::from_str(cleaned)
        .map_err(|e| MemoriaError::Llm(format!("malformed extraction JSON: {}", e)))?;

    let namespaced = |local: &str| format!("c{}:{}", chunk_index, local);

    let mut memories = Vec::new();
    if let Some(items) = value.get("memories").and_then(|v| v.as_array()) {
        for item in items {
            let (Some(id), Some(memory_type), Some(content)) = (
                item.get("id").and_then(|v| v.as_str()),
                item.get("type").and_then(|v| v.as_str()),
                item.get("content").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }
            memories.push(ExtractedMemory {
                temp_id: namespaced(id),
                memory_type: memory_type.to_string(),
                content: content.to_string(),
                confidence: item
                    .get("confidence")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0),
                metadata: HashMap::new(),
                source_chunks: vec![chunk_index],
            });
        }
    }

    let mut relationships = Vec::new();
    if let Some(items) = value.get("relationships").and_then(|v| v.as_array()) {
        for item in items {
            let (Some(from), Some(to)) = (
                item.get("from").and_then(|v| v.as_str()),
                item.get("to").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            relationships.push(ExtractedRelationship {
                from_temp_id: namespaced(from),
                to_temp_id: namespaced(to),
                relationship_type: item
                    .get("type")
                    .and_then(|v| v.as_str())
                    .unwrap_or("relates_to")
                    .to_string(),
                confidence: item
                    .get("confidence")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0),
            });
        }
    }

    Ok(ChunkExtraction {
        memories,
        relationships,
    })
}

fn normalized_words(content: &str) -> HashSet<String> {
    content
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Word-set Jaccard similarity over normalized content
fn content_similarity(a: &str, b: &str) -> f64 {
    let words_a = normalized_words(a);
    let words_b = normalized_words(b);

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Collapse same-type near-duplicates across chunks and rewrite
/// relationships onto the survivors
///
/// The survivor keeps the highest confidence seen and accumulates the
/// source chunks of everything merged into it. Relationships whose
/// endpoint was merged follow the survivor; edges left with a missing or
/// self-referential endpoint are dropped.
fn dedup_across_chunks(
    memories: Vec<ExtractedMemory>,
    relationships: Vec<ExtractedRelationship>,
    threshold: f64,
) -> (Vec<ExtractedMemory>, Vec<ExtractedRelationship>, usize, usize) {
    let mut survivors: Vec<ExtractedMemory> = Vec::new();
    let mut remap: HashMap<String, String> = HashMap::new();
    let mut merged = 0usize;

    for memory in memories {
        let existing = survivors.iter_mut().find(|s| {
            s.memory_type == memory.memory_type
                && content_similarity(&s.content, &memory.content) >= threshold
        });

        match existing {
            Some(survivor) => {
                remap.insert(memory.temp_id.clone(), survivor.temp_id.clone());
                if memory.confidence > survivor.confidence {
                    survivor.confidence = memory.confidence;
                    survivor.content = memory.content;
                }
                for chunk in memory.source_chunks {
                    if !survivor.source_chunks.contains(&chunk) {
                        survivor.source_chunks.push(chunk);
                    }
                }
                merged += 1;
            }
            None => {
                remap.insert(memory.temp_id.clone(), memory.temp_id.clone());
                survivors.push(memory);
            }
        }
    }

    let mut dropped = 0usize;
    let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();
    let mut rewritten = Vec::new();
    for edge in relationships {
        let (Some(from), Some(to)) = (remap.get(&edge.from_temp_id), remap.get(&edge.to_temp_id))
        else {
            dropped += 1;
            continue;
        };
        if from == to {
            dropped += 1;
            continue;
        }
        let key = (from.clone(), to.clone(), edge.relationship_type.clone());
        if !seen_edges.insert(key) {
            continue;
        }
        rewritten.push(ExtractedRelationship {
            from_temp_id: from.clone(),
            to_temp_id: to.clone(),
            relationship_type: edge.relationship_type,
            confidence: edge.confidence,
        });
    }

    (survivors, rewritten, merged, dropped)
}

/// Persist an extraction result through the store client
///
/// Creates one memory per surviving extraction (embedding through the
/// provided embedder when present) and one relationship per surviving
/// edge. Returns the created memories keyed by their temp id.
pub fn persist_extraction(
    store: &MemoryStore,
    workspace_id: &str,
    result: &ExtractionResult,
    embedder: Option<&dyn Embedder>,
) -> Result<HashMap<String, Memory>> {
    let mut created: HashMap<String, Memory> = HashMap::new();

    for extracted in &result.memories {
        let embedding = match embedder {
            Some(e) => Some(e.embed(&extracted.content)?),
            None => None,
        };

        let mut metadata = extracted.metadata.clone();
        metadata.insert(
            "source_chunks".to_string(),
            serde_json::json!(extracted.source_chunks),
        );

        let memory = store.create_memory(CreateMemoryInput {
            workspace_id: workspace_id.to_string(),
            conversation_id: Some(result.conversation_id.clone()),
            memory_type: extracted.memory_type.clone(),
            content: extracted.content.clone(),
            confidence: Some(extracted.confidence),
            metadata,
            effective_ttl_ms: None,
            embedding,
        })?;
        created.insert(extracted.temp_id.clone(), memory);
    }

    for edge in &result.relationships {
        let (Some(from), Some(to)) = (created.get(&edge.from_temp_id), created.get(&edge.to_temp_id))
        else {
            continue;
        };
        store.create_relationship(
            workspace_id,
            &from.id,
            &to.id,
            &edge.relationship_type,
            edge.confidence,
        )?;
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MakerConfig;
    use crate::context::tokenizer::ApproxTokenizer;
    use crate::extraction::chunker::{ChunkerConfig, ConversationMessage};
    use crate::extraction::llm::ScriptedLlm;
    use chrono::Utc;

    fn extractor_with(llm: Arc<ScriptedLlm>, config: ChunkerConfig) -> MemoryExtractor {
        let chunker = ConversationChunker::new(config, Arc::new(ApproxTokenizer)).unwrap();
        let maker = MakerLayer::new(llm.clone(), MakerConfig::default());
        MemoryExtractor::new(llm, chunker, maker)
    }

    fn conversation(message_count: usize) -> Conversation {
        Conversation {
            id: "conv-1".to_string(),
            messages: (0..message_count)
                .map(|i| ConversationMessage {
                    id: format!("msg-{}", i),
                    role: if i % 2 == 0 { "user".to_string() } else { "assistant".to_string() },
                    content: format!("message {} talks about acme corp and its plans..", i),
                    timestamp: Utc::now(),
                })
                .collect(),
        }
    }

    fn chunk_response(entities: &[(&str, &str, &str)], rels: &[(&str, &str)]) -> String {
        serde_json::json!({
            "memories": entities
                .iter()
                .map(|(id, ty, content)| serde_json::json!({
                    "id": id, "type": ty, "content": content, "confidence": 0.8
                }))
                .collect::<Vec<_>>(),
            "relationships": rels
                .iter()
                .map(|(from, to)| serde_json::json!({
                    "from": from, "to": to, "type": "relates_to", "confidence": 0.7
                }))
                .collect::<Vec<_>>(),
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_single_chunk_extraction() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(chunk_response(
            &[
                ("m1", "entity", "Acme Corp"),
                ("m2", "fact", "Acme Corp builds rockets"),
            ],
            &[("m1", "m2")],
        ))]));
        let extractor = extractor_with(llm, ChunkerConfig::default());

        let result = extractor
            .extract(&conversation(2), &ExtractionOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, ExtractionStatus::Success);
        assert!(!result.chunked);
        assert_eq!(result.memories.len(), 2);
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].from_temp_id, "c0:m1");
    }

    #[tokio::test]
    async fn test_cross_chunk_dedup_keeps_one_survivor() {
        // Three chunks each extracting "Acme Corp" plus a unique entity
        let responses: Vec<crate::error::Result<String>> = (0..3)
            .map(|i| {
                let unique = format!("unique entity number {}", i);
                Ok(chunk_response(
                    &[
                        ("m1", "entity", "Acme Corp"),
                        ("m2", "entity", unique.as_str()),
                    ],
                    &[("m1", "m2")],
                ))
            })
            .collect();
        let llm = Arc::new(ScriptedLlm::new(responses));
        let extractor = extractor_with(
            llm,
            ChunkerConfig {
                max_tokens_per_chunk: 30,
                overlap_tokens: Some(0),
                ..Default::default()
            },
        );

        // Enough messages for three chunks
        let result = extractor
            .extract(&conversation(6), &ExtractionOptions::default())
            .await
            .unwrap();

        assert_eq!(result.chunk_count, 3);
        let acme: Vec<&ExtractedMemory> = result
            .memories
            .iter()
            .filter(|m| m.content == "Acme Corp")
            .collect();
        assert_eq!(acme.len(), 1, "duplicates must collapse");
        assert!(acme[0].source_chunks.len() >= 2);
        assert_eq!(result.duplicates_merged, 2);

        // Every surviving relationship references surviving ids
        let ids: HashSet<&str> = result.memories.iter().map(|m| m.temp_id.as_str()).collect();
        for edge in &result.relationships {
            assert!(ids.contains(edge.from_temp_id.as_str()));
            assert!(ids.contains(edge.to_temp_id.as_str()));
        }
        // All three edges survive, remapped onto the Acme survivor
        assert_eq!(result.relationships.len(), 3);
    }

    #[tokio::test]
    async fn test_continue_on_error_yields_partial() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(chunk_response(&[("m1", "entity", "Acme Corp")], &[])),
            Err(MemoriaError::Llm("provider outage".to_string())),
        ]));
        let extractor = extractor_with(
            llm,
            ChunkerConfig {
                max_tokens_per_chunk: 45,
                overlap_tokens: Some(0),
                ..Default::default()
            },
        );

        let result = extractor
            .extract(&conversation(6), &ExtractionOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, ExtractionStatus::Partial);
        assert_eq!(result.chunk_errors.len(), result.chunk_count - 1);
        assert!(!result.memories.is_empty());
    }

    #[tokio::test]
    async fn test_fail_fast_aborts() {
        let llm = Arc::new(ScriptedLlm::new(vec![Err(MemoriaError::Llm(
            "provider outage".to_string(),
        ))]));
        let extractor = extractor_with(llm, ChunkerConfig::default());

        let err = extractor
            .extract(
                &conversation(2),
                &ExtractionOptions {
                    failure_mode: Some(FailureMode::FailFast),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoriaError::Llm(_)));
    }

    #[tokio::test]
    async fn test_all_chunks_failed_status() {
        let llm = Arc::new(ScriptedLlm::repeating("not json"));
        let extractor = extractor_with(llm, ChunkerConfig::default());

        let result = extractor
            .extract(&conversation(2), &ExtractionOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, ExtractionStatus::Failed);
        assert!(result.memories.is_empty());
    }

    #[tokio::test]
    async fn test_confidence_floor_drops_memories() {
        let response = serde_json::json!({
            "memories": [
                {"id": "m1", "type": "fact", "content": "solid fact", "confidence": 0.9},
                {"id": "m2", "type": "fact", "content": "shaky guess", "confidence": 0.1},
            ],
            "relationships": [],
        })
        .to_string();
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(response)]));
        let extractor = extractor_with(llm, ChunkerConfig::default());

        let result = extractor
            .extract(
                &conversation(2),
                &ExtractionOptions {
                    min_confidence: Some(0.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.memories[0].content, "solid fact");
    }

    #[tokio::test]
    async fn test_maker_strategy_produces_note_memories() {
        let notes = serde_json::json!({
            "summary": "The team agreed to adopt OAuth2 for all service authentication flows.",
            "decisions": ["Use OAuth2"],
            "todos": ["Draft the migration plan"],
        })
        .to_string();
        let llm = Arc::new(ScriptedLlm::repeating(&notes));
        let extractor = extractor_with(llm, ChunkerConfig::default());

        let result = extractor
            .extract(
                &conversation(2),
                &ExtractionOptions {
                    strategy: Some(ExtractionStrategyKind::MakerNotes),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(result.status, ExtractionStatus::Success);
        let types: Vec<&str> = result.memories.iter().map(|m| m.memory_type.as_str()).collect();
        assert!(types.contains(&"summary"));
        assert!(types.contains(&"decision"));
        assert!(types.contains(&"todo"));
    }

    #[tokio::test]
    async fn test_unknown_profile_fails() {
        let llm = Arc::new(ScriptedLlm::repeating("{}"));
        let extractor = extractor_with(llm, ChunkerConfig::default());

        let err = extractor
            .extract(
                &conversation(2),
                &ExtractionOptions {
                    profile: Some("aggressive".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MemoriaError::NotFound { .. }));
    }

    #[test]
    fn test_content_similarity() {
        assert!(content_similarity("Acme Corp", "acme corp") >= 0.99);
        assert!(content_similarity("Acme Corp builds rockets", "acme corp builds rockets!") >= 0.99);
        assert!(content_similarity("Acme Corp", "Globex Industries") < 0.2);
    }

    #[test]
    fn test_dedup_drops_self_edges() {
        let memories = vec![
            ExtractedMemory {
                temp_id: "c0:a".to_string(),
                memory_type: "entity".to_string(),
                content: "Acme Corp".to_string(),
                confidence: 0.7,
                metadata: HashMap::new(),
                source_chunks: vec![0],
            },
            ExtractedMemory {
                temp_id: "c1:a".to_string(),
                memory_type: "entity".to_string(),
                content: "Acme Corp".to_string(),
                confidence: 0.9,
                metadata: HashMap::new(),
                source_chunks: vec![1],
            },
        ];
        let relationships = vec![
            ExtractedRelationship {
                from_temp_id: "c0:a".to_string(),
                to_temp_id: "c1:a".to_string(),
                relationship_type: "relates_to".to_string(),
                confidence: 0.5,
            },
            ExtractedRelationship {
                from_temp_id: "c0:a".to_string(),
                to_temp_id: "c9:ghost".to_string(),
                relationship_type: "relates_to".to_string(),
                confidence: 0.5,
            },
        ];

        let (survivors, edges, merged, dropped) =
            dedup_across_chunks(memories, relationships, 0.85);
        assert_eq!(survivors.len(), 1);
        // Survivor keeps the highest confidence
        assert!((survivors[0].confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(survivors[0].source_chunks, vec![0, 1]);
        assert_eq!(merged, 1);
        // Both edges dropped: one became a self-edge, one references a ghost
        assert!(edges.is_empty());
        assert_eq!(dropped, 2);
    }
}
