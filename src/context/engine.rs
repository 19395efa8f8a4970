//! Context engine
//!
//! Façade over embedding, vector search, hydration, relationship
//! expansion, ranking and formatting. Templates and rankers live in
//! name-keyed registries; "default" is reserved and installed at
//! construction.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::embedding::{Embedder, EmbeddingCache};
use crate::error::{MemoriaError, Result};
use crate::store::MemoryStore;
use crate::types::{ScoredMemory, SearchOptions};

use super::formatter::{ContextFormatter, ContextTemplate, FormattedContext};
use super::ranker::Ranker;
use super::tokenizer::TokenCounter;

/// Reserved registry name
pub const DEFAULT_NAME: &str = "default";

/// Options for a context engine request
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub limit: Option<usize>,
    pub types: Option<Vec<String>>,
    pub min_confidence: Option<f64>,
    pub include_archived: bool,
    /// BFS depth for relationship expansion (0 = none)
    pub expansion_depth: usize,
    /// Registered ranker name; default when absent
    pub ranker: Option<String>,
    /// Registered template name; default when absent
    pub template: Option<String>,
    /// Token budget for context assembly; engine default when absent
    pub token_budget: Option<usize>,
}

impl Default for ContextRequest {
    fn default() -> Self {
        Self {
            limit: Some(10),
            types: None,
            min_confidence: None,
            include_archived: false,
            expansion_depth: 0,
            ranker: None,
            template: None,
            token_budget: None,
        }
    }
}

/// A progressive-delivery event for streamed context
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    Token { data: String },
    Final {
        token_count: usize,
        truncated: bool,
        template: String,
    },
}

impl ContextEvent {
    /// Wire form: `event: <kind>\ndata: <json>\n\n`
    pub fn to_sse(&self) -> String {
        match self {
            ContextEvent::Token { data } => format!(
                "event: token\ndata: {}\n\n",
                serde_json::json!({ "text": data })
            ),
            ContextEvent::Final {
                token_count,
                truncated,
                template,
            } => format!(
                "event: final\ndata: {}\n\n",
                serde_json::json!({
                    "tokenCount": token_count,
                    "truncated": truncated,
                    "template": template,
                })
            ),
        }
    }
}

/// Retrieval + context assembly façade
pub struct ContextEngine {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
    formatter: ContextFormatter,
    templates: RwLock<HashMap<String, ContextTemplate>>,
    rankers: RwLock<HashMap<String, Ranker>>,
    default_token_budget: usize,
}

impl ContextEngine {
    /// Build an engine, validating its collaborators
    ///
    /// Fails when the embedder's dimensionality does not match the vector
    /// index or the default token budget is zero.
    pub fn new(
        store: Arc<MemoryStore>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<EmbeddingCache>,
        tokenizer: Arc<dyn TokenCounter>,
        default_token_budget: usize,
    ) -> Result<Self> {
        if embedder.dimensions() != store.vector_dimensions() {
            return Err(MemoriaError::validation(
                "embedder",
                format!(
                    "embedder produces {} dimensions but the index expects {}",
                    embedder.dimensions(),
                    store.vector_dimensions()
                ),
            ));
        }
        if default_token_budget == 0 {
            return Err(MemoriaError::validation(
                "default_token_budget",
                "must be positive",
            ));
        }

        let mut templates = HashMap::new();
        templates.insert(DEFAULT_NAME.to_string(), ContextTemplate::default_template());
        let mut rankers = HashMap::new();
        rankers.insert(DEFAULT_NAME.to_string(), Ranker::default());

        Ok(Self {
            store,
            embedder,
            cache,
            formatter: ContextFormatter::new(tokenizer),
            templates: RwLock::new(templates),
            rankers: RwLock::new(rankers),
            default_token_budget,
        })
    }

    // ========================================================================
    // Registries
    // ========================================================================

    /// Register a template; names are unique and "default" is reserved
    pub fn add_template(&self, template: ContextTemplate) -> Result<()> {
        if template.name == DEFAULT_NAME {
            return Err(MemoriaError::validation("template", "\"default\" is reserved"));
        }
        let mut templates = self.templates.write();
        if templates.contains_key(&template.name) {
            return Err(MemoriaError::Conflict(format!(
                "template already registered: {}",
                template.name
            )));
        }
        templates.insert(template.name.clone(), template);
        Ok(())
    }

    /// Register a ranker; names are unique and "default" is reserved
    pub fn add_ranker(&self, name: &str, ranker: Ranker) -> Result<()> {
        if name == DEFAULT_NAME {
            return Err(MemoriaError::validation("ranker", "\"default\" is reserved"));
        }
        let mut rankers = self.rankers.write();
        if rankers.contains_key(name) {
            return Err(MemoriaError::Conflict(format!(
                "ranker already registered: {}",
                name
            )));
        }
        rankers.insert(name.to_string(), ranker);
        Ok(())
    }

    fn template(&self, name: &str) -> Result<ContextTemplate> {
        self.templates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MemoriaError::TemplateNotFound(name.to_string()))
    }

    fn ranker(&self, name: &str) -> Result<Ranker> {
        self.rankers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MemoriaError::not_found("ranker", name))
    }

    // ========================================================================
    // Search
    // ========================================================================

    /// Embed the query (through the cache) and search
    pub fn search(
        &self,
        query_text: &str,
        workspace_id: &str,
        request: &ContextRequest,
    ) -> Result<Vec<ScoredMemory>> {
        if query_text.trim().is_empty() {
            return Err(MemoriaError::validation("query", "must be non-empty"));
        }
        if workspace_id.trim().is_empty() {
            return Err(MemoriaError::validation("workspace_id", "must be non-empty"));
        }

        let vector = self.embed_cached(query_text)?;
        self.search_by_vector(&vector, workspace_id, request)
    }

    /// Search from a caller-supplied vector
    pub fn search_by_vector(
        &self,
        vector: &[f32],
        workspace_id: &str,
        request: &ContextRequest,
    ) -> Result<Vec<ScoredMemory>> {
        if vector.len() != self.store.vector_dimensions() {
            return Err(MemoriaError::validation(
                "vector",
                format!(
                    "expected {} dimensions, got {}",
                    self.store.vector_dimensions(),
                    vector.len()
                ),
            ));
        }

        let options = SearchOptions {
            limit: request.limit,
            types: request.types.clone(),
            include_archived: request.include_archived,
            min_confidence: request.min_confidence,
        };
        let mut results = self.store.search_memories(workspace_id, vector, &options)?;

        if request.expansion_depth > 0 {
            results = self.expand_relationships(results, workspace_id, request.expansion_depth)?;
        }

        let ranker = self.ranker(request.ranker.as_deref().unwrap_or(DEFAULT_NAME))?;
        Ok(ranker.rank(results, Utc::now()))
    }

    /// BFS over the relationship graph, deduplicating by memory id
    ///
    /// Expanded memories join with zero similarity; the ranker decides
    /// their final position.
    fn expand_relationships(
        &self,
        seed: Vec<ScoredMemory>,
        workspace_id: &str,
        depth: usize,
    ) -> Result<Vec<ScoredMemory>> {
        let mut visited: HashSet<String> = seed.iter().map(|r| r.memory.id.clone()).collect();
        let mut queue: VecDeque<(String, usize)> =
            seed.iter().map(|r| (r.memory.id.clone(), 0)).collect();
        let mut results = seed;

        while let Some((id, level)) = queue.pop_front() {
            if level >= depth {
                continue;
            }
            for edge in self.store.get_relationships(&id)? {
                let other = if edge.from_memory_id == id {
                    edge.to_memory_id
                } else {
                    edge.from_memory_id
                };
                if !visited.insert(other.clone()) {
                    continue;
                }
                if let Some(memory) = self.store.peek_memory(&other, workspace_id)? {
                    results.push(ScoredMemory {
                        memory,
                        similarity_score: 0.0,
                        rank: 0.0,
                    });
                    queue.push_back((other, level + 1));
                }
            }
        }

        Ok(results)
    }

    fn embed_cached(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.embedder.model_name().to_string();
        if let Some(cached) = self.cache.get(&model, text) {
            return Ok(cached.to_vec());
        }
        let vector = self
            .embedder
            .embed(text)
            .map_err(|e| MemoriaError::Embedding(e.to_string()))?;
        self.cache.set(&model, text, vector.clone());
        Ok(vector)
    }

    // ========================================================================
    // Context assembly
    // ========================================================================

    /// Search, rank and format into a budgeted context block
    pub fn build_context(
        &self,
        query_text: &str,
        workspace_id: &str,
        request: &ContextRequest,
    ) -> Result<FormattedContext> {
        let results = self.search(query_text, workspace_id, request)?;
        let template = self.template(request.template.as_deref().unwrap_or(DEFAULT_NAME))?;
        let budget = request.token_budget.unwrap_or(self.default_token_budget);

        Ok(self.formatter.format(&results, &template, budget))
    }

    /// Build a context and chunk it into progressive-delivery events,
    /// terminated by a `final` event
    pub fn stream_context(
        &self,
        query_text: &str,
        workspace_id: &str,
        request: &ContextRequest,
    ) -> Result<Vec<ContextEvent>> {
        let formatted = self.build_context(query_text, workspace_id, request)?;

        let mut events: Vec<ContextEvent> = split_for_streaming(&formatted.context)
            .into_iter()
            .map(|data| ContextEvent::Token { data })
            .collect();
        events.push(ContextEvent::Final {
            token_count: formatted.token_count,
            truncated: formatted.truncated,
            template: formatted.template,
        });
        Ok(events)
    }
}

/// Chunk context text on line boundaries for token events
fn split_for_streaming(context: &str) -> Vec<String> {
    if context.is_empty() {
        return Vec::new();
    }
    context.split_inclusive('\n').map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LifecycleConfig;
    use crate::context::tokenizer::ApproxTokenizer;
    use crate::embedding::HashEmbedder;
    use crate::lifecycle::{DecayCalculator, DecayFunction, ImportanceScorer, LifecycleManager};
    use crate::storage::{MigrationRunner, SqliteAdapter};
    use crate::types::{CreateMemoryInput, WorkspaceType};
    use crate::vector::InMemoryVectorIndex;

    const DIMS: usize = 64;

    fn engine() -> (ContextEngine, Arc<MemoryStore>, String, Arc<HashEmbedder>) {
        let storage = Arc::new(SqliteAdapter::open_in_memory().unwrap());
        MigrationRunner::with_builtin(storage.as_ref())
            .unwrap()
            .up()
            .unwrap();
        let vectors = Arc::new(InMemoryVectorIndex::new(DIMS));
        let lifecycle = Arc::new(LifecycleManager::new(
            storage.clone(),
            vectors.clone(),
            DecayCalculator::new(DecayFunction::Exponential { lambda: 0.05 }).unwrap(),
            ImportanceScorer::default(),
            LifecycleConfig::default(),
        ));
        let store = Arc::new(MemoryStore::new(storage, vectors, lifecycle));
        let workspace = store
            .create_workspace("notes", WorkspaceType::Personal, None)
            .unwrap();

        let embedder = Arc::new(HashEmbedder::new(DIMS));
        let engine = ContextEngine::new(
            store.clone(),
            embedder.clone(),
            Arc::new(EmbeddingCache::default()),
            Arc::new(ApproxTokenizer),
            2048,
        )
        .unwrap();
        (engine, store, workspace.id, embedder)
    }

    fn seed(store: &MemoryStore, embedder: &HashEmbedder, ws: &str, content: &str) -> String {
        let embedding = embedder.embed(content).unwrap();
        let memory = store
            .create_memory(CreateMemoryInput {
                embedding: Some(embedding),
                confidence: Some(0.9),
                ..CreateMemoryInput::new(ws, "fact", content)
            })
            .unwrap();
        memory.id
    }

    #[test]
    fn test_constructor_validation() {
        let (_, store, _, _) = engine();
        let wrong_dims = Arc::new(HashEmbedder::new(DIMS + 1));
        assert!(ContextEngine::new(
            store.clone(),
            wrong_dims,
            Arc::new(EmbeddingCache::default()),
            Arc::new(ApproxTokenizer),
            2048,
        )
        .is_err());

        assert!(ContextEngine::new(
            store,
            Arc::new(HashEmbedder::new(DIMS)),
            Arc::new(EmbeddingCache::default()),
            Arc::new(ApproxTokenizer),
            0,
        )
        .is_err());
    }

    #[test]
    fn test_search_ranks_results() {
        let (engine, store, ws, embedder) = engine();
        seed(&store, &embedder, &ws, "rust memory lifecycle engine");
        seed(&store, &embedder, &ws, "completely unrelated gardening tips");

        let results = engine
            .search("rust memory lifecycle", &ws, &ContextRequest::default())
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.content, "rust memory lifecycle engine");
        assert!(results[0].rank >= results[1].rank);
    }

    #[test]
    fn test_search_validation() {
        let (engine, _, ws, _) = engine();
        assert!(engine.search("  ", &ws, &ContextRequest::default()).is_err());
        assert!(engine.search("query", "", &ContextRequest::default()).is_err());
        assert!(engine
            .search_by_vector(&[0.0; 3], &ws, &ContextRequest::default())
            .is_err());
    }

    #[test]
    fn test_relationship_expansion_dedupes() {
        let (engine, store, ws, embedder) = engine();
        let a = seed(&store, &embedder, &ws, "rust memory lifecycle engine");
        let b = seed(&store, &embedder, &ws, "orthogonal note on gardening");
        // Cycle between the two
        store.create_relationship(&ws, &a, &b, "relates_to", 1.0).unwrap();
        store.create_relationship(&ws, &b, &a, "supersedes", 1.0).unwrap();

        let results = engine
            .search(
                "rust memory lifecycle",
                &ws,
                &ContextRequest {
                    limit: Some(1),
                    expansion_depth: 3,
                    ..Default::default()
                },
            )
            .unwrap();

        // Expansion pulls in b exactly once despite the cycle
        assert_eq!(results.len(), 2);
        let ids: Vec<&str> = results.iter().map(|r| r.memory.id.as_str()).collect();
        assert!(ids.contains(&a.as_str()));
        assert!(ids.contains(&b.as_str()));
    }

    #[test]
    fn test_embedding_cache_hit_on_repeat_search() {
        let (engine, store, ws, embedder) = engine();
        seed(&store, &embedder, &ws, "cached query content");

        engine.search("cached query", &ws, &ContextRequest::default()).unwrap();
        engine.search("cached query", &ws, &ContextRequest::default()).unwrap();

        let stats = engine.cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_build_context_respects_budget() {
        let (engine, store, ws, embedder) = engine();
        for i in 0..10 {
            seed(
                &store,
                &embedder,
                &ws,
                &format!("memory number {} with some padding text to occupy tokens", i),
            );
        }

        let formatted = engine
            .build_context(
                "memory number",
                &ws,
                &ContextRequest {
                    token_budget: Some(40),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(formatted.token_count <= 40);
        assert!(formatted.truncated);
        assert!(!formatted.memories.is_empty());
    }

    #[test]
    fn test_unknown_template_and_ranker() {
        let (engine, store, ws, embedder) = engine();
        seed(&store, &embedder, &ws, "some content");

        let err = engine
            .build_context(
                "query",
                &ws,
                &ContextRequest {
                    template: Some("missing".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, MemoriaError::TemplateNotFound(_)));

        assert!(engine
            .search(
                "query",
                &ws,
                &ContextRequest {
                    ranker: Some("missing".to_string()),
                    ..Default::default()
                },
            )
            .is_err());
    }

    #[test]
    fn test_registries_enforce_uniqueness() {
        let (engine, _, _, _) = engine();

        let mut template = ContextTemplate::default_template();
        assert!(engine.add_template(template.clone()).is_err()); // reserved

        template.name = "compact".to_string();
        engine.add_template(template.clone()).unwrap();
        assert!(engine.add_template(template).is_err()); // duplicate

        assert!(engine.add_ranker("default", Ranker::default()).is_err());
        engine.add_ranker("recency", Ranker::default()).unwrap();
        assert!(engine.add_ranker("recency", Ranker::default()).is_err());
    }

    #[test]
    fn test_stream_context_terminates_with_final() {
        let (engine, store, ws, embedder) = engine();
        seed(&store, &embedder, &ws, "streamable content");

        let events = engine
            .stream_context("streamable", &ws, &ContextRequest::default())
            .unwrap();
        assert!(events.len() >= 2);
        assert!(matches!(events.last(), Some(ContextEvent::Final { .. })));

        let sse = events[0].to_sse();
        assert!(sse.starts_with("event: token\ndata: "));
        assert!(sse.ends_with("\n\n"));

        let final_sse = events.last().unwrap().to_sse();
        assert!(final_sse.starts_with("event: final\ndata: "));
    }
}
