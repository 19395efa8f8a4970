//! Memory store client
//!
//! The public façade over the relational store and the vector index:
//! create/get/search/update with lifecycle field initialization and
//! workspace scoping enforced on every query.
//!
//! The two stores are not atomic: memory rows are written first, and the
//! vector upsert is best-effort with a `vector_pending` flag left for the
//! reconciler when it fails.

pub mod rows;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{MemoriaError, Result};
use crate::lifecycle::LifecycleManager;
use crate::storage::{SqlValue, StorageAdapter};
use crate::types::{
    compute_content_hash, normalize_workspace_name, CreateMemoryInput, LifecycleState, Memory,
    MemoryId, Relationship, ScoredMemory, SearchOptions, UpdateMemoryInput, Workspace,
    WorkspaceType,
};
use crate::vector::{VectorFilter, VectorIndex, VectorMetadata};

use rows::{
    archived_from_row, memory_from_row, relationship_from_row, ARCHIVED_COLUMNS, MEMORY_COLUMNS,
    RELATIONSHIP_COLUMNS,
};

/// Result of a workspace consolidation pass
#[derive(Debug, Clone, Default)]
pub struct ConsolidationReport {
    /// (survivor id, duplicate id, similarity) pairs found
    pub candidates: Vec<(MemoryId, MemoryId, f64)>,
    /// Duplicates actually merged (zero under dry run)
    pub merged: u64,
    pub dry_run: bool,
}

/// Word-set Jaccard similarity over lowercased content
fn word_jaccard(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        s.to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| !w.is_empty())
            .collect()
    };
    let set_a = words(a);
    let set_b = words(b);

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

/// Counts and sizes for a workspace's stores
#[derive(Debug, Clone, Default)]
pub struct MemoryStoreStats {
    pub memory_count: i64,
    pub archived_count: i64,
    pub relationship_count: i64,
    pub event_count: i64,
    pub pending_vectors: i64,
    pub db_size_bytes: Option<i64>,
    pub type_counts: HashMap<String, i64>,
}

/// Public client over storage, vectors and the lifecycle manager
pub struct MemoryStore {
    storage: Arc<dyn StorageAdapter>,
    vectors: Arc<dyn VectorIndex>,
    lifecycle: Arc<LifecycleManager>,
}

impl MemoryStore {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        vectors: Arc<dyn VectorIndex>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            storage,
            vectors,
            lifecycle,
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Dimensionality of the attached vector index
    pub fn vector_dimensions(&self) -> usize {
        self.vectors.dimensions()
    }

    /// Read a memory without recording an access (used by relationship
    /// expansion, which should not distort access stats)
    pub fn peek_memory(&self, memory_id: &str, workspace_id: &str) -> Result<Option<Memory>> {
        let rows = self.storage.query(
            &format!(
                "SELECT {} FROM memories WHERE id = $1 AND workspace_id = $2",
                MEMORY_COLUMNS
            ),
            &[SqlValue::from(memory_id), SqlValue::from(workspace_id)],
        )?;
        rows.first().map(memory_from_row).transpose()
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    /// Create a workspace with a normalized name
    pub fn create_workspace(
        &self,
        name: &str,
        workspace_type: WorkspaceType,
        owner_id: Option<&str>,
    ) -> Result<Workspace> {
        let normalized = normalize_workspace_name(name)
            .map_err(|e| MemoriaError::validation("name", e.to_string()))?;
        let workspace = Workspace {
            id: Uuid::new_v4().to_string(),
            name: normalized,
            workspace_type,
            owner_id: owner_id.map(|s| s.to_string()),
            created_at: Utc::now(),
        };

        self.storage.execute(
            "INSERT INTO workspaces (id, name, workspace_type, owner_id, created_at)
             VALUES ($1, $2, $3, $4, $5)",
            &[
                SqlValue::from(workspace.id.clone()),
                SqlValue::from(workspace.name.clone()),
                SqlValue::from(workspace.workspace_type.as_str()),
                SqlValue::from(workspace.owner_id.clone()),
                SqlValue::from(workspace.created_at),
            ],
        )?;

        Ok(workspace)
    }

    pub fn get_workspace(&self, workspace_id: &str) -> Result<Workspace> {
        let rows = self.storage.query(
            "SELECT id, name, workspace_type, owner_id, created_at FROM workspaces WHERE id = $1",
            &[SqlValue::from(workspace_id)],
        )?;
        let row = rows
            .first()
            .ok_or_else(|| MemoriaError::not_found("workspace", workspace_id))?;

        Ok(Workspace {
            id: row.get_str("id")?,
            name: row.get_str("name")?,
            workspace_type: row
                .get_str("workspace_type")?
                .parse()
                .map_err(MemoriaError::Database)?,
            owner_id: row.get_opt_str("owner_id")?,
            created_at: row.get_datetime("created_at")?,
        })
    }

    fn require_workspace(&self, workspace_id: &str) -> Result<()> {
        let rows = self.storage.query(
            "SELECT id FROM workspaces WHERE id = $1",
            &[SqlValue::from(workspace_id)],
        )?;
        if rows.is_empty() {
            return Err(MemoriaError::not_found("workspace", workspace_id));
        }
        Ok(())
    }

    // ========================================================================
    // Memories
    // ========================================================================

    /// Create a memory with default lifecycle fields
    ///
    /// The row is written first; when an embedding is supplied the vector
    /// upsert follows best-effort, leaving `vector_pending` set on failure.
    pub fn create_memory(&self, input: CreateMemoryInput) -> Result<Memory> {
        self.require_workspace(&input.workspace_id)?;

        if input.content.trim().is_empty() {
            return Err(MemoriaError::validation("content", "must be non-empty"));
        }
        if input.memory_type.trim().is_empty() {
            return Err(MemoriaError::validation("type", "must be non-empty"));
        }
        let confidence = input.confidence.unwrap_or(1.0);
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(MemoriaError::validation("confidence", "must be in [0,1]"));
        }
        if let Some(embedding) = &input.embedding {
            if embedding.len() != self.vectors.dimensions() {
                return Err(MemoriaError::validation(
                    "embedding",
                    format!(
                        "expected {} dimensions, got {}",
                        self.vectors.dimensions(),
                        embedding.len()
                    ),
                ));
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let content_hash = compute_content_hash(&input.content);

        self.storage.execute(
            "INSERT INTO memories
                (id, workspace_id, conversation_id, memory_type, content, confidence,
                 metadata, lifecycle_state, last_accessed_at, access_count,
                 importance_score, decay_score, effective_ttl_ms, pinned,
                 vector_pending, content_hash, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0.5, 1.0, $10, 0, 1, $11, $12, $12)",
            &[
                SqlValue::from(id.clone()),
                SqlValue::from(input.workspace_id.clone()),
                SqlValue::from(input.conversation_id.clone()),
                SqlValue::from(input.memory_type.clone()),
                SqlValue::from(input.content.clone()),
                SqlValue::Real(confidence),
                SqlValue::from(serde_json::to_string(&input.metadata)?),
                SqlValue::from(LifecycleState::Active.as_str()),
                SqlValue::from(now),
                SqlValue::from(input.effective_ttl_ms),
                SqlValue::from(content_hash),
                SqlValue::from(now),
            ],
        )?;

        if let Some(embedding) = &input.embedding {
            let upserted = self.vectors.upsert(
                &id,
                embedding,
                VectorMetadata {
                    workspace_id: input.workspace_id.clone(),
                    memory_type: input.memory_type.clone(),
                },
            );
            match upserted {
                Ok(()) => {
                    self.storage.execute(
                        "UPDATE memories SET vector_pending = 0 WHERE id = $1",
                        &[SqlValue::from(id.clone())],
                    )?;
                }
                Err(e) => {
                    // Row stays; the reconciler owes the upsert
                    tracing::warn!(memory_id = %id, "vector upsert failed on create: {}", e);
                }
            }
        }

        self.get_memory_raw(&id, &input.workspace_id)
    }

    fn get_memory_raw(&self, memory_id: &str, workspace_id: &str) -> Result<Memory> {
        let rows = self.storage.query(
            &format!(
                "SELECT {} FROM memories WHERE id = $1 AND workspace_id = $2",
                MEMORY_COLUMNS
            ),
            &[SqlValue::from(memory_id), SqlValue::from(workspace_id)],
        )?;
        rows.first()
            .map(memory_from_row)
            .transpose()?
            .ok_or_else(|| MemoriaError::not_found("memory", memory_id))
    }

    /// Fetch a memory and record the access without blocking the caller
    pub fn get_memory(&self, memory_id: &str, workspace_id: &str) -> Result<Memory> {
        let memory = self.get_memory_raw(memory_id, workspace_id)?;
        self.touch(memory_id, workspace_id);
        Ok(memory)
    }

    /// Fire-and-forget access tracking
    fn touch(&self, memory_id: &str, workspace_id: &str) {
        let lifecycle = self.lifecycle.clone();
        let id = memory_id.to_string();
        let ws = workspace_id.to_string();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn_blocking(move || {
                if let Err(e) = lifecycle.record_access(&id, &ws) {
                    tracing::debug!(memory_id = %id, "access tracking failed: {}", e);
                }
            });
        } else if let Err(e) = lifecycle.record_access(&id, &ws) {
            tracing::debug!(memory_id = %id, "access tracking failed: {}", e);
        }
    }

    /// Vector search with hydration
    ///
    /// Results come back in index order (descending similarity). Ids whose
    /// row has moved to the archive are included only under
    /// `include_archived`.
    pub fn search_memories(
        &self,
        workspace_id: &str,
        query_vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<ScoredMemory>> {
        self.require_workspace(workspace_id)?;

        let limit = options.limit.unwrap_or(10).clamp(1, 1000);
        let filter = VectorFilter {
            workspace_id: workspace_id.to_string(),
            types: options.types.clone(),
        };

        let matches = self.vectors.search(query_vector, limit, &filter)?;

        let mut results = Vec::with_capacity(matches.len());
        for m in matches {
            let hot = self.storage.query(
                &format!(
                    "SELECT {} FROM memories WHERE id = $1 AND workspace_id = $2",
                    MEMORY_COLUMNS
                ),
                &[SqlValue::from(m.id.clone()), SqlValue::from(workspace_id)],
            )?;

            let memory = if let Some(row) = hot.first() {
                Some(memory_from_row(row)?)
            } else if options.include_archived {
                self.hydrate_archived(&m.id, workspace_id)?
            } else {
                None
            };

            if let Some(memory) = memory {
                if let Some(min) = options.min_confidence {
                    if memory.confidence < min {
                        continue;
                    }
                }
                results.push(ScoredMemory {
                    memory,
                    similarity_score: m.score,
                    rank: 0.0,
                });
            }
        }

        Ok(results)
    }

    fn hydrate_archived(&self, memory_id: &str, workspace_id: &str) -> Result<Option<Memory>> {
        let rows = self.storage.query(
            &format!(
                "SELECT {} FROM archived_memories WHERE id = $1 AND workspace_id = $2",
                ARCHIVED_COLUMNS
            ),
            &[SqlValue::from(memory_id), SqlValue::from(workspace_id)],
        )?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let archived = archived_from_row(row)?;

        Ok(Some(Memory {
            id: archived.id,
            workspace_id: archived.workspace_id,
            conversation_id: archived.conversation_id,
            memory_type: archived.memory_type,
            content: archived.content,
            confidence: archived.confidence,
            metadata: archived.metadata,
            lifecycle_state: LifecycleState::Archived,
            last_accessed_at: archived.last_accessed_at,
            access_count: archived.access_count,
            importance_score: archived.importance_score,
            decay_score: 1.0,
            effective_ttl_ms: None,
            pinned: false,
            pinned_by: None,
            pinned_at: None,
            archived_at: Some(archived.archived_at),
            expires_at: Some(archived.expires_at),
            vector_pending: false,
            content_hash: archived.content_hash,
            created_at: archived.created_at,
            updated_at: archived.updated_at,
        }))
    }

    /// Update content fields
    ///
    /// A content change refreshes the hash and re-queues the vector.
    pub fn update_memory(
        &self,
        memory_id: &str,
        workspace_id: &str,
        input: &UpdateMemoryInput,
    ) -> Result<Memory> {
        if let Some(confidence) = input.confidence {
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(MemoriaError::validation("confidence", "must be in [0,1]"));
            }
        }
        if let Some(content) = &input.content {
            if content.trim().is_empty() {
                return Err(MemoriaError::validation("content", "must be non-empty"));
            }
        }

        let current = self.get_memory_raw(memory_id, workspace_id)?;
        let now = Utc::now();

        let content_changed = input
            .content
            .as_ref()
            .map(|c| c != &current.content)
            .unwrap_or(false);
        let new_content = input.content.clone().unwrap_or(current.content);
        let new_hash = if content_changed {
            compute_content_hash(&new_content)
        } else {
            current.content_hash.clone().unwrap_or_default()
        };

        let metadata = match &input.metadata {
            Some(m) => serde_json::to_string(m)?,
            None => serde_json::to_string(&current.metadata)?,
        };

        self.storage.execute(
            "UPDATE memories
             SET content = $1, memory_type = $2, confidence = $3, metadata = $4,
                 content_hash = $5,
                 vector_pending = CASE WHEN $6 THEN 1 ELSE vector_pending END,
                 updated_at = $7
             WHERE id = $8 AND workspace_id = $9",
            &[
                SqlValue::from(new_content),
                SqlValue::from(input.memory_type.clone().unwrap_or(current.memory_type)),
                SqlValue::Real(input.confidence.unwrap_or(current.confidence)),
                SqlValue::from(metadata),
                SqlValue::from(new_hash),
                SqlValue::from(content_changed),
                SqlValue::from(now),
                SqlValue::from(memory_id),
                SqlValue::from(workspace_id),
            ],
        )?;

        self.get_memory_raw(memory_id, workspace_id)
    }

    /// Page memories by lifecycle state
    ///
    /// `Archived` and `Expired` read from the archive table, hydrated into
    /// the memory shape.
    pub fn get_memories_by_lifecycle_state(
        &self,
        workspace_id: &str,
        state: LifecycleState,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Memory>> {
        let limit = limit.clamp(1, 1000);

        match state {
            LifecycleState::Archived | LifecycleState::Expired => {
                let comparison = if state == LifecycleState::Expired {
                    "AND expires_at <= $2"
                } else {
                    "AND expires_at > $2"
                };
                let rows = self.storage.query(
                    &format!(
                        "SELECT {} FROM archived_memories
                         WHERE workspace_id = $1 {}
                         ORDER BY archived_at ASC
                         LIMIT $3 OFFSET $4",
                        ARCHIVED_COLUMNS, comparison
                    ),
                    &[
                        SqlValue::from(workspace_id),
                        SqlValue::from(Utc::now()),
                        SqlValue::Integer(limit as i64),
                        SqlValue::Integer(offset as i64),
                    ],
                )?;

                let mut memories = Vec::with_capacity(rows.len());
                for row in &rows {
                    let archived = archived_from_row(row)?;
                    if let Some(memory) = self.hydrate_archived(&archived.id, workspace_id)? {
                        let mut memory = memory;
                        if state == LifecycleState::Expired {
                            memory.lifecycle_state = LifecycleState::Expired;
                        }
                        memories.push(memory);
                    }
                }
                Ok(memories)
            }
            _ => {
                let rows = self.storage.query(
                    &format!(
                        "SELECT {} FROM memories
                         WHERE workspace_id = $1 AND lifecycle_state = $2
                         ORDER BY last_accessed_at ASC
                         LIMIT $3 OFFSET $4",
                        MEMORY_COLUMNS
                    ),
                    &[
                        SqlValue::from(workspace_id),
                        SqlValue::from(state.as_str()),
                        SqlValue::Integer(limit as i64),
                        SqlValue::Integer(offset as i64),
                    ],
                )?;
                rows.iter().map(memory_from_row).collect()
            }
        }
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    /// Create a directed relationship between two memories
    ///
    /// Both endpoints must exist (hot or archived) in the same workspace.
    pub fn create_relationship(
        &self,
        workspace_id: &str,
        from_memory_id: &str,
        to_memory_id: &str,
        relationship_type: &str,
        confidence: f64,
    ) -> Result<Relationship> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(MemoriaError::validation("confidence", "must be in [0,1]"));
        }
        if relationship_type.trim().is_empty() {
            return Err(MemoriaError::validation("relationship_type", "must be non-empty"));
        }

        for endpoint in [from_memory_id, to_memory_id] {
            let exists = self.storage.query(
                "SELECT id FROM memories WHERE id = $1 AND workspace_id = $2
                 UNION SELECT id FROM archived_memories WHERE id = $1 AND workspace_id = $2",
                &[SqlValue::from(endpoint), SqlValue::from(workspace_id)],
            )?;
            if exists.is_empty() {
                return Err(MemoriaError::not_found("memory", endpoint));
            }
        }

        let relationship = Relationship {
            id: Uuid::new_v4().to_string(),
            from_memory_id: from_memory_id.to_string(),
            to_memory_id: to_memory_id.to_string(),
            relationship_type: relationship_type.to_string(),
            confidence,
            created_at: Utc::now(),
        };

        self.storage.execute(
            "INSERT INTO relationships (id, from_memory_id, to_memory_id, relationship_type, confidence, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                SqlValue::from(relationship.id.clone()),
                SqlValue::from(relationship.from_memory_id.clone()),
                SqlValue::from(relationship.to_memory_id.clone()),
                SqlValue::from(relationship.relationship_type.clone()),
                SqlValue::Real(relationship.confidence),
                SqlValue::from(relationship.created_at),
            ],
        )?;

        Ok(relationship)
    }

    /// All relationships touching a memory
    pub fn get_relationships(&self, memory_id: &str) -> Result<Vec<Relationship>> {
        let rows = self.storage.query(
            &format!(
                "SELECT {} FROM relationships
                 WHERE from_memory_id = $1 OR to_memory_id = $1
                 ORDER BY created_at ASC",
                RELATIONSHIP_COLUMNS
            ),
            &[SqlValue::from(memory_id)],
        )?;
        rows.iter().map(relationship_from_row).collect()
    }

    // ========================================================================
    // Consolidation
    // ========================================================================

    /// Find and merge near-duplicate memories in a workspace
    ///
    /// Same-type memories whose normalized content similarity meets the
    /// threshold collapse into the higher-confidence survivor; the
    /// duplicate's relationships are re-pointed at the survivor and the
    /// duplicate is archived (permanent deletion stays with the cleanup
    /// service). Under `dry_run` only the candidate pairs are reported.
    pub fn consolidate(
        &self,
        workspace_id: &str,
        threshold: f64,
        dry_run: bool,
    ) -> Result<ConsolidationReport> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(MemoriaError::validation("threshold", "must be in [0,1]"));
        }
        self.require_workspace(workspace_id)?;

        let rows = self.storage.query(
            &format!(
                "SELECT {} FROM memories
                 WHERE workspace_id = $1 AND lifecycle_state IN ('active', 'decaying')
                 ORDER BY created_at ASC
                 LIMIT 1000",
                MEMORY_COLUMNS
            ),
            &[SqlValue::from(workspace_id)],
        )?;
        let memories: Vec<Memory> = rows
            .iter()
            .map(memory_from_row)
            .collect::<Result<Vec<_>>>()?;

        let mut report = ConsolidationReport {
            dry_run,
            ..Default::default()
        };
        let mut absorbed: HashSet<String> = HashSet::new();

        for i in 0..memories.len() {
            if absorbed.contains(&memories[i].id) {
                continue;
            }
            for j in (i + 1)..memories.len() {
                if absorbed.contains(&memories[j].id) {
                    continue;
                }
                if memories[i].memory_type != memories[j].memory_type {
                    continue;
                }
                let similarity = word_jaccard(&memories[i].content, &memories[j].content);
                if similarity < threshold {
                    continue;
                }

                // Higher confidence survives; ties keep the older row
                let (survivor, duplicate) = if memories[j].confidence > memories[i].confidence {
                    (&memories[j], &memories[i])
                } else {
                    (&memories[i], &memories[j])
                };
                report
                    .candidates
                    .push((survivor.id.clone(), duplicate.id.clone(), similarity));
                absorbed.insert(duplicate.id.clone());

                if !dry_run {
                    self.absorb_duplicate(workspace_id, &survivor.id, &duplicate.id)?;
                    report.merged += 1;
                }

                // The outer memory may itself have been absorbed
                if absorbed.contains(&memories[i].id) {
                    break;
                }
            }
        }

        Ok(report)
    }

    fn absorb_duplicate(&self, workspace_id: &str, survivor_id: &str, duplicate_id: &str) -> Result<()> {
        {
            let tx = self.storage.begin()?;
            // Re-point edges; pre-existing identical edges win over moved ones
            tx.execute(
                "UPDATE OR IGNORE relationships SET from_memory_id = $1 WHERE from_memory_id = $2",
                &[SqlValue::from(survivor_id), SqlValue::from(duplicate_id)],
            )?;
            tx.execute(
                "UPDATE OR IGNORE relationships SET to_memory_id = $1 WHERE to_memory_id = $2",
                &[SqlValue::from(survivor_id), SqlValue::from(duplicate_id)],
            )?;
            tx.execute(
                "DELETE FROM relationships WHERE from_memory_id = $1 OR to_memory_id = $1",
                &[SqlValue::from(duplicate_id)],
            )?;
            tx.execute(
                "DELETE FROM relationships WHERE from_memory_id = to_memory_id",
                &[],
            )?;
            tx.commit()?;
        }

        self.lifecycle
            .archival()
            .archive(duplicate_id, workspace_id, crate::types::TriggeredBy::User)?;
        Ok(())
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub fn stats(&self, workspace_id: &str) -> Result<MemoryStoreStats> {
        let mut stats = MemoryStoreStats {
            db_size_bytes: self.storage.size_bytes()?,
            ..Default::default()
        };

        let count =
            |sql: &str, params: &[SqlValue]| -> Result<i64> {
                let rows = self.storage.query(sql, params)?;
                Ok(rows.first().map(|r| r.get_i64("n")).transpose()?.unwrap_or(0))
            };

        stats.memory_count = count(
            "SELECT COUNT(*) AS n FROM memories WHERE workspace_id = $1",
            &[SqlValue::from(workspace_id)],
        )?;
        stats.archived_count = count(
            "SELECT COUNT(*) AS n FROM archived_memories WHERE workspace_id = $1",
            &[SqlValue::from(workspace_id)],
        )?;
        stats.event_count = count(
            "SELECT COUNT(*) AS n FROM lifecycle_events WHERE workspace_id = $1",
            &[SqlValue::from(workspace_id)],
        )?;
        stats.pending_vectors = count(
            "SELECT COUNT(*) AS n FROM memories WHERE workspace_id = $1 AND vector_pending = 1",
            &[SqlValue::from(workspace_id)],
        )?;
        stats.relationship_count = count(
            "SELECT COUNT(*) AS n FROM relationships r
             WHERE EXISTS (
                SELECT 1 FROM memories m WHERE m.id = r.from_memory_id AND m.workspace_id = $1
                UNION
                SELECT 1 FROM archived_memories a WHERE a.id = r.from_memory_id AND a.workspace_id = $1
             )",
            &[SqlValue::from(workspace_id)],
        )?;

        let type_rows = self.storage.query(
            "SELECT memory_type, COUNT(*) AS n FROM memories WHERE workspace_id = $1 GROUP BY memory_type",
            &[SqlValue::from(workspace_id)],
        )?;
        for row in &type_rows {
            stats
                .type_counts
                .insert(row.get_str("memory_type")?, row.get_i64("n")?);
        }

        Ok(stats)
    }
}
