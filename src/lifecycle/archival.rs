//! Archival service
//!
//! Moves memories between the hot table and the archive table. The row
//! move, relationship count and lifecycle event share one transaction;
//! the vector delete is best-effort afterwards and any miss is swept by
//! the reconciler.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{MemoriaError, Result};
use crate::storage::{SqlValue, StorageAdapter, StorageExecutor};
use crate::store::rows::{archived_from_row, memory_from_row, ARCHIVED_COLUMNS, MEMORY_COLUMNS};
use crate::types::{LifecycleState, Memory, TriggeredBy};
use crate::vector::VectorIndex;

use super::events::{log_transition, NewLifecycleEvent};
use super::state_machine::validate_transition;

/// Per-memory result of an archive operation
#[derive(Debug, Clone)]
pub struct ArchiveStat {
    pub memory_id: String,
    /// Relationships touching the memory at archive time (all survive)
    pub relationship_count: u64,
    pub archived_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Batch archive outcome; failures do not abort the batch
#[derive(Debug, Clone, Default)]
pub struct BatchArchiveResult {
    pub archived: Vec<ArchiveStat>,
    pub errors: Vec<(String, String)>,
}

/// Result of restoring a memory from the archive
#[derive(Debug, Clone)]
pub struct RestoreResult {
    pub memory: Memory,
    /// The vector was dropped at archive time; the caller owns re-embedding
    pub needs_embedding: bool,
}

/// Moves memories to and from the archive table
pub struct ArchivalService {
    storage: Arc<dyn StorageAdapter>,
    vectors: Arc<dyn VectorIndex>,
    archive_retention_ms: i64,
}

impl ArchivalService {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        vectors: Arc<dyn VectorIndex>,
        archive_retention_ms: i64,
    ) -> Self {
        Self {
            storage,
            vectors,
            archive_retention_ms,
        }
    }

    /// Archive one memory
    ///
    /// Copies the row into `archived_memories` (dropping decay and pin
    /// fields), deletes the hot row, logs the transition, then deletes the
    /// vector best-effort.
    pub fn archive(
        &self,
        memory_id: &str,
        workspace_id: &str,
        triggered_by: TriggeredBy,
    ) -> Result<ArchiveStat> {
        let now = Utc::now();
        let expires_at = now + Duration::milliseconds(self.archive_retention_ms);

        let stat = {
            let tx = self.storage.begin()?;

            let rows = tx.query(
                &format!(
                    "SELECT {} FROM memories WHERE id = $1 AND workspace_id = $2",
                    MEMORY_COLUMNS
                ),
                &[SqlValue::from(memory_id), SqlValue::from(workspace_id)],
            )?;
            let memory = match rows.first() {
                Some(row) => memory_from_row(row)?,
                None => return Err(MemoriaError::not_found("memory", memory_id)),
            };

            let verdict =
                validate_transition(memory.lifecycle_state, LifecycleState::Archived, triggered_by);
            if !verdict.valid {
                return Err(MemoriaError::validation("lifecycle_state", verdict.reason));
            }

            tx.execute(
                "INSERT INTO archived_memories
                    (id, workspace_id, conversation_id, memory_type, content, confidence,
                     metadata, importance_score, access_count, last_accessed_at,
                     content_hash, created_at, updated_at, archived_at, expires_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
                &[
                    SqlValue::from(memory.id.clone()),
                    SqlValue::from(memory.workspace_id.clone()),
                    SqlValue::from(memory.conversation_id.clone()),
                    SqlValue::from(memory.memory_type.clone()),
                    SqlValue::from(memory.content.clone()),
                    SqlValue::from(memory.confidence),
                    SqlValue::from(serde_json::to_string(&memory.metadata)?),
                    SqlValue::from(memory.importance_score),
                    SqlValue::Integer(memory.access_count),
                    SqlValue::from(memory.last_accessed_at),
                    SqlValue::from(memory.content_hash.clone()),
                    SqlValue::from(memory.created_at),
                    SqlValue::from(memory.updated_at),
                    SqlValue::from(now),
                    SqlValue::from(expires_at),
                ],
            )?;

            let relationship_count = count_relationships(tx.as_ref(), &memory.id)?;

            tx.execute(
                "DELETE FROM memories WHERE id = $1 AND workspace_id = $2",
                &[SqlValue::from(memory.id.clone()), SqlValue::from(workspace_id)],
            )?;

            log_transition(
                tx.as_ref(),
                &NewLifecycleEvent::new(
                    memory.id.clone(),
                    workspace_id,
                    memory.lifecycle_state,
                    LifecycleState::Archived,
                    verdict.reason,
                    triggered_by,
                ),
            )?;

            tx.commit()?;

            ArchiveStat {
                memory_id: memory.id,
                relationship_count,
                archived_at: now,
                expires_at,
            }
        };

        // Best-effort; a stale vector is swept by the reconciler
        if let Err(e) = self.vectors.delete(&stat.memory_id) {
            tracing::warn!(memory_id = %stat.memory_id, "vector delete failed after archive: {}", e);
        }

        Ok(stat)
    }

    /// Archive a list of memories, accumulating per-memory errors
    pub fn archive_batch(
        &self,
        memory_ids: &[String],
        workspace_id: &str,
        triggered_by: TriggeredBy,
    ) -> BatchArchiveResult {
        let mut result = BatchArchiveResult::default();
        for id in memory_ids {
            match self.archive(id, workspace_id, triggered_by) {
                Ok(stat) => result.archived.push(stat),
                Err(e) => result.errors.push((id.clone(), e.to_string())),
            }
        }
        result
    }

    /// Restore an archived memory into the hot table
    ///
    /// The memory returns as `active` with a fresh decay score and its
    /// access count preserved. The vector must be re-embedded by the
    /// caller; the row is created with `vector_pending` set.
    pub fn restore(&self, memory_id: &str, workspace_id: &str) -> Result<RestoreResult> {
        let now = Utc::now();
        let tx = self.storage.begin()?;

        let rows = tx.query(
            &format!(
                "SELECT {} FROM archived_memories WHERE id = $1 AND workspace_id = $2",
                ARCHIVED_COLUMNS
            ),
            &[SqlValue::from(memory_id), SqlValue::from(workspace_id)],
        )?;
        let archived = match rows.first() {
            Some(row) => archived_from_row(row)?,
            None => return Err(MemoriaError::not_found("archived memory", memory_id)),
        };

        tx.execute(
            "INSERT INTO memories
                (id, workspace_id, conversation_id, memory_type, content, confidence,
                 metadata, lifecycle_state, last_accessed_at, access_count,
                 importance_score, decay_score, effective_ttl_ms, pinned,
                 vector_pending, content_hash, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            &[
                SqlValue::from(archived.id.clone()),
                SqlValue::from(archived.workspace_id.clone()),
                SqlValue::from(archived.conversation_id.clone()),
                SqlValue::from(archived.memory_type.clone()),
                SqlValue::from(archived.content.clone()),
                SqlValue::from(archived.confidence),
                SqlValue::from(serde_json::to_string(&archived.metadata)?),
                SqlValue::from(LifecycleState::Active.as_str()),
                SqlValue::from(now),
                SqlValue::Integer(archived.access_count),
                SqlValue::from(archived.importance_score),
                SqlValue::Real(1.0),
                SqlValue::Null,
                SqlValue::from(false),
                SqlValue::from(true),
                SqlValue::from(archived.content_hash.clone()),
                SqlValue::from(archived.created_at),
                SqlValue::from(now),
            ],
        )?;

        tx.execute(
            "DELETE FROM archived_memories WHERE id = $1 AND workspace_id = $2",
            &[SqlValue::from(memory_id), SqlValue::from(workspace_id)],
        )?;

        log_transition(
            tx.as_ref(),
            &NewLifecycleEvent::new(
                archived.id.clone(),
                workspace_id,
                LifecycleState::Archived,
                LifecycleState::Active,
                "restored from archive",
                TriggeredBy::User,
            ),
        )?;

        tx.commit()?;

        let rows = self.storage.query(
            &format!(
                "SELECT {} FROM memories WHERE id = $1 AND workspace_id = $2",
                MEMORY_COLUMNS
            ),
            &[SqlValue::from(memory_id), SqlValue::from(workspace_id)],
        )?;
        let memory = rows
            .first()
            .map(memory_from_row)
            .transpose()?
            .ok_or_else(|| MemoriaError::not_found("memory", memory_id))?;

        Ok(RestoreResult {
            memory,
            needs_embedding: true,
        })
    }
}

/// Count relationships touching a memory
pub fn count_relationships(executor: &dyn StorageExecutor, memory_id: &str) -> Result<u64> {
    let rows = executor.query(
        "SELECT COUNT(*) AS n FROM relationships WHERE from_memory_id = $1 OR to_memory_id = $1",
        &[SqlValue::from(memory_id)],
    )?;
    Ok(rows.first().map(|r| r.get_i64("n")).transpose()?.unwrap_or(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::events::get_history;
    use crate::storage::{MigrationRunner, SqliteAdapter};
    use crate::vector::{InMemoryVectorIndex, VectorMetadata};
    use std::collections::HashMap;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn setup() -> (Arc<SqliteAdapter>, Arc<InMemoryVectorIndex>, ArchivalService) {
        let storage = Arc::new(SqliteAdapter::open_in_memory().unwrap());
        MigrationRunner::with_builtin(storage.as_ref())
            .unwrap()
            .up()
            .unwrap();
        let vectors = Arc::new(InMemoryVectorIndex::new(3));
        let service = ArchivalService::new(storage.clone(), vectors.clone(), 30 * DAY_MS);
        seed_workspace(storage.as_ref());
        (storage, vectors, service)
    }

    fn seed_workspace(storage: &SqliteAdapter) {
        storage
            .execute(
                "INSERT INTO workspaces (id, name, workspace_type) VALUES ($1, $2, $3)",
                &[
                    SqlValue::from("w1"),
                    SqlValue::from("test"),
                    SqlValue::from("personal"),
                ],
            )
            .unwrap();
    }

    fn seed_memory(storage: &SqliteAdapter, id: &str, state: LifecycleState) {
        let now = Utc::now();
        storage
            .execute(
                "INSERT INTO memories
                    (id, workspace_id, memory_type, content, confidence, metadata,
                     lifecycle_state, last_accessed_at, access_count, importance_score,
                     decay_score, pinned, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
                &[
                    SqlValue::from(id),
                    SqlValue::from("w1"),
                    SqlValue::from("fact"),
                    SqlValue::from("water boils at 100C"),
                    SqlValue::Real(0.9),
                    SqlValue::from(serde_json::to_string(&HashMap::<String, serde_json::Value>::new()).unwrap()),
                    SqlValue::from(state.as_str()),
                    SqlValue::from(now),
                    SqlValue::Integer(4),
                    SqlValue::Real(0.5),
                    SqlValue::Real(0.8),
                    SqlValue::from(state == LifecycleState::Pinned),
                    SqlValue::from(now),
                    SqlValue::from(now),
                ],
            )
            .unwrap();
    }

    #[test]
    fn test_archive_moves_row_and_drops_vector() {
        let (storage, vectors, service) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Decaying);
        vectors
            .upsert(
                "m1",
                &[1.0, 0.0, 0.0],
                VectorMetadata {
                    workspace_id: "w1".to_string(),
                    memory_type: "fact".to_string(),
                },
            )
            .unwrap();

        let stat = service.archive("m1", "w1", TriggeredBy::System).unwrap();
        assert_eq!(stat.memory_id, "m1");
        assert!(stat.expires_at > stat.archived_at);

        // Exactly one row across the two tables
        assert!(storage
            .query("SELECT id FROM memories WHERE id = $1", &[SqlValue::from("m1")])
            .unwrap()
            .is_empty());
        assert_eq!(
            storage
                .query(
                    "SELECT id FROM archived_memories WHERE id = $1",
                    &[SqlValue::from("m1")]
                )
                .unwrap()
                .len(),
            1
        );
        assert!(!vectors.contains("m1"));

        // Transition was logged
        let history = get_history(storage.as_ref(), "m1", "w1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_state, LifecycleState::Archived);
    }

    #[test]
    fn test_archive_missing_memory() {
        let (_, _, service) = setup();
        let err = service.archive("ghost", "w1", TriggeredBy::System).unwrap_err();
        assert!(matches!(err, MemoriaError::NotFound { .. }));
    }

    #[test]
    fn test_system_cannot_archive_pinned() {
        let (storage, _, service) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Pinned);
        let err = service.archive("m1", "w1", TriggeredBy::System).unwrap_err();
        assert!(matches!(err, MemoriaError::Validation { .. }));
    }

    #[test]
    fn test_batch_continues_past_errors() {
        let (storage, _, service) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active);
        seed_memory(storage.as_ref(), "m2", LifecycleState::Active);

        let result = service.archive_batch(
            &["m1".to_string(), "ghost".to_string(), "m2".to_string()],
            "w1",
            TriggeredBy::System,
        );
        assert_eq!(result.archived.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0, "ghost");
    }

    #[test]
    fn test_archive_restore_roundtrip() {
        let (storage, _, service) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active);

        service.archive("m1", "w1", TriggeredBy::System).unwrap();
        let restored = service.restore("m1", "w1").unwrap();

        assert!(restored.needs_embedding);
        let memory = &restored.memory;
        assert_eq!(memory.lifecycle_state, LifecycleState::Active);
        assert_eq!(memory.content, "water boils at 100C");
        assert_eq!(memory.access_count, 4);
        assert!((memory.decay_score - 1.0).abs() < f64::EPSILON);
        assert!(memory.vector_pending);

        // Archive row is gone
        assert!(storage
            .query(
                "SELECT id FROM archived_memories WHERE id = $1",
                &[SqlValue::from("m1")]
            )
            .unwrap()
            .is_empty());

        // Walk: active -> archived -> active
        let history = get_history(storage.as_ref(), "m1", "w1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].new_state, LifecycleState::Active);
    }

    #[test]
    fn test_relationships_survive_archival() {
        let (storage, _, service) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active);
        seed_memory(storage.as_ref(), "m2", LifecycleState::Active);
        storage
            .execute(
                "INSERT INTO relationships (id, from_memory_id, to_memory_id, relationship_type, confidence, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    SqlValue::from("r1"),
                    SqlValue::from("m1"),
                    SqlValue::from("m2"),
                    SqlValue::from("relates_to"),
                    SqlValue::Real(1.0),
                    SqlValue::from(Utc::now()),
                ],
            )
            .unwrap();

        let stat = service.archive("m1", "w1", TriggeredBy::System).unwrap();
        assert_eq!(stat.relationship_count, 1);

        // Edge survives because both endpoints still exist somewhere
        assert_eq!(
            storage
                .query("SELECT id FROM relationships", &[])
                .unwrap()
                .len(),
            1
        );
    }
}
