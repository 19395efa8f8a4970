//! Lifecycle manager
//!
//! Orchestrates access tracking, pinning, lifecycle patches, batch
//! evaluation and metrics. State writes and their events share a
//! transaction; concurrent transitions for one memory serialize on the
//! transaction taken as the first step of every mutation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::config::LifecycleConfig;
use crate::embedding::Embedder;
use crate::error::{MemoriaError, Result};
use crate::storage::{SqlValue, StorageAdapter, StorageExecutor};
use crate::store::rows::{memory_from_row, MEMORY_COLUMNS};
use crate::types::{LifecycleState, LifecyclePatch, Memory, TriggeredBy};
use crate::vector::{VectorIndex, VectorMetadata};

use super::archival::{count_relationships, ArchivalService};
use super::cleanup::{CleanupOptions, CleanupReport, CleanupService};
use super::decay::DecayCalculator;
use super::events::{log_transition, NewLifecycleEvent};
use super::importance::{ImportanceInputs, ImportanceScorer};
use super::state_machine::validate_transition;

/// Outcome of one evaluation pass over a workspace page
#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    pub evaluated: u64,
    /// active -> decaying transitions
    pub marked_decaying: u64,
    /// Memories handed to the archival service
    pub archived: u64,
    /// Rows whose scores were refreshed without a state change
    pub refreshed: u64,
    /// Archived rows already past expiry, awaiting cleanup
    pub expired_pending: u64,
    pub errors: Vec<(String, String)>,
}

/// Counts and aggregates for a workspace
#[derive(Debug, Clone, Default)]
pub struct LifecycleMetrics {
    pub by_state: HashMap<String, i64>,
    pub bytes_by_state: HashMap<String, i64>,
    pub pinned_count: i64,
    pub avg_decay_score: Option<f64>,
    pub avg_importance_score: Option<f64>,
    pub archived_count: i64,
    pub archived_bytes: i64,
    pub expired_pending: i64,
}

/// Report from a vector reconciliation pass
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Pending rows whose vectors were upserted
    pub vectors_upserted: u64,
    /// Index entries with no surviving row, deleted
    pub orphans_deleted: u64,
    pub errors: Vec<(String, String)>,
}

/// Orchestrator over decay, importance, archival and cleanup
pub struct LifecycleManager {
    storage: Arc<dyn StorageAdapter>,
    vectors: Arc<dyn VectorIndex>,
    decay: DecayCalculator,
    importance: ImportanceScorer,
    archival: ArchivalService,
    cleanup: CleanupService,
    config: LifecycleConfig,
}

impl LifecycleManager {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        vectors: Arc<dyn VectorIndex>,
        decay: DecayCalculator,
        importance: ImportanceScorer,
        config: LifecycleConfig,
    ) -> Self {
        let archival = ArchivalService::new(
            storage.clone(),
            vectors.clone(),
            config.archive_retention_ms,
        );
        let cleanup = CleanupService::new(storage.clone());
        Self {
            storage,
            vectors,
            decay,
            importance,
            archival,
            cleanup,
            config,
        }
    }

    pub fn archival(&self) -> &ArchivalService {
        &self.archival
    }

    pub fn cleanup(&self) -> &CleanupService {
        &self.cleanup
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    fn load_memory(
        executor: &dyn StorageExecutor,
        memory_id: &str,
        workspace_id: &str,
    ) -> Result<Memory> {
        let rows = executor.query(
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

    /// Record an access: bump the counter, refresh `last_accessed_at` and
    /// recompute the importance score, all in one transaction
    pub fn record_access(&self, memory_id: &str, workspace_id: &str) -> Result<()> {
        let now = Utc::now();
        let tx = self.storage.begin()?;

        let memory = Self::load_memory(tx.as_ref(), memory_id, workspace_id)?;
        let relationship_count = count_relationships(tx.as_ref(), memory_id)? as usize;

        let importance = self.importance.score(
            &ImportanceInputs {
                access_count: memory.access_count + 1,
                created_at: memory.created_at,
                relationship_count,
                confidence: memory.confidence,
            },
            now,
        );

        tx.execute(
            "UPDATE memories
             SET access_count = access_count + 1,
                 last_accessed_at = $1,
                 importance_score = $2,
                 updated_at = $1
             WHERE id = $3 AND workspace_id = $4",
            &[
                SqlValue::from(now),
                SqlValue::Real(importance),
                SqlValue::from(memory_id),
                SqlValue::from(workspace_id),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Pin a memory on behalf of a user
    pub fn pin_memory(&self, memory_id: &str, workspace_id: &str, user_id: &str) -> Result<Memory> {
        let now = Utc::now();
        let tx = self.storage.begin()?;

        let memory = Self::load_memory(tx.as_ref(), memory_id, workspace_id)?;
        let verdict =
            validate_transition(memory.lifecycle_state, LifecycleState::Pinned, TriggeredBy::User);
        if !verdict.valid {
            return Err(MemoriaError::validation("lifecycle_state", verdict.reason));
        }

        if !verdict.no_op {
            tx.execute(
                "UPDATE memories
                 SET lifecycle_state = $1, pinned = 1, pinned_by = $2, pinned_at = $3, updated_at = $3
                 WHERE id = $4 AND workspace_id = $5",
                &[
                    SqlValue::from(LifecycleState::Pinned.as_str()),
                    SqlValue::from(user_id),
                    SqlValue::from(now),
                    SqlValue::from(memory_id),
                    SqlValue::from(workspace_id),
                ],
            )?;

            log_transition(
                tx.as_ref(),
                &NewLifecycleEvent::new(
                    memory_id,
                    workspace_id,
                    memory.lifecycle_state,
                    LifecycleState::Pinned,
                    verdict.reason,
                    TriggeredBy::User,
                )
                .with_user(user_id),
            )?;
        }

        let updated = Self::load_memory(tx.as_ref(), memory_id, workspace_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Unpin a memory, returning it to `active`
    pub fn unpin_memory(&self, memory_id: &str, workspace_id: &str) -> Result<Memory> {
        let now = Utc::now();
        let tx = self.storage.begin()?;

        let memory = Self::load_memory(tx.as_ref(), memory_id, workspace_id)?;
        if memory.lifecycle_state != LifecycleState::Pinned {
            return Err(MemoriaError::validation(
                "lifecycle_state",
                format!("memory is not pinned ({})", memory.lifecycle_state),
            ));
        }

        let verdict =
            validate_transition(LifecycleState::Pinned, LifecycleState::Active, TriggeredBy::User);

        tx.execute(
            "UPDATE memories
             SET lifecycle_state = $1, pinned = 0, pinned_by = NULL, pinned_at = NULL, updated_at = $2
             WHERE id = $3 AND workspace_id = $4",
            &[
                SqlValue::from(LifecycleState::Active.as_str()),
                SqlValue::from(now),
                SqlValue::from(memory_id),
                SqlValue::from(workspace_id),
            ],
        )?;

        log_transition(
            tx.as_ref(),
            &NewLifecycleEvent::new(
                memory_id,
                workspace_id,
                LifecycleState::Pinned,
                LifecycleState::Active,
                verdict.reason,
                TriggeredBy::User,
            ),
        )?;

        let updated = Self::load_memory(tx.as_ref(), memory_id, workspace_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Apply a validated lifecycle patch
    ///
    /// Range checks scores, validates any state change against the state
    /// machine, keeps the `pinned` column and `pinned` state consistent,
    /// and logs an event when the state changes.
    pub fn update_memory_lifecycle(
        &self,
        memory_id: &str,
        workspace_id: &str,
        patch: &LifecyclePatch,
    ) -> Result<Memory> {
        for (field, value) in [
            ("importance_score", patch.importance_score),
            ("decay_score", patch.decay_score),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                    return Err(MemoriaError::validation(field, "must be in [0,1]"));
                }
            }
        }

        let triggered_by = if patch.user_id.is_some() {
            TriggeredBy::User
        } else {
            TriggeredBy::System
        };
        let now = Utc::now();

        // Row-level serialization: the transaction is the first step
        let tx = self.storage.begin()?;
        let memory = Self::load_memory(tx.as_ref(), memory_id, workspace_id)?;

        // Resolve the target state: explicit state wins, then a pinned
        // flag change implies its state counterpart
        let mut target_state = patch.lifecycle_state;
        if target_state.is_none() {
            if let Some(pinned) = patch.pinned {
                if pinned && memory.lifecycle_state != LifecycleState::Pinned {
                    target_state = Some(LifecycleState::Pinned);
                } else if !pinned && memory.lifecycle_state == LifecycleState::Pinned {
                    target_state = Some(LifecycleState::Active);
                }
            }
        }

        let mut event = None;
        if let Some(to) = target_state {
            // Moving rows between tables belongs to the archival and
            // cleanup services; a field patch cannot do it consistently
            if matches!(to, LifecycleState::Archived | LifecycleState::Expired)
                && to != memory.lifecycle_state
            {
                return Err(MemoriaError::validation(
                    "lifecycle_state",
                    format!("transition to {} goes through the archival service", to),
                ));
            }

            let verdict = validate_transition(memory.lifecycle_state, to, triggered_by);
            if !verdict.valid {
                return Err(MemoriaError::validation("lifecycle_state", verdict.reason));
            }
            if !verdict.no_op {
                let reason = patch.reason.clone().unwrap_or(verdict.reason);
                let mut e = NewLifecycleEvent::new(
                    memory_id,
                    workspace_id,
                    memory.lifecycle_state,
                    to,
                    reason,
                    triggered_by,
                );
                if let Some(user) = &patch.user_id {
                    e = e.with_user(user.clone());
                }
                event = Some((to, e));
            }
        }

        let new_state = event
            .as_ref()
            .map(|(to, _)| *to)
            .unwrap_or(memory.lifecycle_state);
        let pinned = new_state == LifecycleState::Pinned;

        tx.execute(
            "UPDATE memories
             SET lifecycle_state = $1,
                 importance_score = $2,
                 decay_score = $3,
                 effective_ttl_ms = $4,
                 pinned = $5,
                 pinned_by = CASE WHEN $5 = 0 THEN NULL ELSE COALESCE($6, pinned_by) END,
                 pinned_at = CASE WHEN $5 = 0 THEN NULL ELSE COALESCE(pinned_at, $7) END,
                 updated_at = $7
             WHERE id = $8 AND workspace_id = $9",
            &[
                SqlValue::from(new_state.as_str()),
                SqlValue::Real(patch.importance_score.unwrap_or(memory.importance_score)),
                SqlValue::Real(patch.decay_score.unwrap_or(memory.decay_score)),
                SqlValue::from(
                    patch
                        .effective_ttl_ms
                        .unwrap_or(memory.effective_ttl_ms),
                ),
                SqlValue::from(pinned),
                SqlValue::from(patch.user_id.clone()),
                SqlValue::from(now),
                SqlValue::from(memory_id),
                SqlValue::from(workspace_id),
            ],
        )?;

        if let Some((_, e)) = event {
            log_transition(tx.as_ref(), &e)?;
        }

        let updated = Self::load_memory(tx.as_ref(), memory_id, workspace_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Evaluate one page of a workspace
    ///
    /// Fetches non-pinned hot memories in ascending `last_accessed_at`,
    /// recomputes decay and importance, and applies at most one transition
    /// per memory: decay below threshold marks `decaying`, an elapsed
    /// effective TTL archives.
    pub fn evaluate_batch(
        &self,
        workspace_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<EvaluationReport> {
        let limit = limit.clamp(1, 1000);
        let now = Utc::now();
        let mut report = EvaluationReport::default();

        let rows = self.storage.query(
            &format!(
                "SELECT {} FROM memories
                 WHERE workspace_id = $1 AND pinned = 0
                   AND lifecycle_state IN ('active', 'decaying')
                 ORDER BY last_accessed_at ASC
                 LIMIT $2 OFFSET $3",
                MEMORY_COLUMNS
            ),
            &[
                SqlValue::from(workspace_id),
                SqlValue::Integer(limit as i64),
                SqlValue::Integer(offset as i64),
            ],
        )?;

        for row in &rows {
            let memory = match memory_from_row(row) {
                Ok(m) => m,
                Err(e) => {
                    report.errors.push(("<unreadable>".to_string(), e.to_string()));
                    continue;
                }
            };
            report.evaluated += 1;

            if let Err(e) = self.evaluate_one(&memory, workspace_id, now, &mut report) {
                tracing::warn!(memory_id = %memory.id, "evaluation failed: {}", e);
                report.errors.push((memory.id.clone(), e.to_string()));
            }
        }

        let pending_rows = self.storage.query(
            "SELECT COUNT(*) AS n FROM archived_memories WHERE workspace_id = $1 AND expires_at <= $2",
            &[SqlValue::from(workspace_id), SqlValue::from(now)],
        )?;
        report.expired_pending = pending_rows
            .first()
            .map(|r| r.get_i64("n"))
            .transpose()?
            .unwrap_or(0) as u64;

        Ok(report)
    }

    fn evaluate_one(
        &self,
        memory: &Memory,
        workspace_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        report: &mut EvaluationReport,
    ) -> Result<()> {
        let decay_score = self.decay.calculate_decay_score(memory.last_accessed_at, now);
        let relationship_count = count_relationships(self.storage.as_ref(), &memory.id)? as usize;
        let importance_score = self.importance.score(
            &ImportanceInputs {
                access_count: memory.access_count,
                created_at: memory.created_at,
                relationship_count,
                confidence: memory.confidence,
            },
            now,
        );

        // Stored per-row TTL takes precedence over the computed one
        let policy = self.config.retention_for(&memory.memory_type);
        let computed_ttl = policy.effective_ttl_ms(importance_score);
        let effective_ttl = memory.effective_ttl_ms.unwrap_or(computed_ttl);
        let elapsed_ms = (now - memory.last_accessed_at).num_milliseconds();

        // Decay transition first: a memory can walk active -> decaying ->
        // archived within one batch
        let mut transitioned = false;
        if memory.lifecycle_state == LifecycleState::Active
            && decay_score < self.config.decay_threshold
        {
            let verdict = validate_transition(
                LifecycleState::Active,
                LifecycleState::Decaying,
                TriggeredBy::System,
            );
            let tx = self.storage.begin()?;
            tx.execute(
                "UPDATE memories
                 SET lifecycle_state = $1, decay_score = $2, importance_score = $3,
                     effective_ttl_ms = COALESCE(effective_ttl_ms, $4), updated_at = $5
                 WHERE id = $6 AND workspace_id = $7",
                &[
                    SqlValue::from(LifecycleState::Decaying.as_str()),
                    SqlValue::Real(decay_score),
                    SqlValue::Real(importance_score),
                    SqlValue::Integer(computed_ttl),
                    SqlValue::from(now),
                    SqlValue::from(memory.id.clone()),
                    SqlValue::from(workspace_id),
                ],
            )?;
            log_transition(
                tx.as_ref(),
                &NewLifecycleEvent::new(
                    memory.id.clone(),
                    workspace_id,
                    LifecycleState::Active,
                    LifecycleState::Decaying,
                    verdict.reason,
                    TriggeredBy::System,
                ),
            )?;
            tx.commit()?;
            report.marked_decaying += 1;
            transitioned = true;
        }

        if elapsed_ms >= effective_ttl {
            // Persist the refreshed scores so the archive copy carries them
            self.storage.execute(
                "UPDATE memories SET decay_score = $1, importance_score = $2 WHERE id = $3",
                &[
                    SqlValue::Real(decay_score),
                    SqlValue::Real(importance_score),
                    SqlValue::from(memory.id.clone()),
                ],
            )?;
            self.archival
                .archive(&memory.id, workspace_id, TriggeredBy::System)?;
            report.archived += 1;
            return Ok(());
        }

        if transitioned {
            return Ok(());
        }

        self.storage.execute(
            "UPDATE memories
             SET decay_score = $1, importance_score = $2,
                 effective_ttl_ms = COALESCE(effective_ttl_ms, $3)
             WHERE id = $4 AND workspace_id = $5",
            &[
                SqlValue::Real(decay_score),
                SqlValue::Real(importance_score),
                SqlValue::Integer(computed_ttl),
                SqlValue::from(memory.id.clone()),
                SqlValue::from(workspace_id),
            ],
        )?;
        report.refreshed += 1;
        Ok(())
    }

    /// One cleanup pass over expired archives
    pub fn cleanup_expired(&self, workspace_id: &str, dry_run: bool) -> Result<CleanupReport> {
        self.cleanup.cleanup_expired(
            workspace_id,
            &CleanupOptions {
                batch_size: self.config.batch_size,
                dry_run,
            },
        )
    }

    /// Prune lifecycle events past the audit retention window
    pub fn cleanup_lifecycle_events(&self, workspace_id: &str) -> Result<u64> {
        self.cleanup
            .cleanup_lifecycle_events(workspace_id, self.config.audit_retention_ms)
    }

    /// Counts, averages and storage aggregates for a workspace
    pub fn get_metrics(&self, workspace_id: &str) -> Result<LifecycleMetrics> {
        let mut metrics = LifecycleMetrics::default();
        let now = Utc::now();

        let rows = self.storage.query(
            "SELECT lifecycle_state, COUNT(*) AS n,
                    SUM(LENGTH(content) + LENGTH(metadata)) AS bytes,
                    AVG(decay_score) AS avg_decay, AVG(importance_score) AS avg_importance
             FROM memories WHERE workspace_id = $1
             GROUP BY lifecycle_state",
            &[SqlValue::from(workspace_id)],
        )?;

        let mut decay_weighted = 0.0;
        let mut importance_weighted = 0.0;
        let mut hot_total = 0i64;
        for row in &rows {
            let state = row.get_str("lifecycle_state")?;
            let n = row.get_i64("n")?;
            metrics.by_state.insert(state.clone(), n);
            metrics
                .bytes_by_state
                .insert(state.clone(), row.get_opt_i64("bytes")?.unwrap_or(0));
            decay_weighted += row.get_f64("avg_decay")? * n as f64;
            importance_weighted += row.get_f64("avg_importance")? * n as f64;
            hot_total += n;
        }
        if hot_total > 0 {
            metrics.avg_decay_score = Some(decay_weighted / hot_total as f64);
            metrics.avg_importance_score = Some(importance_weighted / hot_total as f64);
        }

        let pinned_rows = self.storage.query(
            "SELECT COUNT(*) AS n FROM memories WHERE workspace_id = $1 AND pinned = 1",
            &[SqlValue::from(workspace_id)],
        )?;
        metrics.pinned_count = pinned_rows
            .first()
            .map(|r| r.get_i64("n"))
            .transpose()?
            .unwrap_or(0);

        let archived_rows = self.storage.query(
            "SELECT COUNT(*) AS n,
                    COALESCE(SUM(LENGTH(content) + LENGTH(metadata)), 0) AS bytes,
                    COALESCE(SUM(CASE WHEN expires_at <= $2 THEN 1 ELSE 0 END), 0) AS expired
             FROM archived_memories WHERE workspace_id = $1",
            &[SqlValue::from(workspace_id), SqlValue::from(now)],
        )?;
        if let Some(row) = archived_rows.first() {
            metrics.archived_count = row.get_i64("n")?;
            metrics.archived_bytes = row.get_i64("bytes")?;
            metrics.expired_pending = row.get_i64("expired")?;
            metrics
                .by_state
                .insert("archived".to_string(), metrics.archived_count);
        }

        Ok(metrics)
    }

    /// Reconcile the two stores
    ///
    /// Completes vector upserts owed by rows flagged `vector_pending` and
    /// deletes index entries whose row no longer exists.
    pub fn reconcile_vectors(&self, embedder: &dyn Embedder) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let pending = self.storage.query(
            &format!(
                "SELECT {} FROM memories WHERE vector_pending = 1 LIMIT $1",
                MEMORY_COLUMNS
            ),
            &[SqlValue::Integer(self.config.batch_size as i64)],
        )?;

        for row in &pending {
            let memory = memory_from_row(row)?;
            let outcome = embedder.embed(&memory.content).and_then(|vector| {
                self.vectors.upsert(
                    &memory.id,
                    &vector,
                    VectorMetadata {
                        workspace_id: memory.workspace_id.clone(),
                        memory_type: memory.memory_type.clone(),
                    },
                )
            });

            match outcome {
                Ok(()) => {
                    self.storage.execute(
                        "UPDATE memories SET vector_pending = 0 WHERE id = $1",
                        &[SqlValue::from(memory.id.clone())],
                    )?;
                    report.vectors_upserted += 1;
                }
                Err(e) => report.errors.push((memory.id.clone(), e.to_string())),
            }
        }

        // Orphan sweep: vectors whose hot row is gone
        let index_ids = self.vectors.ids()?;
        if !index_ids.is_empty() {
            let live: std::collections::HashSet<String> = self
                .storage
                .query("SELECT id FROM memories", &[])?
                .iter()
                .filter_map(|r| r.get_str("id").ok())
                .collect();

            for id in index_ids {
                if !live.contains(&id) {
                    match self.vectors.delete(&id) {
                        Ok(()) => report.orphans_deleted += 1,
                        Err(e) => report.errors.push((id, e.to_string())),
                    }
                }
            }
        }

        Ok(report)
    }

    /// Workspace ids known to the store, for the background loop
    pub fn list_workspace_ids(&self) -> Result<Vec<String>> {
        let rows = self.storage.query("SELECT id FROM workspaces", &[])?;
        rows.iter().map(|r| r.get_str("id")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::decay::DecayFunction;
    use crate::lifecycle::events::get_history;
    use crate::storage::{MigrationRunner, SqliteAdapter};
    use crate::types::RetentionPolicy;
    use crate::vector::InMemoryVectorIndex;
    use chrono::Duration;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn manager_with(config: LifecycleConfig) -> (Arc<SqliteAdapter>, Arc<InMemoryVectorIndex>, LifecycleManager) {
        let storage = Arc::new(SqliteAdapter::open_in_memory().unwrap());
        MigrationRunner::with_builtin(storage.as_ref())
            .unwrap()
            .up()
            .unwrap();
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

        let vectors = Arc::new(InMemoryVectorIndex::new(4));
        let manager = LifecycleManager::new(
            storage.clone(),
            vectors.clone(),
            DecayCalculator::new(DecayFunction::Exponential { lambda: 0.1 }).unwrap(),
            ImportanceScorer::default(),
            config,
        );
        (storage, vectors, manager)
    }

    fn setup() -> (Arc<SqliteAdapter>, Arc<InMemoryVectorIndex>, LifecycleManager) {
        manager_with(LifecycleConfig::default())
    }

    fn seed_memory(storage: &SqliteAdapter, id: &str, state: LifecycleState, accessed_days_ago: i64) {
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
                    SqlValue::from("the sky is blue"),
                    SqlValue::Real(0.9),
                    SqlValue::from("{}"),
                    SqlValue::from(state.as_str()),
                    SqlValue::from(now - Duration::days(accessed_days_ago)),
                    SqlValue::Integer(2),
                    SqlValue::Real(0.5),
                    SqlValue::Real(1.0),
                    SqlValue::from(state == LifecycleState::Pinned),
                    SqlValue::from(now - Duration::days(accessed_days_ago)),
                    SqlValue::from(now - Duration::days(accessed_days_ago)),
                ],
            )
            .unwrap();
    }

    #[test]
    fn test_record_access() {
        let (storage, _, manager) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active, 10);

        manager.record_access("m1", "w1").unwrap();
        manager.record_access("m1", "w1").unwrap();

        let memory = LifecycleManager::load_memory(storage.as_ref(), "m1", "w1").unwrap();
        assert_eq!(memory.access_count, 4);
        assert!((Utc::now() - memory.last_accessed_at).num_seconds() < 5);
        assert!((0.0..=1.0).contains(&memory.importance_score));

        assert!(manager.record_access("ghost", "w1").is_err());
    }

    #[test]
    fn test_pin_unpin_roundtrip() {
        let (storage, _, manager) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Decaying, 50);

        let pinned = manager.pin_memory("m1", "w1", "user-7").unwrap();
        assert_eq!(pinned.lifecycle_state, LifecycleState::Pinned);
        assert!(pinned.pinned);
        assert_eq!(pinned.pinned_by.as_deref(), Some("user-7"));
        assert!(pinned.pinned_at.is_some());

        let unpinned = manager.unpin_memory("m1", "w1").unwrap();
        assert_eq!(unpinned.lifecycle_state, LifecycleState::Active);
        assert!(!unpinned.pinned);
        assert!(unpinned.pinned_by.is_none());
        assert!(unpinned.pinned_at.is_none());
        // Content untouched
        assert_eq!(unpinned.content, "the sky is blue");

        let history = get_history(storage.as_ref(), "m1", "w1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_state, LifecycleState::Pinned);
        assert_eq!(history[1].new_state, LifecycleState::Active);
    }

    #[test]
    fn test_unpin_requires_pinned() {
        let (storage, _, manager) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active, 1);
        assert!(manager.unpin_memory("m1", "w1").is_err());
    }

    #[test]
    fn test_patch_validates_ranges_and_transitions() {
        let (storage, _, manager) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active, 1);

        let bad_range = LifecyclePatch {
            importance_score: Some(1.5),
            ..Default::default()
        };
        assert!(manager.update_memory_lifecycle("m1", "w1", &bad_range).is_err());

        let bad_transition = LifecyclePatch {
            lifecycle_state: Some(LifecycleState::Expired),
            ..Default::default()
        };
        assert!(manager
            .update_memory_lifecycle("m1", "w1", &bad_transition)
            .is_err());

        let ok = LifecyclePatch {
            decay_score: Some(0.4),
            importance_score: Some(0.9),
            ..Default::default()
        };
        let updated = manager.update_memory_lifecycle("m1", "w1", &ok).unwrap();
        assert!((updated.decay_score - 0.4).abs() < f64::EPSILON);
        assert!((updated.importance_score - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_patch_pinned_flag_syncs_state() {
        let (storage, _, manager) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active, 1);

        let pin = LifecyclePatch {
            pinned: Some(true),
            user_id: Some("user-1".to_string()),
            ..Default::default()
        };
        let updated = manager.update_memory_lifecycle("m1", "w1", &pin).unwrap();
        assert_eq!(updated.lifecycle_state, LifecycleState::Pinned);
        assert!(updated.pinned);

        let unpin = LifecyclePatch {
            pinned: Some(false),
            user_id: Some("user-1".to_string()),
            ..Default::default()
        };
        let updated = manager.update_memory_lifecycle("m1", "w1", &unpin).unwrap();
        assert_eq!(updated.lifecycle_state, LifecycleState::Active);
        assert!(!updated.pinned);
    }

    #[test]
    fn test_evaluate_marks_decaying() {
        let mut config = LifecycleConfig::default();
        config.decay_threshold = 0.3;
        // Long TTL so archival does not trigger first
        config
            .retention_policies
            .insert("*".to_string(), RetentionPolicy {
                ttl_ms: 10_000 * DAY_MS,
                importance_multiplier: 0.0,
                grace_period_ms: 0,
            });
        let (storage, _, manager) = manager_with(config);

        // 100 days old at lambda 0.1 -> decay ~ e^-10, far below 0.3
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active, 100);
        // Fresh memory stays active
        seed_memory(storage.as_ref(), "m2", LifecycleState::Active, 0);

        let report = manager.evaluate_batch("w1", 0, 10).unwrap();
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.marked_decaying, 1);
        assert_eq!(report.archived, 0);
        assert!(report.errors.is_empty());

        let m1 = LifecycleManager::load_memory(storage.as_ref(), "m1", "w1").unwrap();
        assert_eq!(m1.lifecycle_state, LifecycleState::Decaying);
        assert!(m1.effective_ttl_ms.is_some());

        let m2 = LifecycleManager::load_memory(storage.as_ref(), "m2", "w1").unwrap();
        assert_eq!(m2.lifecycle_state, LifecycleState::Active);
    }

    #[test]
    fn test_evaluate_archives_past_ttl() {
        let mut config = LifecycleConfig::default();
        config.retention_policies.insert(
            "fact".to_string(),
            RetentionPolicy {
                ttl_ms: 10 * DAY_MS,
                importance_multiplier: 0.0,
                grace_period_ms: 0,
            },
        );
        let (storage, _, manager) = manager_with(config);
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active, 50);

        let report = manager.evaluate_batch("w1", 0, 10).unwrap();
        assert_eq!(report.archived, 1);

        assert!(storage
            .query("SELECT id FROM memories WHERE id = $1", &[SqlValue::from("m1")])
            .unwrap()
            .is_empty());
        assert_eq!(
            storage
                .query("SELECT id FROM archived_memories", &[])
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_evaluate_skips_pinned() {
        let (storage, _, manager) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Pinned, 500);

        let report = manager.evaluate_batch("w1", 0, 10).unwrap();
        assert_eq!(report.evaluated, 0);

        let m1 = LifecycleManager::load_memory(storage.as_ref(), "m1", "w1").unwrap();
        assert_eq!(m1.lifecycle_state, LifecycleState::Pinned);
    }

    #[test]
    fn test_stored_ttl_takes_precedence() {
        let mut config = LifecycleConfig::default();
        // Policy would archive immediately
        config.retention_policies.insert(
            "fact".to_string(),
            RetentionPolicy {
                ttl_ms: 1,
                importance_multiplier: 0.0,
                grace_period_ms: 0,
            },
        );
        let (storage, _, manager) = manager_with(config);
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active, 5);
        // Row-level override keeps it alive
        storage
            .execute(
                "UPDATE memories SET effective_ttl_ms = $1 WHERE id = $2",
                &[SqlValue::Integer(10_000 * DAY_MS), SqlValue::from("m1")],
            )
            .unwrap();

        let report = manager.evaluate_batch("w1", 0, 10).unwrap();
        assert_eq!(report.archived, 0);
    }

    #[test]
    fn test_metrics() {
        let (storage, _, manager) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active, 1);
        seed_memory(storage.as_ref(), "m2", LifecycleState::Decaying, 40);
        seed_memory(storage.as_ref(), "m3", LifecycleState::Pinned, 1);

        let metrics = manager.get_metrics("w1").unwrap();
        assert_eq!(metrics.by_state.get("active"), Some(&1));
        assert_eq!(metrics.by_state.get("decaying"), Some(&1));
        assert_eq!(metrics.by_state.get("pinned"), Some(&1));
        assert_eq!(metrics.pinned_count, 1);
        assert!(metrics.avg_decay_score.is_some());
        assert!(metrics.bytes_by_state.values().all(|b| *b > 0));
    }

    #[test]
    fn test_reconcile_vectors() {
        let (storage, vectors, manager) = setup();
        seed_memory(storage.as_ref(), "m1", LifecycleState::Active, 1);
        storage
            .execute(
                "UPDATE memories SET vector_pending = 1 WHERE id = $1",
                &[SqlValue::from("m1")],
            )
            .unwrap();
        // Orphan vector with no backing row
        vectors
            .upsert(
                "ghost",
                &[1.0, 0.0, 0.0, 0.0],
                VectorMetadata {
                    workspace_id: "w1".to_string(),
                    memory_type: "fact".to_string(),
                },
            )
            .unwrap();

        let embedder = crate::embedding::HashEmbedder::new(4);
        let report = manager.reconcile_vectors(&embedder).unwrap();

        assert_eq!(report.vectors_upserted, 1);
        assert_eq!(report.orphans_deleted, 1);
        assert!(vectors.contains("m1"));
        assert!(!vectors.contains("ghost"));

        let m1 = LifecycleManager::load_memory(storage.as_ref(), "m1", "w1").unwrap();
        assert!(!m1.vector_pending);
    }
}
