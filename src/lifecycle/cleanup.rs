//! Cleanup service
//!
//! Permanent deletion of expired archived memories and pruning of old
//! lifecycle events. Each memory is deleted in its own transaction so a
//! failure never aborts the batch.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::error::Result;
use crate::storage::{SqlValue, StorageAdapter};
use crate::store::rows::{archived_from_row, ARCHIVED_COLUMNS};
use crate::types::{LifecycleState, TriggeredBy};

use super::events::{log_transition, prune_events, NewLifecycleEvent};

/// Options for an expired-archive cleanup pass
#[derive(Debug, Clone)]
pub struct CleanupOptions {
    /// Rows taken per pass (clamped to [1, 1000])
    pub batch_size: usize,
    /// Compute aggregates without writing anything
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            dry_run: false,
        }
    }
}

/// Aggregates for one cleanup pass
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub memories_deleted: u64,
    pub relationships_deleted: u64,
    /// Approximate bytes freed (content + serialized metadata)
    pub bytes_reclaimed: u64,
    pub execution_time_ms: u64,
    pub dry_run: bool,
    /// Per-memory failures; the batch continues past them
    pub errors: Vec<(String, String)>,
}

/// Deletes expired archives and prunes the audit log
pub struct CleanupService {
    storage: Arc<dyn StorageAdapter>,
}

impl CleanupService {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    /// Permanently delete archived memories whose retention has elapsed
    ///
    /// Takes at most one batch per call, oldest expiry first. Under
    /// `dry_run` no writes happen but the same aggregates are computed.
    pub fn cleanup_expired(&self, workspace_id: &str, options: &CleanupOptions) -> Result<CleanupReport> {
        let started = Instant::now();
        let batch_size = options.batch_size.clamp(1, 1000);
        let now = Utc::now();

        let rows = self.storage.query(
            &format!(
                "SELECT {} FROM archived_memories
                 WHERE workspace_id = $1 AND expires_at <= $2
                 ORDER BY expires_at ASC
                 LIMIT $3",
                ARCHIVED_COLUMNS
            ),
            &[
                SqlValue::from(workspace_id),
                SqlValue::from(now),
                SqlValue::Integer(batch_size as i64),
            ],
        )?;

        let mut report = CleanupReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        for row in &rows {
            let archived = match archived_from_row(row) {
                Ok(a) => a,
                Err(e) => {
                    report.errors.push(("<unreadable>".to_string(), e.to_string()));
                    continue;
                }
            };

            let metadata_bytes = serde_json::to_string(&archived.metadata)
                .map(|s| s.len())
                .unwrap_or(0);
            let row_bytes = (archived.content.len() + metadata_bytes) as u64;

            if options.dry_run {
                let relationship_count =
                    super::archival::count_relationships(self.storage.as_ref(), &archived.id)?;
                report.memories_deleted += 1;
                report.relationships_deleted += relationship_count;
                report.bytes_reclaimed += row_bytes;
                continue;
            }

            match self.delete_one(&archived.id, workspace_id) {
                Ok(relationships_deleted) => {
                    report.memories_deleted += 1;
                    report.relationships_deleted += relationships_deleted;
                    report.bytes_reclaimed += row_bytes;
                }
                Err(e) => {
                    tracing::warn!(memory_id = %archived.id, "cleanup failed: {}", e);
                    report.errors.push((archived.id.clone(), e.to_string()));
                }
            }
        }

        report.execution_time_ms = started.elapsed().as_millis() as u64;
        if report.memories_deleted > 0 {
            tracing::info!(
                workspace_id,
                deleted = report.memories_deleted,
                relationships = report.relationships_deleted,
                dry_run = report.dry_run,
                "cleanup pass complete"
            );
        }
        Ok(report)
    }

    fn delete_one(&self, memory_id: &str, workspace_id: &str) -> Result<u64> {
        let tx = self.storage.begin()?;

        let relationships_deleted = tx.execute(
            "DELETE FROM relationships WHERE from_memory_id = $1 OR to_memory_id = $1",
            &[SqlValue::from(memory_id)],
        )?;

        log_transition(
            tx.as_ref(),
            &NewLifecycleEvent::new(
                memory_id,
                workspace_id,
                LifecycleState::Archived,
                LifecycleState::Expired,
                "archive retention elapsed",
                TriggeredBy::System,
            ),
        )?;

        tx.execute(
            "DELETE FROM archived_memories WHERE id = $1 AND workspace_id = $2",
            &[SqlValue::from(memory_id), SqlValue::from(workspace_id)],
        )?;

        tx.commit()?;
        Ok(relationships_deleted)
    }

    /// Prune lifecycle events older than the retention window
    pub fn cleanup_lifecycle_events(&self, workspace_id: &str, retention_ms: i64) -> Result<u64> {
        let deleted = prune_events(self.storage.as_ref(), workspace_id, retention_ms)?;
        if deleted > 0 {
            tracing::info!(workspace_id, deleted, "pruned lifecycle events");
        }
        Ok(deleted)
    }
}
