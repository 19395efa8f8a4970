//! Lifecycle event logging
//!
//! Append-only audit of state transitions. Events are written inside the
//! same transaction as the state change they describe, so no observer can
//! see a state without its event.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::{MemoriaError, Result};
use crate::storage::{Row, SqlValue, StorageExecutor};
use crate::types::{LifecycleEvent, LifecycleState, TriggeredBy};

/// Input for a transition record
#[derive(Debug, Clone)]
pub struct NewLifecycleEvent {
    pub memory_id: String,
    pub workspace_id: String,
    pub previous_state: LifecycleState,
    pub new_state: LifecycleState,
    pub reason: String,
    pub triggered_by: TriggeredBy,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewLifecycleEvent {
    pub fn new(
        memory_id: impl Into<String>,
        workspace_id: impl Into<String>,
        previous_state: LifecycleState,
        new_state: LifecycleState,
        reason: impl Into<String>,
        triggered_by: TriggeredBy,
    ) -> Self {
        Self {
            memory_id: memory_id.into(),
            workspace_id: workspace_id.into(),
            previous_state,
            new_state,
            reason: reason.into(),
            triggered_by,
            user_id: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Append a transition event
///
/// Validates non-empty memory id, workspace id and reason.
pub fn log_transition(executor: &dyn StorageExecutor, event: &NewLifecycleEvent) -> Result<()> {
    if event.memory_id.is_empty() {
        return Err(MemoriaError::validation("memory_id", "must be non-empty"));
    }
    if event.workspace_id.is_empty() {
        return Err(MemoriaError::validation("workspace_id", "must be non-empty"));
    }
    if event.reason.trim().is_empty() {
        return Err(MemoriaError::validation("reason", "must be non-empty"));
    }

    executor.execute(
        "INSERT INTO lifecycle_events
            (memory_id, workspace_id, previous_state, new_state, reason,
             triggered_by, user_id, metadata, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        &[
            SqlValue::from(event.memory_id.clone()),
            SqlValue::from(event.workspace_id.clone()),
            SqlValue::from(event.previous_state.as_str()),
            SqlValue::from(event.new_state.as_str()),
            SqlValue::from(event.reason.clone()),
            SqlValue::from(event.triggered_by.as_str()),
            SqlValue::from(event.user_id.clone()),
            SqlValue::from(serde_json::to_string(&event.metadata)?),
            SqlValue::from(Utc::now()),
        ],
    )?;

    Ok(())
}

fn event_from_row(row: &Row) -> Result<LifecycleEvent> {
    let previous: LifecycleState = row
        .get_str("previous_state")?
        .parse()
        .map_err(MemoriaError::Database)?;
    let new: LifecycleState = row
        .get_str("new_state")?
        .parse()
        .map_err(MemoriaError::Database)?;
    let triggered_by: TriggeredBy = row
        .get_str("triggered_by")?
        .parse()
        .map_err(MemoriaError::Database)?;

    Ok(LifecycleEvent {
        id: row.get_i64("id")?,
        memory_id: row.get_str("memory_id")?,
        workspace_id: row.get_str("workspace_id")?,
        previous_state: previous,
        new_state: new,
        reason: row.get_str("reason")?,
        triggered_by,
        user_id: row.get_opt_str("user_id")?,
        metadata: row.get_json_map("metadata")?,
        created_at: row.get_datetime("created_at")?,
    })
}

const EVENT_COLUMNS: &str = "id, memory_id, workspace_id, previous_state, new_state, reason, triggered_by, user_id, metadata, created_at";

/// Full transition history for one memory, oldest first
pub fn get_history(
    executor: &dyn StorageExecutor,
    memory_id: &str,
    workspace_id: &str,
) -> Result<Vec<LifecycleEvent>> {
    let rows = executor.query(
        &format!(
            "SELECT {} FROM lifecycle_events
             WHERE memory_id = $1 AND workspace_id = $2
             ORDER BY created_at ASC, id ASC",
            EVENT_COLUMNS
        ),
        &[SqlValue::from(memory_id), SqlValue::from(workspace_id)],
    )?;

    rows.iter().map(event_from_row).collect()
}

/// Most recent transitions in a workspace, newest first
///
/// `limit` is clamped to [1, 1000]; callers passing 0 get the default 100.
pub fn get_recent_transitions(
    executor: &dyn StorageExecutor,
    workspace_id: &str,
    limit: usize,
) -> Result<Vec<LifecycleEvent>> {
    let limit = if limit == 0 { 100 } else { limit.min(1000) };

    let rows = executor.query(
        &format!(
            "SELECT {} FROM lifecycle_events
             WHERE workspace_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
            EVENT_COLUMNS
        ),
        &[
            SqlValue::from(workspace_id),
            SqlValue::Integer(limit as i64),
        ],
    )?;

    rows.iter().map(event_from_row).collect()
}

/// Delete events older than the retention window; returns deleted count
pub fn prune_events(
    executor: &dyn StorageExecutor,
    workspace_id: &str,
    retention_ms: i64,
) -> Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::milliseconds(retention_ms);
    executor.execute(
        "DELETE FROM lifecycle_events WHERE workspace_id = $1 AND created_at < $2",
        &[SqlValue::from(workspace_id), SqlValue::from(cutoff)],
    )
}
