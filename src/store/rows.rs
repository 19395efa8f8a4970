//! Row mapping between the relational store and domain types

use crate::error::{MemoriaError, Result};
use crate::storage::Row;
use crate::types::{ArchivedMemory, LifecycleState, Memory, Relationship};

pub const MEMORY_COLUMNS: &str = "id, workspace_id, conversation_id, memory_type, content, confidence, metadata, lifecycle_state, last_accessed_at, access_count, importance_score, decay_score, effective_ttl_ms, pinned, pinned_by, pinned_at, archived_at, expires_at, vector_pending, content_hash, created_at, updated_at";

pub const ARCHIVED_COLUMNS: &str = "id, workspace_id, conversation_id, memory_type, content, confidence, metadata, importance_score, access_count, last_accessed_at, content_hash, created_at, updated_at, archived_at, expires_at";

pub const RELATIONSHIP_COLUMNS: &str =
    "id, from_memory_id, to_memory_id, relationship_type, confidence, created_at";

pub fn memory_from_row(row: &Row) -> Result<Memory> {
    let state: LifecycleState = row
        .get_str("lifecycle_state")?
        .parse()
        .map_err(MemoriaError::Database)?;

    Ok(Memory {
        id: row.get_str("id")?,
        workspace_id: row.get_str("workspace_id")?,
        conversation_id: row.get_opt_str("conversation_id")?,
        memory_type: row.get_str("memory_type")?,
        content: row.get_str("content")?,
        confidence: row.get_f64("confidence")?,
        metadata: row.get_json_map("metadata")?,
        lifecycle_state: state,
        last_accessed_at: row.get_datetime("last_accessed_at")?,
        access_count: row.get_i64("access_count")?,
        importance_score: row.get_f64("importance_score")?,
        decay_score: row.get_f64("decay_score")?,
        effective_ttl_ms: row.get_opt_i64("effective_ttl_ms")?,
        pinned: row.get_bool("pinned")?,
        pinned_by: row.get_opt_str("pinned_by")?,
        pinned_at: row.get_opt_datetime("pinned_at")?,
        archived_at: row.get_opt_datetime("archived_at")?,
        expires_at: row.get_opt_datetime("expires_at")?,
        vector_pending: row.get_bool("vector_pending")?,
        content_hash: row.get_opt_str("content_hash")?,
        created_at: row.get_datetime("created_at")?,
        updated_at: row.get_datetime("updated_at")?,
    })
}

pub fn archived_from_row(row: &Row) -> Result<ArchivedMemory> {
    Ok(ArchivedMemory {
        id: row.get_str("id")?,
        workspace_id: row.get_str("workspace_id")?,
        conversation_id: row.get_opt_str("conversation_id")?,
        memory_type: row.get_str("memory_type")?,
        content: row.get_str("content")?,
        confidence: row.get_f64("confidence")?,
        metadata: row.get_json_map("metadata")?,
        importance_score: row.get_f64("importance_score")?,
        access_count: row.get_i64("access_count")?,
        last_accessed_at: row.get_datetime("last_accessed_at")?,
        content_hash: row.get_opt_str("content_hash")?,
        created_at: row.get_datetime("created_at")?,
        updated_at: row.get_datetime("updated_at")?,
        archived_at: row.get_datetime("archived_at")?,
        expires_at: row.get_datetime("expires_at")?,
    })
}

pub fn relationship_from_row(row: &Row) -> Result<Relationship> {
    Ok(Relationship {
        id: row.get_str("id")?,
        from_memory_id: row.get_str("from_memory_id")?,
        to_memory_id: row.get_str("to_memory_id")?,
        relationship_type: row.get_str("relationship_type")?,
        confidence: row.get_f64("confidence")?,
        created_at: row.get_datetime("created_at")?,
    })
}
