//! SQLite-backed vector index
//!
//! Embeddings live in their own single-file store as little-endian f32
//! blobs; search scans the workspace's candidates and scores them with
//! cosine similarity in Rust.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};

use crate::error::{MemoriaError, Result};

use super::{
    check_dimensions, cosine_similarity, decode_vector, encode_vector, VectorFilter, VectorIndex,
    VectorMatch, VectorMetadata,
};

/// Vector index stored in a standalone SQLite file
pub struct SqliteVectorIndex {
    conn: Arc<Mutex<Connection>>,
    dimensions: usize,
}

impl SqliteVectorIndex {
    /// Open or create a vector store with a fixed dimensionality
    pub fn open(path: &str, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(MemoriaError::validation("dimensions", "must be positive"));
        }

        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(path, flags)
        }
        .map_err(|e| MemoriaError::VectorStore(e.to_string()))?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;

            CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                memory_type TEXT NOT NULL,
                embedding BLOB NOT NULL,
                dimensions INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_vectors_workspace_type
                ON vectors(workspace_id, memory_type);
            "#,
        )
        .map_err(|e| MemoriaError::VectorStore(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimensions,
        })
    }

    /// In-memory index for tests
    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        Self::open(":memory:", dimensions)
    }

    /// Total stored vectors
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))
            .map_err(|e| MemoriaError::VectorStore(e.to_string()))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn upsert(&self, id: &str, vector: &[f32], metadata: VectorMetadata) -> Result<()> {
        check_dimensions(self.dimensions, vector)?;
        if id.is_empty() {
            return Err(MemoriaError::validation("id", "must be non-empty"));
        }

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO vectors (id, workspace_id, memory_type, embedding, dimensions, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                workspace_id = excluded.workspace_id,
                memory_type = excluded.memory_type,
                embedding = excluded.embedding,
                dimensions = excluded.dimensions,
                updated_at = excluded.updated_at",
            params![
                id,
                metadata.workspace_id,
                metadata.memory_type,
                encode_vector(vector),
                self.dimensions as i64,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| MemoriaError::VectorStore(e.to_string()))?;
        Ok(())
    }

    fn search(&self, vector: &[f32], top_k: usize, filter: &VectorFilter) -> Result<Vec<VectorMatch>> {
        check_dimensions(self.dimensions, vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();

        // Candidate scan is workspace-bounded; type membership is applied
        // in Rust to avoid dynamic IN-list SQL
        let mut stmt = conn
            .prepare(
                "SELECT id, memory_type, embedding FROM vectors WHERE workspace_id = ?1",
            )
            .map_err(|e| MemoriaError::VectorStore(e.to_string()))?;

        let candidates: Vec<(String, String, Vec<u8>)> = stmt
            .query_map(params![filter.workspace_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(|e| MemoriaError::VectorStore(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();

        let mut matches = Vec::new();
        for (id, memory_type, blob) in candidates {
            if let Some(types) = &filter.types {
                if !types.iter().any(|t| t == &memory_type) {
                    continue;
                }
            }
            let stored = decode_vector(&blob)?;
            matches.push(VectorMatch {
                id,
                score: cosine_similarity(vector, &stored),
            });
        }

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM vectors WHERE id = ?1", params![id])
            .map_err(|e| MemoriaError::VectorStore(e.to_string()))?;
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM vectors")
            .map_err(|e| MemoriaError::VectorStore(e.to_string()))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| MemoriaError::VectorStore(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
