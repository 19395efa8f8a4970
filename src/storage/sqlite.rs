//! Embedded storage backend on SQLite
//!
//! Single-file relational store with WAL journaling. Placeholders written
//! as `$N` are rewritten to `?N` before execution.
//!
//! While a transaction handle is open it holds the connection lock; run
//! all statements through the handle until commit or rollback.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use crate::error::{MemoriaError, Result};

use super::adapter::{
    rewrite_placeholders, Row, SqlValue, StorageAdapter, StorageExecutor, StorageTransaction,
};

/// Embedded SQLite storage adapter
pub struct SqliteAdapter {
    conn: Arc<Mutex<Connection>>,
    path: String,
}

impl SqliteAdapter {
    /// Open or create a database file
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            Connection::open_with_flags(path, flags)?
        };

        Self::configure_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_string(),
        })
    }

    /// In-memory database for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;
            PRAGMA cache_size=-64000;
            PRAGMA temp_store=MEMORY;
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        Ok(())
    }

    pub fn db_path(&self) -> &str {
        &self.path
    }

    fn run_query(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let rewritten = rewrite_placeholders(sql);
        let mut stmt = conn.prepare(&rewritten)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|c| c.to_string()).collect();

        let bound = params.iter().map(to_sqlite_value);
        let mut rows = stmt.query(rusqlite::params_from_iter(bound))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut columns = HashMap::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                columns.insert(name.clone(), from_sqlite_ref(row.get_ref(i)?));
            }
            out.push(Row::new(columns));
        }
        Ok(out)
    }

    fn run_execute(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let rewritten = rewrite_placeholders(sql);
        let bound = params.iter().map(to_sqlite_value);
        let affected = conn.execute(&rewritten, rusqlite::params_from_iter(bound))?;
        Ok(affected as u64)
    }
}

fn to_sqlite_value(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(v) => rusqlite::types::Value::Integer(*v),
        SqlValue::Real(v) => rusqlite::types::Value::Real(*v),
        SqlValue::Text(v) => rusqlite::types::Value::Text(v.clone()),
        SqlValue::Blob(v) => rusqlite::types::Value::Blob(v.clone()),
    }
}

fn from_sqlite_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => SqlValue::Blob(v.to_vec()),
    }
}

impl StorageExecutor for SqliteAdapter {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        Self::run_query(&conn, sql, params)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let conn = self.conn.lock();
        Self::run_execute(&conn, sql, params)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl StorageAdapter for SqliteAdapter {
    fn begin<'a>(&'a self) -> Result<Box<dyn StorageTransaction + 'a>> {
        let guard = self.conn.lock();
        guard.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            guard,
            resolved: false,
        }))
    }

    fn size_bytes(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let size: i64 = conn.query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )?;
        Ok(Some(size))
    }
}

/// Transaction handle holding the connection lock for its scope
pub struct SqliteTransaction<'a> {
    guard: MutexGuard<'a, Connection>,
    resolved: bool,
}

impl StorageExecutor for SqliteTransaction<'_> {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        SqliteAdapter::run_query(&self.guard, sql, params)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        SqliteAdapter::run_execute(&self.guard, sql, params)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.guard.execute_batch(sql)?;
        Ok(())
    }
}

impl StorageTransaction for SqliteTransaction<'_> {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.guard.execute_batch("COMMIT")?;
        self.resolved = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.guard.execute_batch("ROLLBACK")?;
        self.resolved = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            if let Err(e) = self.guard.execute_batch("ROLLBACK") {
                tracing::warn!("implicit rollback failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("path", &self.path)
            .finish()
    }
}

/// Map a zero-row UPDATE/DELETE to `NotFound` for callers that require the row
pub fn require_affected(affected: u64, resource: &str, id: &str) -> Result<()> {
    if affected == 0 {
        Err(MemoriaError::not_found(resource, id))
    } else {
        Ok(())
    }
}
