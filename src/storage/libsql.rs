//! Networked storage backend on libSQL
//!
//! Implements the same `StorageAdapter` contract over a remote libSQL
//! database (or a local replica), feature-gated behind `libsql`. The
//! driver is async; the sync adapter surface bridges with
//! `block_in_place`, so calls must happen on a multi-threaded tokio
//! runtime.

#![cfg(feature = "libsql")]

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use libsql::{Builder, Connection};
use parking_lot::{Mutex, MutexGuard};

use crate::error::{MemoriaError, Result};

use super::adapter::{
    rewrite_placeholders, Row, SqlValue, StorageAdapter, StorageExecutor, StorageTransaction,
};

/// Networked libSQL storage adapter
pub struct LibsqlAdapter {
    conn: Arc<Mutex<Connection>>,
    url: String,
}

fn block_on<F: Future>(fut: F) -> F::Output {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
}

impl LibsqlAdapter {
    /// Connect to a remote libSQL database
    pub async fn connect(url: &str, auth_token: &str) -> Result<Self> {
        let db = Builder::new_remote(url.to_string(), auth_token.to_string())
            .build()
            .await
            .map_err(|e| MemoriaError::Database(e.to_string()))?;
        let conn = db
            .connect()
            .map_err(|e| MemoriaError::Database(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            url: url.to_string(),
        })
    }

    /// Open a local libSQL database file (useful for parity testing)
    pub async fn open_local(path: &str) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| MemoriaError::Database(e.to_string()))?;
        let conn = db
            .connect()
            .map_err(|e| MemoriaError::Database(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            url: path.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn run_query(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let rewritten = rewrite_placeholders(sql);
        let bound: Vec<libsql::Value> = params.iter().map(to_libsql_value).collect();

        let mut rows = conn
            .query(&rewritten, bound)
            .await
            .map_err(map_libsql_error)?;

        let column_count = rows.column_count();
        let column_names: Vec<String> = (0..column_count)
            .map(|i| rows.column_name(i).unwrap_or_default().to_string())
            .collect();

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_libsql_error)? {
            let mut columns = HashMap::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                let value = row.get_value(i as i32).map_err(map_libsql_error)?;
                columns.insert(name.clone(), from_libsql_value(value));
            }
            out.push(Row::new(columns));
        }
        Ok(out)
    }

    async fn run_execute(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let rewritten = rewrite_placeholders(sql);
        let bound: Vec<libsql::Value> = params.iter().map(to_libsql_value).collect();
        conn.execute(&rewritten, bound)
            .await
            .map_err(map_libsql_error)
    }
}

fn map_libsql_error(e: libsql::Error) -> MemoriaError {
    let text = e.to_string();
    if text.contains("UNIQUE constraint") || text.contains("SQLITE_CONSTRAINT") {
        MemoriaError::Conflict(text)
    } else {
        MemoriaError::Database(text)
    }
}

fn to_libsql_value(value: &SqlValue) -> libsql::Value {
    match value {
        SqlValue::Null => libsql::Value::Null,
        SqlValue::Integer(v) => libsql::Value::Integer(*v),
        SqlValue::Real(v) => libsql::Value::Real(*v),
        SqlValue::Text(v) => libsql::Value::Text(v.clone()),
        SqlValue::Blob(v) => libsql::Value::Blob(v.clone()),
    }
}

fn from_libsql_value(value: libsql::Value) -> SqlValue {
    match value {
        libsql::Value::Null => SqlValue::Null,
        libsql::Value::Integer(v) => SqlValue::Integer(v),
        libsql::Value::Real(v) => SqlValue::Real(v),
        libsql::Value::Text(v) => SqlValue::Text(v),
        libsql::Value::Blob(v) => SqlValue::Blob(v),
    }
}

impl StorageExecutor for LibsqlAdapter {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let conn = self.conn.lock();
        block_on(Self::run_query(&conn, sql, params))
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let conn = self.conn.lock();
        block_on(Self::run_execute(&conn, sql, params))
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock();
        block_on(conn.execute_batch(sql)).map_err(map_libsql_error)?;
        Ok(())
    }
}

impl StorageAdapter for LibsqlAdapter {
    fn begin<'a>(&'a self) -> Result<Box<dyn StorageTransaction + 'a>> {
        let guard = self.conn.lock();
        block_on(guard.execute_batch("BEGIN IMMEDIATE")).map_err(map_libsql_error)?;
        Ok(Box::new(LibsqlTransaction {
            guard,
            resolved: false,
        }))
    }

    fn size_bytes(&self) -> Result<Option<i64>> {
        // Remote databases do not expose page counts
        Ok(None)
    }
}

/// Transaction handle holding the connection lock for its scope
pub struct LibsqlTransaction<'a> {
    guard: MutexGuard<'a, Connection>,
    resolved: bool,
}

impl StorageExecutor for LibsqlTransaction<'_> {
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        block_on(LibsqlAdapter::run_query(&self.guard, sql, params))
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        block_on(LibsqlAdapter::run_execute(&self.guard, sql, params))
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        block_on(self.guard.execute_batch(sql)).map_err(map_libsql_error)?;
        Ok(())
    }
}

impl StorageTransaction for LibsqlTransaction<'_> {
    fn commit(mut self: Box<Self>) -> Result<()> {
        block_on(self.guard.execute_batch("COMMIT")).map_err(map_libsql_error)?;
        self.resolved = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        block_on(self.guard.execute_batch("ROLLBACK")).map_err(map_libsql_error)?;
        self.resolved = true;
        Ok(())
    }
}

impl Drop for LibsqlTransaction<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            if let Err(e) = block_on(self.guard.execute_batch("ROLLBACK")) {
                tracing::warn!("implicit rollback failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for LibsqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibsqlAdapter")
            .field("url", &self.url)
            .finish()
    }
}
