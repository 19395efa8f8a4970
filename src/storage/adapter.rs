//! Generic relational storage interface
//!
//! A thin parameterized-SQL surface shared by the embedded and networked
//! backends. Queries are written with `$1..$N` placeholders; each adapter
//! rewrites them to its dialect before execution. Workspace scoping is a
//! caller obligation - the adapter is generic.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::error::{MemoriaError, Result};

/// A parameter or column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::Text(v.to_rfc3339())
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlValue::Null,
        }
    }
}

/// A single result row keyed by column name
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: HashMap<String, SqlValue>,
}

impl Row {
    pub fn new(columns: HashMap<String, SqlValue>) -> Self {
        Self { columns }
    }

    fn value(&self, column: &str) -> Result<&SqlValue> {
        self.columns
            .get(column)
            .ok_or_else(|| MemoriaError::Database(format!("missing column: {}", column)))
    }

    pub fn get_str(&self, column: &str) -> Result<String> {
        match self.value(column)? {
            SqlValue::Text(s) => Ok(s.clone()),
            other => Err(MemoriaError::Database(format!(
                "column {} is not text: {:?}",
                column, other
            ))),
        }
    }

    pub fn get_opt_str(&self, column: &str) -> Result<Option<String>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s.clone())),
            other => Err(MemoriaError::Database(format!(
                "column {} is not text: {:?}",
                column, other
            ))),
        }
    }

    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.value(column)? {
            SqlValue::Integer(v) => Ok(*v),
            other => Err(MemoriaError::Database(format!(
                "column {} is not an integer: {:?}",
                column, other
            ))),
        }
    }

    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.value(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(v) => Ok(Some(*v)),
            other => Err(MemoriaError::Database(format!(
                "column {} is not an integer: {:?}",
                column, other
            ))),
        }
    }

    pub fn get_f64(&self, column: &str) -> Result<f64> {
        match self.value(column)? {
            SqlValue::Real(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v as f64),
            other => Err(MemoriaError::Database(format!(
                "column {} is not a real: {:?}",
                column, other
            ))),
        }
    }

    pub fn get_bool(&self, column: &str) -> Result<bool> {
        Ok(self.get_i64(column)? != 0)
    }

    /// Parse an RFC 3339 timestamp column
    pub fn get_datetime(&self, column: &str) -> Result<DateTime<Utc>> {
        let raw = self.get_str(column)?;
        parse_timestamp(&raw)
            .ok_or_else(|| MemoriaError::Database(format!("column {} is not a timestamp: {}", column, raw)))
    }

    pub fn get_opt_datetime(&self, column: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get_opt_str(column)? {
            None => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| {
                    MemoriaError::Database(format!("column {} is not a timestamp: {}", column, raw))
                }),
        }
    }

    /// Parse a JSON object column (defaults to empty map for NULL)
    pub fn get_json_map(&self, column: &str) -> Result<HashMap<String, serde_json::Value>> {
        match self.get_opt_str(column)? {
            None => Ok(HashMap::new()),
            Some(raw) => Ok(serde_json::from_str(&raw)?),
        }
    }
}

/// Parse an RFC 3339 timestamp, tolerating the space-separated form SQLite
/// emits for `CURRENT_TIMESTAMP`
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Shared query surface of adapters and transactions
pub trait StorageExecutor {
    /// Run a SELECT and collect all rows
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run an INSERT/UPDATE/DELETE; returns affected row count
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run multiple statements separated by semicolons (DDL, migrations)
    fn execute_batch(&self, sql: &str) -> Result<()>;
}

/// A scoped transaction handle
///
/// Dropping an unresolved handle rolls the transaction back.
pub trait StorageTransaction: StorageExecutor {
    fn commit(self: Box<Self>) -> Result<()>;
    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Health report for a storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: f64,
    pub error: Option<String>,
}

/// The storage adapter contract implemented by both backends
pub trait StorageAdapter: StorageExecutor + Send + Sync {
    /// Begin a transaction; the handle borrows the adapter's connection
    fn begin<'a>(&'a self) -> Result<Box<dyn StorageTransaction + 'a>>;

    /// Database size in bytes, when the backend can report it
    fn size_bytes(&self) -> Result<Option<i64>>;

    /// Measure a trivial query round-trip
    fn health(&self) -> HealthStatus {
        let started = Instant::now();
        match self.query("SELECT 1 AS one", &[]) {
            Ok(_) => HealthStatus {
                healthy: true,
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                error: None,
            },
            Err(e) => HealthStatus {
                healthy: false,
                latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Rewrite `$1..$N` placeholders to the `?N` form both SQLite dialects use
///
/// Placeholders inside single-quoted string literals are left untouched.
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if c == '\'' {
            in_string = !in_string;
            out.push(c);
            continue;
        }

        if c == '$' && !in_string {
            let mut digits = String::new();
            while let Some(d) = chars.peek() {
                if d.is_ascii_digit() {
                    digits.push(*d);
                    chars.next();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                out.push('$');
            } else {
                out.push('?');
                out.push_str(&digits);
            }
        } else {
            out.push(c);
        }
    }

    out
}
