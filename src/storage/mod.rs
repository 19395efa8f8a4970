//! Relational storage for Memoria
//!
//! A generic parameterized-SQL adapter with two implementations: the
//! embedded single-file backend (`SqliteAdapter`) and the networked
//! libSQL backend (`LibsqlAdapter`, feature `libsql`).

pub mod adapter;
mod libsql;
pub mod migrations;
pub mod sqlite;

pub use adapter::{
    parse_timestamp, rewrite_placeholders, HealthStatus, Row, SqlValue, StorageAdapter,
    StorageExecutor, StorageTransaction,
};
#[cfg(feature = "libsql")]
pub use self::libsql::LibsqlAdapter;
pub use migrations::{Migration, MigrationRunner, MigrationStatus};
pub use sqlite::{require_affected, SqliteAdapter};
