//! Schema migration runner
//!
//! Migrations are numbered SQL files (`NNN_description.sql`) containing an
//! `-- UP MIGRATION` section and an optional `-- DOWN MIGRATION` section.
//! Applied migrations are recorded in `schema_migrations(id, name,
//! applied_at)`; `up` applies pending migrations in ascending id, `down`
//! reverses the most recent ones.

use chrono::Utc;

use crate::error::{MemoriaError, Result};

use super::adapter::{SqlValue, StorageAdapter};

/// A parsed migration file
#[derive(Debug, Clone)]
pub struct Migration {
    pub id: i64,
    pub name: String,
    pub up_sql: String,
    pub down_sql: Option<String>,
}

const UP_MARKER: &str = "-- UP MIGRATION";
const DOWN_MARKER: &str = "-- DOWN MIGRATION";

impl Migration {
    /// Parse a migration from its file name and contents
    ///
    /// The file name must match `NNN_description.sql`; the body must start
    /// with an `-- UP MIGRATION` section.
    pub fn parse(file_name: &str, contents: &str) -> Result<Self> {
        let stem = file_name
            .strip_suffix(".sql")
            .ok_or_else(|| MemoriaError::validation("migration", format!("not a .sql file: {}", file_name)))?;

        let (number, description) = stem.split_once('_').ok_or_else(|| {
            MemoriaError::validation(
                "migration",
                format!("file name must be NNN_description.sql: {}", file_name),
            )
        })?;

        let id: i64 = number.parse().map_err(|_| {
            MemoriaError::validation(
                "migration",
                format!("file name must start with a number: {}", file_name),
            )
        })?;

        let up_start = contents.find(UP_MARKER).ok_or_else(|| {
            MemoriaError::validation(
                "migration",
                format!("{} is missing the {} section", file_name, UP_MARKER),
            )
        })?;

        let after_up = &contents[up_start + UP_MARKER.len()..];
        let (up_sql, down_sql) = match after_up.find(DOWN_MARKER) {
            Some(down_start) => {
                let up = after_up[..down_start].trim().to_string();
                let down = after_up[down_start + DOWN_MARKER.len()..].trim().to_string();
                (up, if down.is_empty() { None } else { Some(down) })
            }
            None => (after_up.trim().to_string(), None),
        };

        if up_sql.is_empty() {
            return Err(MemoriaError::validation(
                "migration",
                format!("{} has an empty UP section", file_name),
            ));
        }

        Ok(Self {
            id,
            name: description.to_string(),
            up_sql,
            down_sql,
        })
    }
}

/// An applied migration as recorded in the database
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub id: i64,
    pub name: String,
    pub applied_at: String,
}

/// Status report listing applied and pending migrations
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<String>,
}

/// The built-in schema, embedded at compile time
pub fn builtin_migrations() -> Result<Vec<Migration>> {
    let files = [
        (
            "001_initial_schema.sql",
            include_str!("../../migrations/001_initial_schema.sql"),
        ),
        (
            "002_archive_and_relationships.sql",
            include_str!("../../migrations/002_archive_and_relationships.sql"),
        ),
        (
            "003_lifecycle_events.sql",
            include_str!("../../migrations/003_lifecycle_events.sql"),
        ),
    ];

    files
        .iter()
        .map(|(name, contents)| Migration::parse(name, contents))
        .collect()
}

/// Runs migrations against a storage adapter
pub struct MigrationRunner<'a> {
    storage: &'a dyn StorageAdapter,
    migrations: Vec<Migration>,
}

impl<'a> MigrationRunner<'a> {
    /// Create a runner over an explicit migration set
    pub fn new(storage: &'a dyn StorageAdapter, mut migrations: Vec<Migration>) -> Result<Self> {
        migrations.sort_by_key(|m| m.id);
        for pair in migrations.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(MemoriaError::validation(
                    "migration",
                    format!("duplicate migration id {}", pair[0].id),
                ));
            }
        }
        Ok(Self { storage, migrations })
    }

    /// Create a runner over the built-in schema
    pub fn with_builtin(storage: &'a dyn StorageAdapter) -> Result<Self> {
        Self::new(storage, builtin_migrations()?)
    }

    /// Load migrations from a directory of `NNN_description.sql` files
    pub fn from_dir(storage: &'a dyn StorageAdapter, dir: &std::path::Path) -> Result<Self> {
        let mut migrations = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".sql") {
                continue;
            }
            let contents = std::fs::read_to_string(entry.path())?;
            migrations.push(Migration::parse(&name, &contents)?);
        }
        Self::new(storage, migrations)
    }

    fn ensure_tracking_table(&self) -> Result<()> {
        self.storage.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )
    }

    fn applied(&self) -> Result<Vec<AppliedMigration>> {
        let rows = self.storage.query(
            "SELECT id, name, applied_at FROM schema_migrations ORDER BY id ASC",
            &[],
        )?;
        rows.iter()
            .map(|row| {
                Ok(AppliedMigration {
                    id: row.get_i64("id")?,
                    name: row.get_str("name")?,
                    applied_at: row.get_str("applied_at")?,
                })
            })
            .collect()
    }

    /// Apply all pending migrations in ascending id order
    ///
    /// Returns the names of migrations that were applied.
    pub fn up(&self) -> Result<Vec<String>> {
        self.ensure_tracking_table()?;
        let applied_ids: Vec<i64> = self.applied()?.iter().map(|m| m.id).collect();

        let mut ran = Vec::new();
        for migration in &self.migrations {
            if applied_ids.contains(&migration.id) {
                continue;
            }

            tracing::info!(id = migration.id, name = %migration.name, "applying migration");
            self.storage.execute_batch(&migration.up_sql)?;
            self.storage.execute(
                "INSERT INTO schema_migrations (id, name, applied_at) VALUES ($1, $2, $3)",
                &[
                    SqlValue::Integer(migration.id),
                    SqlValue::from(migration.name.clone()),
                    SqlValue::from(Utc::now()),
                ],
            )?;
            ran.push(migration.name.clone());
        }

        Ok(ran)
    }

    /// Reverse the last `count` applied migrations
    ///
    /// Fails if any targeted migration has no DOWN section or is unknown
    /// to this runner.
    pub fn down(&self, count: usize) -> Result<Vec<String>> {
        self.ensure_tracking_table()?;
        let mut applied = self.applied()?;
        applied.reverse();

        let mut reversed = Vec::new();
        for record in applied.iter().take(count) {
            let migration = self
                .migrations
                .iter()
                .find(|m| m.id == record.id)
                .ok_or_else(|| {
                    MemoriaError::not_found("migration", record.id.to_string())
                })?;

            let down_sql = migration.down_sql.as_ref().ok_or_else(|| {
                MemoriaError::validation(
                    "migration",
                    format!("{} has no DOWN section", migration.name),
                )
            })?;

            tracing::info!(id = migration.id, name = %migration.name, "reverting migration");
            self.storage.execute_batch(down_sql)?;
            self.storage.execute(
                "DELETE FROM schema_migrations WHERE id = $1",
                &[SqlValue::Integer(migration.id)],
            )?;
            reversed.push(migration.name.clone());
        }

        Ok(reversed)
    }

    /// List applied and pending migrations
    pub fn status(&self) -> Result<MigrationStatus> {
        self.ensure_tracking_table()?;
        let applied = self.applied()?;
        let applied_ids: Vec<i64> = applied.iter().map(|m| m.id).collect();

        let pending = self
            .migrations
            .iter()
            .filter(|m| !applied_ids.contains(&m.id))
            .map(|m| m.name.clone())
            .collect();

        Ok(MigrationStatus { applied, pending })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::SqliteAdapter;
    use crate::storage::StorageExecutor;

    #[test]
    fn test_parse_migration() {
        let contents = "-- UP MIGRATION\nCREATE TABLE a (id TEXT);\n-- DOWN MIGRATION\nDROP TABLE a;\n";
        let migration = Migration::parse("004_add_a.sql", contents).unwrap();
        assert_eq!(migration.id, 4);
        assert_eq!(migration.name, "add_a");
        assert!(migration.up_sql.contains("CREATE TABLE a"));
        assert_eq!(migration.down_sql.as_deref(), Some("DROP TABLE a;"));
    }

    #[test]
    fn test_parse_rejects_missing_up() {
        assert!(Migration::parse("001_x.sql", "DROP TABLE a;").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_name() {
        assert!(Migration::parse("noformat.sql", "-- UP MIGRATION\nSELECT 1;").is_err());
        assert!(Migration::parse("abc_x.sql", "-- UP MIGRATION\nSELECT 1;").is_err());
    }

    #[test]
    fn test_builtin_up_then_status() {
        let storage = SqliteAdapter::open_in_memory().unwrap();
        let runner = MigrationRunner::with_builtin(&storage).unwrap();

        let ran = runner.up().unwrap();
        assert_eq!(ran.len(), 3);

        let status = runner.status().unwrap();
        assert_eq!(status.applied.len(), 3);
        assert!(status.pending.is_empty());

        // Idempotent
        let ran_again = runner.up().unwrap();
        assert!(ran_again.is_empty());

        // Schema actually exists
        storage
            .query("SELECT id FROM memories LIMIT 1", &[])
            .unwrap();
        storage
            .query("SELECT id FROM lifecycle_events LIMIT 1", &[])
            .unwrap();
    }

    #[test]
    fn test_up_down_roundtrip() {
        let storage = SqliteAdapter::open_in_memory().unwrap();
        let runner = MigrationRunner::with_builtin(&storage).unwrap();
        runner.up().unwrap();

        let reversed = runner.down(3).unwrap();
        assert_eq!(reversed.len(), 3);

        let status = runner.status().unwrap();
        assert!(status.applied.is_empty());
        assert_eq!(status.pending.len(), 3);

        // Tables are gone
        assert!(storage.query("SELECT id FROM memories LIMIT 1", &[]).is_err());
    }

    #[test]
    fn test_down_partial() {
        let storage = SqliteAdapter::open_in_memory().unwrap();
        let runner = MigrationRunner::with_builtin(&storage).unwrap();
        runner.up().unwrap();

        let reversed = runner.down(1).unwrap();
        assert_eq!(reversed, vec!["lifecycle_events".to_string()]);

        let status = runner.status().unwrap();
        assert_eq!(status.applied.len(), 2);
        assert_eq!(status.pending, vec!["lifecycle_events".to_string()]);
    }
}
