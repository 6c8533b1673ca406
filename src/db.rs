//! Database connection and schema management.
//!
//! This module provides SQLite database connectivity with:
//! - Connection pool management
//! - WAL mode for concurrent reads
//! - Automatic migration execution
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::time::Duration;
//! use harvester_core::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("harvest.db"), 4, Duration::from_secs(5)).await?;
//! // Use db for queries...
//! db.close().await;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Default SQLite busy timeout.
/// Connections will wait this long before returning SQLITE_BUSY.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Failed to create the directory holding the database file.
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Database connection wrapper with connection pool.
///
/// Handles SQLite connection pooling, WAL mode configuration,
/// and automatic migration execution.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path`.
    ///
    /// This will:
    /// 1. Create the parent directory and database file if missing
    /// 2. Enable WAL mode and the busy timeout on every connection
    /// 3. Run any pending migrations
    ///
    /// `max_connections` should cover one writer per worker plus headroom for
    /// the audit sink.
    ///
    /// # Errors
    ///
    /// Returns `DbError::CreateDir` if the parent directory cannot be created,
    /// `DbError::Connection` if the connection fails, or `DbError::Migration`
    /// if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(
        db_path: &Path,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DbError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(max_connections, "database ready");

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// The database exists only for the lifetime of the single pooled
    /// connection. WAL mode is not enabled for in-memory databases as it
    /// provides no benefit.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.eq_ignore_ascii_case("wal"))
    }

    /// Gracefully closes all connections in the pool.
    ///
    /// This should be called before the application exits so that the WAL is
    /// checkpointed. After calling this method, the Database instance should not
    /// be used.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok(), "Failed to create in-memory database");
    }

    #[tokio::test]
    async fn test_database_audit_log_table_exists() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO audit_log (kind, source_id, status, duration_sec, timestamp)
             VALUES ('download', 'https://example.com/a.pdf', 'success', 0.5, '2026-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_ok(), "audit_log table should exist after migration");
    }

    #[tokio::test]
    async fn test_database_audit_log_kind_constraint() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO audit_log (kind, source_id, status, duration_sec, timestamp)
             VALUES ('bogus', 'x', 'success', 0.0, '2026-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err(), "Invalid kind should be rejected by CHECK constraint");
    }

    #[tokio::test]
    async fn test_database_document_metadata_table_exists() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO document_metadata (source_url, pdf_path, fields) VALUES ('u', 'p', '{}')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_ok(), "document_metadata table should exist after migration");
    }

    #[tokio::test]
    async fn test_database_with_tempfile_creates_parent_and_enables_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let db = Database::new(&db_path, 3, DEFAULT_BUSY_TIMEOUT).await.unwrap();
        assert!(db_path.exists());
        assert!(db.is_wal_enabled().await.unwrap(), "WAL mode should be enabled");
        db.close().await;
    }

    #[tokio::test]
    async fn test_database_close_works() {
        let db = Database::new_in_memory().await.unwrap();
        db.close().await;
    }
}
