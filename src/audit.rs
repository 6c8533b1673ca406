//! Append-only audit trail of retrieval and extraction outcomes.
//!
//! Every terminal outcome of a tracked operation produces exactly one
//! [`AuditRecord`]. Writing goes through [`AuditSink::record`], which never
//! fails: a write that cannot be persisted is logged and reported as
//! [`AuditWrite::Dropped`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::Database;
use crate::download::FetchStatus;

/// Which pipeline step produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditKind {
    /// Artifact retrieval.
    Download,
    /// Model metadata extraction.
    Extraction,
}

impl AuditKind {
    /// Returns the value stored in the `kind` column.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Extraction => "extraction",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Self::Download),
            "extraction" => Ok(Self::Extraction),
            other => Err(AuditError::Corrupt(format!("unknown audit kind: {other}"))),
        }
    }
}

/// One audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    /// Step that produced the record.
    pub kind: AuditKind,
    /// Locator for downloads, artifact path for extractions.
    pub source_id: String,
    /// Stored artifact, when one exists.
    pub local_path: Option<String>,
    /// Status string from the step's taxonomy.
    pub status: String,
    /// Failure cause, if any.
    pub error_message: Option<String>,
    /// Wall time of the whole operation in seconds.
    pub duration_sec: f64,
    /// When the outcome was recorded.
    pub timestamp: DateTime<Utc>,
    /// Raw model response for extraction records.
    pub detail: Option<String>,
}

impl AuditRecord {
    /// Builds a download record stamped with the current time.
    #[must_use]
    pub fn download(
        locator: impl Into<String>,
        local_path: Option<String>,
        status: FetchStatus,
        error_message: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            kind: AuditKind::Download,
            source_id: locator.into(),
            local_path,
            status: status.as_str().to_string(),
            error_message,
            duration_sec: duration.as_secs_f64(),
            timestamp: Utc::now(),
            detail: None,
        }
    }

    /// Builds an extraction record stamped with the current time.
    #[must_use]
    pub fn extraction(
        source_id: impl Into<String>,
        status: impl Into<String>,
        error_message: Option<String>,
        duration: Duration,
        detail: Option<String>,
    ) -> Self {
        let source_id = source_id.into();
        Self {
            kind: AuditKind::Extraction,
            local_path: Some(source_id.clone()),
            source_id,
            status: status.into(),
            error_message,
            duration_sec: duration.as_secs_f64(),
            timestamp: Utc::now(),
            detail,
        }
    }
}

/// Audit persistence errors.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Database write or read failed.
    #[error("audit database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded.
    #[error("corrupt audit row: {0}")]
    Corrupt(String),
}

/// Durable destination for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Appends one record.
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// SQLite-backed audit store writing to `audit_log`.
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    db: Database,
}

#[derive(Debug, FromRow)]
struct AuditRow {
    kind: String,
    source_id: String,
    local_path: Option<String>,
    status: String,
    error_message: Option<String>,
    duration_sec: f64,
    timestamp: String,
    detail: Option<String>,
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = AuditError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|e| AuditError::Corrupt(format!("bad timestamp {}: {e}", row.timestamp)))?
            .with_timezone(&Utc);
        Ok(Self {
            kind: row.kind.parse()?,
            source_id: row.source_id,
            local_path: row.local_path,
            status: row.status,
            error_message: row.error_message,
            duration_sec: row.duration_sec,
            timestamp,
            detail: row.detail,
        })
    }
}

impl SqliteAuditStore {
    /// Creates a store on an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Lists records in insertion order, optionally filtered by kind.
    ///
    /// # Errors
    ///
    /// Returns `AuditError::Database` when the query fails, or
    /// `AuditError::Corrupt` when a row cannot be decoded.
    #[instrument(skip(self))]
    pub async fn list_records(
        &self,
        kind: Option<AuditKind>,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r"SELECT kind, source_id, local_path, status, error_message,
                     duration_sec, timestamp, detail
              FROM audit_log
              WHERE (?1 IS NULL OR kind = ?1)
              ORDER BY id",
        )
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    #[instrument(skip(self, record), fields(kind = %record.kind, status = %record.status))]
    async fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        sqlx::query(
            r"INSERT INTO audit_log (
                kind, source_id, local_path, status, error_message,
                duration_sec, timestamp, detail
              )
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.kind.as_str())
        .bind(&record.source_id)
        .bind(&record.local_path)
        .bind(&record.status)
        .bind(&record.error_message)
        .bind(record.duration_sec)
        .bind(record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
        .bind(&record.detail)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}

/// Outcome of [`AuditSink::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditWrite {
    /// The record reached the store.
    Persisted,
    /// The store rejected the record; the failure was logged.
    Dropped,
}

/// Shared, cloneable handle that records audit events without failing.
#[derive(Clone)]
pub struct AuditSink {
    store: Arc<dyn AuditStore>,
}

impl fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditSink").finish_non_exhaustive()
    }
}

impl AuditSink {
    /// Wraps any audit store.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Sink writing to the `audit_log` table of `db`.
    #[must_use]
    pub fn sqlite(db: Database) -> Self {
        Self::new(Arc::new(SqliteAuditStore::new(db)))
    }

    /// Appends one record. Failures are logged at error level, never returned.
    pub async fn record(&self, record: AuditRecord) -> AuditWrite {
        match self.store.append(&record).await {
            Ok(()) => {
                debug!(
                    kind = %record.kind,
                    source = %record.source_id,
                    status = %record.status,
                    "audit recorded"
                );
                AuditWrite::Persisted
            }
            Err(e) => {
                error!(
                    kind = %record.kind,
                    source = %record.source_id,
                    status = %record.status,
                    error = %e,
                    "audit write dropped"
                );
                AuditWrite::Dropped
            }
        }
    }
}
