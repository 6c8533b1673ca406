//! Persistence of extracted document metadata.
//!
//! Each worker owns one [`MetadataWriter`]. The SQLite writer pins a pooled
//! connection for its lifetime and returns it to the pool when dropped.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Sqlite;
use sqlx::pool::PoolConnection;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::Database;
use crate::metadata::FieldMap;

/// One row of the metadata store.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMetadata {
    /// Locator the artifact was retrieved from.
    pub source_url: String,
    /// Local artifact path.
    pub pdf_path: String,
    /// Extracted fields, including `pdf_path`.
    pub fields: FieldMap,
    /// When the row was produced.
    pub created_at: DateTime<Utc>,
}

impl DocumentMetadata {
    /// Builds a row stamped with the current time.
    #[must_use]
    pub fn new(
        source_url: impl Into<String>,
        pdf_path: impl Into<String>,
        fields: FieldMap,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            pdf_path: pdf_path.into(),
            fields,
            created_at: Utc::now(),
        }
    }
}

/// Metadata store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("metadata store database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Field map could not be serialized or deserialized.
    #[error("metadata fields are not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-worker handle writing metadata rows.
#[async_trait]
pub trait MetadataWriter: Send {
    /// Persists one document.
    async fn write(&mut self, doc: &DocumentMetadata) -> Result<(), StoreError>;
}

/// Factory for per-worker writers.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Opens a writer holding its own resources until dropped.
    async fn open_writer(&self) -> Result<Box<dyn MetadataWriter>, StoreError>;
}

/// SQLite-backed store writing to `document_metadata`.
#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    db: Database,
}

impl SqliteMetadataStore {
    /// Creates a store on an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Lists stored documents in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` when the query fails, or
    /// `StoreError::Serialization` when a stored field map is not valid JSON.
    pub async fn list_documents(&self) -> Result<Vec<DocumentMetadata>, StoreError> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT source_url, pdf_path, fields, created_at FROM document_metadata ORDER BY id",
        )
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter()
            .map(|(source_url, pdf_path, fields, created_at)| {
                Ok(DocumentMetadata {
                    source_url,
                    pdf_path,
                    fields: serde_json::from_str(&fields)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_default(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    #[instrument(skip(self))]
    async fn open_writer(&self) -> Result<Box<dyn MetadataWriter>, StoreError> {
        let conn = self.db.pool().acquire().await?;
        debug!("metadata writer opened");
        Ok(Box::new(SqliteMetadataWriter { conn }))
    }
}

struct SqliteMetadataWriter {
    conn: PoolConnection<Sqlite>,
}

#[async_trait]
impl MetadataWriter for SqliteMetadataWriter {
    #[instrument(skip(self, doc), fields(source = %doc.source_url))]
    async fn write(&mut self, doc: &DocumentMetadata) -> Result<(), StoreError> {
        let fields = serde_json::to_string(&doc.fields)?;
        sqlx::query(
            "INSERT INTO document_metadata (source_url, pdf_path, fields, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&doc.source_url)
        .bind(&doc.pdf_path)
        .bind(fields)
        .bind(doc.created_at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn fields() -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("title".to_string(), json!("Paper"));
        map.insert("pdf_path".to_string(), json!("data/raw/p.pdf"));
        map
    }

    #[tokio::test]
    async fn test_writer_persists_document() {
        let db = Database::new_in_memory().await.unwrap();
        let store = SqliteMetadataStore::new(db);

        {
            let mut writer = store.open_writer().await.unwrap();
            writer
                .write(&DocumentMetadata::new("https://x.org/p.pdf", "data/raw/p.pdf", fields()))
                .await
                .unwrap();
        }

        let docs = store.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_url, "https://x.org/p.pdf");
        assert_eq!(docs[0].fields.get("title"), Some(&json!("Paper")));
    }

    #[tokio::test]
    async fn test_writer_returns_connection_on_drop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = Database::new(&temp_dir.path().join("m.db"), 1, Duration::from_secs(1))
            .await
            .unwrap();
        let store = SqliteMetadataStore::new(db.clone());

        let writer = store.open_writer().await.unwrap();
        assert_eq!(db.pool().num_idle(), 0);
        drop(writer);

        // The single connection is available again.
        let again = store.open_writer().await;
        assert!(again.is_ok());
    }
}
