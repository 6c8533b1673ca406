//! Paper Harvester Core Library
//!
//! This library discovers open-access PDF locators through a paginated works
//! API, retrieves them under a shared request budget, and turns each document
//! into a row of structured metadata.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`collector`] - Paginated discovery of PDF locators
//! - [`download`] - Rate limiting, retry state machine, and streaming retrieval
//! - [`orchestrator`] - Worker pool driving candidates through the pipeline
//! - [`extract`] - PDF text extraction
//! - [`metadata`] - Model-backed metadata extraction
//! - [`store`] - Metadata persistence
//! - [`audit`] - Append-only audit log of retrieval and extraction events
//! - [`db`] - Database connection and schema management
//! - [`config`] - TOML configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod audit;
pub mod collector;
pub mod config;
pub mod db;
pub mod download;
pub mod extract;
pub mod metadata;
pub mod orchestrator;
pub mod progress;
pub mod store;
pub mod user_agent;

// Re-export commonly used types
pub use audit::{AuditKind, AuditRecord, AuditSink, AuditStore, AuditWrite, SqliteAuditStore};
pub use collector::{Candidate, CollectError, UrlCollector};
pub use config::{ConfigError, ConfigOverrides, DEFAULT_CONFIG_FILE, HarvestConfig};
pub use db::{Database, DbError};
pub use download::{
    DEFAULT_MAX_RETRIES, DownloadError, FetchStatus, HttpClient, RateLimiter, RetrievalReport,
    RetrievalState, Retriever, RetryPolicy,
};
pub use extract::{PdfTextExtractor, TextExtractor};
pub use metadata::{
    ExtractionStatus, FieldMap, MetadataError, MetadataExtractor, ModelSettings,
    OpenAiMetadataExtractor, PromptSet,
};
pub use orchestrator::{DEFAULT_CONCURRENCY, Orchestrator, OrchestratorError, RunSummary};
pub use progress::{discovery_spinner, processing_bar};
pub use store::{
    DocumentMetadata, MetadataStore, MetadataWriter, SqliteMetadataStore, StoreError,
};
