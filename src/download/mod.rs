//! Artifact retrieval: rate limiting, retry state machine, and streaming to disk.
//!
//! This module fetches one artifact per locator into an output directory,
//! classifying every outcome with a [`FetchStatus`].
//!
//! # Features
//!
//! - Shared sliding-window [`RateLimiter`] with an injectable [`Clock`]
//! - Pure retry transitions ([`RetryPolicy::judge`], [`RetryPolicy::next_state`])
//! - Deterministic artifact names derived from the locator ([`derive_filename`])
//! - Streaming writes under a size ceiling, with partial files removed on failure
//! - Exactly one audit record per [`Retriever::retrieve`] call
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use harvester_core::Database;
//! use harvester_core::audit::AuditSink;
//! use harvester_core::download::{HttpClient, RateLimiter, Retriever, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new_in_memory().await?;
//! let retriever = Retriever::new(
//!     HttpClient::new(Duration::from_secs(30))?,
//!     Arc::new(RateLimiter::per_minute(60)),
//!     RetryPolicy::default(),
//!     AuditSink::sqlite(db),
//! );
//! let report = retriever
//!     .retrieve("https://example.org/paper.pdf", Path::new("./data/raw"))
//!     .await;
//! println!("{}: {:?}", report.status, report.path);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod filename;
pub mod rate_limiter;
mod retrieval;
mod retry;

pub use client::{HttpClient, Placement, referer_for};
pub use error::DownloadError;
pub use filename::{artifact_path, derive_filename};
pub use rate_limiter::{Clock, ManualClock, RateLimiter, TokioClock};
pub use retrieval::{RetrievalAttempt, RetrievalReport, Retriever};
pub use retry::{
    AttemptObservation, AttemptVerdict, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES, FetchStatus,
    RetrievalState, RetryPolicy,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
