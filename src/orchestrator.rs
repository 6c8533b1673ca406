//! Worker pool driving candidates through the harvest pipeline.
//!
//! [`Orchestrator::run`] opens one metadata writer per worker, then spawns a
//! fixed number of tokio tasks that drain a shared candidate queue in
//! submission order. Each candidate goes through retrieval, text extraction,
//! metadata extraction, and a metadata store write.
//!
//! # Failure handling
//!
//! - A candidate that fails at any step is counted and logged; the worker
//!   moves on to the next one.
//! - A panic while processing a candidate is caught and counted.
//! - Failing to open a writer aborts the run before any worker starts.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use indicatif::ProgressBar;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::collector::Candidate;
use crate::download::{FetchStatus, Retriever};
use crate::extract::TextExtractor;
use crate::metadata::{MetadataExtractor, PromptSet};
use crate::store::{DocumentMetadata, MetadataStore, MetadataWriter, StoreError};

/// Minimum allowed worker count.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed worker count.
const MAX_CONCURRENCY: usize = 100;

/// Default worker count.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Field added to every metadata map, holding the artifact path.
pub const PDF_PATH_FIELD: &str = "pdf_path";

/// Orchestrator setup errors. Per-candidate failures never surface here.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Worker count outside the allowed range.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// A worker's metadata writer could not be opened.
    #[error("failed to open metadata writer for worker {worker}: {source}")]
    WriterSetup {
        /// Index of the worker whose writer failed.
        worker: usize,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },
}

/// Counters shared by the workers of one run.
#[derive(Debug, Default)]
struct RunStats {
    succeeded: AtomicUsize,
    retrieval_failed: AtomicUsize,
    downstream_failed: AtomicUsize,
    panicked: AtomicUsize,
}

impl RunStats {
    fn summary(&self, total: usize) -> RunSummary {
        RunSummary {
            total,
            succeeded: self.succeeded.load(Ordering::SeqCst),
            retrieval_failed: self.retrieval_failed.load(Ordering::SeqCst),
            downstream_failed: self.downstream_failed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
        }
    }
}

/// Outcome counts of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Candidates submitted.
    pub total: usize,
    /// Candidates whose metadata was stored.
    pub succeeded: usize,
    /// Candidates with no artifact after retrieval.
    pub retrieval_failed: usize,
    /// Candidates retrieved but not stored.
    pub downstream_failed: usize,
    /// Candidates whose processing panicked.
    pub panicked: usize,
}

impl RunSummary {
    /// Candidates that did not succeed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.retrieval_failed + self.downstream_failed + self.panicked
    }
}

/// Candidates handed out to workers in submission order.
struct CandidateQueue {
    items: Vec<Candidate>,
    cursor: AtomicUsize,
}

impl CandidateQueue {
    fn new(items: Vec<Candidate>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> Option<&Candidate> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i)
    }
}

enum ItemOutcome {
    Stored,
    NotRetrieved(FetchStatus),
    WriteFailed(StoreError),
}

/// Collaborators shared read-only by every worker.
struct Pipeline {
    retriever: Retriever,
    text: Arc<dyn TextExtractor>,
    metadata: Arc<dyn MetadataExtractor>,
    prompts: PromptSet,
    output_dir: PathBuf,
}

impl Pipeline {
    async fn process(&self, candidate: &Candidate, writer: &mut dyn MetadataWriter) -> ItemOutcome {
        let report = self.retriever.retrieve(&candidate.url, &self.output_dir).await;
        let path = match report.path {
            Some(path) if report.status.has_artifact() => path,
            _ => return ItemOutcome::NotRetrieved(report.status),
        };
        let pdf_path = path.display().to_string();

        let text = self.text.extract(&path).await;
        if text.is_empty() {
            debug!(path = %pdf_path, "no text extracted");
        }

        let mut fields = self.metadata.extract(&pdf_path, &text, &self.prompts).await;
        fields.insert(PDF_PATH_FIELD.to_string(), Value::String(pdf_path.clone()));

        let doc = DocumentMetadata::new(&candidate.url, pdf_path, fields);
        match writer.write(&doc).await {
            Ok(()) => ItemOutcome::Stored,
            Err(e) => ItemOutcome::WriteFailed(e),
        }
    }
}

/// Bounded worker pool for one harvest run.
pub struct Orchestrator {
    concurrency: usize,
    pipeline: Arc<Pipeline>,
    store: Arc<dyn MetadataStore>,
    progress: ProgressBar,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("concurrency", &self.concurrency)
            .field("retriever", &self.pipeline.retriever)
            .field("output_dir", &self.pipeline.output_dir)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConcurrency`] if `concurrency` is
    /// outside 1..=100.
    pub fn new(
        concurrency: usize,
        retriever: Retriever,
        text: Arc<dyn TextExtractor>,
        metadata: Arc<dyn MetadataExtractor>,
        store: Arc<dyn MetadataStore>,
        prompts: PromptSet,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self, OrchestratorError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(OrchestratorError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            concurrency,
            pipeline: Arc::new(Pipeline {
                retriever,
                text,
                metadata,
                prompts,
                output_dir: output_dir.into(),
            }),
            store,
            progress: ProgressBar::hidden(),
        })
    }

    /// Reports per-candidate progress on `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Processes every candidate and returns the outcome counts.
    ///
    /// Spawns `min(concurrency, candidates.len())` workers. Returns once every
    /// candidate has reached a terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::WriterSetup`] if a worker's writer cannot
    /// be opened. Writers opened before the failure are released and no
    /// candidate is processed.
    #[instrument(
        skip(self, candidates),
        fields(candidates = candidates.len(), concurrency = self.concurrency)
    )]
    pub async fn run(&self, candidates: Vec<Candidate>) -> Result<RunSummary, OrchestratorError> {
        let total = candidates.len();
        if total == 0 {
            info!("no candidates to process");
            return Ok(RunSummary::default());
        }

        let worker_count = self.concurrency.min(total);
        let mut writers = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let writer = self
                .store
                .open_writer()
                .await
                .map_err(|source| OrchestratorError::WriterSetup { worker, source })?;
            writers.push(writer);
        }
        debug!(workers = worker_count, "worker resources ready");

        let queue = Arc::new(CandidateQueue::new(candidates));
        let stats = Arc::new(RunStats::default());
        let mut workers = JoinSet::new();
        for (worker, writer) in writers.into_iter().enumerate() {
            workers.spawn(run_worker(
                worker,
                Arc::clone(&queue),
                writer,
                Arc::clone(&self.pipeline),
                Arc::clone(&stats),
                self.progress.clone(),
            ));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task aborted");
            }
        }
        self.progress.finish_and_clear();

        let summary = stats.summary(total);
        info!(
            succeeded = summary.succeeded,
            retrieval_failed = summary.retrieval_failed,
            downstream_failed = summary.downstream_failed,
            panicked = summary.panicked,
            total,
            "run complete"
        );
        Ok(summary)
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<CandidateQueue>,
    mut writer: Box<dyn MetadataWriter>,
    pipeline: Arc<Pipeline>,
    stats: Arc<RunStats>,
    progress: ProgressBar,
) {
    debug!(worker, "worker started");
    while let Some(candidate) = queue.next() {
        let outcome = AssertUnwindSafe(pipeline.process(candidate, writer.as_mut()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(ItemOutcome::Stored) => {
                info!(worker, url = %candidate.url, "processed");
                stats.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Ok(ItemOutcome::NotRetrieved(status)) => {
                warn!(worker, url = %candidate.url, status = %status, "failed to retrieve");
                stats.retrieval_failed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(ItemOutcome::WriteFailed(e)) => {
                error!(worker, url = %candidate.url, error = %e, "failed to store metadata");
                stats.downstream_failed.fetch_add(1, Ordering::SeqCst);
            }
            Err(payload) => {
                error!(
                    worker,
                    url = %candidate.url,
                    panic = panic_message(payload.as_ref()),
                    "candidate processing panicked"
                );
                stats.panicked.fetch_add(1, Ordering::SeqCst);
            }
        }
        progress.inc(1);
    }
    debug!(worker, "worker finished");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::download::{HttpClient, RateLimiter, RetryPolicy};
    use crate::metadata::FieldMap;
    use crate::Database;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedText;

    #[async_trait]
    impl TextExtractor for FixedText {
        async fn extract(&self, _path: &Path) -> String {
            "document text".to_string()
        }
    }

    struct TitleExtractor;

    #[async_trait]
    impl MetadataExtractor for TitleExtractor {
        async fn extract(&self, source_id: &str, _text: &str, _prompts: &PromptSet) -> FieldMap {
            assert!(!source_id.contains("boom"), "extractor exploded");
            let mut fields = FieldMap::new();
            fields.insert("title".to_string(), json!("A Title"));
            fields
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        docs: Arc<Mutex<Vec<DocumentMetadata>>>,
        opened: Arc<AtomicUsize>,
        open_limit: Option<usize>,
        fail_writes: bool,
    }

    struct MemoryWriter {
        docs: Arc<Mutex<Vec<DocumentMetadata>>>,
        fail: bool,
    }

    #[async_trait]
    impl MetadataWriter for MemoryWriter {
        async fn write(&mut self, doc: &DocumentMetadata) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            self.docs.lock().unwrap().push(doc.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl MetadataStore for MemoryStore {
        async fn open_writer(&self) -> Result<Box<dyn MetadataWriter>, StoreError> {
            let opened = self.opened.fetch_add(1, Ordering::SeqCst);
            if self.open_limit.is_some_and(|limit| opened >= limit) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            Ok(Box::new(MemoryWriter {
                docs: Arc::clone(&self.docs),
                fail: self.fail_writes,
            }))
        }
    }

    async fn retriever() -> Retriever {
        let db = Database::new_in_memory().await.unwrap();
        Retriever::new(
            HttpClient::new(Duration::from_secs(5)).unwrap(),
            Arc::new(RateLimiter::disabled()),
            RetryPolicy::new(1, Duration::from_millis(1)),
            AuditSink::sqlite(db),
        )
    }

    async fn orchestrator(
        store: Arc<MemoryStore>,
        dir: &TempDir,
        concurrency: usize,
    ) -> Orchestrator {
        Orchestrator::new(
            concurrency,
            retriever().await,
            Arc::new(FixedText),
            Arc::new(TitleExtractor),
            store,
            PromptSet::default(),
            dir.path(),
        )
        .unwrap()
    }

    fn candidates(server: &MockServer, names: &[&str]) -> Vec<Candidate> {
        names
            .iter()
            .map(|name| Candidate {
                url: format!("{}/{name}", server.uri()),
                page: 1,
            })
            .collect()
    }

    // ==================== Construction Tests ====================

    #[tokio::test]
    async fn test_new_rejects_invalid_concurrency() {
        let dir = TempDir::new().unwrap();
        for value in [0, 101] {
            let result = Orchestrator::new(
                value,
                retriever().await,
                Arc::new(FixedText),
                Arc::new(TitleExtractor),
                Arc::new(MemoryStore::default()),
                PromptSet::default(),
                dir.path(),
            );
            assert!(matches!(
                result,
                Err(OrchestratorError::InvalidConcurrency { .. })
            ));
        }
    }

    #[test]
    fn test_candidate_queue_preserves_order() {
        let queue = CandidateQueue::new(vec![
            Candidate { url: "a".to_string(), page: 1 },
            Candidate { url: "b".to_string(), page: 1 },
        ]);
        assert_eq!(queue.next().map(|c| c.url.as_str()), Some("a"));
        assert_eq!(queue.next().map(|c| c.url.as_str()), Some("b"));
        assert!(queue.next().is_none());
    }

    // ==================== Run Tests ====================

    #[tokio::test]
    async fn test_run_stores_metadata_with_pdf_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4".to_vec()))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let orchestrator = orchestrator(Arc::clone(&store), &dir, 2).await;

        let summary = orchestrator
            .run(candidates(&server, &["a.pdf", "b.pdf", "c.pdf"]))
            .await
            .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 3);
        let docs = store.docs.lock().unwrap();
        assert_eq!(docs.len(), 3);
        for doc in docs.iter() {
            assert_eq!(doc.fields.get("title"), Some(&json!("A Title")));
            assert_eq!(
                doc.fields.get(PDF_PATH_FIELD),
                Some(&Value::String(doc.pdf_path.clone()))
            );
        }
    }

    #[tokio::test]
    async fn test_run_counts_retrieval_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());

        let summary = orchestrator(Arc::clone(&store), &dir, 3)
            .await
            .run(candidates(&server, &["ok.pdf", "missing.pdf"]))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.retrieval_failed, 1);
        assert_eq!(summary.failed(), 1);
        // Only two workers are spawned for two candidates.
        assert_eq!(store.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_survives_panicking_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());

        let summary = orchestrator(Arc::clone(&store), &dir, 1)
            .await
            .run(candidates(&server, &["one.pdf", "boom.pdf", "three.pdf"]))
            .await
            .unwrap();

        assert_eq!(summary.panicked, 1);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(store.docs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_counts_write_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        });

        let summary = orchestrator(store, &dir, 2)
            .await
            .run(candidates(&server, &["a.pdf", "b.pdf"]))
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.downstream_failed, 2);
    }

    #[tokio::test]
    async fn test_run_aborts_when_writer_cannot_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
            .expect(0)
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore {
            open_limit: Some(1),
            ..MemoryStore::default()
        });

        let err = orchestrator(Arc::clone(&store), &dir, 3)
            .await
            .run(candidates(&server, &["a.pdf", "b.pdf", "c.pdf"]))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::WriterSetup { worker: 1, .. }));
        assert!(store.docs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_with_no_candidates_opens_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());

        let summary = orchestrator(Arc::clone(&store), &dir, 2)
            .await
            .run(Vec::new())
            .await
            .unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(store.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(payload.as_ref()), "static message");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
