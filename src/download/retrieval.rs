//! Per-locator retrieval driven by the retry state machine.
//!
//! [`Retriever::retrieve`] walks a locator through [`RetrievalState`]s:
//! existence check, rate-limited attempts, backoff, and streaming. Whatever
//! the outcome, exactly one download audit record is written per call.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::{HttpClient, Placement, announced_length, content_type, stream_to_file};
use super::constants::{BYTES_PER_MB, DEFAULT_MAX_FILE_MB, EXPECTED_CONTENT_TYPE};
use super::error::DownloadError;
use super::filename::artifact_path;
use super::rate_limiter::RateLimiter;
use super::retry::{AttemptObservation, FetchStatus, RetrievalState, RetryPolicy};
use crate::audit::{AuditRecord, AuditSink, AuditWrite};
use crate::user_agent::random_browser_user_agent;

/// One fetch try inside a retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalAttempt {
    /// 1-indexed attempt number.
    pub attempt: u32,
    /// Time from sending the request to judging (or storing) the response.
    pub elapsed: Duration,
    /// Classification of this attempt.
    pub status: FetchStatus,
    /// Cause, for failed attempts.
    pub message: Option<String>,
    /// Backoff applied after this attempt, if it was retried.
    pub backoff: Option<Duration>,
}

/// Result of one [`Retriever::retrieve`] call.
#[derive(Debug, Clone)]
pub struct RetrievalReport {
    /// The locator as submitted.
    pub locator: String,
    /// Stored artifact, set for `success` and `already_exists`.
    pub path: Option<PathBuf>,
    /// Terminal classification.
    pub status: FetchStatus,
    /// Failure cause for non-success outcomes.
    pub error: Option<String>,
    /// Every network attempt made, in order.
    pub attempts: Vec<RetrievalAttempt>,
    /// Wall time of the whole invocation.
    pub duration: Duration,
    /// Whether the audit record reached the store.
    pub audit: AuditWrite,
}

impl RetrievalReport {
    /// Returns true when the artifact is on disk.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.has_artifact()
    }

    /// Backoff delays applied between attempts, in order.
    #[must_use]
    pub fn backoffs(&self) -> Vec<Duration> {
        self.attempts.iter().filter_map(|a| a.backoff).collect()
    }
}

/// Fetches artifacts into a directory with retry, rate limiting, and auditing.
///
/// A single retriever is shared by every worker; the rate limiter inside it is
/// the only state the workers contend on.
#[derive(Debug, Clone)]
pub struct Retriever {
    client: HttpClient,
    rate_limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    max_bytes: Option<u64>,
    audit: AuditSink,
}

impl Retriever {
    /// Creates a retriever with the default size ceiling.
    #[must_use]
    pub fn new(
        client: HttpClient,
        rate_limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        audit: AuditSink,
    ) -> Self {
        debug!(
            max_attempts = policy.max_attempts(),
            backoff_base_ms = policy.backoff_base().as_millis(),
            rate_ceiling = rate_limiter.ceiling(),
            "creating retriever"
        );
        Self {
            client,
            rate_limiter,
            policy,
            max_bytes: Some(DEFAULT_MAX_FILE_MB * BYTES_PER_MB),
            audit,
        }
    }

    /// Sets the size ceiling in megabytes. `0` disables the ceiling.
    #[must_use]
    pub fn with_max_file_mb(mut self, max_file_mb: u64) -> Self {
        self.max_bytes = (max_file_mb > 0).then(|| max_file_mb.saturating_mul(BYTES_PER_MB));
        self
    }

    /// Returns the size ceiling in bytes, if any.
    #[must_use]
    pub fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }

    /// Retrieves `locator` into `dest_dir`.
    ///
    /// Never fails: every outcome is classified in the returned report and in
    /// one download audit record.
    #[instrument(skip(self, dest_dir), fields(url = %locator))]
    pub async fn retrieve(&self, locator: &str, dest_dir: &Path) -> RetrievalReport {
        let started = Instant::now();
        let mut attempts = Vec::new();

        let (status, path, error) = match self.drive(locator, dest_dir, &mut attempts).await {
            (RetrievalState::Success(status), path) => (status, path, None),
            (RetrievalState::TerminalFailure { status, message }, _) => {
                (status, None, Some(message))
            }
            (other, _) => (
                FetchStatus::UnexpectedError,
                None,
                Some(format!("retrieval stopped in non-terminal state {other:?}")),
            ),
        };
        let duration = started.elapsed();

        match (&path, &error) {
            (Some(p), _) => info!(
                status = %status,
                path = %p.display(),
                duration_ms = duration.as_millis(),
                "retrieval finished"
            ),
            (None, Some(e)) => warn!(
                status = %status,
                error = %e,
                attempts = attempts.len(),
                "retrieval failed"
            ),
            (None, None) => {}
        }

        let audit = self
            .audit
            .record(AuditRecord::download(
                locator,
                path.as_ref().map(|p| p.display().to_string()),
                status,
                error.clone(),
                duration,
            ))
            .await;

        RetrievalReport {
            locator: locator.to_string(),
            path,
            status,
            error,
            attempts,
            duration,
            audit,
        }
    }

    async fn drive(
        &self,
        locator: &str,
        dest_dir: &Path,
        attempts: &mut Vec<RetrievalAttempt>,
    ) -> (RetrievalState, Option<PathBuf>) {
        let url = match parse_locator(locator) {
            Ok(url) => url,
            Err(e) => return (terminal(FetchStatus::RequestError, &e), None),
        };
        let path = artifact_path(dest_dir, &url);
        // Chosen once so every attempt presents the same browser.
        let user_agent = random_browser_user_agent();

        let mut state = RetrievalState::Init;
        loop {
            state = match state {
                RetrievalState::Init => self.init(dest_dir, &path).await,
                RetrievalState::Attempt(attempt) => {
                    self.attempt(attempt, &url, &path, user_agent, attempts).await
                }
                RetrievalState::RetryableFailure { attempt, status, delay } => {
                    debug!(attempt, status = %status, delay_ms = delay.as_millis(), "backing off");
                    tokio::time::sleep(delay).await;
                    RetrievalState::Attempt(attempt + 1)
                }
                done @ (RetrievalState::Success(_) | RetrievalState::TerminalFailure { .. }) => {
                    let stored = matches!(done, RetrievalState::Success(_)).then_some(path);
                    return (done, stored);
                }
            };
        }
    }

    async fn init(&self, dest_dir: &Path, path: &Path) -> RetrievalState {
        if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
            return terminal(FetchStatus::UnexpectedError, &DownloadError::io(dest_dir, e));
        }
        match tokio::fs::try_exists(path).await {
            Ok(true) => {
                debug!(path = %path.display(), "artifact already present, skipping");
                RetrievalState::Success(FetchStatus::AlreadyExists)
            }
            Ok(false) => RetrievalState::Attempt(1),
            Err(e) => terminal(FetchStatus::UnexpectedError, &DownloadError::io(path, e)),
        }
    }

    async fn attempt(
        &self,
        attempt: u32,
        url: &Url,
        path: &Path,
        user_agent: &str,
        attempts: &mut Vec<RetrievalAttempt>,
    ) -> RetrievalState {
        self.rate_limiter.acquire().await;
        let started = Instant::now();

        let result = self.client.get(url, user_agent).await;
        let observation = match &result {
            Ok(response) => AttemptObservation::Status(response.status().as_u16()),
            Err(e) => AttemptObservation::Transport(e.to_string()),
        };

        let next = match (self.policy.next_state(attempt, &observation), result) {
            (RetrievalState::Success(_), Ok(response)) => self.store(response, url, path).await,
            (next, _) => next,
        };

        let (status, message, backoff) = match &next {
            RetrievalState::Success(status) => (*status, None, None),
            RetrievalState::RetryableFailure { status, delay, .. } => {
                let message = match &observation {
                    AttemptObservation::Status(code) => format!("HTTP {code}"),
                    AttemptObservation::Transport(e) => e.clone(),
                };
                warn!(
                    attempt,
                    status = %status,
                    delay_ms = delay.as_millis(),
                    cause = %message,
                    "attempt failed, will retry"
                );
                (*status, Some(message), Some(*delay))
            }
            RetrievalState::TerminalFailure { status, message } => {
                (*status, Some(message.clone()), None)
            }
            RetrievalState::Init | RetrievalState::Attempt(_) => {
                (FetchStatus::UnexpectedError, None, None)
            }
        };
        attempts.push(RetrievalAttempt {
            attempt,
            elapsed: started.elapsed(),
            status,
            message,
            backoff,
        });

        next
    }

    async fn store(
        &self,
        response: reqwest::Response,
        url: &Url,
        path: &Path,
    ) -> RetrievalState {
        let content_type = content_type(&response).unwrap_or_default();
        if !content_type.to_lowercase().contains(EXPECTED_CONTENT_TYPE) {
            warn!(content_type = %content_type, "response does not look like a PDF");
        }

        if let (Some(limit), Some(length)) = (self.max_bytes, announced_length(&response))
            && length > limit
        {
            return terminal(
                FetchStatus::FileTooLarge,
                &DownloadError::too_large(url.as_str(), length, limit),
            );
        }

        match stream_to_file(response, url.as_str(), path, self.max_bytes).await {
            Ok(Placement::Stored { bytes }) => {
                debug!(bytes, path = %path.display(), "artifact stored");
                RetrievalState::Success(FetchStatus::Success)
            }
            Ok(Placement::AlreadyPresent) => {
                debug!(path = %path.display(), "artifact stored by another retrieval");
                RetrievalState::Success(FetchStatus::AlreadyExists)
            }
            Err(e) => terminal(stream_failure_status(&e), &e),
        }
    }
}

fn parse_locator(locator: &str) -> Result<Url, DownloadError> {
    match Url::parse(locator) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => Err(DownloadError::invalid_url(locator)),
    }
}

fn stream_failure_status(error: &DownloadError) -> FetchStatus {
    match error {
        DownloadError::TooLarge { .. } => FetchStatus::FileTooLarge,
        DownloadError::Network { .. } | DownloadError::Timeout { .. } => FetchStatus::RequestError,
        _ => FetchStatus::UnexpectedError,
    }
}

fn terminal(status: FetchStatus, error: &DownloadError) -> RetrievalState {
    RetrievalState::TerminalFailure {
        status,
        message: error.to_string(),
    }
}
