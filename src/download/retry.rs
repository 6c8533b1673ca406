//! Retry state machine for a single artifact retrieval.
//!
//! A retrieval moves through [`RetrievalState`]s. The decision made after each
//! attempt is the pure function [`RetryPolicy::judge`], which maps
//! `(policy, attempt, observation)` to an [`AttemptVerdict`]. The retriever owns
//! all I/O; this module owns none.
//!
//! # Status Classification
//!
//! | Observation | Verdict | Delay before next attempt |
//! |-------------|---------|---------------------------|
//! | 2xx | Proceed to streaming | - |
//! | 403 | Retry, then `access_forbidden` | `base * attempt` |
//! | 404 | Terminal `not_found` | - |
//! | 429 | Retry, then `rate_limited` | `base * attempt * 2` |
//! | other status | Terminal `request_error` | - |
//! | transport error | Retry, then `request_error` | `base * attempt` |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::download::{AttemptObservation, AttemptVerdict, FetchStatus, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(2));
//! match policy.judge(1, &AttemptObservation::Status(429)) {
//!     AttemptVerdict::Retry { status, delay } => {
//!         assert_eq!(status, FetchStatus::RateLimited);
//!         assert_eq!(delay, Duration::from_secs(4));
//!     }
//!     other => panic!("unexpected verdict: {other:?}"),
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

/// Default maximum attempts per retrieval (including the first).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff base.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Terminal classification of one retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStatus {
    /// Artifact downloaded and stored.
    Success,
    /// Artifact was already on disk; no request was made.
    AlreadyExists,
    /// Server kept answering 403.
    AccessForbidden,
    /// Server answered 404.
    NotFound,
    /// Server kept answering 429.
    RateLimited,
    /// Artifact exceeds the size ceiling.
    FileTooLarge,
    /// Transport failure, unhandled status, or malformed locator.
    RequestError,
    /// Local failure such as a write error.
    UnexpectedError,
}

impl FetchStatus {
    /// Returns the stable string stored in the audit log.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::AlreadyExists => "already_exists",
            Self::AccessForbidden => "access_forbidden",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::FileTooLarge => "file_too_large",
            Self::RequestError => "request_error",
            Self::UnexpectedError => "unexpected_error",
        }
    }

    /// Returns true when the artifact is available on disk afterwards.
    #[must_use]
    pub fn has_artifact(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadyExists)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "already_exists" => Ok(Self::AlreadyExists),
            "access_forbidden" => Ok(Self::AccessForbidden),
            "not_found" => Ok(Self::NotFound),
            "rate_limited" => Ok(Self::RateLimited),
            "file_too_large" => Ok(Self::FileTooLarge),
            "request_error" => Ok(Self::RequestError),
            "unexpected_error" => Ok(Self::UnexpectedError),
            other => Err(format!("unknown fetch status: {other}")),
        }
    }
}

/// What one attempt observed before any body was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptObservation {
    /// The server answered with this status code.
    Status(u16),
    /// The request failed before a status arrived.
    Transport(String),
}

/// Decision taken after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptVerdict {
    /// Status is 2xx; stream the body.
    Proceed,
    /// Wait `delay`, then attempt again.
    Retry {
        /// Classification of the failed attempt.
        status: FetchStatus,
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Stop with this outcome.
    Terminal {
        /// Final classification.
        status: FetchStatus,
        /// Human-readable cause for the audit record.
        message: String,
    },
}

/// States a retrieval passes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalState {
    /// Filename derived, existence not yet checked.
    Init,
    /// About to issue attempt `n` (1-indexed).
    Attempt(u32),
    /// Attempt `attempt` failed in a retryable way.
    RetryableFailure {
        /// The attempt that failed.
        attempt: u32,
        /// Classification of the failure.
        status: FetchStatus,
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Artifact available (`success` or `already_exists`).
    Success(FetchStatus),
    /// Retrieval gave up.
    TerminalFailure {
        /// Final classification.
        status: FetchStatus,
        /// Human-readable cause.
        message: String,
    },
}

impl RetrievalState {
    /// Returns true for `Success` and `TerminalFailure`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::TerminalFailure { .. })
    }
}

/// Attempt budget and backoff base for a retrieval.
///
/// Delays grow linearly with the attempt number and carry no jitter, so the
/// delays within one retrieval strictly increase for a given failure kind.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Base unit of every backoff delay.
    backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff base.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Judges the observation from attempt `attempt` (1-indexed).
    #[must_use]
    pub fn judge(&self, attempt: u32, observation: &AttemptObservation) -> AttemptVerdict {
        let verdict = match observation {
            AttemptObservation::Status(code) if (200..300).contains(code) => {
                AttemptVerdict::Proceed
            }
            AttemptObservation::Status(403) => self.retry_or_give_up(
                attempt,
                FetchStatus::AccessForbidden,
                self.backoff_base.saturating_mul(attempt),
                "HTTP 403 Forbidden",
            ),
            AttemptObservation::Status(404) => AttemptVerdict::Terminal {
                status: FetchStatus::NotFound,
                message: "HTTP 404 Not Found".to_string(),
            },
            AttemptObservation::Status(429) => self.retry_or_give_up(
                attempt,
                FetchStatus::RateLimited,
                self.backoff_base.saturating_mul(attempt.saturating_mul(2)),
                "HTTP 429 Too Many Requests",
            ),
            AttemptObservation::Status(code) => AttemptVerdict::Terminal {
                status: FetchStatus::RequestError,
                message: format!("unexpected HTTP status {code}"),
            },
            AttemptObservation::Transport(message) => self.retry_or_give_up(
                attempt,
                FetchStatus::RequestError,
                self.backoff_base.saturating_mul(attempt),
                message,
            ),
        };

        debug!(attempt, max = self.max_attempts, ?verdict, "attempt judged");
        verdict
    }

    /// Maps the observation from attempt `attempt` to the next state.
    ///
    /// `Proceed` maps to `Success(FetchStatus::Success)`; the retriever turns
    /// that into a terminal failure if streaming then fails.
    #[must_use]
    pub fn next_state(&self, attempt: u32, observation: &AttemptObservation) -> RetrievalState {
        match self.judge(attempt, observation) {
            AttemptVerdict::Proceed => RetrievalState::Success(FetchStatus::Success),
            AttemptVerdict::Retry { status, delay } => RetrievalState::RetryableFailure {
                attempt,
                status,
                delay,
            },
            AttemptVerdict::Terminal { status, message } => {
                RetrievalState::TerminalFailure { status, message }
            }
        }
    }

    fn retry_or_give_up(
        &self,
        attempt: u32,
        status: FetchStatus,
        delay: Duration,
        cause: &str,
    ) -> AttemptVerdict {
        if attempt >= self.max_attempts {
            AttemptVerdict::Terminal {
                status,
                message: format!("{cause} (after {attempt} attempts)"),
            }
        } else {
            AttemptVerdict::Retry { status, delay }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(2))
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff_base(), Duration::from_secs(2));
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
    }

    // ==================== Judge Tests ====================

    #[test]
    fn test_judge_2xx_proceeds() {
        assert_eq!(policy().judge(1, &AttemptObservation::Status(200)), AttemptVerdict::Proceed);
        assert_eq!(policy().judge(2, &AttemptObservation::Status(206)), AttemptVerdict::Proceed);
    }

    #[test]
    fn test_judge_403_retries_with_linear_delay() {
        let verdict = policy().judge(2, &AttemptObservation::Status(403));
        assert_eq!(
            verdict,
            AttemptVerdict::Retry {
                status: FetchStatus::AccessForbidden,
                delay: Duration::from_secs(4),
            }
        );
    }

    #[test]
    fn test_judge_403_exhausted_is_terminal() {
        let verdict = policy().judge(3, &AttemptObservation::Status(403));
        assert!(matches!(
            verdict,
            AttemptVerdict::Terminal { status: FetchStatus::AccessForbidden, .. }
        ));
    }

    #[test]
    fn test_judge_404_terminal_on_first_attempt() {
        let verdict = policy().judge(1, &AttemptObservation::Status(404));
        assert!(matches!(
            verdict,
            AttemptVerdict::Terminal { status: FetchStatus::NotFound, .. }
        ));
    }

    #[test]
    fn test_judge_429_doubles_delay() {
        let verdict = policy().judge(1, &AttemptObservation::Status(429));
        assert_eq!(
            verdict,
            AttemptVerdict::Retry {
                status: FetchStatus::RateLimited,
                delay: Duration::from_secs(4),
            }
        );
    }

    #[test]
    fn test_judge_429_delays_strictly_increase() {
        let policy = RetryPolicy::new(6, Duration::from_millis(10));
        let delays: Vec<Duration> = (1..6)
            .map(|attempt| match policy.judge(attempt, &AttemptObservation::Status(429)) {
                AttemptVerdict::Retry { delay, .. } => delay,
                other => panic!("expected retry, got {other:?}"),
            })
            .collect();
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]), "{delays:?}");
    }

    #[test]
    fn test_judge_other_status_is_request_error() {
        let verdict = policy().judge(1, &AttemptObservation::Status(500));
        assert_eq!(
            verdict,
            AttemptVerdict::Terminal {
                status: FetchStatus::RequestError,
                message: "unexpected HTTP status 500".to_string(),
            }
        );
    }

    #[test]
    fn test_judge_transport_retries_then_request_error() {
        let obs = AttemptObservation::Transport("connection refused".to_string());
        assert!(matches!(policy().judge(1, &obs), AttemptVerdict::Retry { .. }));

        match policy().judge(3, &obs) {
            AttemptVerdict::Terminal { status, message } => {
                assert_eq!(status, FetchStatus::RequestError);
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    // ==================== State Transition Tests ====================

    #[test]
    fn test_next_state_retryable_failure_carries_delay() {
        let state = policy().next_state(1, &AttemptObservation::Status(429));
        assert_eq!(
            state,
            RetrievalState::RetryableFailure {
                attempt: 1,
                status: FetchStatus::RateLimited,
                delay: Duration::from_secs(4),
            }
        );
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_next_state_success_is_terminal() {
        let state = policy().next_state(2, &AttemptObservation::Status(200));
        assert_eq!(state, RetrievalState::Success(FetchStatus::Success));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_next_state_not_found_is_terminal_failure() {
        let state = policy().next_state(1, &AttemptObservation::Status(404));
        assert!(matches!(
            state,
            RetrievalState::TerminalFailure { status: FetchStatus::NotFound, .. }
        ));
        assert!(state.is_terminal());
    }

    // ==================== FetchStatus Tests ====================

    #[test]
    fn test_fetch_status_string_forms_parse_back() {
        for status in [
            FetchStatus::Success,
            FetchStatus::AlreadyExists,
            FetchStatus::AccessForbidden,
            FetchStatus::NotFound,
            FetchStatus::RateLimited,
            FetchStatus::FileTooLarge,
            FetchStatus::RequestError,
            FetchStatus::UnexpectedError,
        ] {
            assert_eq!(status.as_str().parse::<FetchStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<FetchStatus>().is_err());
    }

    #[test]
    fn test_fetch_status_has_artifact() {
        assert!(FetchStatus::Success.has_artifact());
        assert!(FetchStatus::AlreadyExists.has_artifact());
        assert!(!FetchStatus::NotFound.has_artifact());
    }
}
