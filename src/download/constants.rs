//! Constants for the download module (timeouts, rate limiting, size limits).

use std::time::Duration;

/// Length of the rate limiter's sliding window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Warning threshold for total time spent waiting on the rate limiter.
pub const CUMULATIVE_WAIT_WARNING_THRESHOLD: Duration = Duration::from_secs(120);

/// Default per-request timeout for artifact fetches (seconds).
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default size ceiling for a single artifact (megabytes).
pub const DEFAULT_MAX_FILE_MB: u64 = 20;

/// Bytes per megabyte for the size ceiling.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Extension every stored artifact carries.
pub const ARTIFACT_EXTENSION: &str = ".pdf";

/// Substring expected in the `Content-Type` of a fetched artifact.
pub const EXPECTED_CONTENT_TYPE: &str = "pdf";
