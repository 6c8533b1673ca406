//! Error types for the download module.
//!
//! This module defines structured errors for fetch and write operations,
//! carrying the URL or path needed to make log lines and audit rows useful.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while retrieving an artifact.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, reset, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP status that has no dedicated handling.
    #[error("unexpected HTTP status {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while storing the artifact.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Artifact exceeds the configured size ceiling.
    #[error("file too large: {size_mb:.1}MB > {limit_mb}MB")]
    TooLarge {
        /// The URL of the oversized artifact.
        url: String,
        /// Observed or announced size in megabytes.
        size_mb: f64,
        /// Configured ceiling in megabytes.
        limit_mb: u64,
    },

    /// Failed to construct the HTTP client.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a size-ceiling error from a byte count.
    #[allow(clippy::cast_precision_loss)]
    pub fn too_large(url: impl Into<String>, size_bytes: u64, limit_bytes: u64) -> Self {
        Self::TooLarge {
            url: url.into(),
            size_mb: size_bytes as f64 / super::constants::BYTES_PER_MB as f64,
            limit_mb: limit_bytes / super::constants::BYTES_PER_MB,
        }
    }

    /// Returns true for transport-level failures that may succeed on retry.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

// No blanket `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs
// the URL or path that the source error does not carry.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://example.com/file.pdf");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/file.pdf"));
        assert!(error.is_transport());
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://example.com/file.pdf", 500);
        let msg = error.to_string();
        assert!(msg.contains("unexpected HTTP status 500"), "got: {msg}");
        assert!(!error.is_transport());
    }

    #[test]
    fn test_download_error_too_large_reports_megabytes() {
        let error = DownloadError::too_large(
            "https://example.com/big.pdf",
            25 * 1024 * 1024,
            20 * 1024 * 1024,
        );
        assert_eq!(error.to_string(), "file too large: 25.0MB > 20MB");
    }

    #[test]
    fn test_download_error_io_display() {
        let error = DownloadError::io(
            "/tmp/out.pdf",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = error.to_string();
        assert!(msg.contains("/tmp/out.pdf"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_download_error_invalid_url_display() {
        let error = DownloadError::invalid_url("not a url");
        assert_eq!(error.to_string(), "invalid URL: not a url");
    }
}
