//! HTTP client wrapper for fetching artifacts.
//!
//! This module provides the `HttpClient` struct, which issues browser-like GET
//! requests and streams bodies to disk under a size ceiling. Status handling is
//! left to the caller; only transport failures become errors here.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_LENGTH, CONTENT_TYPE, REFERER, USER_AGENT};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::error::DownloadError;
use crate::user_agent::{BROWSER_ACCEPT, BROWSER_ACCEPT_LANGUAGE};

/// HTTP client for artifact retrieval with streaming support.
///
/// This client is designed to be created once and shared by every worker,
/// taking advantage of connection pooling.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use harvester_core::download::HttpClient;
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new(Duration::from_secs(30))?;
/// let url = Url::parse("https://example.org/paper.pdf")?;
/// let response = client.get(&url, "Mozilla/5.0").await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client whose requests are bounded by `timeout` end to end.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend cannot be
    /// initialized.
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|source| DownloadError::ClientBuild { source })?;
        Ok(Self { client })
    }

    /// Sends a browser-like GET for `url`.
    ///
    /// The response is returned for every status code. `Referer` is the origin
    /// of `url`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Network`] or [`DownloadError::Timeout`] when no
    /// response arrives.
    #[instrument(level = "debug", skip(self, user_agent), fields(url = %url))]
    pub async fn get(
        &self,
        url: &Url,
        user_agent: &str,
    ) -> Result<reqwest::Response, DownloadError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, BROWSER_ACCEPT)
            .header(ACCEPT_LANGUAGE, BROWSER_ACCEPT_LANGUAGE)
            .header(REFERER, referer_for(url))
            .send()
            .await
            .map_err(|e| DownloadError::network(url.as_str(), e))?;

        debug!(status = response.status().as_u16(), "response received");
        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Returns `scheme://host[:port]` for `url`.
#[must_use]
pub fn referer_for(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Reads the announced body size from the `Content-Length` header.
#[must_use]
pub fn announced_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Returns the `Content-Type` header value, if any.
#[must_use]
pub fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Where a streamed body ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The body now lives at the target path.
    Stored {
        /// Bytes written.
        bytes: u64,
    },
    /// Another writer published the target path first; the body was discarded.
    AlreadyPresent,
}

/// Streams a response body to `path` without ever replacing an existing file.
///
/// The body is written to a private staging file in the same directory and
/// published with a hard link, which fails if `path` already exists. Only the
/// staging file is removed on error, so a file at `path` is always complete and
/// never belongs to a failed writer. `max_bytes` of `None` disables the ceiling.
///
/// # Errors
///
/// - [`DownloadError::TooLarge`] once the body passes `max_bytes`
/// - [`DownloadError::Network`] / [`DownloadError::Timeout`] on a mid-stream read failure
/// - [`DownloadError::Io`] on create/write/flush/publish failure
#[instrument(level = "debug", skip(response), fields(path = %path.display()))]
pub async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    path: &Path,
    max_bytes: Option<u64>,
) -> Result<Placement, DownloadError> {
    let staging = staging_path(path);
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&staging)
        .await
        .map_err(|e| DownloadError::io(&staging, e))?;

    let result = match write_body(file, response, url, &staging, max_bytes).await {
        Ok(bytes) => publish(&staging, path, bytes).await,
        Err(e) => Err(e),
    };

    if let Err(remove_err) = tokio::fs::remove_file(&staging).await {
        warn!(path = %staging.display(), error = %remove_err, "failed to remove staging file");
    }
    result
}

async fn publish(staging: &Path, path: &Path, bytes: u64) -> Result<Placement, DownloadError> {
    match tokio::fs::hard_link(staging, path).await {
        Ok(()) => Ok(Placement::Stored { bytes }),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "artifact published concurrently, discarding body");
            Ok(Placement::AlreadyPresent)
        }
        Err(e) => Err(DownloadError::io(path, e)),
    }
}

/// Hidden sibling of `path` unique to one writer.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tag: u64 = rand::random();
    path.with_file_name(format!(".{name}.{tag:016x}.part"))
}

async fn write_body(
    file: File,
    response: reqwest::Response,
    url: &str,
    path: &Path,
    max_bytes: Option<u64>,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        bytes_written += chunk.len() as u64;
        if let Some(limit) = max_bytes
            && bytes_written > limit
        {
            return Err(DownloadError::too_large(url, bytes_written, limit));
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
    }

    // Ensure all data is flushed to disk
    writer.flush().await.map_err(|e| DownloadError::io(path, e))?;

    Ok(bytes_written)
}
