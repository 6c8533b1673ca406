//! Plain-text extraction from downloaded PDFs.
//!
//! Only the first pages are read. Extraction never fails from the caller's
//! point of view: any problem yields an empty string and a warning.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// Default number of leading pages to extract.
pub const DEFAULT_MAX_PAGES: usize = 5;

/// Turns an artifact into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Returns the artifact's text, or an empty string on any failure.
    async fn extract(&self, path: &Path) -> String;
}

/// PDF text extractor backed by `pdf-extract`, run on the blocking pool.
#[derive(Debug, Clone)]
pub struct PdfTextExtractor {
    max_pages: usize,
}

impl Default for PdfTextExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAGES)
    }
}

impl PdfTextExtractor {
    /// Creates an extractor reading at most `max_pages` pages.
    #[must_use]
    pub fn new(max_pages: usize) -> Self {
        Self { max_pages }
    }

    /// Returns the page limit.
    #[must_use]
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn extract(&self, path: &Path) -> String {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to read artifact for text extraction");
                return String::new();
            }
        };

        let max_pages = self.max_pages;
        // pdf-extract is CPU-bound and may panic on malformed input; the
        // blocking task contains both.
        let result = tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes)
        })
        .await;

        match result {
            Ok(Ok(pages)) => {
                let text = join_pages(&pages, max_pages);
                debug!(pages = pages.len(), chars = text.len(), "text extracted");
                text
            }
            Ok(Err(e)) => {
                warn!(error = %e, "PDF text extraction failed");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "PDF text extraction task aborted");
                String::new()
            }
        }
    }
}

/// Joins the first `max_pages` pages with newlines and trims the result.
fn join_pages(pages: &[String], max_pages: usize) -> String {
    pages
        .iter()
        .take(max_pages)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
