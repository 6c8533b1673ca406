//! Discovery of artifact locators from a paginated works API.
//!
//! The collector walks pages `1, 2, …` of an OpenAlex-style `works` endpoint,
//! reading `best_oa_location.pdf_url` from every result. It stops once the
//! target count is reached or a page contributes no new locator.

use std::collections::HashSet;
use std::time::Duration;

use indicatif::ProgressBar;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::user_agent::discovery_user_agent;

/// Placeholder replaced by the 1-indexed page number.
pub const PAGE_PLACEHOLDER: &str = "{page}";

/// Default discovery endpoint: open-access journal works with a PubMed id.
pub const DEFAULT_DISCOVERY_URL: &str = "https://api.openalex.org/works?filter=concept.id:C121332964,has_pmid:true,primary_location.source.type:journal,publication_year:2022-2025&per_page=200&page={page}";

/// Default delay between page requests.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(200);

/// Default discovery request timeout.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// A locator found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    /// Artifact URL.
    pub url: String,
    /// 1-indexed page the locator was found on.
    pub page: u32,
}

/// Discovery errors. Any of them aborts collection.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Template lacks the page placeholder.
    #[error("discovery URL template must contain {PAGE_PLACEHOLDER}: {template}")]
    InvalidTemplate {
        /// The offending template.
        template: String,
    },

    /// Request failed before a response arrived.
    #[error("discovery request failed for {url}: {source}")]
    Request {
        /// Page URL.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status.
    #[error("discovery request for {url} returned HTTP {status}")]
    Status {
        /// Page URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Body was not a valid works page.
    #[error("failed to decode discovery page {url}: {source}")]
    Decode {
        /// Page URL.
        url: String,
        /// The underlying decode error.
        #[source]
        source: reqwest::Error,
    },

    /// Failed to construct the HTTP client.
    #[error("failed to build discovery HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Debug, Deserialize)]
struct WorksPage {
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    #[serde(default)]
    best_oa_location: Option<Location>,
}

#[derive(Debug, Deserialize)]
struct Location {
    #[serde(default)]
    pdf_url: Option<String>,
}

/// Paginating locator collector.
#[derive(Debug, Clone)]
pub struct UrlCollector {
    client: Client,
    page_delay: Duration,
    progress: ProgressBar,
}

impl UrlCollector {
    /// Creates a collector identifying itself with the tool's User-Agent.
    ///
    /// # Errors
    ///
    /// Returns [`CollectError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration, page_delay: Duration) -> Result<Self, CollectError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(discovery_user_agent())
            .build()
            .map_err(|source| CollectError::ClientBuild { source })?;
        Ok(Self {
            client,
            page_delay,
            progress: ProgressBar::hidden(),
        })
    }

    /// Reports discovered locators on `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Collects up to `target_count` unique locators in discovery order.
    ///
    /// # Errors
    ///
    /// Returns the first [`CollectError`] encountered; no page is retried.
    #[instrument(skip(self, template))]
    pub async fn collect(
        &self,
        template: &str,
        target_count: usize,
    ) -> Result<Vec<Candidate>, CollectError> {
        if !template.contains(PAGE_PLACEHOLDER) {
            return Err(CollectError::InvalidTemplate {
                template: template.to_string(),
            });
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates = Vec::new();
        let mut page: u32 = 1;
        let mut fetched: u32 = 0;

        while candidates.len() < target_count {
            if page > 1 {
                tokio::time::sleep(self.page_delay).await;
            }

            let url = template.replace(PAGE_PLACEHOLDER, &page.to_string());
            let works = self.fetch_page(&url).await?;
            fetched += 1;

            let mut fresh = 0usize;
            for pdf_url in works
                .results
                .into_iter()
                .filter_map(|work| work.best_oa_location.and_then(|loc| loc.pdf_url))
                .filter(|u| !u.trim().is_empty())
            {
                if candidates.len() >= target_count {
                    break;
                }
                if seen.insert(pdf_url.clone()) {
                    candidates.push(Candidate { url: pdf_url, page });
                    fresh += 1;
                }
            }

            debug!(page, fresh, total = candidates.len(), "discovery page processed");
            self.progress.inc(fresh as u64);
            self.progress.set_message(format!("page {page}"));

            if fresh == 0 {
                debug!(page, "page yielded no new locators, stopping");
                break;
            }
            page += 1;
        }

        self.progress.finish_and_clear();
        info!(collected = candidates.len(), pages = fetched, "discovery complete");
        Ok(candidates)
    }

    async fn fetch_page(&self, url: &str) -> Result<WorksPage, CollectError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| CollectError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<WorksPage>()
            .await
            .map_err(|source| CollectError::Decode {
                url: url.to_string(),
                source,
            })
    }
}
