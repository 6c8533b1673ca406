//! TOML configuration for a harvest run.
//!
//! Every field has a default except `prompts.user_prompt_template`. Values are
//! range-checked by [`HarvestConfig::validate`] after CLI overrides are
//! applied.
//!
//! ```toml
//! [retrieval]
//! concurrency = 4
//! max_file_mb = 50
//!
//! [prompts]
//! sys_prompt = "You are a metadata extraction assistant."
//! user_prompt_template = "Return title and doi as JSON for:\n{input_text}"
//! response_keys = ["title", "doi"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::collector::{DEFAULT_DISCOVERY_URL, PAGE_PLACEHOLDER};
use crate::download::RetryPolicy;
use crate::metadata::{INPUT_TEXT_PLACEHOLDER, ModelSettings, PromptSet};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "harvester.toml";

/// Connections kept beyond one per worker, for the audit sink.
const DB_CONNECTION_HEADROOM: u32 = 2;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its allowed range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Description of accepted values.
        expected: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// `[discovery]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Works API URL template containing `{page}`.
    pub api_url: String,
    /// Maximum number of locators to collect.
    pub target_count: usize,
    /// Delay between page requests (milliseconds).
    pub page_delay_ms: u64,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_DISCOVERY_URL.to_string(),
            target_count: 1000,
            page_delay_ms: 200,
            timeout_secs: 30,
        }
    }
}

/// `[retrieval]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Directory artifacts are written to.
    pub output_dir: PathBuf,
    /// Number of workers.
    pub concurrency: usize,
    /// Size ceiling per artifact (megabytes).
    pub max_file_mb: u64,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
    /// Attempts per artifact, including the first.
    pub max_retries: u32,
    /// Backoff base (milliseconds).
    pub retry_delay_ms: u64,
    /// Shared request ceiling per minute. `0` disables throttling.
    pub requests_per_minute: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/raw"),
            concurrency: 2,
            max_file_mb: 20,
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 2000,
            requests_per_minute: 60,
        }
    }
}

impl RetrievalConfig {
    /// Builds the retry policy for these settings.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

/// `[database]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite file path.
    pub path: PathBuf,
    /// Busy timeout (milliseconds).
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/harvest.db"),
            busy_timeout_ms: 5000,
        }
    }
}

/// `[extraction]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractionConfig {
    /// Leading pages converted to text.
    pub max_pages: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { max_pages: 5 }
    }
}

/// `[model]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Model identifier.
    pub name: String,
    /// API base URL.
    pub api_base: String,
    /// Response token budget.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Call ceiling per minute. `0` disables throttling.
    pub requests_per_minute: usize,
    /// Per-request timeout (seconds).
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let settings = ModelSettings::default();
        Self {
            name: settings.name,
            api_base: settings.api_base,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            requests_per_minute: 60,
            timeout_secs: settings.timeout.as_secs(),
        }
    }
}

impl ModelConfig {
    /// Converts to the extractor's call settings.
    #[must_use]
    pub fn settings(&self) -> ModelSettings {
        ModelSettings {
            name: self.name.clone(),
            api_base: self.api_base.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestConfig {
    /// Discovery settings.
    pub discovery: DiscoveryConfig,
    /// Retrieval settings.
    pub retrieval: RetrievalConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Text extraction settings.
    pub extraction: ExtractionConfig,
    /// Model call settings.
    pub model: ModelConfig,
    /// Extraction prompts.
    pub prompts: PromptSet,
}

/// Values supplied on the command line, applied over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Worker count.
    pub concurrency: Option<usize>,
    /// Discovery target.
    pub target_count: Option<usize>,
    /// Attempts per artifact.
    pub max_retries: Option<u32>,
    /// Artifact directory.
    pub output_dir: Option<PathBuf>,
    /// Database file.
    pub db_path: Option<PathBuf>,
}

impl HarvestConfig {
    /// Reads and parses a config file. Does not validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    #[instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("config loaded");
        Ok(config)
    }

    /// Parses TOML text. Does not validate.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or unknown keys.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies command-line overrides.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(concurrency) = overrides.concurrency {
            self.retrieval.concurrency = concurrency;
        }
        if let Some(target_count) = overrides.target_count {
            self.discovery.target_count = target_count;
        }
        if let Some(max_retries) = overrides.max_retries {
            self.retrieval.max_retries = max_retries;
        }
        if let Some(output_dir) = &overrides.output_dir {
            self.retrieval.output_dir.clone_from(output_dir);
        }
        if let Some(db_path) = &overrides.db_path {
            self.database.path.clone_from(db_path);
        }
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.discovery.api_url.contains(PAGE_PLACEHOLDER) {
            return Err(ConfigError::invalid(
                "discovery.api_url",
                &self.discovery.api_url,
                "a URL containing {page}",
            ));
        }
        validate_timeout_secs("discovery.timeout_secs", self.discovery.timeout_secs)?;

        let retrieval = &self.retrieval;
        if !(1..=100).contains(&retrieval.concurrency) {
            return Err(ConfigError::invalid(
                "retrieval.concurrency",
                retrieval.concurrency,
                "range 1..=100",
            ));
        }
        if !(1..=10).contains(&retrieval.max_retries) {
            return Err(ConfigError::invalid(
                "retrieval.max_retries",
                retrieval.max_retries,
                "range 1..=10",
            ));
        }
        if retrieval.max_file_mb < 1 {
            return Err(ConfigError::invalid(
                "retrieval.max_file_mb",
                retrieval.max_file_mb,
                "at least 1",
            ));
        }
        validate_timeout_secs("retrieval.timeout_secs", retrieval.timeout_secs)?;

        if self.extraction.max_pages < 1 {
            return Err(ConfigError::invalid(
                "extraction.max_pages",
                self.extraction.max_pages,
                "at least 1",
            ));
        }

        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ConfigError::invalid(
                "model.temperature",
                self.model.temperature,
                "range 0.0..=2.0",
            ));
        }
        validate_timeout_secs("model.timeout_secs", self.model.timeout_secs)?;

        let template = &self.prompts.user_prompt_template;
        if template.trim().is_empty() || !template.contains(INPUT_TEXT_PLACEHOLDER) {
            return Err(ConfigError::invalid(
                "prompts.user_prompt_template",
                format!("{template:?}"),
                "a non-empty template containing {input_text}",
            ));
        }

        Ok(())
    }

    /// Pool size: one connection per worker plus headroom.
    #[must_use]
    pub fn db_max_connections(&self) -> u32 {
        u32::try_from(self.retrieval.concurrency)
            .unwrap_or(u32::MAX)
            .saturating_add(DB_CONNECTION_HEADROOM)
    }
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::invalid(field, value, "range 1..=3600"));
    }
    Ok(())
}
