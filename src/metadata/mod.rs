//! Structured metadata extraction from document text.
//!
//! A [`MetadataExtractor`] turns the text of one artifact into a flat JSON
//! field map. Failures never escape: the caller always gets a map, with every
//! configured response key present (possibly `null`).

mod openai;

use std::fmt;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub use openai::{ModelSettings, OpenAiMetadataExtractor};

/// Environment variable holding the model API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Placeholder in the user prompt template replaced by the document text.
pub const INPUT_TEXT_PLACEHOLDER: &str = "{input_text}";

/// Extracted fields keyed by name.
pub type FieldMap = Map<String, Value>;

/// Prompts and expected keys for one extraction task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    /// System message.
    pub sys_prompt: String,
    /// User message template containing `{input_text}`.
    pub user_prompt_template: String,
    /// Keys guaranteed to be present in every returned map.
    pub response_keys: Vec<String>,
}

impl PromptSet {
    /// Substitutes `text` into the user prompt template.
    #[must_use]
    pub fn render_user_prompt(&self, text: &str) -> String {
        self.user_prompt_template
            .replace(INPUT_TEXT_PLACEHOLDER, text)
    }
}

/// Outcome classification of one extraction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    /// Model answered with a JSON object.
    Success,
    /// The model API could not be reached or returned an error.
    ApiError,
    /// The answer was not a JSON object.
    JsonError,
    /// Anything else, such as a malformed API envelope.
    UnexpectedError,
}

impl ExtractionStatus {
    /// Returns the value stored in the audit log.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ApiError => "api_error",
            Self::JsonError => "json_error",
            Self::UnexpectedError => "unexpected_error",
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata extraction errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The API key is not configured.
    #[error("{var} is not set")]
    MissingCredentials {
        /// Name of the missing environment variable.
        var: &'static str,
    },

    /// Failed to construct the HTTP client.
    #[error("failed to build model HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// Request failed before a response arrived.
    #[error("model API request failed: {source}")]
    Request {
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with an error status.
    #[error("model API error {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The model's answer was not a JSON object.
    #[error("invalid JSON in model response: {message}")]
    Json {
        /// Parser message.
        message: String,
    },

    /// The API envelope did not have the expected shape.
    #[error("unexpected model API response: {0}")]
    UnexpectedResponse(String),
}

impl MetadataError {
    /// Maps the error to the extraction status recorded in the audit log.
    #[must_use]
    pub fn status(&self) -> ExtractionStatus {
        match self {
            Self::Request { .. } | Self::Api { .. } => ExtractionStatus::ApiError,
            Self::Json { .. } => ExtractionStatus::JsonError,
            Self::MissingCredentials { .. }
            | Self::ClientBuild { .. }
            | Self::UnexpectedResponse(_) => ExtractionStatus::UnexpectedError,
        }
    }
}

/// Extracts structured fields from document text.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Returns the field map for `text`; empty apart from `null` response keys
    /// on failure.
    async fn extract(&self, source_id: &str, text: &str, prompts: &PromptSet) -> FieldMap;
}

/// Removes a leading ```` ```json ```` and a trailing ```` ``` ```` fence.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let mut content = raw.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim()
}

/// Parses a model answer into a field map.
///
/// # Errors
///
/// Returns [`MetadataError::Json`] if the answer is not a JSON object.
pub fn parse_fields(raw: &str) -> Result<FieldMap, MetadataError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw)).map_err(|e| {
        MetadataError::Json {
            message: e.to_string(),
        }
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(MetadataError::Json {
            message: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
    }
}

/// Inserts `null` for every key in `keys` missing from `fields`.
pub fn fill_missing_keys(fields: &mut FieldMap, keys: &[String]) {
    for key in keys {
        fields.entry(key.clone()).or_insert(Value::Null);
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
