//! OpenAI-compatible chat-completions backend.

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use super::{
    API_KEY_ENV, ExtractionStatus, FieldMap, MetadataError, MetadataExtractor, PromptSet,
    fill_missing_keys, parse_fields,
};
use crate::audit::{AuditRecord, AuditSink};
use crate::download::RateLimiter;

/// Model call parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    /// Model identifier.
    pub name: String,
    /// API base URL, without the trailing `/chat/completions`.
    pub api_base: String,
    /// Response token budget.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "gpt-3.5-turbo".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            max_tokens: 300,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Metadata extractor calling `POST {api_base}/chat/completions`.
///
/// Calls are throttled by the extractor's own sliding-window limiter, and
/// every call writes one `extraction` audit record.
pub struct OpenAiMetadataExtractor {
    client: Client,
    api_key: String,
    settings: ModelSettings,
    rate_limiter: RateLimiter,
    audit: AuditSink,
}

impl fmt::Debug for OpenAiMetadataExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiMetadataExtractor")
            .field("settings", &self.settings)
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

impl OpenAiMetadataExtractor {
    /// Creates an extractor with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        settings: ModelSettings,
        rate_limiter: RateLimiter,
        audit: AuditSink,
    ) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|source| MetadataError::ClientBuild { source })?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            settings,
            rate_limiter,
            audit,
        })
    }

    /// Creates an extractor reading the key from `OPENAI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::MissingCredentials`] when the variable is unset
    /// or empty.
    pub fn from_env(
        settings: ModelSettings,
        rate_limiter: RateLimiter,
        audit: AuditSink,
    ) -> Result<Self, MetadataError> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(MetadataError::MissingCredentials { var: API_KEY_ENV })?;
        Self::new(api_key, settings, rate_limiter, audit)
    }

    /// Returns the model settings.
    #[must_use]
    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    async fn complete(&self, sys_prompt: &str, user_prompt: &str) -> Result<String, MetadataError> {
        self.rate_limiter.acquire().await;

        let body = json!({
            "model": self.settings.name,
            "messages": [
                {"role": "system", "content": sys_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let url = format!("{}/chat/completions", self.settings.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|source| MetadataError::Request { source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MetadataError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ChatResponse = response
            .json()
            .await
            .map_err(|e| MetadataError::UnexpectedResponse(e.to_string()))?;

        let choice = envelope
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| MetadataError::UnexpectedResponse("no choices returned".to_string()))?;

        Ok(choice.message.content.unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl MetadataExtractor for OpenAiMetadataExtractor {
    #[instrument(
        skip(self, text, prompts),
        fields(model = %self.settings.name, chars = text.len())
    )]
    async fn extract(&self, source_id: &str, text: &str, prompts: &PromptSet) -> FieldMap {
        let started = Instant::now();
        let user_prompt = prompts.render_user_prompt(text);

        let (mut fields, status, error_message, raw) =
            match self.complete(&prompts.sys_prompt, &user_prompt).await {
                Ok(raw) => {
                    debug!(response = %raw, "raw model response");
                    match parse_fields(&raw) {
                        Ok(fields) => (fields, ExtractionStatus::Success, None, Some(raw)),
                        Err(e) => {
                            error!(
                                error = %e,
                                response = %raw,
                                "model response is not a JSON object"
                            );
                            (FieldMap::new(), e.status(), Some(e.to_string()), Some(raw))
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "model call failed");
                    (FieldMap::new(), e.status(), Some(e.to_string()), None)
                }
            };
        fill_missing_keys(&mut fields, &prompts.response_keys);

        let duration = started.elapsed();
        info!(status = %status, duration_ms = duration.as_millis(), "metadata extraction finished");
        self.audit
            .record(AuditRecord::extraction(
                source_id,
                status.as_str(),
                error_message,
                duration,
                raw,
            ))
            .await;

        fields
    }
}
