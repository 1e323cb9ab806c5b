//! Hosted generative model client.
//!
//! `TextCompletion` is the seam between the chat pipeline and the model
//! provider. `GeminiClient` talks to the Google Generative Language REST API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use medai_core::config::ModelConfig;

use crate::error::ChatError;

/// A single-shot text completion backend.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Send `prompt` to the model and return its reply text.
    async fn complete(&self, prompt: &str) -> Result<String, ChatError>;
}

// Request/response bodies for `models/{model}:generateContent`.

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Concatenated text of the first candidate, if it has any.
fn first_candidate_text(response: GenerateResponse) -> Option<String> {
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .concat();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiClient {
    /// Build a client from the `[model]` config section.
    ///
    /// A missing API key is not an error here; every call then fails and the
    /// pipeline falls back to its deny/apology replies.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChatError::LlmError(format!("failed to build HTTP client: {}", e)))?;

        let api_key = config.resolve_api_key();
        if api_key.is_none() {
            tracing::warn!("No model API key configured; chat replies will use fallbacks");
        }

        Ok(Self {
            client,
            endpoint: format!(
                "{}/models/{}:generateContent",
                config.api_base.trim_end_matches('/'),
                config.model
            ),
            api_key,
        })
    }

    /// Full endpoint URL, without the key.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TextCompletion for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, ChatError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ChatError::LlmError("no API key configured".to_string()))?;

        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let res = self
            .client
            .post(&self.endpoint)
            .query(&[("key", key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::LlmError(format!("request failed: {}", e.without_url())))?;

        if !res.status().is_success() {
            let status = res.status();
            let detail = res.text().await.unwrap_or_default();
            return Err(ChatError::LlmError(format!(
                "model API error {}: {}",
                status, detail
            )));
        }

        let parsed: GenerateResponse = res
            .json()
            .await
            .map_err(|e| ChatError::LlmError(format!("response parse failed: {}", e)))?;

        first_candidate_text(parsed)
            .ok_or_else(|| ChatError::LlmError("model returned no candidates".to_string()))
    }
}
