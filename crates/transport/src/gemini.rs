//! Gemini `generateContent` transport
//!
//! POSTs to `{base_url}/v1beta/models/{model}:generateContent` with the API key
//! in the `x-goog-api-key` header. Non-2xx responses become failures carrying
//! the provider's `error.message`; 2xx responses without text become failures
//! carrying a `ResponseSummary` so safety blocks can be told apart from empty
//! replies.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{GenerateRequest, ResponseSummary, Result, Transport, TransportFailure};

/// Generative Language API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const API_KEY_HEADER: &str = "x-goog-api-key";

// --- Wire types (outbound) ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: Vec<ContentOut<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ContentOut<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct ContentOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<PartOut<'a>>,
}

#[derive(Serialize)]
struct PartOut<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// --- Wire types (inbound) ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate, if any.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() { None } else { Some(text) }
    }

    fn summary(&self) -> ResponseSummary {
        ResponseSummary {
            candidate_count: self.candidates.len(),
            finish_reason: self
                .candidates
                .first()
                .and_then(|c| c.finish_reason.clone()),
            block_reason: self
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.clone()),
            has_text: self.text().is_some(),
        }
    }
}

/// Build the provider-facing failure message from an error response body.
///
/// Uses `error.message` plus the status code name when the body is the usual
/// Google error envelope, otherwise the raw body (or the HTTP status line if
/// the body is empty).
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => match envelope.error.status {
            Some(code) => format!("{} ({code})", envelope.error.message),
            None => envelope.error.message,
        },
        _ if body.trim().is_empty() => format!("Gemini API returned {status}"),
        _ => body.trim().to_string(),
    }
}

/// Transport for the Gemini Generative Language API.
pub struct GeminiTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl GeminiTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }

    #[instrument(skip_all, fields(model = %request.model))]
    async fn generate(&self, credential: &str, request: &GenerateRequest) -> Result<String> {
        let body = GenerateContentBody {
            contents: vec![ContentOut {
                role: Some("user"),
                parts: vec![PartOut {
                    text: &request.prompt,
                }],
            }],
            system_instruction: request.system_instruction.as_deref().map(|text| ContentOut {
                role: None,
                parts: vec![PartOut { text }],
            }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
            },
        };

        let key = HeaderValue::from_str(credential)
            .map_err(|_| TransportFailure::new("API key not valid: contains illegal characters"))?;

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .header(API_KEY_HEADER, key)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportFailure::new(format!("request to Gemini API failed: {e}")))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            TransportFailure::new(format!("failed to read Gemini API response: {e}"))
                .with_status(status.as_u16())
        })?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "Gemini API returned error status");
            return Err(TransportFailure::new(error_message(status, &text)).with_status(status.as_u16()));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text).map_err(|e| {
            TransportFailure::new(format!("unexpected response format from Gemini API: {e}"))
                .with_status(status.as_u16())
                .with_response(ResponseSummary::default())
        })?;

        match parsed.text() {
            Some(text) => Ok(text),
            None => Err(TransportFailure::new("Gemini API response contained no text")
                .with_status(status.as_u16())
                .with_response(parsed.summary())),
        }
    }
}

impl Transport for GeminiTransport {
    fn id(&self) -> &str {
        "gemini"
    }

    fn execute<'a>(
        &'a self,
        credential: &'a str,
        request: &'a GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.generate(credential, request))
    }
}
