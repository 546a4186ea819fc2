//! Outbound LLM transport abstraction
//!
//! Defines the `Transport` trait that decouples the credential pool from the
//! provider wire format. A transport takes one concrete credential and one
//! generation request and either returns the model's text or a
//! `TransportFailure` describing what went wrong. `GeminiTransport` is the
//! production implementation against the Generative Language REST API.

pub mod gemini;

pub use gemini::GeminiTransport;

use std::future::Future;
use std::pin::Pin;

/// A single text-generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    /// Model identifier, e.g. "gemini-2.5-flash"
    pub model: String,
    /// User prompt body
    pub prompt: String,
    /// Optional system instruction
    pub system_instruction: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system_instruction: None,
            temperature: None,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Structured fields of a provider response that produced no usable text.
///
/// Attached to a failure so the classifier can tell a safety block apart
/// from an empty reply without parsing messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseSummary {
    pub candidate_count: usize,
    /// Finish reason of the first candidate (e.g. "STOP", "SAFETY")
    pub finish_reason: Option<String>,
    /// Prompt-level block reason (e.g. "SAFETY")
    pub block_reason: Option<String>,
    pub has_text: bool,
}

/// A failed transport call in the provider's own vocabulary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub message: String,
    /// HTTP status, if the provider answered at all
    pub status: Option<u16>,
    pub response: Option<ResponseSummary>,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            response: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_response(mut self, response: ResponseSummary) -> Self {
        self.response = Some(response);
        self
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportFailure>;

/// Capability to execute one generation request with one credential.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
/// Implementations must not retry on their own; rotation and retry belong to
/// the caller, which needs to see every failure.
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Execute `request` authenticated with `credential` and return the text payload.
    fn execute<'a>(
        &'a self,
        credential: &'a str,
        request: &'a GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}
