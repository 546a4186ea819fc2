//! Transport failure classification
//!
//! Maps a raw `TransportFailure` onto the fixed `ErrorKind` taxonomy with a
//! user-facing message. Matching is keyword-based on the provider message,
//! plus the structured response summary when the provider answered without
//! text. This is the only place that knows the provider's error vocabulary.

use transport::TransportFailure;

use crate::error::{ErrorKind, PoolError};

/// Provider phrases meaning the key itself was rejected.
const INVALID_KEY_PATTERNS: &[&str] = &["api key not valid", "api_key_invalid"];

/// Provider phrases meaning a rate or usage limit was hit.
const QUOTA_PATTERNS: &[&str] = &["quota", "resource_exhausted", "rate limit"];

const SAFETY_REASON: &str = "SAFETY";

/// Which user operation a request belongs to; shapes the messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Review,
    Optimization,
}

impl Operation {
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Review => "review",
            Operation::Optimization => "optimization",
        }
    }

    fn task(&self) -> &'static str {
        match self {
            Operation::Review => "the code review",
            Operation::Optimization => "the code optimization",
        }
    }
}

/// Pick the category for a failure without building a message.
///
/// Invalid-key phrases are checked before quota phrases, so a message can
/// never be both.
pub fn classify_kind(failure: &TransportFailure) -> ErrorKind {
    let lower = failure.message.to_lowercase();

    if INVALID_KEY_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorKind::InvalidCredential;
    }
    if QUOTA_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorKind::QuotaExceeded;
    }

    if let Some(summary) = &failure.response {
        let blocked = [&summary.finish_reason, &summary.block_reason]
            .into_iter()
            .flatten()
            .any(|reason| reason.eq_ignore_ascii_case(SAFETY_REASON));
        if blocked {
            return ErrorKind::SafetyBlocked;
        }
        if summary.candidate_count == 0 && !summary.has_text {
            return ErrorKind::EmptyResponse;
        }
    }

    ErrorKind::Unclassified
}

/// Classify a transport failure into a user-facing `PoolError`.
pub fn classify(failure: &TransportFailure, operation: Operation) -> PoolError {
    let kind = classify_kind(failure);
    let message = match kind {
        ErrorKind::InvalidCredential => {
            "The Gemini API key is invalid or missing. Check the key you supplied or the configured key pool.".to_string()
        }
        ErrorKind::QuotaExceeded => {
            "The Gemini API quota has been exceeded. Check your quota or try again later.".to_string()
        }
        ErrorKind::SafetyBlocked => format!(
            "Could not complete {} because the AI flagged it for safety reasons. Please modify the input code.",
            operation.task()
        ),
        ErrorKind::EmptyResponse => format!(
            "The AI returned no response for {}. This may be caused by the input or a temporary issue. Please try again.",
            operation.task()
        ),
        _ if failure.message.trim().is_empty() => format!(
            "An unknown error occurred while requesting {} from the Gemini API.",
            operation.task()
        ),
        _ => failure.message.clone(),
    };
    PoolError::new(kind, message)
}
