//! Service-specific error types

use axum::http::StatusCode;
use key_pool::{ErrorKind, PoolError};
use thiserror::Error;

/// Per-request failures surfaced by the review API.
///
/// Pool and upstream failures arrive already classified as `PoolError`;
/// the remaining variants are request validation and local key storage.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No code was provided")]
    EmptyCode,

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("API key must not be blank")]
    BlankKey,

    #[error("Key storage failed: {0}")]
    Store(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl Error {
    /// Stable label used as the JSON `type` field and the metrics outcome.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::EmptyCode => "empty_code",
            Error::UnsupportedLanguage(_) => "unsupported_language",
            Error::BlankKey => "blank_key",
            Error::Store(_) => "key_store",
            Error::Pool(e) => e.kind.label(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::EmptyCode | Error::UnsupportedLanguage(_) | Error::BlankKey => {
                StatusCode::BAD_REQUEST
            }
            Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Pool(e) => match e.kind {
                ErrorKind::InvalidCredential | ErrorKind::NoCredentialAvailable => {
                    StatusCode::UNAUTHORIZED
                }
                ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::AllCredentialsExhausted => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::SafetyBlocked => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::EmptyResponse | ErrorKind::Unclassified => StatusCode::BAD_GATEWAY,
            },
        }
    }

    /// Whether the client should prompt the user for a different API key.
    pub fn prompts_for_credential(&self) -> bool {
        match self {
            Error::Pool(e) => e.kind.prompts_for_credential(),
            _ => false,
        }
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
