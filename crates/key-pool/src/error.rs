//! Error taxonomy for credential selection and pooled requests

use std::fmt;

use crate::credential::Credential;

/// User-facing failure categories.
///
/// Every failure leaving the pool or the executor is one of these; the
/// transport's own error shape never reaches the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Provider rejected the credential as malformed or unknown
    InvalidCredential,
    /// Provider reported a rate or usage limit
    QuotaExceeded,
    /// Every pool credential is currently marked exhausted
    AllCredentialsExhausted,
    /// No user credential and an empty pool
    NoCredentialAvailable,
    /// Model declined to answer for policy reasons
    SafetyBlocked,
    /// Provider answered without usable text
    EmptyResponse,
    /// Anything else; the provider message is passed through
    Unclassified,
}

impl ErrorKind {
    /// Stable snake_case label for logs, metrics and JSON bodies.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCredential => "invalid_credential",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::AllCredentialsExhausted => "all_credentials_exhausted",
            ErrorKind::NoCredentialAvailable => "no_credential_available",
            ErrorKind::SafetyBlocked => "safety_blocked",
            ErrorKind::EmptyResponse => "empty_response",
            ErrorKind::Unclassified => "unclassified",
        }
    }

    /// Only quota-class failures are retried with another credential.
    pub fn is_quota(&self) -> bool {
        matches!(self, ErrorKind::QuotaExceeded)
    }

    /// Whether the caller should ask the user to supply or change a credential.
    pub fn prompts_for_credential(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidCredential
                | ErrorKind::QuotaExceeded
                | ErrorKind::AllCredentialsExhausted
                | ErrorKind::NoCredentialAvailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified failure with the credential that produced it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct PoolError {
    pub kind: ErrorKind,
    pub message: String,
    /// Credential used for the failing attempt; `None` when selection itself failed
    pub credential_used: Option<Credential>,
    /// Loop iterations performed before giving up (0 outside the executor)
    pub attempts: u32,
}

impl PoolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            credential_used: None,
            attempts: 0,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential_used = Some(credential);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
