//! Credential values and their origin

use common::Secret;

/// Distinguished user-key value meaning "use the credential pool".
pub const POOL_SENTINEL: &str = "USE_SERVER_KEY";

/// Where a credential came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    /// Entered by the user; always preferred, never marked exhausted
    UserSupplied,
    /// Slot `index` of the configured pool
    PoolMember { index: usize },
}

impl CredentialOrigin {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialOrigin::UserSupplied => "user",
            CredentialOrigin::PoolMember { .. } => "pool",
        }
    }
}

/// One concrete API key ready to present to the transport.
#[derive(Debug, Clone)]
pub struct Credential {
    value: Secret<String>,
    origin: CredentialOrigin,
}

impl Credential {
    pub fn user(value: impl Into<String>) -> Self {
        Self {
            value: Secret::new(value.into()),
            origin: CredentialOrigin::UserSupplied,
        }
    }

    pub fn pool_member(value: impl Into<String>, index: usize) -> Self {
        Self {
            value: Secret::new(value.into()),
            origin: CredentialOrigin::PoolMember { index },
        }
    }

    /// Raw key value (use only when handing the key to the transport).
    pub fn expose(&self) -> &str {
        self.value.expose()
    }

    pub fn origin(&self) -> CredentialOrigin {
        self.origin
    }

    pub fn is_user_supplied(&self) -> bool {
        self.origin == CredentialOrigin::UserSupplied
    }

    /// Log-safe identifier.
    pub fn fingerprint(&self) -> String {
        self.value.fingerprint()
    }
}

/// How the caller asked for a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRequest<'a> {
    /// Sentinel, absent or blank
    UsePool,
    /// A concrete user key, verbatim
    User(&'a str),
}

impl<'a> KeyRequest<'a> {
    pub fn parse(user_key: Option<&'a str>) -> Self {
        match user_key {
            Some(key) if key.trim() == POOL_SENTINEL => KeyRequest::UsePool,
            Some(key) if !key.trim().is_empty() => KeyRequest::User(key),
            _ => KeyRequest::UsePool,
        }
    }
}
