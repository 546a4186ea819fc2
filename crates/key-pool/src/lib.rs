//! Credential pool for outbound LLM requests
//!
//! Holds an optional user-supplied API key and a fixed pool of fallback keys,
//! picks one key per outbound request, tracks which pooled keys are currently
//! quota-exhausted, and retries quota failures with a different key before
//! giving up.
//!
//! Request lifecycle:
//! 1. Caller hands `Executor::execute` an operation and its optional user key
//! 2. `CredentialPool::select` returns the user key, or the next pooled key
//!    that is not marked exhausted
//! 3. The operation runs against a `BoundTransport` for that key
//! 4. Quota failure on a pooled key → key marked exhausted, next attempt
//! 5. Any other failure, or the attempt bound → classified `PoolError`
//! 6. Once every pooled key is exhausted the set is cleared and the current
//!    attempt fails with `AllCredentialsExhausted`

pub mod classify;
pub mod credential;
pub mod error;
pub mod executor;
pub mod pool;

pub use classify::{Operation, classify, classify_kind};
pub use credential::{Credential, CredentialOrigin, KeyRequest, POOL_SENTINEL};
pub use error::{ErrorKind, PoolError, Result};
pub use executor::{BoundTransport, DEFAULT_MAX_RETRIES, Executor};
pub use pool::CredentialPool;
