//! Request execution with credential rotation
//!
//! Runs one logical operation against the transport, selecting a credential
//! per attempt. Quota failures on pooled credentials mark the credential
//! exhausted and retry with the next one, up to `max_retries` attempts. Every
//! other failure, a quota failure on a user key, or the last attempt ends the
//! loop with a classified `PoolError`.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};
use transport::{GenerateRequest, Transport, TransportFailure};

use crate::classify::{Operation, classify};
use crate::credential::Credential;
use crate::error::{ErrorKind, PoolError, Result};
use crate::pool::CredentialPool;

/// Attempts per logical operation unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A transport handle bound to one selected credential.
pub struct BoundTransport {
    transport: Arc<dyn Transport>,
    credential: Credential,
}

impl BoundTransport {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Execute one generation request with the bound credential.
    pub async fn generate(&self, request: &GenerateRequest) -> transport::Result<String> {
        self.transport
            .execute(self.credential.expose(), request)
            .await
    }
}

/// Credential-rotating executor shared by all operations.
pub struct Executor {
    pool: Arc<CredentialPool>,
    transport: Arc<dyn Transport>,
    max_retries: u32,
}

impl Executor {
    pub fn new(pool: Arc<CredentialPool>, transport: Arc<dyn Transport>) -> Self {
        Self {
            pool,
            transport,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the attempt bound. Values below 1 are raised to 1.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `op` with a freshly selected credential per attempt.
    ///
    /// `user_key` follows the selection rules of `CredentialPool::select`.
    /// Selection failures end the loop immediately; they are already classified.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: Operation,
        user_key: Option<&str>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(BoundTransport) -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportFailure>>,
    {
        for attempt in 1..=self.max_retries {
            let credential = self
                .pool
                .select(user_key)
                .map_err(|e| e.with_attempts(attempt))?;

            debug!(
                operation = operation.label(),
                transport = self.transport.id(),
                attempt,
                origin = credential.origin().label(),
                credential = %credential.fingerprint(),
                "dispatching request"
            );

            let bound = BoundTransport {
                transport: self.transport.clone(),
                credential: credential.clone(),
            };

            let failure = match op(bound).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = operation.label(),
                            attempt, "request succeeded after credential rotation"
                        );
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let error = classify(&failure, operation)
                .with_credential(credential.clone())
                .with_attempts(attempt);

            let rotate = error.kind.is_quota()
                && !credential.is_user_supplied()
                && attempt < self.max_retries;

            if !rotate {
                warn!(
                    operation = operation.label(),
                    attempt,
                    kind = %error.kind,
                    status = ?failure.status,
                    credential = %credential.fingerprint(),
                    error = %failure,
                    "request failed"
                );
                return Err(error);
            }

            self.pool.mark_exhausted(&credential);
            metrics::counter!("credential_pool_retries_total").increment(1);
            warn!(
                operation = operation.label(),
                attempt,
                max_retries = self.max_retries,
                credential = %credential.fingerprint(),
                "quota exceeded, retrying with next credential"
            );
        }

        // Unreachable with max_retries >= 1: the last attempt always returns above
        Err(PoolError::new(
            ErrorKind::Unclassified,
            "credential retry loop ended without a result",
        )
        .with_attempts(self.max_retries))
    }
}
