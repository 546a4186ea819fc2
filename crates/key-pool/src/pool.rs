//! Credential pool with rotation cursor and exhausted-set tracking
//!
//! The pool holds an ordered, read-only list of fallback API keys plus two
//! pieces of mutable state: the rotation cursor (next index to offer) and the
//! set of key values believed to be quota-exhausted. Both live behind one
//! mutex so concurrent requests cannot lose cursor updates or observe a
//! half-cleared set. The lock is only held for synchronous bookkeeping, never
//! across a transport call.
//!
//! Selection rules:
//! 1. A concrete user key always wins and is returned verbatim
//! 2. Empty pool (and no user key) → `NoCredentialAvailable`
//! 3. Exhausted set as large as the pool → clear it, fail this attempt with
//!    `AllCredentialsExhausted`
//! 4. Otherwise scan forward from the cursor for the first non-exhausted key
//! 5. The cursor advances by exactly one per pool selection, whichever index
//!    was returned

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use common::Secret;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialOrigin, KeyRequest};
use crate::error::{ErrorKind, PoolError, Result};

const NO_CREDENTIAL_MESSAGE: &str = "No Gemini API key is available. Supply your own API key or configure the key pool.";

const ALL_EXHAUSTED_MESSAGE: &str =
    "All pooled Gemini API keys have exceeded their quota. Try again later or supply your own API key.";

/// Mutable rotation bookkeeping.
#[derive(Debug, Default)]
struct RotationState {
    cursor: usize,
    exhausted: HashSet<String>,
}

/// Ordered pool of fallback credentials.
///
/// Construct once at startup and share via `Arc`. Members are distinct slots
/// by position even when two hold the same value; exhaustion is tracked by
/// value.
pub struct CredentialPool {
    members: Vec<Secret<String>>,
    state: Mutex<RotationState>,
}

impl CredentialPool {
    /// Create a pool from configured keys. Blank entries are dropped.
    pub fn new(keys: Vec<String>) -> Self {
        let total = keys.len();
        let members: Vec<Secret<String>> = keys
            .into_iter()
            .map(Secret::new)
            .filter(|k| !k.is_blank())
            .collect();
        if members.len() < total {
            warn!(
                dropped = total - members.len(),
                "ignoring blank keys in credential pool"
            );
        }
        info!(keys = members.len(), "credential pool initialized");
        Self {
            members,
            state: Mutex::new(RotationState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Pick a credential for one outbound request.
    ///
    /// A concrete user key is returned as-is. The sentinel, an absent key or a
    /// blank key fall through to pool selection.
    pub fn select(&self, user_key: Option<&str>) -> Result<Credential> {
        match KeyRequest::parse(user_key) {
            KeyRequest::User(key) => {
                debug!("using user-supplied credential");
                Ok(Credential::user(key))
            }
            KeyRequest::UsePool => self.select_from_pool(),
        }
    }

    /// Round-robin selection over pool members, skipping exhausted values.
    pub fn select_from_pool(&self) -> Result<Credential> {
        let n = self.members.len();
        if n == 0 {
            return Err(PoolError::new(
                ErrorKind::NoCredentialAvailable,
                NO_CREDENTIAL_MESSAGE,
            ));
        }

        let mut state = self.state();

        if state.exhausted.len() >= n {
            let cleared = state.exhausted.len();
            state.exhausted.clear();
            metrics::counter!("credential_pool_exhausted_resets_total").increment(1);
            warn!(
                cleared,
                "every pooled credential exhausted, resetting exhausted set"
            );
            return Err(PoolError::new(
                ErrorKind::AllCredentialsExhausted,
                ALL_EXHAUSTED_MESSAGE,
            ));
        }

        let start = state.cursor;
        // Falls back to the cursor slot when only duplicate exhausted values remain
        let index = (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&idx| !state.exhausted.contains(self.members[idx].expose()))
            .unwrap_or(start);

        state.cursor = (start + 1) % n;

        let credential = Credential::pool_member(self.members[index].expose().clone(), index);
        debug!(
            index,
            cursor = state.cursor,
            credential = %credential.fingerprint(),
            "selected pooled credential"
        );
        Ok(credential)
    }

    /// Record a quota failure for a pooled credential.
    ///
    /// Returns `true` if the value was newly added. User-supplied credentials
    /// are never recorded.
    pub fn mark_exhausted(&self, credential: &Credential) -> bool {
        let index = match credential.origin() {
            CredentialOrigin::UserSupplied => {
                debug!("not marking user-supplied credential as exhausted");
                return false;
            }
            CredentialOrigin::PoolMember { index } => index,
        };

        let mut state = self.state();
        let added = state.exhausted.insert(credential.expose().to_string());
        if added {
            info!(
                index,
                credential = %credential.fingerprint(),
                exhausted = state.exhausted.len(),
                total = self.members.len(),
                "credential marked exhausted (quota exceeded)"
            );
        }
        added
    }

    /// Current rotation cursor.
    pub fn cursor(&self) -> usize {
        self.state().cursor
    }

    /// Number of distinct values currently marked exhausted.
    pub fn exhausted_count(&self) -> usize {
        self.state().exhausted.len()
    }

    pub fn is_exhausted(&self, value: &str) -> bool {
        self.state().exhausted.contains(value)
    }

    /// Pool counts for the health endpoint. Never includes key values.
    ///
    /// Carries no status of its own; the service derives one from
    /// `keys_available` together with the stored user key.
    pub fn health(&self) -> serde_json::Value {
        let state = self.state();
        let total = self.members.len();
        let available = self
            .members
            .iter()
            .filter(|m| !state.exhausted.contains(m.expose()))
            .count();

        serde_json::json!({
            "keys_total": total,
            "keys_available": available,
            "keys_exhausted": state.exhausted.len(),
            "cursor": state.cursor,
        })
    }

    /// Lock the rotation state, recovering it if a holder panicked.
    fn state(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
