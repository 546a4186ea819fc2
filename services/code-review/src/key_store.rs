//! Persisted user API key
//!
//! Holds at most one user-entered API key in memory and mirrors it to a JSON
//! file (`{"api_key": "..."}`) so it survives restarts. Writes go through a
//! temp file + rename with 0600 permissions. A tokio Mutex serializes updates
//! so the file and the in-memory copy never disagree.

use std::path::{Path, PathBuf};

use common::Secret;
use key_pool::{Credential, POOL_SENTINEL};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

#[derive(Serialize, Deserialize)]
struct StoredKey {
    api_key: String,
}

pub struct KeyStore {
    path: PathBuf,
    key: Mutex<Option<Secret<String>>>,
}

impl KeyStore {
    /// Load the stored key, if any. A missing file means no key; a blank
    /// stored value is treated the same way.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let key = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading key file: {e}")))?;
            let stored: StoredKey = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing key file: {e}")))?;
            let secret = Secret::new(stored.api_key.trim().to_string());
            if secret.is_blank() {
                None
            } else {
                info!(path = %path.display(), key = %secret.fingerprint(), "loaded stored API key");
                Some(secret)
            }
        } else {
            debug!(path = %path.display(), "no stored API key");
            None
        };

        Ok(Self {
            path,
            key: Mutex::new(key),
        })
    }

    /// Current key as a user credential, without exposing the raw value.
    pub async fn get(&self) -> Option<Credential> {
        let key = self.key.lock().await;
        key.as_ref().map(|k| Credential::user(k.expose().clone()))
    }

    pub async fn is_configured(&self) -> bool {
        self.key.lock().await.is_some()
    }

    /// Key to hand the executor: the stored key, or the pool sentinel.
    pub async fn effective_key(&self) -> String {
        let key = self.key.lock().await;
        match key.as_ref() {
            Some(k) => k.expose().clone(),
            None => POOL_SENTINEL.to_string(),
        }
    }

    /// Replace the stored key and persist it.
    pub async fn set(&self, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(Error::BlankKey);
        }

        let mut key = self.key.lock().await;
        write_atomic(&self.path, api_key).await?;
        let secret = Secret::new(api_key.to_string());
        info!(key = %secret.fingerprint(), "stored API key updated");
        *key = Some(secret);
        Ok(())
    }

    /// Forget the stored key and remove the file. Returns whether a key was set.
    pub async fn clear(&self) -> Result<bool> {
        let mut key = self.key.lock().await;
        let had_key = key.take().is_some();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Store(format!("removing key file: {e}"))),
        }
        if had_key {
            info!("stored API key cleared, falling back to pool");
        }
        Ok(had_key)
    }
}

/// Write the key file atomically with owner-only permissions.
async fn write_atomic(path: &Path, api_key: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(&StoredKey {
        api_key: api_key.to_string(),
    })
    .map_err(|e| Error::Store(format!("serializing key file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("key file path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "user-key.json".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Store(format!("writing temp key file: {e}")))?;

    if let Err(e) = finish_write(&tmp_path, path).await {
        // The temp file holds the raw key; never leave it behind
        if let Err(remove_err) = tokio::fs::remove_file(&tmp_path).await {
            warn!(path = %tmp_path.display(), error = %remove_err, "failed to remove temp key file");
        }
        return Err(e);
    }

    debug!(path = %path.display(), "persisted API key");
    Ok(())
}

async fn finish_write(tmp_path: &Path, path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(tmp_path, perms)
            .await
            .map_err(|e| Error::Store(format!("setting key file permissions: {e}")))?;
    }

    tokio::fs::rename(tmp_path, path)
        .await
        .map_err(|e| Error::Store(format!("renaming temp key file: {e}")))
}
