//! Durable storage for the current token pair.
//!
//! The pair is atomic: a store either holds both tokens or nothing. Only
//! [`AuthSession`](crate::session::AuthSession) writes to a store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hamro_core::identity::TokenPair;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("credential file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential file at {path} is malformed: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The stored pair, or `None` when nothing (or only half a pair) is stored.
    async fn load(&self) -> Result<Option<TokenPair>, CredentialStoreError>;

    /// Replace the stored pair.
    async fn save(&self, tokens: &TokenPair) -> Result<(), CredentialStoreError>;

    /// Remove both tokens. Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), CredentialStoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local store, used in tests and for sessions that should not
/// outlive the process.
#[derive(Default)]
pub struct MemoryCredentialStore {
    tokens: Mutex<Option<TokenPair>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<TokenPair>, CredentialStoreError> {
        Ok(self.tokens.lock().await.clone())
    }

    async fn save(&self, tokens: &TokenPair) -> Result<(), CredentialStoreError> {
        *self.tokens.lock().await = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialStoreError> {
        *self.tokens.lock().await = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// On-disk layout: both tokens under separate keys of one JSON object.
#[derive(Serialize, Deserialize)]
struct CredentialDocument {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// JSON file store. Writes go to a sibling temp file which is then renamed
/// over the target, so a crash never leaves a half-written pair.
pub struct FileCredentialStore {
    path: PathBuf,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "credentials".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> CredentialStoreError {
        CredentialStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn remove_file(&self) -> Result<(), CredentialStoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<TokenPair>, CredentialStoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let doc: CredentialDocument =
            serde_json::from_slice(&raw).map_err(|source| CredentialStoreError::Serde {
                path: self.path.clone(),
                source,
            })?;

        match (doc.access_token, doc.refresh_token) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                Ok(Some(TokenPair::new(access, refresh)))
            }
            (None, None) => Ok(None),
            _ => {
                tracing::warn!(path = %self.path.display(), "Discarding incomplete stored token pair");
                let _guard = self.write_lock.lock().await;
                self.remove_file().await?;
                Ok(None)
            }
        }
    }

    async fn save(&self, tokens: &TokenPair) -> Result<(), CredentialStoreError> {
        let doc = CredentialDocument {
            access_token: Some(tokens.access_token.clone()),
            refresh_token: Some(tokens.refresh_token.clone()),
        };
        let bytes =
            serde_json::to_vec_pretty(&doc).map_err(|source| CredentialStoreError::Serde {
                path: self.path.clone(),
                source,
            })?;

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialStoreError> {
        let _guard = self.write_lock.lock().await;
        self.remove_file().await
    }
}
