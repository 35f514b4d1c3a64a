//! Persisted credential storage
//!
//! The token and the cached identity live in one document, so `clear`
//! removes both in a single step and no reader ever sees one without the
//! other.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::model::{Credential, Identity};

/// Key/value access to the stored token and identity mirror
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// The stored token, if any
    fn get(&self) -> Option<Credential>;

    /// Store a token, keeping any cached identity
    fn set(&self, credential: &Credential) -> crate::Result<()>;

    /// The cached identity mirror, if any
    fn identity(&self) -> Option<Identity>;

    /// Replace the cached identity mirror, keeping the token
    fn set_identity(&self, identity: &Identity) -> crate::Result<()>;

    /// Remove token and identity together
    fn clear(&self) -> crate::Result<()>;
}

/// On-disk layout: `{"token": "...", "user": {...}}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<Identity>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<StoredSession>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            inner: Mutex::new(StoredSession {
                token: Some(token.to_string()),
                user: None,
            }),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<Credential> {
        lock(&self.inner).token.clone().map(Credential::new)
    }

    fn set(&self, credential: &Credential) -> crate::Result<()> {
        lock(&self.inner).token = Some(credential.token.clone());
        Ok(())
    }

    fn identity(&self) -> Option<Identity> {
        lock(&self.inner).user.clone()
    }

    fn set_identity(&self, identity: &Identity) -> crate::Result<()> {
        lock(&self.inner).user = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> crate::Result<()> {
        *lock(&self.inner) = StoredSession::default();
        Ok(())
    }
}

/// Store backed by a JSON file, replaced atomically on every write
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        tracing::debug!("Using credential store at {:?}", path);
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoredSession {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return StoredSession::default();
            }
            Err(e) => {
                tracing::warn!("Failed to read credential store {:?}: {}", self.path, e);
                return StoredSession::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring corrupt credential store {:?}: {}", self.path, e);
            StoredSession::default()
        })
    }

    fn save(&self, session: &StoredSession) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut StoredSession)) -> crate::Result<()> {
        let _guard = lock(&self.write_lock);
        let mut session = self.load();
        apply(&mut session);
        self.save(&session)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<Credential> {
        self.load().token.map(Credential::new)
    }

    fn set(&self, credential: &Credential) -> crate::Result<()> {
        self.update(|session| session.token = Some(credential.token.clone()))
    }

    fn identity(&self) -> Option<Identity> {
        self.load().user
    }

    fn set_identity(&self, identity: &Identity) -> crate::Result<()> {
        self.update(|session| session.user = Some(identity.clone()))
    }

    fn clear(&self) -> crate::Result<()> {
        let _guard = lock(&self.write_lock);
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
