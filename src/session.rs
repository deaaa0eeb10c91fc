//! Session identity - one conversation identifier per storage scope
//!
//! This module provides:
//! - `SessionStorage` backends (file-per-key on disk, in-memory)
//! - `SessionIdentityStore`, which hands out a stable `SessionId` and falls
//!   back to an in-memory id when storage is unavailable

use crate::types::SessionId;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Mutex;
use std::{fs, io, path::PathBuf};

/// Fixed storage key for the session identifier.
pub const SESSION_STORAGE_KEY: &str = "qa_bot_session_id";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("session storage unavailable: {0}")]
    Unavailable(#[from] io::Error),

    #[error("session storage poisoned")]
    Poisoned,
}

pub trait SessionStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ============================================
// File-backed storage
// ============================================

/// One file per key under a scope directory.
pub struct FileSessionStorage {
    root: PathBuf,
}

impl FileSessionStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage for a named scope under the platform data directory.
    pub fn for_scope(scope: &str) -> Self {
        Self::new(scope_dir(scope))
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(sanitize_key(key))
    }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.key_path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn scope_dir(scope: &str) -> PathBuf {
    let safe_scope = sanitize_key(scope);

    if let Some(data_dir) = dirs::data_local_dir() {
        return data_dir.join("ragchat").join("sessions").join(safe_scope);
    }

    PathBuf::from("cache").join("sessions").join(safe_scope)
}

/// Sanitize a key or scope name for filesystem use
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}

// ============================================
// In-memory storage
// ============================================

#[derive(Default)]
pub struct MemorySessionStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// ============================================
// Identity store
// ============================================

pub struct SessionIdentityStore<S> {
    storage: S,
    fallback: OnceCell<SessionId>,
}

impl<S: SessionStorage> SessionIdentityStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            fallback: OnceCell::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the scope's identifier, creating and persisting one on first use.
    ///
    /// Never fails: if the storage cannot be read or written, an in-memory
    /// identifier is used for the lifetime of this store.
    pub fn get_or_create_session_id(&self) -> SessionId {
        match self.storage.load(SESSION_STORAGE_KEY) {
            Ok(Some(raw)) => {
                if let Some(existing) = SessionId::parse(&raw) {
                    return existing;
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "falling back to in-memory session id");
                return self.fallback_id();
            }
        }

        if let Some(id) = self.fallback.get() {
            return id.clone();
        }

        let fresh = SessionId::generate();
        match self.storage.store(SESSION_STORAGE_KEY, fresh.as_str()) {
            Ok(()) => {
                tracing::info!(session = %fresh, "created session id");
                fresh
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not persist session id, keeping it in memory");
                self.fallback.get_or_init(|| fresh).clone()
            }
        }
    }

    fn fallback_id(&self) -> SessionId {
        self.fallback.get_or_init(SessionId::generate).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStorage;

    impl SessionStorage for BrokenStorage {
        fn load(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied").into())
        }

        fn store(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    /// Reads succeed but writes are refused.
    struct ReadOnlyStorage;

    impl SessionStorage for ReadOnlyStorage {
        fn load(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn store(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("qa_bot_session_id"), "qa_bot_session_id");
        assert_eq!(sanitize_key("tab:1/main"), "tab_1_main");
    }

    #[test]
    fn repeated_calls_return_same_id() {
        let store = SessionIdentityStore::new(MemorySessionStorage::new());
        let first = store.get_or_create_session_id();
        let second = store.get_or_create_session_id();
        assert_eq!(first, second);
        assert_eq!(
            store.storage().load(SESSION_STORAGE_KEY).unwrap(),
            Some(first.to_string())
        );
    }

    #[test]
    fn wiping_storage_yields_new_id() {
        let store = SessionIdentityStore::new(MemorySessionStorage::new());
        let before = store.get_or_create_session_id();
        store.storage().remove(SESSION_STORAGE_KEY).unwrap();
        let after = store.get_or_create_session_id();
        assert_ne!(before, after);
    }

    #[test]
    fn blank_stored_value_is_replaced() {
        let storage = MemorySessionStorage::new();
        storage.store(SESSION_STORAGE_KEY, "  \n").unwrap();
        let store = SessionIdentityStore::new(storage);
        let id = store.get_or_create_session_id();
        assert!(!id.as_str().trim().is_empty());
    }

    #[test]
    fn generated_id_is_uuid_shaped() {
        let store = SessionIdentityStore::new(MemorySessionStorage::new());
        let id = store.get_or_create_session_id();
        let parsed = uuid::Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
    }

    #[test]
    fn unavailable_storage_falls_back_to_memory() {
        let store = SessionIdentityStore::new(BrokenStorage);
        let first = store.get_or_create_session_id();
        let second = store.get_or_create_session_id();
        assert_eq!(first, second);
    }

    #[test]
    fn unwritable_storage_keeps_id_stable() {
        let store = SessionIdentityStore::new(ReadOnlyStorage);
        let first = store.get_or_create_session_id();
        let second = store.get_or_create_session_id();
        assert_eq!(first, second);
    }
}
