//! Device key-value storage for the active call and auth tokens

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{BackendError, BackendResult};

/// Key holding the id of the call being followed
pub const ACTIVE_CALL_KEY: &str = "active_call_id";

/// Key holding the bearer token from the login flow
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Persistent string key-value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> BackendResult<()>;

    fn remove(&self, key: &str) -> BackendResult<()>;
}

/// Read the stored access token; missing means the user must sign in
pub fn load_access_token(store: &dyn KeyValueStore) -> BackendResult<String> {
    store
        .get(ACCESS_TOKEN_KEY)
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| BackendError::unauthorized("no stored access token"))
}

/// In-memory store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn set(&self, key: &str, value: &str) -> BackendResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> BackendResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store, starting empty when the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref().to_path_buf();

        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => HashMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Storage file not found, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> BackendResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "Failed to write storage file");
            BackendError::from(e)
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> BackendResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> BackendResult<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir().join(format!("dispatch-store-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.get(ACTIVE_CALL_KEY).is_none());

        store.set(ACTIVE_CALL_KEY, "abc").unwrap();
        assert_eq!(store.get(ACTIVE_CALL_KEY).as_deref(), Some("abc"));

        store.remove(ACTIVE_CALL_KEY).unwrap();
        store.remove(ACTIVE_CALL_KEY).unwrap();
        assert!(store.get(ACTIVE_CALL_KEY).is_none());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let path = scratch_path();

        let store = FileStore::open(&path).unwrap();
        store.set(ACCESS_TOKEN_KEY, "jwt-token").unwrap();
        store.set(ACTIVE_CALL_KEY, "call-1").unwrap();
        store.remove(ACTIVE_CALL_KEY).unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(ACCESS_TOKEN_KEY).as_deref(), Some("jwt-token"));
        assert!(reopened.get(ACTIVE_CALL_KEY).is_none());

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_token_is_unauthorized() {
        let store = MemoryStore::new();
        assert!(matches!(load_access_token(&store), Err(BackendError::Unauthorized(_))));

        store.set(ACCESS_TOKEN_KEY, "  ").unwrap();
        assert!(load_access_token(&store).is_err());

        store.set(ACCESS_TOKEN_KEY, "jwt").unwrap();
        assert_eq!(load_access_token(&store).unwrap(), "jwt");
    }
}
