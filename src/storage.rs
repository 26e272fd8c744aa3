//! Persistent key-value storage.
//!
//! The store is an external collaborator: the browser's local storage in
//! the extension, a JSON file on disk here. Everything persisted is a
//! JSON value under one of the keys in [`keys`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Keys used in the persistent store.
pub mod keys {
    /// Encrypted credential blob.
    pub const ENCRYPTED_CREDENTIALS: &str = "encryptedCredentials";
    /// Obfuscated session passphrase.
    pub const INSTALLATION_KEY: &str = "installationKey";
    /// Stable per-installation identifier.
    pub const INSTALLATION_ID: &str = "installationId";
    /// One-time migration marker.
    pub const CREDENTIALS_MIGRATED: &str = "credentialsMigrated";
    /// Bounded security event ring.
    pub const SECURITY_EVENTS: &str = "securityEvents";
    /// Legacy plaintext endpoint, present only before migration.
    pub const LEGACY_ENDPOINT_URL: &str = "endpointUrl";
    /// Legacy plaintext API key, present only before migration.
    pub const LEGACY_API_KEY: &str = "apiKey";
}

/// Asynchronous key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove keys. Missing keys are ignored.
    async fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// Read and deserialize a typed value.
pub async fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::StorageUnavailable(format!("corrupt value under '{key}': {e}"))),
        None => Ok(None),
    }
}

/// Serialize and write a typed value.
pub async fn save<T: Serialize + ?Sized>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?).await
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
    unavailable: RwLock<bool>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend; every operation fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    fn check(&self) -> Result<()> {
        if *self.unavailable.read() {
            return Err(Error::StorageUnavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check()?;
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check()?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        self.check()?;
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// Writes go to a sibling temporary file that is renamed over the original,
/// so a crash never leaves a half-written store behind.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, Value>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::StorageUnavailable(format!("corrupt store {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(unavailable(&self.path, e)),
        }
    }

    async fn write_all(&self, entries: &HashMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| unavailable(parent, e))?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| unavailable(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| unavailable(&self.path, e))?;
        Ok(())
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> Error {
    Error::StorageUnavailable(format!("{}: {e}", path.display()))
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value);
        self.write_all(&entries).await
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        let before = entries.len();
        for key in keys {
            entries.remove(*key);
        }
        if entries.len() != before {
            self.write_all(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_operations() {
        let store = MemoryStore::new();
        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!("two")).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(json!(1)));

        store.remove(&["a", "missing"]).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.contains("b"));
    }

    #[tokio::test]
    async fn test_memory_store_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.get("a").await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_json_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = JsonFileStore::new(&path);
        assert_eq!(store.get("missing").await.unwrap(), None);
        save(&store, keys::CREDENTIALS_MIGRATED, &true).await.unwrap();
        store.set("other", json!({"k": [1, 2]})).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        let migrated: Option<bool> = load(&reopened, keys::CREDENTIALS_MIGRATED).await.unwrap();
        assert_eq!(migrated, Some(true));

        reopened.remove(&["other"]).await.unwrap();
        assert_eq!(reopened.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_reports_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.get("x").await,
            Err(Error::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_typed_load_rejects_wrong_shape() {
        let store = MemoryStore::new();
        store.set("flag", json!("not a bool")).await.unwrap();
        let result: Result<Option<bool>> = load(&store, "flag").await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }
}
