//! Credential types and encrypted credential storage.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::security::encryption::CredentialCipher;
use crate::security::patterns;
use crate::storage::{self, keys, KeyValueStore};

/// Remote API credentials.
///
/// Wiped from memory on drop. `Debug` output never includes the API key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// Base URL of the remote storage API.
    pub endpoint_url: String,
    /// API key for the remote storage API.
    pub api_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint_url", &self.endpoint_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Create credentials from their parts.
    pub fn new(endpoint_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Build credentials from loosely-typed JSON, failing with a validation
    /// error naming the first field that is absent or not a string.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::invalid_field("credentials", "expected an object"))?;
        let field = |name: &str| {
            object
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::missing_field(name))
        };
        Ok(Self {
            endpoint_url: field("endpointUrl")?,
            api_key: field("apiKey")?,
        })
    }

    /// Check structure and format without any cryptographic work.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint_url.trim().is_empty() {
            return Err(Error::missing_field("endpointUrl"));
        }
        if self.api_key.is_empty() {
            return Err(Error::missing_field("apiKey"));
        }

        let url = Url::parse(self.endpoint_url.trim())
            .map_err(|e| Error::invalid_field("endpointUrl", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid_field(
                "endpointUrl",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::invalid_field("endpointUrl", "missing host"));
        }

        if !patterns::api_key_format().is_match(&self.api_key) {
            return Err(Error::invalid_field(
                "apiKey",
                "expected 20 to 512 characters of [A-Za-z0-9._-]",
            ));
        }
        Ok(())
    }
}

/// Credentials encrypted with a passphrase-derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedCredentialBlob {
    /// AES-GCM ciphertext including the authentication tag.
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// PBKDF2 salt.
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    /// AES-GCM nonce.
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Blob format version.
    pub version: u32,
    /// Algorithm tag.
    pub algorithm: String,
    /// When the blob was produced.
    pub created_at: DateTime<Utc>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Encrypted credential persistence on top of a [`KeyValueStore`].
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
    cipher: Arc<CredentialCipher>,
}

impl CredentialStore {
    /// Create a credential store.
    pub fn new(store: Arc<dyn KeyValueStore>, cipher: Arc<CredentialCipher>) -> Self {
        Self { store, cipher }
    }

    /// The cipher used for encryption.
    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }

    /// Load the stored blob, if any.
    pub async fn load_blob(&self) -> Result<Option<EncryptedCredentialBlob>> {
        storage::load(self.store.as_ref(), keys::ENCRYPTED_CREDENTIALS).await
    }

    /// Persist a blob, replacing any previous one.
    pub async fn save_blob(&self, blob: &EncryptedCredentialBlob) -> Result<()> {
        storage::save(self.store.as_ref(), keys::ENCRYPTED_CREDENTIALS, blob).await
    }

    /// Remove the stored blob.
    pub async fn delete_blob(&self) -> Result<()> {
        self.store.remove(&[keys::ENCRYPTED_CREDENTIALS]).await
    }

    /// Load legacy plaintext credentials.
    ///
    /// Returns `None` when neither legacy field is present. A half-present
    /// pair is returned with the missing part empty so that validation
    /// reports it.
    pub async fn load_legacy(&self) -> Result<Option<Credentials>> {
        let endpoint_url: Option<String> =
            storage::load(self.store.as_ref(), keys::LEGACY_ENDPOINT_URL).await?;
        let api_key: Option<String> = storage::load(self.store.as_ref(), keys::LEGACY_API_KEY).await?;

        if endpoint_url.is_none() && api_key.is_none() {
            return Ok(None);
        }
        Ok(Some(Credentials::new(
            endpoint_url.unwrap_or_default(),
            api_key.unwrap_or_default(),
        )))
    }

    /// Encrypt plaintext credentials, persist the blob and delete the
    /// legacy plaintext fields.
    ///
    /// Returns `Ok(false)` without touching storage when there is nothing
    /// to migrate. The plaintext is only deleted after the blob is saved.
    pub async fn migrate_to_encrypted(
        &self,
        plaintext: Option<&Credentials>,
        passphrase: &str,
    ) -> Result<bool> {
        let Some(credentials) = plaintext else {
            tracing::debug!("No plaintext credentials to migrate");
            return Ok(false);
        };

        let blob = self.cipher.encrypt_credentials(credentials, passphrase).await?;
        self.save_blob(&blob).await?;
        self.store
            .remove(&[keys::LEGACY_ENDPOINT_URL, keys::LEGACY_API_KEY])
            .await?;

        tracing::info!("Migrated plaintext credentials to encrypted storage");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn sample() -> Credentials {
        Credentials::new("https://abc.supabase.co", "sk_live.0123456789abcdefXYZ")
    }

    fn store() -> (Arc<MemoryStore>, CredentialStore) {
        let memory = Arc::new(MemoryStore::new());
        let cipher = Arc::new(CredentialCipher::with_iterations(1_000));
        (memory.clone(), CredentialStore::new(memory, cipher))
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_names_offending_field() {
        let cases = [
            (Credentials::new("", "sk_live.0123456789abcdefXYZ"), "endpointUrl"),
            (Credentials::new("https://abc.supabase.co", ""), "apiKey"),
            (Credentials::new("ftp://abc.supabase.co", "sk_live.0123456789abcdefXYZ"), "endpointUrl"),
            (Credentials::new("not a url", "sk_live.0123456789abcdefXYZ"), "endpointUrl"),
            (Credentials::new("https://abc.supabase.co", "short"), "apiKey"),
            (Credentials::new("https://abc.supabase.co", "has spaces in the key!!"), "apiKey"),
        ];
        for (credentials, field) in cases {
            let err = credentials.validate().unwrap_err();
            assert_eq!(err.field(), Some(field), "{credentials:?}");
        }
    }

    #[test]
    fn test_from_value_reports_missing_field() {
        let err = Credentials::from_value(&json!({"endpointUrl": "https://x.io"})).unwrap_err();
        assert_eq!(err.field(), Some("apiKey"));

        let err = Credentials::from_value(&json!({"endpointUrl": 3, "apiKey": "k"})).unwrap_err();
        assert_eq!(err.field(), Some("endpointUrl"));

        assert!(Credentials::from_value(&json!([])).is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let debug = format!("{:?}", sample());
        assert!(!debug.contains("0123456789"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_credentials_json_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            json!({"endpointUrl": "https://abc.supabase.co", "apiKey": "sk_live.0123456789abcdefXYZ"})
        );
    }

    #[test]
    fn test_blob_json_uses_base64_and_camel_case() {
        let blob = EncryptedCredentialBlob {
            ciphertext: vec![1, 2, 3],
            salt: vec![0; 16],
            iv: vec![0xff; 12],
            version: 1,
            algorithm: "AES-256-GCM/PBKDF2-SHA256".into(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&blob).unwrap();
        assert_eq!(value["ciphertext"], "AQID");
        assert_eq!(value["iv"], "////////////////");
        assert!(value.get("createdAt").is_some());

        let back: EncryptedCredentialBlob = serde_json::from_value(value).unwrap();
        assert_eq!(back, blob);
    }

    #[tokio::test]
    async fn test_migrate_without_plaintext_is_noop() {
        let (memory, store) = store();
        assert!(!store.migrate_to_encrypted(None, "passphrase").await.unwrap());
        assert!(!memory.contains(keys::ENCRYPTED_CREDENTIALS));
    }

    #[tokio::test]
    async fn test_migrate_encrypts_and_deletes_plaintext() {
        let (memory, store) = store();
        memory
            .set(keys::LEGACY_ENDPOINT_URL, json!("https://abc.supabase.co"))
            .await
            .unwrap();
        memory
            .set(keys::LEGACY_API_KEY, json!("sk_live.0123456789abcdefXYZ"))
            .await
            .unwrap();

        let legacy = store.load_legacy().await.unwrap();
        assert_eq!(legacy.as_ref(), Some(&sample()));

        assert!(store
            .migrate_to_encrypted(legacy.as_ref(), "correct horse")
            .await
            .unwrap());
        assert!(!memory.contains(keys::LEGACY_ENDPOINT_URL));
        assert!(!memory.contains(keys::LEGACY_API_KEY));

        let blob = store.load_blob().await.unwrap().unwrap();
        let decrypted = store
            .cipher()
            .decrypt_credentials(&blob, "correct horse")
            .await
            .unwrap();
        assert_eq!(decrypted, sample());
    }

    #[tokio::test]
    async fn test_migrate_invalid_plaintext_keeps_legacy_fields() {
        let (memory, store) = store();
        memory
            .set(keys::LEGACY_ENDPOINT_URL, json!("https://abc.supabase.co"))
            .await
            .unwrap();

        let legacy = store.load_legacy().await.unwrap();
        let err = store
            .migrate_to_encrypted(legacy.as_ref(), "pass")
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("apiKey"));
        assert!(memory.contains(keys::LEGACY_ENDPOINT_URL));
    }
}
