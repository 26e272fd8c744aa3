//! Credential encryption.
//!
//! Credentials are serialized to JSON and sealed with AES-256-GCM under a
//! key derived from a passphrase with PBKDF2-HMAC-SHA256. Every encryption
//! draws a fresh salt and nonce from the OS random source.

use std::sync::atomic::{AtomicU64, Ordering};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use pbkdf2::pbkdf2_hmac;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::config::{CryptoConfig, MIN_KDF_ITERATIONS};
use crate::credentials::{Credentials, EncryptedCredentialBlob};
use crate::error::{Error, Result};

/// Current blob format version.
pub const BLOB_VERSION: u32 = 1;

/// Algorithm tag stored in every blob.
pub const ALGORITHM: &str = "AES-256-GCM/PBKDF2-SHA256";

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes.
pub const IV_LEN: usize = 12;

/// Length of generated passphrases.
pub const PASSPHRASE_LEN: usize = 48;

const KEY_LEN: usize = 32;

/// A 256-bit key derived from a passphrase. Zeroized on drop.
pub struct DerivedKey(Secret<[u8; KEY_LEN]>);

impl DerivedKey {
    fn cipher(&self) -> Option<Aes256Gcm> {
        Aes256Gcm::new_from_slice(self.0.expose_secret()).ok()
    }

    /// Whether two keys are equal. Only meant for tests and diagnostics.
    pub fn same_as(&self, other: &DerivedKey) -> bool {
        self.0.expose_secret() == other.0.expose_secret()
    }
}

/// Password-based authenticated encryption for [`Credentials`].
pub struct CredentialCipher {
    iterations: u32,
    derivations: AtomicU64,
}

impl CredentialCipher {
    /// Cipher with the default iteration count.
    pub fn new() -> Self {
        Self::with_iterations(MIN_KDF_ITERATIONS)
    }

    /// Cipher with a custom PBKDF2 iteration count. Zero is raised to one.
    pub fn with_iterations(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
            derivations: AtomicU64::new(0),
        }
    }

    /// Cipher configured from [`CryptoConfig`].
    pub fn from_config(config: &CryptoConfig) -> Self {
        Self::with_iterations(config.kdf_iterations)
    }

    /// PBKDF2 iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Number of key derivations started so far.
    pub fn derivation_count(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }

    /// Generate a random 256-bit key, base64-encoded.
    pub fn generate_master_key() -> String {
        let mut key = Aes256Gcm::generate_key(OsRng);
        let encoded = STANDARD.encode(key.as_slice());
        key.as_mut_slice().zeroize();
        encoded
    }

    /// Derive a key from `passphrase` and `salt`.
    ///
    /// Deterministic for the same inputs. Runs on the blocking pool.
    pub async fn derive_key(&self, passphrase: &str, salt: &[u8]) -> Result<DerivedKey> {
        self.derivations.fetch_add(1, Ordering::Relaxed);

        let passphrase = Zeroizing::new(passphrase.to_owned());
        let salt = salt.to_vec();
        let iterations = self.iterations;

        let key = tokio::task::spawn_blocking(move || {
            let mut key = [0u8; KEY_LEN];
            pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &salt, iterations, &mut key);
            Secret::new(key)
        })
        .await
        .map_err(|e| Error::EncryptionFailed(format!("key derivation task failed: {e}")))?;

        Ok(DerivedKey(key))
    }

    /// Encrypt credentials under `passphrase`.
    ///
    /// Structure is validated before any key derivation happens.
    pub async fn encrypt_credentials(
        &self,
        credentials: &Credentials,
        passphrase: &str,
    ) -> Result<EncryptedCredentialBlob> {
        credentials.validate()?;
        if passphrase.is_empty() {
            return Err(Error::missing_field("passphrase"));
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let key = self.derive_key(passphrase, &salt).await?;
        let cipher = key
            .cipher()
            .ok_or_else(|| Error::EncryptionFailed("invalid key length".into()))?;

        let plaintext = Zeroizing::new(
            serde_json::to_vec(credentials).map_err(|e| Error::EncryptionFailed(e.to_string()))?,
        );
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
            .map_err(|_| Error::EncryptionFailed("authenticated encryption failed".into()))?;

        tracing::debug!(bytes = ciphertext.len(), "Encrypted credentials");

        Ok(EncryptedCredentialBlob {
            ciphertext,
            salt: salt.to_vec(),
            iv: iv.to_vec(),
            version: BLOB_VERSION,
            algorithm: ALGORITHM.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Decrypt a blob with `passphrase`.
    ///
    /// Every failure, whether wrong passphrase, tampered ciphertext or an
    /// unsupported blob, is reported as [`Error::DecryptionFailed`].
    pub async fn decrypt_credentials(
        &self,
        blob: &EncryptedCredentialBlob,
        passphrase: &str,
    ) -> Result<Credentials> {
        if blob.version != BLOB_VERSION
            || blob.algorithm != ALGORITHM
            || blob.salt.len() != SALT_LEN
            || blob.iv.len() != IV_LEN
            || passphrase.is_empty()
        {
            tracing::debug!(version = blob.version, "Rejected unsupported credential blob");
            return Err(Error::DecryptionFailed);
        }

        let key = self
            .derive_key(passphrase, &blob.salt)
            .await
            .map_err(|_| Error::DecryptionFailed)?;
        let cipher = key.cipher().ok_or(Error::DecryptionFailed)?;

        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(&blob.iv), blob.ciphertext.as_slice())
            .map_err(|_| Error::DecryptionFailed)?;

        let parsed = serde_json::from_slice::<Credentials>(&plaintext);
        OsRng.fill_bytes(&mut plaintext);
        drop(plaintext);

        parsed.map_err(|_| Error::DecryptionFailed)
    }

    /// Generate a random passphrase of [`PASSPHRASE_LEN`] alphanumeric
    /// characters containing at least one uppercase letter, one lowercase
    /// letter and one digit.
    pub fn generate_secure_passphrase() -> String {
        loop {
            let candidate: String = OsRng
                .sample_iter(&Alphanumeric)
                .take(PASSPHRASE_LEN)
                .map(char::from)
                .collect();
            let upper = candidate.chars().any(|c| c.is_ascii_uppercase());
            let lower = candidate.chars().any(|c| c.is_ascii_lowercase());
            let digit = candidate.chars().any(|c| c.is_ascii_digit());
            if upper && lower && digit {
                return candidate;
            }
        }
    }

    /// Pre-flight format check; never touches the KDF.
    pub fn validate_credentials(credentials: &Credentials) -> bool {
        credentials.validate().is_ok()
    }
}

impl Default for CredentialCipher {
    fn default() -> Self {
        Self::new()
    }
}
