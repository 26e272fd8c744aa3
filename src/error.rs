//! Error types for chatvault operations.

use thiserror::Error;

/// Result type alias for chatvault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while protecting captured content or credentials.
///
/// Sanitization never produces an error; malformed input degrades to an
/// empty or default value instead. Only credential handling and storage
/// surface failures to callers.
#[derive(Error, Debug)]
pub enum Error {
    /// Credential structure or format is invalid. Raised before any
    /// cryptographic work starts.
    #[error("invalid field '{field}': {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Why the field was rejected.
        reason: String,
    },

    /// Encryption could not be completed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed. Wrong passphrase and corrupted ciphertext are
    /// reported identically.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The persistent key-value store could not be read or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A sanitization profile name did not match any known profile.
    #[error("unknown sanitization profile: {0}")]
    UnknownProfile(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a validation error for a field that is absent or empty.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: "missing".into(),
        }
    }

    /// Build a validation error for a field with the wrong format.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error came from an encryption or decryption step.
    pub fn is_crypto_failure(&self) -> bool {
        matches!(self, Error::EncryptionFailed(_) | Error::DecryptionFailed)
    }

    /// Returns true if the operation must not be retried with the same input.
    ///
    /// A failed decryption is final for the passphrase that was used, and a
    /// validation failure will fail again until the input changes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::DecryptionFailed | Error::Validation { .. } | Error::UnknownProfile(_)
        )
    }

    /// Name of the invalid field, for validation errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}
