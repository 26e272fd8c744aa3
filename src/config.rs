//! Configuration for chatvault sanitization, credential and session handling.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::security::patterns::TRUSTED_ORIGINS;

/// Lowest PBKDF2 iteration count accepted from configuration.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Content sanitization settings.
    pub sanitizer: SanitizerConfig,
    /// Session key cache settings.
    pub session: SessionConfig,
    /// Credential encryption settings.
    pub crypto: CryptoConfig,
    /// Persistent storage settings.
    pub storage: StorageConfig,
}

/// Sanitization engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Maximum number of characters kept by storage sanitization.
    pub max_storage_length: usize,
    /// Marker appended to content truncated for storage.
    pub truncation_marker: String,
    /// Maximum number of characters in a sanitized search query.
    pub max_query_length: usize,
    /// Replacement returned for URLs with a dangerous scheme.
    pub safe_url_placeholder: String,
    /// Hosts considered trusted. Subdomains of an entry are trusted too.
    pub trusted_origins: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_storage_length: 50_000,
            truncation_marker: "... [truncated]".into(),
            max_query_length: 1_000,
            safe_url_placeholder: "about:blank".into(),
            trusted_origins: TRUSTED_ORIGINS.iter().map(|host| host.to_string()).collect(),
        }
    }
}

/// Session key manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a cached passphrase, measured from its last use.
    #[serde(with = "humantime_serde")]
    pub key_timeout: Duration,
    /// Inactivity after which `notify_inactivity` drops the session key.
    #[serde(with = "humantime_serde")]
    pub idle_threshold: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_timeout: Duration::from_secs(5 * 60),
            idle_threshold: Duration::from_secs(60),
        }
    }
}

/// Credential encryption configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-HMAC-SHA256 iteration count.
    pub kdf_iterations: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: MIN_KDF_ITERATIONS,
        }
    }
}

/// Persistent storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the JSON key-value file (defaults under the local data dir).
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the storage file path.
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("chatvault")
                .join("store.json")
        })
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that would weaken the security guarantees.
    pub fn validate(&self) -> Result<()> {
        if self.crypto.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(Error::Config(format!(
                "kdf_iterations must be at least {}, got {}",
                MIN_KDF_ITERATIONS, self.crypto.kdf_iterations
            )));
        }
        if self.session.key_timeout.is_zero() {
            return Err(Error::Config("key_timeout must be non-zero".into()));
        }
        if self.sanitizer.max_storage_length == 0 {
            return Err(Error::Config("max_storage_length must be non-zero".into()));
        }
        Ok(())
    }

    /// Create a builder for configuration.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the storage length limit.
    pub fn max_storage_length(mut self, limit: usize) -> Self {
        self.config.sanitizer.max_storage_length = limit;
        self
    }

    /// Add a trusted origin host.
    pub fn trust_origin(mut self, host: impl Into<String>) -> Self {
        self.config.sanitizer.trusted_origins.push(host.into());
        self
    }

    /// Set the cached key lifetime.
    pub fn key_timeout(mut self, timeout: Duration) -> Self {
        self.config.session.key_timeout = timeout;
        self
    }

    /// Set the PBKDF2 iteration count.
    pub fn kdf_iterations(mut self, iterations: u32) -> Self {
        self.config.crypto.kdf_iterations = iterations;
        self
    }

    /// Set the storage file path.
    pub fn storage_path(mut self, path: PathBuf) -> Self {
        self.config.storage.path = Some(path);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Config {
        self.config
    }
}
