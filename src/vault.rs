//! ChatVault - entry point wiring sanitization, credentials and sessions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::security::encryption::CredentialCipher;
use crate::security::events::{SecurityEventKind, SecurityEventLog};
use crate::security::sanitizer::{RawMessage, SanitizedMessage, Sanitizer};
use crate::session::{Clock, IdleState, SessionKeyManager, SystemClock};
use crate::storage::{JsonFileStore, KeyValueStore};

/// Captured content goes in through [`ChatVault::capture`], credentials
/// come out through [`ChatVault::credentials`]. Everything shares one
/// store and one security event log.
pub struct ChatVault {
    config: Config,
    store: Arc<dyn KeyValueStore>,
    events: Arc<SecurityEventLog>,
    sanitizer: Arc<Sanitizer>,
    session: Arc<SessionKeyManager>,
}

impl ChatVault {
    /// Create a new ChatVault builder.
    pub fn builder() -> ChatVaultBuilder {
        ChatVaultBuilder::default()
    }

    /// Create a ChatVault with default configuration and file storage.
    pub async fn new() -> Result<Self> {
        Self::builder().build().await
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Persistent store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// The sanitization engine.
    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    /// The session key manager.
    pub fn session(&self) -> &SessionKeyManager {
        &self.session
    }

    /// The security event log.
    pub fn events(&self) -> &SecurityEventLog {
        &self.events
    }

    /// Sanitize a captured message for storage and transport.
    pub fn capture(&self, message: &RawMessage) -> SanitizedMessage {
        self.sanitizer.sanitize_message(Some(message))
    }

    /// Sanitize a loosely-typed batch of captured messages.
    pub fn capture_batch(&self, messages: &Value) -> Vec<SanitizedMessage> {
        self.sanitizer.sanitize_batch_value(messages)
    }

    /// Sanitize a search query for the remote API.
    pub fn query(&self, query: &str) -> String {
        self.sanitizer.sanitize_query(query)
    }

    /// Decrypt the stored credentials for a single use.
    pub async fn credentials(&self) -> Result<Option<Credentials>> {
        self.session.get_credentials().await
    }

    /// Encrypt and store new credentials.
    pub async fn update_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.session.update_credentials(credentials).await
    }

    /// Forward an idle or lock notification from the host.
    pub fn notify_idle_state(&self, state: IdleState) {
        self.session.notify_idle_state(state);
    }

    /// Report how long the user has been inactive; past the configured idle
    /// threshold the session key is dropped.
    pub fn notify_inactivity(&self, idle_for: Duration) -> IdleState {
        self.session.notify_inactivity(idle_for)
    }

    /// Sweep the session key cache periodically so an unused passphrase is
    /// dropped on time even if nothing reads it.
    pub fn spawn_key_sweeper(&self, period: Duration) -> JoinHandle<()> {
        self.session.cache().spawn_sweeper(period)
    }

    /// Flush pending security events to storage.
    pub async fn close(&self) -> Result<()> {
        self.session.invalidate();
        self.events.persist().await
    }
}

/// Builder for ChatVault.
#[derive(Default)]
pub struct ChatVaultBuilder {
    config: Option<Config>,
    store: Option<Arc<dyn KeyValueStore>>,
    cipher: Option<Arc<CredentialCipher>>,
    clock: Option<Arc<dyn Clock>>,
    skip_migration: bool,
}

impl ChatVaultBuilder {
    /// Set custom configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a specific store instead of the JSON file from the config.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a specific cipher instead of one built from the config.
    pub fn with_cipher(mut self, cipher: Arc<CredentialCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Use a specific clock for session expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Don't run the plaintext credential migration on build.
    pub fn skip_migration(mut self) -> Self {
        self.skip_migration = true;
        self
    }

    /// Build the ChatVault instance.
    pub async fn build(self) -> Result<ChatVault> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(JsonFileStore::new(config.storage.resolved_path())),
        };
        let cipher = self
            .cipher
            .unwrap_or_else(|| Arc::new(CredentialCipher::from_config(&config.crypto)));
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let events = Arc::new(SecurityEventLog::load(store.clone()).await?);
        let sanitizer = Arc::new(
            Sanitizer::with_config(config.sanitizer.clone()).with_event_log(events.clone()),
        );
        let session = Arc::new(SessionKeyManager::with_clock(
            store.clone(),
            cipher.clone(),
            events.clone(),
            &config.session,
            clock,
        ));

        let migrated = if self.skip_migration {
            false
        } else {
            match session.ensure_migrated().await {
                Ok(migrated) => migrated,
                // Invalid legacy data must not lock the user out of the vault.
                // The flag stays unset so migration retries once it is fixed.
                Err(e @ Error::Validation { .. }) => {
                    tracing::warn!(error = %e, "Legacy credentials not migrated");
                    events
                        .log_security_event(
                            SecurityEventKind::MigrationSkipped,
                            json!({ "field": e.field() }),
                        )
                        .await?;
                    false
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!(
            kdf_iterations = cipher.iterations(),
            key_timeout = ?config.session.key_timeout,
            stored_events = events.len(),
            migrated,
            "ChatVault initialized"
        );

        Ok(ChatVault {
            config,
            store,
            events,
            sanitizer,
            session,
        })
    }
}
