//! Session key management.
//!
//! The passphrase protecting the stored credentials is cached in memory for
//! a bounded time. Each successful decryption with the cached passphrase
//! pushes the expiry forward; idle or lock notifications, explicit
//! invalidation and expiry all drop it. When no passphrase is cached it is recovered from the
//! installation key in persistent storage.
//!
//! The installation key is the passphrase XORed with a pad derived from
//! the installation identifier. Both live in the same store, so this only
//! hides the passphrase from casual inspection of the storage file. It is
//! not a security boundary.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::config::SessionConfig;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::Result;
use crate::security::encryption::CredentialCipher;
use crate::security::events::{SecurityEventKind, SecurityEventLog};
use crate::storage::{self, keys, KeyValueStore};

/// Source of monotonic time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }
}

/// Snapshot of the session key cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKeyState {
    /// No passphrase in memory.
    NoKey,
    /// A passphrase is cached until `expires_at` unless used again.
    KeyCached {
        /// When the passphrase will be dropped.
        expires_at: Instant,
    },
}

/// System activity reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    /// User is active.
    Active,
    /// No input for the idle threshold.
    Idle,
    /// Screen locked.
    Locked,
}

struct CachedKey {
    passphrase: SecretString,
    expires_at: Instant,
}

/// In-memory passphrase cache with sliding expiry.
///
/// One lock guards both the passphrase and its expiry, so a read never
/// observes a passphrase past its deadline.
pub struct SessionKeyCache {
    entry: Mutex<Option<CachedKey>>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SessionKeyCache {
    /// Create an empty cache.
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entry: Mutex::new(None),
            timeout,
            clock,
        }
    }

    /// Cache a passphrase, replacing any previous one.
    pub fn cache(&self, passphrase: SecretString) {
        let expires_at = self.clock.now() + self.timeout;
        *self.entry.lock() = Some(CachedKey {
            passphrase,
            expires_at,
        });
        tracing::debug!(timeout = ?self.timeout, "Session key cached");
    }

    /// Get the cached passphrase. Reading does not extend its lifetime;
    /// see [`touch`](Self::touch).
    ///
    /// An expired entry is dropped and `None` returned.
    pub fn get(&self) -> Option<SecretString> {
        let now = self.clock.now();
        let mut entry = self.entry.lock();
        match entry.as_ref() {
            Some(cached) if now < cached.expires_at => {
                Some(SecretString::new(cached.passphrase.expose_secret().clone()))
            }
            Some(_) => {
                *entry = None;
                tracing::debug!("Session key expired");
                None
            }
            None => None,
        }
    }

    /// Restart the timeout of a live entry. Returns whether one was live.
    pub fn touch(&self) -> bool {
        let now = self.clock.now();
        match self.entry.lock().as_mut() {
            Some(cached) if now < cached.expires_at => {
                cached.expires_at = now + self.timeout;
                true
            }
            _ => false,
        }
    }

    /// Drop the cached passphrase. Returns whether one was cached.
    pub fn invalidate(&self) -> bool {
        self.entry.lock().take().is_some()
    }

    /// Current state. Expired entries are reported, and dropped, as
    /// [`SessionKeyState::NoKey`].
    pub fn state(&self) -> SessionKeyState {
        self.sweep();
        match self.entry.lock().as_ref() {
            Some(cached) => SessionKeyState::KeyCached {
                expires_at: cached.expires_at,
            },
            None => SessionKeyState::NoKey,
        }
    }

    /// Drop the entry if it has expired. Returns whether one was dropped.
    pub fn sweep(&self) -> bool {
        let now = self.clock.now();
        let mut entry = self.entry.lock();
        if entry.as_ref().is_some_and(|cached| now >= cached.expires_at) {
            *entry = None;
            tracing::debug!("Session key expired");
            return true;
        }
        false
    }

    /// Periodically sweep on the current Tokio runtime. The task ends once
    /// the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

fn installation_pad(installation_id: &str) -> [u8; 32] {
    Sha256::digest(installation_id.as_bytes()).into()
}

fn obfuscate(passphrase: &str, installation_id: &str) -> String {
    let pad = installation_pad(installation_id);
    let masked: Zeroizing<Vec<u8>> = Zeroizing::new(
        passphrase
            .bytes()
            .zip(pad.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect(),
    );
    STANDARD.encode(masked.as_slice())
}

fn deobfuscate(encoded: &str, installation_id: &str) -> Option<SecretString> {
    let masked = Zeroizing::new(STANDARD.decode(encoded).ok()?);
    let pad = installation_pad(installation_id);
    let bytes: Vec<u8> = masked
        .iter()
        .zip(pad.iter().cycle())
        .map(|(b, k)| b ^ k)
        .collect();
    String::from_utf8(bytes).ok().map(SecretString::new)
}

/// Owns the session passphrase and hands out decrypted credentials.
pub struct SessionKeyManager {
    store: Arc<dyn KeyValueStore>,
    credentials: CredentialStore,
    cache: Arc<SessionKeyCache>,
    events: Arc<SecurityEventLog>,
    idle_threshold: Duration,
}

impl SessionKeyManager {
    /// Create a manager using the system clock.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        cipher: Arc<CredentialCipher>,
        events: Arc<SecurityEventLog>,
        config: &SessionConfig,
    ) -> Self {
        Self::with_clock(store, cipher, events, config, Arc::new(SystemClock))
    }

    /// Create a manager with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        cipher: Arc<CredentialCipher>,
        events: Arc<SecurityEventLog>,
        config: &SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials: CredentialStore::new(store.clone(), cipher),
            store,
            cache: Arc::new(SessionKeyCache::new(config.key_timeout, clock)),
            events,
            idle_threshold: config.idle_threshold,
        }
    }

    /// The passphrase cache.
    pub fn cache(&self) -> &Arc<SessionKeyCache> {
        &self.cache
    }

    /// Encrypted credential storage.
    pub fn credential_store(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Current cache state.
    pub fn state(&self) -> SessionKeyState {
        self.cache.state()
    }

    /// Stable per-installation identifier, generated on first use.
    pub async fn installation_id(&self) -> Result<String> {
        if let Some(id) = storage::load::<String>(self.store.as_ref(), keys::INSTALLATION_ID).await? {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        storage::save(self.store.as_ref(), keys::INSTALLATION_ID, &id).await?;
        tracing::info!("Generated installation id");
        Ok(id)
    }

    async fn store_installation_key(&self, passphrase: &str) -> Result<()> {
        let id = self.installation_id().await?;
        storage::save(
            self.store.as_ref(),
            keys::INSTALLATION_KEY,
            &obfuscate(passphrase, &id),
        )
        .await
    }

    async fn recover_passphrase(&self) -> Result<Option<SecretString>> {
        let Some(encoded) =
            storage::load::<String>(self.store.as_ref(), keys::INSTALLATION_KEY).await?
        else {
            return Ok(None);
        };
        let id = self.installation_id().await?;
        Ok(deobfuscate(&encoded, &id))
    }

    async fn passphrase(&self) -> Result<Option<SecretString>> {
        if let Some(passphrase) = self.cache.get() {
            return Ok(Some(passphrase));
        }
        let recovered = self.recover_passphrase().await?;
        if let Some(passphrase) = &recovered {
            self.cache
                .cache(SecretString::new(passphrase.expose_secret().clone()));
            tracing::info!("Session key recovered from installation key");
        }
        Ok(recovered)
    }

    /// Decrypt the stored credentials for a single use.
    ///
    /// Returns `Ok(None)` when nothing is stored or the installation key is
    /// gone. A failed decryption drops the cached passphrase, records a
    /// security event and returns
    /// [`Error::DecryptionFailed`](crate::Error::DecryptionFailed); callers must
    /// not retry it automatically.
    pub async fn get_credentials(&self) -> Result<Option<Credentials>> {
        let Some(blob) = self.credentials.load_blob().await? else {
            return Ok(None);
        };
        let Some(passphrase) = self.passphrase().await? else {
            tracing::warn!("Encrypted credentials present but no installation key");
            return Ok(None);
        };

        match self
            .credentials
            .cipher()
            .decrypt_credentials(&blob, passphrase.expose_secret())
            .await
        {
            Ok(credentials) => {
                self.cache.touch();
                Ok(Some(credentials))
            }
            Err(e) => {
                self.cache.invalidate();
                if let Err(log_err) = self
                    .events
                    .log_security_event(
                        SecurityEventKind::DecryptionFailed,
                        json!({ "source": "session" }),
                    )
                    .await
                {
                    tracing::error!(error = %log_err, "Failed to record decryption failure");
                }
                Err(e)
            }
        }
    }

    /// Replace the stored credentials.
    ///
    /// A fresh passphrase is generated, the credentials are encrypted under
    /// it and the passphrase is cached. If the blob cannot be written the
    /// previous installation key is put back, so the old blob stays
    /// readable.
    pub async fn update_credentials(&self, credentials: &Credentials) -> Result<()> {
        credentials.validate()?;

        let passphrase = Zeroizing::new(CredentialCipher::generate_secure_passphrase());
        let blob = self
            .credentials
            .cipher()
            .encrypt_credentials(credentials, &passphrase)
            .await?;

        let previous_key = self.store.get(keys::INSTALLATION_KEY).await?;
        self.store_installation_key(&passphrase).await?;
        if let Err(e) = self.credentials.save_blob(&blob).await {
            let restored = match previous_key {
                Some(key) => self.store.set(keys::INSTALLATION_KEY, key).await,
                None => self.store.remove(&[keys::INSTALLATION_KEY]).await,
            };
            if let Err(restore_err) = restored {
                tracing::error!(error = %restore_err, "Failed to restore installation key");
            }
            return Err(e);
        }
        self.cache.cache(SecretString::new(passphrase.to_string()));

        tracing::info!("Credentials updated");
        Ok(())
    }

    /// Drop the cached passphrase.
    pub fn invalidate(&self) {
        if self.cache.invalidate() {
            tracing::info!("Session key invalidated");
        }
    }

    /// React to a change in system activity. Idle and locked states drop
    /// the cached passphrase.
    pub fn notify_idle_state(&self, state: IdleState) {
        match state {
            IdleState::Active => {}
            IdleState::Idle | IdleState::Locked => {
                if self.cache.invalidate() {
                    tracing::info!(state = ?state, "Session key dropped on idle");
                }
            }
        }
    }

    /// Inactivity after which [`notify_inactivity`](Self::notify_inactivity)
    /// treats the system as idle.
    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    /// Report how long the user has been inactive. At or past the idle
    /// threshold this behaves like an [`IdleState::Idle`] notification.
    pub fn notify_inactivity(&self, idle_for: Duration) -> IdleState {
        let state = if idle_for >= self.idle_threshold {
            IdleState::Idle
        } else {
            IdleState::Active
        };
        self.notify_idle_state(state);
        state
    }

    /// Delete the stored credentials and installation key.
    pub async fn clear_credentials(&self) -> Result<()> {
        self.cache.invalidate();
        self.credentials.delete_blob().await?;
        self.store.remove(&[keys::INSTALLATION_KEY]).await?;
        tracing::info!("Credentials cleared");
        Ok(())
    }

    /// Run the one-time migration from plaintext credentials.
    ///
    /// Returns whether credentials were migrated. The migration is recorded
    /// as done even when there was nothing to migrate, so it never runs
    /// twice. Invalid legacy credentials are left untouched and reported.
    pub async fn ensure_migrated(&self) -> Result<bool> {
        if storage::load::<bool>(self.store.as_ref(), keys::CREDENTIALS_MIGRATED)
            .await?
            .unwrap_or(false)
        {
            return Ok(false);
        }

        let migrated = match self.credentials.load_legacy().await? {
            Some(legacy) => {
                legacy.validate()?;
                let passphrase = Zeroizing::new(CredentialCipher::generate_secure_passphrase());

                // The key must be stored before the plaintext disappears.
                self.store_installation_key(&passphrase).await?;
                let migrated = self
                    .credentials
                    .migrate_to_encrypted(Some(&legacy), &passphrase)
                    .await?;
                if migrated {
                    self.cache.cache(SecretString::new(passphrase.to_string()));
                    self.events
                        .log_security_event(SecurityEventKind::MigrationCompleted, json!({}))
                        .await?;
                }
                migrated
            }
            None => false,
        };

        storage::save(self.store.as_ref(), keys::CREDENTIALS_MIGRATED, &true).await?;
        Ok(migrated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::MemoryStore;

    const MINUTE: Duration = Duration::from_secs(60);

    struct Fixture {
        memory: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        cipher: Arc<CredentialCipher>,
        events: Arc<SecurityEventLog>,
        manager: SessionKeyManager,
    }

    fn fixture() -> Fixture {
        let memory = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new());
        let cipher = Arc::new(CredentialCipher::with_iterations(1_000));
        let events = Arc::new(SecurityEventLog::new(memory.clone()));
        let manager = SessionKeyManager::with_clock(
            memory.clone(),
            cipher.clone(),
            events.clone(),
            &SessionConfig::default(),
            clock.clone(),
        );
        Fixture {
            memory,
            clock,
            cipher,
            events,
            manager,
        }
    }

    fn sample() -> Credentials {
        Credentials::new("https://abc.supabase.co", "sk_live.0123456789abcdefXYZ")
    }

    #[test]
    fn test_cache_sliding_expiry() {
        let clock = Arc::new(ManualClock::new());
        let cache = SessionKeyCache::new(5 * MINUTE, clock.clone());
        cache.cache(SecretString::new("secret".into()));

        clock.advance(4 * MINUTE);
        assert!(cache.get().is_some());
        assert!(cache.touch());

        clock.advance(4 * MINUTE);
        assert!(cache.get().is_some(), "touch at 4m resets the timer");

        clock.advance(2 * MINUTE);
        assert!(cache.get().is_none(), "a plain read does not extend");
        assert!(!cache.touch());
        assert_eq!(cache.state(), SessionKeyState::NoKey);
    }

    #[test]
    fn test_cache_invalidate_and_sweep() {
        let clock = Arc::new(ManualClock::new());
        let cache = SessionKeyCache::new(5 * MINUTE, clock.clone());
        assert!(!cache.invalidate());

        cache.cache(SecretString::new("secret".into()));
        assert!(matches!(cache.state(), SessionKeyState::KeyCached { .. }));
        assert!(cache.invalidate());
        assert_eq!(cache.state(), SessionKeyState::NoKey);

        cache.cache(SecretString::new("secret".into()));
        assert!(!cache.sweep());
        clock.advance(5 * MINUTE);
        assert!(cache.sweep());
    }

    #[test]
    fn test_obfuscation_round_trip() {
        let encoded = obfuscate("Passphrase123", "install-1");
        assert_ne!(encoded, STANDARD.encode("Passphrase123"));
        let back = deobfuscate(&encoded, "install-1").unwrap();
        assert_eq!(back.expose_secret(), "Passphrase123");
        assert!(deobfuscate("not base64!", "install-1").is_none());
    }

    #[tokio::test]
    async fn test_no_blob_yields_none() {
        let f = fixture();
        assert!(f.manager.get_credentials().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_key_survives_four_minutes_and_is_recovered_after_six() {
        let f = fixture();
        f.manager.update_credentials(&sample()).await.unwrap();
        let after_update = f.cipher.derivation_count();

        f.clock.advance(4 * MINUTE);
        assert_eq!(f.manager.get_credentials().await.unwrap(), Some(sample()));
        assert!(matches!(f.manager.state(), SessionKeyState::KeyCached { .. }));

        f.clock.advance(6 * MINUTE);
        assert_eq!(f.manager.state(), SessionKeyState::NoKey);

        assert_eq!(f.manager.get_credentials().await.unwrap(), Some(sample()));
        assert!(matches!(f.manager.state(), SessionKeyState::KeyCached { .. }));
        assert_eq!(f.cipher.derivation_count(), after_update + 2);
    }

    #[tokio::test]
    async fn test_idle_and_lock_drop_key() {
        let f = fixture();
        f.manager.update_credentials(&sample()).await.unwrap();

        f.manager.notify_idle_state(IdleState::Active);
        assert!(matches!(f.manager.state(), SessionKeyState::KeyCached { .. }));

        f.manager.notify_idle_state(IdleState::Locked);
        assert_eq!(f.manager.state(), SessionKeyState::NoKey);

        // Still recoverable from the installation key.
        assert!(f.manager.get_credentials().await.unwrap().is_some());
        f.manager.notify_idle_state(IdleState::Idle);
        assert_eq!(f.manager.state(), SessionKeyState::NoKey);
    }

    #[tokio::test]
    async fn test_decryption_failure_invalidates_and_logs() {
        let f = fixture();
        f.manager.update_credentials(&sample()).await.unwrap();

        let mut blob = f.manager.credential_store().load_blob().await.unwrap().unwrap();
        blob.ciphertext[0] ^= 0xff;
        f.manager.credential_store().save_blob(&blob).await.unwrap();

        let result = f.manager.get_credentials().await;
        assert!(matches!(result, Err(Error::DecryptionFailed)));
        assert_eq!(f.manager.state(), SessionKeyState::NoKey);
        assert_eq!(
            f.events.events().last().map(|e| e.kind.clone()),
            Some(SecurityEventKind::DecryptionFailed)
        );
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_credentials() {
        let f = fixture();
        let err = f
            .manager
            .update_credentials(&Credentials::new("https://abc.supabase.co", ""))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("apiKey"));
        assert_eq!(f.cipher.derivation_count(), 0);
        assert_eq!(f.manager.state(), SessionKeyState::NoKey);
    }

    #[tokio::test]
    async fn test_installation_id_is_stable() {
        let f = fixture();
        let first = f.manager.installation_id().await.unwrap();
        let second = f.manager.installation_id().await.unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[tokio::test]
    async fn test_clear_credentials() {
        let f = fixture();
        f.manager.update_credentials(&sample()).await.unwrap();
        f.manager.clear_credentials().await.unwrap();

        assert!(!f.memory.contains(keys::ENCRYPTED_CREDENTIALS));
        assert!(!f.memory.contains(keys::INSTALLATION_KEY));
        assert_eq!(f.manager.state(), SessionKeyState::NoKey);
        assert!(f.manager.get_credentials().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_migration_runs_once() {
        let f = fixture();
        f.memory
            .set(keys::LEGACY_ENDPOINT_URL, json!("https://abc.supabase.co"))
            .await
            .unwrap();
        f.memory
            .set(keys::LEGACY_API_KEY, json!("sk_live.0123456789abcdefXYZ"))
            .await
            .unwrap();

        assert!(f.manager.ensure_migrated().await.unwrap());
        assert!(!f.memory.contains(keys::LEGACY_API_KEY));
        assert!(f.memory.contains(keys::INSTALLATION_KEY));
        assert_eq!(f.manager.get_credentials().await.unwrap(), Some(sample()));
        assert!(f
            .events
            .events()
            .iter()
            .any(|e| e.kind == SecurityEventKind::MigrationCompleted));

        assert!(!f.manager.ensure_migrated().await.unwrap());
    }

    #[tokio::test]
    async fn test_migration_without_legacy_is_recorded() {
        let f = fixture();
        assert!(!f.manager.ensure_migrated().await.unwrap());
        let flag: Option<bool> = storage::load(f.memory.as_ref(), keys::CREDENTIALS_MIGRATED)
            .await
            .unwrap();
        assert_eq!(flag, Some(true));
    }

    #[tokio::test]
    async fn test_failed_decrypt_does_not_extend_key() {
        let f = fixture();
        f.manager.update_credentials(&sample()).await.unwrap();
        let expires_before = match f.manager.state() {
            SessionKeyState::KeyCached { expires_at } => expires_at,
            SessionKeyState::NoKey => panic!("key should be cached"),
        };

        f.clock.advance(MINUTE);
        assert!(f.manager.get_credentials().await.unwrap().is_some());
        match f.manager.state() {
            SessionKeyState::KeyCached { expires_at } => assert!(expires_at > expires_before),
            SessionKeyState::NoKey => panic!("key should be cached"),
        }

        let mut blob = f.manager.credential_store().load_blob().await.unwrap().unwrap();
        blob.ciphertext[0] ^= 0xff;
        f.manager.credential_store().save_blob(&blob).await.unwrap();
        assert!(f.manager.get_credentials().await.is_err());
        assert_eq!(f.manager.state(), SessionKeyState::NoKey);
    }

    #[tokio::test]
    async fn test_inactivity_uses_idle_threshold() {
        let f = fixture();
        f.manager.update_credentials(&sample()).await.unwrap();
        assert_eq!(f.manager.idle_threshold(), MINUTE);

        assert_eq!(
            f.manager.notify_inactivity(Duration::from_secs(30)),
            IdleState::Active
        );
        assert!(matches!(f.manager.state(), SessionKeyState::KeyCached { .. }));

        assert_eq!(f.manager.notify_inactivity(MINUTE), IdleState::Idle);
        assert_eq!(f.manager.state(), SessionKeyState::NoKey);
    }

    /// Memory store that rejects writes to one key on demand.
    struct FlakyStore {
        inner: MemoryStore,
        fail_key: Mutex<Option<&'static str>>,
    }

    #[async_trait::async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
            if *self.fail_key.lock() == Some(key) {
                return Err(Error::StorageUnavailable(format!("write to {key} rejected")));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, keys: &[&str]) -> Result<()> {
            self.inner.remove(keys).await
        }
    }

    #[tokio::test]
    async fn test_failed_blob_write_keeps_previous_credentials() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            fail_key: Mutex::new(None),
        });
        let manager = SessionKeyManager::with_clock(
            store.clone(),
            Arc::new(CredentialCipher::with_iterations(1_000)),
            Arc::new(SecurityEventLog::new(store.clone())),
            &SessionConfig::default(),
            Arc::new(ManualClock::new()),
        );

        manager.update_credentials(&sample()).await.unwrap();
        let key_before = store.get(keys::INSTALLATION_KEY).await.unwrap();

        *store.fail_key.lock() = Some(keys::ENCRYPTED_CREDENTIALS);
        let replacement = Credentials::new("https://xyz.supabase.co", "sk_live.fedcba9876543210ABC");
        assert!(matches!(
            manager.update_credentials(&replacement).await,
            Err(Error::StorageUnavailable(_))
        ));
        assert_eq!(store.get(keys::INSTALLATION_KEY).await.unwrap(), key_before);

        *store.fail_key.lock() = None;
        manager.invalidate();
        assert_eq!(manager.get_credentials().await.unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn test_failed_first_write_leaves_no_installation_key() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            fail_key: Mutex::new(Some(keys::ENCRYPTED_CREDENTIALS)),
        });
        let manager = SessionKeyManager::new(
            store.clone(),
            Arc::new(CredentialCipher::with_iterations(1_000)),
            Arc::new(SecurityEventLog::new(store.clone())),
            &SessionConfig::default(),
        );

        assert!(manager.update_credentials(&sample()).await.is_err());
        assert!(!store.inner.contains(keys::INSTALLATION_KEY));
        assert_eq!(manager.state(), SessionKeyState::NoKey);
    }

    #[tokio::test]
    async fn test_storage_outage_surfaces() {
        let f = fixture();
        f.memory.set_unavailable(true);
        assert!(matches!(
            f.manager.get_credentials().await,
            Err(Error::StorageUnavailable(_))
        ));
    }
}
