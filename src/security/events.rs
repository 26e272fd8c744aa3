//! Bounded security event log.
//!
//! Every blocked or suspicious item is recorded as a [`SecurityEvent`] in a
//! ring of at most [`SECURITY_EVENT_CAPACITY`] entries (oldest evicted
//! first), persisted under [`keys::SECURITY_EVENTS`], and emitted as a
//! warning on the `chatvault::security` tracing target.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::storage::{self, keys, KeyValueStore};

/// Maximum number of events retained.
pub const SECURITY_EVENT_CAPACITY: usize = 100;

/// Kind of security event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SecurityEventKind {
    /// Content matched the XSS classifier.
    XssDetected,
    /// A URL with a dangerous scheme was replaced.
    UrlBlocked,
    /// Stored credentials could not be decrypted.
    DecryptionFailed,
    /// Legacy plaintext credentials were encrypted.
    MigrationCompleted,
    /// Legacy plaintext credentials were invalid and left in place.
    MigrationSkipped,
    /// Any other caller-defined kind.
    Custom(String),
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityEventKind::XssDetected => write!(f, "xss_detected"),
            SecurityEventKind::UrlBlocked => write!(f, "url_blocked"),
            SecurityEventKind::DecryptionFailed => write!(f, "decryption_failed"),
            SecurityEventKind::MigrationCompleted => write!(f, "migration_completed"),
            SecurityEventKind::MigrationSkipped => write!(f, "migration_skipped"),
            SecurityEventKind::Custom(kind) => f.write_str(kind),
        }
    }
}

impl From<String> for SecurityEventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "xss_detected" => SecurityEventKind::XssDetected,
            "url_blocked" => SecurityEventKind::UrlBlocked,
            "decryption_failed" => SecurityEventKind::DecryptionFailed,
            "migration_completed" => SecurityEventKind::MigrationCompleted,
            "migration_skipped" => SecurityEventKind::MigrationSkipped,
            _ => SecurityEventKind::Custom(s),
        }
    }
}

impl From<&str> for SecurityEventKind {
    fn from(s: &str) -> Self {
        SecurityEventKind::from(s.to_string())
    }
}

impl From<SecurityEventKind> for String {
    fn from(kind: SecurityEventKind) -> Self {
        kind.to_string()
    }
}

/// A recorded security event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: SecurityEventKind,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Free-form structured details. Never contains secrets.
    pub details: Value,
    /// Always true: events record something that was blocked or neutralized.
    pub blocked: bool,
}

/// Append-only ring of security events backed by the persistent store.
pub struct SecurityEventLog {
    store: Arc<dyn KeyValueStore>,
    ring: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    persist_lock: tokio::sync::Mutex<()>,
}

impl SecurityEventLog {
    /// Create an empty log. Previously stored events are overwritten on the
    /// next persist; use [`SecurityEventLog::load`] to keep them.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            ring: Mutex::new(VecDeque::with_capacity(SECURITY_EVENT_CAPACITY)),
            capacity: SECURITY_EVENT_CAPACITY,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a log seeded with the events already in the store.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let stored: Vec<SecurityEvent> = storage::load(store.as_ref(), keys::SECURITY_EVENTS)
            .await?
            .unwrap_or_default();
        let log = Self::new(store);
        {
            let mut ring = log.ring.lock();
            let skip = stored.len().saturating_sub(log.capacity);
            ring.extend(stored.into_iter().skip(skip));
        }
        Ok(log)
    }

    /// Record an event in memory and emit it as a warning.
    pub fn record(&self, kind: impl Into<SecurityEventKind>, details: Value) -> SecurityEvent {
        let event = SecurityEvent {
            kind: kind.into(),
            timestamp: Utc::now(),
            details,
            blocked: true,
        };

        tracing::warn!(
            target: "chatvault::security",
            kind = %event.kind,
            details = %event.details,
            "Security event"
        );

        let mut ring = self.ring.lock();
        while ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(event.clone());
        event
    }

    /// Write the current ring to the store.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.events();
        storage::save(self.store.as_ref(), keys::SECURITY_EVENTS, &snapshot).await
    }

    /// Record an event and persist the ring.
    pub async fn log_security_event(
        &self,
        kind: impl Into<SecurityEventKind>,
        details: Value,
    ) -> Result<SecurityEvent> {
        let event = self.record(kind, details);
        self.persist().await?;
        Ok(event)
    }

    /// Record an event and persist it on the current Tokio runtime without
    /// waiting. Outside a runtime the event stays in memory until the next
    /// [`SecurityEventLog::persist`].
    pub fn log_in_background(self: &Arc<Self>, kind: impl Into<SecurityEventKind>, details: Value) {
        self.record(kind, details);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let log = Arc::clone(self);
            handle.spawn(async move {
                if let Err(e) = log.persist().await {
                    tracing::error!(error = %e, "Failed to persist security events");
                }
            });
        }
    }

    /// Events currently retained, oldest first.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.ring.lock().iter().cloned().collect()
    }

    /// Number of events retained.
    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// Remove all events from memory and storage.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        self.ring.lock().clear();
        self.store.remove(&[keys::SECURITY_EVENTS]).await
    }
}
