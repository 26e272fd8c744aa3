//! # chatvault
//!
//! Security layer for capturing AI chat conversations from third-party web
//! pages.
//!
//! Captured content is untrusted HTML. Before it is stored, displayed or
//! sent to a remote API it passes through a profile-based sanitizer that
//! strips known script-execution vectors unconditionally and then keeps only
//! allow-listed markup. The API credentials for the remote store are kept
//! encrypted at rest and decrypted on demand with a passphrase that lives
//! in memory only for a short sliding window.
//!
//! ## Features
//!
//! - **Sanitization profiles**: `strict` (escaped text), `message` (inline
//!   formatting), `display` (richer markup with class allow-list)
//! - **XSS detection**: heuristic classifier with security event logging
//! - **URL validation**: dangerous schemes replaced, trusted origins checked
//! - **Credential encryption**: AES-256-GCM with PBKDF2-HMAC-SHA256 keys
//! - **Session keys**: sliding five-minute expiry, dropped on idle or lock
//! - **Migration**: one-time move from plaintext to encrypted credentials
//!
//! ## Security Considerations
//!
//! - Sanitization is heuristic. Treat the pattern list as a floor, not a
//!   proof of XSS immunity for every encoding.
//! - The installation key that lets the session passphrase survive restarts
//!   is obfuscated, not encrypted. It only defeats casual inspection of the
//!   storage file.
//! - Decrypted [`Credentials`] are wiped on drop; callers should not keep
//!   them beyond one request.
//!
//! ## Example
//!
//! ```rust,ignore
//! use chatvault::{ChatVault, Credentials, RawMessage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let vault = ChatVault::new().await?;
//!
//!     let message = vault.capture(&RawMessage {
//!         role: Some("assistant".into()),
//!         content: Some("<p>Hi <script>steal()</script>there</p>".into()),
//!         ..Default::default()
//!     });
//!     assert_eq!(message.content, "Hi there");
//!
//!     vault
//!         .update_credentials(&Credentials::new("https://abc.supabase.co", "sk_live.0123456789abcdef"))
//!         .await?;
//!     let credentials = vault.credentials().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod security;
pub mod session;
pub mod storage;
pub mod vault;

pub use config::Config;
pub use credentials::{CredentialStore, Credentials, EncryptedCredentialBlob};
pub use error::{Error, Result};
pub use security::{
    CredentialCipher, RawMessage, SanitizationProfile, SanitizedMessage, Sanitizer,
    SecurityEvent, SecurityEventKind, SecurityEventLog, UrlVerdict, XssDetector,
};
pub use session::{Clock, IdleState, ManualClock, SessionKeyManager, SessionKeyState, SystemClock};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
pub use vault::{ChatVault, ChatVaultBuilder};
