//! Content sanitization and credential protection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Sanitizer                         │
//! │                                                          │
//! │  Input ──► strip dangerous patterns (fixed point)        │
//! │        ──► parse into nodes ──► ProfilePolicy filter     │
//! │        ──► serialize / escape ──► strip again ──► Output │
//! │                                                          │
//! │  XssDetector ──► SecurityEventLog (bounded, persisted)   │
//! └──────────────────────────────────────────────────────────┘
//!
//!   Credentials ──► CredentialCipher (PBKDF2 + AES-256-GCM)
//!               ──► EncryptedCredentialBlob
//! ```
//!
//! # Modules
//!
//! - [`patterns`] - Compiled regex patterns (lazy-initialized)
//! - [`detectors`] - Core trait and types for detectors
//! - [`xss`] - XSS heuristic classifier
//! - [`html`] - HTML fragment parsing (via `scraper`) into a generic node tree, and serialization
//! - [`profile`] - Sanitization profiles and their allow-lists
//! - [`sanitizer`] - Sanitization engine
//! - [`events`] - Security event log
//! - [`encryption`] - Credential encryption

pub mod detectors;
pub mod encryption;
pub mod events;
pub mod html;
pub mod patterns;
pub mod profile;
pub mod sanitizer;
pub mod xss;

// Re-export primary types for convenience
pub use detectors::{Detector, Finding, Severity};
pub use encryption::{CredentialCipher, DerivedKey};
pub use events::{SecurityEvent, SecurityEventKind, SecurityEventLog};
pub use profile::{ProfilePolicy, SanitizationProfile};
pub use sanitizer::{
    sanitize_conversation_id, strip_dangerous, RawMessage, SanitizedMessage, Sanitizer,
    UrlCheck, UrlVerdict,
};
pub use xss::XssDetector;
