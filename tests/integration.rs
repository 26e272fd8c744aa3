//! Integration tests for chatvault.
//!
//! Everything runs against in-memory or temporary-file storage.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use chatvault::security::encryption::CredentialCipher;
use chatvault::storage::keys;
use chatvault::{
    ChatVault, Config, Credentials, Error, IdleState, JsonFileStore, KeyValueStore, ManualClock,
    MemoryStore, RawMessage, SanitizationProfile, Sanitizer, SecurityEventKind, SessionKeyState,
    UrlVerdict,
};

fn credentials() -> Credentials {
    Credentials::new("https://abc.supabase.co", "sk_live.0123456789abcdefXYZ")
}

fn fast_cipher() -> Arc<CredentialCipher> {
    Arc::new(CredentialCipher::with_iterations(1_000))
}

// ============================================================================
// Sanitization Tests
// ============================================================================

#[test]
fn test_script_content_never_survives() {
    let sanitizer = Sanitizer::new();
    let inputs = [
        "before<script>alert('x')</script>after",
        "before<SCRIPT type=\"text/javascript\">alert('x')</SCRIPT >after",
        "before<script src=//evil.example></script>after",
    ];
    for input in inputs {
        let out = sanitizer.sanitize(input, SanitizationProfile::Strict);
        assert!(!out.to_lowercase().contains("<script"), "{out}");
        assert!(!out.contains("alert"), "{out}");
        assert!(out.starts_with("before") && out.ends_with("after"), "{out}");
    }
}

#[test]
fn test_profiles_parse_by_name() {
    assert_eq!("display".parse::<SanitizationProfile>().unwrap(), SanitizationProfile::Display);
    assert!(matches!(
        "lenient".parse::<SanitizationProfile>(),
        Err(Error::UnknownProfile(_))
    ));
}

#[test]
fn test_display_keeps_allowed_classes_only() {
    let sanitizer = Sanitizer::new();
    let out = sanitizer.sanitize_for_display(
        r#"<div class="message-user evil"><span class="timestamp">10:00</span> hi</div>"#,
    );
    assert_eq!(
        out,
        r#"<div class="message-user"><span class="timestamp">10:00</span> hi</div>"#
    );
}

#[test]
fn test_url_policy() {
    let sanitizer = Sanitizer::new();
    assert_eq!(sanitizer.sanitize_url("javascript:alert(1)"), "about:blank");
    assert_eq!(sanitizer.sanitize_url("https://example.com"), "https://example.com");
    assert_eq!(
        sanitizer.classify_url("https://claude.ai/chat/abc").verdict,
        UrlVerdict::Trusted
    );
    assert_eq!(
        sanitizer.classify_url("https://example.com").verdict,
        UrlVerdict::Untrusted
    );
}

#[test]
fn test_storage_limit() {
    let sanitizer = Sanitizer::new();
    let out = sanitizer.sanitize_for_storage(&"x".repeat(60_000));
    assert!(out.chars().count() <= 50_050);
    assert!(out.contains("[truncated]"));
}

#[test]
fn test_batch_of_captured_messages() {
    let sanitizer = Sanitizer::new();
    let batch = sanitizer.sanitize_batch(&[
        RawMessage {
            role: Some("user".into()),
            content: Some("What is <b>Rust</b>?".into()),
            conversation_id: Some("c-1/../2".into()),
            ..Default::default()
        },
        RawMessage::default(),
    ]);
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].content, "What is Rust?");
    assert_eq!(batch[0].conversation_id.as_deref(), Some("c-12"));
    assert_eq!(batch[1].content, "");
}

// ============================================================================
// Credential Encryption Tests
// ============================================================================

#[tokio::test]
async fn test_encrypt_decrypt_round_trip() {
    let cipher = CredentialCipher::with_iterations(1_000);
    let blob = cipher
        .encrypt_credentials(&credentials(), "a passphrase")
        .await
        .unwrap();

    let json = serde_json::to_value(&blob).unwrap();
    for field in ["ciphertext", "salt", "iv", "version", "algorithm", "createdAt"] {
        assert!(json.get(field).is_some(), "missing {field}");
    }

    let back = cipher.decrypt_credentials(&blob, "a passphrase").await.unwrap();
    assert_eq!(back, credentials());
    assert!(matches!(
        cipher.decrypt_credentials(&blob, "another").await,
        Err(Error::DecryptionFailed)
    ));
}

#[tokio::test]
async fn test_default_cipher_uses_full_iteration_count() {
    let cipher = CredentialCipher::from_config(&Config::default().crypto);
    assert_eq!(cipher.iterations(), 100_000);
    let blob = cipher.encrypt_credentials(&credentials(), "p").await.unwrap();
    assert_eq!(cipher.decrypt_credentials(&blob, "p").await.unwrap(), credentials());
}

// ============================================================================
// Session and Vault Tests
// ============================================================================

#[tokio::test]
async fn test_vault_session_lifecycle() {
    let memory = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new());
    let vault = ChatVault::builder()
        .with_store(memory.clone())
        .with_cipher(fast_cipher())
        .with_clock(clock.clone())
        .build()
        .await
        .unwrap();

    vault.update_credentials(&credentials()).await.unwrap();
    assert!(matches!(vault.session().state(), SessionKeyState::KeyCached { .. }));

    clock.advance(Duration::from_secs(4 * 60));
    assert_eq!(vault.credentials().await.unwrap(), Some(credentials()));

    clock.advance(Duration::from_secs(6 * 60));
    assert_eq!(vault.session().state(), SessionKeyState::NoKey);
    assert_eq!(vault.credentials().await.unwrap(), Some(credentials()));

    vault.notify_idle_state(IdleState::Locked);
    assert_eq!(vault.session().state(), SessionKeyState::NoKey);
}

#[tokio::test]
async fn test_legacy_credentials_migrated_on_open() {
    let memory = Arc::new(MemoryStore::new());
    memory
        .set(keys::LEGACY_ENDPOINT_URL, json!("https://abc.supabase.co"))
        .await
        .unwrap();
    memory
        .set(keys::LEGACY_API_KEY, json!("sk_live.0123456789abcdefXYZ"))
        .await
        .unwrap();

    let vault = ChatVault::builder()
        .with_store(memory.clone())
        .with_cipher(fast_cipher())
        .build()
        .await
        .unwrap();

    assert!(!memory.contains(keys::LEGACY_ENDPOINT_URL));
    assert!(!memory.contains(keys::LEGACY_API_KEY));
    assert!(memory.contains(keys::ENCRYPTED_CREDENTIALS));
    assert_eq!(vault.credentials().await.unwrap(), Some(credentials()));
    assert!(vault
        .events()
        .events()
        .iter()
        .any(|e| e.kind == SecurityEventKind::MigrationCompleted));
}

#[tokio::test]
async fn test_file_store_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    {
        let vault = ChatVault::builder()
            .with_store(Arc::new(JsonFileStore::new(&path)))
            .with_cipher(fast_cipher())
            .build()
            .await
            .unwrap();
        vault.update_credentials(&credentials()).await.unwrap();
        vault.sanitizer().sanitize_url("vbscript:msgbox(1)");
        vault.close().await.unwrap();
    }

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("0123456789abcdefXYZ"));

    let vault = ChatVault::builder()
        .with_store(Arc::new(JsonFileStore::new(&path)))
        .with_cipher(fast_cipher())
        .build()
        .await
        .unwrap();
    assert_eq!(vault.credentials().await.unwrap(), Some(credentials()));
    assert!(vault
        .events()
        .events()
        .iter()
        .any(|e| e.kind == SecurityEventKind::UrlBlocked));
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chatvault.toml");

    let config = Config::builder()
        .max_storage_length(10_000)
        .trust_origin("example.org")
        .build();
    config.save(&path).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    assert_eq!(loaded.sanitizer.max_storage_length, 10_000);
    assert!(loaded
        .sanitizer
        .trusted_origins
        .iter()
        .any(|o| o == "example.org"));
}
