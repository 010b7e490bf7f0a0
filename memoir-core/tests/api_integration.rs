//! Integration tests that call a real completions API.
//!
//! These tests require COMPLETIONS_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p memoir-core --test api_integration -- --ignored`
//!
//! These are marked #[ignore] by default to avoid:
//! - API costs in CI
//! - Test failures when no API key is available
//! - Slow test runs (API calls take seconds)

use memoir_core::{EngineConfig, MemoryEngine, Turn};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("COMPLETIONS_API_KEY").is_ok()
}

#[tokio::test]
#[ignore] // Run with: cargo test -p memoir-core --test api_integration -- --ignored
async fn test_live_summary_produces_record() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: COMPLETIONS_API_KEY not set");
        return;
    }

    let provider = completions::Client::from_env().expect("Failed to create client");
    let mut engine = MemoryEngine::new(provider, EngineConfig::default());

    engine.push_turn(Turn::user(
        "I finally admit it: I was the one who burned the mill, \
         and I buried the deed box under the old oak.",
    ));
    engine.drive().await;

    let record = engine.record(0).expect("summary should produce a record");
    assert!(!record.text.is_empty(), "summary text should not be empty");

    println!("Summary: {}", record.text);
    println!("Base importance: {}", record.base_importance);
    println!("Topics: {:?}", record.topics);
    println!("Characters: {:?}", record.characters);
    println!("Core memory: {}", record.is_core_memory);

    // Whether the model emits bracketed annotations is up to the model,
    // so we log rather than assert on them. The parse must still have
    // produced a usable importance.
    assert!((1..=10).contains(&record.base_importance));
}

#[tokio::test]
#[ignore]
async fn test_live_exchange_pairs_and_injects() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: COMPLETIONS_API_KEY not set");
        return;
    }

    let provider = completions::Client::from_env().expect("Failed to create client");
    let mut engine = MemoryEngine::new(provider, EngineConfig::default());

    engine.push_turn(Turn::user("Marcus, where did you hide the amulet?"));
    engine.push_turn(Turn::character(
        "Marcus",
        "Somewhere you will never look. Stop asking before someone overhears us.",
    ));
    engine.push_turn(Turn::user("Fine. But this conversation is not over."));
    engine.drive().await;

    println!("Records after drive: {}", engine.stats().records);
    assert!(engine.is_summarized(0), "first unit should be summarized");

    let injection = engine.compose_injection(1200).await;
    println!("Injection:\n{injection}");

    // Content wording is model-dependent; shape is not.
    if !injection.is_empty() {
        assert!(injection.starts_with("[Story memory]"));
    }
}
