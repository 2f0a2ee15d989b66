//! Tests against the live generation API.
//!
//! Run with: `cargo test -p continuity-core --test api_integration -- --ignored --nocapture`
//!
//! These tests require ANTHROPIC_API_KEY to be set.

use continuity_core::testing::StaticIndex;
use continuity_core::{ActiveVerifier, ChapterInfo, ClaudeConfig, ClaudeGenerator, EntityExtractor};
use std::sync::Arc;

fn setup() {
    let _ = dotenvy::dotenv();
}

fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

#[tokio::test]
#[ignore]
async fn test_live_entity_extraction() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let generator = ClaudeGenerator::new(ClaudeConfig::from_env().unwrap().with_temperature(0.0))
        .expect("Failed to build generator");
    let extractor = EntityExtractor::new(generator);

    let text = "杨尘推开百草堂的木门。自从升任术研院主事，他已有半月未来。\
                林婉站在药柜前，腰间那枚碧绿玉佩上多了一道细细的裂纹。";
    let entities = extractor.try_extract(text).await.expect("Extraction failed");

    println!("Extracted: {entities:#?}");
    assert!(entities.iter().any(|e| e.name == "杨尘"));
}

#[tokio::test]
#[ignore]
async fn test_live_verification() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let generator = ClaudeGenerator::new(ClaudeConfig::from_env().unwrap().with_temperature(0.3))
        .expect("Failed to build generator");
    let index =
        StaticIndex::new().with_passages("杨尘", ["第三章：杨尘升任术研院主事，掌管典籍。"]);
    let verifier = ActiveVerifier::new(Arc::new(generator), Arc::new(index));

    let chapter = ChapterInfo::new(4, "典籍失窃")
        .with_characters("杨尘")
        .with_summary("术研院典籍失窃，杨尘奉命追查");
    let outcome = verifier.run(&chapter).await;

    println!("{outcome}");
    assert!(!outcome.is_degraded());
}
