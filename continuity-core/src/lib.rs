//! Continuity engine for serialized long-form fiction generation.
//!
//! This crate provides:
//! - An entity attribute ledger with change history and lock lists
//! - A human-editable foreshadowing ledger with per-chapter blocks
//! - Keyword-density relevance windows over long passages
//! - Active verification of a chapter plan against earlier chapters
//! - Consistency review of a drafted chapter against project memory
//!
//! # Quick Start
//!
//! ```ignore
//! use continuity_core::{
//!     ActiveVerifier, ChapterInfo, ClaudeGenerator, EntityCategory, EntityLedger,
//!     ForeshadowingLedger, HttpEmbedder, MemoryIndex, ProjectPaths, Section,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let paths = ProjectPaths::new("my_novel");
//!
//!     let mut ledger = EntityLedger::for_project(&paths);
//!     ledger.add_entity(EntityCategory::Character, "杨尘", [("职位", "术研院主事")], 1);
//!     println!("{}", ledger.generate_lock_list());
//!
//!     let mut threads = ForeshadowingLedger::for_project(&paths);
//!     threads.upsert(1, Section::Long, "玉佩上的裂纹与北境封印有关");
//!
//!     let index = MemoryIndex::new(Arc::new(HttpEmbedder::from_env()?));
//!     index.add_chapter(&paths.read_chapter(1)?).await?;
//!
//!     let verifier = ActiveVerifier::new(Arc::new(ClaudeGenerator::from_env()?), Arc::new(index));
//!     let outcome = verifier.run(&ChapterInfo::new(2, "百草堂夜谈")).await;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```

pub mod chapter;
pub mod error;
pub mod foreshadowing;
pub mod ledger;
pub mod project;
pub mod relevance;
pub mod review;
pub mod services;
pub mod telemetry;
pub mod testing;
pub mod verify;

// Primary public API
pub use chapter::{ChapterInfo, ChapterRange};
pub use error::{ParseError, ProjectError, StorageError, UpstreamError, ValidationError};
pub use foreshadowing::{ChapterBlock, ForeshadowingLedger, Section, UpsertOutcome};
pub use ledger::{
    analyze_chapter, AttributeChange, AttributeConflict, Entity, EntityCategory, EntityExtractor,
    EntityLedger,
};
pub use project::ProjectPaths;
pub use relevance::{extract_relevant_segment, RelevanceExtractor};
pub use review::{ConsistencyChecker, ReviewContext, ReviewOutcome};
pub use services::{
    ClaudeConfig, ClaudeGenerator, Embedder, EmbeddingConfig, HttpEmbedder, MemoryIndex,
    PassageIndex, TextGenerator,
};
pub use verify::{ActiveVerifier, Constraint, VerificationConfig, VerificationOutcome};
