//! External capabilities the engine consumes.
//!
//! Text generation, embedding, and passage search are traits so the
//! verification pipeline and entity extraction can run against real HTTP
//! services or the scripted doubles in [`crate::testing`].

mod claude;
mod embedding;
mod index;

pub use claude::{ClaudeConfig, ClaudeGenerator};
pub use embedding::{EmbeddingConfig, HttpEmbedder};
pub use index::MemoryIndex;

use crate::error::UpstreamError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think pattern is valid"));

/// A prompt-in, text-out generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError>;
}

/// Turns texts into embedding vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed each text; the output has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError>;
}

/// Semantic search over previously written passages.
#[async_trait]
pub trait PassageIndex: Send + Sync {
    /// Up to `k` passages, most similar first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, UpstreamError>;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        (**self).generate(prompt).await
    }
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for &T {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        (**self).generate(prompt).await
    }
}

#[async_trait]
impl<T: PassageIndex + ?Sized> PassageIndex for Arc<T> {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, UpstreamError> {
        (**self).search(query, k).await
    }
}

/// Strip reasoning blocks and code fences from a model response.
pub fn clean_response(text: &str) -> String {
    let without_thinking = THINK_BLOCK.replace_all(text, "");
    extract_fenced(&without_thinking).to_string()
}

/// The body of the first fenced block, or the trimmed text if unfenced.
pub fn extract_fenced(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        // skip a language tag on the opening fence line
        let body_start = match after.find('\n') {
            Some(newline)
                if after[..newline]
                    .trim()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric()) =>
            {
                newline + 1
            }
            _ => 0,
        };
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }

    text
}
