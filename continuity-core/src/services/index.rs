//! In-memory cosine-similarity passage index.

use super::{Embedder, PassageIndex};
use crate::error::UpstreamError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Target size of a chunk when splitting chapter text.
const CHUNK_CHARS: usize = 500;

struct Passage {
    text: String,
    vector: Vec<f32>,
}

/// Passages embedded up front and searched by cosine similarity.
///
/// Suitable for a project's own chapters; larger corpora belong in an
/// external vector store behind [`PassageIndex`].
pub struct MemoryIndex {
    embedder: Arc<dyn Embedder>,
    passages: RwLock<Vec<Passage>>,
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            passages: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.passages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.passages.read().await.is_empty()
    }

    /// Embed and store passages. Blank passages are dropped.
    pub async fn add_passages(&self, passages: Vec<String>) -> Result<usize, UpstreamError> {
        let passages: Vec<String> = passages
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect();
        if passages.is_empty() {
            return Ok(0);
        }

        let vectors = self.embedder.embed(&passages).await?;
        if vectors.len() != passages.len() {
            return Err(UpstreamError::Service(format!(
                "embedder returned {} vectors for {} passages",
                vectors.len(),
                passages.len()
            )));
        }

        let added = passages.len();
        let mut stored = self.passages.write().await;
        stored.extend(
            passages
                .into_iter()
                .zip(vectors)
                .map(|(text, vector)| Passage { text, vector }),
        );
        debug!("Indexed {added} passages ({} total)", stored.len());
        Ok(added)
    }

    /// Split chapter text into paragraph chunks and index them.
    pub async fn add_chapter(&self, text: &str) -> Result<usize, UpstreamError> {
        self.add_passages(chunk_paragraphs(text, CHUNK_CHARS)).await
    }
}

#[async_trait]
impl PassageIndex for MemoryIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, UpstreamError> {
        if k == 0 || self.is_empty().await {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::Service("embedder returned no vector".to_string()))?;

        let stored = self.passages.read().await;
        let mut scored: Vec<(f32, &Passage)> = stored
            .iter()
            .map(|p| (cosine_similarity(&query_vector, &p.vector), p))
            .collect();
        // stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, p)| p.text.clone())
            .collect())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Group paragraphs into chunks of roughly `max_chars` characters.
///
/// A single paragraph longer than `max_chars` becomes its own chunk.
fn chunk_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for paragraph in text.split('\n').map(str::trim).filter(|p| !p.is_empty()) {
        let len = paragraph.chars().count();
        if current_len > 0 && current_len + len > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push('\n');
        }
        current.push_str(paragraph);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
