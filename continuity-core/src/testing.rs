//! Testing utilities for the continuity engine.
//!
//! This module provides deterministic stand-ins for the external services:
//! - `ScriptedGenerator` replays queued responses and records prompts
//! - `FailingGenerator` fails every call
//! - `StaticIndex` answers searches from keyword-matched passages

use crate::error::UpstreamError;
use crate::services::{PassageIndex, TextGenerator};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// A scripted reply: text, or an error message.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Failure(String),
}

/// A generator that returns scripted replies in order.
///
/// Use this for deterministic tests without API calls. Once the script
/// runs out every call fails.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<ScriptedReply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    /// Create a generator replying with `replies` in order.
    pub fn new<S: Into<String>>(replies: impl IntoIterator<Item = S>) -> Self {
        Self::from_script(replies.into_iter().map(|r| ScriptedReply::Text(r.into())))
    }

    /// Create a generator from a mixed script of replies and failures.
    pub fn from_script(script: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(script.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    /// Number of calls made so far.
    pub async fn call_count(&self) -> usize {
        self.prompts.lock().await.len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        self.prompts.lock().await.push(prompt.to_string());

        match self.replies.lock().await.pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Failure(message)) => Err(UpstreamError::Service(message)),
            None => Err(UpstreamError::Service("script exhausted".to_string())),
        }
    }
}

/// A generator whose every call fails with a network error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, UpstreamError> {
        Err(UpstreamError::Network("connection refused".to_string()))
    }
}

/// A passage index answering from a fixed keyword table.
///
/// A query gets the passages of every entry whose keyword it contains, in
/// table order, truncated to `k`.
#[derive(Debug, Default, Clone)]
pub struct StaticIndex {
    entries: Vec<(String, Vec<String>)>,
    failing: bool,
}

impl StaticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index whose every search fails.
    pub fn failing() -> Self {
        Self {
            entries: Vec::new(),
            failing: true,
        }
    }

    /// Add passages returned for queries containing `keyword`.
    pub fn with_passages<S: Into<String>>(
        mut self,
        keyword: impl Into<String>,
        passages: impl IntoIterator<Item = S>,
    ) -> Self {
        self.entries
            .push((keyword.into(), passages.into_iter().map(Into::into).collect()));
        self
    }
}

#[async_trait]
impl PassageIndex for StaticIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<String>, UpstreamError> {
        if self.failing {
            return Err(UpstreamError::Service("index unavailable".to_string()));
        }
        Ok(self
            .entries
            .iter()
            .filter(|(keyword, _)| query.contains(keyword.as_str()))
            .flat_map(|(_, passages)| passages.iter().cloned())
            .take(k)
            .collect())
    }
}
