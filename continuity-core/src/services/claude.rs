//! Text generation over Anthropic's Messages API.

use super::{clean_response, TextGenerator};
use crate::error::UpstreamError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Connection and sampling settings for [`ClaudeGenerator`].
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
    pub base_url: String,
}

impl ClaudeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            temperature: None,
            timeout_secs: 120,
            base_url: API_BASE.to_string(),
        }
    }

    /// Read the API key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, UpstreamError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| UpstreamError::NoApiKey("ANTHROPIC_API_KEY"))?;
        Ok(Self::new(api_key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Single-turn, text-only completions.
#[derive(Clone)]
pub struct ClaudeGenerator {
    client: reqwest::Client,
    config: ClaudeConfig,
}

impl ClaudeGenerator {
    pub fn new(config: ClaudeConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| UpstreamError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, UpstreamError> {
        Self::new(ClaudeConfig::from_env()?)
    }

    pub fn config(&self) -> &ClaudeConfig {
        &self.config
    }

    fn build_headers(&self) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|e| UpstreamError::Config(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: vec![ApiMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
        }
    }
}

#[async_trait]
impl TextGenerator for ClaudeGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        debug!("Claude prompt ({} chars)", prompt.chars().count());

        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .headers(self.build_headers()?)
            .json(&self.build_request(prompt))
            .send()
            .await
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Parse(e.to_string()))?;

        let text = collect_text(api_response);
        debug!("Claude response: {text}");
        Ok(clean_response(&text))
    }
}

fn collect_text(response: ApiResponse) -> String {
    response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ApiContent::Text { text } => Some(text),
            ApiContent::Other => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

// API types (internal)

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let generator =
            ClaudeGenerator::new(ClaudeConfig::new("test-key").with_temperature(0.2)).unwrap();
        let body = serde_json::to_value(generator.build_request("杨尘的职位？")).unwrap();

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "杨尘的职位？");
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_response_keeps_only_text() {
        let json = r#"{
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "第一段"},
                {"type": "text", "text": "第二段"}
            ],
            "stop_reason": "end_turn"
        }"#;
        let response: ApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(collect_text(response), "第一段第二段");
    }

    #[test]
    fn test_invalid_key_is_config_error() {
        let generator = ClaudeGenerator::new(ClaudeConfig::new("bad\nkey")).unwrap();
        assert!(matches!(generator.build_headers(), Err(UpstreamError::Config(_))));
    }
}
