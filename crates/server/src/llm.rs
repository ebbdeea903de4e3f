//! Chat-model client for AI-backed stages
//!
//! Speaks the OpenAI-compatible chat-completions protocol; the configured
//! base URL selects the actual provider. Structured calls ask the model for
//! a JSON document and re-type it, tolerating code fences around the body.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// LLM client errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API key required for model calls")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request failed (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Empty completion from model")]
    EmptyCompletion,

    #[error("Failed to parse model output: {0}")]
    Parse(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Chat-model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            base_url: "https://api.deepseek.com/v1".to_string(),
            api_key: None,
            temperature: None,
            timeout_seconds: 120,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat client
pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// One system + user exchange, returning the raw completion text
    pub async fn chat(&self, system: &str, user: &str) -> LlmResult<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(LlmError::MissingApiKey)?;

        let url = format!("{}/chat/completions", self.config.base_url);
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature: self.config.temperature,
        };

        debug!("chat completion via {} ({})", url, self.config.model);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::Parse(e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::EmptyCompletion)?;
        trace!("completion: {} chars", content.len());
        Ok(content)
    }

    /// Chat call whose completion is parsed as a JSON document of type `T`
    pub async fn chat_structured<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
    ) -> LlmResult<T> {
        let completion = self.chat(system, user).await?;
        let body = extract_json(&completion);
        serde_json::from_str(body).map_err(|e| LlmError::Parse(e.to_string()))
    }
}

/// Locate the JSON document inside a completion, stripping code fences and
/// surrounding prose
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();

    // Fenced block takes priority: ```json ... ``` or bare ``` ... ```
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }

    // Otherwise take the outermost braces
    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            return &trimmed[open..=close];
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackscope_common::TestScenarioList;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"scenarios\": []}\n```\nDone.";
        assert_eq!(extract_json(text), "{\"scenarios\": []}");
    }

    #[test]
    fn test_extract_json_from_bare_fence() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_from_prose() {
        let text = "The result is {\"scenarios\": [] } as requested.";
        let body = extract_json(text);
        let parsed: TestScenarioList = serde_json::from_str(body).unwrap();
        assert!(parsed.scenarios.is_empty());
    }

    #[tokio::test]
    async fn test_missing_api_key_rejected() {
        let client = LlmClient::new(LlmConfig::default()).unwrap();
        let err = client.chat("s", "u").await.unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
    }
}
