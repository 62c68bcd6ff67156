//! Language-model capability
//!
//! The core only ever needs "prompt in, text out". `LanguageModel` is that
//! seam; `LlmClient` implements it against an OpenAI-compatible
//! chat-completions endpoint.

use crate::config::AppConfig;
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use tracing::debug;

/// Per-call sampling options.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1000,
        }
    }
}

impl GenerationOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            ..Self::default()
        }
    }
}

/// Accepts a prompt and returns generated text. The text may contain code
/// fences or prose; callers sanitize it.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http: reqwest::Client::new(),
        }
    }

    /// Builds a client from configuration; a missing key makes the model
    /// path unavailable rather than failing later on every call.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AssistantError::UpstreamUnavailable("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self::new(api_key, config.base_url.clone(), config.model.clone()))
    }

    async fn call_llm(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a precise assistant for a customer-data analytics tool. Follow the requested output format exactly."},
                {"role": "user", "content": prompt}
            ],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens
        });

        debug!("LLM request to {} ({} prompt chars)", self.model, prompt.len());

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if !status.is_success() {
            let message = response_json["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(AssistantError::Llm(format!("LLM API returned {}: {}", status, message)));
        }

        if let Some(error) = response_json.get("error").filter(|e| !e.is_null()) {
            return Err(AssistantError::Llm(format!("LLM API error: {}", error)));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AssistantError::Llm("No content in LLM response".to_string()))?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        self.call_llm(prompt, options).await
    }
}

/// Stand-in used when no model client could be built. Every call fails
/// with `UpstreamUnavailable`, which sends the translator straight to its
/// model-free tiers and the orchestrator to its fixed replies.
#[derive(Debug, Clone)]
pub struct UnavailableModel {
    reason: String,
}

impl UnavailableModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
impl LanguageModel for UnavailableModel {
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String> {
        Err(AssistantError::UpstreamUnavailable(self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_model_always_fails() {
        let model = UnavailableModel::new("no key");
        let err = model.generate("hi", &GenerationOptions::default()).await.unwrap_err();
        assert!(matches!(err, AssistantError::UpstreamUnavailable(ref m) if m == "no key"));
    }

    #[test]
    fn test_missing_key_is_upstream_unavailable() {
        let mut config = AppConfig::from_env().unwrap();
        config.api_key = None;
        match LlmClient::from_config(&config) {
            Err(AssistantError::UpstreamUnavailable(msg)) => assert!(msg.contains("OPENAI_API_KEY")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("client should not build without a key"),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = LlmClient::new("k".into(), "http://localhost:8080/v1/".into(), "m".into());
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
