use super::{Completion, GenerationRequest, LLMError, LLMProvider};
use crate::config::OpenAIConfig;
use async_trait::async_trait;
use sdk::types::TokenUsage;
use serde_json::json;

/// OpenAI-compatible chat completions provider
///
/// The API key is read once from the environment variable named by
/// `api_key_env`; it is never written to config or run artifacts.
pub struct OpenAIProvider {
    config: OpenAIConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: OpenAIConfig, api_key: Option<String>) -> Self {
        Self {
            config,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env(config: OpenAIConfig) -> Self {
        let api_key = std::env::var(&config.api_key_env).ok();
        Self::new(config, api_key)
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn check_health(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, request: &GenerationRequest) -> super::Result<Completion> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            LLMError::AuthenticationFailed(format!(
                "environment variable {} is not set",
                self.config.api_key_env
            ))
        })?;

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let mut api_messages = Vec::new();
        if !request.system.is_empty() {
            api_messages.push(json!({ "role": "system", "content": request.system }));
        }
        api_messages.push(json!({ "role": "user", "content": request.prompt }));

        let payload = json!({
            "model": self.config.model,
            "messages": api_messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LLMError::AuthenticationFailed(text));
            } else if status.as_u16() == 429 {
                return Err(LLMError::RateLimitExceeded);
            } else if status.is_server_error() {
                return Err(LLMError::ProviderUnavailable(format!("{}: {}", status, text)));
            } else {
                return Err(LLMError::InvalidRequest(text));
            }
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))?;

        let usage = data.get("usage");
        let count = |key: &str| {
            usage
                .and_then(|u| u.get(key))
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
        };
        let model = data
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.config.model);

        Ok(Completion {
            text: content.to_string(),
            usage: TokenUsage::new(model, count("prompt_tokens"), count("completion_tokens")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_auth_failure() {
        let provider = OpenAIProvider::new(OpenAIConfig::default(), None);
        assert!(!provider.check_health().await);

        let err = provider
            .generate(&GenerationRequest::new("s", "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_blank_key_treated_as_missing() {
        let provider = OpenAIProvider::new(OpenAIConfig::default(), Some("  ".into()));
        assert!(!provider.check_health().await);
    }
}
