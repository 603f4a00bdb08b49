//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for the model-call collaborator
//! used by the trial sampler and the alignment judge. The [`LLMProvider`]
//! trait takes one [`GenerationRequest`] (system instruction, user prompt,
//! sampling temperature, token cap) and returns one [`Completion`] with its
//! token accounting. Embedding models live behind the separate
//! [`embedding::Embedder`] trait.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::TokenUsage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::LLMConfig;

pub mod embedding;
pub mod ollama;
pub mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Providers accepted by `llm.provider` and `judge.provider`
pub const SUPPORTED_PROVIDERS: [&str; 2] = ["ollama", "openai"];

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// A single generation call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    /// System instruction
    pub system: String,

    /// User-side prompt (rendered context)
    pub prompt: String,

    /// Sampling temperature
    pub temperature: f64,

    /// Maximum number of completion tokens
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.0,
            max_tokens: 1024,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Text returned by a provider together with its usage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns the model identifier requests are sent to
    fn model(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama), false for cloud providers
    fn is_local(&self) -> bool;

    /// Generate a completion
    ///
    /// # Returns
    /// * `Ok(Completion)` - Generated text and token usage
    /// * `Err(LLMError)` - If the request fails
    async fn generate(&self, request: &GenerationRequest) -> Result<Completion>;

    /// Check if the provider is currently healthy and available
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Build a provider by name from the `[llm]` section
///
/// `model` overrides the model configured for that provider, and `base_url`
/// overrides its endpoint. Both are used by the judge, which may point at a
/// different model than the one under evaluation.
pub fn create_provider(
    name: &str,
    config: &LLMConfig,
    model: Option<&str>,
    base_url: Option<&str>,
) -> std::result::Result<Arc<dyn LLMProvider>, EngineError> {
    match name {
        "ollama" => {
            let base_url = base_url.unwrap_or(&config.ollama.base_url);
            let model = model.unwrap_or(&config.ollama.model);
            let provider = OllamaProvider::new(base_url, model)
                .map_err(|e| EngineError::LLMProvider(e.to_string()))?;
            Ok(Arc::new(provider))
        }
        "openai" => {
            let mut openai = config.openai.clone();
            if let Some(model) = model {
                openai.model = model.to_string();
            }
            if let Some(base_url) = base_url {
                openai.base_url = base_url.to_string();
            }
            Ok(Arc::new(OpenAIProvider::from_env(openai)))
        }
        other => Err(EngineError::LLMProvider(format!(
            "Unknown provider '{}'. Must be one of: {}",
            other,
            SUPPORTED_PROVIDERS.join(", ")
        ))),
    }
}
