//! Configuration management
//!
//! This module handles loading, validation, and management of the evaluator
//! configuration. Configuration is stored in TOML format at ~/.restab/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, runs directory, taxonomy path
//! - **llm**: Provider under evaluation (ollama or openai) and its settings
//! - **sampling**: Trial count, temperatures, generation mode, call limits
//! - **parser**: Plan delimiter tag and label matching policy
//! - **metrics**: Stability policy knobs
//! - **embedding**: Embedding model used for response consistency
//! - **judge**: Model used for plan/response alignment
//! - **prompts**: Instruction templates
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Creates the runs directory if it doesn't exist
//!
//! # Examples
//!
//! ```no_run
//! use restab_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! // Access configuration values
//! println!("Runs: {:?}", config.core.runs_dir);
//! println!("Provider: {}", config.llm.provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::evaluation::{GenerationMode, LabelMatching};
use crate::llm::SUPPORTED_PROVIDERS;

/// Main configuration structure
///
/// `core` and `llm` are required in a config file; every other section
/// falls back to its defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Provider under evaluation
    pub llm: LLMConfig,

    /// Trial sampling
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Plan parsing
    #[serde(default)]
    pub parser: ParserConfig,

    /// Metric policy
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Embedding similarity collaborator
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Alignment judge
    #[serde(default)]
    pub judge: JudgeConfig,

    /// Instruction templates
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// Core configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory run artifacts are written to (supports ~ expansion)
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,

    /// Strategy taxonomy file; the built-in taxonomy is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxonomy_path: Option<PathBuf>,
}

/// LLM provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider under evaluation (ollama, openai)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for OpenAI API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Trial sampling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Trials per run
    #[serde(default = "default_trials")]
    pub trials: usize,

    /// Temperatures to sweep; one run per temperature
    #[serde(default = "default_temperatures")]
    pub temperatures: Vec<f64>,

    /// Fused (one call) or chained (plan call, then response call)
    #[serde(default)]
    pub mode: GenerationMode,

    /// Completion token cap per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Trials in flight at once
    #[serde(default = "default_sampling_concurrency")]
    pub concurrency: usize,

    /// Timeout for a single model call, in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

/// Plan parser configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Delimiter tag name, e.g. "plan" for `<plan>...</plan>`
    #[serde(default = "default_plan_tag")]
    pub plan_tag: String,

    /// How plan tokens are matched against taxonomy ids
    #[serde(default)]
    pub label_matching: LabelMatching,
}

/// Metric policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Headline stability only compares trials whose plan is valid
    #[serde(default = "default_true")]
    pub stability_only_valid: bool,

    /// Jaccard score assigned to a pair of empty sets
    #[serde(default)]
    pub empty_pair_score: f64,

    /// Reject runs with fewer than two trials
    #[serde(default)]
    pub require_pairwise: bool,
}

/// Embedding similarity configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL for the Ollama embedding endpoint
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Versioned embedding model
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Issue one similarity call at a time
    #[serde(default)]
    pub serialize: bool,

    /// Similarity calls in flight at once when not serialized
    #[serde(default = "default_collaborator_concurrency")]
    pub concurrency: usize,

    /// HTTP timeout for embedding calls, in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

/// Alignment judge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Provider hosting the judge model (ollama, openai)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Judge model
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Endpoint override; the `[llm]` section's URL is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Sampling temperature for judge calls
    #[serde(default)]
    pub temperature: f64,

    /// Completion token cap per judge call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Issue one judge call at a time
    #[serde(default)]
    pub serialize: bool,

    /// Judge calls in flight at once when not serialized
    #[serde(default = "default_collaborator_concurrency")]
    pub concurrency: usize,
}

/// Instruction templates
///
/// Placeholders: `{language}` and `{strategy_ids}` everywhere, `{plan}` in
/// `response`, `{taxonomy_block}` in `judge_system`, `{strategies_block}` and
/// `{response}` in `judge_user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// Therapist opening line prepended to the rendered history
    #[serde(default = "default_intro_prompt")]
    pub intro: String,

    /// Fused mode: plan block followed by the response
    #[serde(default = "default_fused_prompt")]
    pub fused: String,

    /// Chained mode, call 1: plan only
    #[serde(default = "default_plan_prompt")]
    pub plan: String,

    /// Chained mode, call 2: response conditioned on the plan
    #[serde(default = "default_response_prompt")]
    pub response: String,

    /// Judge system instruction
    #[serde(default = "default_judge_system_prompt")]
    pub judge_system: String,

    /// Judge user message
    #[serde(default = "default_judge_user_prompt")]
    pub judge_user: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_runs_dir() -> PathBuf {
    PathBuf::from("~/.restab/runs")
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_trials() -> usize {
    10
}

fn default_temperatures() -> Vec<f64> {
    vec![0.7]
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_sampling_concurrency() -> usize {
    4
}

fn default_call_timeout() -> u64 {
    120
}

fn default_plan_tag() -> String {
    "plan".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text:v1.5".to_string()
}

fn default_collaborator_concurrency() -> usize {
    4
}

fn default_embedding_timeout() -> u64 {
    60
}

fn default_intro_prompt() -> String {
    "Hello, I'm glad you're here. Today we will work on the nightmare that has been \
     bothering you. Whenever you're ready, tell me about it."
        .to_string()
}

fn default_fused_prompt() -> String {
    "You are a therapist guiding a client through Imagery Rehearsal Therapy. The client \
     has described a recurring nightmare and the session is now at the rescripting stage.\n\n\
     First, declare your plan: choose one or two strategies from this list and write them \
     inside a plan block, separated by \" / \", exactly like <plan>id / id</plan>.\n\
     Strategy ids: {strategy_ids}\n\n\
     Then, after the plan block, write your next message to the client in {language}. \
     The message must put the declared strategies into practice."
        .to_string()
}

fn default_plan_prompt() -> String {
    "You are a therapist guiding a client through Imagery Rehearsal Therapy. The session \
     is now at the rescripting stage.\n\n\
     Decide how to help the client change the nightmare. Choose one or two strategies from \
     this list and output only a plan block, exactly like <plan>id / id</plan>.\n\
     Strategy ids: {strategy_ids}"
        .to_string()
}

fn default_response_prompt() -> String {
    "You are a therapist guiding a client through Imagery Rehearsal Therapy. The session \
     is now at the rescripting stage.\n\n\
     You have already committed to this plan:\n{plan}\n\n\
     Write your next message to the client in {language}. The message must put the \
     declared strategies into practice. Do not repeat the plan block."
        .to_string()
}

fn default_judge_system_prompt() -> String {
    "You are an experienced clinical supervisor rating whether a therapist message \
     implements the strategies the therapist declared beforehand.\n\n\
     Strategy definitions:\n{taxonomy_block}\n\n\
     For every declared strategy output exactly one line in the form\n\
     <strategy_id>: <one sentence justification> | score: <0|1|2>\n\
     where 0 = absent, 1 = partially implemented, 2 = clearly implemented. \
     Output nothing else."
        .to_string()
}

fn default_judge_user_prompt() -> String {
    "Declared strategies:\n{strategies_block}\n\nTherapist message:\n{response}".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            runs_dir: default_runs_dir(),
            taxonomy_path: None,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            temperatures: default_temperatures(),
            mode: GenerationMode::default(),
            max_tokens: default_max_tokens(),
            concurrency: default_sampling_concurrency(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl SamplingConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            plan_tag: default_plan_tag(),
            label_matching: LabelMatching::default(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            stability_only_valid: true,
            empty_pair_score: 0.0,
            require_pairwise: false,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_embedding_model(),
            serialize: false,
            concurrency: default_collaborator_concurrency(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    /// Effective in-flight limit
    pub fn permits(&self) -> usize {
        if self.serialize {
            1
        } else {
            self.concurrency
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_ollama_model(),
            base_url: None,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            serialize: false,
            concurrency: default_collaborator_concurrency(),
        }
    }
}

impl JudgeConfig {
    /// Effective in-flight limit
    pub fn permits(&self) -> usize {
        if self.serialize {
            1
        } else {
            self.concurrency
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            intro: default_intro_prompt(),
            fused: default_fused_prompt(),
            plan: default_plan_prompt(),
            response: default_response_prompt(),
            judge_system: default_judge_system_prompt(),
            judge_user: default_judge_user_prompt(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            llm: LLMConfig::default(),
            sampling: SamplingConfig::default(),
            parser: ParserConfig::default(),
            metrics: MetricsConfig::default(),
            embedding: EmbeddingConfig::default(),
            judge: JudgeConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.restab/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Validates the configuration after loading and returns descriptive errors
    /// if validation fails.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        // Serialize before processing so ~ stays unexpanded on disk
        let defaults = Self::default();
        let toml_string = toml::to_string_pretty(&defaults)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = defaults;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.restab/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".restab").join("config.toml"))
    }

    /// Model identifier of the provider under evaluation
    pub fn model_name(&self) -> &str {
        match self.llm.provider.as_str() {
            "openai" => &self.llm.openai.model,
            _ => &self.llm.ollama.model,
        }
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated fields and numeric ranges
    /// - Expands ~ in paths
    /// - Creates the runs directory if it doesn't exist
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        self.validate()?;

        self.core.runs_dir = expand_path(&self.core.runs_dir)?;
        if !self.core.runs_dir.exists() {
            fs::create_dir_all(&self.core.runs_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create runs directory: {}", e))
            })?;
        }

        if let Some(path) = &self.core.taxonomy_path {
            self.core.taxonomy_path = Some(expand_path(path)?);
        }

        Ok(())
    }

    /// Check values without touching the file system
    pub fn validate(&self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        for (section, provider) in [("llm", &self.llm.provider), ("judge", &self.judge.provider)] {
            if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
                return Err(EngineError::Config(format!(
                    "Invalid {} provider '{}'. Must be one of: {}",
                    section,
                    provider,
                    SUPPORTED_PROVIDERS.join(", ")
                )));
            }
        }

        if self.sampling.trials == 0 {
            return Err(EngineError::Config(
                "sampling.trials must be at least 1".to_string(),
            ));
        }
        if self.sampling.temperatures.is_empty() {
            return Err(EngineError::Config(
                "sampling.temperatures must not be empty".to_string(),
            ));
        }
        for t in &self.sampling.temperatures {
            validate_temperature("sampling.temperatures", *t)?;
        }
        validate_temperature("judge.temperature", self.judge.temperature)?;

        if self.sampling.max_tokens == 0 || self.judge.max_tokens == 0 {
            return Err(EngineError::Config(
                "max_tokens must be at least 1".to_string(),
            ));
        }
        if self.sampling.concurrency == 0
            || self.embedding.concurrency == 0
            || self.judge.concurrency == 0
        {
            return Err(EngineError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.sampling.call_timeout_secs == 0 {
            return Err(EngineError::Config(
                "sampling.call_timeout_secs must be at least 1".to_string(),
            ));
        }

        let tag = &self.parser.plan_tag;
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(EngineError::Config(format!(
                "Invalid parser.plan_tag '{}'. Use letters, digits, '_' or '-'",
                tag
            )));
        }

        if !(0.0..=1.0).contains(&self.metrics.empty_pair_score) {
            return Err(EngineError::Config(
                "metrics.empty_pair_score must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.embedding.model.trim().is_empty() {
            return Err(EngineError::Config(
                "embedding.model must name a versioned model".to_string(),
            ));
        }

        if !self.prompts.judge_user.contains("{response}") {
            return Err(EngineError::Config(
                "prompts.judge_user must contain the {response} placeholder".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_temperature(field: &str, value: f64) -> Result<(), EngineError> {
    if !(0.0..=2.0).contains(&value) {
        return Err(EngineError::Config(format!(
            "{} must be between 0.0 and 2.0, got {}",
            field, value
        )));
    }
    Ok(())
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.sampling.trials, 10);
        assert_eq!(config.sampling.temperatures, vec![0.7]);
        assert_eq!(config.sampling.mode, GenerationMode::Fused);
        assert_eq!(config.parser.label_matching, LabelMatching::Exact);
        assert!(config.metrics.stability_only_valid);
        assert_eq!(config.metrics.empty_pair_score, 0.0);
        assert_eq!(config.judge.temperature, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.llm.provider, deserialized.llm.provider);
        assert_eq!(config.prompts.fused, deserialized.prompts.fused);
    }

    #[test]
    fn test_zero_trials_rejected() {
        let mut config = Config::default();
        config.sampling.trials = 0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_temperature_out_of_range_rejected() {
        let mut config = Config::default();
        config.sampling.temperatures = vec![0.3, 2.5];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = Config::default();
        config.judge.provider = "gemini".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("judge"));
    }

    #[test]
    fn test_serialize_forces_single_permit() {
        let mut config = Config::default();
        config.embedding.serialize = true;
        assert_eq!(config.embedding.permits(), 1);
        assert_eq!(config.judge.permits(), 4);
    }

    #[test]
    fn test_model_name_follows_provider() {
        let mut config = Config::default();
        assert_eq!(config.model_name(), "llama3.1:8b");
        config.llm.provider = "openai".to_string();
        assert_eq!(config.model_name(), "gpt-4o-mini");
    }
}
