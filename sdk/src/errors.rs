//! Error types and handling
//!
//! This module provides the fatal error taxonomy of the evaluator. Per-trial
//! transport failures are not represented here: they are recorded on the
//! trial itself and never abort a run. Everything in [`EngineError`] is either
//! a configuration problem detected before the first trial is issued, or a
//! persistence problem surfaced after the run was assembled.
//!
//! All errors implement the `EngineErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.

use thiserror::Error;

/// Trait for engine error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information.
pub trait EngineErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is a static string and never echoes the raw error payload.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried as-is (e.g. a transient file system
    /// or provider problem). Non-recoverable errors need the configuration or
    /// input to be fixed first.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: invalid config, taxonomy, bounds, trial count or context
/// - **LLM Provider**: provider construction failures
/// - **Persistence**: writing or reading run artifacts
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EngineErrorExt};
///
/// let error = EngineError::InvalidTrialCount { requested: 0, minimum: 1 };
/// println!("Hint: {}", error.user_hint());
/// assert!(!error.is_recoverable());
///
/// let io = EngineError::Persistence("disk full".to_string());
/// assert!(io.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Invalid strategy bounds: min={min}, max={max}")]
    InvalidBounds { min: usize, max: usize },

    #[error("Invalid trial count: {requested} requested, at least {minimum} required")]
    InvalidTrialCount { requested: usize, minimum: usize },

    #[error("Invalid context: {0}")]
    Context(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Artifact errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True for errors that must be raised before any trial is issued
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Taxonomy(_)
                | Self::InvalidBounds { .. }
                | Self::InvalidTrialCount { .. }
                | Self::Context(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Taxonomy(_) => "Check the strategy taxonomy file referenced by core.taxonomy_path",
            Self::InvalidBounds { .. } => {
                "Strategy bounds must satisfy 1 <= min_strategies <= max_strategies"
            }
            Self::InvalidTrialCount { .. } => "Increase the number of trials (--trials)",
            Self::Context(_) => "Check the frozen context JSON file",

            // LLM provider errors
            Self::LLMProvider(_) => "LLM provider unavailable. Check your API keys and network",

            // Artifact errors
            Self::Persistence(_) => "Could not write run artifacts. Check runs_dir permissions",
            Self::Serialization(_) => "Run artifacts could not be encoded or decoded",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::Taxonomy(_)
            | Self::InvalidBounds { .. }
            | Self::InvalidTrialCount { .. }
            | Self::Context(_)
            | Self::Serialization(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
