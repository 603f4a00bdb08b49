//! Restab Engine Library
//!
//! Rescripting stability evaluation: trial sampling, plan parsing, the three
//! metric levels and run artifacts. Used by the `restab` binary and the
//! integration tests.

/// Configuration management module
pub mod config;

/// Evaluation pipeline
pub mod evaluation;

/// LLM provider abstraction layer
pub mod llm;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
