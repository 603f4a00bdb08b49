//! Restab SDK
//!
//! Shared types for the rescripting stability evaluator. This crate holds the
//! leaf data model (frozen conversation context, turns, token usage) and the
//! error taxonomy used by the engine and its CLI.

/// Frozen conversation context
pub mod context;

/// Error types and handling
pub mod errors;

/// Conversation and usage types
pub mod types;

// Re-export commonly used types
pub use context::FrozenContext;
pub use errors::{EngineError, EngineErrorExt};
pub use types::{Role, TokenUsage, Turn};
