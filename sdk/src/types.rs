//! Conversation and usage types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The client side of the session
    User,

    /// The therapist side of the session
    Assistant,

    /// Instruction turn
    System,
}

impl Role {
    /// Label used when the turn is rendered into a prompt
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// One turn of a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,

    #[serde(alias = "content")]
    pub text: String,

    /// Protocol stage the turn was produced in, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl Turn {
    /// Create a new user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            stage: None,
        }
    }

    /// Create a new assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            stage: None,
        }
    }

    /// Attach a stage tag
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

/// Token accounting for a single model call
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,

    /// Model identifier reported by the provider
    #[serde(default)]
    pub model: String,
}

impl TokenUsage {
    pub fn new(model: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            model: model.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_accepts_content_alias() {
        let turn: Turn =
            serde_json::from_str(r#"{"role":"user","content":"I keep falling","stage":"recording"}"#)
                .unwrap();
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.text, "I keep falling");
        assert_eq!(turn.stage.as_deref(), Some("recording"));
    }

    #[test]
    fn test_usage_total() {
        let usage = TokenUsage::new("llama3.1:8b", 120, 80);
        assert_eq!(usage.total_tokens, 200);
        assert_eq!(usage.model, "llama3.1:8b");
    }

    #[test]
    fn test_role_labels() {
        assert_eq!(Role::User.label(), "User");
        assert_eq!(Role::Assistant.to_string(), "assistant");
    }
}
