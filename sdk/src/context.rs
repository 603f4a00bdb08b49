//! Frozen conversation context
//!
//! A [`FrozenContext`] is the conversation prefix every trial of a run is
//! sampled against. It is built once, hashed once, and only ever shared by
//! reference afterwards. There are no mutating methods.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::errors::EngineError;
use crate::types::Turn;

/// Language assumed when the source file does not carry one
pub const DEFAULT_LANGUAGE: &str = "en";

/// Immutable, pre-sliced conversation prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrozenContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    language: String,
    turns: Vec<Turn>,
    content_hash: String,
}

/// On-disk conversation shape
#[derive(Debug, Deserialize)]
struct ContextFile {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(alias = "messages")]
    turns: Vec<Turn>,
}

/// Hash input; field order is fixed so the digest is stable
#[derive(Serialize)]
struct HashInput<'a> {
    language: &'a str,
    turns: &'a [Turn],
}

impl FrozenContext {
    /// Freeze a sequence of turns
    pub fn new(turns: Vec<Turn>, language: impl Into<String>) -> Self {
        let language = language.into();
        let content_hash = compute_hash(&language, &turns);
        Self {
            session_id: None,
            language,
            turns,
            content_hash,
        }
    }

    /// Attach the originating session id (not part of the hash)
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Parse a conversation JSON document
    ///
    /// Accepts `{"session_id", "language", "messages": [{"role", "content", "stage"}]}`
    /// as well as the serialized form of a `FrozenContext` itself (`turns`/`text`).
    /// Unknown fields are ignored.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let file: ContextFile = serde_json::from_str(json)
            .map_err(|e| EngineError::Context(format!("Failed to parse context: {}", e)))?;

        let language = file
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let mut context = Self::new(file.turns, language);
        context.session_id = file.session_id;
        Ok(context)
    }

    /// Read and parse a conversation JSON file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Context(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Hex SHA-256 over the language tag and turns
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render the turns as `Role: text` lines
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("{}: {}", turn.role.label(), turn.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn compute_hash(language: &str, turns: &[Turn]) -> String {
    let input = HashInput { language, turns };
    // Serializing plain strings and enums cannot fail
    let bytes = serde_json::to_vec(&input).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
