//! Strategy taxonomy
//!
//! The closed set of category identifiers a plan may declare, plus the
//! cardinality bound a declared set must satisfy to count as valid. A
//! taxonomy is loaded once per run and shared read-only between the parser,
//! the metrics and the judge.

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use super::trial::StrategySet;

/// Taxonomy shipped with the binary
const BUILTIN_TAXONOMY: &str = include_str!("../../../config/strategy_taxonomy.toml");

/// One category of the taxonomy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Strategy {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }

    /// `- **id** (name): description`
    fn definition_line(&self) -> String {
        format!("- **{}** ({}): {}", self.id, self.name, self.description)
    }
}

/// Inclusive bound on the size of a valid strategy set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidityBounds {
    #[serde(rename = "min_strategies")]
    pub min: usize,
    #[serde(rename = "max_strategies")]
    pub max: usize,
}

impl Default for ValidityBounds {
    fn default() -> Self {
        Self { min: 1, max: 2 }
    }
}

impl ValidityBounds {
    pub fn new(min: usize, max: usize) -> Result<Self, EngineError> {
        let bounds = Self { min, max };
        bounds.check()?;
        Ok(bounds)
    }

    fn check(&self) -> Result<(), EngineError> {
        if self.min == 0 || self.min > self.max {
            return Err(EngineError::InvalidBounds {
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    pub fn contains(&self, size: usize) -> bool {
        self.min <= size && size <= self.max
    }
}

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    #[serde(default)]
    validation: ValidityBounds,
    #[serde(default)]
    strategies: Vec<Strategy>,
}

/// Ordered, immutable strategy taxonomy
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Taxonomy {
    strategies: Vec<Strategy>,
    bounds: ValidityBounds,
}

impl Taxonomy {
    /// Build a taxonomy, rejecting empty or malformed category lists
    pub fn new(strategies: Vec<Strategy>, bounds: ValidityBounds) -> Result<Self, EngineError> {
        bounds.check()?;

        if strategies.is_empty() {
            return Err(EngineError::Taxonomy(
                "taxonomy must contain at least one strategy".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for strategy in &strategies {
            let id = &strategy.id;
            if id.is_empty()
                || !id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(EngineError::Taxonomy(format!(
                    "strategy id '{}' must be lowercase snake_case",
                    id
                )));
            }
            if !seen.insert(id.as_str()) {
                return Err(EngineError::Taxonomy(format!("duplicate strategy id '{}'", id)));
            }
        }

        Ok(Self { strategies, bounds })
    }

    /// Shorthand for tests and callers that only have ids
    pub fn from_ids<I, S>(ids: I, bounds: ValidityBounds) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let strategies = ids
            .into_iter()
            .map(|id| {
                let id = id.as_ref();
                Strategy::new(id, id, "")
            })
            .collect();
        Self::new(strategies, bounds)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let file: TaxonomyFile = toml::from_str(contents)
            .map_err(|e| EngineError::Taxonomy(format!("Failed to parse taxonomy: {}", e)))?;
        Self::new(file.strategies, file.validation)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Taxonomy(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// The taxonomy compiled into the binary
    pub fn builtin() -> Result<Self, EngineError> {
        Self::from_toml_str(BUILTIN_TAXONOMY)
    }

    /// Load from `path` when given, else fall back to the built-in taxonomy
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, EngineError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    pub fn bounds(&self) -> ValidityBounds {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.strategies.iter().map(|s| s.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Every definition, one per line, for the judge system prompt
    pub fn definitions_block(&self) -> String {
        self.strategies
            .iter()
            .map(Strategy::definition_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Definitions of the declared strategies only, in id order
    pub fn declared_block(&self, declared: &StrategySet) -> String {
        declared
            .iter()
            .map(|id| match self.get(id) {
                Some(strategy) => strategy.definition_line(),
                None => format!("- **{}**", id),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
