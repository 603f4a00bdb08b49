//! Declared-plan parser
//!
//! Extracts the [`StrategySet`] a model declared inside its plan block and
//! decides whether that set is valid. The delimiter tag is configurable
//! (`<plan>` by default). A closed block is preferred; an unclosed block runs
//! to the first blank line or the end of the text.
//!
//! Inside the block, labels may be separated by `/`, `,`, `;`, `|` or line
//! breaks and may carry bullet markers or markdown emphasis. Labels that are
//! not in the taxonomy are dropped silently.

use regex::Regex;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::taxonomy::{Taxonomy, ValidityBounds};
use super::trial::{RawOutput, RawTrial, StrategySet, Trial, TrialOutcome};

/// How plan tokens are matched against taxonomy ids
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LabelMatching {
    /// Case-insensitive, whitespace-trimmed equality with an id
    #[default]
    Exact,

    /// Also folds spaces and hyphens to `_` and accepts display names
    Normalized,
}

/// True iff the set size lies within the bound
pub fn validate(set: &StrategySet, bounds: ValidityBounds) -> bool {
    bounds.contains(set.len())
}

pub struct PlanParser {
    taxonomy: Arc<Taxonomy>,
    matching: LabelMatching,
    tag: String,
    closed: Regex,
    open: Regex,
    /// Folded id or name -> id, used by normalized matching
    aliases: HashMap<String, String>,
}

impl PlanParser {
    pub fn new(
        taxonomy: Arc<Taxonomy>,
        tag: &str,
        matching: LabelMatching,
    ) -> Result<Self, EngineError> {
        let escaped = regex::escape(tag);
        let closed = Regex::new(&format!(r"(?is)<{0}>(.*?)</{0}>", escaped))
            .map_err(|e| EngineError::Config(format!("Invalid plan tag '{}': {}", tag, e)))?;
        let open = Regex::new(&format!(r"(?is)<{0}>(.*?)(?:\r?\n\r?\n|\z)", escaped))
            .map_err(|e| EngineError::Config(format!("Invalid plan tag '{}': {}", tag, e)))?;

        let mut aliases = HashMap::new();
        for strategy in taxonomy.strategies() {
            aliases.insert(fold(&strategy.name), strategy.id.clone());
        }
        // Ids take precedence over a colliding display name
        for strategy in taxonomy.strategies() {
            aliases.insert(fold(&strategy.id), strategy.id.clone());
        }

        Ok(Self {
            taxonomy,
            matching,
            tag: tag.to_string(),
            closed,
            open,
            aliases,
        })
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Inner text of the first plan block, closed form preferred
    pub fn extract_block<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.closed
            .captures(text)
            .or_else(|| self.open.captures(text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// Split a fused output into `(plan, response)`
    ///
    /// The plan is re-wrapped as a closed block; the response is everything
    /// after the block. Without a block, the plan is empty and the whole
    /// output is the response.
    pub fn split_fused(&self, output: &str) -> (String, String) {
        let output = output.trim();
        let caps = self
            .closed
            .captures(output)
            .or_else(|| self.open.captures(output));

        match caps {
            Some(caps) => {
                let whole = caps.get(0).map_or(0..0, |m| m.range());
                let inner = caps.get(1).map_or("", |m| m.as_str()).trim();
                let plan = format!("<{0}>{1}</{0}>", self.tag, inner);
                let response = output[whole.end..].trim().to_string();
                (plan, response)
            }
            None => (String::new(), output.to_string()),
        }
    }

    /// Extract the recognised labels of a plan
    pub fn parse(&self, plan_text: &str) -> StrategySet {
        let Some(block) = self.extract_block(plan_text) else {
            return StrategySet::new();
        };

        block
            .split(|c: char| matches!(c, '/' | ',' | ';' | '|' | '\n' | '\r'))
            .filter_map(clean_token)
            .filter_map(|token| self.resolve(&token))
            .collect()
    }

    fn resolve(&self, token: &str) -> Option<String> {
        match self.matching {
            LabelMatching::Exact => self.taxonomy.get(token).map(|s| s.id.clone()),
            LabelMatching::Normalized => self.aliases.get(&fold(token)).cloned(),
        }
    }

    /// Validity under the taxonomy's bound
    pub fn validate(&self, set: &StrategySet) -> bool {
        validate(set, self.taxonomy.bounds())
    }

    /// Turn a sampler record into a parsed trial
    pub fn parse_trial(&self, raw: RawTrial) -> Trial {
        let outcome = match raw.output {
            RawOutput::Failed { reason, plan } => {
                TrialOutcome::TransportFailure { reason, plan }
            }
            RawOutput::Generated { plan, response } => {
                let strategies = self.parse(&plan);
                if strategies.is_empty() {
                    tracing::debug!("Trial {}: no recognised strategy in plan", raw.index);
                    TrialOutcome::ParseFailure { plan, response }
                } else {
                    TrialOutcome::Success {
                        plan,
                        response,
                        strategies,
                    }
                }
            }
        };

        Trial {
            index: raw.index,
            temperature: raw.temperature,
            calls: raw.calls,
            outcome,
        }
    }
}

/// Strip bullets, emphasis, quotes and trailing punctuation; lowercase
fn clean_token(raw: &str) -> Option<String> {
    let mut token = raw.trim();

    // Bullet markers: "-", "*", "•", "+", "1.", "2)"
    token = token.trim_start_matches(['-', '*', '•', '+', ' ', '\t']);
    let digits = token.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &token[digits..];
        if let Some(stripped) = rest.strip_prefix(['.', ')']) {
            token = stripped;
        }
    }

    let token = token
        .trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`' | '"' | '\'' | '[' | ']'))
        .trim_end_matches(['.', ':', '!', '?'])
        .trim();

    if token.is_empty() {
        return None;
    }

    Some(token.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
}

/// Fold case, whitespace and hyphens into a snake_case key
fn fold(label: &str) -> String {
    let mut folded = String::with_capacity(label.len());
    for c in label.trim().chars() {
        let c = if c.is_whitespace() || c == '-' { '_' } else { c };
        if c == '_' && folded.ends_with('_') {
            continue;
        }
        folded.extend(c.to_lowercase());
    }
    folded.trim_matches('_').to_string()
}
