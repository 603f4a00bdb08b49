//! Trial records
//!
//! A trial goes through two shapes: [`RawTrial`] as produced by the sampler
//! (text only), and [`Trial`] once its plan has been parsed. Every trial ends
//! in exactly one [`TrialOutcome`].

use sdk::types::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::taxonomy::ValidityBounds;

static EMPTY_SET: StrategySet = StrategySet(BTreeSet::new());

/// Set of taxonomy ids declared by one plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategySet(BTreeSet<String>);

impl StrategySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.0.insert(id.into())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn intersection_len(&self, other: &StrategySet) -> usize {
        self.0.intersection(&other.0).count()
    }

    pub fn union_len(&self, other: &StrategySet) -> usize {
        self.0.union(&other.0).count()
    }
}

impl<S: Into<String>> FromIterator<S> for StrategySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for StrategySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&str> = self.iter().collect();
        write!(f, "{{{}}}", ids.join(", "))
    }
}

/// Which call of a trial a usage record belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Fused,
    Plan,
    Response,
}

/// Usage of one model call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallRecord {
    pub call: CallKind,
    pub usage: TokenUsage,
}

/// Text produced by a trial, or why it produced none
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    Generated { plan: String, response: String },
    /// `plan` holds the plan text of a chained trial whose response call failed
    Failed { reason: String, plan: String },
}

/// Sampler output for one trial, before plan parsing
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrial {
    /// 1-based request index
    pub index: usize,
    pub temperature: f64,
    /// Usage of every call that completed, including calls of a failed trial
    pub calls: Vec<CallRecord>,
    pub output: RawOutput,
}

impl RawTrial {
    pub fn failed(
        index: usize,
        temperature: f64,
        calls: Vec<CallRecord>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            index,
            temperature,
            calls,
            output: RawOutput::Failed {
                reason: reason.into(),
                plan: String::new(),
            },
        }
    }

    pub fn with_partial_plan(mut self, partial: impl Into<String>) -> Self {
        if let RawOutput::Failed { plan, .. } = &mut self.output {
            *plan = partial.into();
        }
        self
    }
}

/// Final state of a trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    /// At least one taxonomy label was recognised
    Success {
        plan: String,
        response: String,
        strategies: StrategySet,
    },

    /// Plan missing, empty, or made only of unknown labels
    ParseFailure { plan: String, response: String },

    /// A model call failed or timed out; `plan` is empty unless a chained
    /// plan call completed first
    TransportFailure { reason: String, plan: String },
}

/// One parsed trial
///
/// Serialized as a flat record that always carries `plan`, `response` and
/// `strategies`, with empty values where the outcome has none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "TrialRecord", from = "TrialRecord")]
pub struct Trial {
    pub index: usize,
    pub temperature: f64,
    pub calls: Vec<CallRecord>,
    pub outcome: TrialOutcome,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TrialStatus {
    Success,
    ParseFailure,
    TransportFailure,
}

/// On-disk layout of `trials/trial_NN.json`
#[derive(Serialize, Deserialize)]
struct TrialRecord {
    index: usize,
    temperature: f64,
    status: TrialStatus,
    #[serde(default)]
    plan: String,
    #[serde(default)]
    response: String,
    #[serde(default)]
    strategies: StrategySet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default)]
    calls: Vec<CallRecord>,
}

impl From<Trial> for TrialRecord {
    fn from(trial: Trial) -> Self {
        let (status, plan, response, strategies, reason) = match trial.outcome {
            TrialOutcome::Success {
                plan,
                response,
                strategies,
            } => (TrialStatus::Success, plan, response, strategies, None),
            TrialOutcome::ParseFailure { plan, response } => (
                TrialStatus::ParseFailure,
                plan,
                response,
                StrategySet::new(),
                None,
            ),
            TrialOutcome::TransportFailure { reason, plan } => (
                TrialStatus::TransportFailure,
                plan,
                String::new(),
                StrategySet::new(),
                Some(reason),
            ),
        };
        Self {
            index: trial.index,
            temperature: trial.temperature,
            status,
            plan,
            response,
            strategies,
            reason,
            calls: trial.calls,
        }
    }
}

impl From<TrialRecord> for Trial {
    fn from(record: TrialRecord) -> Self {
        let outcome = match record.status {
            TrialStatus::Success => TrialOutcome::Success {
                plan: record.plan,
                response: record.response,
                strategies: record.strategies,
            },
            TrialStatus::ParseFailure => TrialOutcome::ParseFailure {
                plan: record.plan,
                response: record.response,
            },
            TrialStatus::TransportFailure => TrialOutcome::TransportFailure {
                reason: record.reason.unwrap_or_default(),
                plan: record.plan,
            },
        };
        Self {
            index: record.index,
            temperature: record.temperature,
            calls: record.calls,
            outcome,
        }
    }
}

impl Trial {
    pub fn status(&self) -> &'static str {
        match self.outcome {
            TrialOutcome::Success { .. } => "success",
            TrialOutcome::ParseFailure { .. } => "parse_failure",
            TrialOutcome::TransportFailure { .. } => "transport_failure",
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        matches!(self.outcome, TrialOutcome::TransportFailure { .. })
    }

    /// Declared set; empty for a parse failure, `None` when nothing was generated
    pub fn strategies(&self) -> Option<&StrategySet> {
        match &self.outcome {
            TrialOutcome::Success { strategies, .. } => Some(strategies),
            TrialOutcome::ParseFailure { .. } => Some(&EMPTY_SET),
            TrialOutcome::TransportFailure { .. } => None,
        }
    }

    /// Plan text; for a failed trial only the partial plan, if any
    pub fn plan(&self) -> Option<&str> {
        match &self.outcome {
            TrialOutcome::Success { plan, .. } | TrialOutcome::ParseFailure { plan, .. } => {
                Some(plan)
            }
            TrialOutcome::TransportFailure { plan, .. } => {
                Some(plan.as_str()).filter(|p| !p.is_empty())
            }
        }
    }

    pub fn response(&self) -> Option<&str> {
        match &self.outcome {
            TrialOutcome::Success { response, .. }
            | TrialOutcome::ParseFailure { response, .. } => Some(response),
            TrialOutcome::TransportFailure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            TrialOutcome::TransportFailure { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Parsed and within the cardinality bound
    pub fn is_valid(&self, bounds: ValidityBounds) -> bool {
        match &self.outcome {
            TrialOutcome::Success { strategies, .. } => bounds.contains(strategies.len()),
            _ => false,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.calls.iter().map(|c| c.usage.total_tokens).sum()
    }
}
