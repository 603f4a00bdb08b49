//! Level 3: plan/response alignment
//!
//! For every trial that declared at least one strategy and produced a
//! response, a [`Judge`] rates each declared strategy on a 0/1/2 scale
//! (absent, partial, implemented). A trial's alignment is its mean score
//! divided by two; the run's alignment is the mean over judged trials.
//! Judge failures are recorded and excluded from the mean.

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use sdk::types::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::limiter::CallLimiter;
use super::pairwise::mean;
use super::prompts::PromptSet;
use super::taxonomy::Taxonomy;
use super::trial::{StrategySet, Trial};
use crate::llm::{GenerationRequest, LLMError, LLMProvider, Result};

/// Highest ordinal score
pub const MAX_SCORE: u8 = 2;

/// Justification recorded for a declared strategy the judge left out
pub const NOT_SCORED: &str = "not scored by judge";

/// Judge rating of one declared strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyScore {
    pub strategy: String,
    pub score: u8,
    pub justification: String,
}

/// Everything the judge returned for one trial
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeVerdict {
    /// One score per declared strategy, in id order
    pub scores: Vec<StrategyScore>,
    pub raw_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl JudgeVerdict {
    /// Mean score normalised to [0, 1]
    pub fn alignment(&self) -> Option<f64> {
        mean(self.scores.iter().map(|s| f64::from(s.score)))
            .map(|m| m / f64::from(MAX_SCORE))
    }

    /// Why the verdict cannot stand for `declared`: a score above
    /// [`MAX_SCORE`], or scored ids that are not exactly the declared ones
    pub fn conformance_error(&self, declared: &StrategySet) -> Option<String> {
        if let Some(bad) = self.scores.iter().find(|s| s.score > MAX_SCORE) {
            return Some(format!(
                "score {} for '{}' is outside 0..={}",
                bad.score, bad.strategy, MAX_SCORE
            ));
        }

        let scored: StrategySet = self.scores.iter().map(|s| s.strategy.as_str()).collect();
        if scored.len() != self.scores.len() || &scored != declared {
            return Some(format!(
                "judge scored {} but {} was declared",
                scored, declared
            ));
        }
        None
    }
}

/// Rates how well a response implements its declared strategies
#[async_trait]
pub trait Judge: Send + Sync {
    /// Identifier of the judging model
    fn id(&self) -> &str;

    async fn judge(
        &self,
        taxonomy: &Taxonomy,
        declared: &StrategySet,
        response: &str,
    ) -> Result<JudgeVerdict>;
}

fn judgment_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // "agency: reasoning text | score: 2", optionally bulleted or bolded
        Regex::new(r"(?im)^[\s\-*•]*\**(\w+)\**\s*:\s*(.+?)\s*\|\s*score\s*:\s*([012])\s*$")
            .expect("Invalid judgment line pattern")
    })
}

/// Parse judge output into one score per declared strategy
///
/// Lines for strategies that were not declared are ignored. Declared
/// strategies without a line score 0.
pub fn parse_judgment(raw: &str, declared: &StrategySet) -> Vec<StrategyScore> {
    let mut parsed: BTreeMap<String, (u8, String)> = BTreeMap::new();
    for caps in judgment_line_regex().captures_iter(raw) {
        let id = caps[1].to_lowercase();
        if !declared.contains(&id) || parsed.contains_key(&id) {
            continue;
        }
        let score = caps[3].parse::<u8>().unwrap_or(0);
        parsed.insert(id, (score, caps[2].trim().to_string()));
    }

    declared
        .iter()
        .map(|id| match parsed.remove(id) {
            Some((score, justification)) => StrategyScore {
                strategy: id.to_string(),
                score,
                justification,
            },
            None => {
                tracing::warn!("Judge did not score strategy '{}', defaulting to 0", id);
                StrategyScore {
                    strategy: id.to_string(),
                    score: 0,
                    justification: NOT_SCORED.to_string(),
                }
            }
        })
        .collect()
}

/// Judge settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgeSettings {
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Judge backed by a chat model
pub struct LlmJudge {
    provider: Arc<dyn LLMProvider>,
    prompts: Arc<PromptSet>,
    settings: JudgeSettings,
}

impl LlmJudge {
    pub fn new(provider: Arc<dyn LLMProvider>, prompts: Arc<PromptSet>, settings: JudgeSettings) -> Self {
        Self {
            provider,
            prompts,
            settings,
        }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    fn id(&self) -> &str {
        self.provider.model()
    }

    async fn judge(
        &self,
        taxonomy: &Taxonomy,
        declared: &StrategySet,
        response: &str,
    ) -> Result<JudgeVerdict> {
        let user = self
            .prompts
            .judge_user(&taxonomy.declared_block(declared), response);
        let request = GenerationRequest::new(self.prompts.judge_system(taxonomy), user)
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_tokens);

        let completion =
            match tokio::time::timeout(self.settings.timeout, self.provider.generate(&request)).await {
                Ok(result) => result?,
                Err(_) => return Err(LLMError::Timeout),
            };

        Ok(JudgeVerdict {
            scores: parse_judgment(&completion.text, declared),
            raw_output: completion.text,
            usage: Some(completion.usage),
        })
    }
}

/// What happened when a trial was put before the judge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JudgmentOutcome {
    Judged {
        trial_alignment: f64,
        #[serde(flatten)]
        verdict: JudgeVerdict,
    },
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
    },
}

/// `judgments.json` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgmentRecord {
    pub trial: usize,
    #[serde(flatten)]
    pub outcome: JudgmentOutcome,
}

/// Alignment of one judged trial
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrialAlignment {
    pub trial: usize,
    pub alignment: f64,
}

/// Level 3 result
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlignmentResult {
    pub mean: Option<f64>,
    /// Trials that were judged successfully
    pub trial_count: usize,
    pub failed_count: usize,
    pub per_trial: Vec<TrialAlignment>,
    /// Mean normalised score per strategy id
    pub per_strategy: BTreeMap<String, f64>,
    pub judgments: Vec<JudgmentRecord>,
}

pub struct AlignmentMetric {
    judge: Arc<dyn Judge>,
    taxonomy: Arc<Taxonomy>,
    limiter: CallLimiter,
}

impl AlignmentMetric {
    pub fn new(judge: Arc<dyn Judge>, taxonomy: Arc<Taxonomy>, limiter: CallLimiter) -> Self {
        Self {
            judge,
            taxonomy,
            limiter,
        }
    }

    pub fn judge_id(&self) -> &str {
        self.judge.id()
    }

    async fn judge_trial(&self, trial: &Trial) -> JudgmentRecord {
        let outcome = match (trial.strategies(), trial.response()) {
            (None, _) => JudgmentOutcome::Skipped {
                reason: "transport failure".to_string(),
            },
            (Some(set), _) if set.is_empty() => JudgmentOutcome::Skipped {
                reason: "no declared strategies".to_string(),
            },
            (_, Some(response)) if response.trim().is_empty() => JudgmentOutcome::Skipped {
                reason: "empty response".to_string(),
            },
            (Some(set), Some(response)) => {
                let verdict = self
                    .limiter
                    .run(self.judge.judge(&self.taxonomy, set, response))
                    .await;
                match verdict {
                    Ok(verdict) => match (verdict.conformance_error(set), verdict.alignment()) {
                        (Some(error), _) => {
                            tracing::warn!("Rejected judge verdict for trial {}: {}", trial.index, error);
                            JudgmentOutcome::Failed { error }
                        }
                        (None, Some(trial_alignment)) => JudgmentOutcome::Judged {
                            trial_alignment,
                            verdict,
                        },
                        (None, None) => JudgmentOutcome::Failed {
                            error: "judge returned no scores".to_string(),
                        },
                    },
                    Err(e) => {
                        tracing::warn!("Judge call failed for trial {}: {}", trial.index, e);
                        JudgmentOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            }
            (Some(_), None) => JudgmentOutcome::Skipped {
                reason: "empty response".to_string(),
            },
        };

        JudgmentRecord {
            trial: trial.index,
            outcome,
        }
    }

    pub async fn compute(&self, trials: &[Trial]) -> AlignmentResult {
        let judgments: Vec<JudgmentRecord> =
            join_all(trials.iter().map(|t| self.judge_trial(t))).await;

        let mut per_trial = Vec::new();
        let mut failed_count = 0;
        let mut strategy_scores: BTreeMap<String, Vec<f64>> = BTreeMap::new();

        for record in &judgments {
            match &record.outcome {
                JudgmentOutcome::Judged {
                    trial_alignment,
                    verdict,
                } => {
                    per_trial.push(TrialAlignment {
                        trial: record.trial,
                        alignment: *trial_alignment,
                    });
                    for score in &verdict.scores {
                        strategy_scores
                            .entry(score.strategy.clone())
                            .or_default()
                            .push(f64::from(score.score) / f64::from(MAX_SCORE));
                    }
                }
                JudgmentOutcome::Failed { .. } => failed_count += 1,
                JudgmentOutcome::Skipped { .. } => {}
            }
        }

        let per_strategy = strategy_scores
            .into_iter()
            .filter_map(|(id, scores)| mean(scores).map(|m| (id, m)))
            .collect();

        AlignmentResult {
            mean: mean(per_trial.iter().map(|t| t.alignment)),
            trial_count: per_trial.len(),
            failed_count,
            per_trial,
            per_strategy,
            judgments,
        }
    }
}
