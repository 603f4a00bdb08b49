//! Run orchestration
//!
//! A run moves strictly forward through
//! `INITIALIZED -> SAMPLING -> PARSING -> METRICS -> ASSEMBLED -> PERSISTED`.
//! Configuration problems are rejected before the first trial is issued;
//! after that a run always assembles, even if every trial failed and every
//! metric is null.

use chrono::{DateTime, Utc};
use sdk::context::{FrozenContext, DEFAULT_LANGUAGE};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::alignment::{
    AlignmentMetric, AlignmentResult, Judge, JudgeSettings, JudgmentRecord, LlmJudge,
    TrialAlignment,
};
use super::artifacts::ArtifactStore;
use super::consistency::{ConsistencyMetric, ConsistencyResult, EmbeddingSimilarity, SimilarityScorer};
use super::limiter::CallLimiter;
use super::pairwise::{PairwiseScore, PairwiseSummary};
use super::parser::PlanParser;
use super::prompts::PromptSet;
use super::sampler::{CallLimits, GenerationMode, TrialSampler};
use super::stability::{strategy_counts, validity_rate, StabilityMetric};
use super::taxonomy::{Taxonomy, ValidityBounds};
use super::trial::Trial;
use crate::config::{Config, MetricsConfig, ParserConfig, PromptsConfig, SamplingConfig};
use crate::llm::embedding::OllamaEmbedder;
use crate::llm::{create_provider, LLMProvider};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Initialized,
    Sampling,
    Parsing,
    Metrics,
    Assembled,
    Persisted,
}

impl RunState {
    /// The only state reachable from this one
    pub fn next(self) -> Option<RunState> {
        match self {
            RunState::Initialized => Some(RunState::Sampling),
            RunState::Sampling => Some(RunState::Parsing),
            RunState::Parsing => Some(RunState::Metrics),
            RunState::Metrics => Some(RunState::Assembled),
            RunState::Assembled => Some(RunState::Persisted),
            RunState::Persisted => None,
        }
    }

    /// Move to the next state; the terminal state stays put
    pub fn advance(self) -> RunState {
        self.next().unwrap_or(self)
    }

    pub fn is_terminal(self) -> bool {
        self == RunState::Persisted
    }
}

/// What to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Free-form name of the frozen context (e.g. a vignette id)
    pub label: String,
    pub trials: usize,
    pub temperature: f64,
    pub mode: GenerationMode,
}

impl RunRequest {
    pub fn new(label: impl Into<String>, trials: usize, temperature: f64, mode: GenerationMode) -> Self {
        Self {
            label: label.into(),
            trials,
            temperature,
            mode,
        }
    }
}

/// Settings that shape every run of an assembler
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub sampling: SamplingConfig,
    pub parser: ParserConfig,
    pub metrics: MetricsConfig,
    pub prompts: PromptsConfig,
    pub embedding_permits: usize,
    pub judge_permits: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sampling: config.sampling.clone(),
            parser: config.parser.clone(),
            metrics: config.metrics.clone(),
            prompts: config.prompts.clone(),
            embedding_permits: config.embedding.permits(),
            judge_permits: config.judge.permits(),
        }
    }
}

/// Aggregates written to `metrics.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub n_trials: usize,
    pub temperature: f64,
    pub validity_rate: f64,
    pub valid_trials: usize,
    pub failed_trials: usize,

    /// Whether `stability_*` was computed over valid trials only
    pub stability_only_valid: bool,
    pub stability_mean: Option<f64>,
    pub stability_pair_count: usize,
    pub stability_all_mean: Option<f64>,
    pub stability_all_pair_count: usize,

    pub consistency_mean: Option<f64>,
    pub consistency_pair_count: usize,
    pub consistency_failed_pairs: usize,

    pub alignment_mean: Option<f64>,
    pub alignment_trial_count: usize,
    pub alignment_failed_count: usize,
    pub alignment_per_strategy: BTreeMap<String, f64>,

    pub strategy_counts: BTreeMap<String, usize>,

    pub stability_pairs: Vec<PairwiseScore>,
    pub stability_all_pairs: Vec<PairwiseScore>,
    pub consistency_pairs: Vec<PairwiseScore>,
    pub alignment_per_trial: Vec<TrialAlignment>,
}

/// Both stability variants: `(headline, all non-failed trials)`
pub fn compute_stability(
    trials: &[Trial],
    bounds: ValidityBounds,
    policy: &MetricsConfig,
) -> (PairwiseSummary, PairwiseSummary) {
    let metric = StabilityMetric::new(bounds, policy.empty_pair_score);
    let all = metric.compute(trials, false);
    let headline = if policy.stability_only_valid {
        metric.compute(trials, true)
    } else {
        all.clone()
    };
    (headline, all)
}

impl RunMetrics {
    pub fn assemble(
        trials: &[Trial],
        temperature: f64,
        bounds: ValidityBounds,
        policy: &MetricsConfig,
        consistency: &ConsistencyResult,
        alignment: &AlignmentResult,
    ) -> Self {
        let (stability, stability_all) = compute_stability(trials, bounds, policy);

        Self {
            n_trials: trials.len(),
            temperature,
            validity_rate: validity_rate(trials, bounds),
            valid_trials: trials.iter().filter(|t| t.is_valid(bounds)).count(),
            failed_trials: trials.iter().filter(|t| t.is_transport_failure()).count(),

            stability_only_valid: policy.stability_only_valid,
            stability_mean: stability.mean,
            stability_pair_count: stability.pair_count,
            stability_all_mean: stability_all.mean,
            stability_all_pair_count: stability_all.pair_count,

            consistency_mean: consistency.summary.mean,
            consistency_pair_count: consistency.summary.pair_count,
            consistency_failed_pairs: consistency.failed_pairs,

            alignment_mean: alignment.mean,
            alignment_trial_count: alignment.trial_count,
            alignment_failed_count: alignment.failed_count,
            alignment_per_strategy: alignment.per_strategy.clone(),

            strategy_counts: strategy_counts(trials),

            stability_pairs: stability.pairs,
            stability_all_pairs: stability_all.pairs,
            consistency_pairs: consistency.summary.pairs.clone(),
            alignment_per_trial: alignment.per_trial.clone(),
        }
    }
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub request: RunRequest,
    pub context: Arc<FrozenContext>,
    pub taxonomy: Arc<Taxonomy>,
    pub embedding_model: String,
    pub judge_model: String,
    pub trials: Vec<Trial>,
    pub metrics: RunMetrics,
    pub judgments: Vec<JudgmentRecord>,
    pub state: RunState,
}

/// A run and the directory its artifacts were written to
///
/// The result keeps the state it was assembled in; `state` is the state the
/// run reached once its artifacts were on disk.
#[derive(Debug, Clone)]
pub struct PersistedRun {
    pub dir: PathBuf,
    pub state: RunState,
    pub result: RunResult,
}

/// Replace anything outside `[A-Za-z0-9._-]` so the value is path-safe
pub(crate) fn path_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

pub struct RunAssembler {
    taxonomy: Arc<Taxonomy>,
    parser: Arc<PlanParser>,
    provider: Arc<dyn LLMProvider>,
    consistency: ConsistencyMetric,
    alignment: AlignmentMetric,
    settings: RunSettings,
}

impl RunAssembler {
    pub fn new(
        taxonomy: Arc<Taxonomy>,
        provider: Arc<dyn LLMProvider>,
        scorer: Arc<dyn SimilarityScorer>,
        judge: Arc<dyn Judge>,
        settings: RunSettings,
    ) -> Result<Self, EngineError> {
        let parser = Arc::new(PlanParser::new(
            Arc::clone(&taxonomy),
            &settings.parser.plan_tag,
            settings.parser.label_matching,
        )?);

        let consistency =
            ConsistencyMetric::new(scorer, CallLimiter::new(settings.embedding_permits));
        let alignment = AlignmentMetric::new(
            judge,
            Arc::clone(&taxonomy),
            CallLimiter::new(settings.judge_permits),
        );

        Ok(Self {
            taxonomy,
            parser,
            provider,
            consistency,
            alignment,
            settings,
        })
    }

    /// Wire the configured providers, embedder and judge
    pub fn from_config(config: &Config, taxonomy: Arc<Taxonomy>) -> Result<Self, EngineError> {
        let provider = create_provider(&config.llm.provider, &config.llm, None, None)?;

        let embedder = OllamaEmbedder::new(
            &config.embedding.base_url,
            &config.embedding.model,
            Duration::from_secs(config.embedding.timeout_secs),
        )
        .map_err(|e| EngineError::LLMProvider(e.to_string()))?;
        let scorer: Arc<dyn SimilarityScorer> = Arc::new(EmbeddingSimilarity::new(embedder));

        let judge_provider = create_provider(
            &config.judge.provider,
            &config.llm,
            Some(config.judge.model.as_str()),
            config.judge.base_url.as_deref(),
        )?;
        let judge_prompts = Arc::new(PromptSet::new(
            &config.prompts,
            &taxonomy,
            DEFAULT_LANGUAGE,
        ));
        let judge: Arc<dyn Judge> = Arc::new(LlmJudge::new(
            judge_provider,
            judge_prompts,
            JudgeSettings {
                temperature: config.judge.temperature,
                max_tokens: config.judge.max_tokens,
                timeout: config.sampling.call_timeout(),
            },
        ));

        Self::new(taxonomy, provider, scorer, judge, RunSettings::from_config(config))
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Reject a request before any trial is issued
    pub fn validate(&self, request: &RunRequest) -> Result<(), EngineError> {
        if self.taxonomy.is_empty() {
            return Err(EngineError::Taxonomy(
                "taxonomy must contain at least one strategy".to_string(),
            ));
        }

        let bounds = self.taxonomy.bounds();
        if bounds.min == 0 || bounds.min > bounds.max {
            return Err(EngineError::InvalidBounds {
                min: bounds.min,
                max: bounds.max,
            });
        }

        let minimum = if self.settings.metrics.require_pairwise {
            2
        } else {
            1
        };
        if request.trials < minimum {
            return Err(EngineError::InvalidTrialCount {
                requested: request.trials,
                minimum,
            });
        }

        if !(0.0..=2.0).contains(&request.temperature) {
            return Err(EngineError::Config(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                request.temperature
            )));
        }

        Ok(())
    }

    /// Sample, parse and score one run
    pub async fn execute(
        &self,
        context: Arc<FrozenContext>,
        request: &RunRequest,
    ) -> Result<RunResult, EngineError> {
        let mut state = RunState::Initialized;
        self.validate(request)?;

        let created_at = Utc::now();
        let run_id = format!(
            "{}_{}_{}_t{:.2}",
            created_at.format("%Y%m%d_%H%M%S"),
            path_component(self.provider.model()),
            path_component(&request.label),
            request.temperature
        );

        tracing::info!(
            "Run {}: {} trials, model {}, context {}",
            run_id,
            request.trials,
            self.provider.model(),
            &context.content_hash()[..12]
        );

        state = state.advance();
        tracing::debug!("Run {} -> {:?}", run_id, state);

        let prompts = Arc::new(PromptSet::new(
            &self.settings.prompts,
            &self.taxonomy,
            context.language(),
        ));
        let sampler = TrialSampler::for_mode(
            request.mode,
            Arc::clone(&self.provider),
            prompts,
            Arc::clone(&self.parser),
            CallLimits {
                max_tokens: self.settings.sampling.max_tokens,
                timeout: self.settings.sampling.call_timeout(),
            },
            self.settings.sampling.concurrency,
        );
        let raw = sampler
            .run(&context, request.trials, request.temperature)
            .await;

        state = state.advance();
        tracing::debug!("Run {} -> {:?}", run_id, state);

        let trials: Vec<Trial> = raw
            .into_iter()
            .map(|r| self.parser.parse_trial(r))
            .collect();

        state = state.advance();
        tracing::debug!("Run {} -> {:?}", run_id, state);

        let (consistency, alignment) = tokio::join!(
            self.consistency.compute(&trials),
            self.alignment.compute(&trials)
        );
        let metrics = RunMetrics::assemble(
            &trials,
            request.temperature,
            self.taxonomy.bounds(),
            &self.settings.metrics,
            &consistency,
            &alignment,
        );

        state = state.advance();
        tracing::info!(
            "Run {} assembled: validity {:.2}, stability {:?}, consistency {:?}, alignment {:?}",
            run_id,
            metrics.validity_rate,
            metrics.stability_mean,
            metrics.consistency_mean,
            metrics.alignment_mean
        );

        Ok(RunResult {
            run_id,
            created_at,
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            request: request.clone(),
            context,
            taxonomy: Arc::clone(&self.taxonomy),
            embedding_model: self.consistency.scorer_id().to_string(),
            judge_model: self.alignment.judge_id().to_string(),
            trials,
            metrics,
            judgments: alignment.judgments,
            state,
        })
    }

    /// Execute one run and write its artifacts
    pub async fn execute_and_persist(
        &self,
        store: &ArtifactStore,
        context: Arc<FrozenContext>,
        request: &RunRequest,
    ) -> Result<PersistedRun, EngineError> {
        let result = self.execute(context, request).await?;
        let dir = store.persist(&result)?;
        tracing::info!("Run {} persisted to {}", result.run_id, dir.display());
        Ok(PersistedRun {
            dir,
            state: result.state.advance(),
            result,
        })
    }

    /// One persisted run per temperature, in the given order
    pub async fn sweep(
        &self,
        store: &ArtifactStore,
        context: Arc<FrozenContext>,
        label: &str,
        trials: usize,
        temperatures: &[f64],
        mode: GenerationMode,
    ) -> Result<Vec<PersistedRun>, EngineError> {
        let requests: Vec<RunRequest> = temperatures
            .iter()
            .map(|t| RunRequest::new(label, trials, *t, mode))
            .collect();

        // Validate the whole sweep before spending any calls
        for request in &requests {
            self.validate(request)?;
        }

        let mut runs = Vec::with_capacity(requests.len());
        for request in &requests {
            runs.push(
                self.execute_and_persist(store, Arc::clone(&context), request)
                    .await?,
            );
        }
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_is_forward_only() {
        let mut state = RunState::Initialized;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            state = next;
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                RunState::Initialized,
                RunState::Sampling,
                RunState::Parsing,
                RunState::Metrics,
                RunState::Assembled,
                RunState::Persisted,
            ]
        );
        assert!(state.is_terminal());
        assert_eq!(state.advance(), RunState::Persisted);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&RunState::Assembled).unwrap();
        assert_eq!(json, "\"ASSEMBLED\"");
    }

    #[test]
    fn test_path_component() {
        assert_eq!(path_component("llama3.1:8b"), "llama3.1-8b");
        assert_eq!(path_component("vignette 01/a"), "vignette-01-a");
        assert_eq!(path_component("  "), "unnamed");
    }
}
