//! Multi-trial sampler
//!
//! Issues N independent generation requests against one frozen context at a
//! fixed temperature. Trials are launched in index order with bounded
//! fan-out and joined in index order, so the returned vector is always
//! `[trial 1, ..., trial N]` no matter which finished first.
//!
//! A trial whose call fails or times out is recorded as failed; it never
//! cancels its siblings. The same holds for a trial task that panics.

use async_trait::async_trait;
use sdk::context::FrozenContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::parser::PlanParser;
use super::prompts::PromptSet;
use super::trial::{CallKind, CallRecord, RawOutput, RawTrial};
use crate::llm::{Completion, GenerationRequest, LLMError, LLMProvider};

/// How plan and response are produced
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// One call emits the plan block followed by the response
    #[default]
    Fused,

    /// One call for the plan, then one for the response conditioned on it
    #[serde(alias = "split")]
    Chained,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::Fused => write!(f, "fused"),
            GenerationMode::Chained => write!(f, "chained"),
        }
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fused" => Ok(GenerationMode::Fused),
            // "split" is accepted for older configs
            "chained" | "split" => Ok(GenerationMode::Chained),
            other => Err(format!(
                "unknown generation mode '{}', expected fused or chained",
                other
            )),
        }
    }
}

/// Per-call limits shared by every trial of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallLimits {
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Texts of a completed trial
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub plan: String,
    pub response: String,
    pub calls: Vec<CallRecord>,
}

/// A trial that could not complete; keeps usage and output of calls that did
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationFailure {
    pub reason: String,
    /// Plan text when the plan call of a chained trial completed
    pub plan: String,
    pub calls: Vec<CallRecord>,
}

/// One way of turning the rendered context into a plan and a response
#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    fn mode(&self) -> GenerationMode;

    async fn generate(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> Result<Generation, GenerationFailure>;
}

/// Issue one call under the configured timeout
async fn call_with_timeout(
    provider: &dyn LLMProvider,
    request: &GenerationRequest,
    timeout: Duration,
) -> Result<Completion, LLMError> {
    match tokio::time::timeout(timeout, provider.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(LLMError::Timeout),
    }
}

pub struct FusedGeneration {
    provider: Arc<dyn LLMProvider>,
    prompts: Arc<PromptSet>,
    parser: Arc<PlanParser>,
    limits: CallLimits,
}

impl FusedGeneration {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        prompts: Arc<PromptSet>,
        parser: Arc<PlanParser>,
        limits: CallLimits,
    ) -> Self {
        Self {
            provider,
            prompts,
            parser,
            limits,
        }
    }
}

#[async_trait]
impl GenerationStrategy for FusedGeneration {
    fn mode(&self) -> GenerationMode {
        GenerationMode::Fused
    }

    async fn generate(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> Result<Generation, GenerationFailure> {
        let request = GenerationRequest::new(self.prompts.fused(), prompt)
            .with_temperature(temperature)
            .with_max_tokens(self.limits.max_tokens);

        let completion = call_with_timeout(self.provider.as_ref(), &request, self.limits.timeout)
            .await
            .map_err(|e| GenerationFailure {
                reason: e.to_string(),
                plan: String::new(),
                calls: Vec::new(),
            })?;

        let (plan, response) = self.parser.split_fused(&completion.text);
        Ok(Generation {
            plan,
            response,
            calls: vec![CallRecord {
                call: CallKind::Fused,
                usage: completion.usage,
            }],
        })
    }
}

pub struct ChainedGeneration {
    provider: Arc<dyn LLMProvider>,
    prompts: Arc<PromptSet>,
    limits: CallLimits,
}

impl ChainedGeneration {
    pub fn new(provider: Arc<dyn LLMProvider>, prompts: Arc<PromptSet>, limits: CallLimits) -> Self {
        Self {
            provider,
            prompts,
            limits,
        }
    }
}

#[async_trait]
impl GenerationStrategy for ChainedGeneration {
    fn mode(&self) -> GenerationMode {
        GenerationMode::Chained
    }

    async fn generate(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> Result<Generation, GenerationFailure> {
        let mut calls = Vec::with_capacity(2);

        let plan_request = GenerationRequest::new(self.prompts.plan(), prompt)
            .with_temperature(temperature)
            .with_max_tokens(self.limits.max_tokens);
        let plan = match call_with_timeout(self.provider.as_ref(), &plan_request, self.limits.timeout)
            .await
        {
            Ok(completion) => {
                calls.push(CallRecord {
                    call: CallKind::Plan,
                    usage: completion.usage,
                });
                completion.text.trim().to_string()
            }
            Err(e) => {
                return Err(GenerationFailure {
                    reason: format!("plan call: {}", e),
                    plan: String::new(),
                    calls,
                })
            }
        };

        let response_request =
            GenerationRequest::new(self.prompts.response_with_plan(&plan), prompt)
                .with_temperature(temperature)
                .with_max_tokens(self.limits.max_tokens);
        match call_with_timeout(
            self.provider.as_ref(),
            &response_request,
            self.limits.timeout,
        )
        .await
        {
            Ok(completion) => {
                calls.push(CallRecord {
                    call: CallKind::Response,
                    usage: completion.usage,
                });
                Ok(Generation {
                    plan,
                    response: completion.text.trim().to_string(),
                    calls,
                })
            }
            Err(e) => Err(GenerationFailure {
                reason: format!("response call: {}", e),
                plan,
                calls,
            }),
        }
    }
}

/// Runs N trials of one strategy with bounded concurrency
pub struct TrialSampler {
    strategy: Arc<dyn GenerationStrategy>,
    prompts: Arc<PromptSet>,
    concurrency: usize,
}

impl TrialSampler {
    pub fn new(
        strategy: Arc<dyn GenerationStrategy>,
        prompts: Arc<PromptSet>,
        concurrency: usize,
    ) -> Self {
        Self {
            strategy,
            prompts,
            concurrency: concurrency.max(1),
        }
    }

    /// Build the sampler for a generation mode
    pub fn for_mode(
        mode: GenerationMode,
        provider: Arc<dyn LLMProvider>,
        prompts: Arc<PromptSet>,
        parser: Arc<PlanParser>,
        limits: CallLimits,
        concurrency: usize,
    ) -> Self {
        let strategy: Arc<dyn GenerationStrategy> = match mode {
            GenerationMode::Fused => Arc::new(FusedGeneration::new(
                provider,
                Arc::clone(&prompts),
                parser,
                limits,
            )),
            GenerationMode::Chained => {
                Arc::new(ChainedGeneration::new(provider, Arc::clone(&prompts), limits))
            }
        };
        Self::new(strategy, prompts, concurrency)
    }

    pub fn mode(&self) -> GenerationMode {
        self.strategy.mode()
    }

    /// Run a single trial against an already rendered prompt
    pub async fn run_trial(&self, prompt: &str, index: usize, temperature: f64) -> RawTrial {
        execute_trial(self.strategy.as_ref(), prompt, index, temperature).await
    }

    /// Run `trials` independent trials; output is ordered by trial index
    pub async fn run(
        &self,
        context: &FrozenContext,
        trials: usize,
        temperature: f64,
    ) -> Vec<RawTrial> {
        let prompt: Arc<str> = Arc::from(self.prompts.render_context(context));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        tracing::info!(
            "Sampling {} trials at temperature {} ({} mode, concurrency {})",
            trials,
            temperature,
            self.mode(),
            self.concurrency
        );

        let mut handles: Vec<(usize, JoinHandle<RawTrial>)> = Vec::with_capacity(trials);
        for index in 1..=trials {
            // Acquire before spawning so trial k is issued before trial k+1
            let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
            let strategy = Arc::clone(&self.strategy);
            let prompt = Arc::clone(&prompt);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                execute_trial(strategy.as_ref(), &prompt, index, temperature).await
            });
            handles.push((index, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles {
            match handle.await {
                Ok(raw) => results.push(raw),
                Err(e) => {
                    tracing::warn!("Trial {} task aborted: {}", index, e);
                    results.push(RawTrial::failed(
                        index,
                        temperature,
                        Vec::new(),
                        format!("trial task aborted: {}", e),
                    ));
                }
            }
        }

        results
    }
}

async fn execute_trial(
    strategy: &dyn GenerationStrategy,
    prompt: &str,
    index: usize,
    temperature: f64,
) -> RawTrial {
    let start = std::time::Instant::now();
    match strategy.generate(prompt, temperature).await {
        Ok(generation) => {
            tracing::debug!(
                "Trial {} generated in {:.1}s",
                index,
                start.elapsed().as_secs_f64()
            );
            RawTrial {
                index,
                temperature,
                calls: generation.calls,
                output: RawOutput::Generated {
                    plan: generation.plan,
                    response: generation.response,
                },
            }
        }
        Err(failure) => {
            tracing::warn!("Trial {} failed: {}", index, failure.reason);
            RawTrial::failed(index, temperature, failure.calls, failure.reason)
                .with_partial_plan(failure.plan)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("fused".parse::<GenerationMode>().unwrap(), GenerationMode::Fused);
        assert_eq!(
            "Chained".parse::<GenerationMode>().unwrap(),
            GenerationMode::Chained
        );
        assert_eq!(
            "split".parse::<GenerationMode>().unwrap(),
            GenerationMode::Chained
        );
        assert!("both".parse::<GenerationMode>().is_err());
    }

    #[test]
    fn test_mode_display_round_trips() {
        for mode in [GenerationMode::Fused, GenerationMode::Chained] {
            assert_eq!(mode.to_string().parse::<GenerationMode>().unwrap(), mode);
        }
    }
}
