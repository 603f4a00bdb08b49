//! Integration tests for trial sampling
//!
//! Uses a scripted provider, so no model server is needed.

mod common;

use async_trait::async_trait;
use common::{context, taxonomy, Reply, ScriptedProvider};
use restab_engine::config::PromptsConfig;
use restab_engine::evaluation::parser::{LabelMatching, PlanParser};
use restab_engine::evaluation::prompts::PromptSet;
use restab_engine::evaluation::sampler::{CallLimits, GenerationMode, TrialSampler};
use restab_engine::evaluation::trial::{CallKind, RawOutput, TrialOutcome};
use restab_engine::llm::{Completion, GenerationRequest, LLMProvider, Result};
use sdk::types::TokenUsage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Records the highest number of calls in flight at once
#[derive(Default)]
struct CountingProvider {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl LLMProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    fn model(&self) -> &str {
        "counting-model"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<Completion> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Completion {
            text: "<plan>agency</plan>\nOk.".to_string(),
            usage: TokenUsage::new("counting-model", 1, 1),
        })
    }
}

fn sampler(provider: Arc<dyn LLMProvider>, mode: GenerationMode, concurrency: usize) -> TrialSampler {
    let taxonomy = taxonomy();
    let prompts = Arc::new(PromptSet::new(&PromptsConfig::default(), &taxonomy, "en"));
    let parser = Arc::new(PlanParser::new(taxonomy, "plan", LabelMatching::Exact).unwrap());
    TrialSampler::for_mode(
        mode,
        provider,
        prompts,
        parser,
        CallLimits {
            max_tokens: 256,
            timeout: Duration::from_millis(200),
        },
        concurrency,
    )
}

#[tokio::test]
async fn test_fused_trials_split_plan_and_response() {
    let provider = Arc::new(ScriptedProvider::always(
        "<plan>agency / mastery</plan>\nImagine the door opening and you stepping out.",
    ));
    let sampler = sampler(Arc::clone(&provider) as Arc<dyn LLMProvider>, GenerationMode::Fused, 3);

    let trials = sampler.run(&context(), 5, 0.7).await;

    assert_eq!(trials.len(), 5);
    for (i, trial) in trials.iter().enumerate() {
        assert_eq!(trial.index, i + 1);
        assert_eq!(trial.temperature, 0.7);
        assert_eq!(trial.calls.len(), 1);
        assert_eq!(trial.calls[0].call, CallKind::Fused);
        match &trial.output {
            RawOutput::Generated { plan, response } => {
                assert_eq!(plan, "<plan>agency / mastery</plan>");
                assert_eq!(response, "Imagine the door opening and you stepping out.");
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    // Every call sees the same frozen context at the requested temperature
    let requests = provider.requests();
    assert_eq!(requests.len(), 5);
    assert!(requests.iter().all(|r| r.prompt == requests[0].prompt));
    assert!(requests.iter().all(|r| r.temperature == 0.7 && r.max_tokens == 256));
    assert!(requests[0].prompt.starts_with("Conversation history:\nAI: "));
    assert!(requests[0].prompt.contains("User: The water rises"));
}

#[tokio::test]
async fn test_chained_trials_condition_response_on_plan() {
    let provider = Arc::new(ScriptedProvider::texts(&[
        "<plan>safety</plan>",
        "You are safe now; the water recedes.",
    ]));
    let sampler = sampler(Arc::clone(&provider) as Arc<dyn LLMProvider>, GenerationMode::Chained, 1);

    let trials = sampler.run(&context(), 1, 0.3).await;

    assert_eq!(trials.len(), 1);
    let kinds: Vec<CallKind> = trials[0].calls.iter().map(|c| c.call).collect();
    assert_eq!(kinds, vec![CallKind::Plan, CallKind::Response]);
    match &trials[0].output {
        RawOutput::Generated { plan, response } => {
            assert_eq!(plan, "<plan>safety</plan>");
            assert_eq!(response, "You are safe now; the water recedes.");
        }
        other => panic!("unexpected output: {:?}", other),
    }

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].system.contains("<plan>safety</plan>"));
    assert!(!requests[0].system.contains("<plan>safety</plan>"));
}

#[tokio::test]
async fn test_chained_failure_names_the_failed_call() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::Text("<plan>safety</plan>".to_string()),
        Reply::Fail("connection reset".to_string()),
    ]));
    let sampler = sampler(provider, GenerationMode::Chained, 1);

    let trials = sampler.run(&context(), 1, 0.3).await;

    match &trials[0].output {
        RawOutput::Failed { reason, plan } => {
            assert!(reason.starts_with("response call:"), "reason: {}", reason);
            assert!(reason.contains("connection reset"));
            assert_eq!(plan, "<plan>safety</plan>");
        }
        other => panic!("expected failure, got {:?}", other),
    }
    // The successful plan call is still accounted for
    assert_eq!(trials[0].calls.len(), 1);
}

#[tokio::test]
async fn test_failed_chained_trial_record_keeps_plan() {
    let taxonomy = taxonomy();
    let parser = PlanParser::new(Arc::clone(&taxonomy), "plan", LabelMatching::Exact).unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::Text("<plan>safety</plan>".to_string()),
        Reply::Fail("boom".to_string()),
    ]));
    let sampler = sampler(provider, GenerationMode::Chained, 1);

    let raw = sampler.run(&context(), 1, 0.7).await.remove(0);
    let trial = parser.parse_trial(raw);
    let json = serde_json::to_value(&trial).unwrap();

    assert_eq!(json["status"], "transport_failure");
    assert_eq!(json["plan"], "<plan>safety</plan>");
    assert_eq!(json["response"], "");
    assert_eq!(json["strategies"], serde_json::json!([]));
    assert!(json["reason"].as_str().unwrap().starts_with("response call:"));
    assert_eq!(json["calls"][0]["call"], "plan");
}

#[tokio::test]
async fn test_timed_out_trial_does_not_affect_siblings() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::Text("<plan>agency</plan>\nFirst.".to_string()),
        Reply::Hang,
        Reply::Text("<plan>mastery</plan>\nThird.".to_string()),
    ]));
    let sampler = sampler(provider, GenerationMode::Fused, 1);

    let trials = sampler.run(&context(), 3, 0.7).await;

    assert_eq!(trials.len(), 3);
    assert!(matches!(trials[0].output, RawOutput::Generated { .. }));
    match &trials[1].output {
        RawOutput::Failed { reason, .. } => assert!(reason.to_lowercase().contains("timeout")),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(trials[1].calls.is_empty());
    assert!(matches!(trials[2].output, RawOutput::Generated { .. }));
}

#[tokio::test]
async fn test_panicking_trial_becomes_failure() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Reply::Panic,
        Reply::Text("<plan>agency</plan>\nStill here.".to_string()),
    ]));
    let sampler = sampler(provider, GenerationMode::Fused, 1);

    let trials = sampler.run(&context(), 2, 0.7).await;

    assert_eq!(trials.len(), 2);
    assert!(matches!(trials[0].output, RawOutput::Failed { .. }));
    assert!(matches!(trials[1].output, RawOutput::Generated { .. }));
}

#[tokio::test]
async fn test_output_without_plan_block_parses_as_failure() {
    let taxonomy = taxonomy();
    let parser = PlanParser::new(Arc::clone(&taxonomy), "plan", LabelMatching::Exact).unwrap();
    let provider = Arc::new(ScriptedProvider::always("Let's take a deep breath together."));
    let sampler = sampler(provider, GenerationMode::Fused, 2);

    let trials = sampler.run(&context(), 2, 1.0).await;

    for raw in trials {
        let trial = parser.parse_trial(raw);
        match trial.outcome {
            TrialOutcome::ParseFailure { plan, response } => {
                assert!(plan.is_empty());
                assert_eq!(response, "Let's take a deep breath together.");
            }
            other => panic!("expected parse failure, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_results_are_ordered_under_concurrency() {
    let provider = Arc::new(ScriptedProvider::always("<plan>agency</plan>\nOk."));
    let sampler = sampler(provider, GenerationMode::Fused, 8);

    let trials = sampler.run(&context(), 20, 0.9).await;

    let indices: Vec<usize> = trials.iter().map(|t| t.index).collect();
    assert_eq!(indices, (1..=20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_in_flight_calls_never_exceed_concurrency() {
    let provider = Arc::new(CountingProvider::default());
    let sampler = sampler(Arc::clone(&provider) as Arc<dyn LLMProvider>, GenerationMode::Fused, 3);

    let trials = sampler.run(&context(), 12, 0.7).await;

    assert_eq!(trials.len(), 12);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 12);
    let peak = provider.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak in-flight calls: {}", peak);
    assert!(peak >= 2, "trials did not overlap: {}", peak);
}

#[tokio::test]
async fn test_chained_calls_respect_concurrency() {
    let provider = Arc::new(CountingProvider::default());
    let sampler = sampler(Arc::clone(&provider) as Arc<dyn LLMProvider>, GenerationMode::Chained, 2);

    sampler.run(&context(), 6, 0.7).await;

    assert_eq!(provider.calls.load(Ordering::SeqCst), 12);
    assert!(provider.peak.load(Ordering::SeqCst) <= 2);
}
