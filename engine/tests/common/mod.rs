//! Test doubles shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use restab_engine::evaluation::alignment::{Judge, JudgeVerdict, StrategyScore};
use restab_engine::evaluation::consistency::SimilarityScorer;
use restab_engine::evaluation::taxonomy::{Taxonomy, ValidityBounds};
use restab_engine::evaluation::trial::StrategySet;
use restab_engine::evaluation::{RunAssembler, RunSettings};
use restab_engine::llm::{Completion, GenerationRequest, LLMError, LLMProvider, Result};
use sdk::context::FrozenContext;
use sdk::types::{TokenUsage, Turn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted provider does for one call
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
    /// Sleeps far longer than any test timeout
    Hang,
    Panic,
}

/// Provider that replays a fixed script of replies in call order
pub struct ScriptedProvider {
    model: String,
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            model: "scripted-model".to_string(),
            replies: Mutex::new(replies.into()),
            fallback: Reply::Fail("script exhausted".to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with the same text
    pub fn always(text: &str) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.fallback = Reply::Text(text.to_string());
        provider
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Reply::Text(t.to_string())).collect())
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            Reply::Text(text) => Ok(Completion {
                text,
                usage: TokenUsage::new(&self.model, 10, 20),
            }),
            Reply::Fail(msg) => Err(LLMError::NetworkError(msg)),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(LLMError::Unknown("woke up".to_string()))
            }
            Reply::Panic => panic!("scripted provider panic"),
        }
    }
}

/// Identical texts score 1.0, different texts score `different`
pub struct FixedScorer {
    pub different: f64,
}

#[async_trait]
impl SimilarityScorer for FixedScorer {
    fn id(&self) -> &str {
        "fixed-scorer"
    }

    async fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        if a.contains("EMBED_FAIL") || b.contains("EMBED_FAIL") {
            return Err(LLMError::ProviderUnavailable("embedder down".to_string()));
        }
        Ok(if a == b { 1.0 } else { self.different })
    }
}

/// Gives every declared strategy the same score
pub struct FixedJudge {
    pub score: u8,
}

#[async_trait]
impl Judge for FixedJudge {
    fn id(&self) -> &str {
        "fixed-judge"
    }

    async fn judge(
        &self,
        _taxonomy: &Taxonomy,
        declared: &StrategySet,
        response: &str,
    ) -> Result<JudgeVerdict> {
        if response.contains("JUDGE_FAIL") {
            return Err(LLMError::Timeout);
        }
        Ok(JudgeVerdict {
            scores: declared
                .iter()
                .map(|id| StrategyScore {
                    strategy: id.to_string(),
                    score: self.score,
                    justification: "fixed".to_string(),
                })
                .collect(),
            raw_output: String::new(),
            usage: None,
        })
    }
}

pub fn taxonomy() -> Arc<Taxonomy> {
    Arc::new(
        Taxonomy::from_ids(
            ["agency", "mastery", "safety", "empowerment"],
            ValidityBounds::new(1, 2).unwrap(),
        )
        .unwrap(),
    )
}

pub fn context() -> Arc<FrozenContext> {
    Arc::new(FrozenContext::new(
        vec![
            Turn::user("I keep dreaming that I'm trapped in a flooding house."),
            Turn::assistant("Thank you for sharing. What happens next in the dream?"),
            Turn::user("The water rises and I can't find the door."),
        ],
        "en",
    ))
}

/// Settings with serial sampling so scripted replies map to trials in order
pub fn serial_settings() -> RunSettings {
    let mut settings = RunSettings::default();
    settings.sampling.concurrency = 1;
    settings.sampling.call_timeout_secs = 5;
    settings
}

pub fn assembler(provider: Arc<ScriptedProvider>, settings: RunSettings) -> RunAssembler {
    RunAssembler::new(
        taxonomy(),
        provider,
        Arc::new(FixedScorer { different: 0.5 }),
        Arc::new(FixedJudge { score: 2 }),
        settings,
    )
    .unwrap()
}
