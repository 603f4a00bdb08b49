//! Level 2: response consistency
//!
//! Pairwise semantic similarity between the response texts of a run. The
//! similarity itself comes from a [`SimilarityScorer`]; the shipped scorer
//! embeds each text once and compares embeddings by cosine similarity.
//!
//! Trials without a response (transport failures, blank output) are left out
//! of the pair set rather than scored as zero. A pair whose similarity call
//! fails is logged and left out of the mean.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::limiter::CallLimiter;
use super::pairwise::{unordered_pairs, PairwiseScore, PairwiseSummary};
use super::trial::Trial;
use crate::llm::embedding::Embedder;
use crate::llm::{LLMError, Result};

/// Semantic similarity between two texts, in [0, 1]
#[async_trait]
pub trait SimilarityScorer: Send + Sync {
    /// Versioned identifier of the underlying model
    fn id(&self) -> &str;

    async fn similarity(&self, a: &str, b: &str) -> Result<f64>;

    /// Called once with every text of a run before any pair is scored
    async fn prepare(&self, _texts: &[&str]) -> Result<()> {
        Ok(())
    }
}

/// Cosine similarity clamped to [0, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(LLMError::ParseError(format!(
            "embedding dimensions differ: {} vs {}",
            a.len(),
            b.len()
        )));
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0))
}

/// Embedding-backed scorer with a per-text cache
pub struct EmbeddingSimilarity<E: Embedder> {
    embedder: E,
    cache: Mutex<HashMap<String, Arc<Vec<f32>>>>,
}

impl<E: Embedder> EmbeddingSimilarity<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn embeddings(&self, texts: &[&str]) -> Result<Vec<Arc<Vec<f32>>>> {
        let missing: Vec<String> = {
            let cache = self.cache.lock().await;
            let mut missing: Vec<String> = Vec::new();
            for text in texts {
                if !cache.contains_key(*text) && !missing.iter().any(|m| m.as_str() == *text) {
                    missing.push((*text).to_string());
                }
            }
            missing
        };

        if !missing.is_empty() {
            let vectors = self.embedder.embed(&missing).await?;
            let mut cache = self.cache.lock().await;
            for (text, vector) in missing.into_iter().zip(vectors) {
                cache.insert(text, Arc::new(vector));
            }
        }

        let cache = self.cache.lock().await;
        texts
            .iter()
            .map(|text| {
                cache
                    .get(*text)
                    .map(Arc::clone)
                    .ok_or_else(|| LLMError::Unknown("embedding missing after fetch".to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl<E: Embedder> SimilarityScorer for EmbeddingSimilarity<E> {
    fn id(&self) -> &str {
        self.embedder.model()
    }

    async fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        let vectors = self.embeddings(&[a, b]).await?;
        cosine_similarity(&vectors[0], &vectors[1])
    }

    async fn prepare(&self, texts: &[&str]) -> Result<()> {
        self.embeddings(texts).await.map(|_| ())
    }
}

/// Level 2 result
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsistencyResult {
    #[serde(flatten)]
    pub summary: PairwiseSummary,

    /// Pairs whose similarity call failed
    pub failed_pairs: usize,
}

pub struct ConsistencyMetric {
    scorer: Arc<dyn SimilarityScorer>,
    limiter: CallLimiter,
}

impl ConsistencyMetric {
    pub fn new(scorer: Arc<dyn SimilarityScorer>, limiter: CallLimiter) -> Self {
        Self { scorer, limiter }
    }

    pub fn scorer_id(&self) -> &str {
        self.scorer.id()
    }

    pub async fn compute(&self, trials: &[Trial]) -> ConsistencyResult {
        let responses: Vec<(usize, &str)> = trials
            .iter()
            .filter_map(|t| t.response().map(|r| (t.index, r)))
            .filter(|(_, r)| !r.trim().is_empty())
            .collect();

        if responses.len() < 2 {
            return ConsistencyResult::default();
        }

        let texts: Vec<&str> = responses.iter().map(|(_, r)| *r).collect();
        if let Err(e) = self.limiter.run(self.scorer.prepare(&texts)).await {
            tracing::warn!("Similarity scorer warm-up failed: {}", e);
        }

        let calls = unordered_pairs(responses.len()).map(|(a, b)| {
            let (trial_i, text_a) = responses[a];
            let (trial_j, text_b) = responses[b];
            async move {
                let result = self
                    .limiter
                    .run(self.scorer.similarity(text_a, text_b))
                    .await;
                (trial_i, trial_j, result)
            }
        });

        let mut pairs = Vec::new();
        let mut failed_pairs = 0;
        for (trial_i, trial_j, result) in join_all(calls).await {
            match result {
                Ok(score) if score.is_finite() => pairs.push(PairwiseScore {
                    trial_i,
                    trial_j,
                    score: score.clamp(0.0, 1.0),
                }),
                Ok(score) => {
                    tracing::warn!(
                        "Similarity for trials {} and {} is not finite ({})",
                        trial_i,
                        trial_j,
                        score
                    );
                    failed_pairs += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Similarity for trials {} and {} failed: {}",
                        trial_i,
                        trial_j,
                        e
                    );
                    failed_pairs += 1;
                }
            }
        }

        ConsistencyResult {
            summary: PairwiseSummary::from_pairs(pairs),
            failed_pairs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cosine() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
        // Opposite vectors clamp to zero
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_err());
    }

    struct CountingEmbedder {
        batches: AtomicUsize,
        texts: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model(&self) -> &str {
            "test-embed:v1"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_embeddings_are_cached() {
        let scorer = EmbeddingSimilarity::new(CountingEmbedder {
            batches: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        });

        scorer.prepare(&["one", "three", "one"]).await.unwrap();
        let s = scorer.similarity("one", "three").await.unwrap();
        assert!(s > 0.0 && s <= 1.0);
        assert!((scorer.similarity("one", "one").await.unwrap() - 1.0).abs() < 1e-9);

        assert_eq!(scorer.embedder.batches.load(Ordering::SeqCst), 1);
        assert_eq!(scorer.embedder.texts.load(Ordering::SeqCst), 2);
        assert_eq!(scorer.id(), "test-embed:v1");
    }
}
