//! Rescripting evaluation
//!
//! Samples N independent plan+response trials from one frozen context and
//! scores them at three levels: plan stability (Jaccard), response
//! consistency (embedding cosine) and plan/response alignment (LLM judge).

pub mod alignment;
pub mod artifacts;
pub mod assembler;
pub mod consistency;
pub mod limiter;
pub mod pairwise;
pub mod parser;
pub mod prompts;
pub mod sampler;
pub mod stability;
pub mod taxonomy;
pub mod trial;

pub use alignment::{AlignmentMetric, AlignmentResult, Judge, JudgeVerdict, LlmJudge};
pub use artifacts::{ArtifactStore, LoadedRun, RunManifest};
pub use assembler::{PersistedRun, RunAssembler, RunMetrics, RunRequest, RunResult, RunSettings, RunState};
pub use consistency::{ConsistencyMetric, ConsistencyResult, EmbeddingSimilarity, SimilarityScorer};
pub use limiter::CallLimiter;
pub use pairwise::{PairwiseScore, PairwiseSummary};
pub use parser::{LabelMatching, PlanParser};
pub use prompts::PromptSet;
pub use sampler::{GenerationMode, TrialSampler};
pub use stability::StabilityMetric;
pub use taxonomy::{Strategy, Taxonomy, ValidityBounds};
pub use trial::{StrategySet, Trial, TrialOutcome};
