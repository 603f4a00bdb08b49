//! Pairwise score bookkeeping shared by the stability and consistency metrics

use serde::{Deserialize, Serialize};

/// Score of one unordered trial pair, `trial_i < trial_j`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PairwiseScore {
    pub trial_i: usize,
    pub trial_j: usize,
    pub score: f64,
}

/// Every pair score of a metric plus their mean
///
/// `mean` is `None` when fewer than two trials participated, which is
/// distinct from a computed mean of `0.0`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PairwiseSummary {
    pub mean: Option<f64>,
    pub pair_count: usize,
    pub pairs: Vec<PairwiseScore>,
}

impl PairwiseSummary {
    pub fn from_pairs(pairs: Vec<PairwiseScore>) -> Self {
        let pair_count = pairs.len();
        let mean = mean(pairs.iter().map(|p| p.score));
        Self {
            mean,
            pair_count,
            pairs,
        }
    }

    /// Nothing to compare
    pub fn insufficient() -> Self {
        Self::default()
    }
}

/// Index pairs `(a, b)` with `a < b` over `0..n`, in lexicographic order
pub fn unordered_pairs(n: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n).flat_map(move |a| (a + 1..n).map(move |b| (a, b)))
}

/// Arithmetic mean, `None` for an empty input
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
