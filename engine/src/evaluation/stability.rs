//! Level 1: plan stability
//!
//! Pairwise Jaccard similarity between the strategy sets declared by the
//! trials of a run.

use std::collections::BTreeMap;

use super::pairwise::{unordered_pairs, PairwiseScore, PairwiseSummary};
use super::taxonomy::ValidityBounds;
use super::trial::{StrategySet, Trial};

/// `|A ∩ B| / |A ∪ B|`, or `empty_pair_score` when both sets are empty
pub fn jaccard(a: &StrategySet, b: &StrategySet, empty_pair_score: f64) -> f64 {
    let union = a.union_len(b);
    if union == 0 {
        return empty_pair_score;
    }
    a.intersection_len(b) as f64 / union as f64
}

/// Pairwise Jaccard over `(trial index, set)` entries
pub fn pairwise_jaccard(sets: &[(usize, &StrategySet)], empty_pair_score: f64) -> PairwiseSummary {
    if sets.len() < 2 {
        return PairwiseSummary::insufficient();
    }

    let pairs = unordered_pairs(sets.len())
        .map(|(a, b)| {
            let (trial_i, set_a) = sets[a];
            let (trial_j, set_b) = sets[b];
            PairwiseScore {
                trial_i,
                trial_j,
                score: jaccard(set_a, set_b, empty_pair_score),
            }
        })
        .collect();

    PairwiseSummary::from_pairs(pairs)
}

/// Fraction of all trials whose plan parsed within the bound
///
/// The denominator includes transport failures.
pub fn validity_rate(trials: &[Trial], bounds: ValidityBounds) -> f64 {
    if trials.is_empty() {
        return 0.0;
    }
    let valid = trials.iter().filter(|t| t.is_valid(bounds)).count();
    valid as f64 / trials.len() as f64
}

/// How often each strategy was declared across the run
pub fn strategy_counts(trials: &[Trial]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for strategies in trials.iter().filter_map(Trial::strategies) {
        for id in strategies.iter() {
            *counts.entry(id.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

#[derive(Debug, Clone, Copy)]
pub struct StabilityMetric {
    bounds: ValidityBounds,
    empty_pair_score: f64,
}

impl StabilityMetric {
    pub fn new(bounds: ValidityBounds, empty_pair_score: f64) -> Self {
        Self {
            bounds,
            empty_pair_score,
        }
    }

    /// Pairwise Jaccard over the run
    ///
    /// Transport failures never participate. With `only_valid`, trials whose
    /// set is empty or out of bounds are excluded too; otherwise their
    /// (possibly empty) sets are compared as-is.
    pub fn compute(&self, trials: &[Trial], only_valid: bool) -> PairwiseSummary {
        let sets: Vec<(usize, &StrategySet)> = trials
            .iter()
            .filter(|t| !only_valid || t.is_valid(self.bounds))
            .filter_map(|t| t.strategies().map(|s| (t.index, s)))
            .collect();

        pairwise_jaccard(&sets, self.empty_pair_score)
    }
}
