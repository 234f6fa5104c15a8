//! Uncertainty estimation from per-step vote distributions.
//!
//! Votes (or a probability distribution over candidate actions) are turned
//! into a normalized frequency distribution, its Shannon entropy is computed,
//! and the entropy is divided by the maximum entropy for the number of
//! distinct labels observed. The result is always in [0, 1], so thresholds
//! stay portable across tasks with different branching factors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Confidence signal for a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoteSet {
    /// Raw categorical votes, one entry per sample.
    Votes(Vec<String>),
    /// Probability (or weight) per label.
    Probabilities(BTreeMap<String, f64>),
}

impl VoteSet {
    /// Build a vote set from raw labels.
    pub fn votes<I, S>(votes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        VoteSet::Votes(votes.into_iter().map(Into::into).collect())
    }

    /// Build a vote set from (label, probability) pairs.
    pub fn probabilities<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        VoteSet::Probabilities(pairs.into_iter().map(|(l, p)| (l.into(), p)).collect())
    }

    /// Whether the set carries no signal at all.
    pub fn is_empty(&self) -> bool {
        match self {
            VoteSet::Votes(v) => v.is_empty(),
            VoteSet::Probabilities(p) => p.is_empty(),
        }
    }

    /// Most likely label; ties go to the label that sorts first.
    pub fn majority(&self) -> Option<String> {
        let distribution = UncertaintyEstimator::distribution(self).ok()?;
        distribution
            .into_iter()
            .fold(None::<(String, f64)>, |best, (label, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((label, p)),
            })
            .map(|(label, _)| label)
    }
}

impl From<Vec<String>> for VoteSet {
    fn from(votes: Vec<String>) -> Self {
        VoteSet::Votes(votes)
    }
}

impl From<Vec<&str>> for VoteSet {
    fn from(votes: Vec<&str>) -> Self {
        VoteSet::votes(votes)
    }
}

/// Full breakdown of an uncertainty computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyEstimate {
    /// Normalized entropy (0.0-1.0).
    pub score: f64,
    /// Shannon entropy of the distribution in bits.
    pub entropy_bits: f64,
    /// Number of labels with non-zero mass.
    pub distinct_labels: usize,
    /// Normalized distribution over the observed labels.
    pub distribution: BTreeMap<String, f64>,
}

/// Stateless estimator turning vote sets into uncertainty scores.
#[derive(Debug, Clone, Copy, Default)]
pub struct UncertaintyEstimator;

impl UncertaintyEstimator {
    /// Normalized uncertainty in [0, 1] for a vote set.
    pub fn estimate(votes: &VoteSet) -> CoreResult<f64> {
        Self::analyze(votes).map(|e| e.score)
    }

    /// Uncertainty plus the distribution and raw entropy behind it.
    pub fn analyze(votes: &VoteSet) -> CoreResult<UncertaintyEstimate> {
        let distribution = Self::distribution(votes)?;
        let distinct_labels = distribution.len();

        let entropy_bits: f64 = distribution
            .values()
            .filter(|p| **p > 0.0)
            .map(|p| -p * p.log2())
            .sum();

        let score = if distinct_labels <= 1 {
            0.0
        } else {
            let max_entropy = (distinct_labels as f64).log2();
            (entropy_bits / max_entropy).clamp(0.0, 1.0)
        };

        Ok(UncertaintyEstimate {
            score,
            entropy_bits,
            distinct_labels,
            distribution,
        })
    }

    /// Normalized frequency distribution over the labels with non-zero mass.
    pub fn distribution(votes: &VoteSet) -> CoreResult<BTreeMap<String, f64>> {
        match votes {
            VoteSet::Votes(labels) => {
                if labels.is_empty() {
                    return Err(CoreError::invalid_input("vote set is empty"));
                }
                let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                for label in labels {
                    *counts.entry(label.clone()).or_default() += 1;
                }
                let total = labels.len() as f64;
                Ok(counts
                    .into_iter()
                    .map(|(label, count)| (label, count as f64 / total))
                    .collect())
            }
            VoteSet::Probabilities(probs) => {
                if probs.is_empty() {
                    return Err(CoreError::invalid_input("probability distribution is empty"));
                }
                if let Some((label, p)) = probs.iter().find(|(_, p)| !p.is_finite() || **p < 0.0) {
                    return Err(CoreError::invalid_input(format!(
                        "probability for '{}' must be finite and non-negative, got {}",
                        label, p
                    )));
                }
                let total: f64 = probs.values().sum();
                if total <= 0.0 {
                    return Err(CoreError::invalid_input(
                        "probability distribution has no mass",
                    ));
                }
                Ok(probs
                    .iter()
                    .filter(|(_, p)| **p > 0.0)
                    .map(|(label, p)| (label.clone(), p / total))
                    .collect())
            }
        }
    }
}
