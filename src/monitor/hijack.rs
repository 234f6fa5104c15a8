//! Keyword heuristic producing per-step hijack indicators.

use serde::{Deserialize, Serialize};

/// Phrases that suggest a step is steering away from the session goal.
pub const DEFAULT_HIJACK_KEYWORDS: &[&str] =
    &["ignore previous", "instead", "disregard", "new instructions"];

/// Scores a step's text for signs of goal deviation.
///
/// Without a goal there is nothing to deviate from, so every step scores 0.
/// With a goal, the score is the number of distinct keywords found in the
/// action and observation divided by two, capped at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HijackDetector {
    goal: Option<String>,
    keywords: Vec<String>,
}

impl Default for HijackDetector {
    fn default() -> Self {
        Self {
            goal: None,
            keywords: DEFAULT_HIJACK_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

impl HijackDetector {
    /// Detector with the default keywords and no goal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the goal the session should stay on.
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.set_goal(goal);
        self
    }

    /// Replace the keyword list. Matching is case-insensitive.
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords
            .into_iter()
            .map(|k| k.into().to_lowercase())
            .filter(|k| !k.trim().is_empty())
            .collect();
        self
    }

    /// Set or replace the goal.
    pub fn set_goal(&mut self, goal: impl Into<String>) {
        let goal = goal.into();
        self.goal = if goal.trim().is_empty() {
            None
        } else {
            Some(goal)
        };
    }

    /// The goal being tracked, if any.
    pub fn goal(&self) -> Option<&str> {
        self.goal.as_deref()
    }

    /// Keywords in use.
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Hijack indicator in [0, 1] for one step.
    pub fn score(&self, action: &str, observation: Option<&str>) -> f64 {
        if self.goal.is_none() {
            return 0.0;
        }
        let content = format!("{} {}", action, observation.unwrap_or_default()).to_lowercase();
        let matches = self
            .keywords
            .iter()
            .filter(|k| content.contains(k.as_str()))
            .count();
        (matches as f64 / 2.0).min(1.0)
    }
}
