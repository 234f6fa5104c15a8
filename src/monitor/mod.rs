//! Failure monitor - fatigue and hijack scoring over a rolling window.
//!
//! The monitor keeps a bounded [`SessionWindow`] of per-step records and
//! derives two scores from it:
//!
//! - **Fatigue**: weighted combination of session length (log-scaled against
//!   a configured maximum), repetition rate in the window, mean uncertainty in
//!   the window, and the rising trend of uncertainty across the window.
//! - **Hijack**: recency-weighted average of per-step hijack indicators, each
//!   step older than the latest discounted by a constant decay factor.
//!
//! # Architecture
//!
//! ```text
//! StepRecord → SessionWindow (FIFO) → fatigue / hijack scores → alerts
//! ```
//!
//! Alerts are suppressed until the window holds the configured minimum number
//! of observations.

mod hijack;

pub use hijack::{HijackDetector, DEFAULT_HIJACK_KEYWORDS};

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MonitorConfig;
use crate::error::{AppError, CoreError, CoreResult};

// ============================================================================
// Records and window
// ============================================================================

/// One observed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step index within the session
    pub step: usize,
    /// Uncertainty of the step (0.0 - 1.0)
    pub uncertainty: f64,
    /// Whether the step repeated an earlier state
    pub repeated: bool,
    /// Hijack indicator for the step (0.0 - 1.0)
    pub hijack: f64,
    /// When the step was observed
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    /// Record stamped with the current time.
    pub fn new(step: usize, uncertainty: f64, repeated: bool, hijack: f64) -> Self {
        Self {
            step,
            uncertainty,
            repeated,
            hijack,
            timestamp: Utc::now(),
        }
    }

    fn validate(&self) -> CoreResult<()> {
        if !(0.0..=1.0).contains(&self.uncertainty) {
            return Err(CoreError::invalid_input(format!(
                "step {} uncertainty must be within [0, 1], got {}",
                self.step, self.uncertainty
            )));
        }
        if !(0.0..=1.0).contains(&self.hijack) {
            return Err(CoreError::invalid_input(format!(
                "step {} hijack indicator must be within [0, 1], got {}",
                self.step, self.hijack
            )));
        }
        Ok(())
    }
}

/// Bounded FIFO history of step records, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionWindow {
    records: VecDeque<StepRecord>,
    capacity: usize,
}

impl SessionWindow {
    /// Empty window holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, returning the evicted oldest one on overflow.
    pub fn push(&mut self, record: StepRecord) -> Option<StepRecord> {
        let evicted = if self.records.len() >= self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    /// Maximum number of records kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the window holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the next push will evict.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Most recent record.
    pub fn latest(&self) -> Option<&StepRecord> {
        self.records.back()
    }

    /// Records from oldest to newest.
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, StepRecord> {
        self.records.iter()
    }
}

// ============================================================================
// Alerts and scores
// ============================================================================

/// Kind of alert raised by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertKind {
    /// Session quality is degrading.
    Fatigue,
    /// Recent steps deviate from the goal.
    Hijack,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Fatigue => write!(f, "FATIGUE"),
            AlertKind::Hijack => write!(f, "HIJACK"),
        }
    }
}

/// Unweighted fatigue components, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FatigueComponents {
    /// Session length relative to the configured maximum
    pub length: f64,
    /// Share of repeated steps in the window
    pub repetition: f64,
    /// Mean uncertainty in the window
    pub uncertainty: f64,
    /// Rising uncertainty across the window
    pub trend: f64,
}

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    /// Current fatigue score
    pub fatigue: f64,
    /// Current hijack score
    pub hijack: f64,
    /// Alerts that would fire now
    pub alerts: BTreeSet<AlertKind>,
    /// Steps observed over the monitor's lifetime
    pub observed: usize,
}

// ============================================================================
// Monitor
// ============================================================================

/// Stateful fatigue and hijack scorer for one session.
#[derive(Debug, Clone)]
pub struct FailureMonitor {
    config: MonitorConfig,
    window: SessionWindow,
    total_observed: usize,
}

impl FailureMonitor {
    /// Create a monitor, rejecting inconsistent configuration.
    pub fn new(config: MonitorConfig) -> Result<Self, AppError> {
        config.validate()?;
        let window = SessionWindow::new(config.window_size);
        Ok(Self {
            config,
            window,
            total_observed: 0,
        })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Append a step to the window, evicting the oldest on overflow.
    pub fn observe(&mut self, record: StepRecord) -> CoreResult<()> {
        record.validate()?;
        let step = record.step;
        let evicted = self.window.push(record);
        self.total_observed += 1;

        debug!(
            step = step,
            window_len = self.window.len(),
            evicted_step = evicted.map(|r| r.step),
            total_observed = self.total_observed,
            "Step observed"
        );
        Ok(())
    }

    /// Read access to the rolling window.
    pub fn window(&self) -> &SessionWindow {
        &self.window
    }

    /// Steps observed since construction, including evicted ones.
    pub fn total_observed(&self) -> usize {
        self.total_observed
    }

    /// The individual fatigue factors before weighting.
    pub fn fatigue_components(&self) -> FatigueComponents {
        let n = self.window.len();
        if n == 0 {
            return FatigueComponents::default();
        }
        let count = n as f64;

        let length = ((self.total_observed as f64 + 1.0).ln()
            / (self.config.max_session_length as f64 + 1.0).ln())
        .min(1.0);
        let repetition = self.window.iter().filter(|r| r.repeated).count() as f64 / count;
        let uncertainty = self.window.iter().map(|r| r.uncertainty).sum::<f64>() / count;

        FatigueComponents {
            length,
            repetition,
            uncertainty,
            trend: self.uncertainty_trend(),
        }
    }

    /// Weighted fatigue score in [0, 1].
    pub fn fatigue_score(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let c = self.fatigue_components();
        let w = &self.config.fatigue_weights;
        let weighted = w.length * c.length
            + w.repetition * c.repetition
            + w.uncertainty * c.uncertainty
            + w.trend * c.trend;
        (weighted / w.total()).clamp(0.0, 1.0)
    }

    /// Recency-weighted mean of hijack indicators in [0, 1].
    pub fn hijack_score(&self) -> f64 {
        let decay = self.config.hijack_decay;
        let mut weight = 1.0;
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for record in self.window.iter().rev() {
            weighted_sum += weight * record.hijack;
            weight_sum += weight;
            weight *= decay;
        }
        if weight_sum > 0.0 {
            (weighted_sum / weight_sum).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Alerts whose thresholds are currently met.
    ///
    /// Always empty while the window holds fewer than `min_observations`.
    pub fn check_alerts(&self) -> BTreeSet<AlertKind> {
        let mut alerts = BTreeSet::new();
        if self.window.len() < self.config.min_observations {
            return alerts;
        }
        if self.fatigue_score() >= self.config.fatigue_threshold {
            alerts.insert(AlertKind::Fatigue);
        }
        if self.hijack_score() >= self.config.hijack_threshold {
            alerts.insert(AlertKind::Hijack);
        }
        alerts
    }

    /// Scores and alerts as of now.
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            fatigue: self.fatigue_score(),
            hijack: self.hijack_score(),
            alerts: self.check_alerts(),
            observed: self.total_observed,
        }
    }

    /// Least-squares rise of uncertainty across the window, clamped to [0, 1].
    ///
    /// The slope per step is scaled by the window span, so a climb from 0 to 1
    /// over the window scores 1. Falling uncertainty scores 0.
    fn uncertainty_trend(&self) -> f64 {
        let n = self.window.len();
        if n < 2 {
            return 0.0;
        }
        let count = n as f64;
        let mean_x = (count - 1.0) / 2.0;
        let mean_y = self.window.iter().map(|r| r.uncertainty).sum::<f64>() / count;

        let (mut cov, mut var) = (0.0, 0.0);
        for (i, record) in self.window.iter().enumerate() {
            let dx = i as f64 - mean_x;
            cov += dx * (record.uncertainty - mean_y);
            var += dx * dx;
        }
        let slope = cov / var;
        (slope * (count - 1.0)).clamp(0.0, 1.0)
    }
}
