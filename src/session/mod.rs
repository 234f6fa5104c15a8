//! Per-session facade for the driving loop.
//!
//! A [`Session`] owns one trajectory graph and one failure monitor. Each call
//! to [`Session::record_step`] takes the action, observation and votes the
//! loop produced and returns the node id, uncertainty, next compute budget and
//! current alerts. The session never decides whether to continue; the loop
//! reads the outcome and may call [`Session::backtrack_to`] or stop.
//!
//! # Step pipeline
//!
//! ```text
//! votes → estimate → allocate ─┐
//!                              ├→ graph node + edge → monitor → alerts
//! action/observation → hijack ─┘
//! ```
//!
//! Everything that can reject the input runs before the graph or the monitor
//! is touched, so a failed step leaves the session as it was.

use std::collections::BTreeSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocator::{AllocationDecision, ComputeAllocator};
use crate::config::{Config, SessionConfig};
use crate::error::{AppResult, CoreError, CoreResult};
use crate::monitor::{AlertKind, FailureMonitor, HijackDetector, StepRecord};
use crate::pruner::{PruneReport, TrajectoryPruner};
use crate::trajectory::{NodeId, TrajectoryGraph};
use crate::uncertainty::{UncertaintyEstimator, VoteSet};

/// What the driving loop reports for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    /// Action the agent took
    pub action: String,
    /// What the environment returned
    #[serde(default)]
    pub observation: Option<String>,
    /// Votes or probabilities over candidate actions
    pub votes: VoteSet,
    /// External hijack indicator (0.0 - 1.0); keyword heuristic when absent
    #[serde(default)]
    pub hijack_indicator: Option<f64>,
}

impl StepInput {
    /// Step with no observation and no external hijack indicator.
    pub fn new(action: impl Into<String>, votes: impl Into<VoteSet>) -> Self {
        Self {
            action: action.into(),
            observation: None,
            votes: votes.into(),
            hijack_indicator: None,
        }
    }

    /// Attach an observation.
    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observation = Some(observation.into());
        self
    }

    /// Attach an external hijack indicator.
    pub fn with_hijack_indicator(mut self, indicator: f64) -> Self {
        self.hijack_indicator = Some(indicator);
        self
    }
}

/// What the session hands back for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Node the step was recorded at
    pub node_id: NodeId,
    /// Step index within the session
    pub step: usize,
    /// Uncertainty of the step's votes
    pub uncertainty: f64,
    /// Budget for the next step
    pub allocation: AllocationDecision,
    /// Fatigue score after this step
    pub fatigue: f64,
    /// Hijack score after this step
    pub hijack: f64,
    /// Alerts raised after this step
    pub alerts: BTreeSet<AlertKind>,
    /// Whether the step revisited an earlier state
    pub repeated: bool,
}

/// One point of the monitor's score time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSample {
    /// Step index
    pub step: usize,
    /// Fatigue score after the step
    pub fatigue: f64,
    /// Hijack score after the step
    pub hijack: f64,
}

/// One agent run: graph, monitor and the components that feed them.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    graph: TrajectoryGraph,
    allocator: ComputeAllocator,
    pruner: TrajectoryPruner,
    monitor: FailureMonitor,
    detector: HijackDetector,
    cursor: Option<NodeId>,
    budget: u64,
    steps: usize,
    uncertainty_history: Vec<f64>,
    score_history: Vec<ScoreSample>,
    last_prune: Option<PruneReport>,
}

impl Session {
    /// Create an empty session from validated configuration.
    pub fn new(config: &Config) -> AppResult<Self> {
        config.session.validate()?;
        let session = Self {
            id: Uuid::new_v4(),
            config: config.session.clone(),
            graph: TrajectoryGraph::new(),
            allocator: ComputeAllocator::new(config.allocator.clone())?,
            pruner: TrajectoryPruner::new(config.pruner.clone())?,
            monitor: FailureMonitor::new(config.monitor.clone())?,
            detector: HijackDetector::new(),
            cursor: None,
            budget: config.session.base_compute,
            steps: 0,
            uncertainty_history: Vec::new(),
            score_history: Vec::new(),
            last_prune: None,
        };
        info!(
            session_id = %session.id,
            base_compute = session.config.base_compute,
            prune_every = session.config.prune_every,
            "Session started"
        );
        Ok(session)
    }

    /// Track deviation from `goal` with the keyword heuristic.
    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.detector.set_goal(goal);
        self
    }

    /// Replace the hijack detector.
    pub fn with_detector(mut self, detector: HijackDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Record one step of the driving loop.
    pub fn record_step(&mut self, input: StepInput) -> AppResult<StepOutcome> {
        let start = Instant::now();

        let uncertainty = UncertaintyEstimator::estimate(&input.votes)?;
        if let Some(h) = input.hijack_indicator {
            if !(0.0..=1.0).contains(&h) {
                return Err(CoreError::invalid_input(format!(
                    "hijack indicator must be within [0, 1], got {}",
                    h
                ))
                .into());
            }
        }
        let allocation = self.allocator.decide(self.config.base_compute, uncertainty)?;
        let hijack_indicator = input.hijack_indicator.unwrap_or_else(|| {
            self.detector
                .score(&input.action, input.observation.as_deref())
        });

        let existing = self
            .graph
            .find_by_content(&input.action, input.observation.as_deref())
            .map(|n| n.id.clone());
        let repeated = existing.is_some();

        let node_id = match existing {
            Some(id) if self.config.merge_repeated_states => {
                if self.graph.node(&id).and_then(|n| n.uncertainty).is_none() {
                    self.graph.set_uncertainty(&id, uncertainty)?;
                }
                id
            }
            _ => {
                let id = self.graph.add_node(input.action, input.observation);
                self.graph.set_uncertainty(&id, uncertainty)?;
                id
            }
        };
        if let Some(parent) = &self.cursor {
            self.graph
                .add_edge(parent, &node_id, Some(self.budget as f64))?;
        }

        let step = self.steps;
        self.monitor
            .observe(StepRecord::new(step, uncertainty, repeated, hijack_indicator))?;
        self.steps += 1;
        self.cursor = Some(node_id.clone());
        self.budget = allocation.compute;

        let snapshot = self.monitor.snapshot();
        self.uncertainty_history.push(uncertainty);
        self.score_history.push(ScoreSample {
            step,
            fatigue: snapshot.fatigue,
            hijack: snapshot.hijack,
        });

        if !snapshot.alerts.is_empty() {
            warn!(
                session_id = %self.id,
                step = step,
                alerts = ?snapshot.alerts,
                fatigue = snapshot.fatigue,
                hijack = snapshot.hijack,
                "Monitor alert raised"
            );
        }

        if self.config.prune_every > 0 && self.steps % self.config.prune_every == 0 {
            self.prune()?;
        }

        debug!(
            session_id = %self.id,
            step = step,
            node_id = %node_id,
            uncertainty = uncertainty,
            compute = allocation.compute,
            repeated = repeated,
            latency_us = start.elapsed().as_micros() as u64,
            "Step recorded"
        );

        Ok(StepOutcome {
            node_id,
            step,
            uncertainty,
            allocation,
            fatigue: snapshot.fatigue,
            hijack: snapshot.hijack,
            alerts: snapshot.alerts,
            repeated,
        })
    }

    /// Continue the next step from an earlier node.
    pub fn backtrack_to(&mut self, node_id: &str) -> CoreResult<()> {
        if !self.graph.contains(node_id) {
            return Err(CoreError::unknown_node(node_id));
        }
        debug!(session_id = %self.id, node_id = %node_id, "Backtracked");
        self.cursor = Some(node_id.to_string());
        Ok(())
    }

    /// Prune a snapshot of the graph and keep the report.
    ///
    /// The live graph is left as it is.
    pub fn prune(&mut self) -> CoreResult<&PruneReport> {
        let report = self.pruner.prune(&self.graph.to_snapshot())?;
        info!(
            session_id = %self.id,
            step = self.steps,
            nodes = report.graph.len(),
            pruned = report.pruned_node_ids.len(),
            cycle_edges = report.removed_cycle_edges.len(),
            "Session graph pruned"
        );
        Ok(self.last_prune.insert(report))
    }

    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The live trajectory graph.
    pub fn graph(&self) -> &TrajectoryGraph {
        &self.graph
    }

    /// Node the next step will be attached to.
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Budget granted for the next step.
    pub fn next_budget(&self) -> u64 {
        self.budget
    }

    /// Steps recorded so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Goal tracked for hijack detection.
    pub fn goal(&self) -> Option<&str> {
        self.detector.goal()
    }

    /// Uncertainty of every step, in order.
    pub fn uncertainty_history(&self) -> &[f64] {
        &self.uncertainty_history
    }

    /// Fatigue and hijack scores after every step, in order.
    pub fn score_history(&self) -> &[ScoreSample] {
        &self.score_history
    }

    /// The failure monitor.
    pub fn monitor(&self) -> &FailureMonitor {
        &self.monitor
    }

    /// The most recent prune report, if any.
    pub fn last_prune(&self) -> Option<&PruneReport> {
        self.last_prune.as_ref()
    }
}
