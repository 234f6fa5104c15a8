//! CLI commands for offline use of the core.
//!
//! - `estimate`: uncertainty and allocation for one vote set
//! - `replay`: drive a session over a recorded trace of steps
//! - `prune`: prune a saved trajectory graph

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::allocator::{AllocationDecision, ComputeAllocator};
use crate::config::Config;
use crate::error::{AppResult, CoreError};
use crate::monitor::AlertKind;
use crate::pruner::{PruneReport, TrajectoryPruner};
use crate::session::{Session, StepInput, StepOutcome};
use crate::trajectory::{NodeId, TrajectoryGraph};
use crate::uncertainty::{UncertaintyEstimate, UncertaintyEstimator, VoteSet};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "rcf")]
#[command(about = "Trajectory pruning, uncertainty-scaled compute and fatigue monitoring", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    /// Command to run
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Estimate uncertainty for a vote set and size the next step
    Estimate {
        /// Raw votes, one label per argument
        labels: Vec<String>,

        /// Probabilities instead of votes, as label=p
        #[arg(short, long = "probs", value_name = "LABEL=P", num_args = 1..)]
        probs: Vec<String>,

        /// Base compute budget (defaults to the session base budget)
        #[arg(short, long)]
        base: Option<u64>,
    },

    /// Replay a JSON array of steps through a session
    Replay {
        /// Trace file: [{"action": .., "observation": .., "votes": ..}, ..]
        #[arg(short, long)]
        input: PathBuf,

        /// Write the pruned graph here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Goal to track for hijack detection
        #[arg(short, long)]
        goal: Option<String>,
    },

    /// Prune a saved trajectory graph
    Prune {
        /// Graph file written by `replay --output` or `TrajectoryGraph::save`
        #[arg(short, long)]
        input: PathBuf,

        /// Write the pruned graph here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a CLI command.
pub fn execute_command(command: Commands, config: &Config, json: bool) -> CliResult {
    let result = match command {
        Commands::Estimate {
            labels,
            probs,
            base,
        } => execute_estimate(config, labels, probs, base, json),
        Commands::Replay {
            input,
            output,
            goal,
        } => execute_replay(config, &input, output.as_deref(), goal, json),
        Commands::Prune { input, output } => {
            execute_prune(config, &input, output.as_deref(), json)
        }
    };
    match result {
        Ok(message) => CliResult::success(message),
        Err(e) => CliResult::error(format!("Error: {}", e)),
    }
}

// ============================================================================
// estimate
// ============================================================================

#[derive(Serialize)]
struct EstimateOutput {
    #[serde(flatten)]
    estimate: UncertaintyEstimate,
    allocation: AllocationDecision,
}

fn execute_estimate(
    config: &Config,
    labels: Vec<String>,
    probs: Vec<String>,
    base: Option<u64>,
    json: bool,
) -> AppResult<String> {
    let votes = if !probs.is_empty() {
        parse_probabilities(&probs)?
    } else {
        VoteSet::Votes(labels)
    };
    let estimate = UncertaintyEstimator::analyze(&votes)?;
    let allocator = ComputeAllocator::new(config.allocator.clone())?;
    let allocation =
        allocator.decide(base.unwrap_or(config.session.base_compute), estimate.score)?;

    if json {
        return Ok(serde_json::to_string_pretty(&EstimateOutput {
            estimate,
            allocation,
        })?);
    }

    let mut output = String::new();
    output.push_str(&format!(
        "Uncertainty: {:.4} ({:.4} bits over {} label(s))\n",
        estimate.score, estimate.entropy_bits, estimate.distinct_labels
    ));
    for (label, p) in &estimate.distribution {
        output.push_str(&format!("  {:<20} {:.4}\n", label, p));
    }
    output.push_str(&format!(
        "Compute: {} -> {} ({} band)",
        allocation.base_compute, allocation.compute, allocation.band
    ));
    Ok(output)
}

/// Parse `label=p` pairs into a probability vote set.
fn parse_probabilities(pairs: &[String]) -> AppResult<VoteSet> {
    let mut parsed = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let (label, p) = pair
            .split_once('=')
            .ok_or_else(|| CoreError::invalid_input(format!("expected LABEL=P, got '{}'", pair)))?;
        let p: f64 = p.trim().parse().map_err(|_| {
            CoreError::invalid_input(format!("invalid probability in '{}'", pair))
        })?;
        parsed.push((label.trim().to_string(), p));
    }
    Ok(VoteSet::probabilities(parsed))
}

// ============================================================================
// replay / prune
// ============================================================================

#[derive(Serialize)]
struct PruneSummary {
    nodes: usize,
    edges: usize,
    head: NodeId,
    best_path: Vec<NodeId>,
    removed_cycle_edges: usize,
    pruned_node_ids: Vec<NodeId>,
    dropped_orphans: Vec<NodeId>,
}

impl PruneSummary {
    fn from_report(report: &PruneReport) -> AppResult<Self> {
        Ok(Self {
            nodes: report.graph.len(),
            edges: report.graph.edge_count(),
            head: report.head.clone(),
            best_path: report.best_path.clone(),
            removed_cycle_edges: report.removed_cycle_edges.len(),
            pruned_node_ids: report.pruned_node_ids.clone(),
            dropped_orphans: report.dropped_orphans.clone(),
        })
    }

    fn render(&self, output: &mut String) {
        output.push_str(&format!(
            "Pruned graph: {} node(s), {} edge(s)\n",
            self.nodes, self.edges
        ));
        output.push_str(&format!(
            "  Loop edges removed: {}\n  Branch nodes pruned: {}\n  Orphans dropped: {}\n",
            self.removed_cycle_edges,
            self.pruned_node_ids.len(),
            self.dropped_orphans.len()
        ));
        output.push_str(&format!(
            "  Best path: {}",
            self.best_path
                .iter()
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(" -> ")
        ));
    }
}

#[derive(Serialize)]
struct ReplayOutput {
    session_id: String,
    steps: Vec<StepOutcome>,
    prune: PruneSummary,
}

fn execute_replay(
    config: &Config,
    input: &Path,
    output_path: Option<&Path>,
    goal: Option<String>,
    json: bool,
) -> AppResult<String> {
    let trace: Vec<StepInput> = serde_json::from_str(&fs::read_to_string(input)?)?;
    if trace.is_empty() {
        return Err(CoreError::invalid_input("trace contains no steps").into());
    }

    let mut session = Session::new(config)?;
    if let Some(goal) = goal {
        session = session.with_goal(goal);
    }

    let mut outcomes = Vec::with_capacity(trace.len());
    for step in trace {
        outcomes.push(session.record_step(step)?);
    }

    let report = session.prune()?;
    let summary = PruneSummary::from_report(report)?;
    if let Some(path) = output_path {
        report.graph.save(path)?;
    }

    if json {
        return Ok(serde_json::to_string_pretty(&ReplayOutput {
            session_id: session.id().to_string(),
            steps: outcomes,
            prune: summary,
        })?);
    }

    let mut output = String::new();
    output.push_str(&format!("Session {}\n", session.id()));
    for o in &outcomes {
        output.push_str(&format!(
            "  step {:>3}  node {}  u={:.3}  compute={:<4} fatigue={:.3}  hijack={:.3}{}{}\n",
            o.step,
            short_id(&o.node_id),
            o.uncertainty,
            o.allocation.compute,
            o.fatigue,
            o.hijack,
            if o.repeated { "  repeat" } else { "" },
            format_alerts(o.alerts.iter())
        ));
    }
    output.push_str(&format!(
        "Steps: {}  Nodes: {}  Edges: {}\n",
        session.steps(),
        session.graph().len(),
        session.graph().edge_count()
    ));
    summary.render(&mut output);
    if let Some(path) = output_path {
        output.push_str(&format!("\nWrote {}", path.display()));
    }
    Ok(output)
}

fn execute_prune(
    config: &Config,
    input: &Path,
    output_path: Option<&Path>,
    json: bool,
) -> AppResult<String> {
    let graph = TrajectoryGraph::load(input)?;
    let pruner = TrajectoryPruner::new(config.pruner.clone())?;
    let report = pruner.prune(&graph)?;
    let summary = PruneSummary::from_report(&report)?;
    if let Some(path) = output_path {
        report.graph.save(path)?;
    }

    if json {
        return Ok(serde_json::to_string_pretty(&summary)?);
    }
    let mut output = format!(
        "Input graph: {} node(s), {} edge(s)\n",
        graph.len(),
        graph.edge_count()
    );
    summary.render(&mut output);
    if let Some(path) = output_path {
        output.push_str(&format!("\nWrote {}", path.display()));
    }
    Ok(output)
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn format_alerts<'a>(alerts: impl Iterator<Item = &'a AlertKind>) -> String {
    let names: Vec<String> = alerts.map(|a| a.to_string()).collect();
    if names.is_empty() {
        String::new()
    } else {
        format!("  [{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_result_success() {
        let result = CliResult::success("ok");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.message, "ok");
    }

    #[test]
    fn test_cli_result_error() {
        let result = CliResult::error("bad");
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.message, "bad");
    }

    #[test]
    fn test_parse_probabilities() {
        let votes = parse_probabilities(&["a=0.75".to_string(), "b = 0.25".to_string()]).unwrap();
        assert_eq!(votes, VoteSet::probabilities([("a", 0.75), ("b", 0.25)]));

        assert!(parse_probabilities(&["a".to_string()]).is_err());
        assert!(parse_probabilities(&["a=x".to_string()]).is_err());
    }

    #[test]
    fn test_estimate_text_output() {
        let result = execute_command(
            Commands::Estimate {
                labels: vec!["a", "a", "b", "a"].into_iter().map(String::from).collect(),
                probs: vec![],
                base: Some(3),
            },
            &Config::default(),
            false,
        );
        assert_eq!(result.exit_code, 0);
        assert!(result.message.contains("Uncertainty: 0.8113"));
        assert!(result.message.contains("Compute: 3 -> 6 (high band)"));
    }

    #[test]
    fn test_estimate_without_votes_fails() {
        let result = execute_command(
            Commands::Estimate {
                labels: vec![],
                probs: vec![],
                base: None,
            },
            &Config::default(),
            false,
        );
        assert_eq!(result.exit_code, 1);
        assert!(result.message.contains("Invalid input"));
    }

    #[test]
    fn test_short_id_and_alerts() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("ab"), "ab");
        assert_eq!(format_alerts(std::iter::empty()), "");
        assert_eq!(
            format_alerts([AlertKind::Fatigue, AlertKind::Hijack].iter()),
            "  [FATIGUE, HIJACK]"
        );
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["rcf", "estimate", "a", "b", "--base", "4"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Estimate { ref labels, base: Some(4), .. } if labels.len() == 2
        ));

        let cli = Cli::try_parse_from(["rcf", "estimate", "--probs", "a=0.5", "b=0.5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Estimate { ref probs, ref labels, .. } if probs.len() == 2 && labels.is_empty()
        ));

        let cli = Cli::try_parse_from(["rcf", "--json", "prune", "--input", "g.json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Prune { output: None, .. }));
    }
}
