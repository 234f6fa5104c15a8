//! Trajectory pruning - cycle removal and unproductive-branch pruning
//!
//! Operates on a graph snapshot and never touches the live graph. Two passes
//! run in order:
//!
//! 1. **Cycle removal**: iterative depth-first traversal from the root with an
//!    explicit stack of `(node, next child)` frames. An edge to a node still on
//!    the stack closes a loop; that edge is dropped so the loop collapses to
//!    its first occurrence, and traversal resumes with the node's remaining
//!    children. Nodes the traversal never reaches are dropped as orphans.
//! 2. **Branch pruning**: at every node with more than one child, children are
//!    ranked by [`BranchValue`]. The best-ranked child is always kept; any
//!    other child that is unproductive (scored above the threshold, with a
//!    fully scored subtree that never drops back under it and does not lead to
//!    the session head) is cut together with everything only it reaches. This
//!    repeats until nothing changes, which makes pruning idempotent.
//!
//! The head is the most recently added node reachable from the root; it and
//! its ancestors are never pruned.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{PrunerConfig, TieBreak};
use crate::error::{AppError, CoreError, CoreResult};
use crate::trajectory::{Edge, NodeId, TrajectoryGraph};

#[cfg(test)]
#[path = "pruner_tests.rs"]
mod pruner_tests;

/// Ranking of one child at a branch point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchValue {
    /// The child node heading the branch.
    pub node_id: NodeId,
    /// Overall branch value (0.0-1.0); higher is better.
    pub value: f64,
    /// Mean uncertainty over the branch, unscored nodes counting as 1.0.
    pub mean_uncertainty: f64,
    /// Longest path below the child.
    pub depth: usize,
    /// Insertion index of the child, used for tie-breaking.
    pub step: usize,
    /// Whether the branch is eligible for removal.
    pub unproductive: bool,
}

/// Result of a pruning pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PruneReport {
    /// The pruned, acyclic graph.
    pub graph: TrajectoryGraph,
    /// Loop-closing edges removed by cycle removal.
    pub removed_cycle_edges: Vec<Edge>,
    /// Nodes removed by branch pruning, in the order they were cut.
    pub pruned_node_ids: Vec<NodeId>,
    /// Nodes dropped because the root could not reach them.
    pub dropped_orphans: Vec<NodeId>,
    /// Most recently added node that survived.
    pub head: NodeId,
    /// Root to head, taking the best-ranked child that leads to the head at
    /// every branch point.
    pub best_path: Vec<NodeId>,
}

impl PruneReport {
    /// Whether pruning changed anything.
    pub fn is_unchanged(&self) -> bool {
        self.removed_cycle_edges.is_empty()
            && self.pruned_node_ids.is_empty()
            && self.dropped_orphans.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    OnStack,
    Done,
}

/// Result of the loop-detecting traversal.
struct CycleScan {
    back_edges: Vec<usize>,
    cycles: Vec<Vec<usize>>,
    visit: Vec<Visit>,
}

/// Per-node aggregate over everything reachable below it.
#[derive(Debug, Clone, Copy, Default)]
struct SubtreeStats {
    uncertainty_sum: f64,
    count: f64,
    height: usize,
    contains_head: bool,
    resolved: bool,
    fully_scored: bool,
}

/// Removes loops and unproductive branches from trajectory snapshots.
#[derive(Debug, Clone)]
pub struct TrajectoryPruner {
    config: PrunerConfig,
}

impl TrajectoryPruner {
    /// Create a pruner, rejecting inconsistent configuration.
    pub fn new(config: PrunerConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &PrunerConfig {
        &self.config
    }

    /// Every loop in the graph, each listed from the re-entered node to the
    /// node whose edge closes it.
    pub fn detect_cycles(&self, graph: &TrajectoryGraph) -> Vec<Vec<NodeId>> {
        let scan = scan_cycles(graph, 0..graph.len());
        scan.cycles
            .into_iter()
            .map(|c| c.into_iter().map(|i| graph.nodes()[i].id.clone()).collect())
            .collect()
    }

    /// Run both passes and return the reduced graph.
    pub fn prune(&self, graph: &TrajectoryGraph) -> CoreResult<PruneReport> {
        let start = Instant::now();
        graph.root()?;

        let (acyclic, removed_cycle_edges, dropped_orphans) = self.remove_cycles(graph);
        let head = match acyclic.latest_node() {
            Some(n) => n.id.clone(),
            None => return Err(CoreError::invalid_state("graph has no root yet")),
        };

        let mut current = acyclic;
        let mut pruned_node_ids = Vec::new();
        let mut rounds = 0usize;
        loop {
            let cut = self.unproductive_edges(&current, &head);
            if cut.is_empty() {
                break;
            }
            rounds += 1;
            let mut keep_edges = vec![true; current.edge_count()];
            for e in &cut {
                keep_edges[*e] = false;
            }
            let trimmed = current.retain(&vec![true; current.len()], &keep_edges);
            let reach = trimmed.reachable_mask()?;
            for (node, _) in trimmed.nodes().iter().zip(&reach).filter(|(_, r)| !**r) {
                pruned_node_ids.push(node.id.clone());
            }
            let all_edges = vec![true; trimmed.edge_count()];
            current = trimmed.retain(&reach, &all_edges);
        }
        let best_path = self.ranked_path(&current, &head)?;

        if !dropped_orphans.is_empty() {
            warn!(
                orphan_count = dropped_orphans.len(),
                "Dropped nodes unreachable from the root"
            );
        }

        info!(
            input_nodes = graph.len(),
            output_nodes = current.len(),
            cycle_edges_removed = removed_cycle_edges.len(),
            pruned_count = pruned_node_ids.len(),
            rounds = rounds,
            latency_us = start.elapsed().as_micros() as u64,
            "Trajectory prune completed"
        );

        Ok(PruneReport {
            graph: current,
            removed_cycle_edges,
            pruned_node_ids,
            dropped_orphans,
            head,
            best_path,
        })
    }

    /// Node ids from the root to the most recently added surviving node.
    pub fn best_path(&self, graph: &TrajectoryGraph) -> CoreResult<Vec<NodeId>> {
        Ok(self.prune(graph)?.best_path)
    }

    /// Ranked branch values of a node's children, best first.
    ///
    /// Loops are removed before ranking, so this works on any snapshot.
    pub fn branch_values(
        &self,
        graph: &TrajectoryGraph,
        node_id: &str,
    ) -> CoreResult<Vec<BranchValue>> {
        graph.root()?;
        let (acyclic, _, _) = self.remove_cycles(graph);
        let idx = acyclic
            .index_of(node_id)
            .ok_or_else(|| CoreError::unknown_node(node_id))?;
        let head = acyclic.len() - 1;
        let stats = self.subtree_stats(&acyclic, head);
        Ok(self.rank_children(&acyclic, idx, &stats))
    }

    /// Walk from the root to the head along the best-ranked child whose
    /// subtree holds the head. The graph must be acyclic.
    fn ranked_path(&self, graph: &TrajectoryGraph, head_id: &str) -> CoreResult<Vec<NodeId>> {
        let head = graph
            .index_of(head_id)
            .ok_or_else(|| CoreError::unknown_node(head_id))?;
        let stats = self.subtree_stats(graph, head);

        let mut path = vec![graph.root()?.id.clone()];
        let mut u = 0usize;
        while u != head {
            let next = self
                .rank_children(graph, u, &stats)
                .into_iter()
                .filter_map(|b| graph.index_of(&b.node_id))
                .find(|&v| stats[v].contains_head)
                .ok_or_else(|| {
                    CoreError::invalid_state(format!(
                        "head {} is not reachable from the root",
                        head_id
                    ))
                })?;
            path.push(graph.nodes()[next].id.clone());
            u = next;
        }
        Ok(path)
    }

    // ========================================================================
    // Pass 1: cycle removal
    // ========================================================================

    fn remove_cycles(&self, graph: &TrajectoryGraph) -> (TrajectoryGraph, Vec<Edge>, Vec<NodeId>) {
        let scan = scan_cycles(graph, std::iter::once(0));

        let keep_nodes: Vec<bool> = scan.visit.iter().map(|v| *v != Visit::Unvisited).collect();
        let mut keep_edges = vec![true; graph.edge_count()];
        let mut removed = Vec::with_capacity(scan.back_edges.len());
        for &e in &scan.back_edges {
            keep_edges[e] = false;
            removed.push(graph.edges()[e].clone());
            debug!(
                source = %graph.edges()[e].source,
                target = %graph.edges()[e].target,
                "Removing loop-closing edge"
            );
        }
        let orphans = graph
            .nodes()
            .iter()
            .zip(&keep_nodes)
            .filter(|(_, k)| !**k)
            .map(|(n, _)| n.id.clone())
            .collect();

        (graph.retain(&keep_nodes, &keep_edges), removed, orphans)
    }

    // ========================================================================
    // Pass 2: unproductive branches
    // ========================================================================

    /// Edges that cut an unproductive child off a branch point.
    fn unproductive_edges(&self, graph: &TrajectoryGraph, head_id: &str) -> Vec<usize> {
        let Some(head) = graph.index_of(head_id) else {
            return Vec::new();
        };
        let stats = self.subtree_stats(graph, head);

        let mut cut = Vec::new();
        for u in 0..graph.len() {
            let ranked = self.rank_children(graph, u, &stats);
            if ranked.len() < 2 {
                continue;
            }
            for loser in ranked.iter().skip(1).filter(|b| b.unproductive) {
                debug!(
                    parent = %graph.nodes()[u].id,
                    child = %loser.node_id,
                    value = loser.value,
                    mean_uncertainty = loser.mean_uncertainty,
                    "Pruning unproductive branch"
                );
                cut.extend(
                    graph
                        .outgoing_edges(u)
                        .iter()
                        .copied()
                        .filter(|&e| graph.edges()[e].target == loser.node_id),
                );
            }
        }
        cut
    }

    /// Distinct children of `u`, best branch first.
    fn rank_children(
        &self,
        graph: &TrajectoryGraph,
        u: usize,
        stats: &[SubtreeStats],
    ) -> Vec<BranchValue> {
        let mut children: Vec<usize> = Vec::new();
        for &e in graph.outgoing_edges(u) {
            let v = graph.edge_target(e);
            if !children.contains(&v) {
                children.push(v);
            }
        }

        let mut ranked: Vec<BranchValue> = children
            .into_iter()
            .map(|v| self.branch_value(graph, v, &stats[v]))
            .collect();
        let tie_break = self.config.tie_break;
        ranked.sort_by(|a, b| {
            b.value.total_cmp(&a.value).then_with(|| match tie_break {
                TieBreak::Earliest => a.step.cmp(&b.step),
                TieBreak::Latest => b.step.cmp(&a.step),
            })
        });
        ranked
    }

    fn branch_value(&self, graph: &TrajectoryGraph, v: usize, s: &SubtreeStats) -> BranchValue {
        let node = &graph.nodes()[v];
        let mean_uncertainty = if s.count > 0.0 {
            s.uncertainty_sum / s.count
        } else {
            1.0
        };
        let depth_penalty = s.height as f64 / (s.height as f64 + 1.0);
        let (wu, wd) = (self.config.uncertainty_weight, self.config.depth_weight);
        let value = 1.0 - (wu * mean_uncertainty + wd * depth_penalty) / (wu + wd);

        let threshold = self.config.unproductive_threshold;
        let unproductive = matches!(node.uncertainty, Some(u) if u > threshold)
            && s.fully_scored
            && !s.resolved
            && !s.contains_head;

        BranchValue {
            node_id: node.id.clone(),
            value: value.clamp(0.0, 1.0),
            mean_uncertainty,
            depth: s.height,
            step: node.step,
            unproductive,
        }
    }

    /// Post-order aggregation over an acyclic graph, reachable part only.
    fn subtree_stats(&self, graph: &TrajectoryGraph, head: usize) -> Vec<SubtreeStats> {
        let threshold = self.config.unproductive_threshold;
        let mut stats = vec![SubtreeStats::default(); graph.len()];
        if graph.is_empty() {
            return stats;
        }

        let mut visit = vec![Visit::Unvisited; graph.len()];
        let mut stack = vec![(0usize, 0usize)];
        visit[0] = Visit::OnStack;
        while let Some(&(u, pos)) = stack.last() {
            let out = graph.outgoing_edges(u);
            if pos < out.len() {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let v = graph.edge_target(out[pos]);
                if visit[v] == Visit::Unvisited {
                    visit[v] = Visit::OnStack;
                    stack.push((v, 0));
                }
                continue;
            }

            let node = &graph.nodes()[u];
            let mut s = SubtreeStats {
                uncertainty_sum: node.uncertainty.unwrap_or(1.0),
                count: 1.0,
                height: 0,
                contains_head: u == head,
                resolved: matches!(node.uncertainty, Some(x) if x <= threshold),
                fully_scored: node.uncertainty.is_some(),
            };
            for &e in out {
                let v = graph.edge_target(e);
                if visit[v] != Visit::Done {
                    continue;
                }
                let c = stats[v];
                s.uncertainty_sum += c.uncertainty_sum;
                s.count += c.count;
                s.height = s.height.max(c.height + 1);
                s.contains_head |= c.contains_head;
                s.resolved |= c.resolved;
                s.fully_scored &= c.fully_scored;
            }
            stats[u] = s;
            visit[u] = Visit::Done;
            stack.pop();
        }
        stats
    }
}

/// Depth-first loop detection from each unvisited start node in turn.
fn scan_cycles(graph: &TrajectoryGraph, starts: impl IntoIterator<Item = usize>) -> CycleScan {
    let mut visit = vec![Visit::Unvisited; graph.len()];
    let mut back_edges = Vec::new();
    let mut cycles = Vec::new();

    for start in starts {
        if start >= graph.len() || visit[start] != Visit::Unvisited {
            continue;
        }
        let mut stack = vec![(start, 0usize)];
        visit[start] = Visit::OnStack;
        while let Some(&(u, pos)) = stack.last() {
            let out = graph.outgoing_edges(u);
            if pos >= out.len() {
                visit[u] = Visit::Done;
                stack.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            let e = out[pos];
            let v = graph.edge_target(e);
            match visit[v] {
                Visit::Unvisited => {
                    visit[v] = Visit::OnStack;
                    stack.push((v, 0));
                }
                Visit::OnStack => {
                    back_edges.push(e);
                    if let Some(at) = stack.iter().position(|(n, _)| *n == v) {
                        cycles.push(stack[at..].iter().map(|(n, _)| *n).collect());
                    }
                }
                Visit::Done => {}
            }
        }
    }

    CycleScan {
        back_edges,
        cycles,
        visit,
    }
}

impl Default for TrajectoryPruner {
    fn default() -> Self {
        Self {
            config: PrunerConfig::default(),
        }
    }
}
