//! Trajectory graph - append-only record of an agent session
//!
//! Each step of a session becomes a [`Node`]; each transition becomes an
//! [`Edge`] from the node the agent was at to the node it moved to. The first
//! node added is the root. Nodes live in an insertion-ordered arena indexed by
//! id, and every node keeps the ordered list of its outgoing edges, so
//! traversal and serialization are deterministic.
//!
//! Nodes are immutable once created, except for the uncertainty score which
//! may be set exactly once.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{AppResult, CoreError, CoreResult};


/// Identifier of a node in a trajectory graph.
pub type NodeId = String;

/// One decision point in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier.
    pub id: NodeId,
    /// The action taken at this step.
    pub action: String,
    /// Optional observation or result summary.
    pub observation: Option<String>,
    /// Normalized uncertainty for this step, once computed (0.0-1.0).
    pub uncertainty: Option<f64>,
    /// Insertion index within the session.
    pub step: usize,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
}

/// Directed transition from a parent node to a child node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Parent node ID.
    pub source: NodeId,
    /// Child node ID.
    pub target: NodeId,
    /// Optional cost of the transition (e.g. compute spent).
    pub weight: Option<f64>,
}

/// Structural form of a graph used for serialization.
///
/// Both sequences are in insertion order, which is enough to rebuild the
/// graph exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphRecord {
    /// Nodes in insertion order.
    pub nodes: Vec<Node>,
    /// Edges in insertion order.
    pub edges: Vec<Edge>,
}

/// Append-only directed graph of a single session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectoryGraph {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    /// Outgoing edge indices per node, in insertion order.
    outgoing: Vec<Vec<usize>>,
    /// Incoming edge indices per node, in insertion order.
    incoming: Vec<Vec<usize>>,
    next_step: usize,
}

impl Node {
    fn new(id: NodeId, action: String, observation: Option<String>, step: usize) -> Self {
        Self {
            id,
            action,
            observation,
            uncertainty: None,
            step,
            created_at: Utc::now(),
        }
    }

    /// Whether this node carries the given action and observation.
    pub fn matches(&self, action: &str, observation: Option<&str>) -> bool {
        self.action == action && self.observation.as_deref() == observation
    }
}

impl Edge {
    /// Whether this edge starts and ends at the same node.
    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}

impl TrajectoryGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node with a generated id and return the id.
    ///
    /// The first node appended becomes the root.
    pub fn add_node(
        &mut self,
        action: impl Into<String>,
        observation: Option<String>,
    ) -> NodeId {
        let mut id = Uuid::new_v4().to_string();
        while self.index.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }
        let step = self.next_step;
        self.push_node(Node::new(id.clone(), action.into(), observation, step));
        id
    }

    /// Append a node with a caller-supplied id.
    pub fn add_node_with_id(
        &mut self,
        id: impl Into<NodeId>,
        action: impl Into<String>,
        observation: Option<String>,
    ) -> CoreResult<NodeId> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::invalid_input("node id cannot be empty"));
        }
        if self.index.contains_key(&id) {
            return Err(CoreError::invalid_state(format!(
                "duplicate node id: {}",
                id
            )));
        }
        let step = self.next_step;
        self.push_node(Node::new(id.clone(), action.into(), observation, step));
        Ok(id)
    }

    /// Append an edge from `parent_id` to `child_id`.
    ///
    /// Repeated edges between the same pair are kept as distinct attempts.
    pub fn add_edge(&mut self, parent_id: &str, child_id: &str, weight: Option<f64>) -> CoreResult<()> {
        let source = self.require(parent_id)?;
        let target = self.require(child_id)?;
        if let Some(w) = weight {
            if !w.is_finite() || w < 0.0 {
                return Err(CoreError::invalid_input(format!(
                    "edge weight must be finite and non-negative, got {}",
                    w
                )));
            }
        }
        self.push_edge(
            source,
            target,
            Edge {
                source: parent_id.to_string(),
                target: child_id.to_string(),
                weight,
            },
        );
        debug!(source = %parent_id, target = %child_id, "Edge added");
        Ok(())
    }

    /// Record the uncertainty of a node. Allowed exactly once per node.
    pub fn set_uncertainty(&mut self, node_id: &str, uncertainty: f64) -> CoreResult<()> {
        let idx = self.require(node_id)?;
        if !(0.0..=1.0).contains(&uncertainty) {
            return Err(CoreError::invalid_input(format!(
                "uncertainty must be within [0, 1], got {}",
                uncertainty
            )));
        }
        let node = &mut self.nodes[idx];
        if node.uncertainty.is_some() {
            return Err(CoreError::invalid_state(format!(
                "uncertainty already set for node {}",
                node_id
            )));
        }
        node.uncertainty = Some(uncertainty);
        Ok(())
    }

    /// Ordered child ids of a node; empty for leaves.
    pub fn neighbors(&self, node_id: &str) -> CoreResult<Vec<NodeId>> {
        let idx = self.require(node_id)?;
        Ok(self.outgoing[idx]
            .iter()
            .map(|&e| self.edges[e].target.clone())
            .collect())
    }

    /// Ordered parent ids of a node; empty for the root.
    pub fn parents(&self, node_id: &str) -> CoreResult<Vec<NodeId>> {
        let idx = self.require(node_id)?;
        Ok(self.incoming[idx]
            .iter()
            .map(|&e| self.edges[e].source.clone())
            .collect())
    }

    /// Immutable copy of the graph for pruning or analysis.
    pub fn to_snapshot(&self) -> TrajectoryGraph {
        self.clone()
    }

    /// The root node.
    pub fn root(&self) -> CoreResult<&Node> {
        self.nodes
            .first()
            .ok_or_else(|| CoreError::invalid_state("graph has no root yet"))
    }

    /// The most recently added node, if any.
    pub fn latest_node(&self) -> Option<&Node> {
        self.nodes.last()
    }

    /// Look up a node by id.
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.index.get(node_id).map(|&i| &self.nodes[i])
    }

    /// Whether the graph holds a node with this id.
    pub fn contains(&self, node_id: &str) -> bool {
        self.index.contains_key(node_id)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// First node (in insertion order) carrying this action and observation.
    pub fn find_by_content(&self, action: &str, observation: Option<&str>) -> Option<&Node> {
        self.nodes.iter().find(|n| n.matches(action, observation))
    }

    /// Ids of every node reachable from the root, in insertion order.
    pub fn reachable_from_root(&self) -> CoreResult<Vec<NodeId>> {
        let reach = self.reachable_mask()?;
        Ok(self
            .nodes
            .iter()
            .zip(reach)
            .filter(|(_, r)| *r)
            .map(|(n, _)| n.id.clone())
            .collect())
    }

    /// Fail with `InvalidState` unless every node is reachable from the root.
    pub fn validate_connected(&self) -> CoreResult<()> {
        let unreachable = self.reachable_mask()?.iter().filter(|r| !**r).count();
        if unreachable > 0 {
            return Err(CoreError::invalid_state(format!(
                "{} node(s) are not reachable from the root",
                unreachable
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    /// Structural copy of the graph.
    pub fn to_record(&self) -> GraphRecord {
        GraphRecord {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }

    /// Rebuild a graph from its structural form.
    ///
    /// Ids, uncertainty ranges, insertion order and edge endpoints are
    /// re-checked. Nodes the root cannot reach are kept as they were saved;
    /// the pruner drops them.
    pub fn from_record(record: GraphRecord) -> CoreResult<Self> {
        let mut graph = Self::new();
        for node in record.nodes {
            if node.id.trim().is_empty() {
                return Err(CoreError::invalid_input("node id cannot be empty"));
            }
            if graph.index.contains_key(&node.id) {
                return Err(CoreError::invalid_state(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
            if let Some(u) = node.uncertainty {
                if !(0.0..=1.0).contains(&u) {
                    return Err(CoreError::invalid_input(format!(
                        "uncertainty of node {} must be within [0, 1], got {}",
                        node.id, u
                    )));
                }
            }
            if let Some(prev) = graph.nodes.last() {
                if node.step <= prev.step {
                    return Err(CoreError::invalid_state(format!(
                        "node {} breaks insertion order (step {} after {})",
                        node.id, node.step, prev.step
                    )));
                }
            }
            graph.push_node(node);
        }
        for edge in record.edges {
            graph.add_edge(&edge.source, &edge.target, edge.weight)?;
        }
        Ok(graph)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_record())?)
    }

    /// Deserialize from JSON produced by [`TrajectoryGraph::to_json`].
    pub fn from_json(json: &str) -> AppResult<Self> {
        let record: GraphRecord = serde_json::from_str(json)?;
        Ok(Self::from_record(record)?)
    }

    /// Write the graph to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a graph from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    // ========================================================================
    // Index-level access for traversal
    // ========================================================================

    pub(crate) fn index_of(&self, node_id: &str) -> Option<usize> {
        self.index.get(node_id).copied()
    }

    pub(crate) fn outgoing_edges(&self, idx: usize) -> &[usize] {
        &self.outgoing[idx]
    }

    pub(crate) fn edge_target(&self, edge_idx: usize) -> usize {
        self.index[&self.edges[edge_idx].target]
    }

    /// Copy of the graph keeping only the flagged nodes and edges.
    ///
    /// Edges touching a dropped node are dropped with it.
    pub(crate) fn retain(&self, keep_nodes: &[bool], keep_edges: &[bool]) -> TrajectoryGraph {
        let mut graph = Self::new();
        for (node, _) in self.nodes.iter().zip(keep_nodes).filter(|(_, k)| **k) {
            graph.push_node(node.clone());
        }
        for (edge, _) in self.edges.iter().zip(keep_edges).filter(|(_, k)| **k) {
            if let (Some(s), Some(t)) = (graph.index_of(&edge.source), graph.index_of(&edge.target)) {
                graph.push_edge(s, t, edge.clone());
            }
        }
        graph
    }

    pub(crate) fn reachable_mask(&self) -> CoreResult<Vec<bool>> {
        self.root()?;
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![0usize];
        seen[0] = true;
        while let Some(u) = stack.pop() {
            for &e in &self.outgoing[u] {
                let v = self.edge_target(e);
                if !seen[v] {
                    seen[v] = true;
                    stack.push(v);
                }
            }
        }
        Ok(seen)
    }

    fn require(&self, node_id: &str) -> CoreResult<usize> {
        self.index_of(node_id)
            .ok_or_else(|| CoreError::unknown_node(node_id))
    }

    fn push_node(&mut self, node: Node) {
        self.next_step = node.step + 1;
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
    }

    fn push_edge(&mut self, source: usize, target: usize, edge: Edge) {
        let edge_idx = self.edges.len();
        self.edges.push(edge);
        self.outgoing[source].push(edge_idx);
        self.incoming[target].push(edge_idx);
    }
}
