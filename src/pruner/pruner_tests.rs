use super::*;
use pretty_assertions::assert_eq;

/// Build a graph from `(id, uncertainty)` nodes and `(source, target)` edges.
fn build(nodes: &[(&str, Option<f64>)], edges: &[(&str, &str)]) -> TrajectoryGraph {
    let mut graph = TrajectoryGraph::new();
    for (id, u) in nodes {
        graph.add_node_with_id(*id, format!("act {}", id), None).unwrap();
        if let Some(u) = u {
            graph.set_uncertainty(id, *u).unwrap();
        }
    }
    for (s, t) in edges {
        graph.add_edge(s, t, None).unwrap();
    }
    graph
}

fn edge_pairs(graph: &TrajectoryGraph) -> Vec<(String, String)> {
    graph
        .edges()
        .iter()
        .map(|e| (e.source.clone(), e.target.clone()))
        .collect()
}

fn ids(graph: &TrajectoryGraph) -> Vec<String> {
    graph.nodes().iter().map(|n| n.id.clone()).collect()
}

/// root branches into a bad branch explored first and a good one that
/// holds the head.
fn two_branches(bad_leaf: Option<f64>) -> TrajectoryGraph {
    build(
        &[
            ("root", Some(0.5)),
            ("bad", Some(0.9)),
            ("bad2", bad_leaf),
            ("good", Some(0.2)),
            ("good2", Some(0.3)),
        ],
        &[
            ("root", "bad"),
            ("bad", "bad2"),
            ("root", "good"),
            ("good", "good2"),
        ],
    )
}

#[test]
fn test_loop_collapses_to_first_occurrence() {
    let graph = build(
        &[("root", None), ("A", None), ("B", None)],
        &[("root", "A"), ("A", "B"), ("B", "A")],
    );
    let report = TrajectoryPruner::default().prune(&graph).unwrap();

    assert_eq!(
        edge_pairs(&report.graph),
        vec![
            ("root".to_string(), "A".to_string()),
            ("A".to_string(), "B".to_string())
        ]
    );
    assert_eq!(report.removed_cycle_edges.len(), 1);
    assert_eq!(report.removed_cycle_edges[0].source, "B");
    assert_eq!(report.removed_cycle_edges[0].target, "A");
    assert_eq!(report.head, "B");
    assert_eq!(report.best_path, vec!["root", "A", "B"]);
}

#[test]
fn test_self_loop_is_removed() {
    let graph = build(&[("root", None), ("A", None)], &[("root", "A"), ("A", "A")]);
    let report = TrajectoryPruner::default().prune(&graph).unwrap();

    assert_eq!(report.graph.edge_count(), 1);
    assert!(report.removed_cycle_edges[0].is_self_loop());
}

#[test]
fn test_output_is_acyclic_and_edges_are_a_subset() {
    let graph = build(
        &[("root", None), ("a", None), ("b", None), ("c", None)],
        &[
            ("root", "a"),
            ("a", "b"),
            ("b", "c"),
            ("c", "a"),
            ("b", "root"),
            ("c", "c"),
        ],
    );
    let pruner = TrajectoryPruner::default();
    let report = pruner.prune(&graph).unwrap();

    assert!(pruner.detect_cycles(&report.graph).is_empty());
    assert!(report.graph.edge_count() < graph.edge_count());
    let original = edge_pairs(&graph);
    for pair in edge_pairs(&report.graph) {
        assert!(original.contains(&pair));
    }
    assert_eq!(report.graph.len(), 4);
}

#[test]
fn test_pruning_is_idempotent() {
    let graph = build(
        &[
            ("root", Some(0.5)),
            ("bad", Some(0.95)),
            ("good", Some(0.1)),
            ("next", Some(0.2)),
        ],
        &[("root", "bad"), ("bad", "root"), ("root", "good"), ("good", "next")],
    );
    let pruner = TrajectoryPruner::default();
    let once = pruner.prune(&graph).unwrap();
    assert!(!once.is_unchanged());

    let twice = pruner.prune(&once.graph).unwrap();
    assert!(twice.is_unchanged());
    assert_eq!(twice.graph, once.graph);
}

#[test]
fn test_single_node_is_unchanged() {
    let graph = build(&[("root", Some(0.4))], &[]);
    let report = TrajectoryPruner::default().prune(&graph).unwrap();

    assert!(report.is_unchanged());
    assert_eq!(report.graph, graph);
    assert_eq!(report.head, "root");
}

#[test]
fn test_empty_graph_is_invalid_state() {
    let err = TrajectoryPruner::default()
        .prune(&TrajectoryGraph::new())
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { .. }));
}

#[test]
fn test_unproductive_branch_is_pruned() {
    let graph = two_branches(Some(0.95));
    let report = TrajectoryPruner::default().prune(&graph).unwrap();

    assert_eq!(report.pruned_node_ids, vec!["bad", "bad2"]);
    assert_eq!(ids(&report.graph), vec!["root", "good", "good2"]);
    assert_eq!(report.head, "good2");
}

#[test]
fn test_unscored_nodes_are_never_pruned() {
    let graph = two_branches(None);
    let report = TrajectoryPruner::default().prune(&graph).unwrap();

    assert!(report.pruned_node_ids.is_empty());
    assert_eq!(report.graph.len(), 5);
}

#[test]
fn test_branch_that_recovers_is_kept() {
    let graph = two_branches(Some(0.5));
    let report = TrajectoryPruner::default().prune(&graph).unwrap();
    assert!(report.pruned_node_ids.is_empty());
}

#[test]
fn test_head_branch_is_protected() {
    let graph = build(
        &[
            ("root", Some(0.5)),
            ("good", Some(0.1)),
            ("bad", Some(0.9)),
            ("bad2", Some(0.95)),
        ],
        &[("root", "good"), ("root", "bad"), ("bad", "bad2")],
    );
    let report = TrajectoryPruner::default().prune(&graph).unwrap();

    assert!(report.pruned_node_ids.is_empty());
    assert_eq!(report.head, "bad2");
}

#[test]
fn test_shared_child_survives_through_other_parent() {
    let graph = build(
        &[
            ("root", Some(0.5)),
            ("plan", Some(0.1)),
            ("shared", Some(0.85)),
            ("good", Some(0.1)),
            ("head", Some(0.2)),
        ],
        &[
            ("root", "plan"),
            ("plan", "shared"),
            ("root", "shared"),
            ("root", "good"),
            ("good", "head"),
        ],
    );
    let report = TrajectoryPruner::default().prune(&graph).unwrap();

    assert!(report.pruned_node_ids.is_empty());
    assert_eq!(report.graph.len(), 5);
    assert_eq!(report.graph.edge_count(), 4);
    assert_eq!(report.graph.parents("shared").unwrap(), vec!["plan"]);
}

#[test]
fn test_tie_break_controls_which_child_is_kept() {
    let graph = build(
        &[
            ("root", Some(0.5)),
            ("x", Some(0.9)),
            ("y", Some(0.9)),
            ("h", Some(0.9)),
        ],
        &[("root", "x"), ("root", "y"), ("root", "h")],
    );

    let earliest = TrajectoryPruner::new(PrunerConfig {
        tie_break: TieBreak::Earliest,
        ..Default::default()
    })
    .unwrap();
    let report = earliest.prune(&graph).unwrap();
    assert_eq!(report.pruned_node_ids, vec!["y"]);
    assert_eq!(
        earliest
            .branch_values(&graph, "root")
            .unwrap()
            .iter()
            .map(|b| b.node_id.as_str())
            .collect::<Vec<_>>(),
        vec!["x", "y", "h"]
    );

    let latest = TrajectoryPruner::new(PrunerConfig {
        tie_break: TieBreak::Latest,
        ..Default::default()
    })
    .unwrap();
    let report = latest.prune(&graph).unwrap();
    assert_eq!(report.pruned_node_ids, vec!["x", "y"]);
    assert_eq!(ids(&report.graph), vec!["root", "h"]);
}

#[test]
fn test_orphans_are_dropped() {
    let graph = build(&[("root", None), ("a", None), ("lost", None)], &[("root", "a")]);
    let report = TrajectoryPruner::default().prune(&graph).unwrap();

    assert_eq!(report.dropped_orphans, vec!["lost"]);
    assert_eq!(report.head, "a");
    assert!(report.graph.validate_connected().is_ok());
}

#[test]
fn test_detect_cycles_scans_whole_graph() {
    let graph = build(
        &[("root", None), ("a", None), ("b", None), ("c", None)],
        &[("root", "a"), ("a", "b"), ("b", "a"), ("c", "c")],
    );
    let cycles = TrajectoryPruner::default().detect_cycles(&graph);
    assert_eq!(
        cycles,
        vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["c".to_string()]
        ]
    );
}

#[test]
fn test_best_path_follows_surviving_branch() {
    let graph = two_branches(Some(0.95));
    let path = TrajectoryPruner::default().best_path(&graph).unwrap();
    assert_eq!(path, vec!["root", "good", "good2"]);
}

#[test]
fn test_best_path_takes_better_branch_into_shared_head() {
    // both branches reach the head; the confident one is inserted second
    let graph = build(
        &[
            ("root", Some(0.5)),
            ("x", Some(0.9)),
            ("y", Some(0.1)),
            ("h", Some(0.2)),
        ],
        &[("root", "x"), ("root", "y"), ("x", "h"), ("y", "h")],
    );
    let pruner = TrajectoryPruner::default();

    let values = pruner.branch_values(&graph, "root").unwrap();
    assert_eq!(values[0].node_id, "y");
    assert!((values[0].value - 0.745).abs() < 1e-9);
    assert!((values[1].value - 0.465).abs() < 1e-9);

    let report = pruner.prune(&graph).unwrap();
    assert!(report.pruned_node_ids.is_empty());
    assert_eq!(report.best_path, vec!["root", "y", "h"]);
    assert_eq!(pruner.best_path(&graph).unwrap(), vec!["root", "y", "h"]);
}

#[test]
fn test_branch_values_rank_lower_uncertainty_first() {
    let graph = two_branches(Some(0.95));
    let values = TrajectoryPruner::default()
        .branch_values(&graph, "root")
        .unwrap();

    assert_eq!(values.len(), 2);
    assert_eq!(values[0].node_id, "good");
    assert!((values[0].mean_uncertainty - 0.25).abs() < 1e-9);
    assert_eq!(values[0].depth, 1);
    assert!(!values[0].unproductive);
    assert_eq!(values[1].node_id, "bad");
    assert!(values[1].unproductive);
    assert!(values[0].value > values[1].value);

    assert!(matches!(
        TrajectoryPruner::default().branch_values(&graph, "nope"),
        Err(CoreError::UnknownNode { .. })
    ));
}

#[test]
fn test_live_graph_is_not_modified() {
    let graph = two_branches(Some(0.95));
    let before = graph.clone();
    TrajectoryPruner::default().prune(&graph).unwrap();
    assert_eq!(graph, before);
}
