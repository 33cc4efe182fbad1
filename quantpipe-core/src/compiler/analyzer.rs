use crate::error::CompileError;
use crate::types::NodeDecl;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap};

/// Result of dependency analysis. `order` is empty whenever `errors` is
/// not: a pipeline with unresolved or cyclic dependencies has no valid
/// execution order.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub order: Vec<String>,
    pub errors: Vec<CompileError>,
}

/// Analyze the dependency structure of a node list.
///
/// Checks, in order: node-id well-formedness, duplicate ids, missing
/// dependency targets, cycles (tri-color DFS, reporting the full cycle
/// path). If everything holds, produces a topological order that breaks
/// ties by order of first appearance in the source. O(V+E).
pub fn analyze(nodes: &[NodeDecl]) -> AnalysisOutcome {
    let mut errors = Vec::new();

    for node in nodes {
        if !is_valid_id(&node.id) {
            errors.push(
                CompileError::semantic(format!(
                    "invalid node id '{}': ids must start with a letter and contain only letters, digits and underscores",
                    node.id
                ))
                .on_node(&node.id),
            );
        }
    }

    // id → position of first declaration
    let mut positions: HashMap<&str, usize> = HashMap::new();
    for (index, node) in nodes.iter().enumerate() {
        if positions.contains_key(node.id.as_str()) {
            errors.push(
                CompileError::semantic(format!("duplicate node id '{}'", node.id))
                    .on_node(&node.id),
            );
        } else {
            positions.insert(&node.id, index);
        }
    }

    // Graph nodes are declaration indices; an edge dep → node means the
    // dependency must run first.
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), nodes.len());
    let mut indices: Vec<NodeIndex> = Vec::with_capacity(nodes.len());
    for index in 0..nodes.len() {
        indices.push(graph.add_node(index));
    }

    for (index, node) in nodes.iter().enumerate() {
        for dep in &node.depends_on {
            match positions.get(dep.as_str()) {
                Some(&dep_index) => {
                    graph.add_edge(indices[dep_index], indices[index], ());
                }
                None => errors.push(
                    CompileError::semantic(format!(
                        "missing dependency '{}' referenced by '{}'",
                        dep, node.id
                    ))
                    .on_node(&node.id),
                ),
            }
        }
    }

    for cycle in find_cycles(&graph) {
        let path: Vec<&str> = cycle.iter().map(|&idx| nodes[graph[idx]].id.as_str()).collect();
        errors.push(CompileError::semantic(format!(
            "dependency cycle: {}",
            path.join(" -> ")
        )));
    }

    if !errors.is_empty() {
        return AnalysisOutcome {
            order: Vec::new(),
            errors,
        };
    }

    AnalysisOutcome {
        order: stable_topo_order(&graph, nodes),
        errors,
    }
}

fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Tri-color DFS cycle detection. Each cycle is reported once, as the
/// closed path `first -> ... -> last -> first` reconstructed from the
/// gray stack at the moment the back-edge is found.
fn find_cycles(graph: &DiGraph<usize, ()>) -> Vec<Vec<NodeIndex>> {
    let mut colors = vec![Color::White; graph.node_count()];
    let mut cycles = Vec::new();

    for start in graph.node_indices() {
        if colors[start.index()] == Color::White {
            let mut path = Vec::new();
            dfs(graph, start, &mut colors, &mut path, &mut cycles);
        }
    }
    cycles
}

fn dfs(
    graph: &DiGraph<usize, ()>,
    node: NodeIndex,
    colors: &mut [Color],
    path: &mut Vec<NodeIndex>,
    cycles: &mut Vec<Vec<NodeIndex>>,
) {
    colors[node.index()] = Color::Gray;
    path.push(node);

    for next in graph.neighbors(node) {
        match colors[next.index()] {
            Color::White => dfs(graph, next, colors, path, cycles),
            Color::Gray => {
                // Back-edge: the cycle is the path suffix starting at
                // `next`, closed back onto itself.
                if let Some(pos) = path.iter().position(|&n| n == next) {
                    let mut cycle: Vec<NodeIndex> = path[pos..].to_vec();
                    cycle.push(next);
                    cycles.push(cycle);
                }
            }
            Color::Black => {}
        }
    }

    path.pop();
    colors[node.index()] = Color::Black;
}

/// Kahn's algorithm with the ready set ordered by declaration position,
/// so independent nodes keep their source order.
fn stable_topo_order(graph: &DiGraph<usize, ()>, nodes: &[NodeDecl]) -> Vec<String> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| {
            graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .count()
        })
        .collect();

    // Ready set keyed by (declaration position, node index) — BTreeSet
    // iteration gives the smallest position first.
    let mut ready: BTreeSet<(usize, NodeIndex)> = graph
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .map(|idx| (graph[idx], idx))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(&(position, idx)) = ready.iter().next() {
        ready.remove(&(position, idx));
        order.push(nodes[graph[idx]].id.clone());

        for next in graph.neighbors(idx) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.insert((graph[next], next));
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, deps: &[&str]) -> NodeDecl {
        NodeDecl {
            id: id.to_string(),
            node_type: "DataLoader".to_string(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            params: serde_json::Map::new(),
            line: None,
            column: None,
        }
    }

    #[test]
    fn test_linear_chain_order() {
        let nodes = vec![node("a", &[]), node("b", &["a"]), node("c", &["b"])];
        let outcome = analyze(&nodes);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_keeps_source_order() {
        // a → {fast, slow} → sig; fast declared before slow, so fast
        // comes first in the tie-break.
        let nodes = vec![
            node("a", &[]),
            node("fast", &["a"]),
            node("slow", &["a"]),
            node("sig", &["fast", "slow"]),
        ];
        let outcome = analyze(&nodes);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.order, vec!["a", "fast", "slow", "sig"]);
    }

    #[test]
    fn test_topological_property_holds() {
        let nodes = vec![
            node("bt", &["sig", "prices"]),
            node("sig", &["fast"]),
            node("fast", &["prices"]),
            node("prices", &[]),
        ];
        let outcome = analyze(&nodes);
        assert!(outcome.errors.is_empty());
        let pos: HashMap<&str, usize> = outcome
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        for n in &nodes {
            for dep in &n.depends_on {
                assert!(
                    pos[dep.as_str()] < pos[n.id.as_str()],
                    "{} must come before {}",
                    dep,
                    n.id
                );
            }
        }
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let nodes = vec![node("a", &[]), node("a", &[])];
        let outcome = analyze(&nodes);
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.message.contains("duplicate node id 'a'")));
        assert!(outcome.order.is_empty());
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let nodes = vec![node("a", &["ghost"])];
        let outcome = analyze(&nodes);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0]
            .message
            .contains("missing dependency 'ghost' referenced by 'a'"));
    }

    #[test]
    fn test_two_node_cycle_reports_path() {
        let nodes = vec![node("a", &["b"]), node("b", &["a"])];
        let outcome = analyze(&nodes);
        let cycle = outcome
            .errors
            .iter()
            .find(|e| e.message.contains("cycle"))
            .expect("cycle error");
        assert!(cycle.message.contains('a') && cycle.message.contains('b'));
        assert!(outcome.order.is_empty());
    }

    #[test]
    fn test_three_node_cycle_full_path() {
        let nodes = vec![node("a", &["c"]), node("b", &["a"]), node("c", &["b"])];
        let outcome = analyze(&nodes);
        let cycle = outcome
            .errors
            .iter()
            .find(|e| e.message.contains("cycle"))
            .expect("cycle error");
        for id in ["a", "b", "c"] {
            assert!(cycle.message.contains(id), "path missing {}", id);
        }
        // The path is closed: first node repeated at the end
        let path = cycle.message.strip_prefix("dependency cycle: ").unwrap();
        let hops: Vec<&str> = path.split(" -> ").collect();
        assert_eq!(hops.first(), hops.last());
        assert_eq!(hops.len(), 4);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let nodes = vec![node("a", &["a"])];
        let outcome = analyze(&nodes);
        assert!(outcome.errors.iter().any(|e| e.message.contains("cycle")));
    }

    #[test]
    fn test_invalid_ids_rejected() {
        for bad in ["1st", "_x", "with-dash", "sp ace", ""] {
            let nodes = vec![node(bad, &[])];
            let outcome = analyze(&nodes);
            assert!(
                outcome.errors.iter().any(|e| e.message.contains("invalid node id")),
                "expected '{}' to be rejected",
                bad
            );
        }
        let nodes = vec![node("Ok_id_9", &[])];
        assert!(analyze(&nodes).errors.is_empty());
    }

    #[test]
    fn test_errors_accumulate_across_nodes() {
        let nodes = vec![
            node("a", &[]),
            node("a", &[]),
            node("b", &["ghost"]),
        ];
        let outcome = analyze(&nodes);
        assert!(outcome.errors.len() >= 2);
    }
}
