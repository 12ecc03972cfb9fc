// src/release/graph.rs

//! Strongly connected components over slice dependency graphs.
//!
//! Tarjan's algorithm emits components only after every component they can
//! reach has been emitted. With edges pointing from a slice to its
//! essentials, that yields dependencies-first ordering directly, and any
//! component with more than one member is a dependency loop.

use std::collections::HashMap;

struct TarjanState<'a> {
    successors: &'a HashMap<String, Vec<String>>,
    index: usize,
    indices: HashMap<&'a str, usize>,
    lowlinks: HashMap<&'a str, usize>,
    on_stack: HashMap<&'a str, bool>,
    stack: Vec<&'a str>,
    components: Vec<Vec<String>>,
}

/// Decompose the graph into strongly connected components, emitted in
/// dependencies-first order. Nodes and edges are visited in sorted order
/// so the result is deterministic for any map iteration order.
pub fn tarjan_sort(successors: &HashMap<String, Vec<String>>) -> Vec<Vec<String>> {
    let mut state = TarjanState {
        successors,
        index: 0,
        indices: HashMap::new(),
        lowlinks: HashMap::new(),
        on_stack: HashMap::new(),
        stack: Vec::new(),
        components: Vec::new(),
    };

    let mut nodes: Vec<&str> = successors.keys().map(String::as_str).collect();
    nodes.sort_unstable();
    for node in nodes {
        if !state.indices.contains_key(node) {
            strong_connect(&mut state, node);
        }
    }
    state.components
}

fn strong_connect<'a>(state: &mut TarjanState<'a>, node: &'a str) {
    state.indices.insert(node, state.index);
    state.lowlinks.insert(node, state.index);
    state.index += 1;
    state.stack.push(node);
    state.on_stack.insert(node, true);

    let mut edges: Vec<&str> = state
        .successors
        .get(node)
        .map(|v| v.iter().map(String::as_str).collect())
        .unwrap_or_default();
    edges.sort_unstable();
    for next in edges {
        // Edges to nodes absent from the map are ignored; callers validate
        // references before building the graph.
        if !state.successors.contains_key(next) {
            continue;
        }
        if !state.indices.contains_key(next) {
            strong_connect(state, next);
            let low = state.lowlinks[next].min(state.lowlinks[node]);
            state.lowlinks.insert(node, low);
        } else if state.on_stack.get(next).copied().unwrap_or(false) {
            let low = state.indices[next].min(state.lowlinks[node]);
            state.lowlinks.insert(node, low);
        }
    }

    if state.lowlinks[node] == state.indices[node] {
        let mut component = Vec::new();
        loop {
            let member = state.stack.pop().unwrap();
            state.on_stack.insert(member, false);
            component.push(member.to_string());
            if member == node {
                break;
            }
        }
        component.sort_unstable();
        state.components.push(component);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(node, succ)| {
                (
                    node.to_string(),
                    succ.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_linear_chain_dependencies_first() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &[])]);
        let components = tarjan_sort(&g);
        assert_eq!(components, vec![vec!["c"], vec!["b"], vec!["a"]]);
    }

    #[test]
    fn test_cycle_grouped_into_one_component() {
        let g = graph(&[("a", &["b"]), ("b", &["a"]), ("c", &["a"])]);
        let components = tarjan_sort(&g);
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec!["a", "b"]);
        assert_eq!(components[1], vec!["c"]);
    }

    #[test]
    fn test_self_loop_is_singleton_component() {
        // A self-loop forms an SCC of size one; callers that need to
        // reject it must inspect the node's own edges.
        let g = graph(&[("a", &["a"])]);
        let components = tarjan_sort(&g);
        assert_eq!(components, vec![vec!["a"]]);
    }

    #[test]
    fn test_deterministic_order_for_independent_nodes() {
        let g = graph(&[("z", &[]), ("m", &[]), ("a", &[])]);
        assert_eq!(tarjan_sort(&g), vec![vec!["a"], vec!["m"], vec!["z"]]);
    }

    #[test]
    fn test_diamond() {
        let g = graph(&[("top", &["l", "r"]), ("l", &["base"]), ("r", &["base"]), ("base", &[])]);
        let components = tarjan_sort(&g);
        let order: Vec<&str> = components.iter().map(|c| c[0].as_str()).collect();
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("base") < pos("l"));
        assert!(pos("base") < pos("r"));
        assert!(pos("l") < pos("top"));
        assert!(pos("r") < pos("top"));
    }
}
