//! DependencyGraph - build order over declared library dependencies.
//!
//! The graph is discovered lazily from a set of requested libraries and is
//! read-only afterwards. An edge `a -> b` means `b` depends on `a`, so a
//! topological walk yields dependencies before their dependents.

use std::collections::{BTreeSet, HashMap};

use anyhow::Result;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::util::errors::NeedyError;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Discover the graph reachable from `roots`.
    ///
    /// `dependencies_of` is asked once per library. Dependencies are pulled
    /// in whether or not they were requested.
    pub fn discover<F>(roots: impl IntoIterator<Item = String>, mut dependencies_of: F) -> Result<Self>
    where
        F: FnMut(&str) -> Result<Vec<String>>,
    {
        let mut graph = DependencyGraph::default();
        let mut pending: Vec<String> = roots.into_iter().collect();
        let mut edges = Vec::new();

        while let Some(name) = pending.pop() {
            if graph.nodes.contains_key(&name) {
                continue;
            }
            graph.add_node(&name);
            for dependency in dependencies_of(&name)? {
                if !graph.nodes.contains_key(&dependency) {
                    pending.push(dependency.clone());
                }
                edges.push((dependency, name.clone()));
            }
        }

        for (dependency, dependent) in edges {
            let from = graph.nodes[&dependency];
            let to = graph.nodes[&dependent];
            if !graph.graph.contains_edge(from, to) {
                graph.graph.add_edge(from, to, ());
            }
        }

        Ok(graph)
    }

    fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&node) = self.nodes.get(name) {
            return node;
        }
        let node = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), node);
        node
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct dependencies of `name`, sorted.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Libraries that depend directly on `name`, sorted.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        let Some(&node) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Dependencies-first order (Kahn's algorithm).
    ///
    /// Among libraries that are ready at the same time the lexically smallest
    /// goes first, so the order is reproducible.
    pub fn build_order(&self) -> Result<Vec<String>> {
        Ok(self.waves()?.into_iter().flatten().collect())
    }

    /// Groups of libraries whose dependencies all sit in earlier groups.
    ///
    /// Libraries within one wave are independent of each other.
    pub fn waves(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                let degree = self
                    .graph
                    .neighbors_directed(n, Direction::Incoming)
                    .count();
                (n, degree)
            })
            .collect();

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&n, _)| self.graph[n].as_str())
            .collect();

        let mut waves = Vec::new();
        while !ready.is_empty() {
            let wave: Vec<String> = ready.iter().map(|s| s.to_string()).collect();
            let mut next = BTreeSet::new();
            for name in &wave {
                let node = self.nodes[name];
                remaining.remove(&node);
                for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    if let Some(degree) = remaining.get_mut(&dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(self.graph[dependent].as_str());
                        }
                    }
                }
            }
            waves.push(wave);
            ready = next;
        }

        if !remaining.is_empty() {
            let mut libraries: Vec<String> = remaining
                .keys()
                .map(|&n| self.graph[n].clone())
                .collect();
            libraries.sort();
            return Err(NeedyError::CircularDependency { libraries }.into());
        }

        Ok(waves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::errors::find_needy_error;
    use std::collections::BTreeMap;

    fn graph(edges: &[(&str, &[&str])], roots: &[&str]) -> Result<DependencyGraph> {
        let declared: BTreeMap<&str, Vec<String>> = edges
            .iter()
            .map(|(name, deps)| (*name, deps.iter().map(|d| d.to_string()).collect()))
            .collect();
        DependencyGraph::discover(roots.iter().map(|r| r.to_string()), |name| {
            Ok(declared.get(name).cloned().unwrap_or_default())
        })
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let g = graph(
            &[
                ("app", &["png", "jpeg"]),
                ("png", &["zlib"]),
                ("jpeg", &[]),
                ("zlib", &[]),
            ],
            &["app"],
        )
        .unwrap();

        let order = g.build_order().unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "zlib") < position(&order, "png"));
        assert!(position(&order, "png") < position(&order, "app"));
        assert!(position(&order, "jpeg") < position(&order, "app"));
        assert_eq!(g.dependencies("app"), vec!["jpeg".to_string(), "png".to_string()]);
        assert_eq!(g.dependents("zlib"), vec!["png".to_string()]);
    }

    #[test]
    fn test_two_library_scenario() {
        let g = graph(&[("A", &[]), ("B", &["A"])], &["A", "B"]).unwrap();
        assert_eq!(g.build_order().unwrap(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            g.waves().unwrap(),
            vec![vec!["A".to_string()], vec!["B".to_string()]]
        );
    }

    #[test]
    fn test_filtered_root_pulls_in_dependencies() {
        let g = graph(&[("A", &[]), ("B", &["A"]), ("C", &[])], &["B"]).unwrap();
        assert!(g.contains("A"));
        assert!(!g.contains("C"));
    }

    #[test]
    fn test_cycle_is_reported() {
        let g = graph(
            &[("a", &["c"]), ("b", &["a"]), ("c", &["b"]), ("d", &[])],
            &["a", "d"],
        )
        .unwrap();
        let err = g.build_order().unwrap_err();
        match find_needy_error(&err) {
            Some(NeedyError::CircularDependency { libraries }) => {
                assert_eq!(libraries, &["a", "b", "c"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let g = graph(&[("a", &["a"])], &["a"]).unwrap();
        assert!(g.build_order().is_err());
    }

    #[test]
    fn test_order_is_deterministic() {
        let edges: &[(&str, &[&str])] = &[
            ("d", &["b", "c"]),
            ("c", &["a"]),
            ("b", &["a"]),
            ("e", &[]),
            ("a", &[]),
        ];
        let first = graph(edges, &["d", "e"]).unwrap().build_order().unwrap();
        for _ in 0..10 {
            let again = graph(edges, &["e", "d"]).unwrap().build_order().unwrap();
            assert_eq!(first, again);
        }
        assert_eq!(first, vec!["a", "e", "b", "c", "d"]);
    }
}
