use crate::transaction::TransactionId;
use std::collections::{HashMap, HashSet};

/// Directed graph of "transaction A is blocked pending transaction B" edges.
///
/// Each edge carries a positive multiplicity so that several simultaneous
/// waits between the same pair are tracked and removed independently. Self
/// edges are never recorded.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: HashMap<TransactionId, HashMap<TransactionId, u32>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_wait(&mut self, from: TransactionId, to: TransactionId) {
        if from == to {
            return;
        }
        *self.edges.entry(from).or_default().entry(to).or_insert(0) += 1;
    }

    pub fn decrement_wait(&mut self, from: TransactionId, to: TransactionId) {
        if from == to {
            return;
        }
        if let Some(targets) = self.edges.get_mut(&from) {
            if let Some(count) = targets.get_mut(&to) {
                *count -= 1;
                if *count == 0 {
                    targets.remove(&to);
                }
            }
            if targets.is_empty() {
                self.edges.remove(&from);
            }
        }
    }

    pub fn wait_count(&self, from: TransactionId, to: TransactionId) -> u32 {
        self.edges
            .get(&from)
            .and_then(|targets| targets.get(&to))
            .copied()
            .unwrap_or(0)
    }

    /// Removes the node and every edge incident to it.
    pub fn remove_node(&mut self, node: TransactionId) {
        self.edges.remove(&node);
        self.edges.retain(|_, targets| {
            targets.remove(&node);
            !targets.is_empty()
        });
    }

    /// Full depth-first search over all nodes for a back edge into the
    /// current recursion stack.
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut stack = HashSet::new();
        self.edges
            .keys()
            .any(|&node| self.dfs_has_cycle(node, &mut visited, &mut stack))
    }

    fn dfs_has_cycle(
        &self,
        node: TransactionId,
        visited: &mut HashSet<TransactionId>,
        stack: &mut HashSet<TransactionId>,
    ) -> bool {
        if stack.contains(&node) {
            return true;
        }
        if !visited.insert(node) {
            return false;
        }
        stack.insert(node);

        if let Some(targets) = self.edges.get(&node) {
            for &next in targets.keys() {
                if self.dfs_has_cycle(next, visited, stack) {
                    return true;
                }
            }
        }

        stack.remove(&node);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    #[test]
    fn test_edge_multiplicity() {
        let mut graph = WaitForGraph::new();
        graph.increment_wait(tx(1), tx(2));
        graph.increment_wait(tx(1), tx(2));
        assert_eq!(graph.wait_count(tx(1), tx(2)), 2);

        graph.decrement_wait(tx(1), tx(2));
        assert_eq!(graph.wait_count(tx(1), tx(2)), 1);
        graph.decrement_wait(tx(1), tx(2));
        assert_eq!(graph.wait_count(tx(1), tx(2)), 0);
    }

    #[test]
    fn test_no_self_edges() {
        let mut graph = WaitForGraph::new();
        graph.increment_wait(tx(1), tx(1));
        assert_eq!(graph.wait_count(tx(1), tx(1)), 0);
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_two_cycle() {
        let mut graph = WaitForGraph::new();
        graph.increment_wait(tx(1), tx(2));
        assert!(!graph.has_cycle());
        graph.increment_wait(tx(2), tx(1));
        assert!(graph.has_cycle());
    }

    #[test]
    fn test_three_cycle() {
        let mut graph = WaitForGraph::new();
        graph.increment_wait(tx(1), tx(2));
        graph.increment_wait(tx(2), tx(3));
        graph.increment_wait(tx(3), tx(1));
        assert!(graph.has_cycle());

        graph.decrement_wait(tx(3), tx(1));
        assert!(!graph.has_cycle());
    }

    #[test]
    fn test_remove_node_clears_incident_edges() {
        let mut graph = WaitForGraph::new();
        graph.increment_wait(tx(1), tx(2));
        graph.increment_wait(tx(2), tx(1));
        graph.remove_node(tx(2));

        assert!(!graph.has_cycle());
        assert_eq!(graph.wait_count(tx(1), tx(2)), 0);
        assert_eq!(graph.wait_count(tx(2), tx(1)), 0);
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let mut graph = WaitForGraph::new();
        graph.increment_wait(tx(1), tx(2));
        graph.increment_wait(tx(1), tx(3));
        graph.increment_wait(tx(2), tx(4));
        graph.increment_wait(tx(3), tx(4));
        assert!(!graph.has_cycle());
    }
}
