//! Index-based dependency graphs.
//!
//! Nodes are `0..n` indices into an arena owned by the caller; edges are
//! adjacency lists. Every traversal here is iterative so large plans never
//! grow the call stack.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// A directed graph over `0..n`. An edge `a -> b` means `a` must come before `b`.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    successors: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new(n: usize) -> Self {
        Self {
            successors: vec![Vec::new(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.successors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    /// Add `before -> after`. Duplicate edges are ignored.
    pub fn add_edge(&mut self, before: usize, after: usize) {
        if !self.successors[before].contains(&after) {
            self.successors[before].push(after);
        }
    }

    pub fn predecessors(&self) -> Vec<Vec<usize>> {
        let mut preds = vec![Vec::new(); self.len()];
        for (from, succs) in self.successors.iter().enumerate() {
            for &to in succs {
                preds[to].push(from);
            }
        }
        for p in &mut preds {
            p.sort_unstable();
        }
        preds
    }

    /// Kahn's algorithm. Among nodes whose dependencies are all emitted, the
    /// lowest index (declaration order) goes first, so equal inputs always
    /// produce the same order.
    ///
    /// On a cycle, returns the indices of one cycle in edge order.
    pub fn topological_order(&self) -> Result<Vec<usize>, Vec<usize>> {
        let n = self.len();
        let mut in_degree = vec![0usize; n];
        for succs in &self.successors {
            for &to in succs {
                in_degree[to] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &self.successors[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == n {
            return Ok(order);
        }

        let remaining: Vec<bool> = in_degree.iter().map(|d| *d > 0).collect();
        Err(self.find_cycle(&remaining))
    }

    /// Every node left over by Kahn's algorithm has a predecessor that is
    /// also left over, so walking predecessors must revisit a node.
    fn find_cycle(&self, remaining: &[bool]) -> Vec<usize> {
        let preds = self.predecessors();
        let Some(start) = remaining.iter().position(|r| *r) else {
            return Vec::new();
        };

        let mut seen_at: HashMap<usize, usize> = HashMap::new();
        let mut walk = Vec::new();
        let mut current = start;
        loop {
            if let Some(&pos) = seen_at.get(&current) {
                let mut cycle = walk[pos..].to_vec();
                cycle.reverse();
                return cycle;
            }
            seen_at.insert(current, walk.len());
            walk.push(current);
            match preds[current].iter().find(|p| remaining[**p]) {
                Some(&p) => current = p,
                None => return walk,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn independent_nodes_keep_declaration_order() {
        let graph = DependencyGraph::new(4);
        assert_eq!(graph.topological_order().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn edges_override_declaration_order() {
        let mut graph = DependencyGraph::new(3);
        graph.add_edge(2, 0);
        graph.add_edge(1, 0);
        assert_eq!(graph.topological_order().unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn ready_ties_break_by_lowest_index() {
        let mut graph = DependencyGraph::new(4);
        graph.add_edge(3, 1);
        graph.add_edge(3, 0);
        // 2 and 3 are roots; 2 first. After 3, both 0 and 1 become ready; 0 first.
        assert_eq!(graph.topological_order().unwrap(), vec![2, 3, 0, 1]);
    }

    #[test]
    fn cycle_is_reported_in_edge_order() {
        let mut graph = DependencyGraph::new(4);
        graph.add_edge(0, 1);
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(3, 1);
        let cycle = graph.topological_order().unwrap_err();
        assert_eq!(cycle.len(), 3);
        for (i, &node) in cycle.iter().enumerate() {
            let next = cycle[(i + 1) % cycle.len()];
            assert!(graph.successors[node].contains(&next));
        }
    }

    #[test]
    fn long_chain_does_not_recurse() {
        let n = 50_000;
        let mut graph = DependencyGraph::new(n);
        for i in 1..n {
            graph.add_edge(i, i - 1);
        }
        let order = graph.topological_order().unwrap();
        assert_eq!(order.first(), Some(&(n - 1)));
        assert_eq!(order.last(), Some(&0));
    }
}
