use std::collections::HashMap;

use crate::node::Node;
use crate::task::Task;

/// Rotates through the node list, ignoring resource figures. The cursor
/// lives here and is mutated under the manager's lock, alongside the
/// placement maps.
pub struct RoundRobin {
    pub last_worker: usize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin { last_worker: 0 }
    }

    pub fn select_candidates(&self, _task: &Task, nodes: &[Node]) -> Vec<usize> {
        (0..nodes.len()).collect()
    }

    pub fn score(
        &self,
        _task: &Task,
        nodes: &mut [Node],
        candidates: &[usize],
    ) -> HashMap<String, f64> {
        candidates
            .iter()
            .map(|&i| (nodes[i].name.clone(), 1.0))
            .collect()
    }

    pub fn pick(
        &mut self,
        _scores: &HashMap<String, f64>,
        candidates: &[usize],
        _nodes: &[Node],
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let next = if self.last_worker + 1 < candidates.len() {
            self.last_worker + 1
        } else {
            0
        };
        self.last_worker = next;
        Some(candidates[next])
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}
