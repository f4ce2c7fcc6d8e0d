pub mod epvm;
pub mod round_robin;

use std::collections::HashMap;
use std::str::FromStr;

pub use epvm::Epvm;
pub use round_robin::RoundRobin;

use crate::node::Node;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    RoundRobin,
    Epvm,
}

impl FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roundrobin" => Ok(Policy::RoundRobin),
            "epvm" => Ok(Policy::Epvm),
            other => Err(format!("unknown scheduler policy: {other}")),
        }
    }
}

/// The scheduling variants are a small closed set, so they live in one
/// tagged type rather than behind open polymorphism. All three
/// operations work on indices into the manager's node list; `score` may
/// refresh the nodes' cached stats, which is why it takes them mutably.
pub enum Scheduler {
    RoundRobin(RoundRobin),
    Epvm(Epvm),
}

impl Scheduler {
    pub fn new(policy: Policy) -> Self {
        match policy {
            Policy::RoundRobin => Scheduler::RoundRobin(RoundRobin::new()),
            Policy::Epvm => Scheduler::Epvm(Epvm),
        }
    }

    pub fn select_candidates(&self, task: &Task, nodes: &[Node]) -> Vec<usize> {
        match self {
            Scheduler::RoundRobin(rr) => rr.select_candidates(task, nodes),
            Scheduler::Epvm(epvm) => epvm.select_candidates(task, nodes),
        }
    }

    pub async fn score(
        &self,
        task: &Task,
        nodes: &mut [Node],
        candidates: &[usize],
    ) -> HashMap<String, f64> {
        match self {
            Scheduler::RoundRobin(rr) => rr.score(task, nodes, candidates),
            Scheduler::Epvm(epvm) => epvm.score(task, nodes, candidates).await,
        }
    }

    /// Returns the index of the chosen node, or `None` when there is no
    /// viable placement (the caller requeues).
    pub fn pick(
        &mut self,
        scores: &HashMap<String, f64>,
        candidates: &[usize],
        nodes: &[Node],
    ) -> Option<usize> {
        match self {
            Scheduler::RoundRobin(rr) => rr.pick(scores, candidates, nodes),
            Scheduler::Epvm(epvm) => epvm.pick(scores, candidates, nodes),
        }
    }
}
