use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;
use crate::node::Node;
use crate::task::Task;

/// Interval between the two cumulative CPU samples used to derive a
/// node's usage. Differencing makes scoring expensive and serial: one
/// candidate at a time, two fetches each.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_secs(3);

const MAX_JOBS: f64 = 4.0;

/// Cost-based scoring after the E-PVM paper: each node is charged the
/// marginal cost of running one more job, with the exponent base scaled
/// by the candidate count so sensitivity grows with cluster size.
pub struct Epvm;

impl Epvm {
    /// Keeps nodes whose free disk covers the task's requested disk.
    pub fn select_candidates(&self, task: &Task, nodes: &[Node]) -> Vec<usize> {
        nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.disk.saturating_sub(node.disk_allocated) >= task.disk)
            .map(|(i, _)| i)
            .collect()
    }

    pub async fn score(
        &self,
        task: &Task,
        nodes: &mut [Node],
        candidates: &[usize],
    ) -> HashMap<String, f64> {
        let mut scores = HashMap::new();
        let n = candidates.len() as f64;
        for &i in candidates {
            let cpu_usage = match sample_cpu_usage(&mut nodes[i]).await {
                Ok(usage) => usage,
                Err(err) => {
                    warn!(node = %nodes[i].name, error = %err, "unable to sample cpu usage");
                    return scores;
                }
            };
            let node = &nodes[i];
            let Some(stats) = node.stats.as_ref() else {
                continue;
            };

            let cpu_load = cpu_usage / 2f64.powf(0.8);
            let mem_allocated = stats.mem_used_kb() as f64 + node.memory_allocated as f64;
            let mem_percent = mem_allocated / node.memory as f64;
            // The task declares memory in bytes everywhere else; the
            // /1000 here is kept as-is from the cost model.
            let new_mem_percent =
                (mem_allocated + (task.memory / 1000) as f64) / node.memory as f64;
            let tc = node.task_count as f64;

            let mem_cost = n.powf(new_mem_percent) + n.powf((tc + 1.0) / MAX_JOBS)
                - n.powf(mem_percent)
                - n.powf(tc / MAX_JOBS);
            let cpu_cost = n.powf(cpu_load) + n.powf((tc + 1.0) / MAX_JOBS)
                - n.powf(cpu_load)
                - n.powf(tc / MAX_JOBS);

            scores.insert(node.name.clone(), mem_cost + cpu_cost);
        }
        scores
    }

    /// Minimum cost wins; ties break toward the earlier candidate.
    pub fn pick(
        &mut self,
        scores: &HashMap<String, f64>,
        candidates: &[usize],
        nodes: &[Node],
    ) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut min_cost = 0.0;
        for &i in candidates {
            let cost = scores.get(&nodes[i].name).copied().unwrap_or(0.0);
            match best {
                None => {
                    best = Some(i);
                    min_cost = cost;
                }
                Some(_) if cost < min_cost => {
                    best = Some(i);
                    min_cost = cost;
                }
                Some(_) => {}
            }
        }
        best
    }
}

/// Two samples a few seconds apart, differenced the same way the
/// single-sample `Stats::cpu_usage` is computed.
async fn sample_cpu_usage(node: &mut Node) -> Result<f64> {
    let first = node.get_stats().await?;
    tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
    let second = node.get_stats().await?;

    let idle1 = first.cpu_stats.idle + first.cpu_stats.io_wait;
    let idle2 = second.cpu_stats.idle + second.cpu_stats.io_wait;
    let non_idle1 = first.cpu_stats.user
        + first.cpu_stats.nice
        + first.cpu_stats.system
        + first.cpu_stats.irq
        + first.cpu_stats.soft_irq
        + first.cpu_stats.steal;
    let non_idle2 = second.cpu_stats.user
        + second.cpu_stats.nice
        + second.cpu_stats.system
        + second.cpu_stats.irq
        + second.cpu_stats.soft_irq
        + second.cpu_stats.steal;

    let total = (idle2 + non_idle2).saturating_sub(idle1 + non_idle1);
    let idle = idle2.saturating_sub(idle1);
    if total == 0 {
        return Ok(0.0);
    }
    Ok(total.saturating_sub(idle) as f64 / total as f64)
}
