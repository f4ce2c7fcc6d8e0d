use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};
use crate::stats::Stats;

const RETRY_ATTEMPTS: u32 = 10;
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Manager-side record of a worker machine: its address plus cached
/// resource figures. Totals are refreshed from the worker's `/stats`
/// endpoint on each scoring pass; the `*_allocated` figures and task
/// count track what the manager has placed.
#[derive(Debug, Clone)]
pub struct Node {
    /// `host:port`, identical to the entry in the manager's worker list.
    pub name: String,
    /// Base url, e.g. `http://host:port`.
    pub api: String,
    pub role: String,
    /// Total memory in kilobytes, from the last stats sample.
    pub memory: u64,
    pub memory_allocated: u64,
    /// Total disk in bytes, from the last stats sample.
    pub disk: u64,
    pub disk_allocated: u64,
    pub task_count: u64,
    pub stats: Option<Stats>,
    client: reqwest::Client,
}

impl Node {
    pub fn new(name: impl Into<String>, api: impl Into<String>, role: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            api: api.into(),
            role: role.into(),
            memory: 0,
            memory_allocated: 0,
            disk: 0,
            disk_allocated: 0,
            task_count: 0,
            stats: None,
            client: reqwest::Client::new(),
        }
    }

    /// Fetches a fresh stats sample from the worker and refreshes the
    /// cached memory and disk totals.
    pub async fn get_stats(&mut self) -> Result<Stats> {
        let url = format!("{}/stats", self.api);
        let resp = http_get_with_retry(&self.client, &url).await?;
        if !resp.status().is_success() {
            return Err(Error::StatsUnavailable(self.name.clone()));
        }
        let stats: Stats = resp.json().await?;
        self.memory = stats.mem_total_kb();
        self.disk = stats.disk_total();
        self.stats = Some(stats.clone());
        Ok(stats)
    }
}

/// GET with a flat retry: up to 10 attempts, 5 s apart. Worker stats
/// endpoints come and go as workers restart; everything else in the
/// manager tolerates a slow answer here.
pub async fn http_get_with_retry(
    client: &reqwest::Client,
    url: &str,
) -> Result<reqwest::Response> {
    let mut attempt = 0;
    loop {
        match client.get(url).send().await {
            Ok(resp) => return Ok(resp),
            Err(err) => {
                attempt += 1;
                if attempt >= RETRY_ATTEMPTS {
                    return Err(err.into());
                }
                warn!(%url, attempt, error = %err, "error calling url, retrying");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}
