pub mod api;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::stats::{Stats, StatsProvider};
use crate::store::{Store, StoreError};
use crate::task::docker::ContainerDriver;
use crate::task::state::is_valid_transition;
use crate::task::{Config, State, Task};

const RUN_INTERVAL: Duration = Duration::from_secs(10);
const STATS_INTERVAL: Duration = Duration::from_secs(15);
const UPDATE_INTERVAL: Duration = Duration::from_secs(15);

pub type SharedWorker = Arc<Mutex<Worker>>;

/// A node-local task runner: accepts tasks from the manager over HTTP,
/// runs them in FIFO order against the container driver, and keeps the
/// observed state of every task it has ever been handed.
pub struct Worker {
    pub name: String,
    queue: VecDeque<Task>,
    db: Box<dyn Store<Task> + Send + Sync>,
    driver: Arc<dyn ContainerDriver>,
    stats_provider: Box<dyn StatsProvider + Send>,
    stats: Option<Stats>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        db: Box<dyn Store<Task> + Send + Sync>,
        driver: Arc<dyn ContainerDriver>,
        stats_provider: Box<dyn StatsProvider + Send>,
    ) -> Self {
        Worker {
            name: name.into(),
            queue: VecDeque::new(),
            db,
            driver,
            stats_provider,
            stats: None,
        }
    }

    pub fn add_task(&mut self, task: Task) {
        self.queue.push_back(task);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn get_task(&self, id: &Uuid) -> Result<Task> {
        match self.db.get(&id.to_string()) {
            Ok(task) => Ok(task),
            Err(StoreError::NotFound(_)) => Err(Error::TaskNotFound(*id)),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.db.list()?)
    }

    /// Dequeues one task and acts on its desired state. An empty queue
    /// is a successful no-op. The persisted copy, if any, gates the
    /// transition; a task we have never seen is persisted as-is first.
    pub async fn run_task(&mut self) -> Result<()> {
        let Some(queued) = self.queue.pop_front() else {
            debug!("no tasks in the queue");
            return Ok(());
        };

        let persisted = match self.db.get(&queued.id.to_string()) {
            Ok(task) => task,
            Err(StoreError::NotFound(_)) => {
                self.db.put(&queued.id.to_string(), queued.clone())?;
                queued.clone()
            }
            Err(err) => return Err(err.into()),
        };

        if !is_valid_transition(persisted.state, queued.state) {
            return Err(Error::InvalidTransition {
                from: persisted.state,
                to: queued.state,
            });
        }

        match queued.state {
            State::Scheduled => self.start_task(queued).await,
            State::Completed => self.stop_task(queued).await,
            other => Err(Error::InvalidDispatchState(other)),
        }
    }

    async fn start_task(&mut self, mut task: Task) -> Result<()> {
        task.start_time = Some(Utc::now());
        let config = Config::from_task(&task);
        match self.driver.run(&config).await {
            Err(err) => {
                error!(task_id = %task.id, error = %err, "error running task");
                task.state = State::Failed;
                self.db.put(&task.id.to_string(), task)?;
                Err(err.into())
            }
            Ok(container_id) => {
                info!(task_id = %task.id, %container_id, "task running");
                task.container_id = Some(container_id);
                task.state = State::Running;
                self.db.put(&task.id.to_string(), task)?;
                Ok(())
            }
        }
    }

    /// Stops and removes the task's container. The task is recorded as
    /// Completed even when the driver fails: from this worker's point
    /// of view the task is done either way.
    async fn stop_task(&mut self, mut task: Task) -> Result<()> {
        let result = match task.container_id.as_deref() {
            Some(container_id) => self.driver.stop(container_id).await,
            None => Ok(()),
        };
        if let Err(err) = &result {
            error!(task_id = %task.id, error = %err, "error stopping container");
        }
        task.finish_time = Some(Utc::now());
        task.state = State::Completed;
        info!(task_id = %task.id, container_id = ?task.container_id, "stopped and removed container");
        self.db.put(&task.id.to_string(), task)?;
        result.map_err(Into::into)
    }

    /// Reconciles stored Running tasks against the container runtime.
    /// A missing or exited container marks the task Failed; observed
    /// host ports are refreshed either way.
    pub async fn update_tasks(&mut self) -> Result<()> {
        for mut task in self.db.list()? {
            if task.state != State::Running {
                continue;
            }
            let container_id = task.container_id.clone().unwrap_or_default();
            match self.driver.inspect(&container_id).await {
                Err(err) => {
                    warn!(task_id = %task.id, error = %err, "no container for running task");
                    task.state = State::Failed;
                    self.db.put(&task.id.to_string(), task)?;
                }
                Ok(status) => {
                    if status.state == "exited" {
                        warn!(task_id = %task.id, state = %status.state, "container in non-running state");
                        task.state = State::Failed;
                    }
                    task.host_ports = status.host_ports;
                    self.db.put(&task.id.to_string(), task)?;
                }
            }
        }
        Ok(())
    }

    pub fn collect_stats(&mut self) {
        self.stats = Some(self.stats_provider.sample());
    }

    /// Last collected sample, taking one on the spot if the collect
    /// loop has not fired yet.
    pub fn stats(&mut self) -> Stats {
        if self.stats.is_none() {
            self.collect_stats();
        }
        self.stats.clone().unwrap_or_default()
    }
}

/// Drains the queue, then sleeps. Errors never kill the loop; the
/// manager learns about failures through the task states we persist.
pub async fn run_loop(worker: SharedWorker, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        loop {
            let mut w = worker.lock().await;
            if w.queue_len() == 0 {
                break;
            }
            if let Err(err) = w.run_task().await {
                error!(error = %err, "error running task");
            }
        }
        debug!("no tasks to process, sleeping");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(RUN_INTERVAL) => {}
        }
    }
}

pub async fn collect_loop(worker: SharedWorker, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        debug!("collecting stats");
        worker.lock().await.collect_stats();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(STATS_INTERVAL) => {}
        }
    }
}

pub async fn update_loop(worker: SharedWorker, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        debug!("checking status of tasks");
        if let Err(err) = worker.lock().await.update_tasks().await {
            error!(error = %err, "error updating tasks");
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(UPDATE_INTERVAL) => {}
        }
    }
}
