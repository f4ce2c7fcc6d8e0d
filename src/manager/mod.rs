pub mod api;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::scheduler::{Policy, Scheduler};
use crate::store::{Store, StoreError};
use crate::task::state::is_valid_transition;
use crate::task::{PortMap, State, Task, TaskEvent};
use crate::worker::api::ErrResponse;

const PROCESS_INTERVAL: Duration = Duration::from_secs(10);
const UPDATE_INTERVAL: Duration = Duration::from_secs(15);
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// A task in Failed with this many restarts is abandoned there.
const RESTART_BUDGET: u32 = 3;

pub type SharedManager = Arc<Mutex<Manager>>;

/// The control-plane side: accepts task events, places tasks onto
/// workers, polls workers to reconcile observed state, and restarts
/// unhealthy tasks until their restart budget runs out.
///
/// The two placement maps form a bipartite relation and are always
/// updated together, under the same lock that serializes everything
/// else here.
pub struct Manager {
    pending: VecDeque<TaskEvent>,
    task_db: Box<dyn Store<Task> + Send + Sync>,
    event_db: Box<dyn Store<TaskEvent> + Send + Sync>,
    pub workers: Vec<String>,
    worker_task_map: HashMap<String, Vec<Uuid>>,
    task_worker_map: HashMap<Uuid, String>,
    worker_nodes: Vec<Node>,
    scheduler: Scheduler,
    client: reqwest::Client,
}

impl Manager {
    pub fn new(
        workers: Vec<String>,
        policy: Policy,
        task_db: Box<dyn Store<Task> + Send + Sync>,
        event_db: Box<dyn Store<TaskEvent> + Send + Sync>,
    ) -> Self {
        let mut worker_task_map = HashMap::new();
        let mut worker_nodes = Vec::new();
        for worker in &workers {
            worker_task_map.insert(worker.clone(), Vec::new());
            worker_nodes.push(Node::new(
                worker.clone(),
                format!("http://{worker}"),
                "worker",
            ));
        }
        Manager {
            pending: VecDeque::new(),
            task_db,
            event_db,
            workers,
            worker_task_map,
            task_worker_map: HashMap::new(),
            worker_nodes,
            scheduler: Scheduler::new(policy),
            client: reqwest::Client::new(),
        }
    }

    /// Enqueue an event for the process loop. No validation happens
    /// here; bad events are weeded out at dispatch.
    pub fn add_task(&mut self, event: TaskEvent) {
        self.pending.push_back(event);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn get_task(&self, id: &Uuid) -> Result<Task> {
        match self.task_db.get(&id.to_string()) {
            Ok(task) => Ok(task),
            Err(StoreError::NotFound(_)) => Err(Error::TaskNotFound(*id)),
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.task_db.list()?)
    }

    async fn select_worker(&mut self, task: &Task) -> Option<usize> {
        let candidates = self.scheduler.select_candidates(task, &self.worker_nodes);
        if candidates.is_empty() {
            return None;
        }
        let scores = self
            .scheduler
            .score(task, &mut self.worker_nodes, &candidates)
            .await;
        self.scheduler.pick(&scores, &candidates, &self.worker_nodes)
    }

    /// Pulls one event off the pending queue and acts on it: a stop for
    /// an already-placed task, or a fresh placement. Events that cannot
    /// be delivered because of transport trouble go back on the queue;
    /// events a worker rejects are dropped with a log line.
    pub async fn send_work(&mut self) {
        let Some(event) = self.pending.pop_front() else {
            debug!("no work in the queue");
            return;
        };
        if let Err(err) = self.event_db.put(&event.id.to_string(), event.clone()) {
            error!(event_id = %event.id, error = %err, "error storing task event");
            return;
        }
        info!(event_id = %event.id, task_id = %event.task.id, "pulled event off pending queue");

        if let Some(worker) = self.task_worker_map.get(&event.task.id).cloned() {
            // The task is already placed, so the only actionable intent
            // is a valid stop.
            let persisted = match self.task_db.get(&event.task.id.to_string()) {
                Ok(task) => task,
                Err(err) => {
                    error!(task_id = %event.task.id, error = %err, "unable to schedule task");
                    return;
                }
            };
            if event.state == State::Completed
                && is_valid_transition(persisted.state, event.state)
            {
                self.stop_task(&worker, &event.task.id.to_string()).await;
            } else {
                warn!(
                    task_id = %persisted.id,
                    from = ?persisted.state,
                    to = ?event.state,
                    "invalid request for existing task"
                );
            }
            return;
        }

        let mut task = event.task.clone();
        let Some(node_idx) = self.select_worker(&task).await else {
            warn!(task_id = %task.id, "no available candidates match resource request");
            self.pending.push_back(event);
            return;
        };
        let worker = self.worker_nodes[node_idx].name.clone();
        info!(task_id = %task.id, worker = %worker, "placing task");

        self.worker_task_map
            .entry(worker.clone())
            .or_default()
            .push(task.id);
        self.task_worker_map.insert(task.id, worker.clone());
        self.worker_nodes[node_idx].task_count += 1;

        task.state = State::Scheduled;
        if let Err(err) = self.task_db.put(&task.id.to_string(), task.clone()) {
            error!(task_id = %task.id, error = %err, "error storing task");
            return;
        }

        let mut outbound = event.clone();
        outbound.task = task;

        let url = format!("http://{worker}/tasks");
        match self.client.post(&url).json(&outbound).send().await {
            Err(err) => {
                error!(worker = %worker, error = %err, "error connecting to worker");
                self.pending.push_back(event);
            }
            Ok(resp) if resp.status().as_u16() != 201 => {
                match resp.json::<ErrResponse>().await {
                    Ok(body) => error!(
                        status = body.http_status_code,
                        message = %body.message,
                        "worker rejected task"
                    ),
                    Err(err) => error!(error = %err, "error decoding response"),
                }
            }
            Ok(resp) => match resp.json::<Task>().await {
                Ok(accepted) => {
                    debug!(task_id = %accepted.id, state = ?accepted.state, "worker accepted task")
                }
                Err(err) => error!(error = %err, "error decoding response"),
            },
        }
    }

    async fn stop_task(&self, worker: &str, task_id: &str) {
        let url = format!("http://{worker}/tasks/{task_id}");
        match self.client.delete(&url).send().await {
            Err(err) => error!(%task_id, worker, error = %err, "error connecting to worker"),
            Ok(resp) if resp.status().as_u16() != 204 => {
                error!(%task_id, status = resp.status().as_u16(), "error sending stop request")
            }
            Ok(_) => info!(%task_id, "task scheduled to be stopped"),
        }
    }

    /// Polls every worker's task list and folds the observed runtime
    /// fields into our copies. One unreachable worker does not stop the
    /// others from being polled.
    pub async fn update_tasks(&mut self) {
        for worker in self.workers.clone() {
            debug!(worker = %worker, "checking worker for task updates");
            let url = format!("http://{worker}/tasks");
            let resp = match self.client.get(&url).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    error!(worker = %worker, error = %err, "error connecting to worker");
                    continue;
                }
            };
            if !resp.status().is_success() {
                error!(worker = %worker, status = resp.status().as_u16(), "error requesting tasks");
                continue;
            }
            let tasks: Vec<Task> = match resp.json().await {
                Ok(tasks) => tasks,
                Err(err) => {
                    error!(worker = %worker, error = %err, "error unmarshalling tasks");
                    continue;
                }
            };
            for observed in tasks {
                let mut persisted = match self.task_db.get(&observed.id.to_string()) {
                    Ok(task) => task,
                    Err(_) => {
                        debug!(task_id = %observed.id, "observed task not tracked here");
                        continue;
                    }
                };
                persisted.state = observed.state;
                persisted.start_time = observed.start_time;
                persisted.finish_time = observed.finish_time;
                persisted.container_id = observed.container_id;
                persisted.host_ports = observed.host_ports;
                if let Err(err) = self.task_db.put(&persisted.id.to_string(), persisted) {
                    error!(task_id = %observed.id, error = %err, "error storing task update");
                }
            }
        }
    }

    /// Probes every Running task's health endpoint and reschedules the
    /// ones that fail, along with any task already in Failed, until the
    /// restart budget is spent.
    pub async fn do_health_checks(&mut self) {
        let tasks = match self.get_tasks() {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(error = %err, "error listing tasks for health check");
                return;
            }
        };
        for task in tasks {
            if task.state == State::Running && task.restart_count < RESTART_BUDGET {
                if let Err(err) = self.check_task_health(&task).await {
                    warn!(task_id = %task.id, error = %err, "health check failed");
                    self.restart_task(task).await;
                }
            } else if task.state == State::Failed && task.restart_count < RESTART_BUDGET {
                self.restart_task(task).await;
            }
        }
    }

    async fn check_task_health(&self, task: &Task) -> Result<()> {
        let worker = self
            .task_worker_map
            .get(&task.id)
            .ok_or(Error::TaskNotFound(task.id))?;
        let host_port = first_host_port(&task.host_ports).ok_or_else(|| {
            Error::HealthCheck(task.id, "no host port observed yet".to_string())
        })?;
        let host = worker.split(':').next().unwrap_or(worker);
        let url = format!("http://{host}:{host_port}{}", task.health_check);
        debug!(task_id = %task.id, url = %url, "calling health check");

        let resp = self.client.get(&url).send().await?;
        if resp.status().as_u16() != 200 {
            return Err(Error::HealthCheck(
                task.id,
                format!("endpoint returned {}", resp.status()),
            ));
        }
        debug!(task_id = %task.id, status = resp.status().as_u16(), "health check passed");
        Ok(())
    }

    /// Reschedules a task onto its current worker: bumps the restart
    /// count, marks it Scheduled, and posts a fresh event with desired
    /// state Running. Transport failure puts the event on the pending
    /// queue for the process loop to retry.
    pub async fn restart_task(&mut self, mut task: Task) {
        let Some(worker) = self.task_worker_map.get(&task.id).cloned() else {
            warn!(task_id = %task.id, "no worker recorded for task, cannot restart");
            return;
        };
        task.state = State::Scheduled;
        task.restart_count += 1;
        if let Err(err) = self.task_db.put(&task.id.to_string(), task.clone()) {
            error!(task_id = %task.id, error = %err, "error storing task");
            return;
        }
        info!(task_id = %task.id, restart_count = task.restart_count, "restarting task");

        let event = TaskEvent::new(State::Running, task);
        let url = format!("http://{worker}/tasks");
        match self.client.post(&url).json(&event).send().await {
            Err(err) => {
                error!(worker = %worker, error = %err, "error connecting to worker");
                self.pending.push_back(event);
            }
            Ok(resp) if resp.status().as_u16() != 201 => match resp.json::<ErrResponse>().await {
                Ok(body) => error!(
                    status = body.http_status_code,
                    message = %body.message,
                    "worker rejected restart"
                ),
                Err(err) => error!(error = %err, "error decoding response"),
            },
            Ok(_) => {}
        }
    }
}

fn first_host_port(ports: &PortMap) -> Option<&str> {
    ports
        .values()
        .find_map(|bindings| bindings.first())
        .map(|binding| binding.host_port.as_str())
}

pub async fn process_loop(manager: SharedManager, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        debug!("processing any tasks in the queue");
        manager.lock().await.send_work().await;
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(PROCESS_INTERVAL) => {}
        }
    }
}

pub async fn update_loop(manager: SharedManager, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        debug!("checking for task updates from workers");
        manager.lock().await.update_tasks().await;
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(UPDATE_INTERVAL) => {}
        }
    }
}

pub async fn health_loop(manager: SharedManager, shutdown: CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        debug!("performing task health checks");
        manager.lock().await.do_health_checks().await;
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(HEALTH_INTERVAL) => {}
        }
    }
}
