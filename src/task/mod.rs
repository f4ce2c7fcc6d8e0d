pub mod docker;
pub mod state;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task. `Pending` is the initial state;
/// `Completed` and `Failed` are terminal, though a `Failed` task may be
/// rescheduled by the manager until its restart budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

/// Observed port bindings for a container, keyed by the container-side
/// port spec (e.g. `"80/tcp"`). Mirrors the Docker wire shape.
pub type PortMap = HashMap<String, Vec<PortBinding>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// The authoritative unit of work: a declared container plus its
/// observed runtime state.
///
/// The worker is authoritative for `state`, `container_id` and
/// `host_ports`; the manager is authoritative for placement and
/// `restart_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub state: State,
    pub image: String,
    pub cpu: f64,
    /// Requested memory in bytes.
    pub memory: u64,
    /// Requested disk in bytes.
    pub disk: u64,
    pub env: Vec<String>,
    /// Container port specs to expose, e.g. `"80/tcp"`.
    pub exposed_ports: Vec<String>,
    pub port_bindings: HashMap<String, String>,
    pub restart_policy: String,
    pub container_id: Option<String>,
    /// Host ports observed from the container runtime.
    pub host_ports: PortMap,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    /// Path probed by the manager's health-check loop, e.g. `"/health"`.
    pub health_check: String,
    pub restart_count: u32,
}

impl Default for Task {
    fn default() -> Self {
        Task {
            id: Uuid::new_v4(),
            name: String::new(),
            state: State::Pending,
            image: String::new(),
            cpu: 0.0,
            memory: 0,
            disk: 0,
            env: Vec::new(),
            exposed_ports: Vec::new(),
            port_bindings: HashMap::new(),
            restart_policy: String::new(),
            container_id: None,
            host_ports: PortMap::new(),
            start_time: None,
            finish_time: None,
            health_check: String::new(),
            restart_count: 0,
        }
    }
}

/// An intent to move a task to a desired state. Events drive every
/// transition in the system; replaying an event whose desired state
/// equals the task's current state is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskEvent {
    pub id: Uuid,
    pub state: State,
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl Default for TaskEvent {
    fn default() -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state: State::Pending,
            timestamp: Utc::now(),
            task: Task::default(),
        }
    }
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state,
            timestamp: Utc::now(),
            task,
        }
    }
}

/// Runtime configuration handed to the container driver, derived from a
/// task declaration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub exposed_ports: Vec<String>,
    /// Image default command when empty.
    pub cmd: Vec<String>,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    /// One of `always`, `unless-stopped`, `on-failure`, or `no`.
    pub restart_policy: String,
}

impl Config {
    pub fn from_task(t: &Task) -> Self {
        Config {
            name: t.name.clone(),
            image: t.image.clone(),
            env: t.env.clone(),
            exposed_ports: t.exposed_ports.clone(),
            cmd: Vec::new(),
            cpu: t.cpu,
            memory: t.memory as i64,
            disk: t.disk as i64,
            restart_policy: t.restart_policy.clone(),
        }
    }
}
