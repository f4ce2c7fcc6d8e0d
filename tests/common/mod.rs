#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::TcpListener;

use stevedore::stats::{CpuStat, DiskInfo, MemInfo, Stats, StatsProvider};
use stevedore::store::MemoryStore;
use stevedore::task::docker::{ContainerDriver, ContainerStatus, DockerError};
use stevedore::task::{Config, PortBinding, PortMap, State, Task};
use stevedore::worker::api::WorkerApi;
use stevedore::worker::{SharedWorker, Worker};

/// Driver double: hands out sequential container ids and records every
/// call, with switches for failure and inspect results.
pub struct FakeDriver {
    pub fail_run: AtomicBool,
    pub inspect_state: Mutex<String>,
    pub inspect_ports: Mutex<PortMap>,
    pub runs: Mutex<Vec<String>>,
    pub stops: Mutex<Vec<String>>,
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeDriver {
            fail_run: AtomicBool::new(false),
            inspect_state: Mutex::new("running".to_string()),
            inspect_ports: Mutex::new(PortMap::new()),
            runs: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
        })
    }

    pub fn set_fail_run(&self, fail: bool) {
        self.fail_run.store(fail, Ordering::SeqCst);
    }

    pub fn set_inspect_state(&self, state: &str) {
        *self.inspect_state.lock().unwrap() = state.to_string();
    }

    pub fn set_inspect_ports(&self, ports: PortMap) {
        *self.inspect_ports.lock().unwrap() = ports;
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    async fn run(&self, config: &Config) -> Result<String, DockerError> {
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(DockerError::Driver(format!(
                "image pull failed for {}",
                config.image
            )));
        }
        let mut runs = self.runs.lock().unwrap();
        runs.push(config.name.clone());
        Ok(format!("ctr-{}", runs.len()))
    }

    async fn stop(&self, container_id: &str) -> Result<(), DockerError> {
        self.stops.lock().unwrap().push(container_id.to_string());
        Ok(())
    }

    async fn inspect(&self, _container_id: &str) -> Result<ContainerStatus, DockerError> {
        Ok(ContainerStatus {
            state: self.inspect_state.lock().unwrap().clone(),
            host_ports: self.inspect_ports.lock().unwrap().clone(),
        })
    }
}

/// Stats double with plausible fixed figures, so worker `/stats`
/// answers are deterministic.
pub struct FixedStatsProvider;

impl StatsProvider for FixedStatsProvider {
    fn sample(&mut self) -> Stats {
        Stats {
            mem_stats: MemInfo {
                mem_total: 8_000_000,
                mem_available: 4_000_000,
            },
            disk_stats: DiskInfo {
                all: 100 << 30,
                used: 40 << 30,
                free: 60 << 30,
            },
            cpu_stats: CpuStat {
                user: 4000,
                nice: 100,
                system: 1200,
                idle: 16000,
                io_wait: 500,
                irq: 30,
                soft_irq: 45,
                steal: 0,
            },
            ..Default::default()
        }
    }
}

pub fn sample_task(name: &str) -> Task {
    Task {
        name: name.to_string(),
        image: "strm/helloworld-http".to_string(),
        memory: 64 << 20,
        health_check: "/".to_string(),
        ..Default::default()
    }
}

pub fn scheduled_task(name: &str) -> Task {
    Task {
        state: State::Scheduled,
        ..sample_task(name)
    }
}

pub fn new_worker(driver: Arc<FakeDriver>) -> Worker {
    Worker::new(
        "worker-1",
        Box::new(MemoryStore::new()),
        driver,
        Box::new(FixedStatsProvider),
    )
}

pub fn host_ports(spec: &str, host_port: &str) -> PortMap {
    PortMap::from([(
        spec.to_string(),
        vec![PortBinding {
            host_ip: "0.0.0.0".to_string(),
            host_port: host_port.to_string(),
        }],
    )])
}

/// Binds the worker API on an ephemeral port and returns its
/// `host:port` address.
pub async fn spawn_worker_api(worker: SharedWorker) -> String {
    let app = WorkerApi::router(worker);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}
