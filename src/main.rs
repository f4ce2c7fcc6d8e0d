use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use stevedore::manager::api::ManagerApi;
use stevedore::manager::{self, Manager};
use stevedore::scheduler::Policy;
use stevedore::shutdown::install_shutdown_handler;
use stevedore::stats::SystemStatsProvider;
use stevedore::store::{MemoryStore, SqliteStore, Store, StoreError, StoreKind};
use stevedore::task::docker::DockerDriver;
use stevedore::task::{State, Task, TaskEvent};
use stevedore::worker::api::WorkerApi;
use stevedore::worker::{self, Worker};

#[derive(Parser, Debug)]
#[command(name = "stevedore")]
#[command(about = "A small manager/worker container orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the manager: accepts tasks, schedules them onto workers,
    /// reconciles state and restarts unhealthy tasks.
    Manager {
        /// Hostname or IP address to listen on
        #[arg(short = 'H', long, env = "O_MANAGER_HOST", default_value = "localhost")]
        host: String,

        /// Port on which to listen
        #[arg(short, long, env = "O_MANAGER_PORT", default_value_t = 5554)]
        port: u16,

        /// Workers this manager schedules onto, as host:port
        #[arg(short, long, value_delimiter = ',', default_value = "localhost:5555")]
        workers: Vec<String>,

        /// Scheduling policy ("roundrobin" or "epvm")
        #[arg(short, long, default_value = "roundrobin")]
        scheduler: String,

        /// Datastore for tasks and events ("memory" or "persistent")
        #[arg(long, default_value = "memory")]
        store: String,
    },

    /// Run a worker: accepts tasks from the manager and runs them as
    /// containers.
    Worker {
        /// Hostname or IP address to listen on
        #[arg(short = 'H', long, env = "O_WORKER_HOST", default_value = "localhost")]
        host: String,

        /// Port on which to listen
        #[arg(short, long, env = "O_WORKER_PORT", default_value_t = 5555)]
        port: u16,

        /// Name of the worker
        #[arg(short, long)]
        name: Option<String>,

        /// Datastore for tasks ("memory" or "persistent")
        #[arg(short, long, default_value = "memory")]
        store: String,
    },

    /// Submit a new task to the manager.
    Run {
        /// Manager to submit tasks to
        #[arg(short, long, default_value = "localhost:5554")]
        manager: String,

        /// Task declaration file (JSON)
        #[arg(short, long, default_value = "task.json")]
        filename: String,
    },

    /// List the manager's view of all tasks.
    Status {
        /// Manager address
        #[arg(short, long, default_value = "localhost:5554")]
        manager: String,
    },
}

fn open_store<V>(
    kind: StoreKind,
    path: &Path,
    bucket: &str,
) -> Result<Box<dyn Store<V> + Send + Sync>, StoreError>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    Ok(match kind {
        StoreKind::Memory => Box::new(MemoryStore::new()),
        StoreKind::Persistent => Box::new(SqliteStore::open(path, bucket)?),
    })
}

fn time_ago(t: Option<DateTime<Utc>>) -> String {
    let Some(t) = t else {
        return "-".to_string();
    };
    let secs = (Utc::now() - t).num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}h ago", secs / 3600)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Manager {
            host,
            port,
            workers,
            scheduler,
            store,
        } => {
            let policy: Policy = scheduler.parse()?;
            let kind: StoreKind = store.parse()?;
            let db_file = PathBuf::from(format!("stevedore_manager_{port}.db"));
            let task_db = open_store::<Task>(kind, &db_file, "tasks")?;
            let event_db = open_store::<TaskEvent>(kind, &db_file, "events")?;

            info!(%host, port, workers = ?workers, "starting manager");
            let manager = Arc::new(Mutex::new(Manager::new(workers, policy, task_db, event_db)));

            let shutdown = install_shutdown_handler();
            tokio::spawn(manager::process_loop(manager.clone(), shutdown.clone()));
            tokio::spawn(manager::update_loop(manager.clone(), shutdown.clone()));
            tokio::spawn(manager::health_loop(manager.clone(), shutdown.clone()));

            ManagerApi::new(host, port, manager).start(shutdown).await?;
        }

        Command::Worker {
            host,
            port,
            name,
            store,
        } => {
            let name = name.unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));
            let kind: StoreKind = store.parse()?;
            let db_file = PathBuf::from(format!("stevedore_worker_{port}.db"));
            let db = open_store::<Task>(kind, &db_file, "tasks")?;
            let driver = Arc::new(DockerDriver::new()?);

            info!(%host, port, name = %name, "starting worker");
            let worker = Arc::new(Mutex::new(Worker::new(
                &name,
                db,
                driver,
                Box::new(SystemStatsProvider::new()),
            )));

            let shutdown = install_shutdown_handler();
            tokio::spawn(worker::run_loop(worker.clone(), shutdown.clone()));
            tokio::spawn(worker::collect_loop(worker.clone(), shutdown.clone()));
            tokio::spawn(worker::update_loop(worker.clone(), shutdown.clone()));

            WorkerApi::new(host, port, worker).start(shutdown).await?;
        }

        Command::Run { manager, filename } => {
            let data = std::fs::read_to_string(&filename)?;
            let task: Task = serde_json::from_str(&data)?;
            let event = TaskEvent::new(State::Running, task);

            info!(manager = %manager, file = %filename, "submitting task");
            let client = reqwest::Client::new();
            let resp = client
                .post(format!("http://{manager}/tasks"))
                .json(&event)
                .send()
                .await?;
            if resp.status().as_u16() != 201 {
                return Err(format!("manager returned {}", resp.status()).into());
            }
            let accepted: Task = resp.json().await?;
            println!("Submitted task {}", accepted.id);
        }

        Command::Status { manager } => {
            let client = reqwest::Client::new();
            let tasks: Vec<Task> = client
                .get(format!("http://{manager}/tasks"))
                .send()
                .await?
                .json()
                .await?;

            println!(
                "{:<38} {:<20} {:<12} {:<10} {:<14} {}",
                "ID", "NAME", "CREATED", "STATE", "CONTAINER", "IMAGE"
            );
            for task in tasks {
                let container = task
                    .container_id
                    .as_deref()
                    .map(|id| id.chars().take(12).collect::<String>())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<38} {:<20} {:<12} {:<10} {:<14} {}",
                    task.id,
                    task.name,
                    time_ago(task.start_time),
                    format!("{:?}", task.state),
                    container,
                    task.image
                );
            }
        }
    }

    Ok(())
}
