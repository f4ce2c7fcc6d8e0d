mod common;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use uuid::Uuid;

use stevedore::manager::api::ManagerApi;
use stevedore::manager::{Manager, SharedManager};
use stevedore::scheduler::Policy;
use stevedore::store::MemoryStore;
use stevedore::task::{State, Task, TaskEvent};
use stevedore::worker::api::ErrResponse;

use common::{host_ports, new_worker, sample_task, spawn_worker_api, FakeDriver};

fn new_manager(workers: Vec<String>, policy: Policy) -> Manager {
    Manager::new(
        workers,
        policy,
        Box::new(MemoryStore::new()),
        Box::new(MemoryStore::new()),
    )
}

async fn spawn_manager_api(manager: SharedManager) -> String {
    let app = ManagerApi::router(manager);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

#[tokio::test]
async fn places_task_and_reconciles_running_state() {
    let driver = FakeDriver::new();
    let worker = Arc::new(Mutex::new(new_worker(driver.clone())));
    let addr = spawn_worker_api(worker.clone()).await;
    let mut manager = new_manager(vec![addr.clone()], Policy::RoundRobin);

    let task = sample_task("hello");
    manager.add_task(TaskEvent::new(State::Running, task.clone()));
    manager.send_work().await;

    assert_eq!(manager.pending_len(), 0);
    assert_eq!(manager.get_task(&task.id).unwrap().state, State::Scheduled);
    assert_eq!(worker.lock().await.queue_len(), 1);

    worker.lock().await.run_task().await.unwrap();
    driver.set_inspect_ports(host_ports("80/tcp", "49153"));
    worker.lock().await.update_tasks().await.unwrap();

    manager.update_tasks().await;
    let seen = manager.get_task(&task.id).unwrap();
    assert_eq!(seen.state, State::Running);
    assert_eq!(seen.container_id.as_deref(), Some("ctr-1"));
    assert_eq!(seen.host_ports, host_ports("80/tcp", "49153"));
}

#[tokio::test]
async fn requeues_event_when_no_candidate_matches() {
    // EPVM sees zero free disk on a fresh node, so a task wanting a
    // gigabyte has nowhere to go.
    let mut manager = new_manager(vec!["localhost:9999".to_string()], Policy::Epvm);
    let mut task = sample_task("greedy");
    task.disk = 1 << 30;

    manager.add_task(TaskEvent::new(State::Running, task.clone()));
    assert_eq!(manager.pending_len(), 1);

    manager.send_work().await;
    assert_eq!(manager.pending_len(), 1);
    assert!(manager.get_task(&task.id).is_err());
}

#[tokio::test]
async fn drops_non_stop_event_for_already_placed_task() {
    let driver = FakeDriver::new();
    let worker = Arc::new(Mutex::new(new_worker(driver)));
    let addr = spawn_worker_api(worker.clone()).await;
    let mut manager = new_manager(vec![addr], Policy::RoundRobin);

    let task = sample_task("steady");
    manager.add_task(TaskEvent::new(State::Running, task.clone()));
    manager.send_work().await;
    assert_eq!(worker.lock().await.queue_len(), 1);

    // A second non-Completed event for the same task is invalid and
    // must be dropped, not forwarded.
    manager.add_task(TaskEvent::new(State::Running, task.clone()));
    manager.send_work().await;
    assert_eq!(manager.pending_len(), 0);
    assert_eq!(worker.lock().await.queue_len(), 1);
}

#[tokio::test]
async fn stop_flow_completes_the_task() {
    let driver = FakeDriver::new();
    let worker = Arc::new(Mutex::new(new_worker(driver.clone())));
    let addr = spawn_worker_api(worker.clone()).await;
    let mut manager = new_manager(vec![addr], Policy::RoundRobin);

    let task = sample_task("short-lived");
    manager.add_task(TaskEvent::new(State::Running, task.clone()));
    manager.send_work().await;
    worker.lock().await.run_task().await.unwrap();
    manager.update_tasks().await;
    assert_eq!(manager.get_task(&task.id).unwrap().state, State::Running);

    let mut stopping = manager.get_task(&task.id).unwrap();
    stopping.state = State::Completed;
    manager.add_task(TaskEvent::new(State::Completed, stopping));
    manager.send_work().await;

    assert_eq!(worker.lock().await.queue_len(), 1);
    worker.lock().await.run_task().await.unwrap();
    manager.update_tasks().await;

    assert_eq!(manager.get_task(&task.id).unwrap().state, State::Completed);
    assert_eq!(driver.stop_count(), 1);
}

#[tokio::test]
async fn restart_budget_is_spent_then_respected() {
    let driver = FakeDriver::new();
    driver.set_fail_run(true);
    let worker = Arc::new(Mutex::new(new_worker(driver.clone())));
    let addr = spawn_worker_api(worker.clone()).await;
    let mut manager = new_manager(vec![addr], Policy::RoundRobin);

    let task = sample_task("crashloop");
    manager.add_task(TaskEvent::new(State::Running, task.clone()));
    manager.send_work().await;
    let _ = worker.lock().await.run_task().await;
    manager.update_tasks().await;
    assert_eq!(manager.get_task(&task.id).unwrap().state, State::Failed);

    for expected_count in 1..=3u32 {
        manager.do_health_checks().await;
        let seen = manager.get_task(&task.id).unwrap();
        assert_eq!(seen.restart_count, expected_count);
        assert_eq!(seen.state, State::Scheduled);

        // The worker tries again, fails again, and reconciliation
        // brings the failure back to the manager.
        let _ = worker.lock().await.run_task().await;
        manager.update_tasks().await;
        assert_eq!(manager.get_task(&task.id).unwrap().state, State::Failed);
    }

    // Budget spent: the task stays Failed and no new work is issued.
    manager.do_health_checks().await;
    manager.do_health_checks().await;
    let seen = manager.get_task(&task.id).unwrap();
    assert_eq!(seen.restart_count, 3);
    assert_eq!(seen.state, State::Failed);
    assert_eq!(worker.lock().await.queue_len(), 0);
}

#[tokio::test]
async fn api_accepts_events_and_rejects_bad_requests() {
    let manager = Arc::new(Mutex::new(new_manager(Vec::new(), Policy::RoundRobin)));
    let addr = spawn_manager_api(manager.clone()).await;
    let client = reqwest::Client::new();

    let event = TaskEvent::new(State::Running, sample_task("via-http"));
    let resp = client
        .post(format!("http://{addr}/tasks"))
        .json(&event)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let accepted: Task = resp.json().await.unwrap();
    assert_eq!(accepted.id, event.task.id);
    assert_eq!(manager.lock().await.pending_len(), 1);

    let resp = client
        .post(format!("http://{addr}/tasks"))
        .header("content-type", "application/json")
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: ErrResponse = resp.json().await.unwrap();
    assert_eq!(body.http_status_code, 400);

    // Stopping a task nobody has heard of changes nothing.
    let resp = client
        .delete(format!("http://{addr}/tasks/{}", Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    assert_eq!(manager.lock().await.pending_len(), 1);

    let resp = client
        .delete(format!("http://{addr}/tasks/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}
