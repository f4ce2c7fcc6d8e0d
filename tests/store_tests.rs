mod common;

use stevedore::store::{MemoryStore, SqliteStore, Store, StoreError};
use stevedore::task::{State, Task, TaskEvent};

use common::sample_task;

#[test]
fn memory_store_round_trips_tasks() {
    let mut store: MemoryStore<Task> = MemoryStore::new();
    let task = sample_task("hello");
    store.put(&task.id.to_string(), task.clone()).unwrap();

    let loaded = store.get(&task.id.to_string()).unwrap();
    assert_eq!(loaded, task);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn memory_store_unknown_key_is_not_found() {
    let store: MemoryStore<Task> = MemoryStore::new();
    assert!(matches!(store.get("missing"), Err(StoreError::NotFound(_))));
}

#[test]
fn persistent_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    let tasks: Vec<Task> = (0..3).map(|i| sample_task(&format!("task-{i}"))).collect();
    {
        let mut store: SqliteStore<Task> = SqliteStore::open(&path, "tasks").unwrap();
        for task in &tasks {
            store.put(&task.id.to_string(), task.clone()).unwrap();
        }
        assert_eq!(store.count().unwrap(), 3);
    }

    let store: SqliteStore<Task> = SqliteStore::open(&path, "tasks").unwrap();
    let mut loaded = store.list().unwrap();
    let mut expected = tasks.clone();
    loaded.sort_by_key(|t| t.id);
    expected.sort_by_key(|t| t.id);
    assert_eq!(loaded, expected);
}

#[test]
fn persistent_store_overwrites_and_reports_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let mut store: SqliteStore<Task> = SqliteStore::open(&path, "tasks").unwrap();

    let mut task = sample_task("flappy");
    store.put(&task.id.to_string(), task.clone()).unwrap();
    task.state = State::Running;
    store.put(&task.id.to_string(), task.clone()).unwrap();

    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.get(&task.id.to_string()).unwrap().state, State::Running);
    assert!(matches!(store.get("missing"), Err(StoreError::NotFound(_))));
}

#[test]
fn buckets_in_one_file_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    let mut task_store: SqliteStore<Task> = SqliteStore::open(&path, "tasks").unwrap();
    let mut event_store: SqliteStore<TaskEvent> = SqliteStore::open(&path, "events").unwrap();

    let task = sample_task("solo");
    let event = TaskEvent::new(State::Running, task.clone());
    task_store.put(&task.id.to_string(), task.clone()).unwrap();
    event_store.put(&event.id.to_string(), event.clone()).unwrap();

    assert_eq!(task_store.count().unwrap(), 1);
    assert_eq!(event_store.count().unwrap(), 1);
    assert_eq!(event_store.get(&event.id.to_string()).unwrap(), event);
}

#[test]
fn task_and_event_encode_decode_equal() {
    let mut task = sample_task("codec");
    task.state = State::Running;
    task.container_id = Some("abc123".to_string());
    task.host_ports = common::host_ports("80/tcp", "49153");

    let body = serde_json::to_string(&task).unwrap();
    let decoded: Task = serde_json::from_str(&body).unwrap();
    assert_eq!(decoded, task);

    let event = TaskEvent::new(State::Completed, task);
    let body = serde_json::to_string(&event).unwrap();
    let decoded: TaskEvent = serde_json::from_str(&body).unwrap();
    assert_eq!(decoded, event);
}
