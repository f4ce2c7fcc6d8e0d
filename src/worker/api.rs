use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State as AxumState};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::SharedWorker;
use crate::stats::Stats;
use crate::task::{State, Task, TaskEvent};

/// Error body returned on a bad request, with the wire field names the
/// CLI and manager expect.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrResponse {
    #[serde(rename = "HTTPStatusCode")]
    pub http_status_code: u16,
    #[serde(rename = "Message")]
    pub message: String,
}

pub struct WorkerApi {
    pub address: String,
    pub port: u16,
    pub worker: SharedWorker,
}

impl WorkerApi {
    pub fn new(address: impl Into<String>, port: u16, worker: SharedWorker) -> Self {
        WorkerApi {
            address: address.into(),
            port,
            worker,
        }
    }

    pub fn router(worker: SharedWorker) -> Router {
        Router::new()
            .route("/tasks", post(start_task).get(get_tasks))
            .route("/tasks/{task_id}", delete(stop_task))
            .route("/stats", get(get_stats))
            .with_state(worker)
    }

    pub async fn start(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let app = Self::router(self.worker);
        let listener = TcpListener::bind(format!("{}:{}", self.address, self.port)).await?;
        info!(address = %self.address, port = self.port, "worker api listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}

fn bad_request(message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrResponse {
            http_status_code: StatusCode::BAD_REQUEST.as_u16(),
            message,
        }),
    )
        .into_response()
}

async fn start_task(
    AxumState(worker): AxumState<SharedWorker>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Response {
    let Json(event) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            return bad_request(format!("error unmarshalling body: {}", rejection.body_text()))
        }
    };
    let task = event.task.clone();
    worker.lock().await.add_task(event.task);
    info!(task_id = %task.id, "task queued");
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn get_tasks(AxumState(worker): AxumState<SharedWorker>) -> Response {
    match worker.lock().await.get_tasks() {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn stop_task(
    AxumState(worker): AxumState<SharedWorker>,
    Path(task_id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&task_id) else {
        return bad_request(format!("invalid task id: {task_id}"));
    };
    let mut w = worker.lock().await;
    let task = match w.get_task(&id) {
        Ok(task) => task,
        Err(_) => {
            info!(task_id = %id, "no task with that id");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let mut stopping: Task = task;
    stopping.state = State::Completed;
    info!(task_id = %id, container_id = ?stopping.container_id, "task queued to stop");
    w.add_task(stopping);
    StatusCode::NO_CONTENT.into_response()
}

async fn get_stats(AxumState(worker): AxumState<SharedWorker>) -> Json<Stats> {
    Json(worker.lock().await.stats())
}
