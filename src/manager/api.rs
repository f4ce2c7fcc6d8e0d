use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State as AxumState};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::SharedManager;
use crate::task::{State, TaskEvent};
use crate::worker::api::ErrResponse;

pub struct ManagerApi {
    pub address: String,
    pub port: u16,
    pub manager: SharedManager,
}

impl ManagerApi {
    pub fn new(address: impl Into<String>, port: u16, manager: SharedManager) -> Self {
        ManagerApi {
            address: address.into(),
            port,
            manager,
        }
    }

    pub fn router(manager: SharedManager) -> Router {
        Router::new()
            .route("/tasks", post(start_task).get(get_tasks))
            .route("/tasks/{task_id}", delete(stop_task))
            .with_state(manager)
    }

    pub async fn start(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let app = Self::router(self.manager);
        let listener = TcpListener::bind(format!("{}:{}", self.address, self.port)).await?;
        info!(address = %self.address, port = self.port, "manager api listening");
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
    AxumState(manager): AxumState<SharedManager>,
    payload: Result<Json<TaskEvent>, JsonRejection>,
) -> Response {
    let Json(event) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            return bad_request(format!("error unmarshalling body: {}", rejection.body_text()))
        }
    };
    let task = event.task.clone();
    manager.lock().await.add_task(event);
    info!(task_id = %task.id, "task added");
    (StatusCode::CREATED, Json(task)).into_response()
}

async fn get_tasks(AxumState(manager): AxumState<SharedManager>) -> Response {
    match manager.lock().await.get_tasks() {
        Ok(tasks) => (StatusCode::OK, Json(tasks)).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn stop_task(
    AxumState(manager): AxumState<SharedManager>,
    Path(task_id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&task_id) else {
        return bad_request(format!("invalid task id: {task_id}"));
    };
    let mut m = manager.lock().await;
    let task = match m.get_task(&id) {
        Ok(task) => task,
        Err(_) => {
            info!(task_id = %id, "no task with that id");
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let mut stopping = task;
    stopping.state = State::Completed;
    let event = TaskEvent::new(State::Completed, stopping);
    info!(task_id = %id, event_id = %event.id, "stop event added");
    m.add_task(event);
    StatusCode::NO_CONTENT.into_response()
}
