use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;
use crate::task::docker::DockerError;
use crate::task::State;

/// Errors surfaced by the manager and worker cores.
///
/// Every periodic loop is a top-level supervisor: it logs these and
/// moves on to the next iteration. The only fatal errors in the system
/// are failing to bind a listener or to open the persistent store at
/// startup, and those are handled in `main`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: State, to: State },

    #[error("invalid task state {0:?} for dispatch")]
    InvalidDispatchState(State),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("health check for task {0} failed: {1}")]
    HealthCheck(Uuid, String),

    #[error("stats unavailable for node {0}")]
    StatsUnavailable(String),

    #[error(transparent)]
    Docker(#[from] DockerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
