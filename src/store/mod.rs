pub mod memory;
pub mod persistent;

use std::str::FromStr;

use thiserror::Error;

pub use memory::MemoryStore;
pub use persistent::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Normal control-flow signal: the key has never been put.
    #[error("key {0} not found")]
    NotFound(String),

    /// A stored value failed to decode. Fatal for the affected record
    /// only.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Key/value abstraction backing both the manager and the worker.
/// There is no delete: tasks and events accumulate for the lifetime of
/// the process (or the database file). `list` order is unspecified but
/// stable across calls with no intervening `put`.
pub trait Store<V>: Send + Sync {
    fn put(&mut self, key: &str, value: V) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<V, StoreError>;
    fn list(&self) -> Result<Vec<V>, StoreError>;
    fn count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Persistent,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StoreKind::Memory),
            "persistent" => Ok(StoreKind::Persistent),
            other => Err(format!("unknown store kind: {other}")),
        }
    }
}
