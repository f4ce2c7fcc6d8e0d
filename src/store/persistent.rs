use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{Store, StoreError};

/// Durable store: one SQLite file per process, one table ("bucket")
/// per value kind. Values are stored as JSON text keyed by id, so the
/// file stays inspectable with the sqlite3 shell.
///
/// The connection is wrapped in a `Mutex` purely so `SqliteStore` is
/// `Sync` (required by the `Store` trait object); callers already
/// serialize access through the owning core's lock.
pub struct SqliteStore<V> {
    conn: Mutex<Connection>,
    bucket: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V> SqliteStore<V> {
    /// Opens (or creates) the database file and ensures the bucket
    /// exists. Safe to call on an already-populated file.
    pub fn open(path: &Path, bucket: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS {bucket} (key TEXT PRIMARY KEY, value TEXT NOT NULL)"),
            [],
        )?;
        debug!(path = %path.display(), bucket, "opened persistent store");
        Ok(SqliteStore {
            conn: Mutex::new(conn),
            bucket: bucket.to_string(),
            _marker: PhantomData,
        })
    }
}

impl<V> Store<V> for SqliteStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send,
{
    fn put(&mut self, key: &str, value: V) -> Result<(), StoreError> {
        let body = serde_json::to_string(&value)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {} (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                self.bucket
            ),
            params![key, body],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<V, StoreError> {
        let conn = self.conn.lock().unwrap();
        let body: Option<String> = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.bucket),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        let body = body.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(serde_json::from_str(&body)?)
    }

    fn list(&self) -> Result<Vec<V>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT value FROM {} ORDER BY key", self.bucket))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut values = Vec::new();
        for row in rows {
            values.push(serde_json::from_str(&row?)?);
        }
        Ok(values)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.bucket),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}
