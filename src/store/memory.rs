use std::collections::BTreeMap;

use super::{Store, StoreError};

/// Process-local store. The ordered map gives `list` a stable order
/// without further bookkeeping. Callers serialize access by holding the
/// owning core's lock.
#[derive(Debug, Default)]
pub struct MemoryStore<V> {
    db: BTreeMap<String, V>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        MemoryStore { db: BTreeMap::new() }
    }
}

impl<V> Store<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    fn put(&mut self, key: &str, value: V) -> Result<(), StoreError> {
        self.db.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<V, StoreError> {
        self.db
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn list(&self) -> Result<Vec<V>, StoreError> {
        Ok(self.db.values().cloned().collect())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.db.len())
    }
}
