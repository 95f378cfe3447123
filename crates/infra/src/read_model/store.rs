use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use pedalstream_events::ProjectionError;

#[derive(Debug, Clone, Error)]
pub enum ReadModelError {
    #[error("read model storage unavailable: {0}")]
    Unavailable(String),
}

impl From<ReadModelError> for ProjectionError {
    fn from(value: ReadModelError) -> Self {
        ProjectionError::StorageUnavailable(value.to_string())
    }
}

/// Key/value store abstraction for disposable read models.
pub trait ReadModelStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Result<Option<V>, ReadModelError>;
    fn upsert(&self, key: K, value: V) -> Result<(), ReadModelError>;
    /// Upsert several records at once; readers see all of them or none.
    fn upsert_all(&self, records: Vec<(K, V)>) -> Result<(), ReadModelError>;
    /// Every record, ordered by key.
    fn list(&self) -> Result<Vec<V>, ReadModelError>;
    /// Drop every record (before a replay rebuilds the model).
    fn clear(&self) -> Result<(), ReadModelError>;
}

impl<K, V, S> ReadModelStore<K, V> for Arc<S>
where
    S: ReadModelStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Result<Option<V>, ReadModelError> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) -> Result<(), ReadModelError> {
        (**self).upsert(key, value)
    }

    fn upsert_all(&self, records: Vec<(K, V)>) -> Result<(), ReadModelError> {
        (**self).upsert_all(records)
    }

    fn list(&self) -> Result<Vec<V>, ReadModelError> {
        (**self).list()
    }

    fn clear(&self) -> Result<(), ReadModelError> {
        (**self).clear()
    }
}

/// In-memory store for tests/dev.
#[derive(Debug)]
pub struct InMemoryReadModelStore<K, V> {
    inner: RwLock<BTreeMap<K, V>>,
}

impl<K, V> InMemoryReadModelStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryReadModelStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> ReadModelError {
    ReadModelError::Unavailable("lock poisoned".to_string())
}

impl<K, V> ReadModelStore<K, V> for InMemoryReadModelStore<K, V>
where
    K: Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<Option<V>, ReadModelError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn upsert(&self, key: K, value: V) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(key, value);
        Ok(())
    }

    fn upsert_all(&self, records: Vec<(K, V)>) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.extend(records);
        Ok(())
    }

    fn list(&self) -> Result<Vec<V>, ReadModelError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.values().cloned().collect())
    }

    fn clear(&self) -> Result<(), ReadModelError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.clear();
        Ok(())
    }
}
