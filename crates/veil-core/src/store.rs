use crate::error::CoreError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Durable key-value storage namespaced by collection. The store owns its own
/// transactional guarantees; this crate only issues single get/put/remove
/// calls and never retries them.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<(), CoreError>;
    async fn remove(&self, collection: &str, key: &str) -> Result<(), CoreError>;
    async fn scan(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, CoreError>;
    async fn remove_collection(&self, collection: &str) -> Result<(), CoreError>;
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .get(collection)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, collection: &str, key: &str, value: &[u8]) -> Result<(), CoreError> {
        let mut guard = self.inner.lock().await;
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, collection: &str, key: &str) -> Result<(), CoreError> {
        let mut guard = self.inner.lock().await;
        if let Some(entries) = guard.get_mut(collection) {
            entries.remove(key);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<(String, Vec<u8>)>, CoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .get(collection)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove_collection(&self, collection: &str) -> Result<(), CoreError> {
        let mut guard = self.inner.lock().await;
        guard.remove(collection);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
