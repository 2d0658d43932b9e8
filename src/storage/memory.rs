//! In-memory store engine.
//!
//! Records live in a `tokio::sync::RwLock<BTreeMap<..>>`, so listing
//! operations return keys in sorted order.  Nothing is persisted.

use std::collections::BTreeMap;

use tokio::sync::RwLock;

use super::backend::{KvStore, StoreFuture};

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn set(&self, key: &str, value: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            self.records.write().await.insert(key, value);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> StoreFuture<'_, Option<String>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.records.read().await.get(&key).cloned()) })
    }

    fn rm(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            self.records.write().await.remove(&key);
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.records.write().await.clear();
            Ok(())
        })
    }

    fn exists(&self, key: &str) -> StoreFuture<'_, bool> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.records.read().await.contains_key(&key)) })
    }

    fn entries(&self) -> StoreFuture<'_, Vec<(String, String)>> {
        Box::pin(async move {
            Ok(self
                .records
                .read()
                .await
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }

    fn size(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.records.read().await.len()) })
    }
}
