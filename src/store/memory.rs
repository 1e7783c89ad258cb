//! In-memory store, for tests and ephemeral processes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{KeyValueStore, StoreResult};

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.data.write().await.clear();
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyValueStoreExt;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();

        store.set_raw("key1", "\"value1\"").await.unwrap();
        assert_eq!(
            store.get_raw("key1").await.unwrap(),
            Some("\"value1\"".to_string())
        );
        assert_eq!(store.get_raw("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_typed() {
        let store = MemoryStore::new();

        store.set("count", &42u64).await.unwrap();
        let count: Option<u64> = store.get("count").await.unwrap();
        assert_eq!(count, Some(42));
    }

    #[tokio::test]
    async fn test_memory_store_invalid_typed_value() {
        let store = MemoryStore::new();
        store.set_raw("count", "not a number").await.unwrap();

        let result: StoreResult<Option<u64>> = store.get("count").await;
        assert!(matches!(result, Err(crate::store::StoreError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_data() {
        let store = MemoryStore::new();
        let other = store.clone();

        store.set_raw("k", "1").await.unwrap();
        assert_eq!(other.len().await, 1);
        other.clear().await;
        assert!(store.is_empty().await);
    }
}
