//! JSON-file store.
//!
//! The whole store is one JSON object keyed by store key. Every write rewrites
//! the file through a temporary sibling and a rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{KeyValueStore, StoreError, StoreResult};

pub struct FileStore {
    path: PathBuf,
    data: Arc<RwLock<Option<BTreeMap<String, serde_json::Value>>>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            data: Arc::new(RwLock::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where an unparseable file is moved before the store starts over.
    pub fn quarantine_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    async fn load(&self) -> StoreResult<BTreeMap<String, serde_json::Value>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        match serde_json::from_str(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                let quarantine = self.quarantine_path();
                tracing::warn!(
                    path = %self.path.display(),
                    moved_to = %quarantine.display(),
                    error = %e,
                    "store file is not a JSON object, starting empty"
                );
                tokio::fs::rename(&self.path, &quarantine).await?;
                Ok(BTreeMap::new())
            }
        }
    }

    async fn save(&self, data: &BTreeMap<String, serde_json::Value>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn reload(&self) -> StoreResult<()> {
        let loaded = self.load().await?;
        *self.data.write().await = Some(loaded);
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        let mut data = self.data.write().await;
        if data.is_none() {
            *data = Some(self.load().await?);
        }
        Ok(data
            .as_ref()
            .and_then(|map| map.get(key))
            .map(|v| v.to_string()))
    }

    async fn set_raw(&self, key: &str, value: &str) -> StoreResult<()> {
        let json: serde_json::Value =
            serde_json::from_str(value).map_err(|e| StoreError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let mut data = self.data.write().await;
        if data.is_none() {
            *data = Some(self.load().await?);
        }
        let map = data.get_or_insert_with(BTreeMap::new);
        map.insert(key.to_string(), json);
        self.save(map).await
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyValueStoreExt;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().join("missing.json"));

        assert_eq!(store.get_raw("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_write_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("store.json");

        let store = FileStore::new(&path);
        store.set("limits", &serde_json::json!({"daily": 5})).await.unwrap();
        assert!(path.exists());

        let reopened = FileStore::new(&path);
        let value: Option<serde_json::Value> = reopened.get("limits").await.unwrap();
        assert_eq!(value, Some(serde_json::json!({"daily": 5})));
    }

    #[tokio::test]
    async fn test_file_store_rejects_non_json() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().join("store.json"));

        let result = store.set_raw("key", "not json").await;
        assert!(matches!(result, Err(StoreError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_file_store_quarantines_unparseable_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("usage.json");
        std::fs::write(&path, "{ corrupt").unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.get_raw("key").await.unwrap(), None);
        assert_eq!(
            std::fs::read_to_string(store.quarantine_path()).unwrap(),
            "{ corrupt"
        );

        store.set("key", &7u32).await.unwrap();
        let reopened = FileStore::new(&path);
        let value: Option<u32> = reopened.get("key").await.unwrap();
        assert_eq!(value, Some(7));
    }

    #[tokio::test]
    async fn test_file_store_preserves_other_keys() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().join("store.json"));

        store.set("a", &1u32).await.unwrap();
        store.set("b", &"two").await.unwrap();

        let a: Option<u32> = store.get("a").await.unwrap();
        let b: Option<String> = store.get("b").await.unwrap();
        assert_eq!(a, Some(1));
        assert_eq!(b.as_deref(), Some("two"));
    }
}
