//! Persistent key/value storage for the usage ledger and quota policy.
//!
//! Values are JSON documents. [`KeyValueStoreExt`] adds typed access on top of
//! the raw text interface.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Async key/value store holding JSON documents.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store name for logging
    fn name(&self) -> &str;

    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_raw(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// Typed access for any [`KeyValueStore`].
pub trait KeyValueStoreExt: KeyValueStore {
    fn get<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = StoreResult<Option<T>>> + Send
    where
        Self: Sync,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => {
                    let value: T =
                        serde_json::from_str(&raw).map_err(|e| StoreError::InvalidValue {
                            key: key.to_string(),
                            message: e.to_string(),
                        })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }
    }

    fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send
    where
        Self: Sync,
    {
        async move {
            let raw = serde_json::to_string(value)?;
            self.set_raw(key, &raw).await
        }
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::InvalidValue {
            key: "usage_ledger".to_string(),
            message: "expected object".to_string(),
        };
        assert!(err.to_string().contains("usage_ledger"));
    }
}
