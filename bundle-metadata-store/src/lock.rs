use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::errors::{MetadataError, Result};
use super::store::{MetaOptions, MetadataStorage};

/// Exclusive, named locks stored under a common base path.
///
/// Each lock carries a typed value that the holder may rewrite while it owns the lock.
/// Other participants can read or enumerate the locks but not modify them.
#[derive(Clone)]
pub struct LockManager<T> {
    store: MetadataStorage,
    base_path: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> LockManager<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(store: MetadataStorage, base_path: impl Into<String>) -> Self {
        LockManager {
            store,
            base_path: base_path.into().trim_end_matches('/').to_string(),
            _marker: PhantomData,
        }
    }

    pub fn lock_path(&self, name: &str) -> String {
        format!("{}/{}", self.base_path, name)
    }

    /// Creates the lock `name` holding `value`; fails with `LockBusy` if it already exists.
    pub async fn acquire_lock(&self, name: &str, value: &T) -> Result<ResourceLock<T>> {
        let path = self.lock_path(name);
        let json = serde_json::to_value(value)?;
        self.store.put(&path, json, MetaOptions::CreateOnly).await?;
        info!(lock = %path, "lock acquired");
        Ok(ResourceLock {
            store: self.store.clone(),
            path,
            released: Mutex::new(false),
            _marker: PhantomData,
        })
    }

    pub async fn read_lock(&self, name: &str) -> Result<Option<T>> {
        let path = self.lock_path(name);
        match self.store.get(&path, MetaOptions::None).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Names of the locks currently held directly under the base path.
    pub async fn list_locks(&self) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.base_path);
        let mut names: Vec<String> = self
            .store
            .get_childrens(&self.base_path)
            .await?
            .into_iter()
            .filter_map(|path| path.strip_prefix(&prefix).map(str::to_string))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Handle to a lock owned by this participant.
pub struct ResourceLock<T> {
    store: MetadataStorage,
    path: String,
    released: Mutex<bool>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResourceLock<T>
where
    T: Serialize + Send + Sync,
{
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Rewrites the value held by the lock.
    pub async fn update_value(&self, value: &T) -> Result<()> {
        let released = self.released.lock().await;
        if *released {
            return Err(MetadataError::InvalidArguments(format!(
                "lock {} already released",
                self.path
            )));
        }
        let json = serde_json::to_value(value)?;
        self.store.put(&self.path, json, MetaOptions::None).await
    }

    /// Removes the lock; releasing twice or releasing a vanished lock is not an error.
    pub async fn release(&self) -> Result<()> {
        let mut released = self.released.lock().await;
        if *released {
            return Ok(());
        }
        match self.store.delete(&self.path).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(lock = %self.path, "lock already gone on release");
            }
            Err(err) => return Err(err),
        }
        *released = true;
        info!(lock = %self.path, "lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Report {
        msg_rate: f64,
    }

    async fn lock_manager() -> LockManager<Report> {
        let store = MemoryStore::new().await.expect("store");
        LockManager::new(Arc::new(store), "/loadbalance/brokers")
    }

    #[tokio::test]
    async fn test_acquire_read_update_release() -> Result<()> {
        let locks = lock_manager().await;
        let lock = locks.acquire_lock("b1", &Report { msg_rate: 1.0 }).await?;
        assert_eq!(lock.path(), "/loadbalance/brokers/b1");
        assert_eq!(
            locks.read_lock("b1").await?,
            Some(Report { msg_rate: 1.0 })
        );

        lock.update_value(&Report { msg_rate: 2.0 }).await?;
        assert_eq!(
            locks.read_lock("b1").await?,
            Some(Report { msg_rate: 2.0 })
        );

        lock.release().await?;
        lock.release().await?;
        assert_eq!(locks.read_lock("b1").await?, None);
        assert!(lock.update_value(&Report { msg_rate: 3.0 }).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_second_acquire_is_busy() -> Result<()> {
        let locks = lock_manager().await;
        let _lock = locks.acquire_lock("b1", &Report { msg_rate: 1.0 }).await?;
        let err = locks
            .acquire_lock("b1", &Report { msg_rate: 1.0 })
            .await
            .err()
            .expect("busy");
        assert!(matches!(err, MetadataError::LockBusy(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_locks_returns_names() -> Result<()> {
        let locks = lock_manager().await;
        let _a = locks.acquire_lock("b2", &Report { msg_rate: 1.0 }).await?;
        let _b = locks.acquire_lock("b1", &Report { msg_rate: 1.0 }).await?;
        assert_eq!(locks.list_locks().await?, vec!["b1".to_string(), "b2".to_string()]);
        Ok(())
    }
}
