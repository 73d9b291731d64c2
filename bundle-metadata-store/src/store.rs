use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::errors::Result;
use super::session::SessionEvent;
use super::watch::WatchStream;

/// Backend-agnostic options for metadata store operations.
#[derive(Debug, Clone, Copy)]
pub enum MetaOptions {
    None,
    /// Fail the put when the key already exists.
    CreateOnly,
}

/// Shared handle to a metadata store backend.
pub type MetadataStorage = Arc<dyn MetadataStore>;

#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    async fn get(&self, key: &str, get_options: MetaOptions) -> Result<Option<Value>>;

    /// Full paths of every key nested below `path`.
    async fn get_childrens(&self, path: &str) -> Result<Vec<String>>;

    async fn put(&self, key: &str, value: Value, put_options: MetaOptions) -> Result<()>;

    /// Removes `key`; a missing key yields `MetadataError::NotFound`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Change notifications for every key starting with `prefix`.
    async fn watch(&self, prefix: &str) -> Result<WatchStream>;

    /// Session state transitions of the connection backing this store.
    fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent>;
}
