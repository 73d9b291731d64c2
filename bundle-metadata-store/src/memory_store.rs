use super::{
    errors::Result,
    session::SessionEvent,
    store::{MetaOptions, MetadataStore},
    watch::{WatchEvent, WatchStream},
    MetadataError,
};

use async_trait::async_trait;
use dashmap::{mapref::one::RefMut, DashMap};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// MemoryStore is a simple in-memory key-value store that implements the MetadataStore trait.
/// Keys are partitioned by their first three path segments (`/<root>/<category>`).
/// SHOULD BE USED ONLY FOR TESTING PURPOSES
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, BTreeMap<String, Value>>>,
    watchers: Arc<DashMap<String, broadcast::Sender<WatchEvent>>>,
    session: broadcast::Sender<SessionEvent>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub async fn new() -> Result<Self> {
        let (session, _) = broadcast::channel(16);
        Ok(MemoryStore {
            inner: Arc::new(DashMap::new()),
            watchers: Arc::new(DashMap::new()),
            session,
            unavailable: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Broadcasts a session transition to every subscriber.
    pub fn set_session_event(&self, event: SessionEvent) {
        let _ = self.session.send(event);
    }

    /// While unavailable every operation fails with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MetadataError::TransportError(
                "metadata store unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn notify_watchers(&self, event: WatchEvent) {
        let key_str = event.key_str();
        for entry in self.watchers.iter() {
            if key_str.starts_with(entry.key()) {
                let _ = entry.value().send(event.clone());
            }
        }
    }

    fn split_path(path: &str) -> Result<(String, String)> {
        let parts: Vec<&str> = path.split('/').collect();

        // Validate that path has at least 3 parts (empty, root, category)
        if parts.len() < 3 {
            return Err(MetadataError::InvalidArguments(format!(
                "Path must have at least 3 segments: {}",
                path
            )));
        }

        Ok((parts[..3].join("/"), parts[3..].join("/")))
    }

    fn get_map(&self, map_key: &str) -> RefMut<'_, String, BTreeMap<String, Value>> {
        self.inner.entry(map_key.to_owned()).or_default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    // Read the value of one key, identified by the path
    async fn get(&self, path: &str, _get_options: MetaOptions) -> Result<Option<Value>> {
        self.check_available()?;
        let (map_key, key) = Self::split_path(path)?;

        Ok(self
            .inner
            .get(&map_key)
            .and_then(|bmap| bmap.get(&key).cloned()))
    }

    // Return all the paths nested below the specific path, as full paths
    async fn get_childrens(&self, path: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let path = path.trim_end_matches('/');
        let (map_key, minimum_path) = Self::split_path(path)?;

        let mut child_paths = Vec::new();
        if let Some(bmap_ref) = self.inner.get(&map_key) {
            let prefix = format!("{}/", minimum_path);
            for key in bmap_ref.keys() {
                if minimum_path.is_empty() || key.starts_with(&prefix) {
                    child_paths.push(format!("{}/{}", map_key, key));
                }
            }
        }
        Ok(child_paths)
    }

    // Put a new value for a given key
    async fn put(&self, path: &str, value: Value, put_options: MetaOptions) -> Result<()> {
        self.check_available()?;
        let (map_key, key) = Self::split_path(path)?;

        // Validate that there's actually a key to store (path must have more than 3 parts)
        if key.is_empty() {
            return Err(MetadataError::InvalidArguments(format!(
                "Path must have a key component: {}",
                path
            )));
        }

        let value_bytes = serde_json::to_vec(&value)?;
        {
            let mut bmap = self.get_map(&map_key);
            if matches!(put_options, MetaOptions::CreateOnly) && bmap.contains_key(&key) {
                return Err(MetadataError::LockBusy(path.to_string()));
            }
            bmap.insert(key, value);
        }

        self.notify_watchers(WatchEvent::Put {
            key: path.as_bytes().to_vec(),
            value: value_bytes,
        });

        Ok(())
    }

    // Delete the key / value from the store
    async fn delete(&self, path: &str) -> Result<()> {
        self.check_available()?;
        let (map_key, key) = Self::split_path(path)?;

        if key.is_empty() {
            return Err(MetadataError::InvalidArguments(format!(
                "Path must have a key component: {}",
                path
            )));
        }

        let removed = self
            .inner
            .get_mut(&map_key)
            .and_then(|mut bmap| bmap.remove(&key));
        if removed.is_none() {
            return Err(MetadataError::NotFound(path.to_string()));
        }

        self.notify_watchers(WatchEvent::Delete {
            key: path.as_bytes().to_vec(),
        });

        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        let rx = self
            .watchers
            .entry(prefix.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .subscribe();
        Ok(WatchStream::from_broadcast(rx))
    }

    fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }
}
