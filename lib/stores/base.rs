//! The generic disk-backed store underlying every object kind.
//!
//! A store is an in-memory map keyed by `DaemonID` behind a single lock.
//! After every successful mutation the whole snapshot (items, counters, and
//! for the workspace store the subnet allocator state) is rewritten to one
//! file via write-to-temp + rename. Live handles never enter the snapshot; on
//! reload only plain data comes back.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    docker::{SubnetAllocator, SubnetState},
    models::{DaemonID, IdKind},
    JinadError, JinadResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The persisted snapshot of a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatus<T> {
    /// When this store was first created.
    pub time_created: DateTime<Utc>,

    /// When the store last changed.
    pub time_updated: DateTime<Utc>,

    /// Successful additions over the store's lifetime.
    pub num_add: u64,

    /// Deletions over the store's lifetime.
    pub num_del: u64,

    /// Subnet allocator state; only present in the workspace store snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<SubnetState>,

    /// The live items.
    pub items: BTreeMap<DaemonID, T>,
}

/// A disk-backed map of `DaemonID` → item with mutation counters.
#[derive(Debug)]
pub struct Store<T> {
    kind: IdKind,
    path: PathBuf,
    allocator: Option<Arc<SubnetAllocator>>,
    inner: Mutex<StoreStatus<T>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<T> StoreStatus<T> {
    fn empty() -> Self {
        let now = Utc::now();
        Self {
            time_created: now,
            time_updated: now,
            num_add: 0,
            num_del: 0,
            subnet: None,
            items: BTreeMap::new(),
        }
    }
}

impl<T> Store<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Opens the store for `kind`, loading the snapshot at `path` when one
    /// exists. A missing file starts a fresh store; an unreadable one is
    /// logged and also starts fresh rather than blocking startup.
    pub fn load(kind: IdKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let status = Self::read_snapshot(&path).unwrap_or_else(StoreStatus::empty);
        Self {
            kind,
            path,
            allocator: None,
            inner: Mutex::new(status),
        }
    }

    /// Attaches the subnet allocator whose state rides along in this store's
    /// snapshot. Only the workspace store does this.
    pub fn with_allocator(mut self, allocator: Arc<SubnetAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// The snapshot read back from disk, if any.
    pub fn read_snapshot(path: &Path) -> Option<StoreStatus<T>> {
        if !path.is_file() {
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::warn!(
                        "could not parse store snapshot {}: {}, starting fresh",
                        path.display(),
                        e
                    );
                    None
                }
            },
            Err(e) => {
                tracing::warn!(
                    "could not read store snapshot {}: {}, starting fresh",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// The kind of object this store holds.
    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// Adds an item under `id` and persists.
    pub async fn add(&self, id: DaemonID, item: T) -> JinadResult<()> {
        let mut status = self.inner.lock().await;
        status.items.insert(id, item);
        status.num_add += 1;
        status.time_updated = Utc::now();
        self.dump(&status)
    }

    /// Mutates the item under `id` in place and persists. Missing ids are an
    /// `UnknownObject` error.
    pub async fn update<F>(&self, id: &DaemonID, f: F) -> JinadResult<()>
    where
        F: FnOnce(&mut T),
    {
        let mut status = self.inner.lock().await;
        let item = status
            .items
            .get_mut(id)
            .ok_or_else(|| JinadError::UnknownObject(id.to_string()))?;
        f(item);
        status.time_updated = Utc::now();
        self.dump(&status)
    }

    /// Removes and returns the item under `id`, persisting the removal.
    pub async fn delete(&self, id: &DaemonID) -> JinadResult<T> {
        let mut status = self.inner.lock().await;
        let item = status
            .items
            .remove(id)
            .ok_or_else(|| JinadError::UnknownObject(id.to_string()))?;
        status.num_del += 1;
        status.time_updated = Utc::now();
        self.dump(&status)?;
        Ok(item)
    }

    /// A snapshot read of the item under `id`.
    pub async fn get(&self, id: &DaemonID) -> Option<T> {
        self.inner.lock().await.items.get(id).cloned()
    }

    /// Whether `id` is present.
    pub async fn contains(&self, id: &DaemonID) -> bool {
        self.inner.lock().await.items.contains_key(id)
    }

    /// The ids currently present.
    pub async fn ids(&self) -> Vec<DaemonID> {
        self.inner.lock().await.items.keys().copied().collect()
    }

    /// Number of live items.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// A full snapshot clone, as served by the status endpoints.
    pub async fn status(&self) -> StoreStatus<T> {
        self.inner.lock().await.clone()
    }

    /// Rewrites the snapshot file atomically: serialize to a temp file in the
    /// same directory, then rename over the target.
    fn dump(&self, status: &StoreStatus<T>) -> JinadResult<()> {
        let mut snapshot = status.clone();
        snapshot.subnet = self.allocator.as_ref().map(|a| a.state());

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let contents = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        std::fs::write(tmp.path(), contents)?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn id() -> DaemonID {
        DaemonID::new(IdKind::Pea)
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".pea-store");

        let store: Store<String> = Store::load(IdKind::Pea, &path);
        let ids: Vec<DaemonID> = (0..5).map(|_| id()).collect();
        for (i, id) in ids.iter().enumerate() {
            store.add(*id, format!("item-{}", i)).await.unwrap();
        }
        store.delete(&ids[0]).await.unwrap();
        store.delete(&ids[1]).await.unwrap();

        let reloaded: Store<String> = Store::load(IdKind::Pea, &path);
        let status = reloaded.status().await;
        assert_eq!(status.items.len(), 3);
        assert_eq!(status.num_add, 5);
        assert_eq!(status.num_del, 2);
        for id in &ids[2..] {
            assert!(reloaded.contains(id).await);
        }
    }

    #[tokio::test]
    async fn test_missing_snapshot_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store: Store<String> = Store::load(IdKind::Pod, dir.path().join(".pod-store"));
        assert_eq!(store.size().await, 0);
        assert_eq!(store.status().await.num_add, 0);
    }

    #[tokio::test]
    async fn test_concurrent_adds_count_each_success() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<Store<u32>> =
            Arc::new(Store::load(IdKind::Pea, dir.path().join(".pea-store")));

        let mut handles = Vec::new();
        for i in 0..32u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.add(DaemonID::new(IdKind::Pea), i).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let status = store.status().await;
        assert_eq!(status.num_add, 32);
        assert_eq!(status.items.len(), 32);
    }

    #[tokio::test]
    async fn test_delete_missing_is_unknown_object() {
        let dir = tempfile::tempdir().unwrap();
        let store: Store<String> = Store::load(IdKind::Flow, dir.path().join(".flow-store"));
        let missing = DaemonID::new(IdKind::Flow);
        assert!(matches!(
            store.delete(&missing).await,
            Err(JinadError::UnknownObject(_))
        ));
        // A failed delete must not bump counters or write state.
        assert_eq!(store.status().await.num_del, 0);
    }

    #[tokio::test]
    async fn test_allocator_state_rides_in_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".workspace-store");

        let allocator = Arc::new(SubnetAllocator::new(Ipv4Addr::new(172, 28, 0, 0), 24));
        let store: Store<String> =
            Store::load(IdKind::Workspace, &path).with_allocator(Arc::clone(&allocator));

        allocator.allocate().unwrap();
        store.add(DaemonID::new(IdKind::Workspace), "w".into())
            .await
            .unwrap();

        let snapshot: StoreStatus<String> = Store::<String>::read_snapshot(&path).unwrap();
        let subnet = snapshot.subnet.unwrap();
        assert_eq!(subnet.ip_range_current_offset, 256);
        assert_eq!(subnet.subnet_size, 24);
    }
}
