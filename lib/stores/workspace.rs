//! The workspace store: lifecycle bookkeeping plus the teardown paths for
//! files, networks, and custom containers.

use std::{
    net::Ipv4Addr,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    config::LOG_SUBDIR,
    docker::{Dockerizer, Removal, SubnetAllocator, SubnetState},
    files,
    models::{DaemonID, IdKind, WorkspaceItem, WorkspaceState},
    JinadError, JinadResult,
};

use super::{Store, StoreStatus};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Snapshot file name under the workspace root.
pub const WORKSPACE_STORE_FILE: &str = ".workspace-store";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Store of workspaces built by the daemon as Docker objects.
#[derive(Debug)]
pub struct WorkspaceStore {
    store: Store<WorkspaceItem>,
    root: PathBuf,
    allocator: Arc<SubnetAllocator>,
}

/// Which parts of a workspace a delete request covers.
#[derive(Debug, Clone, Copy)]
pub struct DeleteFlags {
    /// Remove the custom container.
    pub container: bool,

    /// Remove the bridge network.
    pub network: bool,

    /// Remove uploaded files.
    pub files: bool,

    /// Remove everything, including the store entry and managed components.
    pub everything: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DeleteFlags {
    /// Normalizes the flags: asking for all three parts means everything, and
    /// everything implies all three parts.
    pub fn normalize(mut self) -> Self {
        if self.container && self.network && self.files {
            self.everything = true;
        }
        if self.everything {
            self.container = true;
            self.network = true;
            self.files = true;
        }
        self
    }
}

impl WorkspaceStore {
    /// Opens the workspace store under `root`, restoring the subnet allocator
    /// from the snapshot so already-assigned ranges are not reused.
    pub fn load(root: impl Into<PathBuf>, ip_range_start: Ipv4Addr, subnet_size: u8) -> Self {
        let root = root.into();
        let path = root.join(WORKSPACE_STORE_FILE);

        let subnet_state = Store::<WorkspaceItem>::read_snapshot(&path)
            .and_then(|snapshot: StoreStatus<WorkspaceItem>| snapshot.subnet)
            .unwrap_or(SubnetState {
                ip_range_start,
                subnet_size,
                ip_range_current_offset: 0,
            });

        let allocator = Arc::new(SubnetAllocator::from_state(subnet_state));
        let store =
            Store::load(IdKind::Workspace, path).with_allocator(Arc::clone(&allocator));

        Self {
            store,
            root,
            allocator,
        }
    }

    /// The allocator whose state is persisted with this store.
    pub fn allocator(&self) -> Arc<SubnetAllocator> {
        Arc::clone(&self.allocator)
    }

    /// The workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The on-disk directory of a workspace.
    pub fn workdir(&self, id: &DaemonID) -> PathBuf {
        files::workspace_path(&self.root, id)
    }

    /// Admits a new workspace in PENDING.
    pub async fn add_pending(&self, id: DaemonID) -> JinadResult<()> {
        self.store.add(id, WorkspaceItem::pending()).await
    }

    /// Snapshot read of one workspace.
    pub async fn get(&self, id: &DaemonID) -> Option<WorkspaceItem> {
        self.store.get(id).await
    }

    /// Whether the workspace exists.
    pub async fn contains(&self, id: &DaemonID) -> bool {
        self.store.contains(id).await
    }

    /// Whether the workspace exists and is ACTIVE.
    pub async fn is_active(&self, id: &DaemonID) -> bool {
        matches!(
            self.store.get(id).await,
            Some(WorkspaceItem {
                state: WorkspaceState::Active,
                ..
            })
        )
    }

    /// Sets just the lifecycle state.
    pub async fn update_state(&self, id: &DaemonID, state: WorkspaceState) -> JinadResult<()> {
        self.store.update(id, |item| item.state = state).await
    }

    /// Replaces the whole item.
    pub async fn update_item(&self, id: &DaemonID, new: WorkspaceItem) -> JinadResult<()> {
        self.store.update(id, |item| *item = new).await
    }

    /// Applies an arbitrary mutation under the store lock.
    pub async fn update<F>(&self, id: &DaemonID, f: F) -> JinadResult<()>
    where
        F: FnOnce(&mut WorkspaceItem),
    {
        self.store.update(id, f).await
    }

    /// Records a live component inside the workspace.
    pub async fn attach_managed(&self, id: &DaemonID, object: DaemonID) -> JinadResult<()> {
        self.store
            .update(id, |item| {
                if let Some(metadata) = item.metadata.as_mut() {
                    metadata.managed_objects.insert(object);
                }
            })
            .await
    }

    /// Drops a component from the workspace's managed set.
    pub async fn detach_managed(&self, id: &DaemonID, object: &DaemonID) -> JinadResult<()> {
        self.store
            .update(id, |item| {
                if let Some(metadata) = item.metadata.as_mut() {
                    metadata.managed_objects.remove(object);
                }
            })
            .await
    }

    /// Components currently managed by the workspace.
    pub async fn managed_objects(&self, id: &DaemonID) -> Vec<DaemonID> {
        self.store
            .get(id)
            .await
            .and_then(|item| item.metadata)
            .map(|m| m.managed_objects.into_iter().collect())
            .unwrap_or_default()
    }

    /// The full store snapshot.
    pub async fn status(&self) -> StoreStatus<WorkspaceItem> {
        self.store.status().await
    }

    /// Removes the parts of a workspace the flags name. Network removal that
    /// finds attached containers is skipped, not failed; the store entry is
    /// only dropped when `everything` was requested and nothing was skipped.
    pub async fn delete(
        &self,
        gateway: &Dockerizer,
        id: &DaemonID,
        flags: DeleteFlags,
    ) -> JinadResult<Removal> {
        let flags = flags.normalize();

        let Some(item) = self.store.get(id).await else {
            return Err(JinadError::UnknownObject(id.to_string()));
        };

        if flags.container {
            self.rm_container(gateway, id, &item).await?;
        }

        let mut outcome = Removal::Removed;
        if flags.network {
            outcome = self.rm_network(gateway, id).await?;
        }

        if flags.files {
            self.rm_files(id, flags.everything).await?;
        }

        if flags.everything {
            // The image goes with the workspace itself, even when the network
            // has to wait for its containers.
            if item.metadata.is_some() {
                if let Err(e) = gateway.rm_image(&id.tag()).await {
                    tracing::warn!("could not remove image for {}: {}", id, e);
                }
            }
            if let Removal::SkippedNetworkInUse { ref containers } = outcome {
                tracing::warn!(
                    "workspace {} kept in store, network still in use by {:?}",
                    id,
                    containers
                );
                return Ok(outcome);
            }
            self.store.delete(id).await?;
            tracing::info!("{} is released from the store", id);
        }

        Ok(outcome)
    }

    //----------------------------------------------------------------------------------------------
    // Methods: Helpers
    //----------------------------------------------------------------------------------------------

    async fn rm_container(
        &self,
        gateway: &Dockerizer,
        id: &DaemonID,
        item: &WorkspaceItem,
    ) -> JinadResult<()> {
        let Some(container_id) = item.metadata.as_ref().and_then(|m| m.container_id.clone())
        else {
            tracing::debug!("no container to delete for id {}", id);
            return Ok(());
        };

        match gateway.rm_container(&container_id).await {
            Ok(()) => {
                tracing::info!("container {} is successfully removed", container_id);
            }
            Err(JinadError::UnknownObject(_)) => {
                tracing::debug!("container {} already gone", container_id);
            }
            Err(e) => return Err(e),
        }

        self.store
            .update(id, |item| {
                if let Some(metadata) = item.metadata.as_mut() {
                    metadata.container_id = None;
                }
            })
            .await
    }

    async fn rm_network(&self, gateway: &Dockerizer, id: &DaemonID) -> JinadResult<Removal> {
        match gateway.rm_network(&id.to_string()).await {
            Ok(removal) => {
                if removal == Removal::Removed {
                    self.store
                        .update(id, |item| {
                            if let Some(metadata) = item.metadata.as_mut() {
                                metadata.network.clear();
                            }
                        })
                        .await?;
                }
                Ok(removal)
            }
            Err(JinadError::UnknownObject(_)) => {
                tracing::info!("no network to delete for id {}", id);
                Ok(Removal::Removed)
            }
            Err(e) => Err(e),
        }
    }

    /// Removes workspace files. With `logs` the whole directory goes;
    /// otherwise everything except the logs subdirectory is unlinked.
    async fn rm_files(&self, id: &DaemonID, logs: bool) -> JinadResult<()> {
        let workdir = self.workdir(id);
        if !workdir.is_dir() {
            tracing::info!("there's nothing to remove in workdir {}", workdir.display());
            return Ok(());
        }

        if logs {
            tracing::info!("asked to remove complete directory: {}", workdir.display());
            tokio::fs::remove_dir_all(&workdir).await?;
            return Ok(());
        }

        let logs_dir = workdir.join(LOG_SUBDIR);
        for entry in walkdir::WalkDir::new(&workdir)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_file() && !entry.path().starts_with(&logs_dir) {
                tracing::debug!("file to be deleted: {}", entry.path().display());
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_flags_normalization() {
        let flags = DeleteFlags {
            container: true,
            network: true,
            files: true,
            everything: false,
        }
        .normalize();
        assert!(flags.everything);

        let flags = DeleteFlags {
            container: false,
            network: false,
            files: false,
            everything: true,
        }
        .normalize();
        assert!(flags.container && flags.network && flags.files);

        let flags = DeleteFlags {
            container: true,
            network: false,
            files: false,
            everything: false,
        }
        .normalize();
        assert!(!flags.everything && !flags.files);
    }

    #[tokio::test]
    async fn test_state_transitions_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::load(dir.path(), Ipv4Addr::new(172, 28, 0, 0), 24);

        let id = DaemonID::new(IdKind::Workspace);
        store.add_pending(id).await.unwrap();
        assert_eq!(
            store.get(&id).await.unwrap().state,
            WorkspaceState::Pending
        );

        store
            .update_state(&id, WorkspaceState::Creating)
            .await
            .unwrap();
        store
            .update_state(&id, WorkspaceState::Failed)
            .await
            .unwrap();
        assert_eq!(store.get(&id).await.unwrap().state, WorkspaceState::Failed);
        assert!(!store.is_active(&id).await);
    }

    #[tokio::test]
    async fn test_allocator_survives_reload() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = WorkspaceStore::load(dir.path(), Ipv4Addr::new(172, 28, 0, 0), 24);
            store.allocator().allocate().unwrap();
            // A mutation forces the snapshot (and allocator state) to disk.
            let id = DaemonID::new(IdKind::Workspace);
            store.add_pending(id).await.unwrap();
        }

        let store = WorkspaceStore::load(dir.path(), Ipv4Addr::new(172, 28, 0, 0), 24);
        let next = store.allocator().allocate().unwrap();
        assert_eq!(next.network.to_string(), "172.28.1.0/24");
    }
}
