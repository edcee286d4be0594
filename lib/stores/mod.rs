//! Persistent stores for every object kind, plus the routing glue that
//! dispatches an arbitrary `DaemonID` to its owning store.

use std::{net::Ipv4Addr, path::Path, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    docker::{Dockerizer, Removal},
    models::{ContainerItem, ContainerKind, DaemonID, IdKind, WorkspaceItem},
    JinadError, JinadResult,
};

mod base;
mod container;
mod workspace;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use base::*;
pub use container::*;
pub use workspace::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Every store the daemon owns.
#[derive(Debug)]
pub struct DaemonStores {
    /// The workspace store.
    pub workspaces: WorkspaceStore,

    peas: ContainerStore,
    pods: ContainerStore,
    deployments: ContainerStore,
    flows: ContainerStore,
}

/// The daemon-wide summary served by `GET /status`.
#[derive(Debug, Serialize)]
pub struct DaemonStatus {
    /// Workspace store snapshot.
    pub workspaces: StoreStatus<WorkspaceItem>,

    /// Pea store snapshot.
    pub peas: StoreStatus<ContainerItem>,

    /// Pod store snapshot.
    pub pods: StoreStatus<ContainerItem>,

    /// Deployment store snapshot.
    pub deployments: StoreStatus<ContainerItem>,

    /// Flow store snapshot.
    pub flows: StoreStatus<ContainerItem>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DaemonStores {
    /// Opens all stores under the workspace root. Each store persists to its
    /// own `.<kind>-store` snapshot file.
    pub fn load(
        root: &Path,
        ip_range_start: Ipv4Addr,
        subnet_size: u8,
        http_timeout: Duration,
    ) -> Self {
        let container = |kind: ContainerKind| {
            ContainerStore::load(
                kind,
                root.join(format!(".{}-store", kind.as_str())),
                http_timeout,
            )
        };

        Self {
            workspaces: WorkspaceStore::load(root, ip_range_start, subnet_size),
            peas: container(ContainerKind::Pea),
            pods: container(ContainerKind::Pod),
            deployments: container(ContainerKind::Deployment),
            flows: container(ContainerKind::Flow),
        }
    }

    /// The container store for a component kind.
    pub fn container_store(&self, kind: ContainerKind) -> &ContainerStore {
        match kind {
            ContainerKind::Pea => &self.peas,
            ContainerKind::Pod => &self.pods,
            ContainerKind::Deployment => &self.deployments,
            ContainerKind::Flow => &self.flows,
        }
    }

    /// Routes an arbitrary id to its owning container store.
    pub fn container_store_for_id(&self, id: &DaemonID) -> JinadResult<&ContainerStore> {
        Ok(self.container_store(ContainerKind::from_id_kind(id.kind())?))
    }

    /// The workspace an id lives in: a workspace id resolves to itself, a
    /// component id to the workspace recorded in its store entry.
    pub async fn workspace_of(&self, id: &DaemonID) -> JinadResult<DaemonID> {
        match id.kind() {
            IdKind::Workspace => {
                if self.workspaces.contains(id).await {
                    Ok(*id)
                } else {
                    Err(JinadError::UnknownObject(id.to_string()))
                }
            }
            IdKind::Network => Err(JinadError::Validation(
                "network ids have no workspace logs".to_string(),
            )),
            _ => {
                let store = self.container_store_for_id(id)?;
                store
                    .get(id)
                    .await
                    .map(|item| item.workspace_id)
                    .ok_or_else(|| JinadError::UnknownObject(id.to_string()))
            }
        }
    }

    /// Deletes a workspace, first cascading into its managed components when
    /// everything was asked for.
    pub async fn delete_workspace(
        &self,
        gateway: &Arc<Dockerizer>,
        id: &DaemonID,
        flags: DeleteFlags,
    ) -> JinadResult<Removal> {
        let flags = flags.normalize();

        if !self.workspaces.contains(id).await {
            return Err(JinadError::UnknownObject(id.to_string()));
        }

        if flags.everything {
            for object in self.workspaces.managed_objects(id).await {
                let store = self.container_store_for_id(&object)?;
                match store.delete(gateway, &self.workspaces, &object).await {
                    Ok(()) => {}
                    Err(JinadError::UnknownObject(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.workspaces.delete(gateway, id, flags).await
    }

    /// Drops container entries whose containers are gone. Run once after the
    /// stores are reloaded from disk.
    pub async fn prune_stale(&self, gateway: &Dockerizer) {
        for kind in ContainerKind::ALL {
            self.container_store(kind).prune_stale(gateway).await;
        }
    }

    /// The daemon-wide status summary.
    pub async fn status(&self) -> DaemonStatus {
        DaemonStatus {
            workspaces: self.workspaces.status().await,
            peas: self.peas.status().await,
            pods: self.pods.status().await,
            deployments: self.deployments.status().await,
            flows: self.flows.status().await,
        }
    }
}
