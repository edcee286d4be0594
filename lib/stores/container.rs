//! The per-kind container store.
//!
//! One store instance exists for each of pea/pod/deployment/flow. It launches
//! a partial-daemon container per component inside the owning workspace's
//! network, waits for it to become healthy, forwards the component spec to
//! it, and proxies the later update/scale/rolling-update/delete calls.

use std::{collections::BTreeMap, net::TcpListener, path::PathBuf, sync::Arc, time::Duration};

use bollard::models::DeviceRequest;
use scopeguard::ScopeGuard;
use serde_json::Value;

use crate::{
    config::{HEALTH_CHECK_INTERVAL_MS, HEALTH_CHECK_RETRIES},
    docker::Dockerizer,
    models::{ContainerArguments, ContainerItem, ContainerKind, ContainerMetadata, DaemonID},
    JinadError, JinadResult,
};

use super::{Store, StoreStatus, WorkspaceStore};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Inputs for creating a component container.
#[derive(Debug, Clone)]
pub struct AddRequest {
    /// The workspace to launch into; must be ACTIVE.
    pub workspace_id: DaemonID,

    /// The component spec forwarded to the partial daemon.
    pub params: Value,

    /// Ports to publish on the container, beyond the partial daemon's own.
    pub ports: Vec<u16>,

    /// Extra environment for the container.
    pub envs: BTreeMap<String, String>,

    /// Device requests (gpus), dropped once on driver failure.
    pub device_requests: Option<Vec<DeviceRequest>>,
}

/// A mutation proxied to the partial daemon over HTTP.
#[derive(Debug, Clone)]
pub enum UpdateOp {
    /// Replace the worker's executor configuration while serving.
    RollingUpdate {
        /// The new `uses_with` configuration.
        uses_with: Value,

        /// For flows: which pod inside the flow to update.
        pod_name: Option<String>,
    },

    /// Change the replica count.
    Scale {
        /// Desired replicas.
        replicas: u32,
    },
}

/// Manages the partial-daemon container for every component of one kind.
#[derive(Debug)]
pub struct ContainerStore {
    kind: ContainerKind,
    store: Store<ContainerItem>,
    http: reqwest::Client,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerStore {
    /// Opens the store for `kind`, loading its snapshot when present.
    pub fn load(kind: ContainerKind, path: impl Into<PathBuf>, http_timeout: Duration) -> Self {
        Self {
            kind,
            store: Store::load(kind.id_kind(), path),
            http: reqwest::Client::builder()
                .timeout(http_timeout)
                .build()
                .expect("http client construction cannot fail"),
        }
    }

    /// The component kind this store manages.
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Snapshot read of one component.
    pub async fn get(&self, id: &DaemonID) -> Option<ContainerItem> {
        self.store.get(id).await
    }

    /// The full store snapshot.
    pub async fn status(&self) -> StoreStatus<ContainerItem> {
        self.store.status().await
    }

    /// Creates a component: starts its partial-daemon container, waits for it
    /// to answer, posts the spec, and commits the store entry.
    ///
    /// If this call is cancelled or fails after the container has started,
    /// the container is removed again rather than orphaned.
    pub async fn add(
        &self,
        gateway: &Arc<Dockerizer>,
        workspaces: &WorkspaceStore,
        id: DaemonID,
        request: AddRequest,
    ) -> JinadResult<ContainerItem> {
        let workspace_id = request.workspace_id;
        let Some(workspace) = workspaces.get(&workspace_id).await else {
            return Err(JinadError::UnknownObject(workspace_id.to_string()));
        };
        if !workspaces.is_active(&workspace_id).await {
            return Err(JinadError::WorkspaceNotReady(workspace_id.to_string()));
        }

        let minid_port = ephemeral_port()?;
        let entrypoint = format!(
            "partial-daemon --port-expose {} --mode {}",
            minid_port, self.kind
        );

        let mut ports: BTreeMap<String, u16> = request
            .ports
            .iter()
            .map(|p| (format!("{}/tcp", p), *p))
            .collect();
        ports.insert(format!("{}/tcp", minid_port), minid_port);

        let outcome = gateway
            .run(
                &workspace_id,
                &id,
                &entrypoint,
                &ports,
                &request.envs,
                request.device_requests.clone(),
            )
            .await?;

        // From here on the container exists. Anything short of a committed
        // store entry, including the client going away mid-boot, must take
        // the container down with it.
        let cleanup = scopeguard::guard((Arc::clone(gateway), id), |(gateway, id)| {
            tokio::spawn(async move {
                tracing::warn!("add of {} did not complete, removing its container", id);
                if let Err(e) = gateway.rm_container(&id.to_string()).await {
                    tracing::error!("compensating removal of {} failed: {}", id, e);
                }
            });
        });

        let uri = format!("http://0.0.0.0:{}", minid_port);
        self.wait_until_ready(&uri).await?;

        let object = self.create_worker(&uri, &request.params).await?;

        let image_id = workspace
            .metadata
            .as_ref()
            .map(|m| m.image_id.clone())
            .unwrap_or_default();

        let item = ContainerItem {
            workspace_id,
            metadata: ContainerMetadata::builder()
                .container_id(outcome.container_id)
                .container_name(id.to_string())
                .image_id(image_id)
                .network(outcome.network)
                .ports(outcome.ports)
                .uri(uri)
                .minid_port(minid_port)
                .build(),
            arguments: ContainerArguments {
                object,
                command: entrypoint,
            },
        };

        self.store.add(id, item.clone()).await?;
        workspaces.attach_managed(&workspace_id, id).await?;

        // Committed; the container stays.
        let _ = ScopeGuard::into_inner(cleanup);

        tracing::info!("{} is now alive inside workspace {}", id, workspace_id);
        Ok(item)
    }

    /// Proxies a scale or rolling-update to the component's partial daemon
    /// and records the returned object.
    pub async fn update(&self, id: &DaemonID, op: UpdateOp) -> JinadResult<Value> {
        let item = self
            .store
            .get(id)
            .await
            .ok_or_else(|| JinadError::UnknownObject(id.to_string()))?;

        match &op {
            UpdateOp::Scale { .. } if !self.kind.can_scale() => {
                return Err(JinadError::Validation(format!(
                    "{} does not support scale",
                    self.kind
                )));
            }
            UpdateOp::RollingUpdate { .. } if !self.kind.can_rolling_update() => {
                return Err(JinadError::Validation(format!(
                    "{} does not support rolling_update",
                    self.kind
                )));
            }
            _ => {}
        }

        let response = match op {
            UpdateOp::Scale { replicas } => {
                self.http
                    .put(format!(
                        "{}/{}/scale",
                        item.metadata.uri,
                        self.kind.as_str()
                    ))
                    .query(&[("replicas", replicas)])
                    .send()
                    .await?
            }
            UpdateOp::RollingUpdate {
                uses_with,
                pod_name,
            } => {
                let mut body = serde_json::json!({ "uses_with": uses_with });
                if let Some(pod_name) = pod_name {
                    body["pod_name"] = Value::String(pod_name);
                }
                self.http
                    .put(format!(
                        "{}/{}/rolling_update",
                        item.metadata.uri,
                        self.kind.as_str()
                    ))
                    .json(&body)
                    .send()
                    .await?
            }
        };

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JinadError::PartialDaemonError { body });
        }

        let object: Value = response.json().await?;
        self.store
            .update(id, |item| item.arguments.object = object.clone())
            .await?;
        Ok(object)
    }

    /// Tears a component down: stops and removes its container, drops the
    /// store entry, and detaches it from the owning workspace.
    pub async fn delete(
        &self,
        gateway: &Dockerizer,
        workspaces: &WorkspaceStore,
        id: &DaemonID,
    ) -> JinadResult<()> {
        let item = self
            .store
            .get(id)
            .await
            .ok_or_else(|| JinadError::UnknownObject(id.to_string()))?;

        match gateway.rm_container(&id.to_string()).await {
            Ok(()) => {}
            Err(JinadError::UnknownObject(_)) => {
                tracing::debug!("container for {} already gone", id);
            }
            Err(e) => return Err(e),
        }

        self.store.delete(id).await?;
        if let Err(e) = workspaces.detach_managed(&item.workspace_id, id).await {
            tracing::debug!("could not detach {} from its workspace: {}", id, e);
        }

        tracing::info!("{} is released from the store", id);
        Ok(())
    }

    /// Drops entries whose container no longer exists. Run once on startup;
    /// live handles are never persisted, so a reloaded entry is only kept if
    /// Docker still knows its container.
    pub async fn prune_stale(&self, gateway: &Dockerizer) {
        for id in self.store.ids().await {
            if !gateway.container_running(&id.to_string()).await {
                tracing::warn!("pruning stale entry {} (container gone)", id);
                let _ = self.store.delete(&id).await;
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Methods: Helpers
    //----------------------------------------------------------------------------------------------

    /// Polls the partial daemon's health endpoint within a fixed budget.
    async fn wait_until_ready(&self, uri: &str) -> JinadResult<()> {
        for _ in 0..HEALTH_CHECK_RETRIES {
            match self.http.get(uri).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    tracing::debug!("partial daemon not ready: {}", response.status());
                }
                Err(e) => {
                    tracing::debug!("partial daemon not reachable yet: {}", e);
                }
            }
            tokio::time::sleep(Duration::from_millis(HEALTH_CHECK_INTERVAL_MS)).await;
        }
        Err(JinadError::PartialDaemonUnreachable(uri.to_string()))
    }

    /// Posts the component spec; 201 hands back the worker's declared
    /// arguments, anything else propagates the body verbatim.
    async fn create_worker(&self, uri: &str, params: &Value) -> JinadResult<Value> {
        let response = self
            .http
            .post(format!("{}/{}", uri, self.kind.as_str()))
            .json(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JinadError::PartialDaemonError { body });
        }

        Ok(response.json().await?)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Picks a free TCP port from the OS by binding and immediately releasing it.
fn ephemeral_port() -> JinadResult<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))?;
    Ok(listener.local_addr()?.port())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdKind;

    #[test]
    fn test_ephemeral_port_is_free() {
        let port = ephemeral_port().unwrap();
        assert!(port > 0);
        // The port was released and can be bound again.
        TcpListener::bind(("0.0.0.0", port)).unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_id_is_unknown_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContainerStore::load(
            ContainerKind::Pod,
            dir.path().join(".pod-store"),
            Duration::from_secs(1),
        );

        let missing = DaemonID::new(IdKind::Pod);
        assert!(matches!(
            store
                .update(&missing, UpdateOp::Scale { replicas: 2 })
                .await,
            Err(JinadError::UnknownObject(_))
        ));
    }

    #[tokio::test]
    async fn test_capability_guard() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContainerStore::load(
            ContainerKind::Pea,
            dir.path().join(".pea-store"),
            Duration::from_secs(1),
        );

        let id = DaemonID::new(IdKind::Pea);
        let item = ContainerItem {
            workspace_id: DaemonID::new(IdKind::Workspace),
            metadata: ContainerMetadata::builder()
                .container_id("deadbeef".into())
                .container_name(id.to_string())
                .image_id("cafebabe".into())
                .network("net".into())
                .uri("http://0.0.0.0:1".into())
                .minid_port(1)
                .build(),
            arguments: ContainerArguments::default(),
        };
        store.store.add(id, item).await.unwrap();

        // Peas can neither scale nor roll; the guard fires before any HTTP.
        assert!(matches!(
            store.update(&id, UpdateOp::Scale { replicas: 2 }).await,
            Err(JinadError::Validation(_))
        ));
        assert!(matches!(
            store
                .update(
                    &id,
                    UpdateOp::RollingUpdate {
                        uses_with: Value::Null,
                        pod_name: None
                    }
                )
                .await,
            Err(JinadError::Validation(_))
        ));
    }
}
