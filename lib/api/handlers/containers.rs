//! Component endpoints, shared across peas, pods, deployments, and flows.
//!
//! One set of handlers serves all four kinds; the kind rides in as a request
//! extension attached by the per-kind router, and capability differences
//! (scale, rolling-update) are expressed as which routes exist at all.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use bollard::models::DeviceRequest;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    models::{ContainerKind, DaemonID, PortMappings},
    stores::{AddRequest, DeleteFlags, UpdateOp},
    JinadError,
};

use super::super::{ApiError, AppState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Body of a component create for peas/pods/deployments.
#[derive(Debug, Deserialize)]
pub(crate) struct CreateComponent {
    /// The owning workspace; must be ACTIVE.
    pub workspace_id: DaemonID,

    /// The component spec forwarded to the partial daemon.
    #[serde(default)]
    pub params: Value,

    /// Extra container environment.
    #[serde(default)]
    pub envs: BTreeMap<String, String>,

    /// Request gpu device access for the container.
    #[serde(default)]
    pub gpus: bool,
}

/// Query of a flow create: the spec lives as a file inside the workspace.
#[derive(Debug, Deserialize)]
pub(crate) struct CreateFlowQuery {
    pub workspace_id: DaemonID,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScaleQuery {
    replicas: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RollingUpdateBody {
    #[serde(default)]
    uses_with: Value,
    #[serde(default)]
    pod_name: Option<String>,
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteQuery {
    /// Also delete the owning workspace.
    #[serde(default)]
    workspace: bool,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `POST /{kind}s`: create a component from a JSON spec.
pub(crate) async fn create(
    Extension(kind): Extension<ContainerKind>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateComponent>,
) -> Result<impl IntoResponse, ApiError> {
    let id = DaemonID::new(kind.id_kind());

    let ports = ports_from_params(&body.params);
    let request = AddRequest {
        workspace_id: body.workspace_id,
        params: body.params,
        ports,
        envs: body.envs,
        device_requests: body.gpus.then(gpu_device_request),
    };

    state
        .stores
        .container_store(kind)
        .add(&state.gateway, &state.stores.workspaces, id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(json!(id))))
}

/// `POST /flows`: create a flow from a YAML file inside the workspace.
pub(crate) async fn create_flow(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CreateFlowQuery>,
    body: Option<Json<Value>>,
) -> Result<impl IntoResponse, ApiError> {
    let id = DaemonID::new(ContainerKind::Flow.id_kind());

    let workdir = state.stores.workspaces.workdir(&query.workspace_id);
    let flow_path = workdir.join(&query.filename);
    if !flow_path.is_file() {
        return Err(JinadError::UnknownObject(format!(
            "file `{}` not found in workspace `{}`",
            query.filename, query.workspace_id
        ))
        .into());
    }

    // The flow's declared ports must be bound on the container up front.
    let yaml = std::fs::read_to_string(&flow_path).map_err(JinadError::from)?;
    let mappings = PortMappings::from_flow_yaml(&yaml)?;

    let mut params = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));
    if let Some(object) = params.as_object_mut() {
        object.insert("uses".to_string(), json!(query.filename));
        if let Some(port_expose) = mappings.port_expose() {
            object.insert("port_expose".to_string(), json!(port_expose));
        }
    }

    let request = AddRequest {
        workspace_id: query.workspace_id,
        params,
        ports: mappings.ports(),
        envs: BTreeMap::new(),
        device_requests: None,
    };

    state
        .stores
        .container_store(ContainerKind::Flow)
        .add(&state.gateway, &state.stores.workspaces, id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(json!(id))))
}

/// `GET /{kind}s`: the store snapshot for one kind.
pub(crate) async fn list(
    Extension(kind): Extension<ContainerKind>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.stores.container_store(kind).status().await)
}

/// `GET /{kind}s/{id}`: one component.
pub(crate) async fn get(
    Extension(kind): Extension<ContainerKind>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<DaemonID>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .stores
        .container_store(kind)
        .get(&id)
        .await
        .ok_or_else(|| JinadError::UnknownObject(id.to_string()))?;
    Ok(Json(item))
}

/// `PUT /{kind}s/rolling_update/{id}`: replace executor config while serving.
pub(crate) async fn rolling_update(
    Extension(kind): Extension<ContainerKind>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<DaemonID>,
    Json(body): Json<RollingUpdateBody>,
) -> Result<impl IntoResponse, ApiError> {
    // Clients may send the uses_with map either nested or as the body itself.
    let uses_with = if body.uses_with.is_null() && !body.rest.is_empty() {
        json!(body.rest)
    } else {
        body.uses_with
    };

    let object = state
        .stores
        .container_store(kind)
        .update(
            &id,
            UpdateOp::RollingUpdate {
                uses_with,
                pod_name: body.pod_name,
            },
        )
        .await?;
    Ok(Json(object))
}

/// `PUT /{kind}s/scale/{id}?replicas=`: change the replica count.
pub(crate) async fn scale(
    Extension(kind): Extension<ContainerKind>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<DaemonID>,
    Query(query): Query<ScaleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let object = state
        .stores
        .container_store(kind)
        .update(
            &id,
            UpdateOp::Scale {
                replicas: query.replicas,
            },
        )
        .await?;
    Ok(Json(object))
}

/// `DELETE /{kind}s/{id}`: tear the component down, optionally with its
/// workspace.
pub(crate) async fn delete(
    Extension(kind): Extension<ContainerKind>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<DaemonID>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.stores.container_store(kind);
    let workspace_id = store.get(&id).await.map(|item| item.workspace_id);

    store
        .delete(&state.gateway, &state.stores.workspaces, &id)
        .await?;

    if query.workspace {
        if let Some(workspace_id) = workspace_id {
            state
                .stores
                .delete_workspace(
                    &state.gateway,
                    &workspace_id,
                    DeleteFlags {
                        container: true,
                        network: true,
                        files: true,
                        everything: true,
                    },
                )
                .await?;
        }
    }

    Ok(Json(json!(id)))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Ports a spec asks to have bound on the host: any declared numeric
/// `port_*` field.
fn ports_from_params(params: &Value) -> Vec<u16> {
    ["port_in", "port_out", "port_ctrl", "port_expose"]
        .iter()
        .filter_map(|field| params.get(field))
        .filter_map(|value| value.as_u64())
        .map(|port| port as u16)
        .collect()
}

/// The device request used when a component asks for gpus.
fn gpu_device_request() -> Vec<DeviceRequest> {
    vec![DeviceRequest {
        driver: Some("nvidia".to_string()),
        count: Some(-1),
        capabilities: Some(vec![vec!["gpu".to_string()]]),
        ..Default::default()
    }]
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_from_params() {
        let params = json!({
            "name": "p",
            "port_in": 45678,
            "port_ctrl": 45100,
            "port_out": null,
        });
        assert_eq!(ports_from_params(&params), vec![45678, 45100]);
        assert!(ports_from_params(&json!({})).is_empty());
    }
}
