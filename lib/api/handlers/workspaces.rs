//! Workspace endpoints: upload, poll, rebuild, delete.

use std::{collections::BTreeMap, sync::Arc};

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    files::UploadedFile,
    models::{DaemonID, IdKind, WorkspaceState},
    stores::DeleteFlags,
    tasks::WorkspaceJob,
    JinadError,
};

use super::super::{ApiError, AppState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct CreateQuery {
    /// Reuse an existing workspace id instead of minting a new one.
    #[serde(default)]
    id: Option<DaemonID>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteQuery {
    #[serde(default)]
    container: bool,
    #[serde(default)]
    network: bool,
    #[serde(default)]
    files: bool,
    #[serde(default)]
    everything: bool,
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `POST /workspaces`: admit a workspace (new or existing) and queue a build.
pub(crate) async fn create(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CreateQuery>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let (files, fields) = read_uploads(multipart).await?;

    // The id may arrive as a query param or a multipart field.
    let id = match query.id {
        Some(id) => Some(id),
        None => fields
            .get("id")
            .map(|raw| raw.parse::<DaemonID>())
            .transpose()?,
    };
    let id = id.unwrap_or_else(|| DaemonID::new(IdKind::Workspace));
    if id.kind() != IdKind::Workspace {
        return Err(JinadError::Validation(format!("`{}` is not a workspace id", id)).into());
    }

    enqueue(&state, id, files).await?;

    let item = state.stores.workspaces.get(&id).await;
    let workspace_state = item.map(|i| i.state).unwrap_or(WorkspaceState::Pending);
    Ok((
        StatusCode::CREATED,
        Json(json!({ id.to_string(): workspace_state })),
    ))
}

/// `PUT /workspaces/{id}`: upload more files and rebuild.
pub(crate) async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DaemonID>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    if !state.stores.workspaces.contains(&id).await {
        return Err(JinadError::UnknownObject(id.to_string()).into());
    }

    let (files, _) = read_uploads(multipart).await?;
    enqueue(&state, id, files).await?;

    let item = state.stores.workspaces.get(&id).await;
    let workspace_state = item.map(|i| i.state).unwrap_or(WorkspaceState::Pending);
    Ok(Json(json!({ id.to_string(): workspace_state })))
}

/// `GET /workspaces`: the full store snapshot.
pub(crate) async fn list(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stores.workspaces.status().await)
}

/// `GET /workspaces/{id}`: one workspace.
pub(crate) async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DaemonID>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .stores
        .workspaces
        .get(&id)
        .await
        .ok_or_else(|| JinadError::UnknownObject(id.to_string()))?;
    Ok(Json(item))
}

/// `DELETE /workspaces/{id}`: remove the parts the flags name.
pub(crate) async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DaemonID>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let flags = DeleteFlags {
        container: query.container,
        network: query.network,
        files: query.files,
        everything: query.everything,
    };
    let outcome = state
        .stores
        .delete_workspace(&state.gateway, &id, flags)
        .await?;
    Ok(Json(json!({ id.to_string(): format!("{:?}", outcome) })))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Admits the id (new ids start PENDING) and puts the build job on the queue.
async fn enqueue(
    state: &AppState,
    id: DaemonID,
    files: Vec<UploadedFile>,
) -> Result<(), ApiError> {
    let workspaces = &state.stores.workspaces;
    if workspaces.contains(&id).await {
        workspaces.update_state(&id, WorkspaceState::Pending).await?;
    } else {
        workspaces.add_pending(id).await?;
    }

    state
        .queue
        .send(WorkspaceJob { id, files })
        .map_err(|e| JinadError::custom(anyhow::anyhow!("build queue closed: {}", e)))?;
    Ok(())
}

/// Collects all multipart `files` fields into memory, plus any plain fields.
async fn read_uploads(
    mut multipart: Multipart,
) -> Result<(Vec<UploadedFile>, BTreeMap<String, String>), ApiError> {
    let mut files = Vec::new();
    let mut fields: BTreeMap<String, String> = BTreeMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| JinadError::Validation(format!("bad multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "files" {
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| JinadError::Validation("upload without a filename".into()))?;
            let content = field
                .bytes()
                .await
                .map_err(|e| JinadError::Validation(format!("bad upload body: {}", e)))?;
            files.push(UploadedFile { filename, content });
        } else {
            let value = field.text().await.unwrap_or_default();
            fields.insert(name, value);
        }
    }

    Ok((files, fields))
}
