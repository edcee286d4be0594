//! The daemon summary endpoint.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use super::super::AppState;

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// `GET /status`: version plus the snapshot of every store.
pub(crate) async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stores = state.stores.status().await;
    Json(json!({
        "jinad": {
            "version": env!("CARGO_PKG_VERSION"),
            "workspace_root": state.stores.workspaces.root(),
        },
        "workspaces": stores.workspaces,
        "peas": stores.peas,
        "pods": stores.pods,
        "deployments": stores.deployments,
        "flows": stores.flows,
    }))
}
