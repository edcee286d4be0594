//! Route table of the daemon's REST/WebSocket surface.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Extension, Router,
};

use crate::models::ContainerKind;

use super::{
    handlers::{containers, logs, status, workspaces},
    AppState,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the daemon's router.
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/status", get(status::status))
        .route(
            "/workspaces",
            post(workspaces::create).get(workspaces::list),
        )
        .route(
            "/workspaces/{id}",
            get(workspaces::get)
                .put(workspaces::update)
                .delete(workspaces::delete),
        )
        .route(
            "/logstream/{workspace_id}/{log_id}",
            get(logs::logstream),
        );

    // Flows are created from a YAML file inside the workspace; the other
    // kinds take their spec in the request body.
    router = router.route("/flows", post(containers::create_flow));

    for kind in ContainerKind::ALL {
        router = router.merge(kind_routes(kind));
    }

    router.with_state(state)
}

/// Routes shared by every component kind, with the kind attached as a
/// request extension; scale and rolling-update only exist where the kind
/// supports them.
fn kind_routes(kind: ContainerKind) -> Router<Arc<AppState>> {
    let base = format!("/{}s", kind.as_str());
    let mut router = Router::new();

    if kind != ContainerKind::Flow {
        router = router.route(&base, post(containers::create));
    }

    router = router.route(&base, get(containers::list)).route(
        &format!("{}/{{id}}", base),
        get(containers::get).delete(containers::delete),
    );

    if kind.can_scale() {
        router = router.route(&format!("{}/scale/{{id}}", base), put(containers::scale));
    }
    if kind.can_rolling_update() {
        router = router.route(
            &format!("{}/rolling_update/{{id}}", base),
            put(containers::rolling_update),
        );
    }

    router.layer(Extension(kind))
}
