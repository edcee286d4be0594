//! HTTP surface of the partial daemon.
//!
//! One router per container: health at `/`, the worker lifecycle under
//! `/<kind>`, and scale/rolling-update PUTs only where the kind supports
//! them. A successful DELETE also asks the process itself to exit, since the
//! container has nothing left to do once its worker is gone.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::JinadError;

use super::{PartialStore, WorkerFactory};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared state of the partial daemon server.
pub struct PartialState {
    /// The single-worker store.
    pub store: PartialStore,

    /// How workers get created.
    pub factory: Box<dyn WorkerFactory>,
}

/// Error envelope: the taxonomy name plus the failure's lines, so the outer
/// daemon can re-emit the body verbatim.
struct PartialError(JinadError);

#[derive(Debug, Deserialize)]
struct ScaleQuery {
    replicas: u32,
}

#[derive(Debug, Deserialize)]
struct RollingUpdateBody {
    uses_with: Value,
    #[serde(default)]
    pod_name: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the partial daemon router for one kind.
pub fn partial_app(state: Arc<PartialState>) -> Router {
    let kind = state.store.kind();
    let base = format!("/{}", kind.as_str());

    let mut router = Router::new().route("/", get(health)).route(
        &base,
        post(create).get(snapshot).delete(delete),
    );

    // Scale and rolling-update are capabilities, not kinds; absent routes
    // answer 405/404 without touching the worker.
    if kind.can_scale() {
        router = router.route(&format!("{}/scale", base), put(scale));
    }
    if kind.can_rolling_update() {
        router = router.route(&format!("{}/rolling_update", base), put(rolling_update));
    }

    router.with_state(state)
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Health endpoint the outer daemon polls while the container boots.
async fn health(State(state): State<Arc<PartialState>>) -> impl IntoResponse {
    Json(json!({ "kind": state.store.kind().as_str(), "status": "ready" }))
}

/// Instantiates the worker; answers 201 with its declared arguments.
async fn create(
    State(state): State<Arc<PartialState>>,
    Json(params): Json<Value>,
) -> Result<Response, PartialError> {
    let arguments = state.store.add(state.factory.as_ref(), params).await?;
    Ok((StatusCode::CREATED, Json(arguments)).into_response())
}

/// Current worker snapshot.
async fn snapshot(
    State(state): State<Arc<PartialState>>,
) -> Result<Json<Value>, PartialError> {
    Ok(Json(state.store.get().await?))
}

/// Delegates a scale to the worker.
async fn scale(
    State(state): State<Arc<PartialState>>,
    Query(query): Query<ScaleQuery>,
) -> Result<Json<Value>, PartialError> {
    Ok(Json(state.store.scale(query.replicas).await?))
}

/// Delegates a rolling update to the worker.
async fn rolling_update(
    State(state): State<Arc<PartialState>>,
    Json(body): Json<RollingUpdateBody>,
) -> Result<Json<Value>, PartialError> {
    Ok(Json(
        state
            .store
            .rolling_update(body.uses_with, body.pod_name)
            .await?,
    ))
}

/// Closes the worker, then asks the process itself to exit.
async fn delete(
    State(state): State<Arc<PartialState>>,
) -> Result<Json<Value>, PartialError> {
    state.store.delete().await?;

    tokio::spawn(async {
        // Give the response a moment to flush before the self-signal.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tracing::info!("worker closed, shutting partial daemon down");
        let _ = kill(Pid::this(), Signal::SIGINT);
    });

    Ok(Json(json!({ "status": "deleted" })))
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<JinadError> for PartialError {
    fn from(error: JinadError) -> Self {
        Self(error)
    }
}

impl IntoResponse for PartialError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            JinadError::UnknownObject(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        let body: Vec<String> = self.0.to_string().lines().map(str::to_string).collect();
        (
            status,
            Json(json!({ "detail": self.0.name(), "body": body })),
        )
            .into_response()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::ContainerKind, partial::store::tests::MockFactory};

    async fn serve(kind: ContainerKind, factory: MockFactory) -> String {
        let state = Arc::new(PartialState {
            store: PartialStore::new(kind),
            factory: Box::new(factory),
        });
        let app = partial_app(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn factory() -> MockFactory {
        MockFactory {
            fail_create: false,
            fail_ops: false,
        }
    }

    #[tokio::test]
    async fn test_health_answers_immediately() {
        let base = serve(ContainerKind::Pea, factory()).await;
        let response = reqwest::get(&base).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_create_get_delete_roundtrip() {
        let base = serve(ContainerKind::Pod, factory()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/pod", base))
            .json(&json!({"name": "indexer", "replicas": 1}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        let args: Value = response.json().await.unwrap();
        assert_eq!(args["port_expose"], 12345);

        let response = client.get(format!("{}/pod", base)).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_scale_route_gated_by_capability() {
        let base = serve(ContainerKind::Pea, factory()).await;
        let client = reqwest::Client::new();
        client
            .post(format!("{}/pea", base))
            .json(&json!({"name": "p"}))
            .send()
            .await
            .unwrap();

        let response = client
            .put(format!("{}/pea/scale?replicas=3", base))
            .send()
            .await
            .unwrap();
        // No scale route exists for peas at all.
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_failed_create_reports_structured_body() {
        let base = serve(
            ContainerKind::Flow,
            MockFactory {
                fail_create: true,
                fail_ops: false,
            },
        )
        .await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{}/flow", base))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["detail"], "InternalError");
        assert!(body["body"].as_array().unwrap()[0]
            .as_str()
            .unwrap()
            .contains("boot exploded"));

        let response = client.get(format!("{}/flow", base)).send().await.unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_scale_updates_snapshot() {
        let base = serve(ContainerKind::Pod, factory()).await;
        let client = reqwest::Client::new();
        client
            .post(format!("{}/pod", base))
            .json(&json!({"replicas": 1}))
            .send()
            .await
            .unwrap();

        let response = client
            .put(format!("{}/pod/scale?replicas=3", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let args: Value = response.json().await.unwrap();
        assert_eq!(args["replicas"], 3);
    }
}
