//! Read-only HTTP surface: Prometheus exposition and the cluster state
//! API backed by the persistent store.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use shardguard_orchestrator::Coordinator;
use shardguard_storage::Storage;

pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    pub storage: Arc<dyn Storage>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/api/v1/clusters", get(clusters))
        .route("/api/v1/snapshots/:cluster", get(snapshot))
        .route("/api/v1/recoveries/:cluster", get(recoveries))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        shardguard_metrics::gather(),
    )
}

async fn clusters(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(state.coordinator.cluster_names())
}

async fn snapshot(
    State(state): State<Arc<ApiState>>,
    Path(cluster): Path<String>,
) -> impl IntoResponse {
    match state.storage.get_cluster_snapshot(&cluster).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => {
            tracing::debug!(%cluster, %err, "snapshot lookup failed");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn recoveries(
    State(state): State<Arc<ApiState>>,
    Path(cluster): Path<String>,
) -> impl IntoResponse {
    match state.storage.get_recoveries(&cluster).await {
        Ok(recoveries) => Json(recoveries).into_response(),
        Err(err) => {
            tracing::error!(%cluster, %err, "recovery lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
