//! HTTP surface: liveness and queue depth.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use herald_dispatch::Strategies;
use herald_infra::jobs::JobQueue;

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: JobQueue,
    /// Audience strategies for admitting dispatches.
    pub strategies: Arc<Strategies>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    queue_length: Option<u64>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .layer(Extension(state))
}

/// Always 200 while the process runs; `degraded` when jobs cannot be counted.
async fn health(Extension(state): Extension<AppState>) -> impl IntoResponse {
    match state.queue.len().await {
        Ok(len) => (
            StatusCode::OK,
            Json(Health {
                status: "ok",
                queue_length: Some(len),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not count jobs");
            (
                StatusCode::OK,
                Json(Health {
                    status: "degraded",
                    queue_length: None,
                }),
            )
        }
    }
}
