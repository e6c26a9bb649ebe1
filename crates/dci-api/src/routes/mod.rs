//! API routes.

pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1", get(index))
        .route("/api/v1/", get(index))
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new().merge(jobs::router())
}

async fn index() -> Json<Value> {
    Json(json!({ "_status": "OK", "message": "Distributed CI." }))
}
