//! HTTP API routes for the record service

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod records;

use crate::store::RecordStore;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<RecordStore>,
}

/// Configure all API routes
pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/containers/{container_id}/records",
            get(records::list_records).post(records::create_record),
        )
        .route(
            "/containers/{container_id}/records/{record_id}",
            get(records::get_record)
                .patch(records::patch_record)
                .delete(records::delete_record),
        )
}

/// Router bound to a store, with request tracing
pub fn app(store: Arc<RecordStore>) -> Router {
    router()
        .with_state(ApiState { store })
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "record-service",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
