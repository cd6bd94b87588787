use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    tracing::trace!("health check: ok");
    Json(json!({ "status": "ok" }))
}
