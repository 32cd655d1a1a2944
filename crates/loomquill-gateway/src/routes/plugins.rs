//! `GET /plugins`. Plugin UI runtimes are an external collaborator (out of
//! scope per spec.md §1); this just reports that the registry is empty,
//! leaving room for a manifest loader without inventing one.

use axum::response::IntoResponse;
use axum::Json;

pub async fn list_plugins() -> impl IntoResponse {
    Json(serde_json::json!({ "plugins": Vec::<serde_json::Value>::new() }))
}
