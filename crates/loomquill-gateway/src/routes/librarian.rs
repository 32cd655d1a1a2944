//! `GET /stories/{sid}/librarian/stream` and `GET /stories/{sid}/active-agents`.

use crate::ndjson::ndjson_response;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use loomquill_core::StoryId;

pub async fn librarian_stream(State(state): State<AppState>, Path(story_id): Path<String>) -> Response {
    let story_id = StoryId::new(story_id);
    let stream = state.librarian.subscribe(&story_id);
    ndjson_response(stream)
}

pub async fn list_active_agents(State(state): State<AppState>, Path(story_id): Path<String>) -> impl IntoResponse {
    let story_id = StoryId::new(story_id);
    Json(state.active_agents.list(Some(&story_id)))
}
