//! `GET /healthz`: process liveness, uptime, and registered tool/agent
//! counts, matching the teacher's `/health` handler.

use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use loomquill_core::StoryId;

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds().max(0);
    let registry = loomquill_tools::create_registry(state.fragment_store.clone(), StoryId::new("__healthz__"), false).await;
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime_secs,
        "toolCount": registry.list().len(),
        "activeAgentCount": state.active_agents.list(None).len(),
    }))
}
