pub mod fragments;
pub mod generation;
pub mod health;
pub mod librarian;
pub mod plugins;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/plugins", get(plugins::list_plugins))
        .route("/stories/:sid/generate", post(generation::generate))
        .route("/stories/:sid/generation-logs", get(generation::list_generation_logs))
        .route("/stories/:sid/generation-logs/:id", get(generation::get_generation_log))
        .route("/stories/:sid/suggest-directions", post(generation::suggest_directions))
        .route("/stories/:sid/fragments", get(fragments::list_fragments).post(fragments::create_fragment))
        .route(
            "/stories/:sid/fragments/:fid",
            get(fragments::get_fragment).post(fragments::update_fragment).delete(fragments::delete_fragment),
        )
        .route("/stories/:sid/fragments/:fid/tags", get(fragments::get_tags).post(fragments::set_tags))
        .route("/stories/:sid/librarian/stream", get(librarian::librarian_stream))
        .route("/stories/:sid/active-agents", get(librarian::list_active_agents))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_stream::stream;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use loomquill_context::InstructionRegistry;
    use loomquill_core::config::LibrarianConfig;
    use loomquill_llm::provider::{LlmProvider, LlmResult, LlmStream};
    use loomquill_llm::types::{LlmRequest, StreamDelta};
    use loomquill_pipeline::{ActiveAgentRegistry, GenerationPipeline, LibrarianScheduler};
    use loomquill_store::{BlockConfigStore, FragmentStore, GenerationLogStore, LibrarianFindingStore, StoryStore};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct StubProvider;

    #[async_trait::async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }
        fn models(&self) -> &[&str] {
            &["mock"]
        }
        async fn complete_stream(&self, _request: LlmRequest, _cancel: Option<CancellationToken>) -> LlmResult<LlmStream> {
            let s = stream! {
                yield Ok(StreamDelta::Text("the next page".to_string()));
                yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None });
            };
            Ok(Box::pin(s))
        }
    }

    fn default_instructions() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("writing".to_string(), "Write the next page.".to_string());
        map.insert("analyze".to_string(), "Analyze the new page.".to_string());
        map.insert("suggest-directions".to_string(), "Propose directions.".to_string());
        map
    }

    async fn harness() -> (Router, tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let fragment_store = Arc::new(FragmentStore::new(dir.path()));
        let story_store = Arc::new(StoryStore::new(dir.path()));
        let block_config_store = Arc::new(BlockConfigStore::new(dir.path()));
        let log_store = Arc::new(GenerationLogStore::new(dir.path()));
        let finding_store = Arc::new(LibrarianFindingStore::new(dir.path()));
        let instructions = Arc::new(InstructionRegistry::new(dir.path().join("instruction-sets"), default_instructions()));
        let provider: Arc<dyn LlmProvider> = Arc::new(StubProvider);
        let active_agents = ActiveAgentRegistry::new(Duration::from_secs(600));
        let librarian_cfg = LibrarianConfig::default();
        let librarian = LibrarianScheduler::new(
            fragment_store.clone(),
            story_store.clone(),
            finding_store,
            instructions.clone(),
            provider.clone(),
            "mock".to_string(),
            active_agents.clone(),
            Duration::from_millis(librarian_cfg.debounce_ms),
        );
        let pipeline = GenerationPipeline::new(
            fragment_store.clone(),
            story_store.clone(),
            block_config_store.clone(),
            log_store.clone(),
            instructions.clone(),
            provider.clone(),
            "mock".to_string(),
            active_agents.clone(),
            librarian.clone(),
        );

        let story_id = "s1".to_string();
        story_store.create(loomquill_core::StoryId::new(story_id.clone()), "My Story", "d").await.unwrap();

        let state = AppState {
            fragment_store,
            story_store,
            block_config_store,
            log_store,
            instructions,
            active_agents,
            librarian,
            pipeline,
            provider,
            model: "mock".to_string(),
            started_at: chrono::Utc::now(),
        };
        (build_router(state), dir, story_id)
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let (app, _dir, _sid) = harness().await;
        let response = app.oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn fragment_create_then_get_round_trips() {
        let (app, _dir, sid) = harness().await;
        let body = serde_json::json!({ "type": "character", "name": "Ada", "description": "protagonist" });
        let create_res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/stories/{}/fragments", sid))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create_res.status(), StatusCode::OK);
        let bytes = create_res.into_body().collect().await.unwrap().to_bytes();
        let created: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let fid = created["id"].as_str().unwrap().to_string();
        assert!(fid.starts_with("ch-"));

        let get_res = app
            .oneshot(Request::builder().uri(format!("/stories/{}/fragments/{}", sid, fid)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(get_res.status(), StatusCode::OK);
        let bytes = get_res.into_body().collect().await.unwrap().to_bytes();
        let fetched: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(fetched["name"], "Ada");
        assert_eq!(fetched["version"], 1);
    }

    #[tokio::test]
    async fn unknown_fragment_returns_404() {
        let (app, _dir, sid) = harness().await;
        let res = app
            .oneshot(Request::builder().uri(format!("/stories/{}/fragments/ch-missing", sid)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn generate_stream_ends_with_a_single_finish_line() {
        let (app, _dir, sid) = harness().await;
        let body = serde_json::json!({ "input": "continue", "saveResult": false });
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/stories/{}/generate", sid))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).collect();
        assert!(!lines.is_empty());
        let finishes = lines.iter().filter(|l| l.contains("\"finish\"")).count();
        assert_eq!(finishes, 1);
        assert!(lines.last().unwrap().contains("\"finish\""));
    }
}
