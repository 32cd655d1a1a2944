//! `POST /stories/{sid}/generate`, generation-log listing, and
//! `/suggest-directions` (spec.md §6, §4.H).

use crate::error::{ApiError, ApiResult};
use crate::ndjson::ndjson_response;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use loomquill_agent::{run_agent_stream, RunInput};
use loomquill_core::types::{Direction, GenerationMode};
use loomquill_core::{Error, FragmentId, StoryId};
use loomquill_llm::types::LlmMessage;
use loomquill_pipeline::GenerateRequest;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub input: String,
    #[serde(default)]
    pub save_result: bool,
    #[serde(default)]
    pub mode: Option<GenerationMode>,
    #[serde(default)]
    pub fragment_id: Option<String>,
}

pub async fn generate(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Json(body): Json<GenerateBody>,
) -> Response {
    let request = GenerateRequest {
        input: body.input,
        save_result: body.save_result,
        mode: body.mode.unwrap_or(GenerationMode::Generate),
        fragment_id: body.fragment_id.map(FragmentId::from_raw),
    };
    let stream = state.pipeline.generate(StoryId::new(story_id), request, CancellationToken::new());
    ndjson_response(stream)
}

pub async fn list_generation_logs(State(state): State<AppState>, Path(story_id): Path<String>) -> impl IntoResponse {
    let summaries = state.log_store.list_summaries(&StoryId::new(story_id)).await;
    Json(summaries)
}

pub async fn get_generation_log(
    State(state): State<AppState>,
    Path((story_id, log_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let log = state.log_store.get_or_err(&StoryId::new(story_id), &log_id).await?;
    Ok(Json(log))
}

#[derive(Deserialize)]
pub struct SuggestDirectionsBody {
    #[serde(default = "default_suggestion_count")]
    pub count: u32,
}

fn default_suggestion_count() -> u32 {
    3
}

#[derive(Serialize)]
pub struct SuggestDirectionsResponse {
    pub suggestions: Vec<Direction>,
}

pub async fn suggest_directions(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Json(body): Json<SuggestDirectionsBody>,
) -> ApiResult<impl IntoResponse> {
    let story_id = StoryId::new(story_id);
    let story = state.story_store.get(&story_id).await.ok_or_else(|| Error::not_found(format!("story {}", story_id)))?;
    let system = state.instructions.resolve("suggest-directions", &state.model).await?;

    let prompt = format!(
        "Story: {}\n{}\nRolling summary:\n{}\n\nPropose {} distinct continuation directions. Respond with a bare JSON array of objects, each {{\"pacing\", \"title\", \"description\", \"instruction\"}}. No prose outside the array.",
        story.name, story.description, story.summary, body.count
    );

    let tools = std::sync::Arc::new(loomquill_tools::ToolRegistry::new());
    let (stream, completion_rx) = run_agent_stream(
        state.provider.clone(),
        tools,
        RunInput { model: state.model.clone(), system: Some(system), messages: vec![LlmMessage::user(prompt)], max_steps: 1 },
        CancellationToken::new(),
    );
    tokio::pin!(stream);
    while stream.next().await.is_some() {}
    let completion = completion_rx.await.map_err(|_| Error::Storage("agent run aborted".to_string()))?;

    let suggestions = parse_directions(&completion.text).unwrap_or_default();
    Ok(Json(SuggestDirectionsResponse { suggestions }))
}

fn parse_directions(text: &str) -> Option<Vec<Direction>> {
    let trimmed = text.trim();
    if let Ok(list) = serde_json::from_str::<Vec<Direction>>(trimmed) {
        return Some(list);
    }
    let fenced = trimmed.rsplit("```").nth(1).unwrap_or(trimmed);
    let fenced = fenced.strip_prefix("json").unwrap_or(fenced).trim();
    serde_json::from_str::<Vec<Direction>>(fenced).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json_array() {
        let text = r#"[{"pacing":"fast","title":"t","description":"d","instruction":"i"}]"#;
        let directions = parse_directions(text).unwrap();
        assert_eq!(directions.len(), 1);
        assert_eq!(directions[0].title, "t");
    }

    #[test]
    fn parses_fenced_json_array() {
        let text = "```json\n[{\"pacing\":\"slow\",\"title\":\"t\",\"description\":\"d\",\"instruction\":\"i\"}]\n```";
        let directions = parse_directions(text).unwrap();
        assert_eq!(directions.len(), 1);
    }

    #[test]
    fn non_json_returns_none() {
        assert!(parse_directions("not json").is_none());
    }
}
