//! `GET/POST/DELETE /stories/{sid}/fragments[/{fid}[/tags]]` (spec.md §6).

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use loomquill_core::types::Placement;
use loomquill_core::{Error, FragmentId, StoryId};
use loomquill_store::{FragmentPatch, VersionedPatch};
use serde::Deserialize;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    fragment_type: Option<String>,
    #[serde(default, rename = "includeArchived")]
    include_archived: bool,
}

pub async fn list_fragments(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let summaries = state
        .fragment_store
        .list_summaries(&StoryId::new(story_id), query.fragment_type.as_deref(), query.include_archived)
        .await;
    Json(summaries)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFragmentBody {
    #[serde(rename = "type")]
    pub fragment_type: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_placement")]
    pub placement: Placement,
    #[serde(default)]
    pub sticky: bool,
}

fn default_placement() -> Placement {
    Placement::User
}

pub async fn create_fragment(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
    Json(body): Json<CreateFragmentBody>,
) -> ApiResult<impl IntoResponse> {
    let fragment = state
        .fragment_store
        .create(&StoryId::new(story_id), &body.fragment_type, body.name, body.description, body.content, body.placement, body.sticky)
        .await?;
    Ok(Json(fragment))
}

pub async fn get_fragment(
    State(state): State<AppState>,
    Path((story_id, fragment_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let fragment = state
        .fragment_store
        .get(&StoryId::new(story_id.clone()), &FragmentId::from_raw(fragment_id.clone()))
        .await
        .ok_or_else(|| Error::not_found(format!("fragment {}", fragment_id)))?;
    Ok(Json(fragment))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFragmentBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub sticky: Option<bool>,
    pub placement: Option<Placement>,
    pub order: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub meta: Option<serde_json::Map<String, serde_json::Value>>,
    pub archived: Option<bool>,
}

pub async fn update_fragment(
    State(state): State<AppState>,
    Path((story_id, fragment_id)): Path<(String, String)>,
    Json(body): Json<UpdateFragmentBody>,
) -> ApiResult<impl IntoResponse> {
    let story_id = StoryId::new(story_id);
    let fragment_id = FragmentId::from_raw(fragment_id);

    if body.name.is_some() || body.description.is_some() || body.content.is_some() {
        state
            .fragment_store
            .update_versioned(&story_id, &fragment_id, VersionedPatch { name: body.name, description: body.description, content: body.content })
            .await?;
    }
    if body.sticky.is_some() || body.placement.is_some() || body.order.is_some() || body.tags.is_some() || body.meta.is_some() {
        state
            .fragment_store
            .update(&story_id, &fragment_id, FragmentPatch { sticky: body.sticky, placement: body.placement, order: body.order, tags: body.tags, meta: body.meta })
            .await?;
    }
    let fragment = match body.archived {
        Some(true) => state.fragment_store.archive(&story_id, &fragment_id).await?,
        Some(false) => state.fragment_store.restore(&story_id, &fragment_id).await?,
        None => state.fragment_store.get(&story_id, &fragment_id).await.ok_or_else(|| Error::not_found(format!("fragment {}", fragment_id)))?,
    };
    Ok(Json(fragment))
}

pub async fn delete_fragment(
    State(state): State<AppState>,
    Path((story_id, fragment_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    state.fragment_store.delete(&StoryId::new(story_id), &FragmentId::from_raw(fragment_id)).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(serde::Serialize)]
struct TagsResponse {
    tags: Vec<String>,
}

pub async fn get_tags(
    State(state): State<AppState>,
    Path((story_id, fragment_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let fragment = state
        .fragment_store
        .get(&StoryId::new(story_id), &FragmentId::from_raw(fragment_id.clone()))
        .await
        .ok_or_else(|| Error::not_found(format!("fragment {}", fragment_id)))?;
    Ok(Json(TagsResponse { tags: fragment.tags }))
}

#[derive(Deserialize)]
pub struct SetTagsBody {
    pub tags: Vec<String>,
}

pub async fn set_tags(
    State(state): State<AppState>,
    Path((story_id, fragment_id)): Path<(String, String)>,
    Json(body): Json<SetTagsBody>,
) -> ApiResult<impl IntoResponse> {
    let story_id = StoryId::new(story_id);
    let fragment_id = FragmentId::from_raw(fragment_id);
    let patch = FragmentPatch { tags: Some(body.tags), ..Default::default() };
    let fragment = state.fragment_store.update(&story_id, &fragment_id, patch).await?;
    Ok(Json(TagsResponse { tags: fragment.tags }))
}
