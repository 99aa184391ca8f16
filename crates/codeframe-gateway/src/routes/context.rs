use crate::error::{not_found, ApiError};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use codeframe_core::{ItemType, Tier};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateItem {
    pub project_id: i64,
    pub item_type: ItemType,
    pub content: String,
}

/// Create a context item. Any caller-supplied score or tier is ignored; the
/// importance scorer decides both at insert time.
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(body): Json<CreateItem>,
) -> Result<Response, ApiError> {
    let id = state
        .context
        .save(&agent_id, body.project_id, body.item_type, &body.content)
        .await?;
    let item = state.context.get(id).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(item))).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project_id: i64,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let tier = query.tier.as_deref().map(str::parse::<Tier>).transpose()?;
    let items = state
        .context
        .load_page(
            &agent_id,
            query.project_id,
            tier,
            query.limit,
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(serde_json::json!(items)).into_response())
}

pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path((_agent_id, item_id)): Path<(String, i64)>,
) -> Result<Response, ApiError> {
    match state.context.get(item_id).await? {
        Some(item) => Ok(Json(serde_json::json!(item)).into_response()),
        None => Ok(not_found(format!("context item {item_id}"))),
    }
}

pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    Path((_agent_id, item_id)): Path<(String, i64)>,
) -> Result<Response, ApiError> {
    if state.context.delete(item_id).await? {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(not_found(format!("context item {item_id}")))
    }
}

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    pub project_id: i64,
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<Response, ApiError> {
    let stats = state.context.stats(&agent_id, query.project_id).await?;
    Ok(Json(serde_json::json!(stats)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ScopeBody {
    pub project_id: i64,
}

pub async fn flash_save(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(body): Json<ScopeBody>,
) -> Result<Response, ApiError> {
    let result = state.context.flash_save(&agent_id, body.project_id).await?;
    Ok(Json(serde_json::json!(result)).into_response())
}

pub async fn update_tiers(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(body): Json<ScopeBody>,
) -> Result<Response, ApiError> {
    let recount = state
        .context
        .recompute_tiers(&agent_id, body.project_id)
        .await?;
    Ok(Json(serde_json::json!(recount)).into_response())
}
