use crate::error::{not_found, ApiError};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use codeframe_core::ProjectType;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProject {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub project_type: Option<ProjectType>,
}

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateProject>,
) -> Result<Response, ApiError> {
    let workspace = state.workspace_root.join(&body.name);
    let project = state
        .store
        .create_project(
            &body.name,
            &body.description,
            body.project_type.unwrap_or_default(),
            &workspace.to_string_lossy(),
        )
        .await?;
    tokio::fs::create_dir_all(&workspace).await.map_err(|e| ApiError(e.into()))?;

    state.bus.emit(codeframe_core::Event::ProjectCreated {
        project_id: project.id,
        name: project.name.clone(),
    });

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": project.id,
            "name": project.name,
            "status": project.status,
            "phase": project.phase,
            "created_at": project.created_at,
        })),
    )
        .into_response())
}

pub async fn list_projects(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let projects = state.store.list_projects().await?;
    let body: Vec<serde_json::Value> = projects
        .into_iter()
        .map(|(project, progress)| {
            serde_json::json!({
                "id": project.id,
                "name": project.name,
                "description": project.description,
                "project_type": project.project_type,
                "status": project.status,
                "phase": project.phase,
                "created_at": project.created_at,
                "progress": progress,
            })
        })
        .collect();
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct IssueQuery {
    #[serde(default)]
    pub include: Option<String>,
}

pub async fn project_issues(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
    Query(query): Query<IssueQuery>,
) -> Result<Response, ApiError> {
    if state.store.get_project(project_id).await?.is_none() {
        return Ok(not_found(format!("project {project_id}")));
    }

    let include_tasks = query.include.as_deref() == Some("tasks");
    let tree = state.store.issue_tree(project_id).await?;
    let body: Vec<serde_json::Value> = tree
        .into_iter()
        .map(|(issue, tasks)| {
            let mut value = serde_json::json!(issue);
            if include_tasks {
                value["tasks"] = serde_json::json!(tasks);
            }
            value
        })
        .collect();
    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
pub struct AnswerBody {
    pub answer: String,
}

pub async fn discovery_answer(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
    Json(body): Json<AnswerBody>,
) -> Result<Response, ApiError> {
    if state.store.get_project(project_id).await?.is_none() {
        return Ok(not_found(format!("project {project_id}")));
    }
    let lead = state.lead_for(project_id).await?;
    let outcome = lead.answer(&body.answer).await?;
    Ok(Json(serde_json::json!(outcome)).into_response())
}

pub async fn discovery_progress(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
) -> Result<Response, ApiError> {
    let Some(project) = state.store.get_project(project_id).await? else {
        return Ok(not_found(format!("project {project_id}")));
    };
    let lead = state.lead_for(project_id).await?;
    let discovery = lead.discovery_progress().await?;
    Ok(Json(serde_json::json!({
        "phase": project.phase,
        "discovery": discovery,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub selected_task_ids: Vec<i64>,
    pub all_task_ids: Vec<i64>,
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
    Json(body): Json<ApproveBody>,
) -> Result<Response, ApiError> {
    if state.store.get_project(project_id).await?.is_none() {
        return Ok(not_found(format!("project {project_id}")));
    }
    let lead = state.lead_for(project_id).await?;
    let approved_count = lead
        .approve(&body.selected_task_ids, &body.all_task_ids)
        .await?;
    // Kick the dispatcher so approved work starts without waiting a tick.
    lead.dispatch_tick().await?;
    Ok(Json(serde_json::json!({
        "approved_count": approved_count,
        "excluded_count": body.all_task_ids.len().saturating_sub(body.selected_task_ids.len()),
    }))
    .into_response())
}
