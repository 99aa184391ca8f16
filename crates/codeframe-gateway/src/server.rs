use crate::routes::{context, gates, projects};
use crate::state::AppState;
use crate::ws::ws_handler;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;

/// Assemble the full API router over the shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        // Projects
        .route("/api/projects", post(projects::create_project).get(projects::list_projects))
        .route("/api/projects/{id}/issues", get(projects::project_issues))
        .route(
            "/api/projects/{id}/discovery/answer",
            post(projects::discovery_answer),
        )
        .route(
            "/api/projects/{id}/discovery/progress",
            get(projects::discovery_progress),
        )
        .route("/api/projects/{id}/approve", post(projects::approve))
        // Blockers
        .route("/api/projects/{id}/blockers", get(gates::list_blockers))
        .route(
            "/api/projects/{id}/blockers/{blocker_id}/resolve",
            post(gates::resolve_blocker),
        )
        // Context
        .route(
            "/api/agents/{id}/context",
            post(context::create_item).get(context::list_items),
        )
        .route("/api/agents/{id}/context/stats", get(context::stats))
        .route(
            "/api/agents/{id}/context/update-tiers",
            post(context::update_tiers),
        )
        .route(
            "/api/agents/{id}/context/{item_id}",
            get(context::get_item).delete(context::delete_item),
        )
        .route("/api/agents/{id}/flash-save", post(context::flash_save))
        // Gates
        .route("/api/lint/run", post(gates::lint_run))
        .route("/api/lint/results", get(gates::lint_results))
        .route("/api/lint/trend", get(gates::lint_trend))
        .route("/api/agents/{id}/review", post(gates::run_review))
        .route("/api/tasks/{id}/review-status", get(gates::review_status))
        .route("/api/tasks/by-commit", get(gates::task_by_commit))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "codeframe"}))
}
