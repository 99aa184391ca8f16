use crate::error::{not_found, ApiError};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use codeframe_core::CoreResult;
use codeframe_quality::run_linter;
use serde::Deserialize;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

pub async fn list_blockers(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<i64>,
) -> Result<Response, ApiError> {
    if state.store.get_project(project_id).await?.is_none() {
        return Ok(not_found(format!("project {project_id}")));
    }
    let blockers = state.blockers.list(project_id).await?;
    Ok(Json(serde_json::json!(blockers)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub resolution: String,
}

pub async fn resolve_blocker(
    State(state): State<Arc<AppState>>,
    Path((project_id, blocker_id)): Path<(i64, i64)>,
    Json(body): Json<ResolveBody>,
) -> Result<Response, ApiError> {
    if state.store.get_blocker(blocker_id).await?.is_none() {
        return Ok(not_found(format!("blocker {blocker_id}")));
    }
    let blocker = state.blockers.resolve(blocker_id, &body.resolution).await?;
    // Resolution may unblock the task; re-evaluate readiness now.
    let lead = state.lead_for(project_id).await?;
    lead.dispatch_tick().await?;
    Ok(Json(serde_json::json!(blocker)).into_response())
}

/// Source files under `root` with a lintable extension, workspace-relative.
/// Bounded walk that skips VCS and dependency directories.
async fn collect_source_files(root: &FsPath) -> CoreResult<Vec<String>> {
    const SKIP: &[&str] = &[".git", "node_modules", ".venv", "__pycache__", "target", ".codeframe"];
    const EXTS: &[&str] = &["py", "ts", "tsx", "js", "jsx"];

    let mut files = Vec::new();
    let mut stack: Vec<(PathBuf, u32)> = vec![(root.to_path_buf(), 0)];
    while let Some((dir, depth)) = stack.pop() {
        if depth > 6 {
            continue;
        }
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if !SKIP.contains(&name.as_str()) {
                    stack.push((path, depth + 1));
                }
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTS.contains(&e))
            {
                if let Ok(rel) = path.strip_prefix(root) {
                    files.push(rel.to_string_lossy().to_string());
                }
            }
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Deserialize)]
pub struct LintRunBody {
    pub project_id: i64,
    pub task_id: i64,
}

/// Run the project's linters over its workspace and record the results
/// against the task.
pub async fn lint_run(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LintRunBody>,
) -> Result<Response, ApiError> {
    let Some(project) = state.store.get_project(body.project_id).await? else {
        return Ok(not_found(format!("project {}", body.project_id)));
    };
    if state.store.get_task(body.task_id).await?.is_none() {
        return Ok(not_found(format!("task {}", body.task_id)));
    }

    let workspace = FsPath::new(&project.workspace_path);
    let files = collect_source_files(workspace).await?;
    let linters = codeframe_quality::linters_for_files(&files);

    let runner = codeframe_quality::SubprocessRunner;
    let mut results = Vec::new();
    for linter in linters {
        let run = run_linter(&runner, linter, &files, workspace, state.config.tool_timeout).await?;
        let id = state
            .store
            .insert_lint_result(
                body.task_id,
                run.linter,
                run.error_count() as i64,
                run.warning_count() as i64,
                run.files_linted as i64,
                &run.raw_output,
            )
            .await?;
        results.push(serde_json::json!({
            "id": id,
            "linter": run.linter,
            "error_count": run.error_count(),
            "warning_count": run.warning_count(),
            "files_linted": run.files_linted,
        }));
    }
    Ok(Json(serde_json::json!({"results": results})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LintResultsQuery {
    pub task_id: i64,
}

pub async fn lint_results(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LintResultsQuery>,
) -> Result<Response, ApiError> {
    let results = state.store.lint_results_for_task(query.task_id).await?;
    Ok(Json(serde_json::json!(results)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LintTrendQuery {
    pub project_id: i64,
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    30
}

pub async fn lint_trend(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LintTrendQuery>,
) -> Result<Response, ApiError> {
    let trend = state.store.lint_trend(query.project_id, query.days).await?;
    Ok(Json(serde_json::json!(trend)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
    pub task_id: i64,
    pub project_id: i64,
    pub files_modified: Vec<String>,
}

/// Run the deterministic review analyzers on demand.
pub async fn run_review(
    State(state): State<Arc<AppState>>,
    Path(_agent_id): Path<String>,
    Json(body): Json<ReviewBody>,
) -> Result<Response, ApiError> {
    let Some(project) = state.store.get_project(body.project_id).await? else {
        return Ok(not_found(format!("project {}", body.project_id)));
    };
    let Some(task) = state.store.get_task(body.task_id).await? else {
        return Ok(not_found(format!("task {}", body.task_id)));
    };

    let report = state
        .review
        .review_files(&task, &body.files_modified, FsPath::new(&project.workspace_path))
        .await?;
    Ok(Json(serde_json::json!(report)).into_response())
}

pub async fn review_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
) -> Result<Response, ApiError> {
    let Some(task) = state.store.get_task(task_id).await? else {
        return Ok(not_found(format!("task {task_id}")));
    };

    let blockers = state.store.blockers_for_task(task_id).await?;
    let open_review_blocker = blockers
        .iter()
        .find(|b| b.is_open() && b.reason.contains("review"));

    Ok(Json(serde_json::json!({
        "task_id": task_id,
        "status": task.status,
        "last_error": state.store.task_last_error(task_id).await?,
        "open_review_blocker": open_review_blocker,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ByCommitQuery {
    pub sha: String,
}

pub async fn task_by_commit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ByCommitQuery>,
) -> Result<Response, ApiError> {
    match state.store.task_by_commit(&query.sha).await? {
        Some(task) => Ok(Json(serde_json::json!(task)).into_response()),
        None => Ok(not_found(format!("no task for commit {}", query.sha))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_source_files_skips_vendor_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(tmp.path().join("src")).await.unwrap();
        tokio::fs::create_dir_all(tmp.path().join("node_modules/pkg")).await.unwrap();
        tokio::fs::write(tmp.path().join("src/app.py"), "x = 1\n").await.unwrap();
        tokio::fs::write(tmp.path().join("src/view.tsx"), "export {}\n").await.unwrap();
        tokio::fs::write(tmp.path().join("node_modules/pkg/index.js"), ";")
            .await
            .unwrap();
        tokio::fs::write(tmp.path().join("README.md"), "# hi").await.unwrap();

        let files = collect_source_files(tmp.path()).await.unwrap();
        assert_eq!(files, vec!["src/app.py", "src/view.tsx"]);
    }
}
