use codeframe_core::{CoreError, CoreResult};
use git2::{Repository, Signature, StatusOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

/// Outcome of a commit attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The commit was created; the 40-char hex SHA is recorded on the task.
    Committed { sha: String },
    /// The commit was skipped (e.g. unrelated working-tree changes or
    /// nothing to commit). Task completion proceeds without a SHA.
    Skipped { reason: String },
}

/// One commit per completed task, serialized per project workspace.
///
/// Failures never block task completion: git errors increment a consecutive
/// failure counter the caller can turn into an ASYNC blocker once it crosses
/// the configured threshold.
pub struct GitWorkflow {
    repo_path: PathBuf,
    consecutive_failures: AtomicU32,
}

impl GitWorkflow {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Git failures since the last successful (or cleanly skipped) commit.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Commit the task's declared files with a conventional message.
    ///
    /// Refuses (skip, not fail) when the working tree carries modifications
    /// outside the declared file set. On git failure, returns the error so
    /// the caller can log it; the failure counter is already incremented.
    pub async fn commit_task(
        &self,
        task_number: &str,
        title: &str,
        description: &str,
        files: &[String],
    ) -> CoreResult<CommitOutcome> {
        let message = build_commit_message(task_number, title, description, files);
        let path = self.repo_path.clone();
        let files = files.to_vec();

        let result = tokio::task::spawn_blocking(move || commit_sync(&path, &message, &files))
            .await
            .map_err(|e| CoreError::Transient(format!("git task join error: {e}")))?;

        match &result {
            Ok(CommitOutcome::Committed { sha }) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                info!(task_number, sha = %sha, "Committed task");
            }
            Ok(CommitOutcome::Skipped { reason }) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                warn!(task_number, reason = %reason, "Commit skipped");
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(task_number, error = %e, failures, "Commit failed");
            }
        }
        result
    }
}

fn commit_sync(path: &Path, message: &str, files: &[String]) -> CoreResult<CommitOutcome> {
    let repo = Repository::open(path)
        .map_err(|e| CoreError::ExternalTool(format!("git open failed: {e}")))?;

    // Refuse to sweep up work that is not part of this task.
    let mut opts = StatusOptions::new();
    opts.include_untracked(true).include_ignored(false);
    let statuses = repo
        .statuses(Some(&mut opts))
        .map_err(|e| CoreError::ExternalTool(format!("git status failed: {e}")))?;

    let mut unrelated = Vec::new();
    let mut related = Vec::new();
    for entry in statuses.iter() {
        let Some(entry_path) = entry.path() else { continue };
        if files.iter().any(|f| f == entry_path) {
            related.push(entry_path.to_string());
        } else {
            unrelated.push(entry_path.to_string());
        }
    }

    if !unrelated.is_empty() {
        return Ok(CommitOutcome::Skipped {
            reason: format!(
                "working tree has unrelated changes: {}",
                unrelated.join(", ")
            ),
        });
    }
    if related.is_empty() {
        return Ok(CommitOutcome::Skipped {
            reason: "nothing to commit for this task".to_string(),
        });
    }

    let mut index = repo
        .index()
        .map_err(|e| CoreError::ExternalTool(format!("git index failed: {e}")))?;
    for file in &related {
        index
            .add_path(Path::new(file))
            .map_err(|e| CoreError::ExternalTool(format!("git add {file} failed: {e}")))?;
    }
    index
        .write()
        .map_err(|e| CoreError::ExternalTool(format!("git index write failed: {e}")))?;
    let tree_id = index
        .write_tree()
        .map_err(|e| CoreError::ExternalTool(format!("git write-tree failed: {e}")))?;
    let tree = repo
        .find_tree(tree_id)
        .map_err(|e| CoreError::ExternalTool(format!("git find-tree failed: {e}")))?;

    let signature = repo
        .signature()
        .or_else(|_| Signature::now("codeframe", "codeframe@localhost"))
        .map_err(|e| CoreError::ExternalTool(format!("git signature failed: {e}")))?;

    // The first commit of a fresh workspace has no parent.
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let oid = repo
        .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .map_err(|e| CoreError::ExternalTool(format!("git commit failed: {e}")))?;

    Ok(CommitOutcome::Committed {
        sha: oid.to_string(),
    })
}

/// Conventional commit type inferred from task title keywords.
fn infer_commit_type(title: &str) -> &'static str {
    let lower = title.to_lowercase();
    if lower.contains("fix") || lower.contains("bug") {
        "fix"
    } else if lower.contains("test") {
        "test"
    } else if lower.contains("refactor") {
        "refactor"
    } else if lower.contains("doc") {
        "docs"
    } else if lower.contains("chore") || lower.contains("cleanup") {
        "chore"
    } else {
        "feat"
    }
}

fn build_commit_message(
    task_number: &str,
    title: &str,
    description: &str,
    files: &[String],
) -> String {
    let kind = infer_commit_type(title);
    let file_list: String = files.iter().map(|f| format!("- {f}\n")).collect();
    format!("{kind}({task_number}): {title}\n\n{description}\n\nModified files:\n{file_list}")
}
