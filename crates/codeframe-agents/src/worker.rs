use crate::llm::{ChatMessage, LlmClient};
use codeframe_context::ContextManager;
use codeframe_core::{
    AgentKind, BlockerSeverity, CoreConfig, CoreError, CoreResult, Event, EventBus, ItemType,
    Maturity, Task, TaskOutcome, Tier,
};
use codeframe_git::{CommitOutcome, GitWorkflow};
use codeframe_quality::{PipelineVerdict, QualityPipeline, ReviewGate};
use codeframe_quality::BlockerService;
use codeframe_store::Store;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Shared services handed to every worker. Cloning is cheap; everything is
/// behind an `Arc`.
#[derive(Clone)]
pub struct WorkerEnv {
    pub store: Store,
    pub context: Arc<ContextManager>,
    pub llm: Arc<dyn LlmClient>,
    pub pipeline: Arc<QualityPipeline>,
    pub blockers: Arc<BlockerService>,
    pub review: Arc<dyn ReviewGate>,
    pub bus: EventBus,
    pub config: Arc<CoreConfig>,
}

/// One file edit produced by the planning LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchFile {
    pub path: String,
    pub content: String,
}

/// A project-agnostic task executor.
///
/// Workers are constructed without a project; every project-scoped operation
/// derives the project from the active task and fails with a precondition
/// error when there is none. This is what lets one worker serve many
/// projects without context leakage.
pub struct WorkerAgent {
    id: String,
    kind: AgentKind,
    capabilities: Vec<String>,
    maturity: Maturity,
    provider: String,
    model: String,
    prompt_overrides: Option<String>,
    env: WorkerEnv,
    active_task: Mutex<Option<Task>>,
}

impl WorkerAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        kind: AgentKind,
        capabilities: Vec<String>,
        maturity: Maturity,
        provider: impl Into<String>,
        model: impl Into<String>,
        prompt_overrides: Option<String>,
        env: WorkerEnv,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            capabilities,
            maturity,
            provider: provider.into(),
            model: model.into(),
            prompt_overrides,
            env,
            active_task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn maturity(&self) -> Maturity {
        self.maturity
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Capability-superset check used by the dispatcher.
    pub fn can_handle(&self, required: &[String]) -> bool {
        required.iter().all(|r| self.capabilities.contains(r))
    }

    /// Project id derived from the active task; precondition error without one.
    pub async fn current_project_id(&self) -> CoreResult<i64> {
        self.active_task
            .lock()
            .await
            .as_ref()
            .map(|t| t.project_id)
            .ok_or_else(|| {
                CoreError::Precondition(format!(
                    "agent {} attempted a context operation with no active task",
                    self.id
                ))
            })
    }

    /// Save a context item scoped to the active task's project.
    pub async fn save_context(&self, item_type: ItemType, content: &str) -> CoreResult<i64> {
        let project_id = self.current_project_id().await?;
        self.env
            .context
            .save(&self.id, project_id, item_type, content)
            .await
    }

    /// Execute one task end to end: claim, plan, edit, gate, commit, report.
    ///
    /// The whole run sits under the per-task wall clock; on timeout the task
    /// fails with a structured reason and is not retried.
    pub async fn execute(
        &self,
        task_id: i64,
        git: Arc<GitWorkflow>,
        workspace_lock: Arc<Mutex<()>>,
    ) -> CoreResult<TaskOutcome> {
        let task = self
            .env
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| CoreError::Store(format!("No task {task_id}")))?;

        self.env.store.assign_task(task_id, &self.id).await?;
        *self.active_task.lock().await = Some(task.clone());
        self.env.bus.emit(Event::TaskStarted {
            project_id: task.project_id,
            task_id,
            agent_id: self.id.clone(),
        });
        info!(task_id, agent_id = %self.id, "Task started");

        let run = tokio::time::timeout(
            self.env.config.task_timeout,
            self.run_task(&task, git, workspace_lock),
        )
        .await;

        let outcome = match run {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                let reason = e.to_string();
                warn!(task_id, error = %reason, "Task failed");
                self.env.store.fail_task(task_id, &reason).await?;
                self.env.bus.emit(Event::TaskFailed {
                    project_id: task.project_id,
                    task_id,
                    reason: reason.clone(),
                });
                TaskOutcome::Failed { reason }
            }
            Err(_) => {
                let reason = format!(
                    "task exceeded its {}s wall clock",
                    self.env.config.task_timeout.as_secs()
                );
                warn!(task_id, "Task wall clock exhausted");
                self.env.store.fail_task(task_id, &reason).await?;
                self.env.bus.emit(Event::TaskFailed {
                    project_id: task.project_id,
                    task_id,
                    reason: reason.clone(),
                });
                TaskOutcome::Failed { reason }
            }
        };

        *self.active_task.lock().await = None;
        Ok(outcome)
    }

    async fn run_task(
        &self,
        task: &Task,
        git: Arc<GitWorkflow>,
        workspace_lock: Arc<Mutex<()>>,
    ) -> CoreResult<TaskOutcome> {
        let project = self
            .env
            .store
            .get_project(task.project_id)
            .await?
            .ok_or_else(|| CoreError::Store(format!("No project {}", task.project_id)))?;
        let workspace = Path::new(&project.workspace_path).to_path_buf();

        // Relieve token pressure before the first LLM call.
        if self
            .env
            .context
            .should_flash_save(&self.id, task.project_id, false)
            .await?
        {
            self.env.context.flash_save(&self.id, task.project_id).await?;
        }

        self.save_context(ItemType::Task, &task.description).await?;
        let hot = self
            .env
            .context
            .load(&self.id, task.project_id, Some(Tier::Hot))
            .await?;

        let mut messages = self.build_prompt(task, &hot);
        let mut iteration: u32 = 1;

        loop {
            let response = self.call_llm(&messages).await?;
            let patch = parse_patch(&response)?;
            let files: Vec<String> = patch.iter().map(|f| f.path.clone()).collect();

            // Revisions park the task in awaiting_review while the LLM
            // replans; bring it back before touching the workspace.
            if iteration > 1 {
                self.env.store.resume_task(task.id).await?;
            }

            // The workspace lock spans apply → lint → test → commit so
            // parallel workers on one project never interleave file state.
            let guard = workspace_lock.lock().await;
            apply_patch(&workspace, &patch).await?;
            for file in &patch {
                self.save_context(
                    ItemType::Code,
                    &format!("// {}\n{}", file.path, file.content),
                )
                .await?;
            }

            let run = self
                .env
                .pipeline
                .run(
                    task,
                    &files,
                    &workspace,
                    project.project_type,
                    iteration,
                    self.env.review.as_ref(),
                )
                .await?;

            if let Some(output) = run.test_output.as_deref().filter(|o| !o.is_empty()) {
                self.save_context(ItemType::TestResult, output).await?;
            }

            match run.verdict {
                PipelineVerdict::Passed => {
                    let commit = git
                        .commit_task(&task.task_number, &task.title, &task.description, &files)
                        .await;
                    drop(guard);

                    let sha = match commit {
                        Ok(CommitOutcome::Committed { sha }) => Some(sha),
                        Ok(CommitOutcome::Skipped { reason }) => {
                            self.env
                                .store
                                .note_task_warning(task.id, &format!("commit skipped: {reason}"))
                                .await?;
                            None
                        }
                        Err(e) => {
                            self.env
                                .store
                                .note_task_warning(task.id, &format!("commit failed: {e}"))
                                .await?;
                            if git.consecutive_failures()
                                >= self.env.config.git_failure_blocker_threshold
                            {
                                self.env
                                    .blockers
                                    .create(
                                        task,
                                        BlockerSeverity::Async,
                                        "git commits failing",
                                        &format!(
                                            "{} consecutive git failures, last: {e}",
                                            git.consecutive_failures()
                                        ),
                                    )
                                    .await?;
                            }
                            None
                        }
                    };

                    self.env.store.complete_task(task.id, sha.as_deref()).await?;
                    self.env.bus.emit(Event::TaskCompleted {
                        project_id: task.project_id,
                        task_id: task.id,
                        commit_sha: sha.clone(),
                    });
                    info!(task_id = task.id, sha = ?sha, "Task completed");
                    return Ok(TaskOutcome::Completed { commit_sha: sha });
                }

                PipelineVerdict::ChangesRequested => {
                    drop(guard);
                    self.env.store.set_task_awaiting_review(task.id).await?;
                    let report = run.review.as_ref().ok_or_else(|| {
                        CoreError::Consistency("changes requested without a report".into())
                    })?;
                    for finding in &report.findings {
                        self.save_context(
                            ItemType::Error,
                            &format!("{}: {} ({})", finding.file, finding.message, finding.category),
                        )
                        .await?;
                    }
                    info!(
                        task_id = task.id,
                        iteration,
                        score = report.overall_score,
                        "Revising after review"
                    );
                    messages.push(ChatMessage {
                        role: crate::llm::ChatRole::Assistant,
                        content: response,
                    });
                    messages.push(ChatMessage::user(format!(
                        "The review requested changes. Address every finding and return the \
                         full corrected file set in the same JSON format.\n\n{}",
                        report.to_markdown()
                    )));
                    iteration += 1;
                }

                PipelineVerdict::LintBlocked { blocker_id }
                | PipelineVerdict::TestsBlocked { blocker_id }
                | PipelineVerdict::ReviewExhausted { blocker_id } => {
                    drop(guard);
                    if let Some(markdown) = &run.lint_markdown {
                        self.save_context(ItemType::Error, markdown).await?;
                    }
                    self.env
                        .store
                        .block_task(task.id, "blocked by quality gate")
                        .await?;
                    info!(task_id = task.id, blocker_id, "Task blocked");
                    return Ok(TaskOutcome::Blocked { blocker_id });
                }

                PipelineVerdict::ReviewRejected => {
                    drop(guard);
                    let score = run.review.as_ref().map(|r| r.overall_score).unwrap_or(0.0);
                    let reason = format!("review rejected (score {score:.0})");
                    self.env.store.fail_task(task.id, &reason).await?;
                    self.env.bus.emit(Event::TaskFailed {
                        project_id: task.project_id,
                        task_id: task.id,
                        reason: reason.clone(),
                    });
                    return Ok(TaskOutcome::Failed { reason });
                }
            }
        }
    }

    async fn call_llm(&self, messages: &[ChatMessage]) -> CoreResult<String> {
        tokio::time::timeout(
            self.env.config.llm_timeout,
            self.env.llm.complete(messages, &self.model),
        )
        .await
        .map_err(|_| {
            CoreError::Budget(format!(
                "LLM call exceeded {}s",
                self.env.config.llm_timeout.as_secs()
            ))
        })?
    }

    fn build_prompt(&self, task: &Task, hot: &[codeframe_core::ContextItem]) -> Vec<ChatMessage> {
        let mut system = format!(
            "You are a {} engineer on an autonomous development team. \
             Produce complete file contents, never fragments. \
             Respond with a JSON object: {{\"files\": [{{\"path\": \"...\", \"content\": \"...\"}}]}}.\n\n{}",
            self.kind,
            maturity_instructions(self.maturity),
        );
        if let Some(overrides) = &self.prompt_overrides {
            system.push_str("\n\n");
            system.push_str(overrides);
        }

        let mut user = String::new();
        if !hot.is_empty() {
            user.push_str("=== CONTEXT ===\n");
            for item in hot {
                user.push_str(&format!("--- {} ---\n{}\n", item.item_type.as_str(), item.content));
            }
            user.push_str("=== END CONTEXT ===\n\n");
        }
        user.push_str(&format!("Task {}: {}\n\n{}", task.task_number, task.title, task.description));

        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}

/// Instruction granularity per maturity level (D1..D4).
fn maturity_instructions(maturity: Maturity) -> &'static str {
    match maturity {
        Maturity::Directive => {
            "Follow the task description literally, step by step. Do not make \
             design decisions beyond what the task states."
        }
        Maturity::Coaching => {
            "Follow the task description closely. Where it is silent, choose \
             the simplest conventional approach and note the choice in a comment."
        }
        Maturity::Supporting => {
            "Use the task description as the goal. You may restructure code \
             where it clearly improves the result."
        }
        Maturity::Delegating => "Achieve the task's goal however you judge best.",
    }
}

/// Parse the LLM's patch response: either a bare JSON object or a fenced
/// ```json block containing `{"files": [{"path", "content"}]}`.
pub fn parse_patch(response: &str) -> CoreResult<Vec<PatchFile>> {
    #[derive(Deserialize)]
    struct PatchEnvelope {
        files: Vec<PatchFile>,
    }

    let candidate = response.trim();
    if let Ok(envelope) = serde_json::from_str::<PatchEnvelope>(candidate) {
        return Ok(envelope.files);
    }

    if let Some(block) = extract_fenced_block(candidate, "json") {
        if let Ok(envelope) = serde_json::from_str::<PatchEnvelope>(&block) {
            return Ok(envelope.files);
        }
    }

    Err(CoreError::ExternalTool(
        "LLM response did not contain a parseable file patch".to_string(),
    ))
}

/// Extract the first fenced code block with the given language tag, or the
/// first anonymous fence as a fallback.
fn extract_fenced_block(content: &str, lang: &str) -> Option<String> {
    for marker in [format!("```{lang}"), "```".to_string()] {
        if let Some(start) = content.find(marker.as_str()) {
            let body_start = content[start..].find('\n').map(|i| start + i + 1)?;
            if let Some(end) = content[body_start..].find("```") {
                return Some(content[body_start..body_start + end].trim().to_string());
            }
        }
    }
    None
}

/// Write patch files under the workspace root, rejecting path escapes.
pub async fn apply_patch(workspace: &Path, patch: &[PatchFile]) -> CoreResult<()> {
    for file in patch {
        let rel = Path::new(&file.path);
        if rel.is_absolute() || file.path.split('/').any(|part| part == "..") {
            return Err(CoreError::Validation(format!(
                "patch path escapes the workspace: {}",
                file.path
            )));
        }
        let full = workspace.join(rel);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, &file.content).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_json_patch() {
        let response = r#"{"files": [{"path": "src/app.py", "content": "x = 1\n"}]}"#;
        let patch = parse_patch(response).unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(patch[0].path, "src/app.py");
    }

    #[test]
    fn test_parse_fenced_json_patch() {
        let response = "Here is the change:\n```json\n{\"files\": [{\"path\": \"a.py\", \"content\": \"pass\\n\"}]}\n```\nDone.";
        let patch = parse_patch(response).unwrap();
        assert_eq!(patch[0].path, "a.py");
    }

    #[test]
    fn test_parse_garbage_fails() {
        let err = parse_patch("I could not complete the task.").unwrap_err();
        assert!(matches!(err, CoreError::ExternalTool(_)));
    }

    #[tokio::test]
    async fn test_apply_patch_writes_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        apply_patch(
            tmp.path(),
            &[PatchFile {
                path: "src/pkg/mod.py".into(),
                content: "x = 1\n".into(),
            }],
        )
        .await
        .unwrap();
        let written = tokio::fs::read_to_string(tmp.path().join("src/pkg/mod.py"))
            .await
            .unwrap();
        assert_eq!(written, "x = 1\n");
    }

    #[tokio::test]
    async fn test_apply_patch_rejects_escapes() {
        let tmp = tempfile::tempdir().unwrap();
        for path in ["../evil.py", "/etc/passwd"] {
            let err = apply_patch(
                tmp.path(),
                &[PatchFile {
                    path: path.into(),
                    content: String::new(),
                }],
            )
            .await
            .unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)));
        }
    }

    #[test]
    fn test_maturity_granularity() {
        assert!(maturity_instructions(Maturity::Directive).contains("step by step"));
        assert!(maturity_instructions(Maturity::Delegating).len()
            < maturity_instructions(Maturity::Directive).len());
    }

    #[test]
    fn test_extract_fenced_block_prefers_tagged() {
        let content = "```\nplain\n```\n```json\n{\"a\":1}\n```";
        assert_eq!(extract_fenced_block(content, "json").unwrap(), "{\"a\":1}");
    }
}
