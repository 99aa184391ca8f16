//! End-to-end worker execution against an in-memory store, a scripted tool
//! runner, a mock LLM, and a real git workspace.

use codeframe_agents::{MockLlmClient, ReviewAgent, WorkerAgent, WorkerEnv};
use codeframe_context::{ContextManager, TokenCounter};
use codeframe_core::{
    AgentKind, AgentStatus, BlockerSeverity, CoreConfig, CoreError, EventBus, ItemType,
    LogNotificationSink, Maturity, TaskOutcome, TaskStatus,
};
use codeframe_git::GitWorkflow;
use codeframe_quality::{BlockerService, QualityPipeline, ScriptedRunner, ToolOutput};
use codeframe_store::{NewIssue, NewTask, Store};
use std::sync::Arc;
use tokio::sync::Mutex;

struct Harness {
    store: Store,
    bus: EventBus,
    runner: Arc<ScriptedRunner>,
    workspace: tempfile::TempDir,
    project_id: i64,
    task_id: i64,
}

impl Harness {
    async fn new() -> Self {
        let workspace = tempfile::tempdir().unwrap();
        let repo = git2::Repository::init(workspace.path()).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "tester").unwrap();
            config.set_str("user.email", "tester@example.com").unwrap();
        }

        let store = Store::open_in_memory().await.unwrap();
        let bus = EventBus::default();
        let runner = Arc::new(ScriptedRunner::new());

        let project_id = store
            .create_project(
                "worker-e2e",
                "Worker execution test project",
                codeframe_core::ProjectType::Python,
                workspace.path().to_str().unwrap(),
            )
            .await
            .unwrap()
            .id;
        let issue_id = store
            .create_issue(NewIssue {
                project_id,
                issue_number: "1".into(),
                title: "Auth".into(),
                description: "Authentication issue".into(),
                priority: 1,
                depends_on: vec![],
                proposed_by: codeframe_core::ProposedBy::Agent,
            })
            .await
            .unwrap()
            .id;
        let task_id = store
            .create_task(NewTask {
                project_id,
                issue_id,
                task_number: "1.1.1".into(),
                title: "Implement login handler".into(),
                description: "Add the login endpoint".into(),
                depends_on: vec![],
                required_capabilities: vec!["python".into()],
            })
            .await
            .unwrap()
            .id;
        store.recompute_ready(project_id).await.unwrap();

        Self {
            store,
            bus,
            runner,
            workspace,
            project_id,
            task_id,
        }
    }

    async fn worker(&self, responses: Vec<String>) -> WorkerAgent {
        self.store
            .upsert_agent(&codeframe_core::AgentRecord {
                id: "backend-1".into(),
                kind: AgentKind::Backend,
                provider: "anthropic".into(),
                maturity: Maturity::Coaching,
                status: AgentStatus::Idle,
                current_task_id: None,
                last_heartbeat: chrono::Utc::now(),
                metrics: codeframe_core::AgentMetrics::default(),
            })
            .await
            .unwrap();

        let config = Arc::new(CoreConfig::default());
        let blockers = Arc::new(BlockerService::new(
            self.store.clone(),
            self.bus.clone(),
            Arc::new(LogNotificationSink),
        ));
        let env = WorkerEnv {
            store: self.store.clone(),
            context: Arc::new(ContextManager::new(
                self.store.clone(),
                Arc::new(TokenCounter::new().unwrap()),
                self.bus.clone(),
                config.clone(),
            )),
            llm: Arc::new(MockLlmClient::new(responses)),
            pipeline: Arc::new(QualityPipeline::new(
                self.store.clone(),
                self.bus.clone(),
                blockers.clone(),
                self.runner.clone(),
                config.clone(),
            )),
            blockers,
            review: Arc::new(ReviewAgent::new(config.clone())),
            bus: self.bus.clone(),
            config,
        };
        WorkerAgent::new(
            "backend-1",
            AgentKind::Backend,
            vec!["python".into()],
            Maturity::Coaching,
            "anthropic",
            "claude-3-5-sonnet-latest",
            None,
            env,
        )
    }

    fn git(&self) -> Arc<GitWorkflow> {
        Arc::new(GitWorkflow::new(self.workspace.path()))
    }
}

fn patch(files: &[(&str, &str)]) -> String {
    let files: Vec<serde_json::Value> = files
        .iter()
        .map(|(path, content)| serde_json::json!({"path": path, "content": content}))
        .collect();
    serde_json::json!({ "files": files }).to_string()
}

const CLEAN_APP: &str = "def login(username, password):\n    return {\"user\": username}\n";
const CLEAN_TEST: &str = "def test_login():\n    assert login(\"a\", \"b\")[\"user\"] == \"a\"\n";

/// Three shell escapes keep the security score at 25 so the review lands
/// between the reject and approve thresholds.
const SLOPPY_APP: &str = "import os\n\ndef login(cmd):\n    os.system(cmd)\n    os.system(cmd)\n    os.system(cmd)\n    return True\n";

#[tokio::test]
async fn test_happy_path_commits_and_completes() {
    let harness = Harness::new().await;
    let worker = harness
        .worker(vec![patch(&[("app.py", CLEAN_APP), ("test_app.py", CLEAN_TEST)])])
        .await;
    let mut events = harness.bus.subscribe();

    let outcome = worker
        .execute(harness.task_id, harness.git(), Arc::new(Mutex::new(())))
        .await
        .unwrap();

    let TaskOutcome::Completed { commit_sha } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    let sha = commit_sha.expect("a commit was made");
    assert_eq!(sha.len(), 40);

    // Store state: task completed with the SHA, agent released.
    let task = harness.store.get_task(harness.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.commit_sha.as_deref(), Some(sha.as_str()));
    let agent = harness.store.get_agent("backend-1").await.unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert!(agent.current_task_id.is_none());
    assert_eq!(agent.metrics.tasks_completed, 1);

    // Files landed in the workspace.
    let written = std::fs::read_to_string(harness.workspace.path().join("app.py")).unwrap();
    assert_eq!(written, CLEAN_APP);

    // Task lookup by commit prefix resolves.
    let by_commit = harness.store.task_by_commit(&sha[..8]).await.unwrap().unwrap();
    assert_eq!(by_commit.id, harness.task_id);

    // Context has TASK and CODE items for this scope.
    let items = harness
        .store
        .list_context_items("backend-1", harness.project_id, None, None, 0, false)
        .await
        .unwrap();
    assert!(items.iter().any(|i| i.item_type == ItemType::Task));
    assert!(items.iter().any(|i| i.item_type == ItemType::Code));

    // Event order: started before completed.
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind().to_string());
    }
    let started = kinds.iter().position(|k| k == "task_started").unwrap();
    let completed = kinds.iter().position(|k| k == "task_completed").unwrap();
    assert!(started < completed);
}

#[tokio::test]
async fn test_lint_criticals_block_without_commit() {
    let harness = Harness::new().await;
    harness
        .runner
        .push(
            "ruff",
            ToolOutput::failed(1, "app.py:1:1: F401 `os` imported but unused\napp.py:2:1: F821 undefined name"),
        )
        .await;
    let worker = harness.worker(vec![patch(&[("app.py", CLEAN_APP)])]).await;

    let outcome = worker
        .execute(harness.task_id, harness.git(), Arc::new(Mutex::new(())))
        .await
        .unwrap();

    let TaskOutcome::Blocked { blocker_id } = outcome else {
        panic!("expected block, got {outcome:?}");
    };

    let task = harness.store.get_task(harness.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    assert!(task.commit_sha.is_none(), "no commit behind a failed gate");

    let blocker = harness.store.get_blocker(blocker_id).await.unwrap().unwrap();
    assert_eq!(blocker.severity, BlockerSeverity::Sync);
    assert!(blocker.question.contains("F401"));

    let lint = harness.store.lint_results_for_task(harness.task_id).await.unwrap();
    assert_eq!(lint.len(), 1);
    assert!(lint[0].error_count >= 2);
}

#[tokio::test]
async fn test_review_revision_loop_succeeds_second_pass() {
    let harness = Harness::new().await;
    let worker = harness
        .worker(vec![
            patch(&[("app.py", SLOPPY_APP)]),
            patch(&[("app.py", CLEAN_APP), ("test_app.py", CLEAN_TEST)]),
        ])
        .await;

    let outcome = worker
        .execute(harness.task_id, harness.git(), Arc::new(Mutex::new(())))
        .await
        .unwrap();
    assert!(matches!(outcome, TaskOutcome::Completed { .. }));

    // The revision left ERROR context items from the first review.
    let items = harness
        .store
        .list_context_items("backend-1", harness.project_id, None, None, 0, false)
        .await
        .unwrap();
    assert!(items.iter().any(|i| i.item_type == ItemType::Error));
}

#[tokio::test]
async fn test_review_exhaustion_blocks() {
    let harness = Harness::new().await;
    // Every revision produces the same sloppy file: iteration 2 exhausts
    // the budget and no third review is attempted.
    let worker = harness
        .worker(vec![
            patch(&[("app.py", SLOPPY_APP)]),
            patch(&[("app.py", SLOPPY_APP)]),
        ])
        .await;

    let outcome = worker
        .execute(harness.task_id, harness.git(), Arc::new(Mutex::new(())))
        .await
        .unwrap();

    let TaskOutcome::Blocked { blocker_id } = outcome else {
        panic!("expected exhaustion block, got {outcome:?}");
    };
    let blocker = harness.store.get_blocker(blocker_id).await.unwrap().unwrap();
    assert_eq!(blocker.reason, "review iterations exhausted");
    assert_eq!(blocker.severity, BlockerSeverity::Sync);

    let task = harness.store.get_task(harness.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
}

#[tokio::test]
async fn test_critical_security_finding_fails_task() {
    let harness = Harness::new().await;
    let evil = "def run(code):\n    return eval(code)\n";
    let worker = harness.worker(vec![patch(&[("app.py", evil)])]).await;

    let outcome = worker
        .execute(harness.task_id, harness.git(), Arc::new(Mutex::new(())))
        .await
        .unwrap();

    let TaskOutcome::Failed { reason } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(reason.contains("review rejected"));

    let task = harness.store.get_task(harness.task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    let agent = harness.store.get_agent("backend-1").await.unwrap().unwrap();
    assert_eq!(agent.metrics.tasks_failed, 1);
}

#[tokio::test]
async fn test_unparseable_llm_response_fails_task() {
    let harness = Harness::new().await;
    let worker = harness
        .worker(vec!["Sorry, I cannot produce a patch.".into()])
        .await;

    let outcome = worker
        .execute(harness.task_id, harness.git(), Arc::new(Mutex::new(())))
        .await
        .unwrap();
    assert!(matches!(outcome, TaskOutcome::Failed { .. }));

    let reason = harness.store.task_last_error(harness.task_id).await.unwrap();
    assert!(reason.unwrap().contains("patch"));
}

#[tokio::test]
async fn test_context_op_without_task_is_precondition_error() {
    let harness = Harness::new().await;
    let worker = harness.worker(vec![]).await;

    let err = worker
        .save_context(ItemType::Code, "orphan content")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Precondition(_)));
}
