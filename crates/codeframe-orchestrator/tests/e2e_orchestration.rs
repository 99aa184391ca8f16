//! Full pipeline: discovery → planning → approval → dispatch → review phase,
//! with a mock LLM, a scripted tool runner, and a real git workspace.

use codeframe_agents::{
    builtin_definitions, AgentPool, LlmClient, MockLlmClient, ReviewAgent, WorkerEnv,
};
use codeframe_context::{ContextManager, TokenCounter};
use codeframe_core::{
    CoreConfig, EventBus, LogNotificationSink, ProjectPhase, ProjectType, TaskStatus,
};
use codeframe_git::GitWorkflow;
use codeframe_orchestrator::{LeadAgent, DISCOVERY_SCRIPT};
use codeframe_quality::{BlockerService, QualityPipeline, ScriptedRunner};
use codeframe_store::Store;
use std::sync::Arc;
use std::time::Duration;

const PLAN: &str = r#"{
    "issues": [{
        "number": "1", "title": "Greeting service", "description": "Build it", "priority": 1,
        "tasks": [
            {"number": "1.1", "title": "Implement greeting", "description": "Add greet()",
             "required_capabilities": ["python"]},
            {"number": "1.2", "title": "Add greeting tests", "description": "Cover greet()",
             "depends_on": ["1.1"], "required_capabilities": ["python"]}
        ]
    }]
}"#;

fn code_patch(path: &str, test_path: &str) -> String {
    serde_json::json!({
        "files": [
            {"path": path, "content": "def greet(name):\n    return f\"hello {name}\"\n"},
            {"path": test_path, "content": "def test_greet():\n    assert True\n"}
        ]
    })
    .to_string()
}

async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_project_runs_discovery_to_review() {
    let workspace = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(workspace.path()).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "tester").unwrap();
        config.set_str("user.email", "tester@example.com").unwrap();
    }

    let store = Store::open_in_memory().await.unwrap();
    let bus = EventBus::default();
    let config = Arc::new(CoreConfig::default());
    let blockers = Arc::new(BlockerService::new(
        store.clone(),
        bus.clone(),
        Arc::new(LogNotificationSink),
    ));

    // The planner returns the plan; each worker call returns a clean patch.
    let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new(vec![
        PLAN.to_string(),
        code_patch("greet.py", "test_greet.py"),
        code_patch("greet2.py", "test_greet2.py"),
    ]));

    let env = WorkerEnv {
        store: store.clone(),
        context: Arc::new(ContextManager::new(
            store.clone(),
            Arc::new(TokenCounter::new().unwrap()),
            bus.clone(),
            config.clone(),
        )),
        llm: llm.clone(),
        pipeline: Arc::new(QualityPipeline::new(
            store.clone(),
            bus.clone(),
            blockers.clone(),
            Arc::new(ScriptedRunner::new()),
            config.clone(),
        )),
        blockers,
        review: Arc::new(ReviewAgent::new(config.clone())),
        bus: bus.clone(),
        config: config.clone(),
    };
    let pool = Arc::new(AgentPool::new(store.clone(), env));
    pool.spawn_from_definitions(&builtin_definitions()).await.unwrap();

    let project = store
        .create_project(
            "greeting-svc",
            "A tiny greeting service",
            ProjectType::Python,
            workspace.path().to_str().unwrap(),
        )
        .await
        .unwrap();

    let lead = Arc::new(LeadAgent::new(
        project.id,
        store.clone(),
        pool,
        llm,
        bus.clone(),
        config,
        Arc::new(GitWorkflow::new(workspace.path())),
        "claude-3-5-sonnet-latest",
    ));

    // Discovery: answer the whole script.
    for i in 0..DISCOVERY_SCRIPT.len() {
        lead.answer(&format!("Detailed answer {i}")).await.unwrap();
    }
    assert_eq!(
        store.get_project(project.id).await.unwrap().unwrap().phase,
        ProjectPhase::Planning
    );

    // Planning produces the DAG and waits for approval.
    let (issues, tasks) = lead.plan().await.unwrap();
    assert_eq!((issues, tasks), (1, 2));

    // Approve everything; development begins.
    let all: Vec<i64> = store
        .list_tasks(project.id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    lead.approve(&all, &all).await.unwrap();

    // Dispatch until both tasks complete; the second only becomes ready
    // once the first finishes.
    let store2 = store.clone();
    let project_id = project.id;
    let done = wait_for(
        || {
            let lead = lead.clone();
            let store = store2.clone();
            async move {
                let _ = lead.dispatch_tick().await;
                let _ = lead.check_development_complete().await;
                store
                    .get_project(project_id)
                    .await
                    .unwrap()
                    .map(|p| p.phase == ProjectPhase::Review)
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(done, "project should reach review");

    // Both tasks completed with commits recorded.
    let tasks = store.list_tasks(project.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.commit_sha.is_some(), "task {} has a commit", task.task_number);
    }

    // Progress aggregate reflects completion.
    let listed = store.list_projects().await.unwrap();
    let (_, progress) = listed.iter().find(|(p, _)| p.id == project.id).unwrap();
    assert_eq!(progress.completed_tasks, 2);
    assert_eq!(progress.percentage, 100.0);

    // Sign-off finishes the project.
    lead.sign_off().await.unwrap();
    assert_eq!(
        store.get_project(project.id).await.unwrap().unwrap().phase,
        ProjectPhase::Completed
    );
}
