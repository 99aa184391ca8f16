use codeframe_agents::{AgentPool, LlmClient, ReviewAgent};
use codeframe_context::ContextManager;
use codeframe_core::{CoreConfig, CoreError, CoreResult, EventBus};
use codeframe_git::GitWorkflow;
use codeframe_orchestrator::LeadAgent;
use codeframe_quality::BlockerService;
use codeframe_store::Store;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything the HTTP handlers need, shared behind one `Arc`.
pub struct AppState {
    pub store: Store,
    pub context: Arc<ContextManager>,
    pub pool: Arc<AgentPool>,
    pub blockers: Arc<BlockerService>,
    pub review: Arc<ReviewAgent>,
    pub bus: EventBus,
    pub config: Arc<CoreConfig>,
    pub llm: Arc<dyn LlmClient>,
    /// Root under which each project's workspace directory is created.
    pub workspace_root: PathBuf,
    pub planner_model: String,
    leads: RwLock<HashMap<i64, Arc<LeadAgent>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        context: Arc<ContextManager>,
        pool: Arc<AgentPool>,
        blockers: Arc<BlockerService>,
        review: Arc<ReviewAgent>,
        bus: EventBus,
        config: Arc<CoreConfig>,
        llm: Arc<dyn LlmClient>,
        workspace_root: PathBuf,
        planner_model: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            context,
            pool,
            blockers,
            review,
            bus,
            config,
            llm,
            workspace_root,
            planner_model: planner_model.into(),
            leads: RwLock::new(HashMap::new()),
        })
    }

    /// Lead agent for a project, created lazily on first touch.
    pub async fn lead_for(&self, project_id: i64) -> CoreResult<Arc<LeadAgent>> {
        if let Some(lead) = self.leads.read().await.get(&project_id) {
            return Ok(lead.clone());
        }

        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| CoreError::Store(format!("No project {project_id}")))?;

        let lead = Arc::new(LeadAgent::new(
            project_id,
            self.store.clone(),
            self.pool.clone(),
            self.llm.clone(),
            self.bus.clone(),
            self.config.clone(),
            Arc::new(GitWorkflow::new(project.workspace_path)),
            self.planner_model.clone(),
        ));
        self.leads.write().await.insert(project_id, lead.clone());
        Ok(lead)
    }
}
