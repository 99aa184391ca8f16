use crate::definitions::AgentDefinition;
use crate::worker::{WorkerAgent, WorkerEnv};
use chrono::Utc;
use codeframe_core::{AgentMetrics, AgentRecord, AgentStatus, CoreResult};
use codeframe_store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Default completion model per provider name.
pub fn model_for_provider(provider: &str) -> &'static str {
    match provider {
        "openai" => "gpt-4o",
        _ => "claude-3-5-sonnet-latest",
    }
}

/// Lifecycle and dispatch routing for worker agents.
///
/// Holds live workers in memory and mirrors their status in the store;
/// reconciliation happens on heartbeat. Selection matches a task's required
/// capabilities against each worker's declared set, preferring higher
/// maturity and then recent success rate.
pub struct AgentPool {
    store: Store,
    env: WorkerEnv,
    workers: RwLock<HashMap<String, Arc<WorkerAgent>>>,
}

impl AgentPool {
    pub fn new(store: Store, env: WorkerEnv) -> Self {
        Self {
            store,
            env,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a worker and persist its idle record.
    pub async fn register(&self, worker: WorkerAgent) -> CoreResult<Arc<WorkerAgent>> {
        let record = AgentRecord {
            id: worker.id().to_string(),
            kind: worker.kind(),
            provider: worker.provider().to_string(),
            maturity: worker.maturity(),
            status: AgentStatus::Idle,
            current_task_id: None,
            last_heartbeat: Utc::now(),
            metrics: AgentMetrics::default(),
        };
        self.store.upsert_agent(&record).await?;

        let worker = Arc::new(worker);
        self.workers
            .write()
            .await
            .insert(worker.id().to_string(), worker.clone());
        info!(agent_id = worker.id(), kind = %worker.kind(), "Agent registered");
        Ok(worker)
    }

    /// Create one worker per definition, ids like `backend-1`.
    pub async fn spawn_from_definitions(
        &self,
        definitions: &[AgentDefinition],
    ) -> CoreResult<usize> {
        let mut counters: HashMap<String, u32> = HashMap::new();
        for def in definitions {
            let n = counters.entry(def.kind.to_string()).or_insert(0);
            *n += 1;
            let id = format!("{}-{}", def.kind, n);
            let worker = WorkerAgent::new(
                id,
                def.kind,
                def.capabilities.clone(),
                def.maturity,
                def.provider.clone(),
                model_for_provider(&def.provider),
                def.prompt_overrides.clone(),
                self.env.clone(),
            );
            self.register(worker).await?;
        }
        Ok(definitions.len())
    }

    /// Remove a worker from the pool and mark it offline.
    pub async fn destroy(&self, agent_id: &str) -> CoreResult<bool> {
        let removed = self.workers.write().await.remove(agent_id).is_some();
        if removed {
            if let Some(mut record) = self.store.get_agent(agent_id).await? {
                record.status = AgentStatus::Offline;
                record.current_task_id = None;
                self.store.upsert_agent(&record).await?;
            }
            info!(agent_id, "Agent destroyed");
        }
        Ok(removed)
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<WorkerAgent>> {
        self.workers.read().await.get(agent_id).cloned()
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Pick an idle worker whose capabilities cover the requirement.
    ///
    /// Tie-break: maturity level first (higher wins), then recent success
    /// rate from the stored metrics. Returns `None` when no idle capable
    /// worker exists — the task simply stays ready (backpressure).
    pub async fn select(&self, required: &[String]) -> CoreResult<Option<Arc<WorkerAgent>>> {
        let workers = self.workers.read().await;
        let mut candidates = Vec::new();

        for worker in workers.values() {
            if !worker.can_handle(required) {
                continue;
            }
            let Some(record) = self.store.get_agent(worker.id()).await? else {
                continue;
            };
            if record.status != AgentStatus::Idle {
                continue;
            }
            candidates.push((worker.clone(), record.metrics.success_rate()));
        }

        candidates.sort_by(|(a, a_rate), (b, b_rate)| {
            b.maturity()
                .cmp(&a.maturity())
                .then(b_rate.partial_cmp(a_rate).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.id().cmp(b.id()))
        });
        Ok(candidates.into_iter().next().map(|(w, _)| w))
    }

    /// Refresh heartbeats for live workers and mark silent ones offline.
    pub async fn heartbeat(&self) -> CoreResult<usize> {
        let workers = self.workers.read().await;
        for id in workers.keys() {
            self.store.heartbeat(id).await?;
        }
        drop(workers);

        let stale_cutoff = Utc::now()
            - chrono::Duration::from_std(self.env.config.heartbeat_stale)
                .unwrap_or_else(|_| chrono::Duration::seconds(90));
        self.store.mark_stale_offline(stale_cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::builtin_definitions;
    use crate::llm::MockLlmClient;
    use crate::review::ReviewAgent;
    use codeframe_context::{ContextManager, TokenCounter};
    use codeframe_core::{AgentKind, CoreConfig, EventBus, LogNotificationSink, Maturity};
    use codeframe_quality::{BlockerService, QualityPipeline, ScriptedRunner};

    async fn env(store: &Store) -> WorkerEnv {
        let bus = EventBus::default();
        let config = Arc::new(CoreConfig::default());
        let blockers = Arc::new(BlockerService::new(
            store.clone(),
            bus.clone(),
            Arc::new(LogNotificationSink),
        ));
        WorkerEnv {
            store: store.clone(),
            context: Arc::new(ContextManager::new(
                store.clone(),
                Arc::new(TokenCounter::new().unwrap()),
                bus.clone(),
                config.clone(),
            )),
            llm: Arc::new(MockLlmClient::always("{}")),
            pipeline: Arc::new(QualityPipeline::new(
                store.clone(),
                bus.clone(),
                blockers.clone(),
                Arc::new(ScriptedRunner::new()),
                config.clone(),
            )),
            blockers,
            review: Arc::new(ReviewAgent::new(config.clone())),
            bus,
            config,
        }
    }

    fn worker(id: &str, caps: &[&str], maturity: Maturity, env: WorkerEnv) -> WorkerAgent {
        WorkerAgent::new(
            id,
            AgentKind::Backend,
            caps.iter().map(|c| c.to_string()).collect(),
            maturity,
            "anthropic",
            "claude-3-5-sonnet-latest",
            None,
            env,
        )
    }

    #[tokio::test]
    async fn test_spawn_from_builtin_definitions() {
        let store = Store::open_in_memory().await.unwrap();
        let pool = AgentPool::new(store.clone(), env(&store).await);

        let spawned = pool.spawn_from_definitions(&builtin_definitions()).await.unwrap();
        assert_eq!(spawned, 4);
        assert_eq!(pool.worker_count().await, 4);
        assert!(pool.get("backend-1").await.is_some());
        assert_eq!(store.list_agents().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_select_requires_capability_superset() {
        let store = Store::open_in_memory().await.unwrap();
        let e = env(&store).await;
        let pool = AgentPool::new(store.clone(), e.clone());
        pool.register(worker("py-1", &["python"], Maturity::Coaching, e.clone()))
            .await
            .unwrap();
        pool.register(worker("full-1", &["python", "api"], Maturity::Coaching, e))
            .await
            .unwrap();

        let picked = pool
            .select(&["python".into(), "api".into()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id(), "full-1");

        assert!(pool
            .select(&["golang".into()])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_select_prefers_higher_maturity() {
        let store = Store::open_in_memory().await.unwrap();
        let e = env(&store).await;
        let pool = AgentPool::new(store.clone(), e.clone());
        pool.register(worker("junior", &["python"], Maturity::Directive, e.clone()))
            .await
            .unwrap();
        pool.register(worker("senior", &["python"], Maturity::Delegating, e))
            .await
            .unwrap();

        let picked = pool.select(&["python".into()]).await.unwrap().unwrap();
        assert_eq!(picked.id(), "senior");
    }

    #[tokio::test]
    async fn test_select_skips_busy_agents() {
        let store = Store::open_in_memory().await.unwrap();
        let e = env(&store).await;
        let pool = AgentPool::new(store.clone(), e.clone());
        pool.register(worker("only", &["python"], Maturity::Coaching, e))
            .await
            .unwrap();

        let mut record = store.get_agent("only").await.unwrap().unwrap();
        record.status = AgentStatus::Working;
        store.upsert_agent(&record).await.unwrap();

        // Backpressure: no idle capable agent, the task stays ready.
        assert!(pool.select(&["python".into()]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_destroy_marks_offline() {
        let store = Store::open_in_memory().await.unwrap();
        let e = env(&store).await;
        let pool = AgentPool::new(store.clone(), e.clone());
        pool.register(worker("gone", &["python"], Maturity::Coaching, e))
            .await
            .unwrap();

        assert!(pool.destroy("gone").await.unwrap());
        assert_eq!(pool.worker_count().await, 0);
        let record = store.get_agent("gone").await.unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Offline);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes() {
        let store = Store::open_in_memory().await.unwrap();
        let e = env(&store).await;
        let pool = AgentPool::new(store.clone(), e.clone());
        pool.register(worker("beat", &["python"], Maturity::Coaching, e))
            .await
            .unwrap();

        pool.heartbeat().await.unwrap();
        let record = store.get_agent("beat").await.unwrap().unwrap();
        assert!(record.last_heartbeat > Utc::now() - chrono::Duration::seconds(5));
    }
}
