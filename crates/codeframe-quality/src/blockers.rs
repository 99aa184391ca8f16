use codeframe_core::{
    Blocker, BlockerSeverity, CoreResult, Event, EventBus, NotificationSink, Task,
};
use codeframe_store::Store;
use std::sync::Arc;
use tracing::{info, warn};

/// The human-in-the-loop protocol: create, list, and resolve blockers.
///
/// Creation is idempotent on `(task_id, reason)` among open blockers. A SYNC
/// creation notifies the configured sink; sink failure is logged and
/// swallowed because the `blocker_created` event is already on the bus.
pub struct BlockerService {
    store: Store,
    bus: EventBus,
    sink: Arc<dyn NotificationSink>,
}

impl BlockerService {
    pub fn new(store: Store, bus: EventBus, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, bus, sink }
    }

    /// Open a blocker for a task. Returns the existing blocker when an open
    /// one with the same reason already exists.
    pub async fn create(
        &self,
        task: &Task,
        severity: BlockerSeverity,
        reason: &str,
        question: &str,
    ) -> CoreResult<Blocker> {
        let (blocker, created) = self
            .store
            .create_blocker(task.id, severity, reason, question)
            .await?;
        if !created {
            return Ok(blocker);
        }

        info!(
            task_id = task.id,
            blocker_id = blocker.id,
            severity = severity.as_str(),
            reason,
            "Blocker created"
        );
        let event = Event::BlockerCreated {
            project_id: task.project_id,
            task_id: task.id,
            blocker_id: blocker.id,
            severity,
            reason: reason.to_string(),
        };
        self.bus.emit(event.clone());

        if severity == BlockerSeverity::Sync {
            if let Err(e) = self.sink.send(&event).await {
                warn!(blocker_id = blocker.id, error = %e, "Notification sink failed");
            }
        }
        Ok(blocker)
    }

    /// Resolve a blocker with human-provided text and announce it so the
    /// lead agent re-evaluates task readiness.
    pub async fn resolve(&self, blocker_id: i64, resolution: &str) -> CoreResult<Blocker> {
        let blocker = self.store.resolve_blocker(blocker_id, resolution).await?;
        let task = self.store.get_task(blocker.task_id).await?;

        info!(blocker_id, task_id = blocker.task_id, "Blocker resolved");
        self.bus.emit(Event::BlockerResolved {
            project_id: task.map(|t| t.project_id).unwrap_or_default(),
            task_id: blocker.task_id,
            blocker_id,
        });
        Ok(blocker)
    }

    pub async fn list(&self, project_id: i64) -> CoreResult<Vec<Blocker>> {
        self.store.list_blockers(project_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeframe_core::{CoreError, LogNotificationSink, ProjectType, ProposedBy};
    use codeframe_store::{NewIssue, NewTask};

    struct FailingSink;

    #[async_trait::async_trait]
    impl NotificationSink for FailingSink {
        async fn send(&self, _event: &Event) -> CoreResult<()> {
            Err(CoreError::ExternalTool("webhook down".into()))
        }
    }

    async fn fixture(sink: Arc<dyn NotificationSink>) -> (BlockerService, EventBus, Task) {
        let store = Store::open_in_memory().await.unwrap();
        let bus = EventBus::default();
        let pid = store
            .create_project("blocker-svc", "Blocker service tests", ProjectType::Python, "/tmp")
            .await
            .unwrap()
            .id;
        let iid = store
            .create_issue(NewIssue {
                project_id: pid,
                issue_number: "1".into(),
                title: "Issue".into(),
                description: "Service issue".into(),
                priority: 1,
                depends_on: vec![],
                proposed_by: ProposedBy::Agent,
            })
            .await
            .unwrap()
            .id;
        let task = store
            .create_task(NewTask {
                project_id: pid,
                issue_id: iid,
                task_number: "1.1".into(),
                title: "Task".into(),
                description: "Service task".into(),
                depends_on: vec![],
                required_capabilities: vec![],
            })
            .await
            .unwrap();
        (BlockerService::new(store, bus.clone(), sink), bus, task)
    }

    #[tokio::test]
    async fn test_create_emits_and_dedupes() {
        let (service, bus, task) = fixture(Arc::new(LogNotificationSink)).await;
        let mut rx = bus.subscribe();

        let first = service
            .create(&task, BlockerSeverity::Sync, "lint gate failed", "fix?")
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "blocker_created");

        let second = service
            .create(&task, BlockerSeverity::Sync, "lint gate failed", "fix again?")
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        // No second event for the dedup.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sink_failure_is_not_fatal() {
        let (service, bus, task) = fixture(Arc::new(FailingSink)).await;
        let mut rx = bus.subscribe();

        let blocker = service
            .create(&task, BlockerSeverity::Sync, "needs human", "approve?")
            .await
            .unwrap();
        assert!(blocker.is_open());
        // The event still reached the bus.
        assert_eq!(rx.recv().await.unwrap().kind(), "blocker_created");
    }

    #[tokio::test]
    async fn test_resolve_emits() {
        let (service, bus, task) = fixture(Arc::new(LogNotificationSink)).await;
        let blocker = service
            .create(&task, BlockerSeverity::Async, "git failing", "check?")
            .await
            .unwrap();

        let mut rx = bus.subscribe();
        let resolved = service.resolve(blocker.id, "remote fixed").await.unwrap();
        assert!(!resolved.is_open());
        assert_eq!(rx.recv().await.unwrap().kind(), "blocker_resolved");
    }
}
